//! 2D device images usable as sampled textures, storage images, and
//! off-screen render targets.

use super::buffer::read_mapped;
use super::error::ResourceError;
use super::render_context::RenderContext;

/// Channel layout of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// One channel.
    R,
    /// Two channels.
    Rg,
    /// Four channels.
    Rgba,
}

impl ChannelLayout {
    /// Number of channels per pixel.
    pub fn channels(self) -> usize {
        match self {
            Self::R => 1,
            Self::Rg => 2,
            Self::Rgba => 4,
        }
    }
}

/// Value type of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// 32-bit float.
    F32,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit signed integer.
    I32,
    /// 8-bit unsigned, normalized to `[0, 1]` when sampled.
    U8Norm,
}

impl ChannelType {
    /// Bytes per channel.
    pub fn size(self) -> usize {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::U8Norm => 1,
        }
    }

    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U8Norm => "u8",
        }
    }
}

/// Host scalar types that can be transferred to and from a [`DeviceImage`].
pub trait Texel: bytemuck::Pod {
    /// Channel type this host type corresponds to.
    const CHANNEL: ChannelType;
}

impl Texel for f32 {
    const CHANNEL: ChannelType = ChannelType::F32;
}

impl Texel for u32 {
    const CHANNEL: ChannelType = ChannelType::U32;
}

impl Texel for i32 {
    const CHANNEL: ChannelType = ChannelType::I32;
}

impl Texel for u8 {
    const CHANNEL: ChannelType = ChannelType::U8Norm;
}

/// Pixel storage format: channel layout and channel value type together
/// determine the device's internal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Channels per pixel.
    pub layout: ChannelLayout,
    /// Value type of each channel.
    pub channel: ChannelType,
}

impl PixelFormat {
    /// Four 32-bit float channels.
    pub const RGBA32F: Self = Self::new(ChannelLayout::Rgba, ChannelType::F32);
    /// One 32-bit float channel.
    pub const R32F: Self = Self::new(ChannelLayout::R, ChannelType::F32);
    /// Four 8-bit normalized channels (display colors).
    pub const RGBA8: Self = Self::new(ChannelLayout::Rgba, ChannelType::U8Norm);

    /// Format from a layout and a channel type.
    pub const fn new(layout: ChannelLayout, channel: ChannelType) -> Self {
        Self { layout, channel }
    }

    /// Internal device format.
    pub fn texture_format(self) -> wgpu::TextureFormat {
        use wgpu::TextureFormat as F;
        match (self.layout, self.channel) {
            (ChannelLayout::R, ChannelType::F32) => F::R32Float,
            (ChannelLayout::Rg, ChannelType::F32) => F::Rg32Float,
            (ChannelLayout::Rgba, ChannelType::F32) => F::Rgba32Float,
            (ChannelLayout::R, ChannelType::U32) => F::R32Uint,
            (ChannelLayout::Rg, ChannelType::U32) => F::Rg32Uint,
            (ChannelLayout::Rgba, ChannelType::U32) => F::Rgba32Uint,
            (ChannelLayout::R, ChannelType::I32) => F::R32Sint,
            (ChannelLayout::Rg, ChannelType::I32) => F::Rg32Sint,
            (ChannelLayout::Rgba, ChannelType::I32) => F::Rgba32Sint,
            (ChannelLayout::R, ChannelType::U8Norm) => F::R8Unorm,
            (ChannelLayout::Rg, ChannelType::U8Norm) => F::Rg8Unorm,
            (ChannelLayout::Rgba, ChannelType::U8Norm) => F::Rgba8Unorm,
        }
    }

    /// Bytes per pixel.
    pub fn pixel_size(self) -> usize {
        self.layout.channels() * self.channel.size()
    }

    /// `true` if the format may be bound as a storage image.
    pub fn supports_storage(self) -> bool {
        !matches!(
            (self.layout, self.channel),
            (ChannelLayout::R | ChannelLayout::Rg, ChannelType::U8Norm)
        )
    }

    fn usage(self) -> wgpu::TextureUsages {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        if self.supports_storage() {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        usage
    }
}

/// Access a compute kernel has to a storage image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Kernel only reads.
    Read,
    /// Kernel only writes.
    Write,
    /// Kernel reads and writes.
    ReadWrite,
}

impl Access {
    pub(crate) fn storage_access(self) -> wgpu::StorageTextureAccess {
        match self {
            Self::Read => wgpu::StorageTextureAccess::ReadOnly,
            Self::Write => wgpu::StorageTextureAccess::WriteOnly,
            Self::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
        }
    }
}

/// How an image is attached to a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUse {
    /// Sampled through a sampler.
    Sampled,
    /// Random access with the given access mode.
    Storage(Access),
}

/// An image attached to a numbered unit. Produced by
/// [`DeviceImage::bind_sample`] and [`DeviceImage::bind_image`].
#[derive(Debug, Clone)]
pub struct ImageBinding {
    /// Unit (binding point) the image attaches to.
    pub unit: u32,
    /// Sampled or storage access.
    pub usage: ImageUse,
    /// Format the image was allocated with.
    pub format: PixelFormat,
    pub(crate) view: wgpu::TextureView,
}

/// One device image of `width × height` pixels in a fixed [`PixelFormat`].
#[derive(Debug)]
pub struct DeviceImage {
    raw: Option<(wgpu::Texture, wgpu::TextureView)>,
    width: u32,
    height: u32,
    format: PixelFormat,
    label: String,
}

impl DeviceImage {
    /// Image description; no device memory until [`init`](Self::init).
    pub fn new(label: &str, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            raw: None,
            width,
            height,
            format,
            label: label.to_owned(),
        }
    }

    /// Allocate storage for `width × height` pixels. Does nothing on an
    /// initialized image.
    pub fn init(&mut self, context: &RenderContext) {
        if self.raw.is_some() {
            log::debug!("{}: init() on a live image ignored", self.label);
            return;
        }
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&self.label),
            size: self.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format.texture_format(),
            usage: self.format.usage(),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.raw = Some((texture, view));
    }

    /// Attach for sampling at texture unit `unit`.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Uninitialized`] without an allocation.
    pub fn bind_sample(&self, unit: u32) -> Result<ImageBinding, ResourceError> {
        self.binding(unit, ImageUse::Sampled)
    }

    /// Attach for random access by a compute kernel at image unit `unit`.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Uninitialized`] without an allocation.
    pub fn bind_image(
        &self,
        unit: u32,
        access: Access,
    ) -> Result<ImageBinding, ResourceError> {
        self.binding(unit, ImageUse::Storage(access))
    }

    /// Replace the pixel contents with `values`, a flattened row-major
    /// buffer of `width × height × channels` elements.
    ///
    /// # Errors
    ///
    /// [`ResourceError::FormatMismatch`] when `T` is not the image's channel
    /// type, [`ResourceError::LengthMismatch`] on a wrong element count,
    /// [`ResourceError::Uninitialized`] without an allocation.
    pub fn upload<T: Texel>(
        &self,
        context: &RenderContext,
        values: &[T],
    ) -> Result<(), ResourceError> {
        let (texture, _) = self.raw()?;
        self.check_transfer::<T>(values.len())?;
        if self.element_count() == 0 {
            return Ok(());
        }
        context.queue.write_texture(
            texture.as_image_copy(),
            bytemuck::cast_slice(values),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.row_bytes()),
                rows_per_image: Some(self.height),
            },
            self.extent(),
        );
        Ok(())
    }

    /// Read the pixels back as a flattened row-major buffer.
    ///
    /// # Errors
    ///
    /// Same conditions as [`upload`](Self::upload), plus map/poll failures.
    pub fn download<T: Texel>(
        &self,
        context: &RenderContext,
    ) -> Result<Vec<T>, ResourceError> {
        let (texture, _) = self.raw()?;
        self.check_transfer::<T>(self.element_count())?;
        if self.element_count() == 0 {
            return Ok(Vec::new());
        }

        let row_bytes = self.row_bytes();
        let padded_row = padded_row_bytes(row_bytes);
        let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Image Readback Staging"),
            size: u64::from(padded_row) * u64::from(self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = context.create_encoder("Image Readback Encoder");
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            self.extent(),
        );
        let _ = context.submit(encoder);

        read_mapped(context, &staging, |bytes| {
            let mut out = Vec::with_capacity(self.element_count());
            for row in bytes.chunks_exact(padded_row as usize) {
                out.extend_from_slice(bytemuck::cast_slice::<u8, T>(
                    &row[..row_bytes as usize],
                ));
            }
            out
        })
    }

    /// Free the device allocation. A second call is a no-op.
    pub fn release(&mut self) {
        if let Some((texture, _)) = self.raw.take() {
            texture.destroy();
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format fixed at construction.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// `width × height × channels`.
    pub fn element_count(&self) -> usize {
        self.width as usize * self.height as usize * self.format.layout.channels()
    }

    /// `true` between `init` and `release`.
    pub fn is_initialized(&self) -> bool {
        self.raw.is_some()
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Default full-image view, for use as a render attachment.
    pub(crate) fn view(&self) -> Result<&wgpu::TextureView, ResourceError> {
        self.raw().map(|(_, view)| view)
    }

    fn binding(&self, unit: u32, usage: ImageUse) -> Result<ImageBinding, ResourceError> {
        Ok(ImageBinding {
            unit,
            usage,
            format: self.format,
            view: self.view()?.clone(),
        })
    }

    fn check_transfer<T: Texel>(&self, len: usize) -> Result<(), ResourceError> {
        if T::CHANNEL != self.format.channel {
            return Err(ResourceError::FormatMismatch {
                label: self.label.clone(),
                expected: self.format.channel.name(),
                actual: T::CHANNEL.name(),
            });
        }
        if len != self.element_count() {
            return Err(ResourceError::LengthMismatch {
                label: self.label.clone(),
                expected: self.element_count(),
                actual: len,
            });
        }
        Ok(())
    }

    fn row_bytes(&self) -> u32 {
        self.width * self.format.pixel_size() as u32
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    fn raw(&self) -> Result<&(wgpu::Texture, wgpu::TextureView), ResourceError> {
        self.raw.as_ref().ok_or_else(|| ResourceError::Uninitialized {
            label: self.label.clone(),
        })
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        self.release();
    }
}

/// Texture-to-buffer copies need rows padded to 256 bytes.
fn padded_row_bytes(row_bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    row_bytes.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_triple_maps_to_internal_format() {
        assert_eq!(
            PixelFormat::RGBA32F.texture_format(),
            wgpu::TextureFormat::Rgba32Float
        );
        assert_eq!(
            PixelFormat::new(ChannelLayout::Rg, ChannelType::U32).texture_format(),
            wgpu::TextureFormat::Rg32Uint
        );
        assert_eq!(PixelFormat::RGBA8.pixel_size(), 4);
        assert_eq!(PixelFormat::RGBA32F.pixel_size(), 16);
    }

    #[test]
    fn narrow_unorm_formats_skip_storage_usage() {
        let r8 = PixelFormat::new(ChannelLayout::R, ChannelType::U8Norm);
        assert!(!r8.supports_storage());
        assert!(!r8.usage().contains(wgpu::TextureUsages::STORAGE_BINDING));
        assert!(PixelFormat::R32F
            .usage()
            .contains(wgpu::TextureUsages::STORAGE_BINDING));
    }

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_row_bytes(4), 256);
        assert_eq!(padded_row_bytes(256), 256);
        assert_eq!(padded_row_bytes(128 * 16), 2048);
        assert_eq!(padded_row_bytes(300), 512);
    }

    #[test]
    fn transfer_checks_channel_type_before_length() {
        let image = DeviceImage::new("field", 4, 2, PixelFormat::RGBA32F);
        assert_eq!(image.element_count(), 32);
        assert!(image.check_transfer::<f32>(32).is_ok());
        assert!(matches!(
            image.check_transfer::<u8>(32),
            Err(ResourceError::FormatMismatch { .. })
        ));
        assert!(matches!(
            image.check_transfer::<f32>(31),
            Err(ResourceError::LengthMismatch { expected: 32, actual: 31, .. })
        ));
    }
}
