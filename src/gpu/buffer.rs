//! Structured device buffers holding `f32` scalars.
//!
//! A [`DeviceBuffer`] has a fixed logical element count chosen at
//! construction. Its device allocation is created by [`DeviceBuffer::init`]
//! and freed by [`DeviceBuffer::release`] or on drop; a different element
//! count means a new buffer.

use std::sync::mpsc;

use super::error::ResourceError;
use super::render_context::RenderContext;

/// Scalar type stored in a [`DeviceBuffer`].
pub type Scalar = f32;

/// Device allocations are never smaller than this, so an empty population
/// still has a valid binding.
const MIN_ALLOCATION: u64 = 16;

/// Family of binding point a buffer attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read/write structured storage (`buffer` blocks).
    Storage,
    /// Read-only uniform data (`uniform` blocks).
    Uniform,
}

impl BufferKind {
    fn usage(self) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        match self {
            Self::Storage => base | wgpu::BufferUsages::STORAGE,
            Self::Uniform => base | wgpu::BufferUsages::UNIFORM,
        }
    }
}

/// A buffer attached to a numbered binding point, ready to be placed in a
/// bind group. Produced by [`DeviceBuffer::bind`].
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// Binding point the buffer attaches to.
    pub point: u32,
    /// Binding family of the buffer.
    pub kind: BufferKind,
    pub(crate) buffer: wgpu::Buffer,
}

/// One device allocation of `len` scalars.
///
/// Not `Clone`: the allocation is exclusively owned, and moving the value
/// moves ownership. Dropping it releases the allocation exactly once.
#[derive(Debug)]
pub struct DeviceBuffer {
    raw: Option<wgpu::Buffer>,
    len: usize,
    kind: BufferKind,
    label: String,
}

impl DeviceBuffer {
    /// Buffer of `len` scalars; no device memory until [`init`](Self::init).
    pub fn new(label: &str, len: usize, kind: BufferKind) -> Self {
        Self {
            raw: None,
            len,
            kind,
            label: label.to_owned(),
        }
    }

    /// Allocate device memory sized to the element count. Contents are
    /// undefined until the first [`upload`](Self::upload).
    ///
    /// Calling this on an initialized buffer does nothing.
    pub fn init(&mut self, context: &RenderContext) {
        if self.raw.is_some() {
            log::debug!("{}: init() on a live buffer ignored", self.label);
            return;
        }
        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&self.label),
            size: self.byte_len().max(MIN_ALLOCATION),
            usage: self.kind.usage(),
            mapped_at_creation: false,
        });
        self.raw = Some(buffer);
    }

    /// Write exactly `len()` scalars into device memory.
    ///
    /// # Errors
    ///
    /// [`ResourceError::LengthMismatch`] if `data.len() != self.len()`
    /// (nothing is written), [`ResourceError::Uninitialized`] if there is
    /// no allocation.
    pub fn upload(
        &self,
        context: &RenderContext,
        data: &[Scalar],
    ) -> Result<(), ResourceError> {
        let raw = self.raw()?;
        if data.len() != self.len {
            return Err(ResourceError::LengthMismatch {
                label: self.label.clone(),
                expected: self.len,
                actual: data.len(),
            });
        }
        if !data.is_empty() {
            context
                .queue
                .write_buffer(raw, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    /// Read the buffer back into a fresh vector of `len()` scalars.
    ///
    /// Blocks until all previously submitted work touching the buffer has
    /// finished.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Uninitialized`] without an allocation; map/poll
    /// failures from the device.
    pub fn download(
        &self,
        context: &RenderContext,
    ) -> Result<Vec<Scalar>, ResourceError> {
        let raw = self.raw()?;
        if self.len == 0 {
            return Ok(Vec::new());
        }
        let size = self.byte_len();
        let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = context.create_encoder("Buffer Readback Encoder");
        encoder.copy_buffer_to_buffer(raw, 0, &staging, 0, size);
        let _ = context.submit(encoder);

        read_mapped(context, &staging, |bytes| {
            bytemuck::cast_slice::<u8, Scalar>(bytes).to_vec()
        })
    }

    /// Attach the buffer to binding point `point` for the next dispatch or
    /// draw. Contents are not touched.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Uninitialized`] without an allocation.
    pub fn bind(&self, point: u32) -> Result<BufferBinding, ResourceError> {
        Ok(BufferBinding {
            point,
            kind: self.kind,
            buffer: self.raw()?.clone(),
        })
    }

    /// Free the device allocation. A second call is a no-op.
    pub fn release(&mut self) {
        if let Some(buffer) = self.raw.take() {
            buffer.destroy();
        }
    }

    /// Logical element count (scalars, not bytes).
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the buffer holds no scalars.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the logical contents in bytes.
    pub fn byte_len(&self) -> u64 {
        (self.len * size_of::<Scalar>()) as u64
    }

    /// `true` between `init` and `release`.
    pub fn is_initialized(&self) -> bool {
        self.raw.is_some()
    }

    /// Binding family of this buffer.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn raw(&self) -> Result<&wgpu::Buffer, ResourceError> {
        self.raw.as_ref().ok_or_else(|| ResourceError::Uninitialized {
            label: self.label.clone(),
        })
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Map a `MAP_READ` buffer, wait for the device, and hand the mapped bytes
/// to `read`. The mapped range is aligned for any scalar type.
pub(crate) fn read_mapped<R>(
    context: &RenderContext,
    staging: &wgpu::Buffer,
    read: impl FnOnce(&[u8]) -> R,
) -> Result<R, ResourceError> {
    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = context.device.poll(wgpu::PollType::Wait)?;
    rx.recv().map_err(|_| ResourceError::ReadbackLost)??;

    let result = {
        let mapped = slice.get_mapped_range();
        read(&mapped)
    };
    staging.unmap();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_has_no_allocation() {
        let buffer = DeviceBuffer::new("particles", 600, BufferKind::Storage);
        assert!(!buffer.is_initialized());
        assert_eq!(buffer.len(), 600);
        assert_eq!(buffer.byte_len(), 2400);
        assert!(matches!(
            buffer.bind(0),
            Err(ResourceError::Uninitialized { .. })
        ));
    }

    #[test]
    fn release_without_init_is_noop() {
        let mut buffer = DeviceBuffer::new("empty", 0, BufferKind::Storage);
        buffer.release();
        buffer.release();
        assert!(buffer.is_empty());
        assert!(!buffer.is_initialized());
    }

    #[test]
    fn storage_usage_allows_copies_both_ways() {
        let usage = BufferKind::Storage.usage();
        assert!(usage.contains(wgpu::BufferUsages::STORAGE));
        assert!(usage.contains(wgpu::BufferUsages::COPY_SRC));
        assert!(usage.contains(wgpu::BufferUsages::COPY_DST));
        assert!(!usage.contains(wgpu::BufferUsages::UNIFORM));
    }
}
