//! Errors raised by device resources (buffers and images) and by
//! attaching them to program slots.

use std::fmt;

/// Errors produced by [`DeviceBuffer`](super::buffer::DeviceBuffer) and
/// [`DeviceImage`](super::image::DeviceImage) transfers.
#[derive(Debug)]
pub enum ResourceError {
    /// The resource has no device allocation (never initialized, or
    /// released).
    Uninitialized {
        /// Debug label of the resource.
        label: String,
    },
    /// Host data length differs from the resource's element count.
    LengthMismatch {
        /// Debug label of the resource.
        label: String,
        /// Element count the resource was constructed with.
        expected: usize,
        /// Element count of the supplied data.
        actual: usize,
    },
    /// Host channel type differs from the image's declared channel type.
    FormatMismatch {
        /// Debug label of the resource.
        label: String,
        /// Declared channel type of the image.
        expected: &'static str,
        /// Channel type of the supplied data.
        actual: &'static str,
    },
    /// The program has no slot by that name or index.
    UnknownSlot {
        /// Program label.
        program: String,
        /// Requested name, or `#index`.
        name: String,
    },
    /// The slot is declared as a different kind of resource.
    SlotMismatch {
        /// Program label.
        program: String,
        /// Slot name.
        slot: String,
        /// What was offered.
        offered: String,
    },
    /// Another slot of the program already uses the binding point.
    BindingConflict {
        /// Program label.
        program: String,
        /// Slot being moved.
        slot: String,
        /// Requested binding point.
        point: u32,
        /// Slot currently at that point.
        holder: String,
    },
    /// Mapping a readback buffer failed.
    Map(wgpu::BufferAsyncError),
    /// Waiting on the device failed.
    Poll(wgpu::PollError),
    /// The map callback was dropped before it reported.
    ReadbackLost,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized { label } => {
                write!(f, "'{label}' used before init() or after release()")
            }
            Self::LengthMismatch {
                label,
                expected,
                actual,
            } => write!(
                f,
                "'{label}' holds {expected} values, got {actual}"
            ),
            Self::FormatMismatch {
                label,
                expected,
                actual,
            } => write!(
                f,
                "'{label}' stores {expected} channels, got {actual} data"
            ),
            Self::UnknownSlot { program, name } => {
                write!(f, "{program}: no resource slot '{name}'")
            }
            Self::SlotMismatch {
                program,
                slot,
                offered,
            } => write!(f, "{program}: '{slot}' cannot take a {offered}"),
            Self::BindingConflict {
                program,
                slot,
                point,
                holder,
            } => write!(
                f,
                "{program}: cannot move '{slot}' to binding {point}, held by '{holder}'"
            ),
            Self::Map(e) => write!(f, "buffer map failed: {e}"),
            Self::Poll(e) => write!(f, "device poll failed: {e}"),
            Self::ReadbackLost => write!(f, "readback callback never fired"),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Map(e) => Some(e),
            Self::Poll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::BufferAsyncError> for ResourceError {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        Self::Map(e)
    }
}

impl From<wgpu::PollError> for ResourceError {
    fn from(e: wgpu::PollError) -> Self {
        Self::Poll(e)
    }
}
