//! Error types for the network engine
//!
//! Errors fall into three families: configuration errors raised while a network
//! is built from its description, resource errors from the accelerator path, and
//! precondition errors from the compute kernels and layer data buffers.

use thiserror::Error;

/// Failures raised by the compute kernel library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// A caller-supplied buffer is shorter than the dimensions require.
    #[error("{op}: buffer '{buffer}' holds {len} elements but {required} are required")]
    BufferTooSmall {
        op: &'static str,
        buffer: &'static str,
        len: usize,
        required: usize,
    },

    /// The requested geometry cannot produce any output.
    #[error("{op}: invalid geometry: {reason}")]
    InvalidGeometry { op: &'static str, reason: String },
}

impl KernelError {
    pub(crate) fn geometry(op: &'static str, reason: impl Into<String>) -> Self {
        KernelError::InvalidGeometry {
            op,
            reason: reason.into(),
        }
    }
}

/// Failures raised by a compute context or one of its device buffers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The backend does not provide a kernel the program needs.
    #[error("program build failed on backend '{backend}': missing kernel '{kernel}'")]
    ProgramBuild { backend: String, kernel: &'static str },

    /// A buffer handle that was never allocated, or was already released.
    #[error("unknown device buffer {0}")]
    UnknownBuffer(u64),

    /// A transfer reaching past the end of a device buffer.
    #[error("transfer of {len} elements at offset {offset} exceeds device buffer of {capacity}")]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// An accelerator operation was requested on host-only layer data.
    #[error("layer data is not mirrored on a device")]
    NotMirrored,

    /// A kernel launch failed.
    #[error("kernel '{kernel}' failed: {reason}")]
    Launch { kernel: &'static str, reason: String },

    /// The device memory arena was poisoned by a panicking thread.
    #[error("device memory is poisoned")]
    Poisoned,
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Malformed or inconsistent network description.
    #[error("configuration error in {region}: {message}")]
    Config { region: String, message: String },

    /// A buffer does not have the size a layer expects.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    Shape {
        context: String,
        expected: usize,
        found: usize,
    },

    /// A logical batch size above the allocated capacity.
    #[error("batch size {requested} exceeds allocated capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Coefficients that do not fit the layer they are imported into.
    #[error("coefficient import rejected for {layer}: {message}")]
    Coefficients { layer: String, message: String },

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    pub(crate) fn config(region: impl Into<String>, message: impl Into<String>) -> Self {
        NetworkError::Config {
            region: region.into(),
            message: message.into(),
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: usize, found: usize) -> Self {
        NetworkError::Shape {
            context: context.into(),
            expected,
            found,
        }
    }

    pub(crate) fn coefficients(layer: impl Into<String>, message: impl Into<String>) -> Self {
        NetworkError::Coefficients {
            layer: layer.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
