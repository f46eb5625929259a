//! Accelerator execution model
//!
//! A [`ComputeContext`] wraps one [`Backend`] and is shared explicitly as an
//! `Arc` by every layer and layer data buffer that runs on the accelerator.
//! Building a context checks that the backend provides every kernel the layers
//! dispatch, so a missing kernel fails network construction rather than the
//! first forward pass.
//!
//! Device memory is reached only through [`DeviceBuffer`], which hands its
//! allocation back to the backend when dropped. Every dispatch blocks until the
//! backend reports completion.

pub mod host;
mod kernel;

pub use host::HostBackend;
pub use kernel::{KernelLaunch, REQUIRED_KERNELS};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

use crate::error::DeviceError;

/// Opaque identifier of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    /// Wraps a backend-chosen allocation id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A device able to hold `f32` buffers and run the forward kernels.
///
/// Implementations must be usable from any thread; all methods take `&self`.
pub trait Backend: Send + Sync + fmt::Debug + 'static {
    /// Human-readable backend name, used in logs and errors.
    fn name(&self) -> &str;

    /// Names of the kernels this backend can launch.
    fn supported_kernels(&self) -> Vec<&'static str>;

    /// Allocates a zero-filled buffer of `len` elements.
    fn allocate(&self, len: usize) -> Result<BufferHandle, DeviceError>;

    /// Releases a buffer. Releasing an unknown handle is an error.
    fn release(&self, handle: BufferHandle) -> Result<(), DeviceError>;

    /// Copies `data` into the buffer starting at `offset`.
    fn write(&self, handle: BufferHandle, offset: usize, data: &[f32]) -> Result<(), DeviceError>;

    /// Copies `out.len()` elements starting at `offset` out of the buffer.
    fn read(&self, handle: BufferHandle, offset: usize, out: &mut [f32]) -> Result<(), DeviceError>;

    /// Submits one kernel.
    fn launch(&self, launch: &KernelLaunch) -> Result<(), DeviceError>;

    /// Blocks until every submitted kernel and transfer has completed.
    fn finish(&self) -> Result<(), DeviceError>;
}

/// Process-wide accelerator state: one backend with a verified kernel set.
#[derive(Debug)]
pub struct ComputeContext {
    backend: Box<dyn Backend>,
    launches: AtomicUsize,
}

impl ComputeContext {
    /// Builds a context over `backend`, failing with
    /// [`DeviceError::ProgramBuild`] if any required kernel is missing.
    pub fn new(backend: impl Backend) -> Result<Arc<Self>, DeviceError> {
        let supported = backend.supported_kernels();
        if let Some(missing) = REQUIRED_KERNELS
            .iter()
            .find(|kernel| !supported.contains(*kernel))
        {
            return Err(DeviceError::ProgramBuild {
                backend: backend.name().to_string(),
                kernel: *missing,
            });
        }
        debug!(
            "compute context ready on '{}' ({} kernels)",
            backend.name(),
            supported.len()
        );
        Ok(Arc::new(Self {
            backend: Box::new(backend),
            launches: AtomicUsize::new(0),
        }))
    }

    /// Context over the reference [`HostBackend`].
    pub fn host() -> Result<Arc<Self>, DeviceError> {
        Self::new(HostBackend::new())
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Number of kernels dispatched through this context so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::Relaxed)
    }

    /// Allocates a zero-filled device buffer owned by the returned value.
    pub fn allocate(self: &Arc<Self>, len: usize) -> Result<DeviceBuffer, DeviceError> {
        let handle = self.backend.allocate(len)?;
        Ok(DeviceBuffer {
            context: Arc::clone(self),
            handle,
            len,
        })
    }

    /// Launches `launch` and waits for it to complete.
    pub fn dispatch(&self, launch: &KernelLaunch) -> Result<(), DeviceError> {
        self.backend.launch(launch)?;
        self.backend.finish()?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A device allocation tied to the context that made it.
#[derive(Debug)]
pub struct DeviceBuffer {
    context: Arc<ComputeContext>,
    handle: BufferHandle,
    len: usize,
}

impl DeviceBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.context
    }

    /// Uploads `data` to the start of the buffer and waits for the transfer.
    pub fn write(&self, data: &[f32]) -> Result<(), DeviceError> {
        self.check_range(data.len())?;
        self.context.backend.write(self.handle, 0, data)?;
        self.context.backend.finish()
    }

    /// Downloads the first `out.len()` elements and waits for the transfer.
    pub fn read(&self, out: &mut [f32]) -> Result<(), DeviceError> {
        self.check_range(out.len())?;
        self.context.backend.read(self.handle, 0, out)?;
        self.context.backend.finish()
    }

    fn check_range(&self, len: usize) -> Result<(), DeviceError> {
        if len > self.len {
            return Err(DeviceError::OutOfRange {
                offset: 0,
                len,
                capacity: self.len,
            });
        }
        Ok(())
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.context.backend.release(self.handle) {
            log::warn!("failed to release device buffer {}: {}", self.handle.0, err);
        }
    }
}
