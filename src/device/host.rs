//! Reference backend keeping "device" memory in a separate host-side arena.
//!
//! Buffers live in their own map, never aliased with layer data storage, so
//! every transfer is a real copy and a missing sync shows up as stale data
//! exactly as it would on a discrete accelerator. Kernels run synchronously
//! through [`crate::kernels::batch`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Backend, BufferHandle, KernelLaunch, REQUIRED_KERNELS};
use crate::error::{DeviceError, KernelError};
use crate::kernels::batch;

type Arena = HashMap<u64, Vec<f32>>;

#[derive(Debug, Default)]
pub struct HostBackend {
    memory: Mutex<Arena>,
    next_handle: AtomicU64,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations.
    pub fn live_buffers(&self) -> usize {
        self.memory.lock().map(|memory| memory.len()).unwrap_or(0)
    }

    fn memory(&self) -> Result<MutexGuard<'_, Arena>, DeviceError> {
        self.memory.lock().map_err(|_| DeviceError::Poisoned)
    }
}

fn lookup(memory: &Arena, handle: BufferHandle) -> Result<&[f32], DeviceError> {
    memory
        .get(&handle.0)
        .map(Vec::as_slice)
        .ok_or(DeviceError::UnknownBuffer(handle.0))
}

fn launch_error(kernel: &'static str) -> impl Fn(KernelError) -> DeviceError {
    move |err| DeviceError::Launch {
        kernel,
        reason: err.to_string(),
    }
}

/// Detaches the output buffers from the arena, runs `run` with the remaining
/// buffers readable, then puts the outputs back whatever the outcome.
fn with_outputs<const N: usize>(
    memory: &mut Arena,
    outputs: [BufferHandle; N],
    run: impl FnOnce(&Arena, &mut [Vec<f32>]) -> Result<(), DeviceError>,
) -> Result<(), DeviceError> {
    let mut taken: Vec<Vec<f32>> = Vec::with_capacity(N);
    for (i, handle) in outputs.iter().enumerate() {
        match memory.remove(&handle.0) {
            Some(buffer) => taken.push(buffer),
            None => {
                for (restored, buffer) in outputs[..i].iter().zip(taken) {
                    memory.insert(restored.0, buffer);
                }
                return Err(DeviceError::UnknownBuffer(handle.0));
            }
        }
    }

    let result = run(memory, &mut taken);
    for (handle, buffer) in outputs.iter().zip(taken) {
        memory.insert(handle.0, buffer);
    }
    result
}

impl Backend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn supported_kernels(&self) -> Vec<&'static str> {
        REQUIRED_KERNELS.to_vec()
    }

    fn allocate(&self, len: usize) -> Result<BufferHandle, DeviceError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.memory()?.insert(id, vec![0.0; len]);
        Ok(BufferHandle(id))
    }

    fn release(&self, handle: BufferHandle) -> Result<(), DeviceError> {
        self.memory()?
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(DeviceError::UnknownBuffer(handle.0))
    }

    fn write(&self, handle: BufferHandle, offset: usize, data: &[f32]) -> Result<(), DeviceError> {
        let mut memory = self.memory()?;
        let buffer = memory
            .get_mut(&handle.0)
            .ok_or(DeviceError::UnknownBuffer(handle.0))?;
        if offset + data.len() > buffer.len() {
            return Err(DeviceError::OutOfRange {
                offset,
                len: data.len(),
                capacity: buffer.len(),
            });
        }
        buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: BufferHandle, offset: usize, out: &mut [f32]) -> Result<(), DeviceError> {
        let memory = self.memory()?;
        let buffer = lookup(&memory, handle)?;
        if offset + out.len() > buffer.len() {
            return Err(DeviceError::OutOfRange {
                offset,
                len: out.len(),
                capacity: buffer.len(),
            });
        }
        out.copy_from_slice(&buffer[offset..offset + out.len()]);
        Ok(())
    }

    fn launch(&self, launch: &KernelLaunch) -> Result<(), DeviceError> {
        let kernel = launch.kernel_name();
        let mut memory = self.memory()?;
        match launch {
            KernelLaunch::DenseForward {
                weights,
                biases,
                input,
                inter,
                output,
                geometry,
                activation,
            } => with_outputs(&mut memory, [*inter, *output], |memory, outs| {
                let (inter, output) = outs.split_at_mut(1);
                batch::dense_forward(
                    lookup(memory, *weights)?,
                    lookup(memory, *biases)?,
                    lookup(memory, *input)?,
                    geometry,
                    *activation,
                    &mut inter[0],
                    &mut output[0],
                )
                .map_err(launch_error(kernel))
            }),
            KernelLaunch::ConvolutionForward {
                weights,
                biases,
                input,
                inter,
                output,
                geometry,
                activation,
            } => with_outputs(&mut memory, [*inter, *output], |memory, outs| {
                let (inter, output) = outs.split_at_mut(1);
                batch::convolution_forward(
                    lookup(memory, *weights)?,
                    lookup(memory, *biases)?,
                    lookup(memory, *input)?,
                    geometry,
                    *activation,
                    &mut inter[0],
                    &mut output[0],
                )
                .map_err(launch_error(kernel))
            }),
            KernelLaunch::MaxPoolForward {
                input,
                output,
                geometry,
                maps,
                batch: count,
            } => with_outputs(&mut memory, [*output], |memory, outs| {
                batch::max_pool_forward(lookup(memory, *input)?, geometry, *maps, *count, &mut outs[0])
                    .map_err(launch_error(kernel))
            }),
            KernelLaunch::NormalizeForward {
                input,
                output,
                width,
                height,
                maps,
                batch: count,
                params,
            } => with_outputs(&mut memory, [*output], |memory, outs| {
                batch::normalize_forward(
                    lookup(memory, *input)?,
                    *width,
                    *height,
                    *maps,
                    *count,
                    params,
                    &mut outs[0],
                )
                .map_err(launch_error(kernel))
            }),
        }
    }

    fn finish(&self) -> Result<(), DeviceError> {
        // Launches and transfers complete before they return.
        Ok(())
    }
}
