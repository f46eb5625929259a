//! Per-layer tensor storage for a mini-batch.
//!
//! A [`LayerData`] holds three batch-shaped slots laid out as one contiguous
//! `slot × example × feature` block (activation, pre-activation and error)
//! plus two parameter-shaped slots (weight and bias). The parameter slots are
//! only populated on accelerator-mirrored data, where they stage a layer's
//! parameters for kernel dispatch.
//!
//! Mirrored data keeps a device copy of every slot. The host copy is the
//! source of truth: the two are reconciled only through
//! [`LayerData::sync_to_device`] and [`LayerData::sync_from_device`].

use std::sync::Arc;

use crate::device::{BufferHandle, ComputeContext, DeviceBuffer};
use crate::error::{DeviceError, NetworkError, Result};
use crate::utils::Activation;

/// Named tensor slots of a [`LayerData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Activation,
    InterValue,
    Weight,
    Bias,
    Error,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::Activation,
        Slot::InterValue,
        Slot::Weight,
        Slot::Bias,
        Slot::Error,
    ];

    /// Position of a batch-shaped slot inside the contiguous block.
    fn batch_index(self) -> Option<usize> {
        match self {
            Slot::Activation => Some(0),
            Slot::InterValue => Some(1),
            Slot::Error => Some(2),
            Slot::Weight | Slot::Bias => None,
        }
    }

    fn parameter_index(self) -> Option<usize> {
        match self {
            Slot::Weight => Some(0),
            Slot::Bias => Some(1),
            _ => None,
        }
    }

    fn mirror_index(self) -> usize {
        match self {
            Slot::Activation => 0,
            Slot::InterValue => 1,
            Slot::Error => 2,
            Slot::Weight => 3,
            Slot::Bias => 4,
        }
    }
}

const BATCH_SLOTS: usize = 3;

#[derive(Debug)]
struct DeviceMirror {
    context: Arc<ComputeContext>,
    // Indexed by `Slot::mirror_index`.
    buffers: Vec<DeviceBuffer>,
}

/// Mutable views of the three batch-shaped slots at once.
pub struct SlotsMut<'a> {
    pub activation: &'a mut [f32],
    pub inter: &'a mut [f32],
    pub error: &'a mut [f32],
}

#[derive(Debug, Default)]
pub struct LayerData {
    feature_count: usize,
    capacity: usize,
    batch_size: usize,
    activation: Activation,
    storage: Vec<f32>,
    parameters: [Vec<f32>; 2],
    mirror: Option<DeviceMirror>,
}

impl LayerData {
    /// Create host-only data with every slot zeroed.
    ///
    /// # Arguments
    ///
    /// * `feature_count` - Features per example in each batch slot
    /// * `batch_size` - Examples to allocate; also the initial capacity
    /// * `activation` - Activation of the layer that writes this data
    ///
    /// # Returns
    ///
    /// Data without parameter slots or device mirror
    pub fn new(feature_count: usize, batch_size: usize, activation: Activation) -> Self {
        Self {
            feature_count,
            capacity: batch_size,
            batch_size,
            activation,
            storage: vec![0.0; BATCH_SLOTS * batch_size * feature_count],
            parameters: [Vec::new(), Vec::new()],
            mirror: None,
        }
    }

    /// Create data mirrored on `context`.
    ///
    /// Every slot gets a device buffer of the same length as its host copy.
    ///
    /// # Arguments
    ///
    /// * `context` - Compute context owning the device buffers
    /// * `feature_count` - Features per example in each batch slot
    /// * `batch_size` - Examples to allocate
    /// * `activation` - Activation of the layer that writes this data
    /// * `weight_len` - Length of the weight staging slot
    /// * `bias_len` - Length of the bias staging slot
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Device`] if a device buffer cannot be allocated.
    pub fn mirrored(
        context: &Arc<ComputeContext>,
        feature_count: usize,
        batch_size: usize,
        activation: Activation,
        weight_len: usize,
        bias_len: usize,
    ) -> Result<Self> {
        let mut data = Self::new(feature_count, batch_size, activation);
        data.parameters = [vec![0.0; weight_len], vec![0.0; bias_len]];
        data.mirror = Some(data.allocate_mirror(context)?);
        Ok(data)
    }

    fn allocate_mirror(&self, context: &Arc<ComputeContext>) -> Result<DeviceMirror> {
        let block = self.capacity * self.feature_count;
        let lens = [
            block,
            block,
            block,
            self.parameters[0].len(),
            self.parameters[1].len(),
        ];
        let buffers = lens
            .iter()
            .map(|&len| context.allocate(len))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(DeviceMirror {
            context: Arc::clone(context),
            buffers,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Activation of the layer that produced this data.
    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror.is_some()
    }

    pub fn context(&self) -> Option<&Arc<ComputeContext>> {
        self.mirror.as_ref().map(|mirror| &mirror.context)
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty() && self.parameters.iter().all(Vec::is_empty)
    }

    /// Sets the logical batch size, growing capacity when needed.
    ///
    /// Existing examples keep their values in every slot. Capacity never
    /// shrinks. Mirrored data reallocates its device copies on growth and
    /// re-uploads the host contents.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - New logical batch size
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Device`] if reallocating or re-uploading the
    /// mirror fails.
    pub fn resize(&mut self, batch_size: usize) -> Result<()> {
        if batch_size > self.capacity {
            let old_block = self.capacity * self.feature_count;
            let new_block = batch_size * self.feature_count;
            let mut storage = vec![0.0; BATCH_SLOTS * new_block];
            for s in 0..BATCH_SLOTS {
                storage[s * new_block..s * new_block + old_block]
                    .copy_from_slice(&self.storage[s * old_block..(s + 1) * old_block]);
            }
            self.storage = storage;
            self.capacity = batch_size;

            if let Some(context) = self.context().cloned() {
                // Old buffers are released when the previous mirror drops.
                self.mirror = Some(self.allocate_mirror(&context)?);
                self.batch_size = batch_size;
                for slot in Slot::ALL {
                    self.sync_to_device(slot)?;
                }
            }
        }
        self.batch_size = batch_size;
        Ok(())
    }

    /// Sets the logical batch size within the allocated capacity.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::CapacityExceeded`] when `batch_size` is larger
    /// than the capacity; use [`LayerData::resize`] to grow instead.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        if batch_size > self.capacity {
            return Err(NetworkError::CapacityExceeded {
                requested: batch_size,
                capacity: self.capacity,
            });
        }
        self.batch_size = batch_size;
        Ok(())
    }

    fn block_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = index * self.capacity * self.feature_count;
        start..start + self.batch_size * self.feature_count
    }

    /// The first `batch_size` examples of a batch slot, or a whole parameter slot.
    pub fn slot(&self, slot: Slot) -> &[f32] {
        match (slot.batch_index(), slot.parameter_index()) {
            (Some(index), _) => &self.storage[self.block_range(index)],
            (None, Some(index)) => &self.parameters[index],
            (None, None) => &[],
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut [f32] {
        match (slot.batch_index(), slot.parameter_index()) {
            (Some(index), _) => {
                let range = self.block_range(index);
                &mut self.storage[range]
            }
            (None, Some(index)) => &mut self.parameters[index],
            (None, None) => &mut [],
        }
    }

    /// Features of one example in a batch slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the logical batch size.
    pub fn example(&self, slot: Slot, index: usize) -> &[f32] {
        let features = self.feature_count;
        &self.slot(slot)[index * features..(index + 1) * features]
    }

    pub fn example_mut(&mut self, slot: Slot, index: usize) -> &mut [f32] {
        let features = self.feature_count;
        &mut self.slot_mut(slot)[index * features..(index + 1) * features]
    }

    /// Disjoint mutable views of activation, pre-activation and error.
    pub fn split_mut(&mut self) -> SlotsMut<'_> {
        let block = self.capacity * self.feature_count;
        let used = self.batch_size * self.feature_count;
        let (activation, rest) = self.storage.split_at_mut(block);
        let (inter, error) = rest.split_at_mut(block);
        SlotsMut {
            activation: &mut activation[..used],
            inter: &mut inter[..used],
            error: &mut error[..used],
        }
    }

    pub fn fill(&mut self, slot: Slot, value: f32) {
        self.slot_mut(slot).fill(value);
    }

    /// Copies `weights` and `biases` into the parameter slots and uploads them.
    ///
    /// # Arguments
    ///
    /// * `weights` - Layer weights, as long as the weight slot
    /// * `biases` - Layer biases, as long as the bias slot
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotMirrored`] on host-only data and
    /// [`NetworkError::Shape`] when a length does not match its slot.
    pub fn stage_parameters(&mut self, weights: &[f32], biases: &[f32]) -> Result<()> {
        if self.mirror.is_none() {
            return Err(DeviceError::NotMirrored.into());
        }
        for (slot, values) in [(Slot::Weight, weights), (Slot::Bias, biases)] {
            let target = self.slot_mut(slot);
            if target.len() != values.len() {
                return Err(NetworkError::shape(
                    format!("{:?} staging slot", slot),
                    target.len(),
                    values.len(),
                ));
            }
            target.copy_from_slice(values);
            self.sync_to_device(slot)?;
        }
        Ok(())
    }

    fn device_buffer(&self, slot: Slot) -> std::result::Result<&DeviceBuffer, DeviceError> {
        let mirror = self.mirror.as_ref().ok_or(DeviceError::NotMirrored)?;
        mirror
            .buffers
            .get(slot.mirror_index())
            .ok_or(DeviceError::NotMirrored)
    }

    /// Handle of the device copy of `slot`.
    pub fn device_handle(&self, slot: Slot) -> std::result::Result<BufferHandle, DeviceError> {
        self.device_buffer(slot).map(DeviceBuffer::handle)
    }

    /// Uploads the host copy of `slot` to the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotMirrored`] on host-only data, or the
    /// backend's error if the write fails.
    pub fn sync_to_device(&self, slot: Slot) -> Result<()> {
        let buffer = self.device_buffer(slot)?;
        buffer.write(self.slot(slot))?;
        Ok(())
    }

    /// Downloads the device copy of `slot` over the host copy.
    ///
    /// Only the first `batch_size` examples of a batch slot are read back.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotMirrored`] on host-only data, or the
    /// backend's error if the read fails.
    pub fn sync_from_device(&mut self, slot: Slot) -> Result<()> {
        let mirror = self.mirror.take().ok_or(DeviceError::NotMirrored)?;
        let result = mirror.buffers[slot.mirror_index()].read(self.slot_mut(slot));
        self.mirror = Some(mirror);
        result.map_err(NetworkError::from)
    }

    /// Deep copy, including a fresh device mirror for mirrored data.
    pub fn duplicate(&self) -> Result<Self> {
        let mut copy = Self {
            feature_count: self.feature_count,
            capacity: self.capacity,
            batch_size: self.batch_size,
            activation: self.activation,
            storage: self.storage.clone(),
            parameters: self.parameters.clone(),
            mirror: None,
        };
        if let Some(context) = self.context() {
            copy.mirror = Some(copy.allocate_mirror(context)?);
            for slot in Slot::ALL {
                copy.sync_to_device(slot)?;
            }
        }
        Ok(copy)
    }

    /// Moves the storage out, leaving this data empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
