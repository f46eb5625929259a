//! Gathers several parents' outputs into one buffer at a convergence point.
//!
//! Parents are registered once, in order. Each gets the offset equal to the
//! sum of the widths registered before it; the merged width is the sum of all
//! widths. [`LayerMerger::assign`] copies a parent's activation and
//! pre-activation into its columns of the merged buffer, and
//! [`LayerMerger::distribute`] adds the merged error columns back into each
//! parent's error slot.

use std::fmt;

use crate::error::{NetworkError, Result};
use crate::layer_data::{LayerData, Slot};

#[derive(Debug, Clone)]
struct MergeSlot<K> {
    key: K,
    offset: usize,
    width: usize,
}

#[derive(Debug, Clone)]
pub struct LayerMerger<K> {
    slots: Vec<MergeSlot<K>>,
    width: usize,
}

impl<K> Default for LayerMerger<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            width: 0,
        }
    }
}

impl<K: PartialEq + fmt::Display> LayerMerger<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parent of `width` features.
    ///
    /// # Arguments
    ///
    /// * `key` - Identifier of the parent node
    /// * `width` - Features the parent contributes per example
    ///
    /// # Returns
    ///
    /// The parent's column offset, which is the sum of the widths registered
    /// before it
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Config`] if `key` is already registered.
    pub fn register(&mut self, key: K, width: usize) -> Result<usize> {
        if self.slots.iter().any(|slot| slot.key == key) {
            return Err(NetworkError::config(
                format!("merge input '{}'", key),
                "registered twice",
            ));
        }
        let offset = self.width;
        self.slots.push(MergeSlot { key, offset, width });
        self.width += width;
        Ok(offset)
    }

    /// Width of the merged buffer.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn offset(&self, key: &K) -> Option<usize> {
        self.find(key).map(|slot| slot.offset)
    }

    pub fn parent_width(&self, key: &K) -> Option<usize> {
        self.find(key).map(|slot| slot.width)
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().map(|slot| &slot.key)
    }

    fn find(&self, key: &K) -> Option<&MergeSlot<K>> {
        self.slots.iter().find(|slot| &slot.key == key)
    }

    fn checked(&self, key: &K, parent: &LayerData, merged: &LayerData) -> Result<&MergeSlot<K>> {
        let slot = self.find(key).ok_or_else(|| {
            NetworkError::config(format!("merge input '{}'", key), "not registered")
        })?;
        if parent.feature_count() != slot.width {
            return Err(NetworkError::shape(
                format!("merge input '{}'", key),
                slot.width,
                parent.feature_count(),
            ));
        }
        if merged.feature_count() != self.width {
            return Err(NetworkError::shape(
                "merged buffer",
                self.width,
                merged.feature_count(),
            ));
        }
        if parent.batch_size() != merged.batch_size() {
            return Err(NetworkError::shape(
                format!("merge input '{}' batch size", key),
                merged.batch_size(),
                parent.batch_size(),
            ));
        }
        Ok(slot)
    }

    /// Copies `parent`'s activation and pre-activation into its columns of
    /// `merged`.
    ///
    /// # Arguments
    ///
    /// * `key` - Registered parent key
    /// * `parent` - The parent's output data
    /// * `merged` - Merged buffer, `width()` features per example
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Config`] for an unregistered key and
    /// [`NetworkError::Shape`] when feature counts or batch sizes disagree.
    pub fn assign(&self, key: &K, parent: &LayerData, merged: &mut LayerData) -> Result<()> {
        let slot = self.checked(key, parent, merged)?;
        let columns = slot.offset..slot.offset + slot.width;
        for s in [Slot::Activation, Slot::InterValue] {
            for b in 0..merged.batch_size() {
                merged.example_mut(s, b)[columns.clone()].copy_from_slice(parent.example(s, b));
            }
        }
        Ok(())
    }

    /// Adds `key`'s error columns of `merged` into `parent`'s error slot.
    ///
    /// The error is accumulated, so a parent with other children keeps
    /// their contributions.
    ///
    /// # Errors
    ///
    /// Same conditions as [`LayerMerger::assign`].
    pub fn distribute_to(&self, key: &K, parent: &mut LayerData, merged: &LayerData) -> Result<()> {
        let slot = self.checked(key, parent, merged)?;
        let columns = slot.offset..slot.offset + slot.width;
        for b in 0..merged.batch_size() {
            let source = &merged.example(Slot::Error, b)[columns.clone()];
            for (e, g) in parent.example_mut(Slot::Error, b).iter_mut().zip(source) {
                *e += g;
            }
        }
        Ok(())
    }

    /// [`LayerMerger::distribute_to`] for every `(key, parent)` pair.
    pub fn distribute<'a, I>(&self, parents: I, merged: &LayerData) -> Result<()>
    where
        K: 'a,
        I: IntoIterator<Item = (&'a K, &'a mut LayerData)>,
    {
        for (key, parent) in parents {
            self.distribute_to(key, parent, merged)?;
        }
        Ok(())
    }
}
