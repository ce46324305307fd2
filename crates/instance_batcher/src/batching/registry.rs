//! Aggregator registry
//!
//! Maps a pass and an auxiliary key to its [`InstancedBatch`]. The registry
//! is an ordinary value owned by the renderer; it is created at renderer
//! initialisation and handed to whoever builds frames.

use std::collections::HashMap;

use crate::config::{BatchingConfig, ConfigError};
use crate::device::{CommandRecorder, GraphicsDevice, PassHandle};

use super::instanced_batch::InstancedBatch;

/// Auxiliary key used when a pass needs only one aggregator
pub const PRIMARY_KEY: u32 = 0;

/// Lazily populated map of `(pass, key)` to aggregator
#[derive(Debug, Default)]
pub struct BatchRegistry {
    config: BatchingConfig,
    batches: HashMap<PassHandle, HashMap<u32, InstancedBatch>>,
}

impl BatchRegistry {
    /// Registry using the default batching configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry using a validated configuration
    pub fn with_config(config: BatchingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            batches: HashMap::new(),
        })
    }

    /// Configuration handed to every new aggregator
    pub const fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Aggregator for `(pass, key)`, created on first use
    ///
    /// Equal keys always yield the same aggregator for the registry's lifetime,
    /// unless it is removed explicitly.
    pub fn get(&mut self, pass: PassHandle, key: u32) -> &mut InstancedBatch {
        let config = &self.config;
        self.batches
            .entry(pass)
            .or_default()
            .entry(key)
            .or_insert_with(|| {
                log::info!("Creating instanced batch for pass {:?}, key {}", pass, key);
                InstancedBatch::with_validated_config(pass, config)
            })
    }

    /// Aggregator for `(pass, key)` if it exists
    pub fn get_existing(&self, pass: PassHandle, key: u32) -> Option<&InstancedBatch> {
        self.batches.get(&pass)?.get(&key)
    }

    /// Whether an aggregator exists for `(pass, key)`
    pub fn contains(&self, pass: PassHandle, key: u32) -> bool {
        self.get_existing(pass, key).is_some()
    }

    /// Number of aggregators
    pub fn len(&self) -> usize {
        self.batches.values().map(HashMap::len).sum()
    }

    /// Whether no aggregator exists
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every aggregator with its pass and key, in no particular order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PassHandle, u32, &mut InstancedBatch)> {
        self.batches.iter_mut().flat_map(|(pass, by_key)| {
            by_key
                .iter_mut()
                .map(move |(key, batch)| (*pass, *key, batch))
        })
    }

    /// Upload every aggregator that has pending instances
    ///
    /// Returns the total number of buffer updates recorded.
    pub fn upload_all(&mut self, recorder: &mut dyn CommandRecorder) -> usize {
        self.batches
            .values_mut()
            .flat_map(HashMap::values_mut)
            .filter(|batch| batch.has_pending_models())
            .map(|batch| batch.upload_buffers(recorder))
            .sum()
    }

    /// Clear every aggregator for the next frame
    pub fn clear_all(&mut self) {
        for batch in self.batches.values_mut().flat_map(HashMap::values_mut) {
            batch.clear();
        }
    }

    /// Detach the aggregator for `(pass, key)`
    ///
    /// The caller owns the result and must destroy it to release its GPU
    /// resources.
    pub fn remove(&mut self, pass: PassHandle, key: u32) -> Option<InstancedBatch> {
        let by_key = self.batches.get_mut(&pass)?;
        let batch = by_key.remove(&key);
        if by_key.is_empty() {
            self.batches.remove(&pass);
        }
        batch
    }

    /// Destroy every aggregator's GPU resources and empty the registry
    pub fn destroy_all(&mut self, device: &mut dyn GraphicsDevice) {
        let count = self.len();
        for (_, by_key) in self.batches.drain() {
            for (_, mut batch) in by_key {
                batch.destroy(device);
            }
        }
        log::info!("Destroyed {} instanced batches", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn test_get_memoizes_per_key() {
        let mut device = HeadlessDevice::new();
        let forward = device.create_pass("forward");
        let shadow = device.create_pass("shadow");
        let mut registry = BatchRegistry::new();

        registry.get(forward, PRIMARY_KEY).dynamic_offsets_mut().push(64);
        registry.get(shadow, 1);
        registry.get(shadow, 2);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(forward, PRIMARY_KEY).dynamic_offsets(), &[64]);
        assert_eq!(registry.get(shadow, 2).pass(), shadow);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(shadow, 1));
        assert!(!registry.contains(forward, 1));
    }

    #[test]
    fn test_with_config_validates() {
        let bad = BatchingConfig {
            initial_capacity: 3,
            ..BatchingConfig::default()
        };
        assert!(BatchRegistry::with_config(bad).is_err());

        let good = BatchingConfig {
            initial_capacity: 8,
            max_capacity: 64,
            ..BatchingConfig::default()
        };
        let registry = BatchRegistry::with_config(good).unwrap();
        assert_eq!(registry.config().max_capacity, 64);
    }

    #[test]
    fn test_remove_detaches_entry() {
        let mut device = HeadlessDevice::new();
        let pass = device.create_pass("forward");
        let mut registry = BatchRegistry::new();
        registry.get(pass, PRIMARY_KEY);

        assert!(registry.remove(pass, PRIMARY_KEY).is_some());
        assert!(registry.remove(pass, PRIMARY_KEY).is_none());
        assert!(registry.is_empty());
    }
}
