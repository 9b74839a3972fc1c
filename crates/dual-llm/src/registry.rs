//! Per-side record of which model is believed loaded and which instance
//! answers for it.
//!
//! Each side owns one slot behind its own mutex, so the (model, instance)
//! pair is always read and written as a unit and the two sides never contend.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::types::{InstanceId, RegistryEntry, Side};

#[derive(Default)]
pub struct ModelRegistry {
    slots: DashMap<Side, Arc<Mutex<RegistryEntry>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, side: Side) -> Arc<Mutex<RegistryEntry>> {
        // Fast path: slot already exists
        if let Some(slot) = self.slots.get(&side) {
            return slot.clone();
        }
        self.slots.entry(side).or_default().clone()
    }

    /// Overwrite the entry for `side`.
    pub fn record(&self, side: Side, model_name: &str, instance_id: &str) {
        let slot = self.slot(side);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = RegistryEntry {
            loaded_model: Some(model_name.to_string()),
            instance_id: Some(instance_id.to_string()),
        };
        debug!("Registry[{}] = {} as {}", side, model_name, instance_id);
    }

    /// Current entry for `side`; empty if nothing was ever recorded.
    pub fn lookup(&self, side: Side) -> RegistryEntry {
        match self.slots.get(&side) {
            Some(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            None => RegistryEntry::default(),
        }
    }

    /// Instance a request for `model_name` on `side` is expected to hit.
    ///
    /// The recorded instance only counts while it belongs to the same model;
    /// otherwise the bare model name is expected.
    pub fn expected_instance(&self, side: Side, model_name: &str) -> InstanceId {
        let entry = self.lookup(side);
        match (entry.loaded_model, entry.instance_id) {
            (Some(model), Some(instance)) if model == model_name => instance,
            _ => model_name.to_string(),
        }
    }
}
