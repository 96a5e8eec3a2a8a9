//! Per-type layer name assignment.
//!
//! Unnamed layers are called `<type>_<uid>` where the uid counts
//! constructions of that type, starting at 1. The registry is an explicit
//! value owned by the build context, so two independent builds never share
//! counters unless they share the registry.

use std::collections::HashMap;

use crate::layer::LayerOptions;

/// Monotonic per-type construction counters.
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    uids: HashMap<String, usize>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next uid for `layer_type` (1 on first use).
    pub fn next_uid(&mut self, layer_type: &str) -> usize {
        let uid = self.uids.entry(layer_type.to_string()).or_insert(0);
        *uid += 1;
        *uid
    }

    /// Resolve a layer name: a non-empty override wins and leaves the
    /// counter untouched.
    pub fn assign(&mut self, layer_type: &str, options: &LayerOptions) -> String {
        match options.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let layer = layer_type.to_lowercase();
                let uid = self.next_uid(&layer);
                format!("{layer}_{uid}")
            }
        }
    }

    /// Constructions seen so far for `layer_type`.
    pub fn count(&self, layer_type: &str) -> usize {
        self.uids.get(layer_type).copied().unwrap_or(0)
    }
}
