use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::adapter::ChannelAdapter;

/// Adapter lookup table keyed by channel id.
///
/// Registered once at startup; the output router resolves each target's
/// channel through [`AdapterRegistry::get`] and treats a miss as a
/// per-target error, never as a fatal one.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. An adapter with the same channel id is replaced.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let id = adapter.channel_id().to_string();
        info!(channel = %id, "registering channel adapter");
        self.adapters.insert(id, adapter);
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(channel).cloned()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.adapters.contains_key(channel)
    }

    /// Registered channel ids, sorted for deterministic output.
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}
