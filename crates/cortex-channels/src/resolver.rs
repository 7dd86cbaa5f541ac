use std::collections::{HashMap, HashSet};

use cortex_core::types::{Relationship, SenderRef};

/// Channels whose senders are Cortex-owned components.
const INTERNAL_CHANNELS: [&str; 2] = ["router", "subagent"];
/// Machine channels with no human on the other end.
const SYSTEM_CHANNELS: [&str; 1] = ["cron"];

/// Resolves a raw platform identity into a [`SenderRef`] with a relationship.
pub trait SenderResolver: Send + Sync {
    fn resolve(&self, channel: &str, raw_sender_id: &str, display_name: Option<&str>)
        -> SenderRef;
}

/// Resolver backed by a per-channel partner-id map.
///
/// A raw id counts as partner only on the channel it is registered for —
/// the same id showing up on another channel is external.
#[derive(Default)]
pub struct PartnerResolver {
    /// Key: channel, value: raw sender ids that are the partner there.
    partners: HashMap<String, HashSet<String>>,
}

impl PartnerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_partner(&mut self, channel: impl Into<String>, raw_id: impl Into<String>) {
        self.partners
            .entry(channel.into())
            .or_default()
            .insert(raw_id.into());
    }

    fn is_partner(&self, channel: &str, raw_id: &str) -> bool {
        self.partners
            .get(channel)
            .is_some_and(|ids| ids.contains(raw_id))
    }
}

impl SenderResolver for PartnerResolver {
    fn resolve(
        &self,
        channel: &str,
        raw_sender_id: &str,
        display_name: Option<&str>,
    ) -> SenderRef {
        let relationship = if self.is_partner(channel, raw_sender_id) {
            Relationship::Partner
        } else if INTERNAL_CHANNELS.contains(&channel) {
            Relationship::Internal
        } else if SYSTEM_CHANNELS.contains(&channel) {
            Relationship::System
        } else {
            Relationship::External
        };

        SenderRef {
            id: raw_sender_id.to_string(),
            name: display_name.unwrap_or(raw_sender_id).to_string(),
            relationship,
        }
    }
}
