use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Priority tier for bus ordering. Urgent drains before normal, normal before
/// background; within one tier the bus is strictly FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
    Background,
}

impl Priority {
    /// Numeric rank persisted in the bus table. Lower drains first.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Urgent => 0,
            Priority::Normal => 1,
            Priority::Background => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            0 => Priority::Urgent,
            2 => Priority::Background,
            _ => Priority::Normal,
        }
    }

    /// Channel adapters derive the priority from who is talking:
    /// partner → urgent, system/cron → background, everyone else → normal.
    pub fn for_sender(sender: &SenderRef) -> Self {
        match sender.relationship {
            Relationship::Partner => Priority::Urgent,
            Relationship::System => Priority::Background,
            Relationship::Internal | Relationship::External => Priority::Normal,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::Normal => write!(f, "normal"),
            Priority::Background => write!(f, "background"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Priority::Urgent),
            "normal" => Ok(Priority::Normal),
            "background" => Ok(Priority::Background),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// How the sender relates to the assistant's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// The primary human this instance serves.
    Partner,
    /// Another Cortex-owned component (router, subagent).
    Internal,
    #[default]
    External,
    /// Machine channels such as cron.
    System,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Partner => write!(f, "partner"),
            Relationship::Internal => write!(f, "internal"),
            Relationship::External => write!(f, "external"),
            Relationship::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "partner" => Ok(Relationship::Partner),
            "internal" => Ok(Relationship::Internal),
            "external" => Ok(Relationship::External),
            "system" => Ok(Relationship::System),
            other => Err(format!("unknown relationship: {}", other)),
        }
    }
}

/// Who sent the message, as resolved by the sender resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    /// Stable platform-native identifier (chat id, phone number, …).
    pub id: String,
    /// Display name, best effort.
    pub name: String,
    pub relationship: Relationship,
}

impl SenderRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, relationship: Relationship) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            relationship,
        }
    }

    /// Synthetic system sender used for internally generated rows.
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "Cortex".to_string(),
            relationship: Relationship::System,
        }
    }
}

/// Where a reply to this envelope should go. Filled by the adapter so the
/// output router can address the originating conversation exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplyContext {
    /// Target channel for the default reply.
    pub channel: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub account_id: Option<String>,
}

impl ReplyContext {
    pub fn to_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }
}

/// A file or media reference attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: Option<String>,
    /// URL or local path; Cortex forwards it opaquely.
    pub reference: String,
}

/// Metadata bag carried by an envelope.
///
/// The keys Cortex itself interprets are typed fields; everything a transport
/// attaches for its own round-trip lives in `extra` and is forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnvelopeMeta {
    /// Synthetic wake-up injected when a router result lands.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ops_trigger: bool,
    /// The pending-op id an ops trigger refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl EnvelopeMeta {
    pub fn ops_trigger(job_id: impl Into<String>) -> Self {
        Self {
            ops_trigger: true,
            job_id: Some(job_id.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.ops_trigger && self.job_id.is_none() && self.extra.is_empty()
    }
}

/// The canonical in-flight unit: one inbound (or synthetic) message.
///
/// Immutable after creation. An envelope is enqueued once, moves through the
/// bus state machine, and is recorded in the session log when picked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// UUIDv7 — time-sortable for log correlation.
    pub id: String,
    /// Source channel identifier (e.g. "webchat", "whatsapp", "cron").
    pub channel: String,
    pub sender: SenderRef,
    /// RFC3339 wall-clock timestamp.
    pub timestamp: String,
    pub reply_to: ReplyContext,
    pub content: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "EnvelopeMeta::is_empty")]
    pub meta: EnvelopeMeta,
}

impl Envelope {
    pub fn new(
        channel: impl Into<String>,
        sender: SenderRef,
        content: impl Into<String>,
        priority: Priority,
    ) -> Self {
        let channel = channel.into();
        Self {
            id: Uuid::now_v7().to_string(),
            reply_to: ReplyContext::to_channel(channel.clone()),
            channel,
            sender,
            timestamp: chrono::Utc::now().to_rfc3339(),
            content: content.into(),
            priority,
            attachments: Vec::new(),
            meta: EnvelopeMeta::default(),
        }
    }

    /// Synthetic wake-up posted to the bus when a pending op reaches a
    /// terminal state. Carries no content; the loop surfaces the op itself.
    pub fn ops_trigger(job_id: impl Into<String>, priority: Priority) -> Self {
        let mut env = Envelope::new(
            "router",
            SenderRef::new("cortex:router", "Router", Relationship::Internal),
            "",
            priority,
        );
        env.meta = EnvelopeMeta::ops_trigger(job_id);
        env
    }

    pub fn is_ops_trigger(&self) -> bool {
        self.meta.ops_trigger
    }
}

/// One outbound message produced by a model turn, addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub channel: String,
    pub content: String,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub account_id: Option<String>,
}

impl OutputTarget {
    pub fn new(channel: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            content: content.into(),
            message_id: None,
            thread_id: None,
            account_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_urgent_first() {
        assert!(Priority::Urgent.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Background.rank());
        assert_eq!(Priority::from_rank(Priority::Urgent.rank()), Priority::Urgent);
    }

    #[test]
    fn priority_for_sender_follows_relationship() {
        let partner = SenderRef::new("p1", "Ada", Relationship::Partner);
        let cron = SenderRef::new("cron", "cron", Relationship::System);
        let stranger = SenderRef::new("x", "X", Relationship::External);
        assert_eq!(Priority::for_sender(&partner), Priority::Urgent);
        assert_eq!(Priority::for_sender(&cron), Priority::Background);
        assert_eq!(Priority::for_sender(&stranger), Priority::Normal);
    }

    #[test]
    fn envelope_serde_roundtrip_preserves_bytes() {
        let mut env = Envelope::new(
            "whatsapp",
            SenderRef::new("491700000", "Ada", Relationship::Partner),
            "hello",
            Priority::Urgent,
        );
        env.attachments.push(Attachment {
            name: "photo.jpg".to_string(),
            mime_type: Some("image/jpeg".to_string()),
            reference: "/tmp/photo.jpg".to_string(),
        });
        env.meta
            .extra
            .insert("wa_msg_key".to_string(), serde_json::json!("ABC123"));

        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn ops_trigger_meta_is_tagged() {
        let env = Envelope::ops_trigger("job-7", Priority::Normal);
        assert!(env.is_ops_trigger());
        assert_eq!(env.meta.job_id.as_deref(), Some("job-7"));
        assert_eq!(env.channel, "router");
        assert!(env.content.is_empty());
    }

    #[test]
    fn plain_envelope_meta_serializes_compact() {
        let env = Envelope::new(
            "webchat",
            SenderRef::new("u1", "U", Relationship::External),
            "hi",
            Priority::Normal,
        );
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("meta").is_none());
    }
}
