use tracing::{debug, warn};

use cortex_channels::AdapterRegistry;
use cortex_core::config::{ChannelMode, ChannelModeConfig};
use cortex_core::types::{Envelope, OutputTarget};

/// Silence sentinels — exact, case-sensitive matches after trim.
pub const NO_REPLY: &str = "NO_REPLY";
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Cross-channel directive: `[[send_to:<channel>]]`.
const SEND_TO_OPEN: &str = "[[send_to:";
const DIRECTIVE_CLOSE: &str = "]]";
/// No-op directive, stripped without effect.
const REPLY_TO_CURRENT: &str = "[[reply_to_current]]";

/// One failed delivery attempt; reported, never fatal to the turn.
#[derive(Debug, Clone)]
pub struct RouteFailure {
    pub channel: String,
    pub reason: String,
}

/// Parse a model reply into output targets.
///
/// Recognised forms, in priority order: the silence sentinels (zero
/// targets), one or more `[[send_to:…]]` directives (one target each,
/// sharing the stripped content), otherwise a single reply to the trigger's
/// reply channel with full reply context.
pub fn parse_response(text: &str, trigger: &Envelope) -> Vec<OutputTarget> {
    let trimmed = text.trim();
    if trimmed == NO_REPLY || trimmed == HEARTBEAT_OK {
        return Vec::new();
    }

    let (channels, content) = extract_directives(trimmed);

    if channels.is_empty() {
        let mut target = OutputTarget::new(trigger.reply_to.channel.clone(), content);
        target.message_id = trigger.reply_to.message_id.clone();
        target.thread_id = trigger.reply_to.thread_id.clone();
        target.account_id = trigger.reply_to.account_id.clone();
        return vec![target];
    }

    channels
        .into_iter()
        .map(|channel| {
            let mut target = OutputTarget::new(channel, content.clone());
            // Directives back to the trigger channel keep the conversation
            // threading; other channels start fresh.
            if target.channel == trigger.reply_to.channel {
                target.message_id = trigger.reply_to.message_id.clone();
                target.thread_id = trigger.reply_to.thread_id.clone();
            }
            target
        })
        .collect()
}

/// Pull every `[[send_to:…]]` channel out of the text and strip all
/// directives (including `[[reply_to_current]]`) from the content.
fn extract_directives(text: &str) -> (Vec<String>, String) {
    let mut channels = Vec::new();
    let mut content = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("[[") {
        let (before, tail) = rest.split_at(open);
        content.push_str(before);
        if let Some(close) = tail.find(DIRECTIVE_CLOSE) {
            let directive = &tail[..close + DIRECTIVE_CLOSE.len()];
            if let Some(channel) = directive
                .strip_prefix(SEND_TO_OPEN)
                .and_then(|d| d.strip_suffix(DIRECTIVE_CLOSE))
            {
                channels.push(channel.trim().to_string());
            } else if directive != REPLY_TO_CURRENT {
                // Not a directive we know — keep it verbatim.
                content.push_str(directive);
            }
            rest = &tail[close + DIRECTIVE_CLOSE.len()..];
        } else {
            content.push_str(tail);
            rest = "";
        }
    }
    content.push_str(rest);

    (channels, content.trim().to_string())
}

/// Dispatch each target to the adapter matching its channel.
///
/// Unknown channels and adapter send failures are collected per-target;
/// sibling targets still send. `shadow` mode suppresses the physical send,
/// `off` drops the target.
pub async fn route_output(
    targets: &[OutputTarget],
    registry: &AdapterRegistry,
    modes: &ChannelModeConfig,
) -> Vec<RouteFailure> {
    let mut failures = Vec::new();

    for target in targets {
        match modes.mode_for(&target.channel) {
            ChannelMode::Off => {
                debug!(channel = %target.channel, "channel is off, dropping outbound");
                continue;
            }
            ChannelMode::Shadow => {
                debug!(channel = %target.channel, "shadow mode, suppressing outbound send");
                continue;
            }
            ChannelMode::Live => {}
        }

        let Some(adapter) = registry.get(&target.channel) else {
            warn!(channel = %target.channel, "no adapter registered for output target");
            failures.push(RouteFailure {
                channel: target.channel.clone(),
                reason: "no adapter registered".to_string(),
            });
            continue;
        };

        if let Err(e) = adapter.send(target).await {
            warn!(channel = %target.channel, error = %e, "adapter send failed");
            failures.push(RouteFailure {
                channel: target.channel.clone(),
                reason: e.to_string(),
            });
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::types::{Priority, Relationship, SenderRef};

    fn trigger() -> Envelope {
        let mut env = Envelope::new(
            "webchat",
            SenderRef::new("u1", "U", Relationship::External),
            "hi",
            Priority::Normal,
        );
        env.reply_to.message_id = Some("m-1".to_string());
        env.reply_to.thread_id = Some("t-1".to_string());
        env.reply_to.account_id = Some("acc-1".to_string());
        env
    }

    #[test]
    fn sentinels_mean_silence() {
        assert!(parse_response("NO_REPLY", &trigger()).is_empty());
        assert!(parse_response("  HEARTBEAT_OK\n", &trigger()).is_empty());
        // Case-sensitive, exact after trim.
        assert_eq!(parse_response("no_reply", &trigger()).len(), 1);
        assert_eq!(parse_response("NO_REPLY please", &trigger()).len(), 1);
    }

    #[test]
    fn default_reply_carries_full_context() {
        let targets = parse_response("hello back", &trigger());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].channel, "webchat");
        assert_eq!(targets[0].content, "hello back");
        assert_eq!(targets[0].message_id.as_deref(), Some("m-1"));
        assert_eq!(targets[0].thread_id.as_deref(), Some("t-1"));
        assert_eq!(targets[0].account_id.as_deref(), Some("acc-1"));
    }

    #[test]
    fn send_to_directive_retargets() {
        let targets = parse_response("[[send_to:whatsapp]] Alert: server down", &trigger());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].channel, "whatsapp");
        assert_eq!(targets[0].content, "Alert: server down");
        assert!(targets[0].message_id.is_none());
    }

    #[test]
    fn multiple_directives_share_content() {
        let targets =
            parse_response("[[send_to:whatsapp]][[send_to:webchat]] heads up", &trigger());
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].channel, "whatsapp");
        assert_eq!(targets[1].channel, "webchat");
        assert!(targets.iter().all(|t| t.content == "heads up"));
        // Same-channel directive keeps the reply threading.
        assert_eq!(targets[1].message_id.as_deref(), Some("m-1"));
        assert!(targets[0].message_id.is_none());
    }

    #[test]
    fn reply_to_current_is_stripped_without_effect() {
        let targets = parse_response("[[reply_to_current]] same place", &trigger());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].channel, "webchat");
        assert_eq!(targets[0].content, "same place");
    }

    #[test]
    fn unknown_double_bracket_text_is_kept() {
        let targets = parse_response("see [[the docs]] for details", &trigger());
        assert_eq!(targets[0].content, "see [[the docs]] for details");
    }
}
