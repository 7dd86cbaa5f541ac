use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use cortex_core::config::{HippocampusConfig, IDENTITY_FILES};
use cortex_core::types::Envelope;
use cortex_hippocampus::Hippocampus;
use cortex_sessions::{AttentionLayer, OpStatus, PendingOp, Role, SessionMessage, SessionStore};

use crate::error::Result;
use crate::types::{estimate_tokens, AssembledContext, ContextLayer};

/// How far back the foreground walk looks before budgeting trims it.
const HISTORY_FETCH_LIMIT: usize = 200;

/// Builds the four-layer context for one turn.
///
/// The system floor is always fully included, even over budget — identity
/// and pending-op awareness are never sacrificed to history.
pub struct ContextAssembler {
    sessions: Arc<SessionStore>,
    hippocampus: Arc<Hippocampus>,
    workspace_dir: PathBuf,
    cfg: HippocampusConfig,
}

impl ContextAssembler {
    pub fn new(
        sessions: Arc<SessionStore>,
        hippocampus: Arc<Hippocampus>,
        workspace_dir: impl Into<PathBuf>,
        cfg: HippocampusConfig,
    ) -> Self {
        Self {
            sessions,
            hippocampus,
            workspace_dir: workspace_dir.into(),
            cfg,
        }
    }

    /// Compose the context for `trigger` within `max_tokens`.
    pub fn assemble(
        &self,
        trigger: &Envelope,
        max_tokens: usize,
        hippocampus_enabled: bool,
    ) -> Result<AssembledContext> {
        let pending_ops = self.sessions.ops()?;

        // 1. System floor — identity files, active operations, known facts.
        let floor = self.build_system_floor(&pending_ops, hippocampus_enabled)?;
        let floor_layer = ContextLayer::new("system_floor", floor);

        // 2. Background — one line per non-trigger, non-archived channel.
        let background = self.build_background(trigger, hippocampus_enabled)?;
        let background_content = background
            .iter()
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let background_layer = ContextLayer::new("background", background_content);

        // 3. Foreground — whatever budget remains.
        let remaining = max_tokens.saturating_sub(floor_layer.tokens + background_layer.tokens);
        let foreground = self.build_foreground(trigger, remaining, hippocampus_enabled)?;
        let foreground_content = foreground
            .iter()
            .map(|m| format_session_message(m))
            .collect::<Vec<_>>()
            .join("\n");
        let foreground_layer = ContextLayer::new("foreground", foreground_content);

        let ctx = AssembledContext {
            layers: vec![
                floor_layer,
                foreground_layer,
                background_layer,
                // 4. Archived — always empty, present for shape stability.
                ContextLayer::new("archived", String::new()),
            ],
            foreground,
            background,
            pending_ops,
            is_ops_trigger: trigger.is_ops_trigger(),
            tool_round_trip: Vec::new(),
        };
        debug!(
            total_tokens = ctx.total_tokens(),
            foreground_messages = ctx.foreground.len(),
            ops = ctx.pending_ops.len(),
            "context assembled"
        );
        Ok(ctx)
    }

    fn build_system_floor(
        &self,
        pending_ops: &[PendingOp],
        hippocampus_enabled: bool,
    ) -> Result<String> {
        let mut floor = String::new();

        for name in IDENTITY_FILES {
            let path = self.workspace_dir.join(name);
            if path.is_file() {
                let body = std::fs::read_to_string(&path)?;
                if !floor.is_empty() {
                    floor.push_str("\n\n");
                }
                floor.push_str(body.trim_end());
            }
        }

        if !pending_ops.is_empty() {
            if !floor.is_empty() {
                floor.push_str("\n\n");
            }
            floor.push_str("## Active Operations\n");
            if pending_ops.iter().any(|op| op.status.is_terminal()) {
                floor.push_str(
                    "One or more dispatched tasks have finished. \
                     Relay each result to its channel in this reply — do not re-dispatch.\n",
                );
            }
            for op in pending_ops {
                floor.push_str(&format_op_line(op));
                floor.push('\n');
            }
        }

        if hippocampus_enabled {
            let facts = self.hippocampus.top_hot(self.cfg.hot_fact_limit)?;
            if !facts.is_empty() {
                if !floor.is_empty() {
                    floor.push_str("\n\n");
                }
                floor.push_str("## Known Facts\n");
                for fact in facts {
                    floor.push_str("- ");
                    floor.push_str(&fact.text);
                    floor.push('\n');
                }
            }
        }

        Ok(floor)
    }

    fn build_background(
        &self,
        trigger: &Envelope,
        hippocampus_enabled: bool,
    ) -> Result<BTreeMap<String, String>> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::hours(self.cfg.background_cutoff_hours);
        let cutoff = cutoff.to_rfc3339();

        let mut lines = BTreeMap::new();
        for state in self.sessions.channel_states()? {
            if state.channel == trigger.channel || state.layer == AttentionLayer::Archived {
                continue;
            }
            if hippocampus_enabled && state.last_message_at < cutoff {
                continue;
            }
            let digest = match &state.summary {
                Some(summary) => summary.clone(),
                None => format!("{} unread messages", state.unread_count),
            };
            lines.insert(
                state.channel.clone(),
                format!("[{}] {} (last: {})", state.channel, digest, state.last_message_at),
            );
        }
        Ok(lines)
    }

    /// Walk the trigger channel's history newest→oldest under the remaining
    /// budget, then flip back to chronological order.
    fn build_foreground(
        &self,
        trigger: &Envelope,
        remaining_tokens: usize,
        hippocampus_enabled: bool,
    ) -> Result<Vec<SessionMessage>> {
        let history = self
            .sessions
            .history(Some(&trigger.channel), None, HISTORY_FETCH_LIMIT)?;

        let mut collected: Vec<SessionMessage> = Vec::new();
        let mut accumulated = 0usize;
        for message in history.into_iter().rev() {
            let tokens = estimate_tokens(&format_session_message(&message));
            if accumulated + tokens > remaining_tokens {
                break;
            }
            if hippocampus_enabled
                && (collected.len() >= self.cfg.foreground_message_cap
                    || accumulated + tokens > self.cfg.foreground_token_cap)
            {
                break;
            }
            accumulated += tokens;
            collected.push(message);
        }
        collected.reverse();
        Ok(collected)
    }
}

/// One structured line per pending op, as the model sees it.
fn format_op_line(op: &PendingOp) -> String {
    let status = match op.status {
        OpStatus::Pending => "Pending",
        OpStatus::Completed => "Completed",
        OpStatus::Failed => "Failed",
    };
    let mut line = format!(
        "[TASK_ID]={}, Message='{}', Status={}, Channel={}",
        op.id,
        op.description,
        status,
        op.target_channel()
    );
    match op.status {
        OpStatus::Completed => {
            line.push_str(&format!(", Result='{}'", op.result.as_deref().unwrap_or("")));
        }
        OpStatus::Failed => {
            line.push_str(&format!(", Error='{}'", op.result.as_deref().unwrap_or("")));
        }
        OpStatus::Pending => {}
    }
    line
}

/// Foreground rendering: assistant rows speak as Cortex, everything else is
/// attributed to its channel and sender.
pub fn format_session_message(message: &SessionMessage) -> String {
    match message.role {
        Role::Assistant => format!("Cortex: {}", message.content),
        Role::User => format!("[{}] {}: {}", message.channel, message.sender_id, message.content),
    }
}
