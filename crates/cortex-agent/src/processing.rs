use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cortex_bus::{CheckpointData, MessageBus};
use cortex_channels::AdapterRegistry;
use cortex_context::{AssembledContext, ContextAssembler, ToolExchange};
use cortex_core::config::{ChannelModeConfig, PipelineConfig};
use cortex_core::types::Envelope;
use cortex_sessions::store::SYSTEM_SENDER;
use cortex_sessions::{OpKind, PendingOp, SessionStore};

use crate::dispatch::{evidence_row, SpawnRequest, TaskSpawner};
use crate::error::Result;
use crate::output::{parse_response, route_output};
use crate::provider::{ModelProvider, ModelRequest, ModelResponse, ToolCall, TurnMessage, TurnRole};
use crate::tools::{spawn_tool_definition, ToolOutcome, ToolRegistry, SPAWN_TOOL_NAME};

/// Sentinel user row appended for ops triggers so the foreground still ends
/// with a user-role message.
pub const OPS_TRIGGER_SENTINEL: &str = "[Task update available]";

/// How one turn ended.
#[derive(Debug, Clone)]
pub enum Disposition {
    Replied { targets: usize },
    Silent,
    Failed { error: String },
}

impl Disposition {
    fn label(&self) -> &'static str {
        match self {
            Disposition::Replied { .. } => "replied",
            Disposition::Silent => "silent",
            Disposition::Failed { .. } => "failed",
        }
    }
}

/// Completion notification broadcast after every turn, including silent and
/// failed ones, so live-delivery callers can unblock.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub envelope_id: String,
    pub disposition: Disposition,
}

/// Everything the loop needs, gathered once at wiring time.
pub struct LoopParts {
    pub bus: Arc<MessageBus>,
    pub sessions: Arc<SessionStore>,
    pub assembler: ContextAssembler,
    pub tools: ToolRegistry,
    pub model: Arc<dyn ModelProvider>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub adapters: AdapterRegistry,
    pub pipeline: PipelineConfig,
    pub modes: ChannelModeConfig,
    pub hippocampus_enabled: bool,
}

/// The serial processing loop: strict dequeue→context→model→output→checkpoint,
/// one envelope in flight at any instant, no worker pool.
pub struct CortexLoop {
    parts: LoopParts,
    completions: broadcast::Sender<TurnOutcome>,
}

impl CortexLoop {
    pub fn new(parts: LoopParts) -> Self {
        let (completions, _) = broadcast::channel(64);
        Self { parts, completions }
    }

    /// Subscribe to per-turn completion notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TurnOutcome> {
        self.completions.subscribe()
    }

    /// Main loop. Polls at the configured interval when idle; drains
    /// back-to-back when envelopes are waiting. The in-flight turn always
    /// finishes before shutdown takes effect.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.parts.pipeline.poll_interval_ms,
            "processing loop started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.parts.pipeline.poll_interval_ms));
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Drain: dispatch the next envelope immediately after one completes.
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match self.process_next().await {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "loop tick error");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("processing loop stopped");
    }

    /// Pick up and fully process one envelope. Returns `None` on an empty
    /// queue. The turn outcome is broadcast in every case — replied, silent,
    /// or failed.
    pub async fn process_next(&self) -> Result<Option<TurnOutcome>> {
        let Some(entry) = self.parts.bus.dequeue_next()? else {
            return Ok(None);
        };
        let envelope = entry.envelope;
        if !self.parts.bus.mark_processing(&envelope.id)? {
            // Lost a race with a sweep; the next tick will see it again.
            return Ok(None);
        }

        let outcome = match self.run_turn(&envelope).await {
            Ok(disposition) => {
                self.parts.bus.mark_completed(&envelope.id)?;
                let outcome = TurnOutcome {
                    envelope_id: envelope.id.clone(),
                    disposition,
                };
                if let Err(e) = self.write_checkpoint(&envelope, &outcome) {
                    warn!(error = %e, "checkpoint write failed");
                }
                outcome
            }
            Err(e) => {
                let message = e.to_string();
                error!(envelope_id = %envelope.id, error = %message, "turn failed");
                if let Err(mark_err) = self.parts.bus.mark_failed(&envelope.id, &message) {
                    error!(error = %mark_err, "could not mark envelope failed");
                }
                TurnOutcome {
                    envelope_id: envelope.id.clone(),
                    disposition: Disposition::Failed { error: message },
                }
            }
        };

        // Completion always fires so live-delivery callers can unblock.
        let _ = self.completions.send(outcome.clone());
        Ok(Some(outcome))
    }

    /// Steps 4–13 of the turn pipeline.
    async fn run_turn(&self, envelope: &Envelope) -> Result<Disposition> {
        let is_ops = envelope.is_ops_trigger();

        // Record the trigger in the session log. Ops triggers carry no
        // content; a sentinel user row keeps the model API invariant that
        // the foreground ends with a user turn.
        if is_ops {
            self.parts.sessions.append_user(
                &envelope.channel,
                SYSTEM_SENDER,
                OPS_TRIGGER_SENTINEL,
                Some(&envelope.id),
            )?;
        } else {
            self.parts.sessions.append_envelope(envelope)?;
            self.parts.sessions.record_incoming(&envelope.channel)?;
        }

        let mut ctx = self.parts.assembler.assemble(
            envelope,
            self.parts.pipeline.context_budget_tokens,
            self.parts.hippocampus_enabled,
        )?;

        let response = self.model_round_trip(&mut ctx).await?;

        // Async dispatch: skipped entirely on ops triggers — the spawn tool
        // is withheld so the model cannot re-dispatch the task it is about
        // to acknowledge.
        if !is_ops {
            self.handle_spawn_calls(&response.tool_calls, envelope).await?;
        }

        // For ops triggers, replies must route to the user channel the
        // original task belongs to, not the synthetic router channel.
        let mut routing_trigger = envelope.clone();
        if is_ops {
            if let Some(job_id) = &envelope.meta.job_id {
                if let Some(op) = self.parts.sessions.op(job_id)? {
                    routing_trigger.reply_to.channel = op.target_channel().to_string();
                }
            }
        }

        let targets = parse_response(&response.content, &routing_trigger);
        let failures =
            route_output(&targets, &self.parts.adapters, &self.parts.modes).await;
        for failure in &failures {
            warn!(channel = %failure.channel, reason = %failure.reason, "output target not delivered");
        }

        if targets.is_empty() {
            self.parts.sessions.append_silence(&envelope.channel)?;
        } else {
            for target in &targets {
                self.parts.sessions.append_assistant(&target.channel, &target.content)?;
                self.parts.sessions.mark_read(&target.channel)?;
            }
        }

        // Acknowledged results leave the pending-ops table now, so the next
        // turn no longer sees them.
        let archived = self.parts.sessions.copy_and_delete_terminal_ops()?;
        if archived > 0 {
            debug!(count = archived, "acknowledged ops archived");
        }

        Ok(if targets.is_empty() {
            Disposition::Silent
        } else {
            Disposition::Replied {
                targets: targets.len(),
            }
        })
    }

    /// The synchronous tool round-trip sub-loop: execute sync calls, attach
    /// results, re-call the model, up to the configured round bound. Exits
    /// as soon as a response carries no synchronous tool calls.
    async fn model_round_trip(&self, ctx: &mut AssembledContext) -> Result<ModelResponse> {
        let mut response = self.parts.model.complete(&self.build_request(ctx)).await?;
        let mut rounds = 0u32;

        loop {
            let sync_calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .filter(|c| self.parts.tools.contains(&c.name))
                .cloned()
                .collect();
            if sync_calls.is_empty() {
                break;
            }
            if rounds >= self.parts.pipeline.max_tool_rounds {
                warn!(
                    rounds,
                    "tool round limit reached, proceeding with last response"
                );
                break;
            }

            for call in sync_calls {
                let outcome = match self.parts.tools.get(&call.name) {
                    Some(tool) => tool.execute(call.arguments.clone()).await,
                    None => ToolOutcome::error(format!("unknown tool: {}", call.name)),
                };
                debug!(tool = %call.name, is_error = outcome.is_error, "sync tool executed");
                ctx.tool_round_trip.push(ToolExchange {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: outcome.content,
                });
            }

            rounds += 1;
            response = self.parts.model.complete(&self.build_request(ctx)).await?;
        }

        Ok(response)
    }

    /// Async tool calls: the core generates the task id, persists the
    /// pending op and the dispatch-evidence row first, and only then hands
    /// the work to the spawner. A falsy spawn result fails the op on the
    /// spot so the model sees the failure next turn.
    async fn handle_spawn_calls(&self, calls: &[ToolCall], envelope: &Envelope) -> Result<()> {
        for call in calls.iter().filter(|c| c.name == SPAWN_TOOL_NAME) {
            let description = call
                .arguments
                .get("task")
                .and_then(|t| t.as_str())
                .unwrap_or("unspecified task")
                .to_string();
            let id = format!("task-{}", Uuid::now_v7());
            let reply_channel = envelope.reply_to.channel.clone();

            let mut op = PendingOp::new(&id, OpKind::RouterJob, &description, &reply_channel);
            op.reply_channel = Some(reply_channel.clone());
            op.result_priority = Some(envelope.priority);

            self.parts.sessions.add_op(&op)?;
            self.parts
                .sessions
                .append_assistant(&envelope.channel, &evidence_row(&op))?;

            let request = SpawnRequest {
                id: id.clone(),
                description,
                payload: call.arguments.clone(),
                reply_channel,
            };
            match self.parts.spawner.spawn(&request).await {
                Some(accepted) if !accepted.is_empty() => {
                    info!(op_id = %id, "async task dispatched");
                }
                _ => {
                    warn!(op_id = %id, "spawn callback failed, failing op");
                    self.parts.sessions.fail_op(&id, "dispatch failed")?;
                }
            }
        }
        Ok(())
    }

    fn build_request(&self, ctx: &AssembledContext) -> ModelRequest {
        let mut system = ctx.system_floor().to_string();
        if let Some(background) = ctx.layer("background") {
            if !background.content.is_empty() {
                system.push_str("\n\n## Other Channels\n");
                system.push_str(&background.content);
            }
        }

        let messages = ctx
            .foreground
            .iter()
            .map(|m| TurnMessage {
                role: match m.role {
                    cortex_sessions::Role::Assistant => TurnRole::Assistant,
                    cortex_sessions::Role::User => TurnRole::User,
                },
                content: cortex_context::assembler::format_session_message(m),
            })
            .collect();

        let mut tools = self.parts.tools.definitions();
        if !ctx.is_ops_trigger {
            tools.push(spawn_tool_definition());
        }

        ModelRequest {
            system,
            messages,
            tools,
            tool_round_trip: ctx.tool_round_trip.clone(),
        }
    }

    fn write_checkpoint(&self, envelope: &Envelope, outcome: &TurnOutcome) -> Result<i64> {
        let states = self.parts.sessions.channel_states()?;
        let ops = self.parts.sessions.ops()?;
        let data = CheckpointData {
            session_snapshot: format!(
                "turn {} on {} ({})",
                envelope.id,
                envelope.channel,
                outcome.disposition.label()
            ),
            channel_states: serde_json::to_value(&states)?,
            pending_ops: serde_json::to_value(&ops)?,
        };
        Ok(self.parts.bus.checkpoint(&data)?)
    }
}
