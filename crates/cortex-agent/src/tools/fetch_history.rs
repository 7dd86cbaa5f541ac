use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use cortex_sessions::SessionStore;

use super::{SyncTool, ToolOutcome};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// Read-only access to raw session rows for any channel.
pub struct FetchChatHistory {
    sessions: Arc<SessionStore>,
}

impl FetchChatHistory {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[derive(Deserialize)]
struct Args {
    channel: Option<String>,
    limit: Option<usize>,
    before: Option<String>,
}

#[async_trait]
impl SyncTool for FetchChatHistory {
    fn name(&self) -> &str {
        "fetch_chat_history"
    }

    fn description(&self) -> &str {
        "Fetch raw conversation history rows, optionally filtered by channel and a 'before' timestamp"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "channel": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": MAX_LIMIT },
                "before": { "type": "string", "description": "RFC3339 cutoff; only older rows" }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutcome {
        let args: Args = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::error(format!("bad arguments: {e}")),
        };
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

        match self
            .sessions
            .history(args.channel.as_deref(), args.before.as_deref(), limit)
        {
            Ok(rows) => {
                let out: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "role": m.role.to_string(),
                            "channel": m.channel,
                            "sender": m.sender_id,
                            "content": m.content,
                            "timestamp": m.timestamp,
                        })
                    })
                    .collect();
                ToolOutcome::success(serde_json::json!(out).to_string())
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}
