use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use cortex_hippocampus::Hippocampus;

use super::{SyncTool, ToolOutcome};

const DEFAULT_LIMIT: usize = 5;

/// Semantic recall over cold memory. Hits are promoted back into the hot
/// store as a side effect (see the Hippocampus promotion rule).
pub struct MemoryQuery {
    hippocampus: Arc<Hippocampus>,
}

impl MemoryQuery {
    pub fn new(hippocampus: Arc<Hippocampus>) -> Self {
        Self { hippocampus }
    }
}

#[derive(Deserialize)]
struct Args {
    query: String,
    limit: Option<usize>,
}

#[async_trait]
impl SyncTool for MemoryQuery {
    fn name(&self) -> &str {
        "memory_query"
    }

    fn description(&self) -> &str {
        "Search long-term memory for facts related to a query"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutcome {
        let args: Args = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::error(format!("bad arguments: {e}")),
        };

        match self
            .hippocampus
            .memory_query(&args.query, args.limit.unwrap_or(DEFAULT_LIMIT))
            .await
        {
            Ok(hits) => {
                let out: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "fact": h.text,
                            "distance": h.distance,
                            "archived_at": h.archived_at,
                        })
                    })
                    .collect();
                ToolOutcome::success(serde_json::json!(out).to_string())
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}
