use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cortex_core::config::GardenerConfig;
use cortex_hippocampus::Hippocampus;
use cortex_sessions::SessionStore;

use crate::error::Result;

/// Injected cheap-model contract for fact extraction.
///
/// Gets a plain-text transcript, returns model text expected to contain a
/// JSON array of short fact strings.
#[async_trait]
pub trait FactModel: Send + Sync {
    async fn extract(&self, transcript: &str) -> Result<String>;
}

/// Compacts old conversation rows into hot facts.
///
/// When a channel's log exceeds the row threshold, the oldest batch is sent
/// to the extractor model; the returned facts land in hot memory and the
/// raw rows are deleted. Keeps the session window affordable while
/// preserving what mattered.
pub struct FactExtractor {
    sessions: Arc<SessionStore>,
    hippocampus: Arc<Hippocampus>,
    model: Arc<dyn FactModel>,
    cfg: GardenerConfig,
}

impl FactExtractor {
    pub fn new(
        sessions: Arc<SessionStore>,
        hippocampus: Arc<Hippocampus>,
        model: Arc<dyn FactModel>,
        cfg: GardenerConfig,
    ) -> Self {
        Self {
            sessions,
            hippocampus,
            model,
            cfg,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.compact_interval_secs,
            "fact extractor started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.compact_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "extractor tick error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("fact extractor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every channel above the threshold. Returns the number
    /// of facts saved.
    pub async fn tick(&self) -> Result<usize> {
        let mut saved = 0;
        for state in self.sessions.channel_states()? {
            if self.sessions.count_rows(&state.channel)? > self.cfg.extract_threshold_rows {
                saved += self.compact_channel(&state.channel).await?;
            }
        }
        Ok(saved)
    }

    async fn compact_channel(&self, channel: &str) -> Result<usize> {
        let old_rows = self.sessions.oldest_rows(channel, self.cfg.extract_batch)?;
        if old_rows.is_empty() {
            return Ok(0);
        }

        let transcript: String = old_rows
            .iter()
            .map(|m| format!("{}: {}", m.sender_id, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let response = match self.model.extract(&transcript).await {
            Ok(text) => text,
            Err(e) => {
                warn!(channel, error = %e, "extractor model failed, keeping rows");
                return Ok(0);
            }
        };

        let facts = parse_fact_array(&response);
        if facts.is_empty() {
            warn!(channel, "extractor returned no usable facts, keeping rows");
            return Ok(0);
        }

        let mut saved = 0;
        for fact in &facts {
            if self.hippocampus.insert_hot(fact)? {
                saved += 1;
            }
        }

        let ids: Vec<i64> = old_rows.iter().map(|m| m.id).collect();
        let deleted = self.sessions.delete_rows(&ids)?;
        info!(channel, facts_saved = saved, rows_deleted = deleted, "channel compacted");
        Ok(saved)
    }
}

/// Pull a JSON array of strings out of the model text; the array may be
/// wrapped in prose or a code fence.
fn parse_fact_array(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let json_str = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &trimmed[s..=e],
        _ => trimmed,
    };
    match serde_json::from_str::<Vec<String>>(json_str) {
        Ok(facts) => facts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}
