use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::Evaluation;

/// Injected small-model contract for task sizing.
///
/// Implementations return raw model text; the evaluator does all parsing.
#[async_trait]
pub trait WeightModel: Send + Sync {
    async fn assess(&self, task: &str) -> Result<String>;
}

/// Sizes a task as a 1–10 complexity weight.
///
/// Never fails: a malformed or missing verdict falls back to the configured
/// default weight so the pipeline keeps moving.
pub struct Evaluator {
    model: Arc<dyn WeightModel>,
    timeout: Duration,
    fallback_weight: u8,
}

impl Evaluator {
    pub fn new(model: Arc<dyn WeightModel>, timeout: Duration, fallback_weight: u8) -> Self {
        Self {
            model,
            timeout,
            fallback_weight,
        }
    }

    pub async fn evaluate(&self, task: &str) -> Evaluation {
        let raw = match tokio::time::timeout(self.timeout, self.model.assess(task)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "evaluator call failed, using fallback weight");
                return self.fallback();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "evaluator timed out, using fallback weight");
                return self.fallback();
            }
        };

        match parse_evaluation(&raw) {
            Some(eval) => {
                debug!(weight = eval.weight, "task evaluated");
                eval
            }
            None => {
                warn!(raw = %raw, "unparseable evaluator output, using fallback weight");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Evaluation {
        Evaluation {
            weight: self.fallback_weight,
            reasoning: "evaluator failed, using fallback".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    weight: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse an evaluator reply: a JSON `{weight, reasoning}` object anywhere in
/// the text, or failing that a bare integer 1–10.
fn parse_evaluation(raw: &str) -> Option<Evaluation> {
    if let Some(verdict) = extract_json_verdict(raw) {
        return Some(Evaluation {
            weight: clamp_weight(verdict.weight),
            reasoning: verdict.reasoning.unwrap_or_default(),
        });
    }

    // Fallback: first standalone integer in range.
    for token in raw.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() {
            continue;
        }
        if let Ok(n) = token.parse::<u8>() {
            if (1..=10).contains(&n) {
                return Some(Evaluation {
                    weight: n,
                    reasoning: "bare weight extracted from evaluator output".to_string(),
                });
            }
        }
    }
    None
}

fn extract_json_verdict(raw: &str) -> Option<RawVerdict> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn clamp_weight(w: f64) -> u8 {
    w.round().clamp(1.0, 10.0) as u8
}
