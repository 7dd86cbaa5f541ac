use cortex_core::config::{TierModels, TierRanges};

use crate::types::{RouterJob, Tier};

/// Executor prompt template. Placeholders: {task}, {context}, {issuer},
/// {constraints} — plus the job type in the header line.
const PROMPT_TEMPLATE: &str = "\
Task from {issuer} ({job_type}):
{task}

Context:
{context}

Constraints: {constraints}";

/// Maps complexity weights onto executor tiers and renders the prompt.
pub struct Dispatcher {
    tiers: TierRanges,
    models: TierModels,
}

impl Dispatcher {
    pub fn new(tiers: TierRanges, models: TierModels) -> Self {
        Self { tiers, models }
    }

    /// Inclusive range lookup; weights outside every range default to sonnet.
    pub fn tier_for(&self, weight: u8) -> Tier {
        if in_range(self.tiers.haiku, weight) {
            Tier::Haiku
        } else if in_range(self.tiers.sonnet, weight) {
            Tier::Sonnet
        } else if in_range(self.tiers.opus, weight) {
            Tier::Opus
        } else {
            Tier::Sonnet
        }
    }

    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Haiku => &self.models.haiku,
            Tier::Sonnet => &self.models.sonnet,
            Tier::Opus => &self.models.opus,
        }
    }

    /// Render the executor prompt for a job at the chosen tier.
    pub fn render_prompt(&self, job: &RouterJob, tier: Tier) -> String {
        PROMPT_TEMPLATE
            .replace("{issuer}", &job.issuer)
            .replace("{job_type}", &job.job_type)
            .replace("{task}", &job.task_text())
            .replace("{context}", &job.context_text())
            .replace("{constraints}", constraints_for(tier))
    }
}

fn in_range(range: [u8; 2], weight: u8) -> bool {
    weight >= range[0] && weight <= range[1]
}

fn constraints_for(tier: Tier) -> &'static str {
    match tier {
        Tier::Haiku => "Answer directly and briefly.",
        Tier::Sonnet => "Provide a complete, well-structured answer.",
        Tier::Opus => "Reason carefully; thoroughness over brevity.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TierRanges::default(), TierModels::default())
    }

    fn job(payload: &str) -> RouterJob {
        RouterJob {
            id: "j1".to_string(),
            job_type: "general".to_string(),
            status: JobStatus::Pending,
            weight: None,
            tier: None,
            issuer: "cortex".to_string(),
            payload: payload.to_string(),
            result: None,
            error: None,
            retry_count: 0,
            worker_id: None,
            last_checkpoint: None,
            created_at: String::new(),
            updated_at: String::new(),
            started_at: None,
            finished_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn weight_maps_to_configured_ranges() {
        let d = dispatcher();
        assert_eq!(d.tier_for(1), Tier::Haiku);
        assert_eq!(d.tier_for(3), Tier::Haiku);
        assert_eq!(d.tier_for(4), Tier::Sonnet);
        assert_eq!(d.tier_for(7), Tier::Sonnet);
        assert_eq!(d.tier_for(8), Tier::Opus);
        assert_eq!(d.tier_for(10), Tier::Opus);
    }

    #[test]
    fn out_of_range_weight_defaults_to_sonnet() {
        let d = Dispatcher::new(
            TierRanges {
                haiku: [1, 2],
                sonnet: [5, 7],
                opus: [9, 10],
            },
            TierModels::default(),
        );
        assert_eq!(d.tier_for(3), Tier::Sonnet);
        assert_eq!(d.tier_for(8), Tier::Sonnet);
    }

    #[test]
    fn tier_selects_model_id() {
        let d = dispatcher();
        assert_eq!(d.model_for(Tier::Haiku), "anthropic/claude-haiku-4-5");
        assert_eq!(d.model_for(Tier::Opus), "anthropic/claude-opus-4-6");
    }

    #[test]
    fn prompt_substitutes_all_placeholders() {
        let d = dispatcher();
        let j = job(r#"{"task":"summarise the report","context":"Q3 financials"}"#);
        let prompt = d.render_prompt(&j, Tier::Haiku);
        assert!(prompt.contains("Task from cortex (general):"));
        assert!(prompt.contains("summarise the report"));
        assert!(prompt.contains("Q3 financials"));
        assert!(prompt.contains("Answer directly and briefly."));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn non_json_payload_is_the_task_verbatim() {
        let d = dispatcher();
        let j = job("just do the thing");
        let prompt = d.render_prompt(&j, Tier::Sonnet);
        assert!(prompt.contains("just do the thing"));
    }
}
