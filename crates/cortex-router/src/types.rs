use serde::{Deserialize, Serialize};

/// Router job lifecycle: in_queue→evaluating→pending→in_execution→{completed,failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InQueue,
    Evaluating,
    Pending,
    InExecution,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::InQueue => write!(f, "in_queue"),
            JobStatus::Evaluating => write!(f, "evaluating"),
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InExecution => write!(f, "in_execution"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_queue" => Ok(JobStatus::InQueue),
            "evaluating" => Ok(JobStatus::Evaluating),
            "pending" => Ok(JobStatus::Pending),
            "in_execution" => Ok(JobStatus::InExecution),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Executor tier chosen by task complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Haiku,
    Sonnet,
    Opus,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Haiku => write!(f, "haiku"),
            Tier::Sonnet => write!(f, "sonnet"),
            Tier::Opus => write!(f, "opus"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "haiku" => Ok(Tier::Haiku),
            "sonnet" => Ok(Tier::Sonnet),
            "opus" => Ok(Tier::Opus),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// One unit of routed work, live or archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterJob {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    /// Complexity weight 1–10 assigned by the evaluator.
    pub weight: Option<u8>,
    pub tier: Option<Tier>,
    /// Identity key of whoever enqueued the job; drives delivery.
    pub issuer: String,
    /// Opaque serialized payload; the router only reads `task`/`context`.
    pub payload: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub worker_id: Option<String>,
    pub last_checkpoint: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub delivered_at: Option<String>,
}

impl RouterJob {
    /// The task text the evaluator sizes and the template substitutes.
    ///
    /// Payloads are JSON `{"task": …, "context": …}` by convention; anything
    /// else is treated as the task verbatim.
    pub fn task_text(&self) -> String {
        match serde_json::from_str::<serde_json::Value>(&self.payload) {
            Ok(v) => v
                .get("task")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| self.payload.clone()),
            Err(_) => self.payload.clone(),
        }
    }

    pub fn context_text(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.payload)
            .ok()
            .and_then(|v| v.get("context").and_then(|c| c.as_str()).map(str::to_string))
            .unwrap_or_default()
    }
}

/// Evaluator verdict for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub weight: u8,
    pub reasoning: String,
}

/// Events on the process-local router bus, consumed by the notifier.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// `job:delivered` — the job finished and carries its final record.
    Delivered(RouterJob),
    /// `job:failed` — the job failed with a short error.
    Failed { job: RouterJob, error: String },
}
