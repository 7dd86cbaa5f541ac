use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Identity/memory files read into the system floor, in order.
pub const IDENTITY_FILES: [&str; 4] = ["SOUL.md", "IDENTITY.md", "USER.md", "MEMORY.md"];

/// Issuer key the router uses to recognise jobs dispatched by the core loop.
pub const CORTEX_ISSUER: &str = "cortex";

/// Top-level config (cortex.toml + CORTEX_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CortexConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub channels: ChannelModeConfig,
    #[serde(default)]
    pub hippocampus: HippocampusConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub gardener: GardenerConfig,
}

impl CortexConfig {
    /// Load config from a TOML file with CORTEX_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CortexConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CORTEX_").split("_"))
            .extract()
            .map_err(|e| crate::error::CortexError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding the identity files (SOUL.md, IDENTITY.md, USER.md, MEMORY.md).
    #[serde(default = "default_workspace_dir")]
    pub dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
        }
    }
}

/// Tunables for the serial processing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Poll cadence when the bus is empty, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on synchronous tool round-trips per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Total context budget handed to the assembler, in tokens.
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            context_budget_tokens: default_context_budget(),
        }
    }
}

/// Operating mode for a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Ignore envelopes from this channel entirely.
    Off,
    /// Observe envelopes but suppress outbound sends.
    Shadow,
    #[default]
    Live,
}

/// Per-channel mode map with a default for unlisted channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelModeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default_mode: ChannelMode,
    #[serde(default)]
    pub channels: HashMap<String, ChannelMode>,
}

impl Default for ChannelModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_mode: ChannelMode::Live,
            channels: HashMap::new(),
        }
    }
}

impl ChannelModeConfig {
    pub fn mode_for(&self, channel: &str) -> ChannelMode {
        if !self.enabled {
            return ChannelMode::Off;
        }
        self.channels
            .get(channel)
            .copied()
            .unwrap_or(self.default_mode)
    }
}

/// Memory subsystem tunables. The caps only apply while the subsystem is
/// enabled; with it disabled the assembler falls back to pure token budgeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HippocampusConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Fixed embedding dimensionality for the cold store.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// How many hot facts the system floor lists.
    #[serde(default = "default_hot_fact_limit")]
    pub hot_fact_limit: usize,
    /// Foreground soft cap: maximum messages per turn.
    #[serde(default = "default_foreground_message_cap")]
    pub foreground_message_cap: usize,
    /// Foreground soft cap: maximum accumulated tokens.
    #[serde(default = "default_foreground_token_cap")]
    pub foreground_token_cap: usize,
    /// Background channels idle longer than this are dropped from context.
    #[serde(default = "default_background_cutoff_hours")]
    pub background_cutoff_hours: i64,
}

impl Default for HippocampusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_dim: default_embedding_dim(),
            hot_fact_limit: default_hot_fact_limit(),
            foreground_message_cap: default_foreground_message_cap(),
            foreground_token_cap: default_foreground_token_cap(),
            background_cutoff_hours: default_background_cutoff_hours(),
        }
    }
}

/// Inclusive weight range, serialized as a two-element TOML array.
pub type WeightRange = [u8; 2];

/// Weight→tier ranges for the router dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRanges {
    #[serde(default = "default_haiku_range")]
    pub haiku: WeightRange,
    #[serde(default = "default_sonnet_range")]
    pub sonnet: WeightRange,
    #[serde(default = "default_opus_range")]
    pub opus: WeightRange,
}

impl Default for TierRanges {
    fn default() -> Self {
        Self {
            haiku: default_haiku_range(),
            sonnet: default_sonnet_range(),
            opus: default_opus_range(),
        }
    }
}

/// Model ids handed to the executor per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default = "default_haiku_model")]
    pub haiku: String,
    #[serde(default = "default_sonnet_model")]
    pub sonnet: String,
    #[serde(default = "default_opus_model")]
    pub opus: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            haiku: default_haiku_model(),
            sonnet: default_sonnet_model(),
            opus: default_opus_model(),
        }
    }
}

/// Router pipeline tunables. The retry delay and hang threshold are tuned by
/// observation; keep them configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub tiers: TierRanges,
    #[serde(default)]
    pub models: TierModels,
    /// Weight used when the evaluator fails outright.
    #[serde(default = "default_fallback_weight")]
    pub fallback_weight: u8,
    /// Minimum age of a pending row before the retry dequeue picks it up.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// An in-execution job without a checkpoint for this long is stale.
    #[serde(default = "default_hang_threshold_secs")]
    pub hang_threshold_secs: u64,
    /// Stale jobs are retried this many times before failing permanently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_evaluator_timeout_secs")]
    pub evaluator_timeout_secs: u64,
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,
    /// Queue poll cadence, in milliseconds.
    #[serde(default = "default_router_poll_ms")]
    pub poll_interval_ms: u64,
    /// Watchdog tick cadence, in seconds.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tiers: TierRanges::default(),
            models: TierModels::default(),
            fallback_weight: default_fallback_weight(),
            retry_delay_secs: default_retry_delay_secs(),
            hang_threshold_secs: default_hang_threshold_secs(),
            max_retries: default_max_retries(),
            evaluator_timeout_secs: default_evaluator_timeout_secs(),
            executor_timeout_secs: default_executor_timeout_secs(),
            poll_interval_ms: default_router_poll_ms(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

/// Background maintenance (compactor, fact extractor, evictor) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GardenerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Compactor/extractor tick cadence, in seconds.
    #[serde(default = "default_compact_interval_secs")]
    pub compact_interval_secs: u64,
    /// Foreground channels idle this long drop to background.
    #[serde(default = "default_background_after_hours")]
    pub background_after_hours: i64,
    /// Background channels idle this long drop to archived.
    #[serde(default = "default_archive_after_hours")]
    pub archive_after_hours: i64,
    /// A channel's log is compacted once it exceeds this many rows.
    #[serde(default = "default_extract_threshold_rows")]
    pub extract_threshold_rows: u64,
    /// How many of the oldest rows each compaction pass consumes.
    #[serde(default = "default_extract_batch")]
    pub extract_batch: usize,
    /// Evictor tick cadence, in seconds.
    #[serde(default = "default_evict_interval_secs")]
    pub evict_interval_secs: u64,
    /// Hot facts untouched this long are eviction candidates…
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    /// …as long as their hit count stays at or below this.
    #[serde(default = "default_stale_max_hits")]
    pub stale_max_hits: u32,
}

impl Default for GardenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compact_interval_secs: default_compact_interval_secs(),
            background_after_hours: default_background_after_hours(),
            archive_after_hours: default_archive_after_hours(),
            extract_threshold_rows: default_extract_threshold_rows(),
            extract_batch: default_extract_batch(),
            evict_interval_secs: default_evict_interval_secs(),
            stale_after_days: default_stale_after_days(),
            stale_max_hits: default_stale_max_hits(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_compact_interval_secs() -> u64 {
    600
}
fn default_background_after_hours() -> i64 {
    6
}
fn default_archive_after_hours() -> i64 {
    72
}
fn default_extract_threshold_rows() -> u64 {
    40
}
fn default_extract_batch() -> usize {
    20
}
fn default_evict_interval_secs() -> u64 {
    3_600
}
fn default_stale_after_days() -> i64 {
    14
}
fn default_stale_max_hits() -> u32 {
    2
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.db", home)
}
fn default_workspace_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/workspace", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.toml", home)
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_max_tool_rounds() -> u32 {
    5
}
fn default_context_budget() -> usize {
    16_000
}
fn default_embedding_dim() -> usize {
    768
}
fn default_hot_fact_limit() -> usize {
    50
}
fn default_foreground_message_cap() -> usize {
    20
}
fn default_foreground_token_cap() -> usize {
    4_000
}
fn default_background_cutoff_hours() -> i64 {
    24
}
fn default_haiku_range() -> WeightRange {
    [1, 3]
}
fn default_sonnet_range() -> WeightRange {
    [4, 7]
}
fn default_opus_range() -> WeightRange {
    [8, 10]
}
fn default_haiku_model() -> String {
    "anthropic/claude-haiku-4-5".to_string()
}
fn default_sonnet_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}
fn default_opus_model() -> String {
    "anthropic/claude-opus-4-6".to_string()
}
fn default_fallback_weight() -> u8 {
    5
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_hang_threshold_secs() -> u64 {
    90
}
fn default_max_retries() -> u32 {
    2
}
fn default_evaluator_timeout_secs() -> u64 {
    10
}
fn default_executor_timeout_secs() -> u64 {
    300
}
fn default_router_poll_ms() -> u64 {
    500
}
fn default_watchdog_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let cfg = CortexConfig::default();
        assert_eq!(cfg.router.retry_delay_secs, 5);
        assert_eq!(cfg.router.hang_threshold_secs, 90);
        assert_eq!(cfg.router.tiers.sonnet, [4, 7]);
        assert_eq!(cfg.pipeline.max_tool_rounds, 5);
        assert_eq!(cfg.hippocampus.foreground_token_cap, 4_000);
    }

    #[test]
    fn channel_mode_falls_back_to_default() {
        let mut cfg = ChannelModeConfig::default();
        cfg.channels.insert("whatsapp".to_string(), ChannelMode::Shadow);
        assert_eq!(cfg.mode_for("whatsapp"), ChannelMode::Shadow);
        assert_eq!(cfg.mode_for("telegram"), ChannelMode::Live);

        cfg.enabled = false;
        assert_eq!(cfg.mode_for("whatsapp"), ChannelMode::Off);
    }
}
