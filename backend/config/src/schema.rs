//! TalentForge runtime configuration schema.
//!
//! Typed for serde YAML deserialization. Every section is optional in
//! the file; `defaults::apply_all_defaults` fills the gaps after load.

use serde::{Deserialize, Serialize};

/// Root configuration for TalentForge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalentForgeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Defaults to
    /// `<config dir>/talentforge.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Worker poll interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_seconds: Option<u64>,

    /// Maximum tasks claimed per worker pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_limit: Option<usize>,

    /// How long a claim lease lives before the reaper may reclaim it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaper_interval_seconds: Option<u64>,

    /// Scheduler log rows older than this are pruned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// How often the dispatch loop plans pending items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "talentforge=debug".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Emit JSON-formatted logs instead of the human format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}
