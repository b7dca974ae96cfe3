//! Config defaults: applies sensible default values to parsed config.

use crate::schema::{
    LoggingConfig, PipelineConfig, RetryConfig, SchedulerConfig, TalentForgeConfig,
};

/// Default worker poll interval.
pub const DEFAULT_TICK_SECONDS: u64 = 30;

/// Default max tasks claimed per worker pass.
pub const DEFAULT_CLAIM_LIMIT: usize = 10;

/// Default claim lease lifetime.
pub const DEFAULT_LEASE_SECONDS: u64 = 600;

/// Default reaper pass interval.
pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 60;

/// Default scheduler log retention.
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;

/// Default pipeline dispatch planning interval.
pub const DEFAULT_DISPATCH_INTERVAL_SECONDS: u64 = 300;

/// Default retry attempts before a recurring task is parked.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay before the first retry.
pub const DEFAULT_RETRY_BASE_DELAY_SECONDS: u64 = 60;

/// Default exponential backoff factor.
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Default retry delay cap.
pub const DEFAULT_RETRY_MAX_DELAY_SECONDS: u64 = 3_600;

/// Default log level filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: TalentForgeConfig) -> TalentForgeConfig {
    let config = apply_scheduler_defaults(config);
    let config = apply_pipeline_defaults(config);
    apply_logging_defaults(config)
}

fn apply_scheduler_defaults(mut config: TalentForgeConfig) -> TalentForgeConfig {
    let scheduler = config.scheduler.get_or_insert_with(SchedulerConfig::default);

    if scheduler.tick_seconds.is_none() {
        scheduler.tick_seconds = Some(DEFAULT_TICK_SECONDS);
    }
    if scheduler.claim_limit.is_none() {
        scheduler.claim_limit = Some(DEFAULT_CLAIM_LIMIT);
    }
    if scheduler.lease_seconds.is_none() {
        scheduler.lease_seconds = Some(DEFAULT_LEASE_SECONDS);
    }
    if scheduler.reaper_interval_seconds.is_none() {
        scheduler.reaper_interval_seconds = Some(DEFAULT_REAPER_INTERVAL_SECONDS);
    }
    if scheduler.log_retention_days.is_none() {
        scheduler.log_retention_days = Some(DEFAULT_LOG_RETENTION_DAYS);
    }

    let retry = scheduler.retry.get_or_insert_with(RetryConfig::default);
    if retry.max_attempts.is_none() {
        retry.max_attempts = Some(DEFAULT_RETRY_MAX_ATTEMPTS);
    }
    if retry.base_delay_seconds.is_none() {
        retry.base_delay_seconds = Some(DEFAULT_RETRY_BASE_DELAY_SECONDS);
    }
    if retry.backoff_factor.is_none() {
        retry.backoff_factor = Some(DEFAULT_RETRY_BACKOFF_FACTOR);
    }
    if retry.max_delay_seconds.is_none() {
        retry.max_delay_seconds = Some(DEFAULT_RETRY_MAX_DELAY_SECONDS);
    }

    config
}

fn apply_pipeline_defaults(mut config: TalentForgeConfig) -> TalentForgeConfig {
    let pipeline = config.pipeline.get_or_insert_with(PipelineConfig::default);
    if pipeline.dispatch_interval_seconds.is_none() {
        pipeline.dispatch_interval_seconds = Some(DEFAULT_DISPATCH_INTERVAL_SECONDS);
    }
    config
}

fn apply_logging_defaults(mut config: TalentForgeConfig) -> TalentForgeConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.json.is_none() {
        logging.json = Some(false);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_empty_config() {
        let cfg = apply_all_defaults(TalentForgeConfig::default());
        let scheduler = cfg.scheduler.unwrap();
        assert_eq!(scheduler.tick_seconds, Some(DEFAULT_TICK_SECONDS));
        assert_eq!(scheduler.claim_limit, Some(DEFAULT_CLAIM_LIMIT));
        assert_eq!(
            scheduler.retry.unwrap().max_attempts,
            Some(DEFAULT_RETRY_MAX_ATTEMPTS)
        );
        assert_eq!(
            cfg.pipeline.unwrap().dispatch_interval_seconds,
            Some(DEFAULT_DISPATCH_INTERVAL_SECONDS)
        );
        assert_eq!(cfg.logging.unwrap().level.as_deref(), Some(DEFAULT_LOG_LEVEL));
    }

    #[test]
    fn does_not_override_user_values() {
        let mut cfg = TalentForgeConfig::default();
        cfg.scheduler = Some(SchedulerConfig {
            tick_seconds: Some(5),
            ..Default::default()
        });
        let cfg = apply_all_defaults(cfg);
        let scheduler = cfg.scheduler.unwrap();
        assert_eq!(scheduler.tick_seconds, Some(5));
        assert_eq!(scheduler.lease_seconds, Some(DEFAULT_LEASE_SECONDS));
    }
}
