//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default number of users sent per message-listing call.
const DEFAULT_MAX_USERS_BATCH: usize = 2;

/// Default number of spam classifications allowed in flight at once.
const DEFAULT_MAX_SPAM_CHECKS: usize = 5;

/// Pipeline tuning knobs consumed by the concrete stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of users per `fetch_message_ids` call.
    pub max_users_batch: usize,
    /// Maximum number of concurrent `classify_spam` calls.
    pub max_spam_checks: usize,
    /// Optional deadline applied to each fetch/classify call.
    pub call_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_users_batch: DEFAULT_MAX_USERS_BATCH,
            max_spam_checks: DEFAULT_MAX_SPAM_CHECKS,
            call_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Build from `SPAM_PIPELINE_*` environment variables.
    ///
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let max_users_batch: usize = std::env::var("SPAM_PIPELINE_MAX_USERS_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_USERS_BATCH);

        let max_spam_checks: usize = std::env::var("SPAM_PIPELINE_MAX_SPAM_CHECKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_SPAM_CHECKS);

        let call_timeout = std::env::var("SPAM_PIPELINE_CALL_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self {
            max_users_batch,
            max_spam_checks,
            call_timeout,
        }
    }

    pub fn with_max_users_batch(mut self, max_users_batch: usize) -> Self {
        self.max_users_batch = max_users_batch;
        self
    }

    pub fn with_max_spam_checks(mut self, max_spam_checks: usize) -> Self {
        self.max_spam_checks = max_spam_checks;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Reject values that would stall the pipeline.
    ///
    /// A zero batch size never fills, and a zero-permit semaphore never admits
    /// a classification.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_users_batch == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_users_batch".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.max_spam_checks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_spam_checks".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                key: "call_timeout".into(),
                message: "must be non-zero when set".into(),
            });
        }
        Ok(())
    }
}
