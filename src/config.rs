//! Outbound Core Configuration
//!
//! Configuration for the upstream bank client, the regulator webhook, and
//! the background scheduler. Supports loading from environment variables
//! with an OUTBOUND_ prefix.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{OutboundError, OutboundResult};

/// Upstream bank API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream bank API
    pub base_url: String,
    /// Bearer token for the upstream API
    pub api_key: String,
    /// Maximum retry attempts for transient failures (0 = no retries)
    #[serde(default)]
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds (0 = no delay between retries)
    #[serde(default)]
    pub retry_initial_ms: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: u64,
}

fn default_upstream_timeout() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            max_retries: 0,
            retry_initial_ms: 0,
            timeout_seconds: 10,
        }
    }
}

/// Regulator webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorConfig {
    /// Target URL for terminal-transfer notifications
    pub webhook_url: String,
    /// Retry backoff base in seconds
    #[serde(default = "default_retry_initial")]
    pub retry_initial_seconds: u64,
    /// Retry backoff cap in seconds
    #[serde(default = "default_retry_max")]
    pub retry_max_seconds: u64,
}

fn default_retry_initial() -> u64 {
    2
}

fn default_retry_max() -> u64 {
    60
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            retry_initial_seconds: 2,
            retry_max_seconds: 60,
        }
    }
}

/// Background scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in seconds; each tick runs one reconcile pass then one
    /// notification retry pass
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

fn default_interval() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
        }
    }
}

/// Outbound core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Upstream bank client configuration
    pub upstream: UpstreamConfig,
    /// Regulator webhook configuration
    pub regulator: RegulatorConfig,
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl OutboundConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - OUTBOUND_UPSTREAM_BASE_URL: upstream bank API base URL
    /// - OUTBOUND_UPSTREAM_API_KEY: upstream bearer token
    /// - OUTBOUND_UPSTREAM_MAX_RETRIES: retry attempts for transient failures
    /// - OUTBOUND_UPSTREAM_RETRY_INITIAL_MS: initial retry backoff in ms
    /// - OUTBOUND_UPSTREAM_TIMEOUT_SECONDS: per-request timeout
    /// - OUTBOUND_SCHEDULER_INTERVAL_SECONDS: tick interval
    /// - OUTBOUND_RECONCILER_POLL_INTERVAL_SECONDS: deprecated alias, accepted
    ///   but superseded by the scheduler interval
    /// - OUTBOUND_REGULATOR_WEBHOOK_URL: regulator webhook target
    /// - OUTBOUND_REGULATOR_RETRY_INITIAL_SECONDS: backoff base
    /// - OUTBOUND_REGULATOR_RETRY_MAX_SECONDS: backoff cap
    pub fn from_env() -> Self {
        // Deprecated alias: honored only when the scheduler interval is unset.
        let legacy_poll_interval = env_parse("OUTBOUND_RECONCILER_POLL_INTERVAL_SECONDS");
        let interval_seconds = env_parse("OUTBOUND_SCHEDULER_INTERVAL_SECONDS")
            .or(legacy_poll_interval)
            .unwrap_or_else(default_interval);

        Self {
            upstream: UpstreamConfig {
                base_url: env::var("OUTBOUND_UPSTREAM_BASE_URL").unwrap_or_default(),
                api_key: env::var("OUTBOUND_UPSTREAM_API_KEY").unwrap_or_default(),
                max_retries: env_parse("OUTBOUND_UPSTREAM_MAX_RETRIES").unwrap_or(0),
                retry_initial_ms: env_parse("OUTBOUND_UPSTREAM_RETRY_INITIAL_MS").unwrap_or(0),
                timeout_seconds: env_parse("OUTBOUND_UPSTREAM_TIMEOUT_SECONDS")
                    .unwrap_or_else(default_upstream_timeout),
            },
            regulator: RegulatorConfig {
                webhook_url: env::var("OUTBOUND_REGULATOR_WEBHOOK_URL").unwrap_or_default(),
                retry_initial_seconds: env_parse("OUTBOUND_REGULATOR_RETRY_INITIAL_SECONDS")
                    .unwrap_or_else(default_retry_initial),
                retry_max_seconds: env_parse("OUTBOUND_REGULATOR_RETRY_MAX_SECONDS")
                    .unwrap_or_else(default_retry_max),
            },
            scheduler: SchedulerConfig { interval_seconds },
        }
    }

    /// Create a development configuration pointing at localhost endpoints
    pub fn development() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "http://127.0.0.1:9400".to_string(),
                api_key: "dev-api-key".to_string(),
                max_retries: 0,
                retry_initial_ms: 0,
                timeout_seconds: 10,
            },
            regulator: RegulatorConfig {
                webhook_url: "http://127.0.0.1:9401/regulator/webhook".to_string(),
                retry_initial_seconds: 2,
                retry_max_seconds: 60,
            },
            scheduler: SchedulerConfig {
                interval_seconds: 1,
            },
        }
    }

    /// Validate required fields and invariants
    pub fn validate(&self) -> OutboundResult<()> {
        if self.upstream.base_url.is_empty() {
            return Err(OutboundError::Configuration(
                "upstream.base_url is required".to_string(),
            ));
        }
        if self.upstream.api_key.is_empty() {
            return Err(OutboundError::Configuration(
                "upstream.api_key is required".to_string(),
            ));
        }
        if self.regulator.webhook_url.is_empty() {
            return Err(OutboundError::Configuration(
                "regulator.webhook_url is required".to_string(),
            ));
        }
        if self.scheduler.interval_seconds == 0 {
            return Err(OutboundError::Configuration(
                "scheduler.interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.regulator.retry_initial_seconds == 0 {
            return Err(OutboundError::Configuration(
                "regulator.retry_initial_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
