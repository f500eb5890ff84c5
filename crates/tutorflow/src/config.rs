use std::str::FromStr;
use std::time::Duration;

use crate::jobs::{Backoff, ExecutionMode, RetryConfig};
use crate::queue::QueueConfig;

/// Runtime configuration for the worker process, read from the environment
/// (and `.env`, if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub json_logs: bool,

    pub poll_interval_ms: u64,
    pub poll_concurrency: usize,
    pub candidate_batch: i64,
    pub lease_seconds: u64,
    pub reap_interval_seconds: u64,
    /// 0 disables the default handler timeout.
    pub handler_timeout_seconds: u64,
    pub drain_timeout_seconds: u64,
    pub default_max_attempts: i32,
    pub max_payload_bytes: usize,
    pub execution_mode: ExecutionMode,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("TUTORFLOW_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("TUTORFLOW_DATABASE_URL (or DATABASE_URL) is missing"))?;

        let worker_id = env_or_fallback("TUTORFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let api_addr = env_or_fallback("TUTORFLOW_API_ADDR", "API_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        // an unknown mode is a startup error, never a silent fallback to skip
        let execution_mode = match env_or_fallback("TUTORFLOW_EXECUTION_MODE", "EXECUTION_MODE") {
            Some(s) => ExecutionMode::from_str(&s).map_err(anyhow::Error::msg)?,
            None => ExecutionMode::Live,
        };

        let backoff = match std::env::var("TUTORFLOW_RETRY_BACKOFF").ok() {
            Some(s) if !s.trim().is_empty() => Backoff::from_str(&s).map_err(anyhow::Error::msg)?,
            _ => Backoff::Exponential,
        };
        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            backoff,
            base_seconds: env_parse("TUTORFLOW_RETRY_BASE_SECONDS")
                .unwrap_or(retry_defaults.base_seconds),
            max_seconds: env_parse("TUTORFLOW_RETRY_MAX_SECONDS")
                .unwrap_or(retry_defaults.max_seconds),
            jitter_pct: env_parse::<f64>("TUTORFLOW_RETRY_JITTER_PCT")
                .unwrap_or(retry_defaults.jitter_pct)
                .clamp(0.0, 1.0),
        };

        let cfg = Self {
            database_url,
            worker_id,
            api_addr,
            migrate_on_startup: env_bool("TUTORFLOW_MIGRATE_ON_STARTUP").unwrap_or(false),
            json_logs: env_bool("TUTORFLOW_LOG_JSON").unwrap_or(false),
            poll_interval_ms: env_parse("TUTORFLOW_POLL_INTERVAL_MS")
                .unwrap_or(1_000)
                .max(10),
            poll_concurrency: env_parse("TUTORFLOW_POLL_CONCURRENCY")
                .unwrap_or(1)
                .clamp(1, 64),
            candidate_batch: env_parse("TUTORFLOW_CANDIDATE_BATCH")
                .unwrap_or(10)
                .clamp(1, 1_000),
            lease_seconds: env_or_fallback("TUTORFLOW_LEASE_SECONDS", "LEASE_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(300)
                .max(1),
            reap_interval_seconds: env_parse("TUTORFLOW_REAP_INTERVAL_SECONDS")
                .unwrap_or(30)
                .max(1),
            handler_timeout_seconds: env_parse("TUTORFLOW_HANDLER_TIMEOUT_SECONDS").unwrap_or(60),
            drain_timeout_seconds: env_parse("TUTORFLOW_DRAIN_TIMEOUT_SECONDS").unwrap_or(30),
            default_max_attempts: env_or_fallback("TUTORFLOW_MAX_ATTEMPTS", "MAX_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(3)
                .max(1),
            max_payload_bytes: env_or_fallback("TUTORFLOW_MAX_PAYLOAD_BYTES", "MAX_PAYLOAD_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256 * 1024),
            execution_mode,
            retry,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Running leases are renewed on every reap pass, so a pass has to come
    /// around before a fresh lease can run out.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reap_interval_seconds >= self.lease_seconds {
            anyhow::bail!(
                "TUTORFLOW_REAP_INTERVAL_SECONDS ({}) must be shorter than TUTORFLOW_LEASE_SECONDS ({})",
                self.reap_interval_seconds,
                self.lease_seconds
            );
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            worker_id: self.worker_id.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_concurrency: self.poll_concurrency,
            candidate_batch: self.candidate_batch,
            lease: Duration::from_secs(self.lease_seconds),
            reap_interval: Duration::from_secs(self.reap_interval_seconds),
            handler_timeout: (self.handler_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.handler_timeout_seconds)),
            drain_timeout: Duration::from_secs(self.drain_timeout_seconds),
            default_priority: 0,
            default_max_attempts: self.default_max_attempts,
            max_payload_bytes: self.max_payload_bytes,
            execution_mode: self.execution_mode,
            retry: self.retry.clone(),
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
