//! Runtime settings, read from `SCRY_*` environment variables.

use std::time::Duration;

use scry_logs::StreamSettings;
use scry_store::SummaryOptions;
use serde::{Deserialize, Serialize};

use crate::coordinator::DEFAULT_DETAIL_CONCURRENCY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub max_records: usize,
    pub timeout_secs: u64,
    /// Group objects by callsite. Off unless the cluster records callsites.
    pub record_callsites: bool,
    pub detail_concurrency: usize,
    pub log_tail: usize,
    pub log_poll_ms: u64,
    pub log_queue_cap: usize,
    pub metrics_addr: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_records: scry_core::DEFAULT_LIMIT,
            timeout_secs: scry_core::DEFAULT_TIMEOUT.as_secs(),
            record_callsites: false,
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
            log_tail: scry_logs::DEFAULT_TAIL_LINES,
            log_poll_ms: 250,
            log_queue_cap: 1024,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_records: env_parse("SCRY_MAX_RECORDS").unwrap_or(d.max_records),
            timeout_secs: env_parse("SCRY_TIMEOUT_SECS").unwrap_or(d.timeout_secs),
            record_callsites: env_flag("SCRY_RECORD_CALLSITES").unwrap_or(d.record_callsites),
            detail_concurrency: env_parse("SCRY_DETAIL_CONCURRENCY").unwrap_or(d.detail_concurrency),
            log_tail: env_parse("SCRY_LOG_TAIL").unwrap_or(d.log_tail),
            log_poll_ms: env_parse("SCRY_LOG_POLL_MS").unwrap_or(d.log_poll_ms),
            log_queue_cap: env_parse("SCRY_LOG_QUEUE_CAP").unwrap_or(d.log_queue_cap),
            metrics_addr: std::env::var("SCRY_METRICS_ADDR").ok().filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(self.log_poll_ms.max(1)),
            queue_cap: self.log_queue_cap.max(1),
            read_timeout: self.timeout(),
            ..StreamSettings::default()
        }
    }

    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions { record_callsites: self.record_callsites }
    }
}
