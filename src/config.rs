use crate::limits::DEFAULT_MAX_SERIES_INSTANCES;
use crate::timezone::FALLBACK_ZONE;

/// Process-level engine settings. Organization policy lives in the settings
/// repository, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Zone used when neither the location nor the organization names one.
    pub fallback_timezone: String,
    pub notify_workers: usize,
    pub notify_queue: usize,
    pub max_series_instances: usize,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_timezone: FALLBACK_ZONE.to_string(),
            notify_workers: 2,
            notify_queue: 1024,
            max_series_instances: DEFAULT_MAX_SERIES_INSTANCES,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    /// Read `DESKBOOK_*` variables; unset or unparseable values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let fallback_timezone = lookup("DESKBOOK_DEFAULT_TIMEZONE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(d.fallback_timezone);
        let notify_workers: usize = lookup("DESKBOOK_NOTIFY_WORKERS")
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(d.notify_workers);
        let notify_queue: usize = lookup("DESKBOOK_NOTIFY_QUEUE")
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(d.notify_queue);
        let max_series_instances: usize = lookup("DESKBOOK_MAX_SERIES_INSTANCES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.max_series_instances);
        let metrics_port: Option<u16> = lookup("DESKBOOK_METRICS_PORT").and_then(|s| s.parse().ok());
        Self {
            fallback_timezone,
            notify_workers,
            notify_queue,
            max_series_instances,
            metrics_port,
        }
    }
}
