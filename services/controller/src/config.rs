use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::admission::{AdmissionPolicy, StealOrder, UsageEstimator};
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub reconcile_interval: Duration,
    /// JSON-lines event file; `None` disables the file sink.
    pub event_log: Option<String>,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` uses the process
    /// environment.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr = var("HOTPLUG_LISTEN_ADDR", "0.0.0.0:5000")
            .parse()
            .context("HOTPLUG_LISTEN_ADDR")?;

        let log_level = var("HOTPLUG_LOG_LEVEL", "info");

        let reconcile_interval = Duration::from_millis(positive(
            "HOTPLUG_RECONCILE_INTERVAL_MS",
            &var("HOTPLUG_RECONCILE_INTERVAL_MS", "1000"),
        )?);

        let agent_timeout = Duration::from_millis(
            var("HOTPLUG_AGENT_TIMEOUT_MS", "6000")
                .parse()
                .context("HOTPLUG_AGENT_TIMEOUT_MS")?,
        );

        let policy = AdmissionPolicy {
            min_cores_per_job: var("HOTPLUG_MIN_CORES_PER_JOB", "1")
                .parse()
                .context("HOTPLUG_MIN_CORES_PER_JOB")?,
            reserve_cores: var("HOTPLUG_RESERVE_CORES", "0")
                .parse()
                .context("HOTPLUG_RESERVE_CORES")?,
            estimator: var("HOTPLUG_USAGE_ESTIMATOR", "ceil")
                .parse::<UsageEstimator>()
                .map_err(anyhow::Error::msg)
                .context("HOTPLUG_USAGE_ESTIMATOR")?,
            steal_order: var("HOTPLUG_STEAL_ORDER", "largest_spare")
                .parse::<StealOrder>()
                .map_err(anyhow::Error::msg)
                .context("HOTPLUG_STEAL_ORDER")?,
        };

        let event_log = match var("HOTPLUG_EVENT_LOG", "alloc_log.jsonl").trim() {
            "" | "-" => None,
            path => Some(path.to_string()),
        };

        let scheduler = SchedulerConfig {
            policy,
            mailbox_size: positive("HOTPLUG_MAILBOX_SIZE", &var("HOTPLUG_MAILBOX_SIZE", "256"))?,
            activity_capacity: var("HOTPLUG_ACTIVITY_CAPACITY", "400")
                .parse()
                .context("HOTPLUG_ACTIVITY_CAPACITY")?,
            agent_timeout,
        };

        Ok(Self {
            listen_addr,
            log_level,
            reconcile_interval,
            event_log,
            scheduler,
        })
    }
}

/// Parses a value that must be at least 1.
fn positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: T = raw.parse().context(key.to_string())?;
    if value == T::default() {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(value)
}
