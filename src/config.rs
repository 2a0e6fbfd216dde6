use std::time::Duration;

use crate::engine::{EngineConfig, LockExpiryPolicy};
use crate::limits::DEFAULT_LOCK_WINDOW_MS;
use crate::model::Ms;

pub const DEFAULT_RESOURCES: [&str; 3] = ["Company car", "Meeting room", "Workstation"];

/// Server settings, read from `HOLDFAST_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub resources: Vec<String>,
    pub lock_window_ms: Ms,
    pub lock_expiry: LockExpiryPolicy,
    pub reap_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            max_connections: 256,
            metrics_port: None,
            resources: DEFAULT_RESOURCES.iter().map(|s| s.to_string()).collect(),
            lock_window_ms: DEFAULT_LOCK_WINDOW_MS,
            lock_expiry: LockExpiryPolicy::Advisory,
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take their
    /// defaults; set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Config::default();
        if let Some(bind) = lookup("HOLDFAST_BIND") {
            config.bind = bind;
        }
        if let Some(port) = lookup("HOLDFAST_PORT") {
            config.port = parse("HOLDFAST_PORT", &port)?;
        }
        if let Some(n) = lookup("HOLDFAST_MAX_CONNECTIONS") {
            config.max_connections = parse("HOLDFAST_MAX_CONNECTIONS", &n)?;
        }
        if let Some(port) = lookup("HOLDFAST_METRICS_PORT") {
            config.metrics_port = Some(parse("HOLDFAST_METRICS_PORT", &port)?);
        }
        if let Some(list) = lookup("HOLDFAST_RESOURCES") {
            config.resources = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(secs) = lookup("HOLDFAST_LOCK_WINDOW_SECS") {
            let secs: u32 = parse("HOLDFAST_LOCK_WINDOW_SECS", &secs)?;
            if secs == 0 {
                return Err("HOLDFAST_LOCK_WINDOW_SECS must be positive".into());
            }
            config.lock_window_ms = Ms::from(secs) * 1000;
        }
        if let Some(policy) = lookup("HOLDFAST_LOCK_EXPIRY") {
            config.lock_expiry = policy.parse()?;
        }
        if let Some(secs) = lookup("HOLDFAST_REAP_INTERVAL_SECS") {
            let secs: u64 = parse("HOLDFAST_REAP_INTERVAL_SECS", &secs)?;
            config.reap_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            lock_window_ms: self.lock_window_ms,
            lock_expiry: self.lock_expiry,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid value for {key}: {raw:?}"))
}
