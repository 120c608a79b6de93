//! Operator configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ControllerError;

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespaces that get a controller group at startup
    pub namespaces: Vec<String>,
    /// Worker loops launched per queue-bearing controller
    pub workers_per_controller: usize,
    /// Rate-limited retries before a failing key is dropped
    pub max_retries: u32,
    /// Periodic resync of informer caches (zero disables resync)
    pub resync_interval: Duration,
    /// Upper bound on waiting for workers to drain when a group is removed
    pub shutdown_timeout: Duration,
    /// Listen address of the probe and metrics server
    pub probe_addr: SocketAddr,
}

/// The part of the configuration every controller group needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub workers_per_controller: usize,
    pub max_retries: u32,
    pub resync_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers_per_controller: 1,
            max_retries: 5,
            resync_interval: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ControllerSettings::default();

        let namespaces = parse_namespaces(lookup("WATCH_NAMESPACES").as_deref().unwrap_or("default"));
        if namespaces.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "WATCH_NAMESPACES must name at least one namespace".to_string(),
            ));
        }

        let workers_per_controller: usize =
            parse_var(&lookup, "WORKERS_PER_CONTROLLER", defaults.workers_per_controller)?;
        if workers_per_controller == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKERS_PER_CONTROLLER must be at least 1".to_string(),
            ));
        }

        let max_retries = parse_var(&lookup, "MAX_RETRIES", defaults.max_retries)?;
        let resync_secs = parse_var(&lookup, "RESYNC_INTERVAL_SECS", defaults.resync_interval.as_secs())?;
        let shutdown_secs =
            parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout.as_secs())?;
        let probe_addr = parse_var(
            &lookup,
            "PROBE_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;

        Ok(Self {
            namespaces,
            workers_per_controller,
            max_retries,
            resync_interval: Duration::from_secs(resync_secs),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            probe_addr,
        })
    }

    /// Settings handed to every controller group.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            workers_per_controller: self.workers_per_controller,
            max_retries: self.max_retries,
            resync_interval: self.resync_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Splits a comma-separated namespace list, dropping blanks and duplicates.
fn parse_namespaces(raw: &str) -> Vec<String> {
    let mut namespaces: Vec<String> = Vec::new();
    for ns in raw.split(',').map(str::trim).filter(|ns| !ns.is_empty()) {
        if !namespaces.iter().any(|existing| existing == ns) {
            namespaces.push(ns.to_string());
        }
    }
    namespaces
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{name}={raw:?} is not valid: {e}"))
        }),
        _ => Ok(default),
    }
}
