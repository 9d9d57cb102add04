// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SupervisorError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SupervisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.supervisor, raw.watchdog, raw.worker))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_workers(cfg)?;
    validate_supervisor_section(cfg)?;
    validate_watchdog_section(cfg)?;
    validate_workers(cfg)?;
    Ok(())
}

fn ensure_has_workers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.is_empty() {
        return Err(SupervisorError::ConfigError(
            "config must contain at least one [worker.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_supervisor_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.supervisor.poll_interval_ms == 0 {
        return Err(SupervisorError::ConfigError(
            "[supervisor].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.supervisor.host.trim().is_empty() {
        return Err(SupervisorError::ConfigError(
            "[supervisor].host must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_watchdog_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.watchdog.enabled && cfg.watchdog.ping_interval_ms == 0 {
        return Err(SupervisorError::ConfigError(
            "[watchdog].ping_interval_ms must be >= 1 when the watchdog is enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(cfg: &RawConfigFile) -> Result<()> {
    for (name, spec) in cfg.worker.iter() {
        if spec.cmd.trim().is_empty() {
            return Err(SupervisorError::ConfigError(format!(
                "worker '{}' has an empty `cmd`",
                name
            )));
        }
    }
    Ok(())
}
