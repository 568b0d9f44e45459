// src/config/validate.rs

use crate::config::duration::parse_duration;
use crate::config::model::{Config, RawConfig};
use crate::errors::{Result, StackdError};
use crate::state::parse_proxy;

impl TryFrom<RawConfig> for Config {
    type Error = StackdError;

    fn try_from(raw: RawConfig) -> std::result::Result<Self, Self::Error> {
        validate_paths(&raw)?;
        validate_setup(&raw)?;
        let worker_timeout = match raw.worker.timeout.as_deref() {
            Some(spec) => {
                let timeout = parse_duration(spec).map_err(|e| {
                    StackdError::ConfigError(format!("[worker].timeout: {e}"))
                })?;
                if timeout.is_zero() {
                    return Err(StackdError::ConfigError(
                        "[worker].timeout must be greater than zero".to_string(),
                    ));
                }
                Some(timeout)
            }
            None => None,
        };

        let proxy = raw
            .setup
            .proxy
            .on
            .then(|| parse_proxy(&raw.setup.proxy.proxy));

        Ok(Config {
            run_dir: raw.paths.run_dir,
            static_dir: raw.paths.static_dir,
            lang: raw.setup.lang,
            password: raw.setup.password.filter(|p| !p.is_empty()),
            hosts_file: raw.setup.hosts_file,
            proxy,
            worker_timeout,
        })
    }
}

fn validate_paths(cfg: &RawConfig) -> Result<()> {
    if cfg.paths.run_dir.as_os_str().is_empty() {
        return Err(StackdError::ConfigError(
            "[paths].run_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_setup(cfg: &RawConfig) -> Result<()> {
    if cfg.setup.lang.as_deref().is_some_and(|l| l.trim().is_empty()) {
        return Err(StackdError::ConfigError(
            "[setup].lang must not be empty when set".to_string(),
        ));
    }
    if cfg.setup.proxy.on && parse_proxy(&cfg.setup.proxy.proxy).is_empty() {
        return Err(StackdError::ConfigError(
            "[setup.proxy] is on but `proxy` has no key=value pairs".to_string(),
        ));
    }
    Ok(())
}

/// Validate an already parsed raw config without keeping the result.
pub fn validate_config(cfg: &RawConfig) -> Result<()> {
    Config::try_from(cfg.clone()).map(|_| ())
}
