//! Configuration for the managed services

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every service manager
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Private application directory (`~/.medomics`); installers unpack here
    pub data_dir: PathBuf,

    /// Where installers put downloaded archives
    pub downloads_dir: PathBuf,

    /// Port written into freshly provisioned `mongod.conf` files
    pub mongo_port: u16,

    /// Fixed port of the notebook server
    pub notebook_port: u16,

    /// How long a freshly spawned notebook server has to answer
    pub notebook_ready_timeout: Duration,

    /// Upper bound for a single probe command
    pub probe_timeout: Duration,

    /// Grace period between a polite stop request and a hard kill
    pub shutdown_timeout: Duration,

    /// Explicit python interpreter, bypassing the search
    pub python: Option<PathBuf>,

    /// Scripted answer to install prompts; `None` means ask when interactive
    pub auto_install: Option<bool>,

    pub production: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid service configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".medomics");
        let downloads_dir = dirs::download_dir().unwrap_or_else(|| data_dir.join("downloads"));

        Self {
            data_dir,
            downloads_dir,
            mongo_port: 54017,
            notebook_port: 8900,
            notebook_ready_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            python: None,
            auto_install: None,
            production: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("MEDSRV_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("MEDSRV_DOWNLOADS_DIR") {
            config.downloads_dir = PathBuf::from(dir);
        }

        if let Some(port) = lookup("MEDSRV_MONGO_PORT").and_then(|v| v.parse().ok()) {
            config.mongo_port = port;
        }

        if let Some(port) = lookup("MEDSRV_NOTEBOOK_PORT").and_then(|v| v.parse().ok()) {
            config.notebook_port = port;
        }

        if let Some(ms) = lookup("MEDSRV_NOTEBOOK_READY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.notebook_ready_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = lookup("MEDSRV_PROBE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = lookup("MEDSRV_SHUTDOWN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.shutdown_timeout = Duration::from_millis(ms);
        }

        if let Some(python) = lookup("MEDSRV_PYTHON").filter(|v| !v.is_empty()) {
            config.python = Some(PathBuf::from(python));
        }

        if let Some(val) = lookup("MEDSRV_AUTO_INSTALL") {
            config.auto_install = Some(parse_flag(&val));
        }

        if let Some(env) = lookup("MEDSRV_ENV") {
            config.production = env.eq_ignore_ascii_case("production");
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::new("data_dir cannot be empty"));
        }

        if self.notebook_port == 0 {
            return Err(ConfigError::new("notebook_port must be greater than 0"));
        }

        if self.mongo_port == 0 {
            return Err(ConfigError::new("mongo_port must be greater than 0"));
        }

        if self.notebook_ready_timeout.is_zero() {
            return Err(ConfigError::new(
                "notebook_ready_timeout must be greater than 0",
            ));
        }

        if self.probe_timeout.is_zero() {
            return Err(ConfigError::new("probe_timeout must be greater than 0"));
        }

        Ok(())
    }
}

fn parse_flag(val: &str) -> bool {
    !matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "n" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_ports() {
        let config = ServiceConfig::default();
        assert_eq!(config.notebook_port, 8900);
        assert_eq!(config.mongo_port, 54017);
        assert!(config.data_dir.ends_with(".medomics"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("MEDSRV_DATA_DIR", "/srv/medomics"),
            ("MEDSRV_NOTEBOOK_PORT", "9999"),
            ("MEDSRV_NOTEBOOK_READY_TIMEOUT_MS", "1500"),
            ("MEDSRV_AUTO_INSTALL", "no"),
            ("MEDSRV_ENV", "Production"),
            ("MEDSRV_PYTHON", ""),
        ]));

        assert_eq!(config.data_dir, PathBuf::from("/srv/medomics"));
        assert_eq!(config.notebook_port, 9999);
        assert_eq!(config.notebook_ready_timeout, Duration::from_millis(1500));
        assert_eq!(config.auto_install, Some(false));
        assert!(config.production);
        assert!(config.python.is_none());
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(&[("MEDSRV_NOTEBOOK_PORT", "abc")]));
        assert_eq!(config.notebook_port, 8900);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = ServiceConfig {
            probe_timeout: Duration::ZERO,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
