use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// The prefix of environment variables that override the default configuration.
/// Nested keys are separated by double underscores, e.g. `SAIL_URL__HTTP__MAX_REDIRECTS`.
pub const CONFIG_ENV_PREFIX: &str = "SAIL_URL__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub batch_size: usize,
    pub http: HttpConfig,
    pub remote_hosts: RemoteHostsConfig,
    pub compression: CompressionConfig,
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::from(Toml::string(DEFAULT_CONFIG)).admerge(
            Env::prefixed(CONFIG_ENV_PREFIX).map(|p| p.as_str().replace("__", ".").into()),
        )
    }

    pub fn load() -> CommonResult<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> CommonResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CommonResult<()> {
        if self.batch_size == 0 {
            return Err(CommonError::config("batch size must be positive"));
        }
        if self.http.buffer_size == 0 {
            return Err(CommonError::config("HTTP buffer size must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub receive_timeout_secs: u64,
    pub max_redirects: usize,
    pub buffer_size: usize,
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteHostsConfig {
    /// Hosts (optionally with a port, as `host:port`) that may be reached.
    pub allow_hosts: Vec<String>,
    /// Regular expressions matched against the whole host or `host:port`.
    pub allow_host_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub level: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_load_default_config() {
        Jail::expect_with(|_| {
            let config = AppConfig::load().unwrap();
            assert_eq!(config.batch_size, 8192);
            assert_eq!(config.http.max_redirects, 0);
            assert_eq!(config.http.connect_timeout(), Duration::from_secs(1));
            assert_eq!(config.http.receive_timeout(), Duration::from_secs(1800));
            assert_eq!(config.http.buffer_size, 1024 * 1024);
            assert!(config.remote_hosts.allow_hosts.is_empty());
            assert_eq!(config.compression.level, 3);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("SAIL_URL__HTTP__MAX_REDIRECTS", "5");
            jail.set_env("SAIL_URL__BATCH_SIZE", "16");
            jail.set_env("SAIL_URL__REMOTE_HOSTS__ALLOW_HOSTS", "[\"example.com\"]");
            let config = AppConfig::load().unwrap();
            assert_eq!(config.http.max_redirects, 5);
            assert_eq!(config.batch_size, 16);
            assert_eq!(config.remote_hosts.allow_hosts, vec!["example.com"]);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_batch_size() {
        Jail::expect_with(|jail| {
            jail.set_env("SAIL_URL__BATCH_SIZE", "0");
            let result = AppConfig::load();
            assert!(matches!(result, Err(CommonError::InvalidConfig(_))));
            Ok(())
        });
    }
}
