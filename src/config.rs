use std::{env, str::FromStr, time::Duration};

use crate::error::ConfigError;

const PORT: &str = "PORT";
const ALPHA_VANTAGE_API_KEY: &str = "ALPHA_VANTAGE_API_KEY";
const ALPHA_VANTAGE_BASE_URL: &str = "ALPHA_VANTAGE_BASE_URL";
const PROVIDER_TIMEOUT_SECS: &str = "PROVIDER_TIMEOUT_SECS";
const DASHBOARD_API_BASE: &str = "DASHBOARD_API_BASE";
const DASHBOARD_REFRESH_SECS: &str = "DASHBOARD_REFRESH_SECS";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub provider: ProviderConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Absent or empty means the stock endpoint answers 500 without calling out.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Prefix the page puts in front of `/stock/...`; empty is same origin.
    pub api_base: String,
    pub refresh: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            provider: ProviderConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            api_base: String::new(),
            refresh: DEFAULT_REFRESH,
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty(PORT) {
            Some(v) => parse::<u16>(PORT, &v)?,
            None => DEFAULT_PORT,
        };

        let timeout = match non_empty(PROVIDER_TIMEOUT_SECS) {
            Some(v) => positive_secs(PROVIDER_TIMEOUT_SECS, &v)?,
            None => DEFAULT_PROVIDER_TIMEOUT,
        };

        let refresh = match non_empty(DASHBOARD_REFRESH_SECS) {
            Some(v) => positive_secs(DASHBOARD_REFRESH_SECS, &v)?,
            None => DEFAULT_REFRESH,
        };

        Ok(Config {
            port,
            provider: ProviderConfig {
                api_key: non_empty(ALPHA_VANTAGE_API_KEY),
                base_url: non_empty(ALPHA_VANTAGE_BASE_URL)
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                timeout,
            },
            dashboard: DashboardConfig {
                api_base: lookup(DASHBOARD_API_BASE)
                    .map(|v| v.trim().trim_end_matches('/').to_string())
                    .unwrap_or_default(),
                refresh,
            },
        })
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|why| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: why.to_string(),
    })
}

fn positive_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse::<u64>(key, value)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let vars: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

#[test]
pub fn test_defaults_when_nothing_is_set() {
    let config = config_from(&[]).unwrap();
    assert_eq!(config.port, 3000);
    assert!(config.provider.api_key.is_none());
    assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.provider.timeout, Duration::from_secs(10));
    assert_eq!(config.dashboard.api_base, "");
    assert_eq!(config.dashboard.refresh, Duration::from_secs(60));
}

#[test]
pub fn test_reads_every_key() {
    let config = config_from(&[
        ("PORT", "8080"),
        ("ALPHA_VANTAGE_API_KEY", "demo"),
        ("ALPHA_VANTAGE_BASE_URL", "http://127.0.0.1:9000/query"),
        ("PROVIDER_TIMEOUT_SECS", "3"),
        ("DASHBOARD_API_BASE", "http://relay.local:8080/"),
        ("DASHBOARD_REFRESH_SECS", "15"),
    ])
    .unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.provider.api_key.as_deref(), Some("demo"));
    assert_eq!(config.provider.base_url, "http://127.0.0.1:9000/query");
    assert_eq!(config.provider.timeout, Duration::from_secs(3));
    assert_eq!(config.dashboard.api_base, "http://relay.local:8080");
    assert_eq!(config.dashboard.refresh, Duration::from_secs(15));
}

#[test]
pub fn test_blank_api_key_counts_as_missing() {
    let config = config_from(&[("ALPHA_VANTAGE_API_KEY", "  ")]).unwrap();
    assert!(config.provider.api_key.is_none());
}

#[test]
pub fn test_bad_port_is_rejected() {
    let err = config_from(&[("PORT", "seventy")]).unwrap_err();
    assert!(err.to_string().contains("PORT"));
    assert!(config_from(&[("PORT", "70000")]).is_err());
}

#[test]
pub fn test_zero_timeout_is_rejected() {
    assert!(config_from(&[("PROVIDER_TIMEOUT_SECS", "0")]).is_err());
}
