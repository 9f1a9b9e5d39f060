//! Process-wide application settings.
//!
//! [`Config::default`] suits development; [`Config::from_env`] reads the
//! overrides below and falls back to the defaults for anything unset or
//! unparsable.
//!
//! | Variable                 | Field               | Default       |
//! |--------------------------|---------------------|---------------|
//! | `RKOA_ENV`               | `env`               | `development` |
//! | `RKOA_SILENT`            | `silent`            | `false`       |
//! | `RKOA_TIMEOUT_MS`        | `timeout` (0 = off) | 30 000 ms     |
//! | `RKOA_MAX_REQUEST_BYTES` | `max_request_size`  | 8 MiB         |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on one run of the middleware chain.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size of a complete HTTP request we buffer before rejecting it (8 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Deployment mode. Only affects how verbose error diagnostics are.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Development,
    Production,
    Test,
    #[serde(untagged)]
    Other(String),
}

impl Env {
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Env {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Other(name.trim().to_owned()),
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings fixed when the application is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub env: Env,
    /// Suppresses the default error reporter entirely.
    pub silent: bool,
    /// Upper bound on the middleware chain; `None` disables it.
    pub timeout: Option<Duration>,
    pub max_request_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: Env::Development,
            silent: false,
            timeout: Some(DEFAULT_TIMEOUT),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl Config {
    /// Reads the `RKOA_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(env) = lookup("RKOA_ENV") {
            config.env = Env::from(env.as_str());
        }
        if let Some(silent) = lookup("RKOA_SILENT") {
            config.silent = matches!(silent.trim(), "1" | "true" | "yes");
        }
        if let Some(ms) = lookup("RKOA_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            config.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = lookup("RKOA_MAX_REQUEST_BYTES").and_then(|v| v.trim().parse().ok()) {
            config.max_request_size = max;
        }

        config
    }

    #[must_use]
    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("RKOA_ENV", "production"),
            ("RKOA_SILENT", "true"),
            ("RKOA_TIMEOUT_MS", "250"),
            ("RKOA_MAX_REQUEST_BYTES", "1024"),
        ]));
        assert_eq!(config.env, Env::Production);
        assert!(config.silent);
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_request_size, 1024);
    }

    #[test]
    fn zero_timeout_disables() {
        let config = Config::from_lookup(lookup(&[("RKOA_TIMEOUT_MS", "0")]));
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn unknown_env_kept_verbatim() {
        assert_eq!(Env::from("staging"), Env::Other("staging".into()));
        assert!(!Env::from("staging").is_development());
        assert!(Env::from("").is_development());
    }
}
