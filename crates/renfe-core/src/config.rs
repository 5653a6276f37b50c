//! Scraper configuration
//!
//! Defaults match the upstream site's tolerance; every knob can be
//! overridden from the environment with [`ScraperConfig::from_env`].

use std::time::Duration;

use crate::error::{RenfeError, Result};

/// Environment variable: floor between requests, in seconds
pub const ENV_MIN_REQUEST_DELAY: &str = "MIN_REQUEST_DELAY_SECONDS";
/// Environment variable: admission cap per trailing minute
pub const ENV_MAX_REQUESTS_PER_MINUTE: &str = "MAX_REQUESTS_PER_MINUTE";
/// Environment variable: log tokens and cookies in cleartext
pub const ENV_LOG_SENSITIVE_DATA: &str = "LOG_SENSITIVE_DATA";

/// Prefixed variables take precedence over the bare names
const ENV_PREFIX: &str = "RENFE_";

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum delay between any two requests (default: 0.5s)
    pub min_delay: Duration,
    /// Maximum requests in any trailing 60 seconds (default: 10)
    pub max_requests_per_minute: u32,
    /// Base of the exponential backoff, in seconds (default: 2.0)
    pub backoff_base: f64,
    /// Upper bound of the backoff (default: 30s)
    pub backoff_max: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_requests_per_minute: 10,
            backoff_base: 2.0,
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RateLimitConfig {
    /// Check that the settings describe a usable limiter.
    ///
    /// # Errors
    /// Returns `RenfeError::Config` for a zero request cap or a backoff
    /// base that is not a finite number of at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_minute == 0 {
            return Err(RenfeError::Config(
                "max_requests_per_minute must be at least 1".to_string(),
            ));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(RenfeError::Config(
                "backoff_base must be a finite number of at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Connection establishment timeout (default: 10s)
    pub connect_timeout: Duration,
    /// Request body write budget (default: 10s)
    pub write_timeout: Duration,
    /// Response read timeout (default: 30s)
    pub read_timeout: Duration,
    /// Pool checkout budget (default: 5s)
    pub pool_timeout: Duration,
    /// Maximum redirects to follow (default: 3)
    pub max_redirects: usize,
    /// Maximum response body size in bytes (default: 10 MiB)
    pub max_response_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            pool_timeout: Duration::from_secs(5),
            max_redirects: 3,
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    /// Whole-request deadline covering all four budgets
    pub fn total_timeout(&self) -> Duration {
        self.connect_timeout + self.write_timeout + self.read_timeout + self.pool_timeout
    }
}

/// Top-level configuration for [`crate::RenfeScraper`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScraperConfig {
    pub rate_limit: RateLimitConfig,
    pub transport: TransportConfig,
    /// Log tokens, cookies and bodies in cleartext (default: false)
    pub log_sensitive_data: bool,
}

impl ScraperConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns `RenfeError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).or_else(|| lookup(name))
        };

        let mut config = ScraperConfig::default();

        if let Some(raw) = get(ENV_MIN_REQUEST_DELAY) {
            let secs: f64 = raw.trim().parse().map_err(|_| {
                RenfeError::Config(format!("{} must be a number of seconds", ENV_MIN_REQUEST_DELAY))
            })?;
            if !secs.is_finite() || !(0.0..=3600.0).contains(&secs) {
                return Err(RenfeError::Config(format!(
                    "{} must be between 0 and 3600",
                    ENV_MIN_REQUEST_DELAY
                )));
            }
            config.rate_limit.min_delay = Duration::from_secs_f64(secs);
        }

        if let Some(raw) = get(ENV_MAX_REQUESTS_PER_MINUTE) {
            let rpm: u32 = raw.trim().parse().map_err(|_| {
                RenfeError::Config(format!("{} must be a positive integer", ENV_MAX_REQUESTS_PER_MINUTE))
            })?;
            if rpm == 0 {
                return Err(RenfeError::Config(format!(
                    "{} must be at least 1",
                    ENV_MAX_REQUESTS_PER_MINUTE
                )));
            }
            config.rate_limit.max_requests_per_minute = rpm;
        }

        if let Some(raw) = get(ENV_LOG_SENSITIVE_DATA) {
            config.log_sensitive_data = parse_bool(&raw).ok_or_else(|| {
                RenfeError::Config(format!("{} must be true or false", ENV_LOG_SENSITIVE_DATA))
            })?;
        }

        config.rate_limit.validate()?;
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert_eq!(config.rate_limit.min_delay, Duration::from_millis(500));
        assert_eq!(config.rate_limit.max_requests_per_minute, 10);
        assert_eq!(config.rate_limit.backoff_base, 2.0);
        assert_eq!(config.rate_limit.backoff_max, Duration::from_secs(30));
        assert_eq!(config.transport.max_redirects, 3);
        assert!(!config.log_sensitive_data);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = ScraperConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ScraperConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = ScraperConfig::from_lookup(lookup(&[
            ("MIN_REQUEST_DELAY_SECONDS", "1.5"),
            ("MAX_REQUESTS_PER_MINUTE", "20"),
            ("LOG_SENSITIVE_DATA", "true"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit.min_delay, Duration::from_millis(1500));
        assert_eq!(config.rate_limit.max_requests_per_minute, 20);
        assert!(config.log_sensitive_data);
    }

    #[test]
    fn test_prefixed_variable_wins() {
        let config = ScraperConfig::from_lookup(lookup(&[
            ("MAX_REQUESTS_PER_MINUTE", "20"),
            ("RENFE_MAX_REQUESTS_PER_MINUTE", "5"),
        ]))
        .unwrap();
        assert_eq!(config.rate_limit.max_requests_per_minute, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ScraperConfig::from_lookup(lookup(&[("MIN_REQUEST_DELAY_SECONDS", "soon")])).is_err());
        assert!(ScraperConfig::from_lookup(lookup(&[("MIN_REQUEST_DELAY_SECONDS", "-1")])).is_err());
        assert!(ScraperConfig::from_lookup(lookup(&[("MAX_REQUESTS_PER_MINUTE", "0")])).is_err());
        assert!(ScraperConfig::from_lookup(lookup(&[("LOG_SENSITIVE_DATA", "maybe")])).is_err());
    }

    #[test]
    fn test_rate_limit_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());

        let zero_rpm = RateLimitConfig {
            max_requests_per_minute: 0,
            ..RateLimitConfig::default()
        };
        assert!(matches!(zero_rpm.validate(), Err(RenfeError::Config(_))));

        let bad_base = RateLimitConfig {
            backoff_base: f64::NAN,
            ..RateLimitConfig::default()
        };
        assert!(matches!(bad_base.validate(), Err(RenfeError::Config(_))));
    }

    #[test]
    fn test_total_timeout() {
        assert_eq!(TransportConfig::default().total_timeout(), Duration::from_secs(55));
    }
}
