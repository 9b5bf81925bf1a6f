//! Configuration module for environment variable parsing.
//!
//! Every setting has a default. Malformed values are logged and replaced by
//! the default rather than aborting startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::campaign::BulkSendSettings;
use crate::sequence::SchedulerSettings;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the HTTP server to listen on
    pub port: u16,

    /// Public origin used to build tracking URLs
    pub public_base_url: Url,

    /// Resend API key (bearer token)
    pub resend_api_key: String,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Recipients attempted concurrently per campaign batch
    pub send_batch_size: usize,

    /// Pause between campaign batches in milliseconds
    pub send_batch_pause_ms: u64,

    /// Seconds between sequence scheduler ticks
    pub sequence_tick_interval_secs: u64,

    /// Maximum due executions handled per tick
    pub sequence_page_size: usize,

    /// Per-message transport timeout in milliseconds
    pub delivery_timeout_ms: u64,

    // =========================================================================
    // Auth
    // =========================================================================

    /// Bearer token for the send and enrollment endpoints
    pub admin_token: Option<String>,

    /// Svix signing secret (`whsec_...`) for the delivery webhook
    pub webhook_signing_secret: Option<String>,

    /// Maximum age in seconds for webhook timestamps
    pub webhook_signature_max_age: u64,

    // =========================================================================
    // Data files
    // =========================================================================

    /// JSON snapshot loaded into the in-memory store at startup
    pub seed_file: Option<String>,

    /// CSV of `cidr,country,city` rows for IP geolocation
    pub geoip_table_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Config {
            port: parse_or(&get, "PORT", 8080),

            public_base_url: parse_base_url(get("PUBLIC_BASE_URL")),

            resend_api_key: get("RESEND_API_KEY").unwrap_or_default(),

            resend_api_url: get("RESEND_API_URL")
                .unwrap_or_else(|| "https://api.resend.com".to_string()),

            send_batch_size: parse_positive(&get, "SEND_BATCH_SIZE", 10),

            send_batch_pause_ms: parse_or(&get, "SEND_BATCH_PAUSE_MS", 1000),

            sequence_tick_interval_secs: parse_positive(&get, "SEQUENCE_TICK_INTERVAL_SECS", 60),

            sequence_page_size: parse_positive(&get, "SEQUENCE_PAGE_SIZE", 100),

            delivery_timeout_ms: parse_positive(&get, "DELIVERY_TIMEOUT_MS", 10_000),

            admin_token: get("ADMIN_TOKEN"),

            webhook_signing_secret: get("WEBHOOK_SIGNING_SECRET"),

            webhook_signature_max_age: parse_or(&get, "WEBHOOK_SIGNATURE_MAX_AGE", 300), // 5 minutes

            seed_file: get("SEED_FILE"),

            geoip_table_path: get("GEOIP_TABLE_PATH"),
        }
    }

    pub fn bulk_send_settings(&self) -> BulkSendSettings {
        BulkSendSettings {
            batch_size: self.send_batch_size,
            batch_pause: Duration::from_millis(self.send_batch_pause_ms),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(self.sequence_tick_interval_secs),
            page_size: self.sequence_page_size,
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = get(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }
    }
}

/// Like `parse_or`, but zero is also rejected.
fn parse_positive<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + PartialOrd + Default + Copy,
{
    let value = parse_or(get, name, default);
    if value <= T::default() {
        warn!(env_var = name, default = %default, "Value must be positive, using default");
        return default;
    }
    value
}

fn parse_base_url(raw: Option<String>) -> Url {
    let fallback = || Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid");
    let Some(raw) = raw else {
        return fallback();
    };
    match Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => {
            warn!(env_var = "PUBLIC_BASE_URL", value = %raw, "Invalid base URL, using default");
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_base_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.resend_api_url, "https://api.resend.com");
        assert_eq!(config.send_batch_size, 10);
        assert_eq!(config.bulk_send_settings().batch_pause, Duration::from_secs(1));
        assert_eq!(config.scheduler_settings().interval, Duration::from_secs(60));
        assert_eq!(config.scheduler_settings().page_size, 100);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(10));
        assert_eq!(config.webhook_signature_max_age, 300);
        assert!(config.admin_token.is_none());
        assert!(config.seed_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("PUBLIC_BASE_URL", "https://mail.example.com"),
            ("SEND_BATCH_SIZE", "25"),
            ("SEND_BATCH_PAUSE_MS", "0"),
            ("ADMIN_TOKEN", "s3cret"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.public_base_url.host_str(), Some("mail.example.com"));
        assert_eq!(config.send_batch_size, 25);
        assert_eq!(config.bulk_send_settings().batch_pause, Duration::ZERO);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("SEND_BATCH_SIZE", "0"),
            ("SEQUENCE_PAGE_SIZE", "-5"),
            ("PUBLIC_BASE_URL", "mailto:nobody@example.com"),
            ("ADMIN_TOKEN", "   "),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.send_batch_size, 10);
        assert_eq!(config.sequence_page_size, 100);
        assert_eq!(config.public_base_url.as_str(), "http://localhost:8080/");
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        env::set_var("DELIVERY_TIMEOUT_MS", "2500");
        let config = Config::from_env();
        assert_eq!(config.delivery_timeout(), Duration::from_millis(2500));
        env::remove_var("DELIVERY_TIMEOUT_MS");
    }
}
