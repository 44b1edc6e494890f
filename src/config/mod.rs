//! Configuration module for the crawl orchestration service.
//!
//! This module handles loading and parsing configuration from environment variables
//! using the figment crate. It supports flexible duration parsing that accepts both
//! numeric values (interpreted as seconds) and duration strings with units.

use anyhow::Context;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Load configuration from the environment via `figment`, remapping
/// Railway's draining-seconds variable onto our own shutdown timeout the
/// same way the reference remaps its own deployment-platform env vars.
pub fn load() -> Result<Config, anyhow::Error> {
    Figment::new()
        .merge(Env::raw().map(|k| {
            if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                "SHUTDOWN_TIMEOUT".into()
            } else {
                k.into()
            }
        }))
        .extract()
        .context("Failed to load config")
}

/// Main application configuration containing all sub-configurations
#[derive(Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,crawl_core=debug,..."
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Graceful shutdown timeout duration
    ///
    /// Accepts both numeric values (seconds) and duration strings
    /// Defaults to 8 seconds if not specified
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// `USE_DB_AUTHENTICATION` — activates DB-backed credit accounting.
    /// When false (and `allowed_keys` is empty), the credit gate short-circuits
    /// to the auth-bypass sentinel.
    #[serde(default)]
    pub use_db_authentication: bool,
    /// `ALLOWED_KEYS` — non-empty enables allow-list mode even without DB auth.
    #[serde(default)]
    pub allowed_keys: Vec<String>,
    /// `GCS_FIRE_ENGINE_BUCKET_NAME` — when present, scrape results are
    /// mirrored to this GCS bucket by an injected collaborator.
    pub gcs_fire_engine_bucket_name: Option<String>,
    /// `ENV` — `"local"` keeps the request's own scheme when building status
    /// URLs; any other value forces `https`.
    #[serde(default = "default_env")]
    pub env: String,

    /// Default per-request scrape timeout.
    #[serde(
        default = "default_scrape_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub default_scrape_timeout: Duration,
    /// Timeout floor applied when the extractor mode is `llm-extraction*`.
    #[serde(
        default = "default_llm_scrape_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub llm_scrape_timeout: Duration,
    /// Base job priority before the per-team priority offset is applied.
    #[serde(default = "default_base_priority")]
    pub base_priority: i32,
    /// Message appended to the 402 response when a team is out of credits.
    #[serde(default = "default_upgrade_url_message")]
    pub upgrade_url_message: String,

    /// TTL applied to a stored crawl's `expires_at` from last activity.
    #[serde(
        default = "default_crawl_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub crawl_ttl: Duration,
    /// Interval on which `CrawlReaperService` sweeps expired crawls.
    #[serde(
        default = "default_crawl_reap_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub crawl_reap_interval: Duration,
    /// Interval on which `BillingAggregatorService` flushes batched bill ops.
    #[serde(
        default = "default_billing_flush_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub billing_flush_interval: Duration,
    /// TTL for the cached per-team auto-recharge configuration.
    #[serde(
        default = "default_auto_recharge_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub auto_recharge_cache_ttl: Duration,
    /// Progress streamer poll interval.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    /// `ACCOUNTS_SERVICE_URL` — external credit ledger. Absent means the
    /// `CreditLedger` collaborator treats every team as having no stored
    /// chunk (falls back to `TeamCreditChunk::unlimited()`).
    pub accounts_service_url: Option<String>,
    /// `BLOCKLIST_SERVICE_URL` — external URL blocklist. Absent means no URL
    /// is ever reported blocked.
    pub blocklist_service_url: Option<String>,
    /// `ROBOTS_SERVICE_URL` — external robots.txt fetch/parse capability.
    pub robots_service_url: Option<String>,
    /// `QUEUE_PRIORITY_SERVICE_URL` — external per-team priority offset
    /// service. Absent means every team resolves to offset `0`.
    pub queue_priority_service_url: Option<String>,
    /// `FIRE_ENGINE_URL` — external scrape/render/LLM-extraction engine and
    /// crawl-mapping capability. Absent: scrape jobs fail with an opaque
    /// error, and crawl kickoff degrades to just the seed URL.
    pub fire_engine_url: Option<String>,
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default port of 8080
fn default_port() -> u16 {
    8080
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_env() -> String {
    "local".to_string()
}

/// Default scrape timeout of 30 seconds
fn default_scrape_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default LLM-extraction scrape timeout of 90 seconds
fn default_llm_scrape_timeout() -> Duration {
    Duration::from_secs(90)
}

/// Default base priority offset applied to every dispatched scrape job
fn default_base_priority() -> i32 {
    10
}

fn default_upgrade_url_message() -> String {
    "Insufficient credits. Please upgrade your plan at https://firecrawl.dev/pricing".to_string()
}

/// Default crawl record TTL of 24 hours
fn default_crawl_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Default crawl reaper sweep interval of 5 minutes
fn default_crawl_reap_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Default billing aggregator flush interval of 10 seconds
fn default_billing_flush_interval() -> Duration {
    Duration::from_secs(10)
}

/// Default auto-recharge config cache TTL of 300 seconds
fn default_auto_recharge_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

/// Default progress streamer poll interval of 1000 ms
fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports:
/// - Seconds (s) - default unit
/// - Milliseconds (ms)
/// - Minutes (m)
/// - Hours (h)
///
/// Does not support fractions, exponents, or infinity values
/// Allows for whitespace between the number and the time unit
/// Allows for multiple time units to be specified (summed together, e.g "10s 2m" = 120 + 10 = 130 seconds)
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values
///
/// This deserializer handles the flexible duration parsing by accepting:
/// - Unsigned integers (interpreted as seconds)
/// - Signed integers (interpreted as seconds, must be non-negative)
/// - Strings (parsed using the fundu duration parser)
///
/// # Examples
///
/// - `1` -> 1 second
/// - `"30s"` -> 30 seconds  
/// - `"2 m"` -> 2 minutes
/// - `"1500ms"` -> 15 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER.parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m', '1.5h'", 
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
