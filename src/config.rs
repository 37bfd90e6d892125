// =============================================================================
// config.rs — THE GRAND CONFIGURATION CATHEDRAL
// =============================================================================
//
// One struct to rule every knob of the ingest job: which quarters, how many
// workers, how long to wait between requests, how stubbornly to retry. The
// older ingest scripts each hard-coded their own flavour of these numbers;
// now they are all environment variables prefixed with HOLDINGS_.
//
// Two values have no default: the database URL and the contact header SEC
// insists on. Missing either one is fatal before a single request goes out.
// =============================================================================

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::models::Quarter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// How the HTTP client deals with an unhappy EDGAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries (after the first attempt) for 5xx, odd statuses and network errors.
    pub max_transient_retries: u32,
    /// Fixed pause between transient retries.
    pub transient_retry_delay: Duration,
    /// First wait after a 429. Doubles on every consecutive 429.
    pub rate_limit_initial: Duration,
    /// Ceiling for the 429 backoff. We never give up, we just stop doubling.
    pub rate_limit_backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 5,
            transient_retry_delay: Duration::from_secs(2),
            rate_limit_initial: Duration::from_secs(5),
            rate_limit_backoff_cap: Duration::from_secs(120),
        }
    }
}

/// The Grand Configuration Struct.
#[derive(Debug, Clone)]
pub struct Config {
    /// sqlx connection string, e.g. `sqlite://data/holdings.db`.
    pub database_url: String,

    /// Sent as the User-Agent on every request. SEC wants a name and an email.
    pub user_agent: String,

    /// Root of the EDGAR archive, without a trailing slash.
    pub archives_url: String,

    /// Form type kept from the master index.
    pub form_type: String,

    /// Quarters to ingest, processed strictly in this order.
    pub quarters: Vec<Quarter>,

    /// Number of concurrent ingest workers.
    pub concurrency: usize,

    /// Pause before each filing's directory listing lookup.
    pub per_request_delay: Duration,

    /// Holding rows per write transaction.
    pub holding_batch_size: usize,

    /// Per-request HTTP timeout.
    pub http_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if any).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Fail silently if there's no .env, the real environment still counts.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. `from_env` is this plus `std::env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "HOLDINGS_DATABASE_URL")?;
        let user_agent = required(&lookup, "HOLDINGS_USER_AGENT")?;

        let archives_raw = env_or_default(
            &lookup,
            "HOLDINGS_ARCHIVES_URL",
            "https://www.sec.gov/Archives",
        );
        Url::parse(&archives_raw).map_err(|e| ConfigError::Invalid {
            key: "HOLDINGS_ARCHIVES_URL",
            reason: e.to_string(),
        })?;
        let archives_url = archives_raw.trim_end_matches('/').to_string();

        let quarters = parse_quarters(&env_or_default(
            &lookup,
            "HOLDINGS_QUARTERS",
            "2025-Q3,2025-Q2",
        ))?;

        let concurrency: usize = parsed(&lookup, "HOLDINGS_CONCURRENCY", 5)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "HOLDINGS_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        let holding_batch_size: usize = parsed(&lookup, "HOLDINGS_HOLDING_BATCH_SIZE", 50)?;
        if holding_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "HOLDINGS_HOLDING_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_transient_retries: parsed(
                &lookup,
                "HOLDINGS_MAX_TRANSIENT_RETRIES",
                defaults.max_transient_retries,
            )?,
            transient_retry_delay: Duration::from_millis(parsed(
                &lookup,
                "HOLDINGS_TRANSIENT_RETRY_DELAY_MS",
                2000,
            )?),
            rate_limit_initial: Duration::from_secs(parsed(
                &lookup,
                "HOLDINGS_RATE_LIMIT_INITIAL_SECS",
                5,
            )?),
            rate_limit_backoff_cap: Duration::from_secs(parsed(
                &lookup,
                "HOLDINGS_RATE_LIMIT_CAP_SECS",
                120,
            )?),
        };
        if retry.rate_limit_initial.is_zero() || retry.rate_limit_backoff_cap < retry.rate_limit_initial {
            return Err(ConfigError::Invalid {
                key: "HOLDINGS_RATE_LIMIT_CAP_SECS",
                reason: "backoff must start above zero and the cap must be >= the initial wait"
                    .to_string(),
            });
        }

        Ok(Config {
            database_url,
            user_agent,
            archives_url,
            form_type: env_or_default(&lookup, "HOLDINGS_FORM_TYPE", "13F-HR"),
            quarters,
            concurrency,
            per_request_delay: Duration::from_millis(parsed(
                &lookup,
                "HOLDINGS_REQUEST_DELAY_MS",
                250,
            )?),
            holding_batch_size,
            http_timeout: Duration::from_secs(parsed(&lookup, "HOLDINGS_HTTP_TIMEOUT_SECS", 30)?),
            retry,
        })
    }

    /// `{archives}/edgar/full-index/2025/QTR3/master.idx`
    pub fn master_index_url(&self, quarter: Quarter) -> String {
        format!(
            "{}/edgar/full-index/{}/QTR{}/master.idx",
            self.archives_url, quarter.year, quarter.number
        )
    }

    /// The folder holding every document of one filing.
    pub fn filing_folder_url(&self, cik_segment: &str, accession_number: &str) -> String {
        format!(
            "{}/edgar/data/{}/{}",
            self.archives_url,
            cik_segment,
            accession_number.replace('-', "")
        )
    }
}

fn parse_quarters(raw: &str) -> Result<Vec<Quarter>, ConfigError> {
    let quarters = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Quarter::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|reason| ConfigError::Invalid {
            key: "HOLDINGS_QUARTERS",
            reason,
        })?;

    if quarters.is_empty() {
        return Err(ConfigError::Invalid {
            key: "HOLDINGS_QUARTERS",
            reason: "at least one quarter is required".to_string(),
        });
    }
    Ok(quarters)
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Read a key with a default fallback.
fn env_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}
