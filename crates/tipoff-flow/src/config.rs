//! Orchestrator configuration.
//!
//! Values come from `TIPOFF_*` environment variables over the defaults below.
//! A variable that is set but empty counts as unset; a variable that is set
//! but unparsable is a configuration error.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TIPOFF_LEAD_TIME_SECS` | 3600 |
//! | `TIPOFF_TICK_INTERVAL_SECS` | 60 |
//! | `TIPOFF_REGISTRY_REFRESH_SECS` | 900 |
//! | `TIPOFF_MAX_CONCURRENCY` | 4 |
//! | `TIPOFF_MAX_ATTEMPTS` | 3 |
//! | `TIPOFF_BACKOFF_BASE_SECS` | 30 |
//! | `TIPOFF_BACKOFF_MAX_SECS` | 900 |
//! | `TIPOFF_DATA_RETRY_SECS` | 60 |
//! | `TIPOFF_MAX_DATA_WAITS` | 30 |
//! | `TIPOFF_GENERATION_TIMEOUT_SECS` | 60 |
//! | `TIPOFF_FETCH_TIMEOUT_SECS` | 10 |
//! | `TIPOFF_STALE_LEASE_SECS` | 4 x generation timeout |
//! | `TIPOFF_FRESHNESS_BOUND_SECS` | 86400 |
//! | `TIPOFF_NEWS_LOOKBACK_HOURS` | 168 |
//! | `TIPOFF_MAX_NEWS_ITEMS` | 3 |
//! | `TIPOFF_CALIBRATION_STRENGTH` | 0.0 |
//! | `TIPOFF_CALIBRATION_MEAN` | 0.7 |
//! | `TIPOFF_GENERATION_URL` | unset |
//! | `TIPOFF_GENERATION_API_KEY` | unset |
//! | `TIPOFF_MODEL` | `gpt-4` |
//! | `TIPOFF_FIXTURE_PATH` | unset |
//! | `TIPOFF_RECENT_GAMES` | 5 |
//! | `TIPOFF_LEDGER_PATH` | unset |
//! | `PORT` / `TIPOFF_PORT` | 8080 |
//! | `TIPOFF_LOG_FORMAT` | pretty |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tipoff_core::LogFormat;

use crate::context::AssemblerConfig;
use crate::error::{Error, Result};
use crate::facts::DEFAULT_RECENT_GAMES;
use crate::generation::ConfidenceCalibration;
use crate::scheduler::retry::RetryPolicy;

/// Multiplier applied to the generation timeout for the default stale-lease threshold.
const STALE_LEASE_MULTIPLIER: u32 = 4;

/// Full orchestrator configuration.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Offset before start at which generation triggers.
    pub lead_time: Duration,
    /// Scheduler tick cadence.
    pub tick_interval: Duration,
    /// Registry refresh cadence.
    pub registry_refresh_interval: Duration,
    /// Worker pool bound.
    pub max_concurrency: usize,
    /// Retry and dead-letter policy.
    pub retry: RetryPolicy,
    /// Hard generation timeout.
    pub generation_timeout: Duration,
    /// Collaborator fetch timeout.
    pub fetch_timeout: Duration,
    /// Age at which an in-progress lease is reclaimed.
    pub stale_lease_threshold: Duration,
    /// Structured-data freshness bound relative to start time.
    pub freshness_bound: Duration,
    /// News window.
    pub news_lookback: Duration,
    /// News articles kept per participant.
    pub max_news_items: usize,
    /// Confidence shrinkage strength in [0, 1].
    pub calibration_strength: f64,
    /// Confidence shrinkage target in [0, 1].
    pub calibration_mean: f64,
    /// OpenAI-compatible base URL.
    pub generation_url: Option<String>,
    /// Bearer credential for the generation endpoint.
    pub generation_api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// JSON fixture file for the data collaborators.
    pub fixture_path: Option<PathBuf>,
    /// Games averaged into each participant's recent stats.
    pub recent_games: usize,
    /// Ledger snapshot file. Required by the service binary.
    pub ledger_path: Option<PathBuf>,
    /// Operator HTTP port.
    pub port: u16,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let generation_timeout = Duration::from_secs(60);
        Self {
            lead_time: Duration::from_secs(3600),
            tick_interval: Duration::from_secs(60),
            registry_refresh_interval: Duration::from_secs(900),
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            generation_timeout,
            fetch_timeout: Duration::from_secs(10),
            stale_lease_threshold: generation_timeout.saturating_mul(STALE_LEASE_MULTIPLIER),
            freshness_bound: Duration::from_secs(24 * 3600),
            news_lookback: Duration::from_secs(168 * 3600),
            max_news_items: 3,
            calibration_strength: 0.0,
            calibration_mean: 0.7,
            generation_url: None,
            generation_api_key: None,
            model: "gpt-4".to_string(),
            fixture_path: None,
            recent_games: DEFAULT_RECENT_GAMES,
            ledger_path: None,
            port: 8080,
            log_format: LogFormat::Pretty,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("lead_time", &self.lead_time)
            .field("tick_interval", &self.tick_interval)
            .field("registry_refresh_interval", &self.registry_refresh_interval)
            .field("max_concurrency", &self.max_concurrency)
            .field("retry", &self.retry)
            .field("generation_timeout", &self.generation_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("stale_lease_threshold", &self.stale_lease_threshold)
            .field("freshness_bound", &self.freshness_bound)
            .field("news_lookback", &self.news_lookback)
            .field("max_news_items", &self.max_news_items)
            .field("calibration_strength", &self.calibration_strength)
            .field("calibration_mean", &self.calibration_mean)
            .field("generation_url", &self.generation_url)
            .field(
                "generation_api_key",
                &self.generation_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("model", &self.model)
            .field("fixture_path", &self.fixture_path)
            .field("recent_games", &self.recent_games)
            .field("ledger_path", &self.ledger_path)
            .field("port", &self.port)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl OrchestratorConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable is unparsable or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup` (a variable-name to value function).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable is unparsable or the
    /// resulting configuration is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(secs) = env.u64("TIPOFF_LEAD_TIME_SECS")? {
            config.lead_time = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("TIPOFF_TICK_INTERVAL_SECS")? {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("TIPOFF_REGISTRY_REFRESH_SECS")? {
            config.registry_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env.usize("TIPOFF_MAX_CONCURRENCY")? {
            config.max_concurrency = n;
        }
        if let Some(n) = env.u32("TIPOFF_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }
        if let Some(secs) = env.u64("TIPOFF_BACKOFF_BASE_SECS")? {
            config.retry.base_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("TIPOFF_BACKOFF_MAX_SECS")? {
            config.retry.max_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("TIPOFF_DATA_RETRY_SECS")? {
            config.retry.data_retry_delay = Duration::from_secs(secs);
        }
        if let Some(n) = env.u32("TIPOFF_MAX_DATA_WAITS")? {
            config.retry.max_data_waits = n;
        }
        if let Some(secs) = env.u64("TIPOFF_GENERATION_TIMEOUT_SECS")? {
            config.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("TIPOFF_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        config.stale_lease_threshold = match env.u64("TIPOFF_STALE_LEASE_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => config
                .generation_timeout
                .checked_mul(STALE_LEASE_MULTIPLIER)
                .ok_or_else(|| {
                    Error::configuration(
                        "TIPOFF_GENERATION_TIMEOUT_SECS is too large to derive a stale lease threshold",
                    )
                })?,
        };
        if let Some(secs) = env.u64("TIPOFF_FRESHNESS_BOUND_SECS")? {
            config.freshness_bound = Duration::from_secs(secs);
        }
        if let Some(hours) = env.u64("TIPOFF_NEWS_LOOKBACK_HOURS")? {
            config.news_lookback = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(n) = env.usize("TIPOFF_MAX_NEWS_ITEMS")? {
            config.max_news_items = n;
        }
        if let Some(s) = env.f64("TIPOFF_CALIBRATION_STRENGTH")? {
            config.calibration_strength = s;
        }
        if let Some(m) = env.f64("TIPOFF_CALIBRATION_MEAN")? {
            config.calibration_mean = m;
        }
        config.generation_url = env.string("TIPOFF_GENERATION_URL");
        config.generation_api_key = env.string("TIPOFF_GENERATION_API_KEY");
        if let Some(model) = env.string("TIPOFF_MODEL") {
            config.model = model;
        }
        config.fixture_path = env.string("TIPOFF_FIXTURE_PATH").map(PathBuf::from);
        if let Some(n) = env.usize("TIPOFF_RECENT_GAMES")? {
            config.recent_games = n;
        }
        config.ledger_path = env.string("TIPOFF_LEDGER_PATH").map(PathBuf::from);
        if let Some(port) = env.u16("PORT")?.or(env.u16("TIPOFF_PORT")?) {
            config.port = port;
        }
        config.log_format = LogFormat::from_name(env.string("TIPOFF_LOG_FORMAT").as_deref());

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::configuration("TIPOFF_MAX_CONCURRENCY must be >= 1"));
        }
        if self.tick_interval.is_zero() || self.registry_refresh_interval.is_zero() {
            return Err(Error::configuration(
                "tick and registry refresh intervals must be > 0",
            ));
        }
        if self.recent_games == 0 {
            return Err(Error::configuration("TIPOFF_RECENT_GAMES must be >= 1"));
        }
        self.retry.validate()?;
        let worker_bound = self
            .generation_timeout
            .checked_add(self.fetch_timeout)
            .ok_or_else(|| {
                Error::configuration("generation timeout plus fetch timeout overflows")
            })?;
        if self.stale_lease_threshold <= worker_bound {
            return Err(Error::configuration(format!(
                "stale lease threshold {:?} must exceed generation timeout plus fetch timeout ({worker_bound:?})",
                self.stale_lease_threshold,
            )));
        }
        self.calibration()?;
        Ok(())
    }

    /// Returns the context assembler settings.
    #[must_use]
    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            freshness_bound: self.freshness_bound,
            fetch_timeout: self.fetch_timeout,
            news_lookback: self.news_lookback,
            max_news_items: self.max_news_items,
        }
    }

    /// Returns the confidence calibration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if strength or mean is outside [0, 1].
    pub fn calibration(&self) -> Result<ConfidenceCalibration> {
        ConfidenceCalibration::new(self.calibration_strength, self.calibration_mean)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parsed<T>(&self, name: &str, kind: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<T>()
            .map(Some)
            .map_err(|e| Error::configuration(format!("{name} must be a {kind}: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        self.parsed(name, "u64")
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        self.parsed(name, "u32")
    }

    fn u16(&self, name: &str) -> Result<Option<u16>> {
        self.parsed(name, "u16")
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        self.parsed(name, "usize")
    }

    fn f64(&self, name: &str) -> Result<Option<f64>> {
        self.parsed(name, "number")
    }
}
