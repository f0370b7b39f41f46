//! Configuration module for pulsewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// Seconds between scheduler ticks (default: 60)
    pub tick_secs: u64,
    /// Connect timeout for probes, independent of the per-target timeout (default: 10)
    pub connect_timeout_secs: u64,
    /// Attempts per check job before it is declared exhausted (default: 3)
    pub max_attempts: u32,
    /// Wall-clock budget for a whole check job across attempts (default: 120)
    pub job_budget_secs: u64,
    /// Pause between failed attempts (default: 1000)
    pub retry_delay_ms: u64,
    /// Worker pool size: checks running at the same time (default: 64)
    pub max_in_flight: usize,
    /// Maximum checks dispatched per tick, 0 for unlimited (default: 0)
    pub tick_limit: usize,
    /// Outcomes older than this are pruned (default: 90)
    pub retention_days: i64,
    /// Seconds between retention sweeps (default: 3600)
    pub retention_sweep_secs: u64,
    /// Skip TLS certificate validation on probes (default: false)
    pub accept_invalid_certs: bool,
    /// Offset used to align hourly report buckets (default: 0, UTC)
    pub report_utc_offset_minutes: i32,
    /// Maximum points in a reported hourly series (default: 15)
    pub series_cap: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsewatch.db".to_string(),
            tick_secs: 60,
            connect_timeout_secs: 10,
            max_attempts: 3,
            job_budget_secs: 120,
            retry_delay_ms: 1000,
            max_in_flight: 64,
            tick_limit: 0,
            retention_days: 90,
            retention_sweep_secs: 3600,
            accept_invalid_certs: false,
            report_utc_offset_minutes: 0,
            series_cap: 15,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Every field maps to `PULSEWATCH_<FIELD>` (for example `PULSEWATCH_HTTP_PORT`,
    /// `PULSEWATCH_DB_PATH`, `PULSEWATCH_TICK_SECS`). Values that fail to parse keep
    /// their default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        read_var("PULSEWATCH_HTTP_PORT", &mut cfg.http_port);
        if let Ok(db_path) = env::var("PULSEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        read_var("PULSEWATCH_TICK_SECS", &mut cfg.tick_secs);
        read_var("PULSEWATCH_CONNECT_TIMEOUT_SECS", &mut cfg.connect_timeout_secs);
        read_var("PULSEWATCH_MAX_ATTEMPTS", &mut cfg.max_attempts);
        read_var("PULSEWATCH_JOB_BUDGET_SECS", &mut cfg.job_budget_secs);
        read_var("PULSEWATCH_RETRY_DELAY_MS", &mut cfg.retry_delay_ms);
        read_var("PULSEWATCH_MAX_IN_FLIGHT", &mut cfg.max_in_flight);
        read_var("PULSEWATCH_TICK_LIMIT", &mut cfg.tick_limit);
        read_var("PULSEWATCH_RETENTION_DAYS", &mut cfg.retention_days);
        read_var("PULSEWATCH_RETENTION_SWEEP_SECS", &mut cfg.retention_sweep_secs);
        read_var("PULSEWATCH_ACCEPT_INVALID_CERTS", &mut cfg.accept_invalid_certs);
        read_var("PULSEWATCH_REPORT_UTC_OFFSET_MINUTES", &mut cfg.report_utc_offset_minutes);
        read_var("PULSEWATCH_SERIES_CAP", &mut cfg.series_cap);

        cfg.normalize()
    }

    /// Clamp values that would otherwise break scheduling invariants.
    fn normalize(mut self) -> Self {
        let defaults = Self::default();
        if self.tick_secs == 0 {
            self.tick_secs = defaults.tick_secs;
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.job_budget_secs == 0 {
            self.job_budget_secs = defaults.job_budget_secs;
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = 1;
        }
        if self.retention_days <= 0 {
            self.retention_days = defaults.retention_days;
        }
        if self.retention_sweep_secs == 0 {
            self.retention_sweep_secs = defaults.retention_sweep_secs;
        }
        if self.series_cap == 0 {
            self.series_cap = defaults.series_cap;
        }
        if self.report_offset().is_none() {
            self.report_utc_offset_minutes = 0;
        }
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn job_budget(&self) -> Duration {
        Duration::from_secs(self.job_budget_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// The fixed offset hourly buckets are aligned to, if the configured minutes are valid.
    pub fn report_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.report_utc_offset_minutes.checked_mul(60)?)
    }
}

fn read_var<T: FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = env::var(name) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring unparseable {}={:?}", name, raw),
        }
    }
}
