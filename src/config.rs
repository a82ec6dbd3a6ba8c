//! Runtime settings for the simulation binary, read from `SEATLOCK_*`
//! environment variables.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Missing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub flight_id: String,
    pub target_seat: String,
    pub passengers: usize,
    pub seats: usize,
    pub decision_latency: Duration,
    pub attempt_timeout: Option<Duration>,
    pub report_skips: bool,
    pub report: ReportFormat,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            flight_id: "SG-101".into(),
            target_seat: "1A".into(),
            passengers: 10,
            seats: 10,
            decision_latency: Duration::from_millis(100),
            attempt_timeout: None,
            report_skips: false,
            report: ReportFormat::Text,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(v) = lookup("SEATLOCK_BACKEND") {
            config.backend = match v.to_ascii_lowercase().as_str() {
                "memory" => Backend::Memory,
                "postgres" => Backend::Postgres,
                _ => return Err(invalid("SEATLOCK_BACKEND", v)),
            };
        }
        config.database_url = lookup("SEATLOCK_DATABASE_URL");
        if config.backend == Backend::Postgres && config.database_url.is_none() {
            return Err(ConfigError::Missing("SEATLOCK_DATABASE_URL"));
        }

        if let Some(v) = lookup("SEATLOCK_FLIGHT") {
            config.flight_id = v;
        }
        if let Some(v) = lookup("SEATLOCK_TARGET_SEAT") {
            config.target_seat = v;
        }
        if let Some(n) = parse(&lookup, "SEATLOCK_PASSENGERS")? {
            config.passengers = n;
        }
        if let Some(n) = parse(&lookup, "SEATLOCK_SEATS")? {
            config.seats = n;
        }
        if let Some(ms) = parse(&lookup, "SEATLOCK_DECISION_LATENCY_MS")? {
            config.decision_latency = Duration::from_millis(ms);
        }
        config.attempt_timeout =
            parse(&lookup, "SEATLOCK_ATTEMPT_TIMEOUT_MS")?.map(Duration::from_millis);

        if let Some(v) = lookup("SEATLOCK_REPORT_SKIPS") {
            config.report_skips = match v.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(invalid("SEATLOCK_REPORT_SKIPS", v)),
            };
        }
        if let Some(v) = lookup("SEATLOCK_REPORT") {
            config.report = match v.as_str() {
                "text" => ReportFormat::Text,
                "json" => ReportFormat::Json,
                _ => return Err(invalid("SEATLOCK_REPORT", v)),
            };
        }
        config.metrics_port = parse(&lookup, "SEATLOCK_METRICS_PORT")?;

        Ok(config)
    }
}

fn invalid(var: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { var, value }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(v) => v.trim().parse().map(Some).map_err(|_| invalid(var, v)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.flight_id, "SG-101");
        assert_eq!(config.target_seat, "1A");
        assert_eq!(config.passengers, 10);
        assert_eq!(config.decision_latency, Duration::from_millis(100));
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("SEATLOCK_BACKEND", "postgres"),
            ("SEATLOCK_DATABASE_URL", "postgres://localhost/seats"),
            ("SEATLOCK_PASSENGERS", "25"),
            ("SEATLOCK_DECISION_LATENCY_MS", "0"),
            ("SEATLOCK_ATTEMPT_TIMEOUT_MS", "2000"),
            ("SEATLOCK_REPORT_SKIPS", "true"),
            ("SEATLOCK_REPORT", "json"),
            ("SEATLOCK_METRICS_PORT", "9090"),
        ])
        .unwrap();

        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.passengers, 25);
        assert_eq!(config.decision_latency, Duration::ZERO);
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(2)));
        assert!(config.report_skips);
        assert_eq!(config.report, ReportFormat::Json);
        assert_eq!(config.metrics_port, Some(9090));
    }

    #[test]
    fn postgres_requires_url() {
        let err = from_pairs(&[("SEATLOCK_BACKEND", "postgres")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("SEATLOCK_DATABASE_URL"));
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = from_pairs(&[("SEATLOCK_SEATS", "ten")]).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for SEATLOCK_SEATS: \"ten\"");
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = from_pairs(&[("SEATLOCK_BACKEND", "mysql")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SEATLOCK_BACKEND", .. }));
    }
}
