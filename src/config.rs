use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::clock::Zone;
use crate::engine::BookingSettings;
use crate::model::BusinessHours;
use crate::reminder::MAX_SWEEP_INTERVAL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Parse { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Process configuration, read once from `APPOINTD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Unset means protected routes refuse every request.
    pub api_key: Option<String>,
    pub zone: Zone,
    pub hours: BusinessHours,
    pub appointment_minutes: i64,
    pub reminder_interval: Duration,
    pub public_url: String,
    pub min_monthly_budget: Option<f64>,
    pub default_country_code: String,
    pub max_identity_locks: usize,
    pub request_timeout: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let zone_name = get("APPOINTD_TIMEZONE").unwrap_or_else(|| "Africa/Johannesburg".into());
        let zone = Zone::parse(&zone_name).map_err(|reason| ConfigError::Invalid {
            var: "APPOINTD_TIMEZONE",
            reason,
        })?;

        let start_hour: u32 = parse_or(&get, "APPOINTD_BUSINESS_START_HOUR", 9)?;
        let end_hour: u32 = parse_or(&get, "APPOINTD_BUSINESS_END_HOUR", 17)?;
        let hours = BusinessHours::new(start_hour, end_hour).ok_or_else(|| ConfigError::Invalid {
            var: "APPOINTD_BUSINESS_END_HOUR",
            reason: format!("business hours {start_hour}-{end_hour} must satisfy start < end <= 23"),
        })?;

        let appointment_minutes: i64 = parse_or(&get, "APPOINTD_APPOINTMENT_MINUTES", 60)?;
        if appointment_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "APPOINTD_APPOINTMENT_MINUTES",
                reason: "must be positive".into(),
            });
        }

        let reminder_secs: u64 = parse_or(&get, "APPOINTD_REMINDER_INTERVAL_SECS", 1800)?;
        let reminder_interval = Duration::from_secs(reminder_secs);
        if reminder_secs == 0 || reminder_interval > MAX_SWEEP_INTERVAL {
            return Err(ConfigError::Invalid {
                var: "APPOINTD_REMINDER_INTERVAL_SECS",
                reason: format!(
                    "must be between 1 and {} seconds so no reminder window is skipped",
                    MAX_SWEEP_INTERVAL.as_secs()
                ),
            });
        }

        let min_monthly_budget: Option<f64> = parse_opt(&get, "APPOINTD_MIN_MONTHLY_BUDGET")?;
        if min_monthly_budget.is_some_and(|b| !b.is_finite() || b < 0.0) {
            return Err(ConfigError::Invalid {
                var: "APPOINTD_MIN_MONTHLY_BUDGET",
                reason: "must be a non-negative number".into(),
            });
        }

        let default_country_code = get("APPOINTD_DEFAULT_COUNTRY_CODE").unwrap_or_else(|| "27".into());
        let default_country_code = default_country_code.trim_start_matches('+').to_string();
        if default_country_code.is_empty() || !default_country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid {
                var: "APPOINTD_DEFAULT_COUNTRY_CODE",
                reason: "must be digits, e.g. 27".into(),
            });
        }

        let request_timeout_secs: u64 = parse_or(&get, "APPOINTD_REQUEST_TIMEOUT_SECS", 30)?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "APPOINTD_REQUEST_TIMEOUT_SECS",
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            bind: get("APPOINTD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "APPOINTD_PORT", 8080)?,
            data_dir: PathBuf::from(get("APPOINTD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            api_key: get("APPOINTD_API_KEY"),
            zone,
            hours,
            appointment_minutes,
            reminder_interval,
            public_url: get("APPOINTD_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
            min_monthly_budget,
            default_country_code,
            max_identity_locks: parse_or(&get, "APPOINTD_MAX_IDENTITY_LOCKS", 10_000)?,
            request_timeout: Duration::from_secs(request_timeout_secs),
            compact_threshold: parse_or(&get, "APPOINTD_COMPACT_THRESHOLD", 1000)?,
            metrics_port: parse_opt(&get, "APPOINTD_METRICS_PORT")?,
        })
    }

    pub fn booking_settings(&self) -> BookingSettings {
        BookingSettings {
            zone: self.zone,
            hours: self.hours,
            slot_minutes: self.appointment_minutes,
            public_url: self.public_url.clone(),
            min_monthly_budget: self.min_monthly_budget,
            default_country_code: self.default_country_code.clone(),
            max_identity_locks: self.max_identity_locks,
        }
    }
}

fn parse_opt<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(get, var)?.unwrap_or(default))
}
