//! Driver tuning knobs, loaded with Figment.
//!
//! Configuration is merged from two sources, later wins:
//!
//! 1. An optional TOML file (`spectro.toml` by default)
//! 2. Environment variables prefixed with `SPECTRO_`
//!
//! ```text
//! SPECTRO_POLL_INTERVAL_MS=100
//! SPECTRO_RETRY_MAX_ATTEMPTS=5
//! ```
//!
//! Every knob has a compiled-in default, so a missing file is not an error.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SpectroError};

/// Tunable driver settings.
///
/// These govern the worker cadence and protocol pacing, not the instrument
/// itself; per-instrument limits come from the configuration record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Base sleep between worker poll iterations, scaled by the number of
    /// concurrently managed devices.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry budget for opcode sends with `retry_on_error`.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Lower bound of the randomized inter-call pacing window. Zero disables
    /// pacing entirely.
    #[serde(default)]
    pub min_call_interval_ms: u64,

    /// Upper bound of the randomized inter-call pacing window.
    #[serde(default)]
    pub max_call_interval_ms: u64,

    /// Settling delay between consecutive captures during auto-exposure.
    #[serde(default = "default_settling_delay_ms")]
    pub settling_delay_ms: u64,

    /// Timeout applied to a bulk spectrum read, added on top of the configured
    /// integration time.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_settling_delay_ms() -> u64 {
    50
}

fn default_acquire_timeout_ms() -> u64 {
    60_000
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            min_call_interval_ms: 0,
            max_call_interval_ms: 0,
            settling_delay_ms: default_settling_delay_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl DriverSettings {
    /// Load settings from an optional TOML file plus `SPECTRO_` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("spectro.toml"));
        }
        let settings: DriverSettings = figment
            .merge(Env::prefixed("SPECTRO_"))
            .extract()
            .map_err(|e| SpectroError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.min_call_interval_ms > self.max_call_interval_ms {
            return Err(SpectroError::Configuration(format!(
                "min_call_interval_ms {} exceeds max_call_interval_ms {}",
                self.min_call_interval_ms, self.max_call_interval_ms
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(SpectroError::Configuration(
                "retry_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = DriverSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.poll_interval_ms, 50);
        assert_eq!(settings.retry_max_attempts, 3);
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "poll_interval_ms = 200\nretry_max_attempts = 5").unwrap();

        let settings = DriverSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.poll_interval_ms, 200);
        assert_eq!(settings.retry_max_attempts, 5);
        // untouched knobs keep their defaults
        assert_eq!(settings.settling_delay_ms, 50);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = DriverSettings::load(Some(Path::new("/nonexistent/x.toml"))).unwrap();
        assert_eq!(settings.poll_interval_ms, 50);
    }

    #[test]
    fn rejects_inverted_pacing_window() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "min_call_interval_ms = 10\nmax_call_interval_ms = 5").unwrap();
        assert!(DriverSettings::load(Some(file.path())).is_err());
    }
}
