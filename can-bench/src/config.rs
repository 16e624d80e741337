//! Transceiver configuration types
//!
//! Timing parameters of a scheduled run. Values are seconds so they read the
//! same in scenario files as in the bench scripts (`period_s = 0.01`).

use crate::types::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Timing of a [`ScheduledTransceiver`](crate::ScheduledTransceiver) run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransceiverConfig {
    /// Transmit period in seconds (e.g. 0.01 = 100 Hz)
    pub period_s: f64,

    /// Total run duration in seconds
    pub duration_s: f64,

    /// Receive poll timeout in seconds; must be smaller than the period
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_s: f64,
}

fn default_recv_timeout() -> f64 {
    0.001
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            period_s: 0.01,
            duration_s: 5.0,
            recv_timeout_s: default_recv_timeout(),
        }
    }
}

impl TransceiverConfig {
    /// Create a configuration with the default 1 ms receive timeout
    pub fn new(period_s: f64, duration_s: f64) -> Self {
        Self {
            period_s,
            duration_s,
            recv_timeout_s: default_recv_timeout(),
        }
    }

    /// Builder method: set the receive poll timeout
    pub fn with_recv_timeout(mut self, recv_timeout_s: f64) -> Self {
        self.recv_timeout_s = recv_timeout_s;
        self
    }

    /// Builder method: set the run duration
    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = duration_s;
        self
    }

    /// Check that period and duration are positive and representable, and
    /// that receiving can never starve the transmit schedule
    pub fn validate(&self) -> Result<()> {
        if !(self.period_s > 0.0) {
            return Err(HarnessError::InvalidConfig(format!(
                "period must be > 0 s, got {}",
                self.period_s
            )));
        }
        if !(self.duration_s > 0.0) {
            return Err(HarnessError::InvalidConfig(format!(
                "duration must be > 0 s, got {}",
                self.duration_s
            )));
        }
        if !(self.recv_timeout_s >= 0.0 && self.recv_timeout_s < self.period_s) {
            return Err(HarnessError::InvalidConfig(format!(
                "receive timeout {} s must be >= 0 and smaller than the period {} s",
                self.recv_timeout_s, self.period_s
            )));
        }
        self.period()?;
        self.duration()?;
        self.recv_timeout()?;
        Ok(())
    }

    pub fn period(&self) -> Result<Duration> {
        seconds("period", self.period_s)
    }

    pub fn duration(&self) -> Result<Duration> {
        seconds("duration", self.duration_s)
    }

    pub fn recv_timeout(&self) -> Result<Duration> {
        seconds("receive timeout", self.recv_timeout_s)
    }
}

/// Convert a seconds field to a `Duration`, failing with `InvalidConfig`
/// on negative, NaN, infinite or overflowing values
pub(crate) fn seconds(what: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        HarnessError::InvalidConfig(format!("{} of {} s is not a usable duration", what, secs))
    })
}

/// `start + span`, failing with `InvalidConfig` when the instant is not representable
pub(crate) fn deadline(what: &str, start: Instant, span: Duration) -> Result<Instant> {
    start.checked_add(span).ok_or_else(|| {
        HarnessError::InvalidConfig(format!("{} of {:?} is too long", what, span))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TransceiverConfig::new(0.02, 5.0).with_recv_timeout(0.002);

        assert_eq!(config.period().unwrap(), Duration::from_millis(20));
        assert_eq!(config.duration().unwrap(), Duration::from_secs(5));
        assert_eq!(config.recv_timeout().unwrap(), Duration::from_millis(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(TransceiverConfig::new(0.0, 1.0).validate().is_err());
        assert!(TransceiverConfig::new(0.01, 0.0).validate().is_err());
        assert!(TransceiverConfig::new(0.01, -1.0).validate().is_err());
        assert!(TransceiverConfig::new(0.01, 1.0)
            .with_recv_timeout(0.01)
            .validate()
            .is_err());
        assert!(TransceiverConfig::new(f64::NAN, 1.0).validate().is_err());
    }

    #[test]
    fn test_unrepresentable_durations_rejected() {
        for duration_s in [1e20, f64::INFINITY] {
            let err = TransceiverConfig::new(0.01, duration_s).validate().unwrap_err();
            assert!(matches!(err, HarnessError::InvalidConfig(_)), "{}", duration_s);
        }
        assert!(TransceiverConfig::new(f64::INFINITY, 1.0).validate().is_err());
        assert!(TransceiverConfig::new(1e20, 1.0).validate().is_err());
    }

    #[test]
    fn test_seconds_and_deadline_helpers() {
        assert_eq!(seconds("poll", 0.25).unwrap(), Duration::from_millis(250));
        assert!(matches!(
            seconds("timeout", f64::INFINITY),
            Err(HarnessError::InvalidConfig(_))
        ));
        assert!(seconds("timeout", -1.0).is_err());
        assert!(seconds("timeout", f64::NAN).is_err());

        let now = Instant::now();
        assert!(deadline("timeout", now, Duration::from_secs(1)).unwrap() > now);
        assert!(matches!(
            deadline("timeout", now, Duration::MAX),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: TransceiverConfig =
            serde_json::from_str(r#"{ "period_s": 0.01, "duration_s": 5.0 }"#).unwrap();
        assert_eq!(config.recv_timeout_s, 0.001);
    }
}
