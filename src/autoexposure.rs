//! Closed-loop exposure/gain optimization.
//!
//! The controller walks (integration time, gain) toward a target signal
//! window, then captures a matched set of averaged signal and dark frames and
//! returns their difference. Scaling is distributed integration-time-first:
//! growth extends integration up to its maximum before spilling into gain,
//! and shrinkage drains gain down to its minimum before shortening
//! integration, which keeps the best-quality spectrum reachable at any
//! signal level.
//!
//! The controller drives anything implementing [`ExposureDriver`], so tests
//! run it against a synthetic linear detector instead of hardware.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SpectroError};

/// Minimal session surface the controller needs.
#[async_trait]
pub trait ExposureDriver: Send {
    async fn set_integration_time_ms(&mut self, ms: u32) -> Result<()>;
    async fn set_gain_db(&mut self, db: f32) -> Result<()>;
    async fn set_laser_enable(&mut self, enabled: bool) -> Result<()>;
    /// One fully post-processed frame at the current settings.
    async fn capture(&mut self) -> Result<Vec<f64>>;
}

/// Bounds and targets for one optimization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoExposureRequest {
    pub target_counts: f64,
    pub min_counts: f64,
    pub max_counts: f64,
    /// At or above this level the detector is considered saturating and the
    /// computed scale factor is replaced by `drop_factor`.
    pub saturation_counts: f64,
    /// Upper bound on per-step growth, to avoid overshoot.
    pub max_factor: f64,
    /// Forced per-step shrink applied while saturating.
    pub drop_factor: f64,
    pub start_integration_ms: u32,
    pub min_integration_ms: u32,
    pub max_integration_ms: u32,
    pub start_gain_db: f64,
    pub min_gain_db: f64,
    pub max_gain_db: f64,
    /// Total measurement budget; sets the averaged-frame count after
    /// convergence (each signal frame is paired with a dark frame).
    pub max_total_ms: u32,
    /// Hard stop on scaling iterations.
    pub max_iterations: u32,
}

impl Default for AutoExposureRequest {
    fn default() -> Self {
        Self {
            target_counts: 45_000.0,
            min_counts: 40_000.0,
            max_counts: 50_000.0,
            saturation_counts: 65_000.0,
            max_factor: 5.0,
            drop_factor: 0.5,
            start_integration_ms: 100,
            min_integration_ms: 10,
            max_integration_ms: 2_000,
            start_gain_db: 0.0,
            min_gain_db: 0.0,
            max_gain_db: 32.0,
            max_total_ms: 10_000,
            max_iterations: 20,
        }
    }
}

impl AutoExposureRequest {
    fn validate(&self) -> Result<()> {
        if !(self.min_counts < self.target_counts && self.target_counts < self.max_counts) {
            return Err(SpectroError::Configuration(format!(
                "target window must satisfy min < target < max (got {} / {} / {})",
                self.min_counts, self.target_counts, self.max_counts
            )));
        }
        if self.min_integration_ms == 0 || self.min_integration_ms > self.max_integration_ms {
            return Err(SpectroError::Configuration(format!(
                "bad integration bounds {}..{}",
                self.min_integration_ms, self.max_integration_ms
            )));
        }
        if self.min_gain_db > self.max_gain_db {
            return Err(SpectroError::Configuration(format!(
                "bad gain bounds {}..{}",
                self.min_gain_db, self.max_gain_db
            )));
        }
        if self.max_factor <= 1.0 {
            return Err(SpectroError::Configuration(
                "max_factor must exceed 1".into(),
            ));
        }
        if !(0.0 < self.drop_factor && self.drop_factor < 1.0) {
            return Err(SpectroError::Configuration(
                "drop_factor must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one optimization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoExposureResult {
    pub integration_time_ms: u32,
    pub gain_db: f64,
    /// Frames averaged into both the signal and the dark.
    pub averaged_count: u32,
    pub iterations: u32,
    /// False when the run terminated with the signal still outside the
    /// window (parameters pinned at their limits, or iteration budget hit).
    pub converged: bool,
    /// Dark-subtracted signal.
    pub spectrum: Vec<f64>,
    pub dark: Vec<f64>,
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn linear_to_db(linear: f64) -> f64 {
    20.0 * linear.log10()
}

/// Averaged frames from a `max_total_ms` budget: each signal capture pairs
/// with a dark capture, hence the factor 2. Never below one frame.
pub fn averaged_count(max_total_ms: u32, integration_time_ms: u32) -> u32 {
    (max_total_ms / (2 * integration_time_ms.max(1))).max(1)
}

pub struct AutoExposure {
    settling_delay: Duration,
}

impl AutoExposure {
    pub fn new(settling_delay: Duration) -> Self {
        Self { settling_delay }
    }

    /// Run the full optimization: scale to the window, then capture averaged
    /// signal and dark frames and subtract. The laser is switched off before
    /// returning, including on error.
    pub async fn run<D: ExposureDriver>(
        &self,
        driver: &mut D,
        request: &AutoExposureRequest,
    ) -> Result<AutoExposureResult> {
        request.validate()?;
        let result = self.run_inner(driver, request).await;
        if result.is_err() {
            let _ = driver.set_laser_enable(false).await;
        }
        result
    }

    async fn run_inner<D: ExposureDriver>(
        &self,
        driver: &mut D,
        request: &AutoExposureRequest,
    ) -> Result<AutoExposureResult> {
        let mut integration_ms = request
            .start_integration_ms
            .clamp(request.min_integration_ms, request.max_integration_ms);
        let mut gain_db = request
            .start_gain_db
            .clamp(request.min_gain_db, request.max_gain_db);
        let mut gain_linear = db_to_linear(gain_db);
        let min_gain_linear = db_to_linear(request.min_gain_db);

        let in_window =
            |signal: f64| request.min_counts < signal && signal < request.max_counts;

        driver.set_laser_enable(true).await?;
        let mut spectrum = self
            .averaged_capture(driver, integration_ms, gain_db, 1)
            .await?;
        let mut max_signal = peak(&spectrum);

        let mut converged = in_window(max_signal);
        let mut iterations = 0;
        while !converged && iterations < request.max_iterations {
            iterations += 1;
            let mut scale = if max_signal > 0.0 {
                request.target_counts / max_signal
            } else {
                request.max_factor
            };
            debug!(
                "iteration {iterations}: counts {max_signal:.0}, scale {scale:.3}, \
                 integration {integration_ms} ms, gain {gain_db:.1} dB"
            );

            let prev_integration = integration_ms;
            let prev_gain = gain_db;
            let mut integration = f64::from(integration_ms);
            let max_integration = f64::from(request.max_integration_ms);

            if scale > 1.0 {
                scale = scale.min(request.max_factor);
                integration *= scale;
                if integration > max_integration {
                    // spill the excess growth into gain
                    gain_linear *= integration / max_integration;
                    integration = max_integration;
                }
            } else if scale < 1.0 {
                if max_signal >= request.saturation_counts {
                    scale = request.drop_factor;
                }
                gain_linear *= scale;
                if gain_linear < min_gain_linear {
                    // spill the excess shrink into integration time
                    integration *= gain_linear / min_gain_linear;
                    gain_linear = min_gain_linear;
                }
            }

            gain_db = ((linear_to_db(gain_linear) * 10.0).round() / 10.0)
                .clamp(request.min_gain_db, request.max_gain_db);
            gain_linear = db_to_linear(gain_db);
            integration_ms = (integration.round() as u32)
                .clamp(request.min_integration_ms, request.max_integration_ms);

            if integration_ms == prev_integration && gain_db == prev_gain {
                // rounding deadlock; force a single-unit nudge
                if scale > 1.0 {
                    if integration_ms < request.max_integration_ms {
                        integration_ms += 1;
                    } else if gain_db < request.max_gain_db {
                        gain_db = (gain_db + 0.1).min(request.max_gain_db);
                        gain_linear = db_to_linear(gain_db);
                    } else {
                        break;
                    }
                } else if gain_db > request.min_gain_db {
                    gain_db = (gain_db - 0.1).max(request.min_gain_db);
                    gain_linear = db_to_linear(gain_db);
                } else if integration_ms > request.min_integration_ms {
                    integration_ms -= 1;
                } else {
                    break;
                }
            }

            spectrum = self
                .averaged_capture(driver, integration_ms, gain_db, 1)
                .await?;
            max_signal = peak(&spectrum);

            if in_window(max_signal) {
                converged = true;
            } else if max_signal < request.min_counts
                && integration_ms >= request.max_integration_ms
                && gain_db >= request.max_gain_db
            {
                debug!("window unreachable within parameter limits");
                break;
            }
        }

        let averages = averaged_count(request.max_total_ms, integration_ms);
        debug!(
            "settled on integration {integration_ms} ms, gain {gain_db:.1} dB, \
             {averages} frame(s) each of signal and dark"
        );

        // signal first while the laser is still warm, then dark
        let signal = self
            .averaged_capture(driver, integration_ms, gain_db, averages)
            .await?;
        driver.set_laser_enable(false).await?;
        let dark = self
            .averaged_capture(driver, integration_ms, gain_db, averages)
            .await?;

        let spectrum = signal
            .iter()
            .zip(dark.iter())
            .map(|(s, d)| s - d)
            .collect();

        Ok(AutoExposureResult {
            integration_time_ms: integration_ms,
            gain_db,
            averaged_count: averages,
            iterations,
            converged,
            spectrum,
            dark,
        })
    }

    /// Apply settings, take one throwaway frame, then average `count` frames.
    /// Every capture is preceded by a settling delay.
    async fn averaged_capture<D: ExposureDriver>(
        &self,
        driver: &mut D,
        integration_ms: u32,
        gain_db: f64,
        count: u32,
    ) -> Result<Vec<f64>> {
        driver.set_integration_time_ms(integration_ms).await?;
        driver.set_gain_db(gain_db as f32).await?;

        self.settle().await;
        let _throwaway = driver.capture().await?;

        let mut sum: Vec<f64> = Vec::new();
        for _ in 0..count {
            self.settle().await;
            let frame = driver.capture().await?;
            if sum.is_empty() {
                sum = frame;
            } else {
                if frame.len() != sum.len() {
                    return Err(SpectroError::FrameTooShort {
                        expected: sum.len(),
                        actual: frame.len(),
                    });
                }
                for (acc, sample) in sum.iter_mut().zip(frame.iter()) {
                    *acc += sample;
                }
            }
        }
        let n = f64::from(count.max(1));
        for sample in &mut sum {
            *sample /= n;
        }
        Ok(sum)
    }

    async fn settle(&self) {
        if !self.settling_delay.is_zero() {
            tokio::time::sleep(self.settling_delay).await;
        }
    }
}

fn peak(spectrum: &[f64]) -> f64 {
    spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_linear_round_trip() {
        for db in [0.0, 0.1, 6.0, 20.0, 32.0] {
            assert!((linear_to_db(db_to_linear(db)) - db).abs() < 1e-9);
        }
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn averaged_count_pairs_signal_with_dark() {
        assert_eq!(averaged_count(10_000, 500), 10);
        assert_eq!(averaged_count(10_000, 2_000), 2);
        // never below one frame, even when the budget is exhausted
        assert_eq!(averaged_count(1_000, 2_000), 1);
        assert_eq!(averaged_count(0, 0), 1);
    }

    #[test]
    fn request_validation_rejects_bad_windows() {
        let mut request = AutoExposureRequest::default();
        request.min_counts = 50_000.0;
        assert!(request.validate().is_err());

        let mut request = AutoExposureRequest::default();
        request.min_integration_ms = 0;
        assert!(request.validate().is_err());

        let mut request = AutoExposureRequest::default();
        request.drop_factor = 1.5;
        assert!(request.validate().is_err());
    }
}
