//! Auto-exposure controller against a synthetic linear detector,
//! `signal = dark + k × integration_ms × gain_linear`, clipped at the
//! 16-bit ADC ceiling.

use async_trait::async_trait;
use std::time::Duration;

use spectro::autoexposure::db_to_linear;
use spectro::{AutoExposure, AutoExposureRequest, ExposureDriver, Result};

const FULL_SCALE: f64 = 65_535.0;
const DARK: f64 = 1_000.0;

struct LinearDetector {
    k: f64,
    pixels: usize,
    integration_ms: u32,
    gain_db: f32,
    laser_enabled: bool,
    captures: u32,
}

impl LinearDetector {
    fn new(k: f64) -> Self {
        Self {
            k,
            pixels: 32,
            integration_ms: 0,
            gain_db: 0.0,
            laser_enabled: false,
            captures: 0,
        }
    }

    fn level(&self) -> f64 {
        let mut level = DARK;
        if self.laser_enabled {
            level += self.k * f64::from(self.integration_ms) * db_to_linear(f64::from(self.gain_db));
        }
        level.min(FULL_SCALE)
    }
}

#[async_trait]
impl ExposureDriver for LinearDetector {
    async fn set_integration_time_ms(&mut self, ms: u32) -> Result<()> {
        self.integration_ms = ms;
        Ok(())
    }

    async fn set_gain_db(&mut self, db: f32) -> Result<()> {
        self.gain_db = db;
        Ok(())
    }

    async fn set_laser_enable(&mut self, enabled: bool) -> Result<()> {
        self.laser_enabled = enabled;
        Ok(())
    }

    async fn capture(&mut self) -> Result<Vec<f64>> {
        self.captures += 1;
        Ok(vec![self.level(); self.pixels])
    }
}

fn request() -> AutoExposureRequest {
    AutoExposureRequest {
        target_counts: 45_000.0,
        min_counts: 40_000.0,
        max_counts: 50_000.0,
        saturation_counts: 65_000.0,
        max_factor: 10.0,
        drop_factor: 0.5,
        start_integration_ms: 10,
        min_integration_ms: 1,
        max_integration_ms: 5_000,
        start_gain_db: 0.0,
        min_gain_db: 0.0,
        max_gain_db: 30.0,
        max_total_ms: 10_000,
        max_iterations: 20,
    }
}

fn controller() -> AutoExposure {
    let _ = env_logger::builder().is_test(true).try_init();
    AutoExposure::new(Duration::ZERO)
}

#[tokio::test]
async fn converges_across_three_orders_of_magnitude() {
    for k in [1.0, 10.0, 100.0, 1_000.0] {
        let mut detector = LinearDetector::new(k);
        let request = request();
        let result = controller()
            .run(&mut detector, &request)
            .await
            .expect("controller run");

        assert!(result.converged, "k={k} did not converge");
        assert!(
            result.iterations <= request.max_iterations,
            "k={k} took {} iterations",
            result.iterations
        );

        // replay the model at the chosen parameters
        let signal =
            DARK + k * f64::from(result.integration_time_ms) * db_to_linear(result.gain_db);
        assert!(
            request.min_counts < signal && signal < request.max_counts,
            "k={k} settled outside window at {signal}"
        );

        // laser must be off once the run is complete
        assert!(!detector.laser_enabled, "k={k} left the laser on");
    }
}

#[tokio::test]
async fn terminates_unconverged_when_window_is_unreachable() {
    // even max exposure and max gain cannot lift the signal into the window
    let mut detector = LinearDetector::new(0.001);
    let request = request();
    let result = controller()
        .run(&mut detector, &request)
        .await
        .expect("controller run");

    assert!(!result.converged);
    assert_eq!(result.integration_time_ms, request.max_integration_ms);
    assert!(result.gain_db >= request.max_gain_db);
    assert!(result.iterations <= request.max_iterations);
    assert!(!detector.laser_enabled);
}

#[tokio::test]
async fn saturation_forces_the_drop_factor_and_terminates_at_minima() {
    // so bright that even 1 ms at minimum gain saturates
    let mut detector = LinearDetector::new(100_000.0);
    let request = request();
    let result = controller()
        .run(&mut detector, &request)
        .await
        .expect("controller run");

    assert!(!result.converged);
    assert_eq!(result.integration_time_ms, request.min_integration_ms);
    assert_eq!(result.gain_db, request.min_gain_db);
}

#[tokio::test]
async fn dark_is_subtracted_from_the_signal() {
    let mut detector = LinearDetector::new(100.0);
    let request = request();
    let result = controller()
        .run(&mut detector, &request)
        .await
        .expect("controller run");
    assert!(result.converged);

    assert!(result.dark.iter().all(|&d| d == DARK));
    let expected = DARK
        + 100.0 * f64::from(result.integration_time_ms) * db_to_linear(result.gain_db)
        - DARK;
    for sample in &result.spectrum {
        assert!((sample - expected).abs() < 1e-6);
    }
}

#[tokio::test]
async fn averaged_count_consumes_the_time_budget() {
    let mut detector = LinearDetector::new(10.0);
    let mut request = request();
    request.max_total_ms = 8_000;
    let result = controller()
        .run(&mut detector, &request)
        .await
        .expect("controller run");
    assert!(result.converged);

    let expected = (request.max_total_ms / (2 * result.integration_time_ms)).max(1);
    assert_eq!(result.averaged_count, expected);
    // signal + dark averaging plus throwaways all hit the detector
    assert!(detector.captures >= 2 * result.averaged_count + 2);
}

#[tokio::test]
async fn already_in_window_needs_no_iterations() {
    // start parameters land directly in the window: 1000 + 44 * 1000 = 45000
    let mut detector = LinearDetector::new(44.0);
    let mut request = request();
    request.start_integration_ms = 1_000;
    let result = controller()
        .run(&mut detector, &request)
        .await
        .expect("controller run");

    assert!(result.converged);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.integration_time_ms, 1_000);
}
