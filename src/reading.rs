//! One measurement as published to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single acquisition with the settings that produced it.
///
/// Created by the worker loop once per poll and consumed from the outbound
/// channel; nothing is persisted. `session_count` increases monotonically per
/// session, so gaps on the consumer side indicate dropped dequeues, not
/// dropped acquisitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub session_count: u64,

    /// Corrected samples, already run through the post-processing pipeline.
    /// Concatenated per-region data when detector regions are active.
    pub spectrum: Vec<f64>,

    // settings captured at acquisition time
    pub integration_time_ms: u32,
    pub gain: f32,
    pub laser_enabled: bool,
    pub laser_power_percent: f32,
    pub laser_power_mw: Option<f32>,

    /// True on the reading that completes a scan-averaging cycle; its
    /// spectrum is then the average, not the raw frame.
    pub averaged: bool,
    /// Frames accumulated so far in the current averaging cycle.
    pub sum_count: u32,

    /// Row index extracted from pixel 0 when area-scan mode is active.
    pub area_scan_row: Option<u16>,

    pub detector_temperature_raw: Option<u16>,
    pub detector_temperature_degc: Option<f32>,
    pub laser_temperature_raw: Option<u16>,
    pub laser_temperature_degc: Option<f32>,

    pub secondary_adc_raw: Option<u16>,
    pub secondary_adc_calibrated: Option<f64>,

    /// Set when the hardware signalled an unrecoverable condition; the worker
    /// treats such a reading as poison.
    pub failure: Option<String>,
}

impl Reading {
    pub fn new(session_count: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            session_count,
            spectrum: Vec::new(),
            integration_time_ms: 0,
            gain: 0.0,
            laser_enabled: false,
            laser_power_percent: 0.0,
            laser_power_mw: None,
            averaged: false,
            sum_count: 0,
            area_scan_row: None,
            detector_temperature_raw: None,
            detector_temperature_degc: None,
            laser_temperature_raw: None,
            laser_temperature_degc: None,
            secondary_adc_raw: None,
            secondary_adc_calibrated: None,
            failure: None,
        }
    }
}

/// Classified result of one acquisition attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// No data available yet (e.g. an external trigger has not fired);
    /// the worker should loop again.
    KeepAlive,
    /// A completed measurement ready to publish.
    Reading(Box<Reading>),
}
