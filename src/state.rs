//! Mutable per-session acquisition state.
//!
//! Owned exclusively by the device session; mutated only by the worker loop
//! applying a dequeued command, read by the post-processing pipeline and the
//! auto-exposure controller. Readouts from the instrument (temperatures, ADC
//! values) do not live here; they travel on each [`Reading`](crate::reading::Reading).

use serde::{Deserialize, Serialize};

use crate::eeprom::ConfigurationRecord;
use crate::regions::DetectorRegions;

/// What initiates an acquisition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    #[default]
    Internal,
    External,
}

impl TriggerSource {
    pub fn wire_value(self) -> u16 {
        match self {
            TriggerSource::Internal => 0,
            TriggerSource::External => 1,
        }
    }
}

/// How known-bad pixels are treated during post-processing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BadPixelMode {
    Disabled,
    /// Interpolate across bad runs from the nearest good neighbors.
    #[default]
    Average,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub integration_time_ms: u32,
    /// Single physical gain unit; dB for IMX-family detectors, a raw scalar
    /// for the legacy CCD families.
    pub gain: f32,

    pub laser_enabled: bool,
    /// Requested modulation percentage, always within [0, 100].
    pub laser_power_percent: f32,
    /// Setpoint in mW when the caller last set power in mW, else `None`.
    pub laser_power_mw: Option<f32>,
    /// Power level in effect while the laser was last firing.
    pub last_applied_laser_power: Option<f32>,

    pub tec_enabled: bool,
    /// `None` until a setpoint has been explicitly applied; enabling the TEC
    /// first defaults the setpoint to the record's minimum temperature.
    pub tec_setpoint_degc: Option<f32>,

    pub trigger_source: TriggerSource,
    pub scans_to_average: u32,
    pub bad_pixel_mode: BadPixelMode,
    pub area_scan_enabled: bool,
    pub invert_x_axis: bool,

    // sensor-debug modes
    pub swap_alternating_pixels: bool,
    pub graph_alternating_pixels: bool,
    pub validate_frame_markers: bool,

    pub secondary_adc_enabled: bool,
    /// Start/stop rows of full-detector vertical binning.
    pub vertical_binning: Option<(u16, u16)>,
    /// `None` means the full detector is binned and read out as one frame.
    pub detector_regions: Option<DetectorRegions>,
}

impl RuntimeState {
    /// Startup state derived from the configuration record.
    pub fn from_record(record: &ConfigurationRecord) -> Self {
        Self {
            integration_time_ms: u32::from(record.startup_integration_time_ms),
            gain: record.detector_gain,
            laser_enabled: false,
            laser_power_percent: 100.0,
            laser_power_mw: None,
            last_applied_laser_power: None,
            tec_enabled: false,
            tec_setpoint_degc: None,
            trigger_source: TriggerSource::Internal,
            scans_to_average: 1,
            bad_pixel_mode: BadPixelMode::Average,
            area_scan_enabled: false,
            invert_x_axis: record.invert_x_axis,
            swap_alternating_pixels: false,
            graph_alternating_pixels: false,
            validate_frame_markers: false,
            secondary_adc_enabled: false,
            vertical_binning: None,
            detector_regions: None,
        }
    }

    /// Pixels expected in the next raw frame.
    pub fn frame_pixels(&self, record: &ConfigurationRecord) -> usize {
        match &self.detector_regions {
            Some(regions) if !regions.is_empty() => regions.total_pixels(),
            _ => record.pixels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::DetectorRoi;

    #[test]
    fn startup_state_follows_record() {
        let record = ConfigurationRecord {
            startup_integration_time_ms: 250,
            detector_gain: 8.0,
            invert_x_axis: true,
            ..ConfigurationRecord::default()
        };
        let state = RuntimeState::from_record(&record);
        assert_eq!(state.integration_time_ms, 250);
        assert_eq!(state.gain, 8.0);
        assert!(state.invert_x_axis);
        assert!(!state.laser_enabled);
        assert_eq!(state.scans_to_average, 1);
    }

    #[test]
    fn frame_pixels_prefers_regions() {
        let record = ConfigurationRecord::default();
        let mut state = RuntimeState::from_record(&record);
        assert_eq!(state.frame_pixels(&record), record.pixels());

        let mut regions = DetectorRegions::new();
        regions.add(DetectorRoi::new(0, 0, 10, 0, 300).unwrap());
        regions.add(DetectorRoi::new(1, 10, 20, 0, 200).unwrap());
        state.detector_regions = Some(regions);
        assert_eq!(state.frame_pixels(&record), 500);
    }
}
