//! Binary configuration-record codec.
//!
//! The instrument persists its configuration in an 8-page EEPROM, 64 bytes
//! per page, read out one page at a time at connect. Each field lives at a
//! fixed `(page, offset, length)` address; several fields change width or
//! signedness depending on the record format revision stored at page 0,
//! byte 63, so decoding branches on that byte before anything else.
//!
//! Strings are NUL-terminated within their fixed width and zero-padded on
//! encode. Multi-byte numerics are little-endian throughout the record (the
//! protocol layer has its own per-opcode byte orders; they do not apply
//! here).

pub mod gain;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpectroError};

/// Number of 64-byte pages in the record.
pub const PAGE_COUNT: usize = 8;
/// Bytes per page.
pub const PAGE_LEN: usize = 64;
/// Bad-pixel slots on page 5.
pub const MAX_BAD_PIXELS: usize = 15;
/// Newest record format this codec understands.
pub const LATEST_FORMAT: u8 = 17;
/// Polynomial order of the Raman intensity calibration (subformat 1).
const RAMAN_INTENSITY_ORDER: usize = 5;

pub type Page = [u8; PAGE_LEN];

/// Feature-mask bits, format revision 10 and newer.
mod feature_bits {
    pub const INVERT_X_AXIS: u16 = 0x0001;
    pub const HORIZ_BINNING: u16 = 0x0002;
    pub const GEN15: u16 = 0x0004;
    pub const CUTOFF_FILTER: u16 = 0x0008;
    pub const HARDWARE_EVEN_ODD: u16 = 0x0010;
    pub const SIG_LASER_TEC: u16 = 0x0020;
    pub const INTERLOCK_FEEDBACK: u16 = 0x0040;
    pub const SHUTTER: u16 = 0x0080;
}

/// Decoded configuration record: identity, calibrations, operating limits,
/// bad pixels, capability flags. Immutable after connect apart from the
/// editable-subset update path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    // page 0: identity and detector electronics
    pub model: String,
    pub serial_number: String,
    pub baud_rate: u32,
    pub has_cooling: bool,
    pub has_battery: bool,
    pub has_laser: bool,
    pub excitation_nm: i32,
    pub slit_size_um: i32,
    pub startup_integration_time_ms: u16,
    pub startup_temp_degc: i16,
    pub startup_triggering_scheme: u8,
    pub detector_gain: f32,
    pub detector_offset: i16,
    pub detector_gain_odd: f32,
    pub detector_offset_odd: i16,
    pub startup_laser_tec_setpoint: u16,
    pub format: u8,

    // capability flags unpacked from the feature mask (rev >= 10)
    pub invert_x_axis: bool,
    pub horiz_binning_enabled: bool,
    pub gen15: bool,
    pub cutoff_filter_installed: bool,
    pub hardware_even_odd: bool,
    pub sig_laser_tec: bool,
    pub has_interlock_feedback: bool,
    pub has_shutter: bool,

    // page 1: wavelength and TEC calibrations
    pub wavelength_coeffs: Vec<f32>,
    pub degc_to_dac_coeffs: Vec<f32>,
    pub adc_to_degc_coeffs: Vec<f32>,
    pub max_temp_degc: i16,
    pub min_temp_degc: i16,
    pub tec_r298: i16,
    pub tec_beta: i16,
    pub calibration_date: String,
    pub calibrated_by: String,

    // page 2: detector geometry and linearity
    pub detector: String,
    pub active_pixels_horizontal: u16,
    pub laser_warmup_sec: u8,
    pub active_pixels_vertical: u16,
    pub actual_pixels_horizontal: u16,
    pub roi_horizontal_start: u16,
    pub roi_horizontal_end: u16,
    pub roi_vertical_region_1_start: u16,
    pub roi_vertical_region_1_end: u16,
    pub roi_vertical_region_2_start: u16,
    pub roi_vertical_region_2_end: u16,
    pub roi_vertical_region_3_start: u16,
    pub roi_vertical_region_3_end: u16,
    pub linearity_coeffs: Vec<f32>,

    // page 3: laser calibration and integration limits
    pub laser_power_coeffs: Vec<f32>,
    pub max_laser_power_mw: f32,
    pub min_laser_power_mw: f32,
    pub excitation_nm_float: f32,
    pub min_integration_time_ms: u32,
    pub max_integration_time_ms: u32,
    pub avg_resolution: f32,
    pub laser_watchdog_sec: u16,
    pub light_source_type: u8,
    pub power_timeout_sec: u16,
    pub detector_timeout_sec: u16,
    pub horiz_binning_mode: u8,

    // page 4: free-form user area
    pub user_text: String,

    // page 5: bad pixels and product data
    pub bad_pixels: Vec<usize>,
    pub product_configuration: String,
    pub subformat: u8,

    // pages 6-7, subformat 1: Raman intensity calibration
    pub raman_intensity_coeffs: Vec<f32>,
}

impl Default for ConfigurationRecord {
    fn default() -> Self {
        Self {
            model: String::new(),
            serial_number: String::new(),
            baud_rate: 0,
            has_cooling: false,
            has_battery: false,
            has_laser: false,
            excitation_nm: 0,
            slit_size_um: 0,
            startup_integration_time_ms: 10,
            startup_temp_degc: 15,
            startup_triggering_scheme: 0,
            detector_gain: 1.9,
            detector_offset: 0,
            detector_gain_odd: 1.9,
            detector_offset_odd: 0,
            startup_laser_tec_setpoint: 0,
            format: LATEST_FORMAT,
            invert_x_axis: false,
            horiz_binning_enabled: false,
            gen15: false,
            cutoff_filter_installed: false,
            hardware_even_odd: false,
            sig_laser_tec: false,
            has_interlock_feedback: false,
            has_shutter: false,
            wavelength_coeffs: vec![0.0, 1.0, 0.0, 0.0, 0.0],
            degc_to_dac_coeffs: vec![0.0; 3],
            adc_to_degc_coeffs: vec![0.0; 3],
            max_temp_degc: 20,
            min_temp_degc: 10,
            tec_r298: 0,
            tec_beta: 0,
            calibration_date: String::new(),
            calibrated_by: String::new(),
            detector: String::new(),
            active_pixels_horizontal: 1024,
            laser_warmup_sec: 0,
            active_pixels_vertical: 0,
            actual_pixels_horizontal: 1024,
            roi_horizontal_start: 0,
            roi_horizontal_end: 0,
            roi_vertical_region_1_start: 0,
            roi_vertical_region_1_end: 0,
            roi_vertical_region_2_start: 0,
            roi_vertical_region_2_end: 0,
            roi_vertical_region_3_start: 0,
            roi_vertical_region_3_end: 0,
            linearity_coeffs: vec![0.0; 5],
            laser_power_coeffs: vec![0.0; 4],
            max_laser_power_mw: 0.0,
            min_laser_power_mw: 0.0,
            excitation_nm_float: 0.0,
            min_integration_time_ms: 10,
            max_integration_time_ms: 60_000,
            avg_resolution: 0.0,
            laser_watchdog_sec: 0,
            light_source_type: 0,
            power_timeout_sec: 0,
            detector_timeout_sec: 0,
            horiz_binning_mode: 0,
            user_text: String::new(),
            bad_pixels: Vec::new(),
            product_configuration: String::new(),
            subformat: 0,
            raman_intensity_coeffs: Vec::new(),
        }
    }
}

/// Fields users may overwrite through the editable-subset update path.
/// Everything else is calibration-critical and write-protected.
pub const EDITABLE_FIELDS: &[&str] = &[
    "avg_resolution",
    "bad_pixels",
    "calibrated_by",
    "calibration_date",
    "cutoff_filter_installed",
    "detector_gain",
    "detector_gain_odd",
    "detector_offset",
    "detector_offset_odd",
    "excitation_nm",
    "excitation_nm_float",
    "gen15",
    "has_shutter",
    "horiz_binning_enabled",
    "laser_power_coeffs",
    "laser_warmup_sec",
    "laser_watchdog_sec",
    "linearity_coeffs",
    "max_laser_power_mw",
    "min_laser_power_mw",
    "raman_intensity_coeffs",
    "roi_horizontal_end",
    "roi_horizontal_start",
    "roi_vertical_region_1_end",
    "roi_vertical_region_1_start",
    "roi_vertical_region_2_end",
    "roi_vertical_region_2_start",
    "roi_vertical_region_3_end",
    "roi_vertical_region_3_start",
    "user_text",
    "wavelength_coeffs",
];

impl ConfigurationRecord {
    pub fn is_editable(name: &str) -> bool {
        EDITABLE_FIELDS
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Copy every editable field from `other` into `self`, leaving the
    /// calibration-critical remainder untouched.
    pub fn update_editable(&mut self, other: &ConfigurationRecord) {
        self.avg_resolution = other.avg_resolution;
        self.bad_pixels = other.bad_pixels.clone();
        self.calibrated_by = other.calibrated_by.clone();
        self.calibration_date = other.calibration_date.clone();
        self.cutoff_filter_installed = other.cutoff_filter_installed;
        self.detector_gain = other.detector_gain;
        self.detector_gain_odd = other.detector_gain_odd;
        self.detector_offset = other.detector_offset;
        self.detector_offset_odd = other.detector_offset_odd;
        self.excitation_nm = other.excitation_nm;
        self.excitation_nm_float = other.excitation_nm_float;
        self.gen15 = other.gen15;
        self.has_shutter = other.has_shutter;
        self.horiz_binning_enabled = other.horiz_binning_enabled;
        self.laser_power_coeffs = other.laser_power_coeffs.clone();
        self.laser_warmup_sec = other.laser_warmup_sec;
        self.laser_watchdog_sec = other.laser_watchdog_sec;
        self.linearity_coeffs = other.linearity_coeffs.clone();
        self.max_laser_power_mw = other.max_laser_power_mw;
        self.min_laser_power_mw = other.min_laser_power_mw;
        self.raman_intensity_coeffs = other.raman_intensity_coeffs.clone();
        self.roi_horizontal_end = other.roi_horizontal_end;
        self.roi_horizontal_start = other.roi_horizontal_start;
        self.roi_vertical_region_1_end = other.roi_vertical_region_1_end;
        self.roi_vertical_region_1_start = other.roi_vertical_region_1_start;
        self.roi_vertical_region_2_end = other.roi_vertical_region_2_end;
        self.roi_vertical_region_2_start = other.roi_vertical_region_2_start;
        self.roi_vertical_region_3_end = other.roi_vertical_region_3_end;
        self.roi_vertical_region_3_start = other.roi_vertical_region_3_start;
        self.user_text = other.user_text.clone();
        self.wavelength_coeffs = other.wavelength_coeffs.clone();
    }

    // ------------------------------------------------------------------
    // decode
    // ------------------------------------------------------------------

    /// Parse the record from at least 6 pages read off the instrument.
    pub fn decode(pages: &[Page]) -> Result<Self> {
        if pages.len() < 6 {
            return Err(SpectroError::Configuration(format!(
                "expected at least 6 configuration pages, got {}",
                pages.len()
            )));
        }

        let r = PageReader { pages };
        let mut rec = ConfigurationRecord {
            format: r.u8(0, 63),
            ..ConfigurationRecord::default()
        };
        let rev = rec.format;
        debug!("parsing configuration record format {rev}");

        // page 0
        rec.model = r.string(0, 0, 16);
        rec.serial_number = r.string(0, 16, 16);
        rec.baud_rate = r.u32_le(0, 32);
        rec.has_cooling = r.u8(0, 36) != 0;
        rec.has_battery = r.u8(0, 37) != 0;
        rec.has_laser = r.u8(0, 38) != 0;
        let mut feature_mask = 0u16;
        if rev >= 10 {
            feature_mask = r.u16_le(0, 39);
        } else if rev >= 3 {
            rec.excitation_nm = i32::from(r.u16_le(0, 39));
        } else {
            rec.excitation_nm = i32::from(r.i16_le(0, 39));
        }
        rec.slit_size_um = if rev >= 4 {
            i32::from(r.u16_le(0, 41))
        } else {
            i32::from(r.i16_le(0, 41))
        };
        if rev >= 3 {
            rec.startup_integration_time_ms = r.u16_le(0, 43);
            rec.startup_temp_degc = r.i16_le(0, 45);
            rec.startup_triggering_scheme = r.u8(0, 47);
            rec.detector_gain = r.f32_le(0, 48);
            rec.detector_offset = r.i16_le(0, 52);
            rec.detector_gain_odd = r.f32_le(0, 54);
            rec.detector_offset_odd = r.i16_le(0, 58);
        }
        if rev >= 16 {
            rec.startup_laser_tec_setpoint = r.u16_le(0, 60) & 0xfff;
        }

        // page 1
        rec.wavelength_coeffs = (0..4).map(|i| r.f32_le(1, i * 4)).collect();
        rec.degc_to_dac_coeffs = (0..3).map(|i| r.f32_le(1, 16 + i * 4)).collect();
        rec.max_temp_degc = r.i16_le(1, 28);
        rec.min_temp_degc = r.i16_le(1, 30);
        rec.adc_to_degc_coeffs = (0..3).map(|i| r.f32_le(1, 32 + i * 4)).collect();
        rec.tec_r298 = r.i16_le(1, 44);
        rec.tec_beta = r.i16_le(1, 46);
        rec.calibration_date = r.string(1, 48, 12);
        rec.calibrated_by = r.string(1, 60, 3);

        // page 2
        rec.detector = r.string(2, 0, 16);
        rec.active_pixels_horizontal = r.u16_le(2, 16);
        if rev >= 10 {
            rec.laser_warmup_sec = r.u8(2, 18);
        }
        rec.active_pixels_vertical = r.u16_format_gated(2, 19, rev >= 4);
        if rev >= 8 {
            rec.wavelength_coeffs.push(r.f32_le(2, 21));
        } else if rev < 5 {
            rec.min_integration_time_ms = u32::from(r.u16_le(2, 21));
            rec.max_integration_time_ms = u32::from(r.u16_le(2, 23));
        }
        rec.actual_pixels_horizontal = r.u16_format_gated(2, 25, rev >= 4);
        rec.roi_horizontal_start = r.u16_format_gated(2, 27, rev >= 4);
        rec.roi_horizontal_end = r.u16_format_gated(2, 29, rev >= 4);
        rec.roi_vertical_region_1_start = r.u16_format_gated(2, 31, rev >= 4);
        rec.roi_vertical_region_1_end = r.u16_format_gated(2, 33, rev >= 4);
        rec.roi_vertical_region_2_start = r.u16_format_gated(2, 35, rev >= 4);
        rec.roi_vertical_region_2_end = r.u16_format_gated(2, 37, rev >= 4);
        rec.roi_vertical_region_3_start = r.u16_format_gated(2, 39, rev >= 4);
        rec.roi_vertical_region_3_end = r.u16_format_gated(2, 41, rev >= 4);
        rec.linearity_coeffs = (0..5).map(|i| r.f32_le(2, 43 + i * 4)).collect();

        // page 3
        rec.laser_power_coeffs = (0..4).map(|i| r.f32_le(3, 12 + i * 4)).collect();
        rec.max_laser_power_mw = r.f32_le(3, 28);
        rec.min_laser_power_mw = r.f32_le(3, 32);
        rec.excitation_nm_float = if rev >= 4 {
            r.f32_le(3, 36)
        } else {
            rec.excitation_nm as f32
        };
        if rev >= 5 {
            rec.min_integration_time_ms = r.u32_le(3, 40);
            rec.max_integration_time_ms = r.u32_le(3, 44);
        }
        if rev >= 7 {
            rec.avg_resolution = r.f32_le(3, 48);
        }
        if rev >= 15 {
            rec.laser_watchdog_sec = r.u16_le(3, 52);
            rec.light_source_type = r.u8(3, 54);
        }
        if rev >= 16 {
            rec.power_timeout_sec = r.u16_le(3, 55);
            rec.detector_timeout_sec = r.u16_le(3, 57);
            rec.horiz_binning_mode = r.u8(3, 59);
        }

        // page 4
        rec.user_text = printable(&pages[4][..63]);

        // page 5: 15 signed slots, -1 marks unused; result sorted and unique
        let mut bad = std::collections::BTreeSet::new();
        for slot in 0..MAX_BAD_PIXELS {
            let pixel = r.i16_le(5, slot * 2);
            if pixel >= 0 {
                bad.insert(pixel as usize);
            }
        }
        rec.bad_pixels = bad.into_iter().collect();
        if rev >= 5 {
            rec.product_configuration = r.string(5, 30, 16);
        }
        if rev >= 7 {
            rec.subformat = r.u8(5, 63);
        }

        // pages 6-7
        if rec.subformat == 1 && pages.len() > 6 {
            rec.raman_intensity_coeffs = (0..=RAMAN_INTENSITY_ORDER)
                .map(|i| r.f32_le(6, 1 + i * 4))
                .collect();
        }

        if rev >= 10 {
            // the excitation bytes on page 0 were repurposed as the feature
            // mask; the float field on page 3 is authoritative
            rec.excitation_nm = rec.excitation_nm_float.round() as i32;
            rec.invert_x_axis = feature_mask & feature_bits::INVERT_X_AXIS != 0;
            rec.horiz_binning_enabled = feature_mask & feature_bits::HORIZ_BINNING != 0;
            rec.gen15 = feature_mask & feature_bits::GEN15 != 0;
            rec.cutoff_filter_installed = feature_mask & feature_bits::CUTOFF_FILTER != 0;
            rec.hardware_even_odd = feature_mask & feature_bits::HARDWARE_EVEN_ODD != 0;
            rec.sig_laser_tec = feature_mask & feature_bits::SIG_LASER_TEC != 0;
            rec.has_interlock_feedback = feature_mask & feature_bits::INTERLOCK_FEEDBACK != 0;
            rec.has_shutter = feature_mask & feature_bits::SHUTTER != 0;
        }

        rec.apply_sanity_checks();
        rec.validate()?;
        Ok(rec)
    }

    /// Repair the handful of known-inconsistent states seen in fielded units.
    fn apply_sanity_checks(&mut self) {
        self.wavelength_coeffs.retain(|c| !c.is_nan());

        if self.min_integration_time_ms == 0xffff {
            self.min_integration_time_ms = 1;
            self.max_integration_time_ms = 60_000;
        }
        if self.min_integration_time_ms > self.max_integration_time_ms {
            std::mem::swap(
                &mut self.min_integration_time_ms,
                &mut self.max_integration_time_ms,
            );
        }
        if u32::from(self.startup_integration_time_ms) < self.min_integration_time_ms {
            self.startup_integration_time_ms = self.min_integration_time_ms as u16;
        }
        if self.min_temp_degc > self.max_temp_degc {
            std::mem::swap(&mut self.min_temp_degc, &mut self.max_temp_degc);
        }
        if self.min_laser_power_mw > self.max_laser_power_mw {
            std::mem::swap(&mut self.min_laser_power_mw, &mut self.max_laser_power_mw);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.active_pixels_horizontal == 0 {
            return Err(SpectroError::Configuration(
                "record reports zero active pixels".into(),
            ));
        }
        let coeffs = self.wavelength_coeffs.len();
        if coeffs != 0 && coeffs != 4 && coeffs != 5 {
            return Err(SpectroError::Configuration(format!(
                "wavelength calibration has {coeffs} coefficients (expected 0, 4 or 5)"
            )));
        }
        if !self.degc_to_dac_coeffs.is_empty() && self.degc_to_dac_coeffs.len() != 3 {
            return Err(SpectroError::Configuration(format!(
                "TEC calibration has {} coefficients (expected 0 or 3)",
                self.degc_to_dac_coeffs.len()
            )));
        }
        if let Some(&worst) = self.bad_pixels.last() {
            if worst >= usize::from(self.active_pixels_horizontal) {
                return Err(SpectroError::Configuration(format!(
                    "bad pixel {worst} outside detector of {} pixels",
                    self.active_pixels_horizontal
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // encode
    // ------------------------------------------------------------------

    /// Render all 8 write pages. Callers writing back a partial update select
    /// which pages actually go to the instrument.
    pub fn encode(&self) -> [Page; PAGE_COUNT] {
        let mut pages = [[0u8; PAGE_LEN]; PAGE_COUNT];

        // Legacy per-page format bytes retained for compatibility with the
        // oldest console tools; modern readers only look at page 0 byte 63.
        for (page, legacy_rev) in [(0, 1u8), (1, 1), (2, 2), (3, 255), (4, 1), (5, 1), (6, 0)] {
            pages[page][63] = legacy_rev;
        }
        pages[0][63] = self.format;
        let rev = self.format;

        let mut w = PageWriter { pages: &mut pages };

        // page 0
        w.string(0, 0, 16, &self.model);
        w.string(0, 16, 16, &self.serial_number);
        w.u32_le(0, 32, self.baud_rate);
        w.u8(0, 36, self.has_cooling as u8);
        w.u8(0, 37, self.has_battery as u8);
        w.u8(0, 38, self.has_laser as u8);
        if rev >= 10 {
            w.u16_le(0, 39, self.feature_mask());
        } else {
            w.i16_le(0, 39, self.excitation_nm as i16);
        }
        w.u16_le(0, 41, self.slit_size_um as u16);
        if rev >= 3 {
            w.u16_le(0, 43, self.startup_integration_time_ms);
            w.i16_le(0, 45, self.startup_temp_degc);
            w.u8(0, 47, self.startup_triggering_scheme);
            w.f32_le(0, 48, self.detector_gain);
            w.i16_le(0, 52, self.detector_offset);
            w.f32_le(0, 54, self.detector_gain_odd);
            w.i16_le(0, 58, self.detector_offset_odd);
        }
        if rev >= 16 {
            w.u16_le(0, 60, self.startup_laser_tec_setpoint & 0xfff);
        }

        // page 1
        for (i, c) in self.wavelength_coeffs.iter().take(4).enumerate() {
            w.f32_le(1, i * 4, *c);
        }
        for (i, c) in self.degc_to_dac_coeffs.iter().take(3).enumerate() {
            w.f32_le(1, 16 + i * 4, *c);
        }
        w.i16_le(1, 28, self.max_temp_degc);
        w.i16_le(1, 30, self.min_temp_degc);
        for (i, c) in self.adc_to_degc_coeffs.iter().take(3).enumerate() {
            w.f32_le(1, 32 + i * 4, *c);
        }
        w.i16_le(1, 44, self.tec_r298);
        w.i16_le(1, 46, self.tec_beta);
        w.string(1, 48, 12, &self.calibration_date);
        w.string(1, 60, 3, &self.calibrated_by);

        // page 2
        w.string(2, 0, 16, &self.detector);
        w.u16_le(2, 16, self.active_pixels_horizontal);
        if rev >= 10 {
            w.u8(2, 18, self.laser_warmup_sec);
        }
        w.u16_le(2, 19, self.active_pixels_vertical);
        if rev >= 8 {
            w.f32_le(2, 21, self.wavelength_coeffs.get(4).copied().unwrap_or(0.0));
        } else if rev < 5 {
            w.u16_le(2, 21, self.min_integration_time_ms.min(0xffff) as u16);
            w.u16_le(2, 23, self.max_integration_time_ms.min(0xffff) as u16);
        }
        w.u16_le(2, 25, self.actual_pixels_horizontal);
        w.u16_le(2, 27, self.roi_horizontal_start);
        w.u16_le(2, 29, self.roi_horizontal_end);
        w.u16_le(2, 31, self.roi_vertical_region_1_start);
        w.u16_le(2, 33, self.roi_vertical_region_1_end);
        w.u16_le(2, 35, self.roi_vertical_region_2_start);
        w.u16_le(2, 37, self.roi_vertical_region_2_end);
        w.u16_le(2, 39, self.roi_vertical_region_3_start);
        w.u16_le(2, 41, self.roi_vertical_region_3_end);
        for (i, c) in self.linearity_coeffs.iter().take(5).enumerate() {
            w.f32_le(2, 43 + i * 4, *c);
        }

        // page 3
        for (i, c) in self.laser_power_coeffs.iter().take(4).enumerate() {
            w.f32_le(3, 12 + i * 4, *c);
        }
        w.f32_le(3, 28, self.max_laser_power_mw);
        w.f32_le(3, 32, self.min_laser_power_mw);
        if rev >= 4 {
            w.f32_le(3, 36, self.excitation_nm_float);
        }
        if rev >= 5 {
            w.u32_le(3, 40, self.min_integration_time_ms);
            w.u32_le(3, 44, self.max_integration_time_ms);
        }
        if rev >= 7 {
            w.f32_le(3, 48, self.avg_resolution);
        }
        if rev >= 15 {
            w.u16_le(3, 52, self.laser_watchdog_sec);
            w.u8(3, 54, self.light_source_type);
        }
        if rev >= 16 {
            w.u16_le(3, 55, self.power_timeout_sec);
            w.u16_le(3, 57, self.detector_timeout_sec);
            w.u8(3, 59, self.horiz_binning_mode);
        }

        // page 4
        w.string(4, 0, 63, &self.user_text);

        // page 5
        for slot in 0..MAX_BAD_PIXELS {
            let value = self
                .bad_pixels
                .get(slot)
                .map(|&p| p as i16)
                .unwrap_or(-1);
            w.i16_le(5, slot * 2, value);
        }
        if rev >= 5 {
            w.string(5, 30, 16, &self.product_configuration);
        }
        if rev >= 7 {
            w.u8(5, 63, self.subformat);
        }

        // pages 6-7
        match self.subformat {
            0 => {}
            1 => {
                w.u8(6, 0, RAMAN_INTENSITY_ORDER as u8);
                for i in 0..=RAMAN_INTENSITY_ORDER {
                    let coeff = self.raman_intensity_coeffs.get(i).copied().unwrap_or(0.0);
                    w.f32_le(6, 1 + i * 4, coeff);
                }
            }
            other => warn!("subformat {other} not encodable; pages 6-7 left blank"),
        }

        pages
    }

    fn feature_mask(&self) -> u16 {
        let mut mask = 0;
        if self.invert_x_axis {
            mask |= feature_bits::INVERT_X_AXIS;
        }
        if self.horiz_binning_enabled {
            mask |= feature_bits::HORIZ_BINNING;
        }
        if self.gen15 {
            mask |= feature_bits::GEN15;
        }
        if self.cutoff_filter_installed {
            mask |= feature_bits::CUTOFF_FILTER;
        }
        if self.hardware_even_odd {
            mask |= feature_bits::HARDWARE_EVEN_ODD;
        }
        if self.sig_laser_tec {
            mask |= feature_bits::SIG_LASER_TEC;
        }
        if self.has_interlock_feedback {
            mask |= feature_bits::INTERLOCK_FEEDBACK;
        }
        if self.has_shutter {
            mask |= feature_bits::SHUTTER;
        }
        mask
    }

    // ------------------------------------------------------------------
    // convenience accessors
    // ------------------------------------------------------------------

    /// Pixels actually read out over the bus.
    pub fn pixels(&self) -> usize {
        usize::from(self.active_pixels_horizontal)
    }

    /// InGaAs detectors carry a separate gain/offset calibration for odd
    /// pixels.
    pub fn is_ingaas(&self) -> bool {
        let detector = self.detector.to_ascii_uppercase();
        detector.contains("G9214") || detector.contains("INGAAS")
    }

    pub fn has_laser_power_calibration(&self) -> bool {
        self.max_laser_power_mw > 0.0 && coeffs_look_valid(&self.laser_power_coeffs, 4)
    }

    pub fn has_detector_tec_calibration(&self) -> bool {
        if !coeffs_look_valid(&self.degc_to_dac_coeffs, 3) {
            return false;
        }
        // the factory-default placeholder does not count
        !(self.degc_to_dac_coeffs[0] == 2700.0
            && self.degc_to_dac_coeffs[1] == 0.0
            && self.degc_to_dac_coeffs[2] == 0.0)
    }

    /// Convert a laser output power in mW to a modulation percentage through
    /// the calibration polynomial.
    pub fn laser_power_mw_to_percent(&self, mw: f32) -> f32 {
        if !self.has_laser_power_calibration() {
            return 0.0;
        }
        let c = &self.laser_power_coeffs;
        c[0] + c[1] * mw + c[2] * mw * mw + c[3] * mw * mw * mw
    }

    /// Wavelength axis in nm from the wavelength calibration polynomial.
    pub fn wavelengths(&self) -> Vec<f64> {
        let pixels = self.pixels();
        (0..pixels)
            .map(|px| {
                self.wavelength_coeffs
                    .iter()
                    .enumerate()
                    .map(|(order, &c)| f64::from(c) * (px as f64).powi(order as i32))
                    .sum()
            })
            .collect()
    }

    /// Raman shift axis in 1/cm, when an excitation wavelength is configured.
    pub fn wavenumbers(&self) -> Option<Vec<f64>> {
        let excitation = if self.excitation_nm_float > 0.0 {
            f64::from(self.excitation_nm_float)
        } else if self.excitation_nm > 0 {
            f64::from(self.excitation_nm)
        } else {
            return None;
        };
        let base = 1e7 / excitation;
        Some(
            self.wavelengths()
                .iter()
                .map(|&nm| if nm > 0.0 { base - 1e7 / nm } else { 0.0 })
                .collect(),
        )
    }

    /// JSON rendering for diagnostics.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SpectroError::Configuration(format!("serializing record: {e}")))
    }
}

fn coeffs_look_valid(coeffs: &[f32], count: usize) -> bool {
    coeffs.len() == count
        && coeffs.iter().all(|c| c.is_finite())
        && coeffs.iter().any(|&c| c != 0.0 && c != -1.0)
}

/// Printable ASCII rendering of a possibly-binary buffer, stopping at NUL.
fn printable(buf: &[u8]) -> String {
    let mut s = String::new();
    for &c in buf {
        if c == 0 {
            break;
        } else if (32..127).contains(&c) {
            s.push(c as char);
        } else {
            s.push('.');
        }
    }
    s
}

// ----------------------------------------------------------------------
// page access helpers
// ----------------------------------------------------------------------

struct PageReader<'a> {
    pages: &'a [Page],
}

impl PageReader<'_> {
    fn u8(&self, page: usize, offset: usize) -> u8 {
        self.pages[page][offset]
    }

    fn u16_le(&self, page: usize, offset: usize) -> u16 {
        u16::from_le_bytes([self.pages[page][offset], self.pages[page][offset + 1]])
    }

    fn i16_le(&self, page: usize, offset: usize) -> i16 {
        self.u16_le(page, offset) as i16
    }

    /// Several page-2 geometry fields were signed in early revisions.
    /// Negative legacy values clamp to zero rather than wrapping huge.
    fn u16_format_gated(&self, page: usize, offset: usize, unsigned: bool) -> u16 {
        if unsigned {
            self.u16_le(page, offset)
        } else {
            self.i16_le(page, offset).max(0) as u16
        }
    }

    fn u32_le(&self, page: usize, offset: usize) -> u32 {
        let b = &self.pages[page][offset..offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn f32_le(&self, page: usize, offset: usize) -> f32 {
        f32::from_bits(self.u32_le(page, offset))
    }

    fn string(&self, page: usize, offset: usize, length: usize) -> String {
        let slice = &self.pages[page][offset..offset + length];
        let end = slice.iter().position(|&c| c == 0).unwrap_or(length);
        String::from_utf8_lossy(&slice[..end]).into_owned()
    }
}

struct PageWriter<'a> {
    pages: &'a mut [Page; PAGE_COUNT],
}

impl PageWriter<'_> {
    fn u8(&mut self, page: usize, offset: usize, value: u8) {
        self.pages[page][offset] = value;
    }

    fn u16_le(&mut self, page: usize, offset: usize, value: u16) {
        self.pages[page][offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn i16_le(&mut self, page: usize, offset: usize, value: i16) {
        self.u16_le(page, offset, value as u16);
    }

    fn u32_le(&mut self, page: usize, offset: usize, value: u32) {
        self.pages[page][offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn f32_le(&mut self, page: usize, offset: usize, value: f32) {
        self.u32_le(page, offset, value.to_bits());
    }

    fn string(&mut self, page: usize, offset: usize, length: usize, value: &str) {
        let bytes = value.as_bytes();
        for i in 0..length {
            self.pages[page][offset + i] = if i < bytes.len() { bytes[i] } else { 0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(format: u8) -> ConfigurationRecord {
        let mut rec = ConfigurationRecord {
            format,
            model: "WP-785".into(),
            serial_number: "WP-01234".into(),
            baud_rate: 115_200,
            has_cooling: true,
            has_laser: true,
            excitation_nm: 785,
            excitation_nm_float: 784.62,
            slit_size_um: 25,
            startup_integration_time_ms: 100,
            startup_temp_degc: 10,
            detector_gain: 1.9,
            detector_offset: -12,
            detector_gain_odd: 1.85,
            detector_offset_odd: 3,
            wavelength_coeffs: vec![748.485, 0.247, 1.45e-5, -4.65e-8],
            degc_to_dac_coeffs: vec![4258.1, -159.1, -0.952],
            adc_to_degc_coeffs: vec![-108_264.7, 140.86, -0.058],
            max_temp_degc: 20,
            min_temp_degc: -5,
            calibration_date: "2025-06-01".into(),
            calibrated_by: "MZ".into(),
            detector: "S11511".into(),
            active_pixels_horizontal: 1024,
            active_pixels_vertical: 70,
            actual_pixels_horizontal: 1024,
            roi_horizontal_start: 4,
            roi_horizontal_end: 1020,
            linearity_coeffs: vec![1.0, 0.1, 0.01, 0.001, 0.0],
            laser_power_coeffs: vec![0.5, 0.2, 0.001, 0.0001],
            max_laser_power_mw: 450.0,
            min_laser_power_mw: 10.0,
            min_integration_time_ms: 1,
            max_integration_time_ms: 60_000,
            avg_resolution: 8.5,
            user_text: "bench 3".into(),
            bad_pixels: vec![0, 1, 511, 1023],
            product_configuration: "RAMAN-785".into(),
            ..ConfigurationRecord::default()
        };
        if format >= 8 {
            rec.wavelength_coeffs.push(2.1e-12);
        }
        if format >= 10 {
            rec.invert_x_axis = true;
            rec.hardware_even_odd = true;
            rec.has_interlock_feedback = true;
        }
        rec
    }

    #[test]
    fn round_trip_latest_format() {
        let rec = sample_record(LATEST_FORMAT);
        let pages = rec.encode();
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn round_trip_editable_fields_across_revisions() {
        for format in [3u8, 4, 5, 7, 8, 10, 15, 16, LATEST_FORMAT] {
            let rec = sample_record(format);
            let pages = rec.encode();
            let decoded = ConfigurationRecord::decode(&pages).unwrap();

            assert_eq!(decoded.bad_pixels, rec.bad_pixels, "format {format}");
            assert_eq!(decoded.detector_gain, rec.detector_gain, "format {format}");
            assert_eq!(decoded.detector_offset, rec.detector_offset, "format {format}");
            assert_eq!(decoded.calibrated_by, rec.calibrated_by, "format {format}");
            assert_eq!(decoded.linearity_coeffs, rec.linearity_coeffs, "format {format}");
            assert_eq!(
                decoded.laser_power_coeffs, rec.laser_power_coeffs,
                "format {format}"
            );
            assert_eq!(decoded.user_text, rec.user_text, "format {format}");
            assert_eq!(
                decoded.wavelength_coeffs, rec.wavelength_coeffs,
                "format {format}"
            );
            assert_eq!(
                decoded.roi_horizontal_start, rec.roi_horizontal_start,
                "format {format}"
            );
            if format >= 4 {
                assert_eq!(
                    decoded.excitation_nm_float, rec.excitation_nm_float,
                    "format {format}"
                );
            }
            if format >= 7 {
                assert_eq!(decoded.avg_resolution, rec.avg_resolution, "format {format}");
            }
        }
    }

    #[test]
    fn excitation_signedness_gated_by_revision() {
        let mut rec = sample_record(2);
        rec.excitation_nm = -1;
        rec.wavelength_coeffs.truncate(4);
        let pages = rec.encode();
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert_eq!(decoded.excitation_nm, -1);

        let mut pages_unsigned = pages;
        pages_unsigned[0][63] = 3;
        let decoded = ConfigurationRecord::decode(&pages_unsigned).unwrap();
        assert_eq!(decoded.excitation_nm, 0xffff);
    }

    #[test]
    fn bad_pixels_decode_sorted_and_unique() {
        let mut rec = sample_record(LATEST_FORMAT);
        rec.bad_pixels = vec![900, 5, 5, 30];
        let pages = rec.encode();
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert_eq!(decoded.bad_pixels, vec![5, 30, 900]);
    }

    #[test]
    fn unused_bad_pixel_slots_stay_empty() {
        let mut rec = sample_record(LATEST_FORMAT);
        rec.bad_pixels.clear();
        let pages = rec.encode();
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert!(decoded.bad_pixels.is_empty());
    }

    #[test]
    fn inverted_limits_are_swapped_on_decode() {
        let mut rec = sample_record(LATEST_FORMAT);
        rec.min_integration_time_ms = 5000;
        rec.max_integration_time_ms = 100;
        rec.min_temp_degc = 30;
        rec.max_temp_degc = -10;
        let pages = rec.encode();
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert_eq!(decoded.min_integration_time_ms, 100);
        assert_eq!(decoded.max_integration_time_ms, 5000);
        assert_eq!(decoded.min_temp_degc, -10);
        assert_eq!(decoded.max_temp_degc, 30);
    }

    #[test]
    fn decode_rejects_short_page_set() {
        let pages = vec![[0u8; PAGE_LEN]; 3];
        assert!(ConfigurationRecord::decode(&pages).is_err());
    }

    #[test]
    fn decode_rejects_out_of_range_bad_pixel() {
        let mut rec = sample_record(LATEST_FORMAT);
        rec.active_pixels_horizontal = 512;
        rec.actual_pixels_horizontal = 512;
        // bad pixel 1023 is now outside the detector
        let pages = rec.encode();
        assert!(matches!(
            ConfigurationRecord::decode(&pages),
            Err(SpectroError::Configuration(_))
        ));
    }

    #[test]
    fn update_editable_leaves_calibration_untouched() {
        let mut rec = sample_record(LATEST_FORMAT);
        let mut edited = rec.clone();
        edited.user_text = "new label".into();
        edited.bad_pixels = vec![7];
        edited.serial_number = "EVIL".into();
        edited.adc_to_degc_coeffs = vec![1.0, 2.0, 3.0];

        rec.update_editable(&edited);
        assert_eq!(rec.user_text, "new label");
        assert_eq!(rec.bad_pixels, vec![7]);
        // non-editable fields did not move
        assert_eq!(rec.serial_number, "WP-01234");
        assert_eq!(rec.adc_to_degc_coeffs, vec![-108_264.7, 140.86, -0.058]);
    }

    #[test]
    fn editable_lookup_is_case_insensitive() {
        assert!(ConfigurationRecord::is_editable("Bad_Pixels"));
        assert!(!ConfigurationRecord::is_editable("serial_number"));
    }

    #[test]
    fn strings_are_nul_terminated_and_padded() {
        let rec = sample_record(LATEST_FORMAT);
        let pages = rec.encode();
        // "WP-785" is 6 chars; the rest of the 16-byte field must be zero
        assert_eq!(&pages[0][0..6], b"WP-785");
        assert!(pages[0][6..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn wavelength_axis_matches_polynomial() {
        let rec = sample_record(LATEST_FORMAT);
        let wl = rec.wavelengths();
        assert_eq!(wl.len(), 1024);
        let c = &rec.wavelength_coeffs;
        let expected: f64 = (0..c.len())
            .map(|o| f64::from(c[o]) * 10f64.powi(o as i32))
            .sum();
        assert!((wl[10] - expected).abs() < 1e-6);
    }

    #[test]
    fn laser_power_percent_needs_calibration() {
        let mut rec = sample_record(LATEST_FORMAT);
        assert!(rec.has_laser_power_calibration());
        assert!(rec.laser_power_mw_to_percent(100.0) > 0.0);
        rec.max_laser_power_mw = 0.0;
        assert_eq!(rec.laser_power_mw_to_percent(100.0), 0.0);
    }

    #[test]
    fn json_dump_contains_identity() {
        let rec = sample_record(LATEST_FORMAT);
        let json = rec.to_json().unwrap();
        assert!(json.contains("WP-01234"));
    }
}
