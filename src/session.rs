//! One connected instrument: transport, protocol engine, configuration and
//! runtime state under a single owner.
//!
//! A `DeviceSession` is owned exclusively by its worker task; every mutation
//! flows through the serialized command path, so nothing here needs a lock.
//! Connect reads and validates the configuration record before the session
//! is handed to anyone; a decode failure means no session exists at all.

use log::{debug, info, warn};
use std::time::Duration;

use crate::autoexposure::ExposureDriver;
use crate::command::Command;
use crate::config::DriverSettings;
use crate::eeprom::{gain, ConfigurationRecord, Page, PAGE_COUNT, PAGE_LEN};
use crate::error::{Result, Severity, SpectroError};
use crate::pipeline;
use crate::protocol::{opcodes, scalar_u16_be, scalar_u16_le, ProtocolEngine};
use crate::reading::{AcquireOutcome, Reading};
use crate::regions::{DetectorRegions, DetectorRoi};
use crate::state::{RuntimeState, TriggerSource};
use crate::transport::Transport;

use async_trait::async_trait;

use crate::protocol::opcodes::second_tier;

/// Some FX2 opcodes reject control transfers without a data stage.
const PADDING: [u8; 8] = [0; 8];

/// Settling delay applied between configuration page reads at connect.
const PAGE_READ_DELAY: Duration = Duration::from_millis(10);

pub struct DeviceSession {
    engine: ProtocolEngine,
    record: ConfigurationRecord,
    state: RuntimeState,
    settings: DriverSettings,
    session_count: u64,
    summed_spectra: Option<Vec<f64>>,
    sum_count: u32,
    tec_setpoint_applied: bool,
}

impl DeviceSession {
    /// Open a session: read all configuration pages, decode and validate the
    /// record, cross-check the sensor geometry, and apply startup settings.
    pub async fn connect(
        transport: Box<dyn Transport>,
        settings: DriverSettings,
    ) -> Result<Self> {
        let mut engine = ProtocolEngine::new(transport, &settings);

        let mut pages: Vec<Page> = Vec::with_capacity(PAGE_COUNT);
        for page in 0..PAGE_COUNT {
            let data = engine
                .query_second_tier(second_tier::GET_CONFIG_PAGE, page as u16)
                .await?;
            let mut buf = [0u8; PAGE_LEN];
            buf.copy_from_slice(&data[..PAGE_LEN]);
            pages.push(buf);
            tokio::time::sleep(PAGE_READ_DELAY).await;
        }
        let record = ConfigurationRecord::decode(&pages)?;
        info!(
            "connected to {} {} ({} pixels, format {})",
            record.model,
            record.serial_number,
            record.pixels(),
            record.format
        );

        // geometry cross-check against the sensor itself
        let raw = engine
            .query_second_tier(second_tier::GET_LINE_LENGTH, 0)
            .await?;
        let line_length = scalar_u16_le(&raw)?;
        if usize::from(line_length) != record.pixels() {
            warn!(
                "sensor reports {line_length} pixels but record says {}",
                record.pixels()
            );
        }

        if record.has_laser {
            let raw = engine
                .query_second_tier(second_tier::GET_LASER_AVAILABLE, 0)
                .await?;
            if raw.first() == Some(&0) {
                warn!("record claims a laser but firmware reports none");
            }
        }

        let opts = engine
            .query_second_tier(second_tier::GET_COMPILATION_OPTIONS, 0)
            .await?;
        debug!("FPGA compilation options 0x{:04x}", scalar_u16_le(&opts)?);

        let state = RuntimeState::from_record(&record);
        let mut session = Self {
            engine,
            record,
            state,
            settings,
            session_count: 0,
            summed_spectra: None,
            sum_count: 0,
            tec_setpoint_applied: false,
        };
        session
            .set_integration_time_ms(session.state.integration_time_ms)
            .await?;
        Ok(session)
    }

    pub fn record(&self) -> &ConfigurationRecord {
        &self.record
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn disconnect_pending(&self) -> bool {
        self.engine.disconnect_pending()
    }

    // ------------------------------------------------------------------
    // setters
    // ------------------------------------------------------------------

    pub async fn set_integration_time_ms(&mut self, ms: u32) -> Result<()> {
        let min = self.record.min_integration_time_ms;
        let max = self.record.max_integration_time_ms;
        if ms < min || ms > max {
            return Err(SpectroError::OutOfRange {
                what: "integration time (ms)",
                value: f64::from(ms),
                min: f64::from(min),
                max: f64::from(max),
            });
        }
        let lsw = (ms & 0xffff) as u16;
        let msw = ((ms >> 16) & 0xffff) as u16;
        self.engine
            .send(opcodes::SET_INTEGRATION_TIME, lsw, msw, &[])
            .await?;
        self.state.integration_time_ms = ms;
        Ok(())
    }

    pub async fn get_integration_time_ms(&mut self) -> Result<u32> {
        let raw = self
            .engine
            .query(opcodes::GET_INTEGRATION_TIME, 0, 0, 3)
            .await?;
        crate::protocol::scalar_u24_le(&raw)
    }

    /// Gain travels as the half-precision encoding, MSB-LSB on the wire.
    pub async fn set_detector_gain(&mut self, value: f32) -> Result<()> {
        if !(0.0..=255.996).contains(&value) {
            return Err(SpectroError::OutOfRange {
                what: "detector gain",
                value: f64::from(value),
                min: 0.0,
                max: 255.996,
            });
        }
        let raw = gain::encode_gain(value);
        self.engine
            .send(opcodes::SET_DETECTOR_GAIN, raw, 0, &[])
            .await?;
        self.state.gain = value;
        Ok(())
    }

    /// Gain readback is LSB-MSB, the reverse of the write order.
    pub async fn get_detector_gain(&mut self) -> Result<f32> {
        let raw = self.engine.query(opcodes::GET_DETECTOR_GAIN, 0, 0, 2).await?;
        Ok(gain::decode_gain(scalar_u16_le(&raw)?))
    }

    /// Laser on/off is safety-relevant, so it goes through the verified-send
    /// retry path; exhausting the budget poisons the session.
    pub async fn set_laser_enable(&mut self, enabled: bool) -> Result<()> {
        if !self.record.has_laser {
            return Err(SpectroError::CapabilityMissing("laser"));
        }
        if enabled && self.state.last_applied_laser_power.is_none() {
            // firmware wants modulation configured before first fire
            self.set_laser_power_percent(self.state.laser_power_percent)
                .await?;
        }
        let value = u16::from(enabled);
        let policy = self.engine.default_retry();
        self.engine
            .send_with_retry(opcodes::SET_LASER_ENABLE, value, 0, &PADDING, &policy)
            .await?;
        self.state.laser_enabled = enabled;
        if enabled {
            self.state.last_applied_laser_power = Some(self.state.laser_power_percent);
        }
        Ok(())
    }

    /// Laser power by pulse-width modulation: period fixed at 100 us, width
    /// equal to the requested percentage. The legacy firmware reads the
    /// modulation value from the data stage, not `wValue`, so the value is
    /// mirrored in both. Full power switches modulation off entirely.
    pub async fn set_laser_power_percent(&mut self, percent: f32) -> Result<()> {
        if !self.record.has_laser {
            return Err(SpectroError::CapabilityMissing("laser"));
        }
        let percent = percent.clamp(0.0, 100.0).round();
        let value = percent as u16;

        if value >= 100 {
            self.engine
                .send(opcodes::SET_MOD_ENABLE, 0, 0, &PADDING)
                .await?;
            self.state.laser_power_percent = 100.0;
            self.state.laser_power_mw = None;
            if self.state.laser_enabled {
                self.state.last_applied_laser_power = Some(100.0);
            }
            return Ok(());
        }

        self.engine
            .send(opcodes::SET_MOD_PERIOD, 100, 0, &[100])
            .await?;
        self.engine
            .send(opcodes::SET_MOD_PULSE_WIDTH, value, 0, &[value as u8])
            .await?;
        self.engine
            .send(opcodes::SET_MOD_ENABLE, 1, 0, &PADDING)
            .await?;

        self.state.laser_power_percent = percent;
        self.state.laser_power_mw = None;
        if self.state.laser_enabled {
            self.state.last_applied_laser_power = Some(percent);
        }
        debug!("laser power set to {percent}%");
        Ok(())
    }

    /// Laser power in mW through the calibration polynomial, clamped to the
    /// record's calibrated range.
    pub async fn set_laser_power_mw(&mut self, mw: f32) -> Result<()> {
        if !self.record.has_laser_power_calibration() {
            return Err(SpectroError::CapabilityMissing("laser power calibration"));
        }
        let clamped = mw.clamp(self.record.min_laser_power_mw, self.record.max_laser_power_mw);
        if clamped != mw {
            debug!(
                "laser power request {mw} mW clamped to {clamped} mW (range {}..{})",
                self.record.min_laser_power_mw, self.record.max_laser_power_mw
            );
        }
        let percent = self.record.laser_power_mw_to_percent(clamped);
        self.set_laser_power_percent(percent).await?;
        self.state.laser_power_mw = Some(clamped);
        Ok(())
    }

    /// TEC setpoint in degC through the DAC polynomial, constrained to the
    /// record's temperature range and the 12-bit DAC.
    pub async fn set_detector_tec_setpoint_degc(&mut self, degc: f32) -> Result<()> {
        if !self.record.has_cooling {
            return Err(SpectroError::CapabilityMissing("detector TEC"));
        }
        let min = f32::from(self.record.min_temp_degc);
        let max = f32::from(self.record.max_temp_degc);
        if degc < min || degc > max {
            return Err(SpectroError::OutOfRange {
                what: "TEC setpoint (degC)",
                value: f64::from(degc),
                min: f64::from(min),
                max: f64::from(max),
            });
        }
        let c = &self.record.degc_to_dac_coeffs;
        if c.len() != 3 {
            return Err(SpectroError::CapabilityMissing("TEC calibration"));
        }
        let dac = f64::from(c[0])
            + f64::from(c[1]) * f64::from(degc)
            + f64::from(c[2]) * f64::from(degc) * f64::from(degc);
        let dac = (dac.round().max(0.0) as u16).min(0xfff);
        info!("TEC setpoint {degc:.2} degC (DAC 0x{dac:03x})");
        self.engine
            .send(opcodes::SET_TEC_SETPOINT, dac, 0, &[])
            .await?;
        self.state.tec_setpoint_degc = Some(degc);
        self.tec_setpoint_applied = true;
        Ok(())
    }

    pub async fn set_detector_tec_enable(&mut self, enabled: bool) -> Result<()> {
        if !self.record.has_cooling {
            return Err(SpectroError::CapabilityMissing("detector TEC"));
        }
        if enabled && !self.tec_setpoint_applied {
            let min = f32::from(self.record.min_temp_degc);
            debug!("no TEC setpoint applied yet; defaulting to {min} degC");
            self.set_detector_tec_setpoint_degc(min).await?;
        }
        self.engine
            .send(opcodes::SET_TEC_ENABLE, u16::from(enabled), 0, &[])
            .await?;
        self.state.tec_enabled = enabled;
        Ok(())
    }

    pub async fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        self.engine
            .send(opcodes::SET_TRIGGER_SOURCE, source.wire_value(), 0, &PADDING)
            .await?;
        self.state.trigger_source = source;
        Ok(())
    }

    pub async fn set_area_scan_enable(&mut self, enabled: bool) -> Result<()> {
        self.engine
            .send(opcodes::SET_AREA_SCAN_ENABLE, u16::from(enabled), 0, &[])
            .await?;
        self.state.area_scan_enabled = enabled;
        Ok(())
    }

    /// Host-side setting: restarts any averaging cycle in progress.
    pub fn set_scans_to_average(&mut self, scans: u32) {
        self.state.scans_to_average = scans.max(1);
        self.summed_spectra = None;
        self.sum_count = 0;
    }

    /// Full-detector vertical binning via the sensor's start/stop lines.
    pub async fn set_vertical_binning(&mut self, start: u16, end: u16) -> Result<()> {
        let rows = self.record.active_pixels_vertical;
        if start >= end || (rows > 0 && end > rows) {
            return Err(SpectroError::Configuration(format!(
                "bad vertical binning rows {start}..{end} (sensor has {rows})"
            )));
        }
        self.engine
            .send(opcodes::SECOND_TIER, second_tier::SET_START_LINE, start, &[])
            .await?;
        self.engine
            .send(opcodes::SECOND_TIER, second_tier::SET_STOP_LINE, end, &[])
            .await?;
        self.state.vertical_binning = Some((start, end));
        Ok(())
    }

    /// Configure (or replace) one detector read-out region.
    pub async fn set_detector_roi(
        &mut self,
        region: u8,
        y0: u16,
        y1: u16,
        x0: u16,
        x1: u16,
    ) -> Result<()> {
        let roi = DetectorRoi::new(region, y0, y1, x0, x1)?;
        let rows = self.record.active_pixels_vertical;
        let cols = self.record.actual_pixels_horizontal;
        if rows > 0 && cols > 0 && !roi.fits(rows, cols) {
            return Err(SpectroError::Configuration(format!(
                "{roi} outside sensor of {rows} x {cols}"
            )));
        }
        let mut payload = Vec::with_capacity(9);
        payload.push(region);
        for bound in [y0, y1, x0, x1] {
            payload.extend_from_slice(&bound.to_le_bytes());
        }
        self.engine
            .send(
                opcodes::SECOND_TIER,
                second_tier::SET_DETECTOR_ROI,
                u16::from(region),
                &payload,
            )
            .await?;
        self.state
            .detector_regions
            .get_or_insert_with(DetectorRegions::new)
            .add(roi);
        Ok(())
    }

    // ------------------------------------------------------------------
    // configuration write-back
    // ------------------------------------------------------------------

    /// Copy the editable subset of `edited` over the session's record. The
    /// calibration-critical remainder is untouched regardless of what the
    /// caller passed in.
    pub fn update_editable_config(&mut self, edited: &ConfigurationRecord) {
        self.record.update_editable(edited);
    }

    /// Write the session's record back to the instrument, page by page.
    pub async fn write_config(&mut self) -> Result<()> {
        let pages = self.record.encode();
        let page_count = if self.record.subformat == 1 {
            PAGE_COUNT
        } else {
            6
        };
        for (index, page) in pages.iter().take(page_count).enumerate() {
            let offset = opcodes::CONFIG_WRITE_BASE + (index * PAGE_LEN) as u16;
            self.engine
                .send(opcodes::WRITE_CONFIG_PAGE, offset, 0, page)
                .await?;
            tokio::time::sleep(PAGE_READ_DELAY).await;
        }
        info!("wrote {page_count} configuration pages");
        Ok(())
    }

    // ------------------------------------------------------------------
    // readouts
    // ------------------------------------------------------------------

    /// Detector temperature; raw readback is MSB-first, unlike most fields.
    pub async fn get_detector_temperature(&mut self) -> Result<(u16, f32)> {
        let raw = self
            .engine
            .query(opcodes::GET_DETECTOR_TEMP, 0, 0, 2)
            .await?;
        let raw = scalar_u16_be(&raw)?;
        let c = &self.record.adc_to_degc_coeffs;
        let degc = if c.len() == 3 {
            f64::from(c[0])
                + f64::from(c[1]) * f64::from(raw)
                + f64::from(c[2]) * f64::from(raw) * f64::from(raw)
        } else {
            0.0
        };
        Ok((raw, degc as f32))
    }

    /// Laser temperature from the primary ADC thermistor; this conversion is
    /// fixed by the electronics, not by record calibration.
    pub async fn get_laser_temperature(&mut self) -> Result<(u16, f32)> {
        let raw = self.engine.query(opcodes::GET_ADC, 0, 0, 2).await?;
        let raw = scalar_u16_le(&raw)? & 0xfff;
        if raw == 0 {
            return Ok((0, 0.0));
        }
        let voltage = 2.5 * f64::from(raw) / 4096.0;
        let resistance = 21_450.0 * voltage / (2.5 - voltage);
        if resistance <= 0.0 {
            return Err(SpectroError::ProtocolMismatch {
                opcode: opcodes::GET_ADC,
                detail: format!("non-physical thermistor resistance from raw 0x{raw:04x}"),
            });
        }
        let log_val = (resistance / 10_000.0).ln();
        let degc = 3977.0 / (log_val + 3977.0 / 298.0) - 273.0;
        Ok((raw, degc as f32))
    }

    /// Secondary ADC: select, read raw, calibrate through the first four
    /// linearity coefficients, restore the primary ADC.
    pub async fn get_secondary_adc(&mut self) -> Result<(u16, Option<f64>)> {
        self.engine
            .send(opcodes::SELECT_ADC, 1, 0, &[])
            .await?;
        let raw = self.engine.query(opcodes::GET_ADC, 0, 0, 2).await?;
        let raw = scalar_u16_le(&raw)?;
        self.engine
            .send(opcodes::SELECT_ADC, 0, 0, &[])
            .await?;

        let c = &self.record.linearity_coeffs;
        let calibrated = if c.len() >= 4 && c.iter().take(4).any(|&v| v != 0.0) {
            let x = f64::from(raw);
            Some(
                f64::from(c[0])
                    + f64::from(c[1]) * x
                    + f64::from(c[2]) * x * x
                    + f64::from(c[3]) * x * x * x,
            )
        } else {
            None
        };
        Ok((raw, calibrated))
    }

    // ------------------------------------------------------------------
    // acquisition
    // ------------------------------------------------------------------

    /// Read one raw frame and run it through the correction pipeline.
    pub async fn capture_frame(&mut self) -> Result<(Vec<f64>, pipeline::FrameReport)> {
        let mut spectrum = self.get_line().await?;
        let report = pipeline::process(&mut spectrum, &self.record, &self.state)?;
        Ok((spectrum, report))
    }

    async fn get_line(&mut self) -> Result<Vec<f64>> {
        if self.state.trigger_source == TriggerSource::Internal {
            self.engine
                .send(opcodes::ACQUIRE, 0, 0, &PADDING)
                .await?;
        }

        let pixels = self.state.frame_pixels(&self.record);
        let integration = self.state.integration_time_ms;

        let data = if pixels == 2048 {
            // 2048-pixel detectors stripe the frame across two endpoints
            let mut data = self
                .engine
                .bulk_read(opcodes::ENDPOINT_SPECTRUM, 2048, integration)
                .await?;
            let second = self
                .engine
                .bulk_read(opcodes::ENDPOINT_SPECTRUM_SECONDARY, 2048, integration)
                .await?;
            data.extend_from_slice(&second);
            data
        } else {
            self.engine
                .bulk_read(opcodes::ENDPOINT_SPECTRUM, pixels * 2, integration)
                .await?
        };

        if data.len() != pixels * 2 {
            return Err(SpectroError::FrameTooShort {
                expected: pixels * 2,
                actual: data.len(),
            });
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])))
            .collect())
    }

    /// One worker poll: read a frame, post-process, fold into any averaging
    /// cycle, and attach the live readouts.
    pub async fn acquire(&mut self) -> Result<AcquireOutcome> {
        let (spectrum, report) = match self.capture_frame().await {
            Ok(captured) => captured,
            Err(err)
                if self.state.trigger_source == TriggerSource::External
                    && err.severity() != Severity::Fatal =>
            {
                // waiting on an external trigger is not an error
                debug!("no externally-triggered frame yet: {err}");
                return Ok(AcquireOutcome::KeepAlive);
            }
            Err(err) => return Err(err),
        };

        self.session_count += 1;
        let mut reading = Reading::new(self.session_count);
        reading.spectrum = spectrum;
        reading.integration_time_ms = self.state.integration_time_ms;
        reading.gain = self.state.gain;
        reading.laser_enabled = self.state.laser_enabled;
        reading.laser_power_percent = self.state.laser_power_percent;
        reading.laser_power_mw = self.state.laser_power_mw;
        reading.area_scan_row = report.area_scan_row;

        let averaging = self.state.scans_to_average > 1;
        if averaging {
            match &mut self.summed_spectra {
                Some(sum) if sum.len() == reading.spectrum.len() => {
                    for (acc, sample) in sum.iter_mut().zip(reading.spectrum.iter()) {
                        *acc += sample;
                    }
                }
                _ => self.summed_spectra = Some(reading.spectrum.clone()),
            }
            self.sum_count += 1;
        }
        reading.sum_count = self.sum_count;

        if self.record.has_cooling {
            match self.get_detector_temperature().await {
                Ok((raw, degc)) => {
                    reading.detector_temperature_raw = Some(raw);
                    reading.detector_temperature_degc = Some(degc);
                }
                Err(err) => debug!("detector temperature read failed: {err}"),
            }
        }
        if self.record.has_laser {
            match self.get_laser_temperature().await {
                Ok((raw, degc)) => {
                    reading.laser_temperature_raw = Some(raw);
                    reading.laser_temperature_degc = Some(degc);
                }
                Err(err) => debug!("laser temperature read failed: {err}"),
            }
        }
        if self.state.secondary_adc_enabled {
            match self.get_secondary_adc().await {
                Ok((raw, calibrated)) => {
                    reading.secondary_adc_raw = Some(raw);
                    reading.secondary_adc_calibrated = calibrated;
                }
                Err(err) => debug!("secondary ADC read failed: {err}"),
            }
        }

        if averaging && self.sum_count >= self.state.scans_to_average {
            if let Some(sum) = self.summed_spectra.take() {
                let n = f64::from(self.sum_count);
                reading.spectrum = sum.into_iter().map(|v| v / n).collect();
                reading.averaged = true;
            }
            self.sum_count = 0;
        }

        Ok(AcquireOutcome::Reading(Box::new(reading)))
    }

    // ------------------------------------------------------------------
    // command application and shutdown
    // ------------------------------------------------------------------

    /// Apply one dequeued setting command. The worker handles the
    /// non-setting variants (poison, auto-exposure, device count) itself.
    pub async fn apply(&mut self, command: Command) -> Result<()> {
        debug!("applying command: {}", command.setting_name());
        match command {
            Command::SetIntegrationTimeMs(ms) => self.set_integration_time_ms(ms).await,
            Command::SetDetectorGain(value) => self.set_detector_gain(value).await,
            Command::SetLaserEnable(enabled) => self.set_laser_enable(enabled).await,
            Command::SetLaserPowerPercent(percent) => {
                self.set_laser_power_percent(percent).await
            }
            Command::SetLaserPowerMw(mw) => self.set_laser_power_mw(mw).await,
            Command::SetDetectorTecEnable(enabled) => {
                self.set_detector_tec_enable(enabled).await
            }
            Command::SetDetectorTecSetpointDegc(degc) => {
                self.set_detector_tec_setpoint_degc(degc).await
            }
            Command::SetTriggerSource(source) => self.set_trigger_source(source).await,
            Command::SetScansToAverage(scans) => {
                self.set_scans_to_average(scans);
                Ok(())
            }
            Command::SetBadPixelMode(mode) => {
                self.state.bad_pixel_mode = mode;
                Ok(())
            }
            Command::SetAreaScanEnable(enabled) => self.set_area_scan_enable(enabled).await,
            Command::SetVerticalBinning { start, end } => {
                self.set_vertical_binning(start, end).await
            }
            Command::SetDetectorRoi { region, y0, y1, x0, x1 } => {
                self.set_detector_roi(region, y0, y1, x0, x1).await
            }
            Command::UpdateEditableConfig(edited) => {
                self.update_editable_config(&edited);
                Ok(())
            }
            Command::WriteConfig => self.write_config().await,
            Command::RunAutoExposure(_)
            | Command::SetConnectedDeviceCount(_)
            | Command::Poison => {
                warn!("{} is not a session command", command.setting_name());
                Ok(())
            }
        }
    }

    /// Last actions of a session: force the laser off if it was last known
    /// firing, then release the transport. Never fails.
    pub async fn shutdown(&mut self) {
        if self.record.has_laser && self.state.laser_enabled {
            info!("disabling laser before disconnect");
            self.engine
                .send_final(opcodes::SET_LASER_ENABLE, 0, 0, &PADDING)
                .await;
            self.state.laser_enabled = false;
        }
        self.engine.close().await;
    }

    pub(crate) fn settings(&self) -> &DriverSettings {
        &self.settings
    }
}

/// The auto-exposure controller drives a live session through the same seam
/// the synthetic test detector implements.
#[async_trait]
impl ExposureDriver for DeviceSession {
    async fn set_integration_time_ms(&mut self, ms: u32) -> Result<()> {
        DeviceSession::set_integration_time_ms(self, ms).await
    }

    async fn set_gain_db(&mut self, db: f32) -> Result<()> {
        DeviceSession::set_detector_gain(self, db).await
    }

    async fn set_laser_enable(&mut self, enabled: bool) -> Result<()> {
        DeviceSession::set_laser_enable(self, enabled).await
    }

    async fn capture(&mut self) -> Result<Vec<f64>> {
        let (spectrum, _) = self.capture_frame().await?;
        Ok(spectrum)
    }
}
