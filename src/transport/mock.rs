//! In-memory transport simulating an instrument.
//!
//! The simulator serves configuration pages from an encoded
//! [`ConfigurationRecord`] and models the detector as a flat frame whose
//! level follows `signal = k × integration_ms × gain_linear`, clipped to the
//! 16-bit ADC ceiling, on top of a constant dark level. That linear model is
//! what the auto-exposure tests converge against.
//!
//! All state sits behind an `Arc<Mutex<_>>` so a test can keep a handle while
//! the transport itself moves into a worker task, and assert on the write
//! log afterwards.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{DeviceAddress, DeviceIdentity, Transport};
use crate::eeprom::{gain, ConfigurationRecord, Page, PAGE_COUNT, PAGE_LEN};
use crate::error::TransportError;
use crate::protocol::opcodes::{self, second_tier};
use crate::protocol::GET_POLL_STATUS;

/// ADC ceiling of the simulated detector.
const FULL_SCALE: f64 = 65_535.0;

#[derive(Debug)]
pub struct MockState {
    pub pages: [Page; PAGE_COUNT],
    pub pixels: usize,

    // detector model
    /// Counts per (ms × linear gain) while the laser is firing.
    pub counts_per_ms_gain: f64,
    pub dark_level: f64,

    // mirrored instrument state
    pub integration_time_ms: u32,
    pub gain: f32,
    pub laser_enabled: bool,
    pub modulation_enabled: bool,
    pub modulation_width: u16,
    pub tec_enabled: bool,
    pub tec_setpoint_dac: u16,
    pub trigger_source: u16,
    pub area_scan_enabled: bool,
    pub detector_temperature_raw: u16,
    pub adc_raw: u16,

    /// Every control write as `(opcode, value, index)`, in arrival order.
    pub writes: Vec<(u8, u16, u16)>,
    pub closed: bool,

    /// When set, the next bulk read times out instead of returning a frame.
    pub fail_next_bulk: bool,
}

impl MockState {
    /// Laser duty cycle from the modulation registers.
    fn duty(&self) -> f64 {
        if self.modulation_enabled {
            f64::from(self.modulation_width.min(100)) / 100.0
        } else {
            1.0
        }
    }

    fn gain_linear(&self) -> f64 {
        10f64.powf(f64::from(self.gain) / 20.0)
    }

    fn frame_level(&self) -> f64 {
        let mut level = self.dark_level;
        if self.laser_enabled {
            level += self.counts_per_ms_gain
                * f64::from(self.integration_time_ms)
                * self.gain_linear()
                * self.duty();
        }
        level.min(FULL_SCALE)
    }
}

pub struct MockTransport {
    identity: DeviceIdentity,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockTransport {
    /// Simulator for the given record with a default detector model.
    pub fn new(record: &ConfigurationRecord) -> Self {
        Self::with_model(record, 40.0, 1_000.0)
    }

    /// Simulator with an explicit linear detector model.
    pub fn with_model(record: &ConfigurationRecord, counts_per_ms_gain: f64, dark_level: f64) -> Self {
        let state = MockState {
            pages: record.encode(),
            pixels: record.pixels(),
            counts_per_ms_gain,
            dark_level,
            integration_time_ms: u32::from(record.startup_integration_time_ms),
            gain: record.detector_gain,
            laser_enabled: false,
            modulation_enabled: false,
            modulation_width: 100,
            tec_enabled: false,
            tec_setpoint_dac: 0,
            trigger_source: 0,
            area_scan_enabled: false,
            detector_temperature_raw: 0x0800,
            adc_raw: 0x0123,
            writes: Vec::new(),
            closed: false,
            fail_next_bulk: false,
        };
        Self {
            identity: DeviceIdentity {
                address: DeviceAddress::Mock,
                serial_number: Some(record.serial_number.clone()),
            },
            state: Arc::new(Mutex::new(state)),
            open: true,
        }
    }

    /// Shared handle for inspecting or perturbing the simulator from a test.
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a poisoned lock only means a test already panicked; keep serving
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn control_write(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        if !self.open {
            return Err(anyhow::Error::from(TransportError::NotConnected));
        }
        let mut state = self.lock();
        state.writes.push((request, value, index));
        match request {
            opcodes::ACQUIRE => {}
            opcodes::SET_INTEGRATION_TIME => {
                state.integration_time_ms =
                    u32::from(value) | (u32::from(index) << 16);
            }
            opcodes::SET_DETECTOR_GAIN => {
                state.gain = gain::decode_gain(value);
            }
            opcodes::SET_LASER_ENABLE => {
                state.laser_enabled = value != 0;
            }
            opcodes::SET_MOD_ENABLE => {
                state.modulation_enabled = value != 0;
            }
            opcodes::SET_MOD_PERIOD => {}
            opcodes::SET_MOD_PULSE_WIDTH => {
                state.modulation_width = value;
            }
            opcodes::SET_TEC_ENABLE => {
                state.tec_enabled = value != 0;
            }
            opcodes::SET_TEC_SETPOINT => {
                state.tec_setpoint_dac = value;
            }
            opcodes::SET_TRIGGER_SOURCE => {
                state.trigger_source = value;
            }
            opcodes::SET_AREA_SCAN_ENABLE => {
                state.area_scan_enabled = value != 0;
            }
            opcodes::SELECT_ADC => {}
            opcodes::SECOND_TIER => {
                // start/stop line and region writes carry the sub-code in
                // `value`; the simulator only logs them
            }
            opcodes::WRITE_CONFIG_PAGE => {
                let offset = usize::from(value.saturating_sub(opcodes::CONFIG_WRITE_BASE));
                let page = offset / PAGE_LEN;
                if page < PAGE_COUNT && payload.len() == PAGE_LEN {
                    let mut buf = [0u8; PAGE_LEN];
                    buf.copy_from_slice(payload);
                    state.pages[page] = buf;
                }
            }
            _ => {}
        }
        Ok(payload.len())
    }

    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>> {
        if !self.open {
            return Err(anyhow::Error::from(TransportError::NotConnected));
        }
        let state = self.lock();
        let mut data = match request {
            GET_POLL_STATUS => vec![0u8],
            opcodes::SECOND_TIER => match value {
                second_tier::GET_CONFIG_PAGE => {
                    let page = usize::from(index);
                    state
                        .pages
                        .get(page)
                        .map(|p| p.to_vec())
                        .unwrap_or_else(|| vec![0u8; PAGE_LEN])
                }
                second_tier::GET_LINE_LENGTH => {
                    (state.pixels as u16).to_le_bytes().to_vec()
                }
                second_tier::GET_COMPILATION_OPTIONS => vec![0x00, 0x00],
                second_tier::GET_LASER_AVAILABLE => vec![0x01],
                _ => vec![0u8; length],
            },
            opcodes::GET_INTEGRATION_TIME => {
                let ms = state.integration_time_ms;
                vec![(ms & 0xff) as u8, ((ms >> 8) & 0xff) as u8, ((ms >> 16) & 0xff) as u8]
            }
            opcodes::GET_DETECTOR_GAIN => {
                let raw = gain::encode_gain(state.gain);
                // readback is LSB-MSB, unlike the MSB-LSB write
                vec![(raw & 0xff) as u8, (raw >> 8) as u8]
            }
            opcodes::GET_DETECTOR_TEMP => {
                // MSB-LSB, unlike every other scalar
                state.detector_temperature_raw.to_be_bytes().to_vec()
            }
            opcodes::GET_ADC => state.adc_raw.to_le_bytes().to_vec(),
            opcodes::GET_TRIGGER_SOURCE => {
                vec![(state.trigger_source & 0xff) as u8]
            }
            _ => vec![0u8; length],
        };
        data.resize(length, 0);
        Ok(data)
    }

    async fn bulk_read(
        &mut self,
        _endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if !self.open {
            return Err(anyhow::Error::from(TransportError::NotConnected));
        }
        let mut state = self.lock();
        if state.fail_next_bulk {
            state.fail_next_bulk = false;
            return Err(anyhow::Error::from(TransportError::Timeout(
                timeout.as_millis() as u64,
            )));
        }
        let level = state.frame_level() as u16;
        let pixels = length / 2;
        let mut data = Vec::with_capacity(length);
        for _ in 0..pixels {
            data.extend_from_slice(&level.to_le_bytes());
        }
        Ok(data)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.lock().closed = true;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConfigurationRecord {
        ConfigurationRecord {
            model: "SIM-785".into(),
            serial_number: "SIM-0001".into(),
            has_laser: true,
            has_cooling: true,
            active_pixels_horizontal: 64,
            actual_pixels_horizontal: 64,
            startup_integration_time_ms: 10,
            ..ConfigurationRecord::default()
        }
    }

    #[tokio::test]
    async fn serves_config_pages_it_was_built_from() {
        let record = record();
        let mut transport = MockTransport::new(&record);
        let mut pages = Vec::new();
        for page in 0..PAGE_COUNT {
            let data = transport
                .control_read(
                    opcodes::SECOND_TIER,
                    second_tier::GET_CONFIG_PAGE,
                    page as u16,
                    PAGE_LEN,
                    Duration::from_millis(100),
                )
                .await
                .unwrap();
            let mut buf = [0u8; PAGE_LEN];
            buf.copy_from_slice(&data);
            pages.push(buf);
        }
        let decoded = ConfigurationRecord::decode(&pages).unwrap();
        assert_eq!(decoded.serial_number, "SIM-0001");
        assert_eq!(decoded.pixels(), 64);
    }

    #[tokio::test]
    async fn frame_level_follows_linear_model() {
        let record = record();
        let mut transport = MockTransport::with_model(&record, 50.0, 1_000.0);
        {
            let state = transport.state();
            let mut state = state.lock().unwrap();
            state.integration_time_ms = 100;
            state.gain = 0.0;
            state.laser_enabled = true;
        }
        let data = transport
            .bulk_read(0x82, 128, Duration::from_millis(100))
            .await
            .unwrap();
        let value = u16::from_le_bytes([data[0], data[1]]);
        assert_eq!(value, 6_000); // 1000 + 50 * 100 * 1.0
        assert_eq!(data.len(), 128);
    }

    #[tokio::test]
    async fn injected_timeout_fires_once() {
        let record = record();
        let mut transport = MockTransport::new(&record);
        transport.state().lock().unwrap().fail_next_bulk = true;

        let err = transport
            .bulk_read(0x82, 128, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Timeout(_))
        ));
        assert!(transport
            .bulk_read(0x82, 128, Duration::from_millis(100))
            .await
            .is_ok());
    }
}
