//! Opcode vocabulary of the instrument's control protocol.
//!
//! Names follow the firmware documentation. Second-tier opcodes are reached
//! through [`SECOND_TIER`] with the sub-code passed in `value`.

/// Trigger one acquisition (internal trigger mode only).
pub const ACQUIRE: u8 = 0xad;
/// Write one 64-byte configuration page; offset passed in `value`.
pub const WRITE_CONFIG_PAGE: u8 = 0xa2;

pub const SET_INTEGRATION_TIME: u8 = 0xb2;
pub const GET_INTEGRATION_TIME: u8 = 0xbf;
pub const SET_DETECTOR_OFFSET: u8 = 0xb6;
pub const SET_DETECTOR_GAIN: u8 = 0xb7;
pub const GET_DETECTOR_GAIN: u8 = 0xc5;

pub const SET_LASER_ENABLE: u8 = 0xbe;
pub const SET_MOD_ENABLE: u8 = 0xbd;
pub const SET_MOD_PERIOD: u8 = 0xc7;
pub const SET_MOD_PULSE_WIDTH: u8 = 0xdb;
pub const GET_LASER_TEC_SETPOINT: u8 = 0xe8;
pub const SET_LASER_TEC_SETPOINT: u8 = 0xe7;

pub const SET_TEC_ENABLE: u8 = 0xd6;
pub const SET_TEC_SETPOINT: u8 = 0xd8;
pub const GET_DETECTOR_TEMP: u8 = 0xd7;
pub const GET_ADC: u8 = 0xd5;
pub const SELECT_ADC: u8 = 0xed;

pub const SET_TRIGGER_SOURCE: u8 = 0xd2;
pub const GET_TRIGGER_SOURCE: u8 = 0xd3;
pub const SET_AREA_SCAN_ENABLE: u8 = 0xe9;
pub const SET_HIGH_GAIN_MODE: u8 = 0xeb;

pub const GET_FIRMWARE_REVISION: u8 = 0xc0;
pub const GET_FPGA_REVISION: u8 = 0xb4;
pub const RESET_FPGA: u8 = 0xb5;

/// Prefix opcode: the real operation is a sub-code in `value`.
pub const SECOND_TIER: u8 = 0xff;

/// Second-tier sub-codes (passed as `value` with [`SECOND_TIER`]).
pub mod second_tier {
    /// Read one 64-byte configuration page; page number in `index`.
    pub const GET_CONFIG_PAGE: u16 = 0x01;
    /// Sensor line length as LSB-MSB u16.
    pub const GET_LINE_LENGTH: u16 = 0x03;
    /// FPGA compilation options word.
    pub const GET_COMPILATION_OPTIONS: u16 = 0x04;
    /// Whether a laser is physically present.
    pub const GET_LASER_AVAILABLE: u16 = 0x08;
    /// First sensor row of the vertically-binned read-out; row in `index`.
    pub const SET_START_LINE: u16 = 0x21;
    /// Last sensor row of the vertically-binned read-out; row in `index`.
    pub const SET_STOP_LINE: u16 = 0x23;
    /// Configure one read-out region; region id in `index`, bounds in the
    /// payload.
    pub const SET_DETECTOR_ROI: u16 = 0x25;
}

/// Start address of the configuration region for [`WRITE_CONFIG_PAGE`].
pub const CONFIG_WRITE_BASE: u16 = 0x3c00;

/// Bulk IN endpoint carrying the spectrum.
pub const ENDPOINT_SPECTRUM: u8 = 0x82;
/// Secondary bulk endpoint used by 2048-pixel detectors.
pub const ENDPOINT_SPECTRUM_SECONDARY: u8 = 0x86;
