//! Control library for laboratory spectrometer instruments.
//!
//! The library discovers a device over one of several byte transports,
//! negotiates a session, reads the instrument's binary configuration record,
//! and then serves a continuous stream of commands in / measurements out
//! while a background worker task polls the hardware.
//!
//! The pieces compose bottom-up: a [`transport::Transport`] carries bytes, the
//! [`protocol::ProtocolEngine`] frames opcodes over it with pacing and retry,
//! the [`eeprom::ConfigurationRecord`] codec turns the instrument's persisted
//! pages into typed settings, the [`session::DeviceSession`] owns all of that
//! plus the mutable [`state::RuntimeState`], and the [`worker`] runs the
//! session on its own task behind command/event channels. Each captured frame
//! passes through the fixed correction sequence in [`pipeline`], and the
//! [`autoexposure`] controller closes the loop between measured signal and
//! exposure/gain.

pub mod autoexposure;
pub mod command;
pub mod config;
pub mod eeprom;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod reading;
pub mod regions;
pub mod session;
pub mod state;
pub mod transport;
pub mod worker;

pub use autoexposure::{AutoExposure, AutoExposureRequest, AutoExposureResult, ExposureDriver};
pub use command::Command;
pub use config::DriverSettings;
pub use eeprom::ConfigurationRecord;
pub use error::{Result, Severity, SpectroError, TransportError};
pub use reading::{AcquireOutcome, Reading};
pub use regions::{DetectorRegions, DetectorRoi};
pub use session::DeviceSession;
pub use state::{BadPixelMode, RuntimeState, TriggerSource};
pub use worker::{spawn, WorkerEvent, WorkerHandle};
