//! Error types for the spectrometer control library.
//!
//! The library distinguishes four classes of failure, because the worker loop
//! reacts differently to each:
//!
//! - **Transient**: a single transport call failed or timed out. Retryable per
//!   opcode policy; the worker keeps polling.
//! - **Protocol mismatch**: a response had an unexpected shape or length. The
//!   call is treated as failed and logged; the worker keeps polling.
//! - **Fatal**: the device signalled an unrecoverable condition, or the retry
//!   budget was exhausted on a safety-relevant call. The worker performs its
//!   last safety action and terminates.
//! - **Configuration**: decoding the binary configuration record failed or
//!   produced an out-of-range value. Connect aborts; no session is exposed.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, SpectroError>;

/// Errors raised by transport implementations.
///
/// Transports wrap these in `anyhow::Error`; the protocol engine downcasts to
/// classify an outcome, so the variants stay coarse.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("transport call timed out after {0} ms")]
    Timeout(u64),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport disconnected: {0}")]
    Disconnected(String),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum SpectroError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol mismatch on opcode 0x{opcode:02x}: {detail}")]
    ProtocolMismatch { opcode: u8, detail: String },

    #[error("retry budget exhausted on opcode 0x{opcode:02x} after {attempts} attempts")]
    RetriesExhausted { opcode: u8, attempts: u32 },

    #[error("fatal device condition: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device has no {0}")]
    CapabilityMissing(&'static str),

    #[error("value {value} outside range [{min}, {max}] for {what}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("frame of {actual} samples shorter than expected {expected}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("feature '{0}' is not enabled. Rebuild with --features {0}")]
    FeatureNotEnabled(&'static str),
}

/// Coarse classification used by the worker loop to pick a reaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Retryable; keep polling.
    Transient,
    /// Log and treat the call as failed; keep polling.
    Mismatch,
    /// Terminate the session after the laser safety action.
    Fatal,
    /// Never start the session.
    Config,
}

impl SpectroError {
    pub fn severity(&self) -> Severity {
        match self {
            SpectroError::Transport(TransportError::Timeout(_)) => Severity::Transient,
            SpectroError::Transport(TransportError::ShortRead { .. }) => Severity::Transient,
            SpectroError::Transport(_) => Severity::Fatal,
            SpectroError::ProtocolMismatch { .. } => Severity::Mismatch,
            SpectroError::RetriesExhausted { .. } => Severity::Fatal,
            SpectroError::Fatal(_) => Severity::Fatal,
            SpectroError::Configuration(_) => Severity::Config,
            SpectroError::CapabilityMissing(_) => Severity::Mismatch,
            SpectroError::OutOfRange { .. } => Severity::Mismatch,
            SpectroError::FrameTooShort { .. } => Severity::Mismatch,
            SpectroError::FeatureNotEnabled(_) => Severity::Config,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Classify an `anyhow::Error` bubbled out of a transport implementation.
///
/// Transports follow the adapter convention of returning `anyhow::Result`
/// with a typed [`TransportError`] as the root cause; anything else is
/// treated as a disconnect.
pub fn classify_transport_error(err: &anyhow::Error) -> Severity {
    match err.downcast_ref::<TransportError>() {
        Some(TransportError::Timeout(_)) | Some(TransportError::ShortRead { .. }) => {
            Severity::Transient
        }
        _ => Severity::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = SpectroError::Transport(TransportError::Timeout(500));
        assert_eq!(err.severity(), Severity::Transient);
        assert!(!err.is_fatal());
    }

    #[test]
    fn retries_exhausted_is_fatal() {
        let err = SpectroError::RetriesExhausted {
            opcode: 0xbe,
            attempts: 3,
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn configuration_never_starts_session() {
        let err = SpectroError::Configuration("bad pixel list unsorted".into());
        assert_eq!(err.severity(), Severity::Config);
    }

    #[test]
    fn anyhow_classification_sees_through_context() {
        use anyhow::Context;
        let err: anyhow::Error = Err::<(), _>(TransportError::Timeout(100))
            .context("reading spectrum")
            .unwrap_err();
        assert_eq!(classify_transport_error(&err), Severity::Transient);
    }
}
