//! Opcode-based request/response engine.
//!
//! Every hardware interaction funnels through [`ProtocolEngine`]: it paces
//! calls to avoid overrunning slow firmware, centralizes the retry policy,
//! and classifies failures into the taxonomy in [`crate::error`].
//!
//! Scalar byte order is opcode-specific, not transport-specific: the
//! reference firmware mixes little- and big-endian fields, so each accessor
//! picks its own decode helper and that choice must not be "normalized".

pub mod opcodes;

use bytes::Buf;
use log::{debug, error, warn};
use rand::Rng;
use std::time::{Duration, Instant};

use crate::config::DriverSettings;
use crate::error::{classify_transport_error, Result, Severity, SpectroError};
use crate::transport::Transport;

/// Status byte returned by the poll-status opcode after a setter.
///
/// Values track the firmware's acquisition state machine; the retry layer
/// only cares that the byte is not an error marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PollStatus {
    Idle = 0,
    DarkMeasurement = 1,
    LaserWarmup = 2,
    SampleMeasurement = 3,
    Processing = 4,
    Stabilizing = 5,
    DataReady = 6,
    Error = 254,
    Undefined = 255,
}

impl From<u8> for PollStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => PollStatus::Idle,
            1 => PollStatus::DarkMeasurement,
            2 => PollStatus::LaserWarmup,
            3 => PollStatus::SampleMeasurement,
            4 => PollStatus::Processing,
            5 => PollStatus::Stabilizing,
            6 => PollStatus::DataReady,
            254 => PollStatus::Error,
            _ => PollStatus::Undefined,
        }
    }
}

/// Opcode reading back the one-byte poll status.
pub const GET_POLL_STATUS: u8 = 0xd4;

/// Retry policy for a verified send: re-issue until the status readback
/// starts with the expected prefix, up to `max_attempts`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Expected leading bytes of the status readback.
    pub expected_prefix: Vec<u8>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, expected_prefix: &[u8]) -> Self {
        Self {
            max_attempts,
            expected_prefix: expected_prefix.to_vec(),
        }
    }
}

/// The protocol layer for one session. Owns the transport exclusively.
pub struct ProtocolEngine {
    transport: Box<dyn Transport>,
    /// Randomized pacing window in ms; (0, 0) disables pacing.
    min_call_interval_ms: u64,
    max_call_interval_ms: u64,
    retry_max_attempts: u32,
    timeout: Duration,
    last_call: Option<Instant>,
    disconnect_pending: bool,
}

impl ProtocolEngine {
    pub fn new(transport: Box<dyn Transport>, settings: &DriverSettings) -> Self {
        Self {
            transport,
            min_call_interval_ms: settings.min_call_interval_ms,
            max_call_interval_ms: settings.max_call_interval_ms,
            retry_max_attempts: settings.retry_max_attempts,
            timeout: Duration::from_millis(settings.acquire_timeout_ms),
            last_call: None,
            disconnect_pending: false,
        }
    }

    /// ARM-generation firmware needs its control calls throttled.
    pub fn set_call_interval(&mut self, min_ms: u64, max_ms: u64) {
        self.min_call_interval_ms = min_ms;
        self.max_call_interval_ms = max_ms;
    }

    /// Whether a transport failure has requested a session teardown.
    pub fn disconnect_pending(&self) -> bool {
        self.disconnect_pending
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Honor the enforced inter-call delay, randomized within the window.
    async fn pace(&mut self) {
        if self.max_call_interval_ms > 0 {
            if let Some(last) = self.last_call {
                let delay_ms = rand::thread_rng()
                    .gen_range(self.min_call_interval_ms..=self.max_call_interval_ms);
                let next_allowed = last + Duration::from_millis(delay_ms);
                let now = Instant::now();
                if now < next_allowed {
                    debug!("pacing {} ms before next call", delay_ms);
                    tokio::time::sleep(next_allowed - now).await;
                }
            }
        }
        self.last_call = Some(Instant::now());
    }

    fn note_failure(&mut self, opcode: u8, err: &anyhow::Error) -> SpectroError {
        let severity = classify_transport_error(err);
        if severity == Severity::Fatal {
            error!("transport failure on opcode 0x{opcode:02x}: {err:#}; requesting disconnect");
            self.disconnect_pending = true;
        } else {
            warn!("transient transport failure on opcode 0x{opcode:02x}: {err:#}");
        }
        match severity {
            Severity::Transient => SpectroError::ProtocolMismatch {
                opcode,
                detail: err.to_string(),
            },
            _ => SpectroError::Fatal(err.to_string()),
        }
    }

    /// Fire-and-forget control write.
    pub async fn send(&mut self, opcode: u8, value: u16, index: u16, payload: &[u8]) -> Result<()> {
        if self.disconnect_pending {
            return Err(SpectroError::Fatal("disconnect pending".into()));
        }
        self.pace().await;
        debug!("send: opcode 0x{opcode:02x} value 0x{value:04x} index 0x{index:04x} payload {} bytes",
            payload.len());
        match self
            .transport
            .control_write(opcode, value, index, payload, self.timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => Err(self.note_failure(opcode, &err)),
        }
    }

    /// Verified send: after each attempt, read back the poll status and
    /// compare its prefix against the policy. Exhausting the budget is fatal,
    /// since this path is used for safety-relevant calls.
    pub async fn send_with_retry(
        &mut self,
        opcode: u8,
        value: u16,
        index: u16,
        payload: &[u8],
        policy: &RetryPolicy,
    ) -> Result<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let send_result = self.send(opcode, value, index, payload).await;
            if let Err(err) = &send_result {
                if err.is_fatal() {
                    return send_result;
                }
            }
            if send_result.is_ok() {
                match self.query(GET_POLL_STATUS, 0, 0, policy.expected_prefix.len()).await {
                    Ok(status) if status.starts_with(&policy.expected_prefix) => return Ok(()),
                    Ok(status) => {
                        warn!(
                            "opcode 0x{opcode:02x} attempt {attempts}: status {status:02x?} != expected {:02x?}",
                            policy.expected_prefix
                        );
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => warn!("opcode 0x{opcode:02x} attempt {attempts}: {err}"),
                }
            }
            if attempts >= policy.max_attempts {
                self.disconnect_pending = true;
                return Err(SpectroError::RetriesExhausted { opcode, attempts });
            }
        }
    }

    /// Default verified-send policy from the driver settings.
    pub fn default_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, &[PollStatus::Idle as u8])
    }

    /// Control read of exactly `length` bytes.
    pub async fn query(
        &mut self,
        opcode: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        if self.disconnect_pending {
            return Err(SpectroError::Fatal("disconnect pending".into()));
        }
        self.pace().await;
        let result = self
            .transport
            .control_read(opcode, value, index, length, self.timeout)
            .await;
        match result {
            Ok(data) => {
                debug!("query: opcode 0x{opcode:02x} value 0x{value:04x} -> {} bytes", data.len());
                if data.len() < length {
                    return Err(SpectroError::ProtocolMismatch {
                        opcode,
                        detail: format!("expected {} bytes, got {}", length, data.len()),
                    });
                }
                Ok(data)
            }
            Err(err) => Err(self.note_failure(opcode, &err)),
        }
    }

    /// Second-tier read: opcode 0xff with the sub-code in `value`. Always a
    /// 64-byte response.
    pub async fn query_second_tier(&mut self, sub_code: u16, index: u16) -> Result<Vec<u8>> {
        self.query(opcodes::SECOND_TIER, sub_code, index, 64).await
    }

    /// Bulk read with a timeout proportional to the configured exposure.
    pub async fn bulk_read(
        &mut self,
        endpoint: u8,
        length: usize,
        integration_time_ms: u32,
    ) -> Result<Vec<u8>> {
        if self.disconnect_pending {
            return Err(SpectroError::Fatal("disconnect pending".into()));
        }
        self.pace().await;
        let timeout = self.timeout + Duration::from_millis(u64::from(integration_time_ms) * 2);
        match self.transport.bulk_read(endpoint, length, timeout).await {
            Ok(data) => Ok(data),
            Err(err) => Err(self.note_failure(endpoint, &err)),
        }
    }

    /// Best-effort write used on the shutdown path. Ignores a pending
    /// disconnect so the laser safety action still reaches the hardware;
    /// failures are logged, never propagated.
    pub async fn send_final(&mut self, opcode: u8, value: u16, index: u16, payload: &[u8]) {
        self.pace().await;
        if let Err(err) = self
            .transport
            .control_write(opcode, value, index, payload, self.timeout)
            .await
        {
            warn!("shutdown write 0x{opcode:02x} failed: {err:#}");
        }
    }

    /// Final call of a session; close errors are logged, not propagated.
    pub async fn close(&mut self) {
        if let Err(err) = self.transport.close().await {
            warn!("error closing transport: {err:#}");
        }
    }
}

// Scalar decode helpers. Byte order is chosen per opcode by the caller.

/// LSB-first u16, the common case for ADC values and line lengths.
pub fn scalar_u16_le(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(mismatch(data, 2));
    }
    Ok((&data[..2]).get_u16_le())
}

/// MSB-first u16; the detector temperature readback uses this.
pub fn scalar_u16_be(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(mismatch(data, 2));
    }
    Ok((&data[..2]).get_u16())
}

/// LSB-first 24-bit value; the integration-time readback uses this.
pub fn scalar_u24_le(data: &[u8]) -> Result<u32> {
    if data.len() < 3 {
        return Err(mismatch(data, 3));
    }
    Ok(u32::from(data[0]) | u32::from(data[1]) << 8 | u32::from(data[2]) << 16)
}

fn mismatch(data: &[u8], expected: usize) -> SpectroError {
    SpectroError::ProtocolMismatch {
        opcode: 0,
        detail: format!("scalar needs {expected} bytes, got {}", data.len()),
    }
}
