//! Byte-oriented channels to the instrument.
//!
//! A [`Transport`] is an opaque channel exposing USB-style control transfers
//! plus a bulk read. The protocol engine is the only caller; it owns exactly
//! one transport per session, so implementations do not need to defend
//! against concurrent use.
//!
//! Shipped implementations: USB ([`usb::UsbTransport`], feature
//! `transport_usb`), TCP ([`tcp::TcpTransport`]) and an in-memory simulator
//! ([`mock::MockTransport`]) used by the test suite. GATT and SPI channels
//! implement the same trait out of tree.
//!
//! Transports return `anyhow::Result` with a typed
//! [`TransportError`](crate::error::TransportError) as the root cause, so the
//! engine can classify failures by downcasting.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod mock;
pub mod tcp;
#[cfg(feature = "transport_usb")]
pub mod usb;

/// How a discovered device is addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceAddress {
    /// USB vendor/product id plus position on the bus.
    Usb { vid: u16, pid: u16, bus_order: u8 },
    /// TCP host:port of a network-attached instrument.
    Tcp(String),
    /// In-memory simulator.
    Mock,
}

/// Identity of one discoverable instrument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    /// Serial number when the bus exposes one before connect.
    pub serial_number: Option<String>,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            DeviceAddress::Usb {
                vid,
                pid,
                bus_order,
            } => write!(f, "usb:{vid:04x}:{pid:04x}:{bus_order}"),
            DeviceAddress::Tcp(addr) => write!(f, "tcp:{addr}"),
            DeviceAddress::Mock => write!(f, "mock"),
        }
    }
}

/// An open byte channel to one instrument.
///
/// All calls take explicit timeouts; absence of a response within the timeout
/// surfaces as [`TransportError::Timeout`](crate::error::TransportError) and
/// is treated as transient by the caller, never as a crash.
#[async_trait]
pub trait Transport: Send {
    fn identity(&self) -> &DeviceIdentity;

    /// Host-to-device control transfer. Returns bytes accepted.
    async fn control_write(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Device-to-host control transfer of exactly `length` bytes.
    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// Bulk read of `length` bytes from the given endpoint.
    async fn bulk_read(&mut self, endpoint: u8, length: usize, timeout: Duration)
        -> Result<Vec<u8>>;

    /// Release the channel. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is currently usable.
    fn is_ready(&self) -> bool;
}
