//! USB transport backed by librusb.
//!
//! The instrument enumerates with vendor id 0x24aa and a product id that
//! selects the electronics generation. Control transfers carry opcodes; the
//! spectrum itself arrives on bulk IN endpoints.
//!
//! librusb calls block, so each one runs on the blocking task executor; the
//! handle is shared behind an `Arc` for that purpose only. The session layer
//! still issues calls strictly one at a time.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rusb::{DeviceHandle, GlobalContext};
use std::sync::Arc;
use std::time::Duration;

use super::{DeviceAddress, DeviceIdentity, Transport};
use crate::error::TransportError;

/// Vendor id shared by all supported instruments.
pub const VENDOR_ID: u16 = 0x24aa;

/// Product ids the library recognizes.
pub const KNOWN_PIDS: [u16; 3] = [0x1000, 0x2000, 0x4000];

const HOST_TO_DEVICE: u8 = 0x40;
const DEVICE_TO_HOST: u8 = 0xc0;

pub struct UsbTransport {
    identity: DeviceIdentity,
    handle: Option<Arc<DeviceHandle<GlobalContext>>>,
}

impl UsbTransport {
    /// Enumerate all supported instruments currently on the bus.
    pub fn find_all() -> Result<Vec<DeviceIdentity>> {
        let mut found = Vec::new();
        let devices = rusb::devices().context("enumerating USB bus")?;
        let mut per_pid_count = std::collections::HashMap::new();
        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping device without descriptor: {e}");
                    continue;
                }
            };
            if desc.vendor_id() != VENDOR_ID || !KNOWN_PIDS.contains(&desc.product_id()) {
                continue;
            }
            let bus_order = *per_pid_count
                .entry(desc.product_id())
                .and_modify(|c| *c += 1)
                .or_insert(0u8);
            found.push(DeviceIdentity {
                address: DeviceAddress::Usb {
                    vid: VENDOR_ID,
                    pid: desc.product_id(),
                    bus_order,
                },
                serial_number: None,
            });
        }
        info!("USB enumeration found {} instrument(s)", found.len());
        Ok(found)
    }

    /// Open the instrument at the given identity and claim its interface.
    pub fn open(identity: DeviceIdentity) -> Result<Self> {
        let (pid, bus_order) = match identity.address {
            DeviceAddress::Usb { pid, bus_order, .. } => (pid, bus_order),
            ref other => return Err(anyhow!("not a USB address: {other:?}")),
        };

        if bus_order != 0 {
            warn!("non-standard bus order {bus_order}");
        }

        let devices = rusb::devices().context("enumerating USB bus")?;
        let mut matching = devices.iter().filter(|d| {
            d.device_descriptor()
                .map(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == pid)
                .unwrap_or(false)
        });
        let device = matching
            .nth(bus_order as usize)
            .ok_or_else(|| anyhow!("no device {VENDOR_ID:04x}:{pid:04x} at position {bus_order}"))?;

        let handle = device
            .open()
            .with_context(|| format!("opening {VENDOR_ID:04x}:{pid:04x}"))?;
        handle
            .set_active_configuration(1)
            .context("setting USB configuration 1")?;
        handle.claim_interface(0).context("claiming interface 0")?;

        info!("opened USB instrument {identity}");
        Ok(Self {
            identity,
            handle: Some(Arc::new(handle)),
        })
    }

    fn handle(&self) -> Result<Arc<DeviceHandle<GlobalContext>>> {
        self.handle
            .clone()
            .ok_or_else(|| anyhow::Error::from(TransportError::NotConnected))
    }

    fn map_rusb(err: rusb::Error, timeout: Duration) -> anyhow::Error {
        match err {
            rusb::Error::Timeout => {
                anyhow::Error::from(TransportError::Timeout(timeout.as_millis() as u64))
            }
            other => anyhow::Error::from(TransportError::Disconnected(other.to_string())),
        }
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    async fn control_write(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle()?;
        let payload = payload.to_vec();
        tokio::task::spawn_blocking(move || {
            handle
                .write_control(HOST_TO_DEVICE, request, value, index, &payload, timeout)
                .map_err(|e| Self::map_rusb(e, timeout))
        })
        .await
        .context("USB I/O task panicked")?
    }

    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let handle = self.handle()?;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; length];
            let n = handle
                .read_control(DEVICE_TO_HOST, request, value, index, &mut buf, timeout)
                .map_err(|e| Self::map_rusb(e, timeout))?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .context("USB I/O task panicked")?
    }

    async fn bulk_read(
        &mut self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let handle = self.handle()?;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; length];
            let n = handle
                .read_bulk(endpoint, &mut buf, timeout)
                .map_err(|e| Self::map_rusb(e, timeout))?;
            if n != length {
                return Err(anyhow::Error::from(TransportError::ShortRead {
                    expected: length,
                    actual: n,
                }));
            }
            Ok(buf)
        })
        .await
        .context("USB I/O task panicked")?
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            debug!("releasing USB interface for {}", self.identity);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = handle.release_interface(0) {
                    warn!("failed to release USB interface: {e}");
                }
            })
            .await
            .context("USB I/O task panicked")?;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.handle.is_some()
    }
}
