//! TCP transport for network-attached instruments.
//!
//! The wire protocol is a 6-byte setup packet, deliberately shaped like a
//! simplified USB control transfer so the same opcode layer drives both
//! transports:
//!
//! ```text
//! Offset Length Field    Description
//! 0      1      request  opcode (0xff selects a second-tier opcode in value)
//! 1      2      value    parameter #1, big-endian
//! 3      2      index    parameter #2, big-endian
//! 5      1      length   payload length
//! ```
//!
//! A write is acknowledged with a single status byte (0x00 = success); a read
//! returns exactly the requested number of bytes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DeviceAddress, DeviceIdentity, Transport};
use crate::error::TransportError;

/// Status byte acknowledging a successful setter.
const SUCCESS: u8 = 0x00;

pub struct TcpTransport {
    identity: DeviceIdentity,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `host:port` and handshake into binary mode.
    ///
    /// The instrument greets with `OK\n` in ASCII mode; sending `BIN\n`
    /// switches it to the packet protocol above.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
            .with_context(|| format!("connecting to {addr}"))?;

        let mut transport = Self {
            identity: DeviceIdentity {
                address: DeviceAddress::Tcp(addr.to_string()),
                serial_number: None,
            },
            stream: Some(stream),
        };
        transport.handshake(timeout).await?;
        info!("connected to TCP instrument at {addr}");
        Ok(transport)
    }

    async fn handshake(&mut self, timeout: Duration) -> Result<()> {
        let greeting = self.read_exact(3, timeout).await?;
        if greeting != b"OK\n" {
            return Err(anyhow!("unexpected greeting {greeting:02x?}"));
        }

        debug!("switching instrument to binary mode");
        let stream = self.stream_mut()?;
        stream.write_all(b"BIN\n").await.map_err(TransportError::Io)?;
        let ack = self.read_exact(1, timeout).await?;
        if ack[0] != SUCCESS {
            return Err(anyhow!("failed to enter binary mode (ack 0x{:02x})", ack[0]));
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow::Error::from(TransportError::NotConnected))
    }

    fn setup_packet(request: u8, value: u16, index: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(6 + payload.len());
        packet.push(request);
        packet.extend_from_slice(&value.to_be_bytes());
        packet.extend_from_slice(&index.to_be_bytes());
        packet.push(payload.len() as u8);
        packet.extend_from_slice(payload);
        packet
    }

    async fn read_exact(&mut self, length: usize, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; length];
        tokio::time::timeout(timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
            .map_err(TransportError::Io)?;
        Ok(buf)
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
        if payload.len() > u8::MAX as usize {
            return Err(anyhow!("payload of {} bytes exceeds frame limit", payload.len()));
        }
        let packet = Self::setup_packet(request, value, index, payload);
        let stream = self.stream_mut()?;
        stream.write_all(&packet).await.map_err(TransportError::Io)?;

        let ack = self.read_exact(1, timeout).await?;
        if ack[0] != SUCCESS {
            return Err(anyhow::Error::from(TransportError::Disconnected(format!(
                "setter 0x{request:02x} rejected with status 0x{:02x}",
                ack[0]
            ))));
        }
        Ok(payload.len())
    }

    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let packet = Self::setup_packet(request, value, index, &[]);
        let stream = self.stream_mut()?;
        stream.write_all(&packet).await.map_err(TransportError::Io)?;
        self.read_exact(length, timeout).await
    }

    async fn bulk_read(
        &mut self,
        _endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        // No separate endpoints on a socket; spectrum bytes follow the
        // acquire command on the same stream.
        self.read_exact(length, timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("closing TCP stream to {}", self.identity);
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.stream.is_some()
    }
}
