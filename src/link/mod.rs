//! Serial link to the coating machine.
//!
//! The machine is driven over a single USB-to-serial adapter (CH340) at
//! 9600 baud with newline-delimited ASCII responses. This module owns port
//! discovery and the byte-level read/write contract; everything above it
//! ([`crate::protocol`], [`crate::detect`]) borrows the link through the
//! [`MachineLink`] trait for exactly one operation at a time.
//!
//! Serial I/O through the `serialport` crate is blocking, so every
//! operation runs on Tokio's blocking executor with the port behind an
//! `Arc<Mutex<..>>`, and line reads poll with a short internal port timeout
//! so a caller-supplied deadline can bound the wait.

pub mod mock;

pub use mock::{MockLink, MockLinkFactory};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Internal port timeout for single reads; the caller deadline loops over it.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Byte-level contract every link to the machine satisfies.
///
/// Commands are write-only; the machine never acknowledges receipt, only
/// eventual completion via a response line. `read_line` must never block
/// past its deadline.
#[async_trait]
pub trait MachineLink: Send {
    /// Write raw command bytes to the machine.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Accumulate bytes until a newline or the deadline. Returns the
    /// decoded, trimmed line, or `None` when the deadline elapsed first.
    async fn read_line(&mut self, deadline: Duration) -> Result<Option<String>>;

    /// Release the connection. Idempotent; safe on a link that never fully
    /// opened.
    async fn close(&mut self) -> Result<()>;
}

/// Opens a fresh link per operation.
///
/// The orchestrator scopes each command and each detection window to its
/// own connection, so the factory is the only long-lived handle.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MachineLink>>;
}

/// Scan OS-visible serial ports for the machine's USB-to-serial chip.
///
/// Returns the first port whose USB product descriptor contains `hint`
/// (`"CH340"` for the board in the lab), or `None` when nothing matches.
pub fn discover(hint: &str) -> Result<Option<String>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;

    for port in ports {
        let descriptor = match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone().unwrap_or_default(),
            _ => String::new(),
        };
        debug!("Port {}: '{}'", port.port_name, descriptor);
        if !hint.is_empty() && descriptor.contains(hint) {
            info!("Machine found on {} ('{}')", port.port_name, descriptor);
            return Ok(Some(port.port_name));
        }
    }

    Ok(None)
}

/// A live serial connection to the machine.
pub struct SerialLink {
    port_name: String,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialLink {
    /// Open `port_name` at `baud`. Fails when the port is missing or busy.
    pub async fn open(port_name: &str, baud: u32) -> Result<Self> {
        let name = port_name.to_string();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud)
                .timeout(PORT_POLL_TIMEOUT)
                .open()
        })
        .await
        .context("Serial open task panicked")?
        .with_context(|| format!("Failed to open serial port '{port_name}' at {baud} baud"))?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud);

        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    fn port_handle(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow!(crate::error::CoaterError::NotConnected))
    }
}

#[async_trait]
impl MachineLink for SerialLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_handle()?;
        let bytes = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = port.blocking_lock();
            guard
                .write_all(&bytes)
                .context("Failed to write to serial port")?;
            guard.flush().context("Failed to flush serial port")?;
            Ok(())
        })
        .await
        .context("Serial write task panicked")?
    }

    async fn read_line(&mut self, deadline: Duration) -> Result<Option<String>> {
        let port = self.port_handle()?;

        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut guard = port.blocking_lock();
            let start = Instant::now();
            let mut buffer = [0u8; 1];
            let mut line: Vec<u8> = Vec::new();

            loop {
                if start.elapsed() >= deadline {
                    return Ok(None);
                }

                match guard.read(&mut buffer) {
                    Ok(0) => {
                        // EOF - shouldn't happen with serial ports
                        return Err(anyhow!("Unexpected EOF from serial port"));
                    }
                    Ok(_) => {
                        if buffer[0] == b'\n' {
                            let text = String::from_utf8_lossy(&line).trim().to_string();
                            return Ok(Some(text));
                        }
                        line.push(buffer[0]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port poll timeout is shorter than the caller deadline
                        continue;
                    }
                    Err(e) => return Err(anyhow!("Serial read error: {}", e)),
                }
            }
        })
        .await
        .context("Serial read task panicked")?
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

/// Opens a [`SerialLink`] to a fixed port for each operation, waiting out
/// the board's post-open reset before handing the link to the caller.
pub struct SerialLinkFactory {
    port_name: String,
    baud: u32,
    settle: Duration,
}

impl SerialLinkFactory {
    pub fn new(port_name: String, baud: u32, settle: Duration) -> Self {
        Self {
            port_name,
            baud,
            settle,
        }
    }
}

#[async_trait]
impl LinkFactory for SerialLinkFactory {
    async fn connect(&self) -> Result<Box<dyn MachineLink>> {
        let link = SerialLink::open(&self.port_name, self.baud).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(Box::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_unknown_hint() {
        // No adapter on a test machine carries this descriptor.
        let found = discover("NO-SUCH-CHIP-XYZ").unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut link = SerialLink {
            port_name: "COM0".to_string(),
            port: None,
        };
        assert!(link.close().await.is_ok());
        assert!(link.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let mut link = SerialLink {
            port_name: "COM0".to_string(),
            port: None,
        };
        assert!(link.write(b"u:").await.is_err());
    }
}
