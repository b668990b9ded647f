//! Serial transport seam
//!
//! The supervisor only sees a byte-oriented duplex stream. Production opens a
//! real serial port through `tokio-serial`; tests hand out in-memory pipes.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Device path and baud rate of the slider box
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub path: String,
    pub baud_rate: u32,
}

impl fmt::Display for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.baud_rate)
    }
}

/// An open, bidirectional byte stream
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

pub type BoxedSerial = Box<dyn SerialIo>;

/// Opens transports for the connection supervisor
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, params: &TransportParams) -> EngineResult<BoxedSerial>;
}

/// Connector backed by a real serial port
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortConnector;

#[async_trait]
impl Connector for SerialPortConnector {
    async fn open(&self, params: &TransportParams) -> EngineResult<BoxedSerial> {
        debug!("Opening serial port {}", params);

        let stream = tokio_serial::new(params.path.as_str(), params.baud_rate)
            .open_native_async()
            .map_err(|e| EngineError::TransportOpenFailed {
                path: params.path.clone(),
                baud_rate: params.baud_rate,
                reason: e.to_string(),
            })?;

        Ok(Box::new(stream))
    }
}

/// A serial port found on the system
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub is_usb: bool,
    pub description: Option<String>,
}

/// Enumerate serial ports available on this machine
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let (is_usb, description) = match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    let label = [usb.manufacturer, usb.product]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ");
                    let label = if label.is_empty() {
                        format!("{:04x}:{:04x}", usb.vid, usb.pid)
                    } else {
                        label
                    };
                    (true, Some(label))
                }
                SerialPortType::BluetoothPort => (false, Some("Bluetooth".to_string())),
                SerialPortType::PciPort => (false, Some("PCI".to_string())),
                SerialPortType::Unknown => (false, None),
            };
            PortInfo {
                name: port.port_name,
                is_usb,
                description,
            }
        })
        .collect())
}

/// Print available serial ports (for `--list-ports`)
pub fn list_ports_formatted() {
    use colored::*;

    println!("\n{}", "=== Available Serial Ports ===".bold().cyan());

    match list_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No serial ports found".dimmed());
        }
        Ok(ports) => {
            for port in ports {
                let marker = if port.is_usb {
                    "[USB]".green()
                } else {
                    "[OTHER]".yellow()
                };
                match port.description {
                    Some(desc) => println!("  {} {} ({})", marker, port.name.bright_white(), desc),
                    None => println!("  {} {}", marker, port.name.bright_white()),
                }
            }
        }
        Err(e) => {
            println!("  {} {}", "Failed to enumerate ports:".red(), e);
        }
    }
}
