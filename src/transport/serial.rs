//! Serial line implementation.
//!
//! - Unix: opened with exclusive access (`TIOCEXCL`)
//! - Windows: COM ports are exclusive by default
//!
//! # Example
//!
//! ```ignore
//! use serial_udp_bridge::transport::{default_device, SerialLine, DEFAULT_BAUD_RATE};
//!
//! let line = SerialLine::open(default_device(), DEFAULT_BAUD_RATE)?;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortType, SerialStream};

use crate::error::Result;

/// Default baud rate of the device.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Byte stream the bridge can drive as its serial side.
pub trait SerialTransport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drop whatever the device sent that nobody has read yet.
    fn discard_input(&mut self) -> std::io::Result<()>;
}

/// Platform default device path.
pub fn default_device() -> &'static str {
    #[cfg(windows)]
    {
        "COM4"
    }

    #[cfg(not(windows))]
    {
        "/dev/ttyUSB0"
    }
}

/// List serial ports visible to the OS as `(name, description)` pairs.
pub fn available_ports() -> Result<Vec<(String, String)>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "unknown".to_string(),
            };
            (port.port_name, description.trim_end().to_string())
        })
        .collect())
}

/// An open serial device (8N1, no flow control).
pub struct SerialLine {
    stream: SerialStream,
    device: String,
}

impl SerialLine {
    /// Open `device` at `baud_rate`.
    ///
    /// The line stays open for the life of the value; it is never reopened.
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        let builder = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None);

        #[allow(unused_mut)]
        let mut stream = SerialStream::open(&builder)?;

        #[cfg(unix)]
        stream.set_exclusive(true)?;

        tracing::debug!("Opened {} at {} baud", device, baud_rate);

        Ok(Self {
            stream,
            device: device.to_string(),
        })
    }

    /// Device path this line was opened on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &SerialStream {
        &self.stream
    }
}

impl SerialTransport for SerialLine {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.stream.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// In-memory line, used for loopback setups and tests.
///
/// Discarding reads out every byte already written by the other end
/// without waiting for more.
impl SerialTransport for DuplexStream {
    fn discard_input(&mut self) -> std::io::Result<()> {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let mut scratch = [0u8; 256];

        loop {
            let mut buf = ReadBuf::new(&mut scratch);
            match Pin::new(&mut *self).poll_read(&mut cx, &mut buf) {
                Poll::Ready(Ok(())) if !buf.filled().is_empty() => continue,
                Poll::Ready(Ok(())) | Poll::Pending => return Ok(()),
                Poll::Ready(Err(e)) => return Err(e),
            }
        }
    }
}

impl AsyncRead for SerialLine {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialLine {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
