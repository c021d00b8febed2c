//! Transport module - the two byte boundaries the bridge joins.
//!
//! - Serial line (`tokio-serial`), exclusive and full duplex
//! - UDP socket (`tokio::net::UdpSocket`), one datagram per request/reply

mod datagram;
mod serial;

pub use datagram::{bind_endpoint, DatagramEndpoint, RequestDatagram, MAX_DATAGRAM};
pub use serial::{
    available_ports, default_device, SerialLine, SerialTransport, DEFAULT_BAUD_RATE,
};
