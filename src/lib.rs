//! # serial-udp-bridge
//!
//! Exposes a line-oriented serial device over UDP.
//!
//! Every inbound datagram is written verbatim to the serial line; the
//! device's reply, ended by `\r`, is read back and sent to whoever sent
//! the datagram. Replies starting with `!` are device errors and are
//! forwarded unchanged.
//!
//! ## Architecture
//!
//! - **Transport**: `tokio-serial` line and a `tokio` UDP socket
//! - **Protocol**: terminator framing into [`ResponseFrame`]s
//! - **Bridge**: one request in flight at a time, bounded by a deadline
//! - **Cancellation**: Ctrl+C stops gracefully, a second one forces exit
//!
//! ## Example
//!
//! ```ignore
//! use serial_udp_bridge::{Bridge, BridgeConfig, CancelController};
//! use serial_udp_bridge::cancel::spawn_interrupt_handler;
//! use serial_udp_bridge::transport::{bind_endpoint, SerialLine};
//!
//! #[tokio::main]
//! async fn main() -> serial_udp_bridge::Result<()> {
//!     let config = BridgeConfig::default();
//!     let controller = CancelController::new();
//!     spawn_interrupt_handler(controller.clone());
//!
//!     let serial = SerialLine::open(&config.device, config.baud_rate)?;
//!     let socket = bind_endpoint(config.bind).await?;
//!
//!     let mut bridge = Bridge::from_config(serial, socket, controller.token(), &config);
//!     bridge.run().await
//! }
//! ```

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use bridge::{Bridge, CycleOutcome};
pub use cancel::{CancelController, CancelToken};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use protocol::ResponseFrame;
