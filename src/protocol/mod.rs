//! Protocol module - terminator framing and response frames.
//!
//! The device protocol has no length prefix. A response ends at the first
//! read that leaves `\r` as the last byte; a `!` in the first position
//! marks the whole response as an error reply.

mod frame;
mod frame_reader;

pub use frame::{render_bytes, ResponseFrame};
pub use frame_reader::{FrameReadState, FrameReader};

/// Byte that ends every device response.
pub const TERMINATOR: u8 = b'\r';

/// First byte of a device error reply.
pub const ERROR_MARKER: u8 = b'!';

/// Default response buffer capacity.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100;

/// Largest UDP payload that fits one unfragmented IPv4 datagram on Ethernet.
pub const MAX_UNFRAGMENTED_PAYLOAD: usize = 1472;
