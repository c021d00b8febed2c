//! Response frame with typed accessors.
//!
//! A frame is one complete device reply, terminator included.
//! Uses `bytes::Bytes` so the bridge can hand the payload to the socket
//! without copying it again.
//!
//! # Example
//!
//! ```
//! use serial_udp_bridge::protocol::ResponseFrame;
//! use bytes::Bytes;
//!
//! let frame = ResponseFrame::new(Bytes::from_static(b"!SYNTAX\r"));
//!
//! assert!(frame.is_error());
//! assert_eq!(frame.len(), 8);
//! assert_eq!(frame.render(), "!SYNTAX\\r");
//! ```

use std::fmt::Write;
use std::time::Duration;

use bytes::Bytes;

use super::{ERROR_MARKER, TERMINATOR};

/// A complete response frame read from the serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    bytes: Bytes,
    is_error: bool,
    waited: Duration,
}

impl ResponseFrame {
    /// Create a frame from raw bytes, classifying it by its first byte.
    pub fn new(bytes: Bytes) -> Self {
        let is_error = bytes.first() == Some(&ERROR_MARKER);
        Self::classified(bytes, is_error)
    }

    /// Create a frame whose error flag was already decided by the reader.
    pub(crate) fn classified(bytes: Bytes, is_error: bool) -> Self {
        Self {
            bytes,
            is_error,
            waited: Duration::ZERO,
        }
    }

    /// Attach the time spent waiting for this frame.
    pub(crate) fn with_waited(mut self, waited: Duration) -> Self {
        self.waited = waited;
        self
    }

    /// Frame bytes, terminator included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap clone of the underlying buffer.
    #[inline]
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the device flagged this reply as an error (`!` first byte).
    #[inline]
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Whether the frame ends with the terminator byte.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.bytes.last() == Some(&TERMINATOR)
    }

    /// Time between the start of the read phase and the terminator.
    #[inline]
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Human-readable rendering for log lines.
    pub fn render(&self) -> String {
        render_bytes(&self.bytes)
    }
}

/// Render raw protocol bytes as a single printable line.
///
/// `\r` and `\n` are shown as escapes so a frame never breaks a log line;
/// other non-printable bytes become `\xNN`.
pub fn render_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 4);
    for &b in bytes {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}
