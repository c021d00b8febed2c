//! Frame reader for turning the serial byte stream into response frames.
//!
//! Reads straight into a fixed-capacity `bytes::BytesMut` buffer and
//! tracks a small per-cycle state:
//! - `bytes_accumulated`: write offset into the buffer
//! - `saw_error_marker`: first byte of the cycle was `!` (sticky)
//! - `saw_terminator`: last appended byte is `\r`
//!
//! A cycle ends on the terminator, cancellation, the deadline, a full
//! buffer, or end-of-stream. Only the terminator yields a frame; every
//! other exit discards the partial bytes. A full buffer keeps consuming
//! the rest of the oversized reply, up to its terminator or the deadline,
//! before reporting `Overflow`.
//!
//! # Example
//!
//! ```ignore
//! use serial_udp_bridge::protocol::FrameReader;
//!
//! let mut reader = FrameReader::with_capacity(100);
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
//!
//! let frame = reader.read_frame(&mut serial, &token, Some(deadline)).await?;
//! println!("{} bytes, error = {}", frame.len(), frame.is_error());
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use super::{ResponseFrame, DEFAULT_MAX_FRAME_SIZE, ERROR_MARKER, TERMINATOR};
use crate::cancel::CancelToken;
use crate::error::{BridgeError, Result};

/// Progress of the current read cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReadState {
    pub bytes_accumulated: usize,
    pub saw_error_marker: bool,
    pub saw_terminator: bool,
    pub elapsed: Duration,
}

/// Outcome of one suspended read.
enum Step {
    Cancelled,
    DeadlineReached,
    Read(std::io::Result<usize>),
}

/// Reads one terminator-delimited frame per call.
///
/// The buffer is allocated once and reused; each call starts from offset
/// zero and only `buffer[..bytes_accumulated]` is ever copied out, so
/// bytes from an earlier cycle never reach a new frame.
pub struct FrameReader {
    buffer: BytesMut,
    state: FrameReadState,
}

impl FrameReader {
    /// Create a reader with the default capacity (100 bytes).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a reader whose frames may hold at most `capacity` bytes
    /// (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::zeroed(capacity.max(1)),
            state: FrameReadState::default(),
        }
    }

    /// Maximum frame size, terminator included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// State of the most recent cycle.
    #[inline]
    pub fn state(&self) -> &FrameReadState {
        &self.state
    }

    /// Read until a complete frame is in the buffer.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if `cancel` fires; no read is started after that.
    /// - `Timeout` if `deadline` passes before the terminator.
    /// - `Overflow` if the buffer fills without a terminator. The tail of
    ///   the reply is read and dropped first, so it cannot start the next
    ///   frame.
    /// - `TransportClosed` on end-of-stream, `Io` on a read failure.
    pub async fn read_frame<R>(
        &mut self,
        reader: &mut R,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<ResponseFrame>
    where
        R: AsyncRead + Unpin,
    {
        self.state = FrameReadState::default();
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(self.abandon(started, BridgeError::Cancelled));
            }

            let filled = self.state.bytes_accumulated;
            if filled >= self.buffer.len() {
                let err = self.skip_oversized(reader, cancel, deadline).await;
                return Err(self.abandon(started, err));
            }

            let step = next_step(reader, &mut self.buffer[filled..], cancel, deadline).await;
            let n = match step {
                Step::Cancelled => return Err(self.abandon(started, BridgeError::Cancelled)),
                Step::DeadlineReached => {
                    let waited = started.elapsed();
                    return Err(self.abandon(started, BridgeError::Timeout { waited }));
                }
                Step::Read(Ok(0)) => {
                    return Err(self.abandon(started, BridgeError::TransportClosed))
                }
                Step::Read(Ok(n)) => n,
                Step::Read(Err(e)) => return Err(self.abandon(started, BridgeError::Io(e))),
            };

            if filled == 0 {
                self.state.saw_error_marker = self.buffer[0] == ERROR_MARKER;
            }
            self.state.bytes_accumulated += n;
            self.state.elapsed = started.elapsed();

            let len = self.state.bytes_accumulated;
            if self.buffer[len - 1] == TERMINATOR {
                self.state.saw_terminator = true;

                let bytes = Bytes::copy_from_slice(&self.buffer[..len]);
                return Ok(ResponseFrame::classified(bytes, self.state.saw_error_marker)
                    .with_waited(self.state.elapsed));
            }
        }
    }

    /// Read and drop the remainder of a reply that did not fit.
    ///
    /// Stops after a chunk ending in the terminator or at the deadline;
    /// either way the result is `Overflow`.
    async fn skip_oversized<R>(
        &mut self,
        reader: &mut R,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> BridgeError
    where
        R: AsyncRead + Unpin,
    {
        let capacity = self.buffer.len();
        let mut skipped = 0usize;

        loop {
            let step = next_step(reader, &mut self.buffer[..], cancel, deadline).await;
            match step {
                Step::Cancelled => return BridgeError::Cancelled,
                Step::DeadlineReached => break,
                Step::Read(Ok(0)) => return BridgeError::TransportClosed,
                Step::Read(Ok(n)) => {
                    skipped += n;
                    if self.buffer[n - 1] == TERMINATOR {
                        break;
                    }
                }
                Step::Read(Err(e)) => return BridgeError::Io(e),
            }
        }

        tracing::debug!("Dropped {} trailing bytes of an oversized reply", skipped);
        BridgeError::Overflow { capacity }
    }

    /// Drop partial bytes and hand back the error that ended the cycle.
    fn abandon(&mut self, started: Instant, err: BridgeError) -> BridgeError {
        self.state = FrameReadState {
            elapsed: started.elapsed(),
            ..FrameReadState::default()
        };
        err
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// One read into `buf`, raced against cancellation and the deadline.
async fn next_step<R>(
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancelToken,
    deadline: Option<Instant>,
) -> Step
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Step::Cancelled,
        _ = wait_until(deadline) => Step::DeadlineReached,
        result = reader.read(buf) => Step::Read(result),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelController;
    use tokio::io::{duplex, AsyncWriteExt};

    fn deadline_in(ms: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_single_complete_frame() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"OK\r").await.unwrap();
        let frame = reader.read_frame(&mut host, &token, None).await.unwrap();

        assert_eq!(frame.bytes(), b"OK\r");
        assert!(!frame.is_error());
        assert!(reader.state().saw_terminator);
        assert_eq!(reader.state().bytes_accumulated, 3);
    }

    #[tokio::test]
    async fn test_fragmented_frame() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        let chunks: [&'static [u8]; 4] = [b"=", b"0123", b"4567", b"\r"];
        let feeder = tokio::spawn(async move {
            for chunk in chunks {
                device.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            device
        });

        let frame = reader.read_frame(&mut host, &token, None).await.unwrap();
        assert_eq!(frame.bytes(), b"=01234567\r");
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_is_payload_plus_terminator() {
        let payloads: [&[u8]; 6] = [b"", b"OK", b"!", b"!SYNTAX", b"=0A1B2C", b"x!ERR"];

        for payload in payloads {
            let (mut host, mut device) = duplex(256);
            let token = CancelController::new().token();
            let mut reader = FrameReader::new();

            device.write_all(payload).await.unwrap();
            device.write_all(b"\r").await.unwrap();
            let frame = reader.read_frame(&mut host, &token, None).await.unwrap();

            let mut expected = payload.to_vec();
            expected.push(TERMINATOR);
            assert_eq!(frame.bytes(), &expected[..]);
            assert_eq!(frame.is_error(), payload.first() == Some(&b'!'));
        }
    }

    #[tokio::test]
    async fn test_error_marker_still_waits_for_terminator() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"!SYNTAX").await.unwrap();

        let (result, _) = tokio::join!(reader.read_frame(&mut host, &token, None), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            device.write_all(b"\r").await.unwrap();
        });

        let frame = result.unwrap();
        assert_eq!(frame.bytes(), b"!SYNTAX\r");
        assert!(frame.is_error());
        assert!(reader.state().saw_error_marker);
        assert_eq!(frame.is_error(), reader.state().saw_error_marker);
        assert!(frame.waited() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_error_marker_only_in_first_position() {
        // Known fragility: classification looks at the first byte only, so
        // line noise ahead of a real error reply hides the error.
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"\x00!SYNTAX\r").await.unwrap();
        let frame = reader.read_frame(&mut host, &token, None).await.unwrap();

        assert!(!frame.is_error());
        assert!(!reader.state().saw_error_marker);
    }

    #[tokio::test]
    async fn test_terminator_inside_chunk_is_not_an_end() {
        // Only the last byte of the accumulated data counts.
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"OK\rX").await.unwrap();
        let (result, _) = tokio::join!(reader.read_frame(&mut host, &token, None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            device.write_all(b"\r").await.unwrap();
        });

        assert_eq!(result.unwrap().bytes(), b"OK\rX\r");
    }

    #[tokio::test]
    async fn test_overflow() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::with_capacity(4);

        device.write_all(b"ABCDEFGH\r").await.unwrap();
        let result = reader.read_frame(&mut host, &token, deadline_in(1000)).await;

        assert!(matches!(result, Err(BridgeError::Overflow { capacity: 4 })));
        assert_eq!(reader.state().bytes_accumulated, 0);
    }

    #[tokio::test]
    async fn test_overflow_consumes_late_tail() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::with_capacity(5);

        device.write_all(b"01234").await.unwrap();
        let (result, _) = tokio::join!(
            reader.read_frame(&mut host, &token, deadline_in(1000)),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                device.write_all(b"56\r").await.unwrap();
            }
        );
        assert!(matches!(result, Err(BridgeError::Overflow { capacity: 5 })));

        device.write_all(b"OK\r").await.unwrap();
        let frame = reader.read_frame(&mut host, &token, deadline_in(1000)).await.unwrap();
        assert_eq!(frame.bytes(), b"OK\r");
    }

    #[tokio::test]
    async fn test_overflow_without_terminator_ends_at_deadline() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::with_capacity(4);

        device.write_all(b"ABCDEFGH").await.unwrap();
        let started = Instant::now();
        let result = reader.read_frame(&mut host, &token, deadline_in(40)).await;

        assert!(matches!(result, Err(BridgeError::Overflow { capacity: 4 })));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_cancel_while_skipping_oversized_reply() {
        let (mut host, mut device) = duplex(256);
        let controller = CancelController::new();
        let token = controller.token();
        let mut reader = FrameReader::with_capacity(4);

        device.write_all(b"ABCDEF").await.unwrap();
        let (result, _) = tokio::join!(reader.read_frame(&mut host, &token, None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.cancel();
        });

        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_frame_filling_capacity_exactly() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::with_capacity(3);

        device.write_all(b"OK\r").await.unwrap();
        let frame = reader.read_frame(&mut host, &token, None).await.unwrap();
        assert_eq!(frame.bytes(), b"OK\r");
    }

    #[tokio::test]
    async fn test_timeout_with_partial_bytes() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"PARTIAL").await.unwrap();
        let result = reader.read_frame(&mut host, &token, deadline_in(50)).await;

        match result {
            Err(BridgeError::Timeout { waited }) => assert!(waited >= Duration::from_millis(40)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(reader.state().bytes_accumulated, 0);
    }

    #[tokio::test]
    async fn test_timeout_with_silent_device() {
        let (mut host, _device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        let result = reader.read_frame(&mut host, &token, deadline_in(30)).await;
        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_no_stale_bytes_after_timeout() {
        let (mut host, mut device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        device.write_all(b"STALE").await.unwrap();
        let result = reader.read_frame(&mut host, &token, deadline_in(20)).await;
        assert!(result.is_err());

        device.write_all(b"OK\r").await.unwrap();
        let frame = reader.read_frame(&mut host, &token, None).await.unwrap();
        assert_eq!(frame.bytes(), b"OK\r");
    }

    #[tokio::test]
    async fn test_cancel_mid_read() {
        let (mut host, mut device) = duplex(256);
        let controller = CancelController::new();
        let token = controller.token();
        let mut reader = FrameReader::new();

        device.write_all(b"HALF").await.unwrap();

        let (result, _) = tokio::join!(reader.read_frame(&mut host, &token, None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.cancel();
        });

        assert!(matches!(result, Err(BridgeError::Cancelled)));
        assert_eq!(reader.state().bytes_accumulated, 0);

        // No further read is issued once cancelled.
        device.write_all(b"LATE\r").await.unwrap();
        let again = reader.read_frame(&mut host, &token, None).await;
        assert!(matches!(again, Err(BridgeError::Cancelled)));

        let mut buf = [0u8; 16];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"LATE\r");
    }

    #[tokio::test]
    async fn test_cancel_beats_deadline() {
        let (mut host, _device) = duplex(256);
        let controller = CancelController::new();
        let token = controller.token();
        let mut reader = FrameReader::new();

        let started = Instant::now();
        let (result, _) = tokio::join!(
            reader.read_frame(&mut host, &token, deadline_in(5_000)),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                controller.cancel();
            }
        );

        assert!(matches!(result, Err(BridgeError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let (mut host, device) = duplex(256);
        let token = CancelController::new().token();
        let mut reader = FrameReader::new();

        drop(device);
        let result = reader.read_frame(&mut host, &token, None).await;
        assert!(matches!(result, Err(BridgeError::TransportClosed)));
    }
}
