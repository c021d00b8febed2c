//! Bridge loop: one UDP request, one serial reply, strictly in order.
//!
//! Each cycle:
//! 1. Wait for a datagram (unbounded, cancellable)
//! 2. Write its payload verbatim to the serial line
//! 3. Read one terminated frame
//! 4. Send the frame back to the datagram's source
//!
//! Steps 2 and 3 share one deadline. The next datagram is not read until
//! the cycle ends, so later requests stay queued in the socket.
//!
//! # Example
//!
//! ```ignore
//! use serial_udp_bridge::{Bridge, CancelController};
//! use serial_udp_bridge::transport::{bind_endpoint, SerialLine};
//!
//! let controller = CancelController::new();
//! let serial = SerialLine::open("/dev/ttyUSB0", 9600)?;
//! let socket = bind_endpoint("0.0.0.0:11880".parse()?).await?;
//!
//! let mut bridge = Bridge::new(serial, socket, controller.token())
//!     .cycle_timeout(Duration::from_secs(5))
//!     .log_frames(true);
//! bridge.run().await?;
//! ```

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::config::{BridgeConfig, DEFAULT_CYCLE_TIMEOUT_MS};
use crate::error::{BridgeError, Result};
use crate::protocol::{
    render_bytes, FrameReader, ResponseFrame, DEFAULT_MAX_FRAME_SIZE, MAX_UNFRAGMENTED_PAYLOAD,
};
use crate::transport::{DatagramEndpoint, RequestDatagram, SerialTransport, MAX_DATAGRAM};

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Frame delivered in full.
    Replied {
        target: SocketAddr,
        frame: ResponseFrame,
    },
    /// Socket reported a different byte count than the frame length.
    DeliveryMismatch {
        target: SocketAddr,
        expected: usize,
        actual: usize,
    },
    /// Socket refused the reply.
    SendFailed { target: SocketAddr },
    /// No terminator within the cycle timeout.
    TimedOut,
    /// Reply larger than the frame capacity.
    Overflowed,
    /// Empty datagram, nothing forwarded.
    Skipped,
    /// Cancellation observed; the loop should exit.
    Stopped,
}

/// Correlates one datagram endpoint with one serial line.
pub struct Bridge<S, D> {
    serial: S,
    endpoint: D,
    reader: FrameReader,
    cancel: CancelToken,
    cycle_timeout: Duration,
    log_frames: bool,
    recv_buf: Vec<u8>,
}

impl<S, D> Bridge<S, D>
where
    S: SerialTransport,
    D: DatagramEndpoint,
{
    /// Create a bridge with default timeout and frame capacity.
    pub fn new(serial: S, endpoint: D, cancel: CancelToken) -> Self {
        Self {
            serial,
            endpoint,
            reader: FrameReader::with_capacity(DEFAULT_MAX_FRAME_SIZE),
            cancel,
            cycle_timeout: Duration::from_millis(DEFAULT_CYCLE_TIMEOUT_MS),
            log_frames: false,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Create a bridge using the timeout, capacity and logging from `config`.
    pub fn from_config(serial: S, endpoint: D, cancel: CancelToken, config: &BridgeConfig) -> Self {
        Self::new(serial, endpoint, cancel)
            .cycle_timeout(config.cycle_timeout())
            .max_frame_size(config.max_frame_size)
            .log_frames(config.log_frames)
    }

    /// Bound on writing a request plus reading its reply.
    pub fn cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    /// Largest reply accepted, terminator included.
    ///
    /// Clamped to `1..=MAX_UNFRAGMENTED_PAYLOAD` so a reply always fits in
    /// one unfragmented datagram.
    pub fn max_frame_size(mut self, capacity: usize) -> Self {
        let clamped = capacity.clamp(1, MAX_UNFRAGMENTED_PAYLOAD);
        if clamped != capacity {
            tracing::warn!("Max frame size {} out of range, using {}", capacity, clamped);
        }
        self.reader = FrameReader::with_capacity(clamped);
        self
    }

    /// Log every request and reply.
    pub fn log_frames(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }

    /// Give back the serial line and endpoint.
    pub fn into_parts(self) -> (S, D) {
        (self.serial, self.endpoint)
    }

    /// Run cycles until cancellation.
    ///
    /// Timeouts, overflows and delivery problems are reported and the loop
    /// moves on. Any other failure ends the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        if let Ok(addr) = self.endpoint.local_addr() {
            tracing::info!("Waiting for commands on {}", addr);
        }

        loop {
            if self.run_cycle().await? == CycleOutcome::Stopped {
                break;
            }
        }

        self.cancel.mark_stopped();
        tracing::info!("Bridge stopped");
        Ok(())
    }

    /// Run exactly one request/response cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let request = match self.receive().await {
            Ok(request) => request,
            Err(BridgeError::Cancelled) => return Ok(self.stopping()),
            Err(e) => return Err(e),
        };

        if request.payload.is_empty() {
            tracing::warn!("Ignoring empty datagram from {}", request.source);
            return Ok(CycleOutcome::Skipped);
        }

        if self.log_frames {
            tracing::info!("<< {}", render_bytes(&request.payload));
        }

        match self.exchange(&request.payload).await {
            Ok(frame) => Ok(self.reply(frame, request.source).await),
            Err(BridgeError::Cancelled) => Ok(self.stopping()),
            Err(e @ BridgeError::Timeout { .. }) => {
                tracing::error!("{} (request from {})", e, request.source);
                self.discard_input();
                Ok(CycleOutcome::TimedOut)
            }
            Err(e @ BridgeError::Overflow { .. }) => {
                tracing::error!("{} (request from {})", e, request.source);
                self.discard_input();
                Ok(CycleOutcome::Overflowed)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for the next datagram.
    async fn receive(&mut self) -> Result<RequestDatagram> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
                result = self.endpoint.recv_datagram(&mut self.recv_buf) => result,
            };

            match received {
                Ok((n, source)) => {
                    return Ok(RequestDatagram {
                        payload: Bytes::copy_from_slice(&self.recv_buf[..n]),
                        source,
                    })
                }
                // ICMP feedback from an earlier reply; the socket is fine.
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused
                    ) =>
                {
                    tracing::warn!("Ignoring receive error: {}", e);
                }
                Err(e) => return Err(BridgeError::Io(e)),
            }
        }
    }

    /// Write the request and read its reply under one deadline.
    ///
    /// Input left over from an earlier cycle is dropped before writing.
    async fn exchange(&mut self, payload: &[u8]) -> Result<ResponseFrame> {
        let started = Instant::now();
        let deadline = started + self.cycle_timeout;

        self.discard_input();

        let serial = &mut self.serial;
        let write = async move {
            serial.write_all(payload).await?;
            serial.flush().await
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(BridgeError::Timeout { waited: started.elapsed() })
            }
            result = write => result?,
        }

        self.reader
            .read_frame(&mut self.serial, &self.cancel, Some(deadline))
            .await
    }

    /// Send the frame to `target` and check the byte count.
    async fn reply(&mut self, frame: ResponseFrame, target: SocketAddr) -> CycleOutcome {
        let log_frames = self.log_frames;
        let endpoint = &self.endpoint;
        let send = async {
            tokio::join!(endpoint.send_datagram(frame.bytes(), target), async {
                log_frames.then(|| frame.render())
            })
        };

        let (sent, rendered) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.stopping(),
            joined = send => joined,
        };

        if let Some(text) = &rendered {
            tracing::info!(
                error = frame.is_error(),
                ">> {} [{} ms]",
                text,
                frame.waited().as_millis()
            );
        }

        match sent {
            Ok(actual) if actual == frame.len() => CycleOutcome::Replied { target, frame },
            Ok(actual) => {
                let expected = frame.len();
                let err = BridgeError::DeliveryMismatch {
                    frame: rendered.unwrap_or_else(|| frame.render()),
                    expected,
                    actual,
                };
                tracing::error!("{}", err);
                CycleOutcome::DeliveryMismatch {
                    target,
                    expected,
                    actual,
                }
            }
            Err(e) => {
                tracing::error!("Failed to send {} to {}: {}", frame.render(), target, e);
                CycleOutcome::SendFailed { target }
            }
        }
    }

    fn discard_input(&mut self) {
        if let Err(e) = self.serial.discard_input() {
            tracing::warn!("Failed to discard pending serial input: {}", e);
        }
    }

    fn stopping(&self) -> CycleOutcome {
        tracing::info!("Stopping");
        CycleOutcome::Stopped
    }
}
