//! Cooperative cancellation driven by process interrupts.
//!
//! The [`CancelController`] owns the shutdown state machine:
//!
//! ```text
//! Running ──interrupt──► CancelRequested ──loop exits──► Stopped
//!                               │
//!                          interrupt again
//!                               ▼
//!                          forced exit
//! ```
//!
//! Every operation that can suspend (datagram receive, serial write, frame
//! read) takes a [`CancelToken`] and races it against its own work, so a
//! single interrupt wakes whichever one is pending.
//!
//! # Example
//!
//! ```
//! use serial_udp_bridge::cancel::{CancelController, CancelState, Interrupt};
//!
//! let controller = CancelController::new();
//! let token = controller.token();
//!
//! assert_eq!(controller.interrupt(), Interrupt::Graceful);
//! assert!(token.is_cancelled());
//! assert_eq!(controller.interrupt(), Interrupt::Forced);
//! assert_eq!(controller.state(), CancelState::CancelRequested);
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Exit code used when a second interrupt forces termination.
pub const FORCED_EXIT_CODE: i32 = -1;

const RUNNING: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const STOPPED: u8 = 2;

/// Shutdown state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    CancelRequested,
    Stopped,
}

impl CancelState {
    fn from_u8(value: u8) -> Self {
        match value {
            RUNNING => CancelState::Running,
            CANCEL_REQUESTED => CancelState::CancelRequested,
            _ => CancelState::Stopped,
        }
    }
}

/// What an interrupt should do to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// First interrupt: cancellation requested, keep the process alive.
    Graceful,
    /// Repeated interrupt: terminate immediately.
    Forced,
}

struct Shared {
    state: AtomicU8,
    tx: watch::Sender<bool>,
}

/// Owner side of the cancellation signal.
#[derive(Clone)]
pub struct CancelController {
    shared: Arc<Shared>,
}

impl CancelController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(RUNNING),
                tx,
            }),
        }
    }

    /// Hand out a token for threading into suspending operations.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            shared: self.shared.clone(),
        }
    }

    /// Current state of the state machine.
    pub fn state(&self) -> CancelState {
        CancelState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Feed one external interrupt into the state machine.
    ///
    /// The first call requests cancellation and wakes every waiting token.
    /// Any later call escalates.
    pub fn interrupt(&self) -> Interrupt {
        match self.shared.state.compare_exchange(
            RUNNING,
            CANCEL_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.shared.tx.send_replace(true);
                Interrupt::Graceful
            }
            Err(_) => Interrupt::Forced,
        }
    }

    /// Request cancellation without escalation semantics.
    pub fn cancel(&self) {
        let _ = self.shared.state.compare_exchange(
            RUNNING,
            CANCEL_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.tx.send_replace(true);
    }
}

impl Default for CancelController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the cancellation signal. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl CancelToken {
    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self.shared.tx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// Resolves immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.shared.tx.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Record that the bridge loop observed cancellation and exited.
    pub fn mark_stopped(&self) {
        let _ = self.shared.state.compare_exchange(
            CANCEL_REQUESTED,
            STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn state(&self) -> CancelState {
        CancelState::from_u8(self.shared.state.load(Ordering::Acquire))
    }
}

/// Translate Ctrl+C into [`CancelController::interrupt`].
///
/// A repeated interrupt exits the process with [`FORCED_EXIT_CODE`].
pub fn spawn_interrupt_handler(controller: CancelController) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for interrupt: {}", e);
                return;
            }

            match controller.interrupt() {
                Interrupt::Graceful => {
                    tracing::info!("Interrupt received, stopping (press Ctrl+C again to force)");
                }
                Interrupt::Forced => {
                    tracing::warn!("Repeated interrupt, exiting immediately");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    })
}
