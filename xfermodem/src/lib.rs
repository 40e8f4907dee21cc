//! # xfermodem
//!
//! A serial file transfer engine implementing the XMODEM family (checksum /
//! CRC-16 / 1K), YMODEM batch transfer, and ZMODEM framed streaming.
//!
//! The engine is a synchronous, single-threaded, push-driven byte machine:
//! it holds no threads, sockets, or files. The host owns the serial line,
//! pushes received bytes into a [`session::Session`] via `process_data`, and
//! receives outbound bytes and status updates through a host-provided
//! [`event::EventSink`].
//!
//! ## Cancellation Model
//!
//! Long-running host-side operations can be cancelled via the
//! [`CancelContext`] mechanism, letting the embedding application (e.g. a
//! CLI) signal interruption (e.g. Ctrl-C) and have the operation stop
//! gracefully. The transfer engine itself is cancelled directly through
//! [`session::Session::cancel`].
//!
//! ### Quick Start
//!
//! ```ignore
//! use xfermodem::{CancelContext, cancel_context_from_global};
//!
//! // Option 1: Use global interrupt flag (set by CLI when Ctrl-C is pressed)
//! let cancel = cancel_context_from_global();
//!
//! // Option 2: Create a custom cancel context
//! use std::sync::atomic::{AtomicBool, Ordering};
//! let flag = AtomicBool::new(false);
//! let cancel = CancelContext::new(move || flag.load(Ordering::SeqCst));
//!
//! // Option 3: No cancellation (always returns "not cancelled")
//! let cancel = CancelContext::none();
//! ```
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: `Serialize`/`Deserialize` impls for [`Protocol`](session::Protocol)
//!   and [`PortInfo`](port::PortInfo)
//!
//! ## Example
//!
//! ```rust
//! use xfermodem::{Protocol, Session};
//!
//! let mut sent = Vec::new();
//! let mut session = Session::new_sender(Protocol::XmodemCrc);
//! session.start_send(&mut |event| {
//!     if let xfermodem::Event::SendData { bytes } = event {
//!         sent.extend_from_slice(bytes);
//!     }
//! }, "", b"payload");
//! assert!(!sent.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod error;
pub mod event;
pub mod port;
pub mod protocol;
pub mod session;

/// Global interrupt flag for CLI-to-library communication.
///
/// This is set by CLI when Ctrl-C is received, and checked by
/// `cancel_context_from_global()` during long-running operations.
static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);

/// Explicit cancellation context for long-running library operations.
///
/// Unlike the global interrupt checker, this is explicitly passed through
/// the call chain, making it testable and composable.
#[derive(Clone, Default)]
pub struct CancelContext {
    checker: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl CancelContext {
    /// Create a new cancel context with the given checker function.
    #[must_use]
    pub fn new<F>(checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            checker: Some(Arc::new(checker)),
        }
    }

    /// Create a no-op cancel context (always returns "not cancelled").
    #[must_use]
    pub fn none() -> Self {
        Self { checker: None }
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.checker
            .as_ref()
            .is_some_and(|c| c())
    }

    /// Check and return an Interrupted error if cancelled.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "operation cancelled",
            )));
        }
        Ok(())
    }
}

/// Bridge from global interrupt checker to CancelContext for backward compatibility.
impl From<fn() -> bool> for CancelContext {
    fn from(checker: fn() -> bool) -> Self {
        Self::new(checker)
    }
}

/// Create a CancelContext that bridges to the global interrupt flag.
///
/// This is used internally by native implementations to check for Ctrl-C.
#[must_use]
pub fn cancel_context_from_global() -> CancelContext {
    CancelContext::new(|| INTERRUPT_FLAG.load(Ordering::SeqCst))
}

/// Set the global interrupt flag (for CLI to call when Ctrl-C is received).
pub fn set_interrupt_flag() {
    INTERRUPT_FLAG.store(true, Ordering::SeqCst);
}

/// Clear the global interrupt flag.
pub fn clear_interrupt_flag() {
    INTERRUPT_FLAG.store(false, Ordering::SeqCst);
}

/// Returns whether interruption was requested.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_FLAG.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    INTERRUPT_FLAG.store(value, Ordering::SeqCst);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    event::{Event, EventSink, TransferState},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::detect_zmodem_autostart,
    session::{Protocol, Session},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
