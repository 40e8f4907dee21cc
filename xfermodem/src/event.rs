//! Event sink contract: the engine's only output channel.
//!
//! The engine never performs I/O itself. Instead it calls a host-provided
//! [`EventSink`] synchronously, from inside `process_data`/`cancel`/
//! `start_send`/`start_receive`, with one [`Event`] at a time, in exact wire
//! order. A single inbound byte may produce zero, one, or several events.

/// The transfer state reported alongside a [`Event::Progress`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Waiting for the peer to start the handshake.
    Negotiating,
    /// Actively sending or receiving data blocks.
    Transferring,
    /// Finishing the transfer (EOT/ZFIN exchange).
    Finishing,
}

/// A value emitted by the engine to the host.
///
/// Borrowed byte slices (`SendData`) are only valid for the duration of the
/// callback invocation; a host that needs to retain the bytes must copy them
/// before returning.
#[derive(Debug, Clone)]
pub enum Event<'a> {
    /// A transfer has begun. `file_name` is `None` for ZMODEM auto-detected
    /// starts before `ZFILE` has been parsed, and for XMODEM (which has no
    /// filename at all).
    Started {
        /// Declared file name, if known at start time.
        file_name: Option<String>,
        /// Declared file size in bytes, or 0 if unknown.
        file_size: u64,
    },
    /// Ongoing progress report.
    Progress {
        /// Current phase of the transfer.
        state: TransferState,
        /// Total bytes transferred (accepted/sent) so far.
        bytes_transferred: u64,
        /// Total bytes expected, or 0 if unknown.
        total_bytes: u64,
        /// Current block or frame sequence number.
        current_block: u32,
        /// Number of recovered (retried) errors so far.
        error_count: u32,
        /// File name, if known.
        file_name: Option<String>,
    },
    /// Bytes the host must write to the wire. Must be consumed (copied or
    /// written out) before this callback invocation returns.
    SendData {
        /// Outbound bytes, borrowed from the session's internal scratch buffer.
        bytes: &'a [u8],
    },
    /// The transfer finished successfully.
    Completed,
    /// The transfer terminated with an unrecoverable error.
    Failed {
        /// A short, human-readable ASCII message.
        message: &'a str,
    },
    /// The transfer was cancelled, by the host or by the peer.
    Cancelled,
}

/// A callback invoked synchronously by the engine to deliver [`Event`]s.
///
/// Implementations must not call back into the originating session from
/// within the callback except via `cancel()`, which the engine explicitly
/// tolerates as a re-entrant call.
pub trait EventSink {
    /// Handle one emitted event.
    fn on_event(&mut self, event: Event<'_>);
}

impl<F> EventSink for F
where
    F: FnMut(Event<'_>),
{
    fn on_event(&mut self, event: Event<'_>) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_sink_receives_events() {
        let mut seen = Vec::new();
        {
            let mut sink = |event: Event<'_>| {
                if let Event::Completed = event {
                    seen.push("completed");
                }
            };
            sink.on_event(Event::Completed);
        }
        assert_eq!(seen, vec!["completed"]);
    }
}
