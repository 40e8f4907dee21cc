//! Session facade: picks a protocol variant at creation time and forwards
//! `process_data`/`cancel`/query calls to it.

use log::debug;

use crate::event::EventSink;
use crate::protocol::{XmodemMachine, YmodemMachine, ZmodemMachine};

/// Which wire protocol a [`Session`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Protocol {
    /// XMODEM with the original 8-bit checksum trailer.
    XmodemChecksum,
    /// XMODEM with a CRC-16 trailer, 128-byte blocks.
    XmodemCrc,
    /// XMODEM-1K: CRC-16 trailer, 1024-byte blocks.
    Xmodem1k,
    /// YMODEM batch (XMODEM-1K-CRC plus block-0 metadata).
    Ymodem,
    /// ZMODEM framed streaming protocol.
    Zmodem,
}

enum Machine {
    Xmodem(XmodemMachine),
    Ymodem(YmodemMachine),
    Zmodem(ZmodemMachine),
}

/// A single file-transfer session: owns one protocol machine and the
/// accumulated receive buffer/filename.
pub struct Session {
    machine: Machine,
}

impl Session {
    /// Create a session configured to send.
    #[must_use]
    pub fn new_sender(protocol: Protocol) -> Self {
        debug!("session: new sender, protocol={protocol:?}");
        let machine = match protocol {
            Protocol::XmodemChecksum | Protocol::XmodemCrc => {
                Machine::Xmodem(XmodemMachine::new_sender(false))
            },
            Protocol::Xmodem1k => Machine::Xmodem(XmodemMachine::new_sender(true)),
            Protocol::Ymodem => Machine::Ymodem(YmodemMachine::new_sender()),
            Protocol::Zmodem => Machine::Zmodem(ZmodemMachine::new_sender()),
        };
        Self { machine }
    }

    /// Create a session configured to receive.
    #[must_use]
    pub fn new_receiver(protocol: Protocol) -> Self {
        debug!("session: new receiver, protocol={protocol:?}");
        let machine = match protocol {
            Protocol::XmodemChecksum | Protocol::XmodemCrc | Protocol::Xmodem1k => {
                Machine::Xmodem(XmodemMachine::new_receiver())
            },
            Protocol::Ymodem => Machine::Ymodem(YmodemMachine::new_receiver()),
            Protocol::Zmodem => Machine::Zmodem(ZmodemMachine::new_receiver()),
        };
        Self { machine }
    }

    /// Begin sending `data`. For XMODEM, `file_name` is ignored (the
    /// protocol carries no filename); for YMODEM/ZMODEM it is required.
    pub fn start_send(&mut self, sink: &mut dyn EventSink, file_name: &str, data: &[u8]) {
        match &mut self.machine {
            Machine::Xmodem(m) => m.start_send(sink, data),
            Machine::Ymodem(m) => m.start_send(sink, file_name, data),
            Machine::Zmodem(m) => m.start_send(sink, file_name, data),
        }
    }

    /// Begin receiving: emits the initial handshake bytes via `sink`.
    pub fn start_receive(&mut self, sink: &mut dyn EventSink) {
        match &mut self.machine {
            Machine::Xmodem(m) => m.start_receive(sink),
            Machine::Ymodem(m) => m.start_receive(sink),
            Machine::Zmodem(m) => m.start_receive(sink),
        }
    }

    /// Feed inbound bytes to the machine, driving it and emitting events.
    pub fn process_data(&mut self, sink: &mut dyn EventSink, bytes: &[u8]) {
        match &mut self.machine {
            Machine::Xmodem(m) => m.process_data(sink, bytes),
            Machine::Ymodem(m) => m.process_data(sink, bytes),
            Machine::Zmodem(m) => m.process_data(sink, bytes),
        }
    }

    /// Cancel the transfer. Idempotent.
    pub fn cancel(&mut self, sink: &mut dyn EventSink) {
        match &mut self.machine {
            Machine::Xmodem(m) => m.cancel(sink),
            Machine::Ymodem(m) => m.cancel(sink),
            Machine::Zmodem(m) => m.cancel(sink),
        }
    }

    /// True iff the machine is neither idle nor in a terminal state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match &self.machine {
            Machine::Xmodem(m) => m.is_active(),
            Machine::Ymodem(m) => m.is_active(),
            Machine::Zmodem(m) => m.is_active(),
        }
    }

    /// Borrowed slice of the bytes accumulated so far on a receive session.
    #[must_use]
    pub fn received_data(&self) -> &[u8] {
        match &self.machine {
            Machine::Xmodem(m) => m.received_data(),
            Machine::Ymodem(m) => m.received_data(),
            Machine::Zmodem(m) => m.received_data(),
        }
    }

    /// The peer-declared file name, if the protocol carries one and it has
    /// been parsed yet.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        match &self.machine {
            Machine::Xmodem(_) => None,
            Machine::Ymodem(m) => m.file_name(),
            Machine::Zmodem(m) => m.file_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[derive(Default)]
    struct Recorder {
        out: Vec<u8>,
        completed: bool,
    }

    impl EventSink for Recorder {
        fn on_event(&mut self, event: Event<'_>) {
            match event {
                Event::SendData { bytes } => self.out.extend_from_slice(bytes),
                Event::Completed => self.completed = true,
                _ => {},
            }
        }
    }

    #[test]
    fn xmodem_checksum_round_trip_through_session() {
        let mut sender = Session::new_sender(Protocol::XmodemChecksum);
        let mut receiver = Session::new_receiver(Protocol::XmodemChecksum);
        let mut sender_rec = Recorder::default();
        let mut recv_rec = Recorder::default();

        sender.start_send(&mut sender_rec, "", b"hello");
        receiver.start_receive(&mut recv_rec);

        let mut to_sender = std::mem::take(&mut recv_rec.out);
        let mut to_receiver = Vec::new();
        for _ in 0..1000 {
            if !sender.is_active() && !receiver.is_active() {
                break;
            }
            if !to_sender.is_empty() {
                let bytes = std::mem::take(&mut to_sender);
                sender.process_data(&mut sender_rec, &bytes);
                to_receiver.extend(std::mem::take(&mut sender_rec.out));
            }
            if !to_receiver.is_empty() {
                let bytes = std::mem::take(&mut to_receiver);
                receiver.process_data(&mut recv_rec, &bytes);
                to_sender.extend(std::mem::take(&mut recv_rec.out));
            }
            if to_sender.is_empty() && to_receiver.is_empty() {
                break;
            }
        }

        assert_eq!(receiver.received_data(), b"hello");
        assert!(recv_rec.completed);
    }

    #[test]
    fn is_active_false_once_terminal() {
        let mut session = Session::new_sender(Protocol::Zmodem);
        let mut rec = Recorder::default();
        assert!(session.is_active());
        session.cancel(&mut rec);
        assert!(!session.is_active());
    }
}
