//! XMODEM machine: checksum, CRC-16, and 1K block variants.
//!
//! A single state machine drives all three wire variants; the difference
//! between checksum and CRC-16 is a runtime-negotiated `mode` (the sender
//! learns it from the first byte the receiver sends; the receiver always
//! requests CRC-16), and 1K mode is a block-size preference the sender
//! applies once CRC-16 has been negotiated.

use log::{debug, trace, warn};

use crate::event::{Event, EventSink, TransferState};
use crate::protocol::crc::{checksum, crc16};

/// Start of Header (128-byte block).
pub const SOH: u8 = 0x01;
/// Start of Text (1024-byte block, "1K" mode).
pub const STX: u8 = 0x02;
/// End of Transmission.
pub const EOT: u8 = 0x04;
/// Acknowledge.
pub const ACK: u8 = 0x06;
/// Not Acknowledge.
pub const NAK: u8 = 0x15;
/// Cancel.
pub const CAN: u8 = 0x18;
/// Substitute, used to pad a short final block.
pub const SUB: u8 = 0x1A;
/// CRC-16 mode negotiation request.
pub const C: u8 = b'C';

/// Maximum recoverable retries before a session fails.
pub const MAX_RETRIES: u32 = 10;

const SOH_PAYLOAD: usize = 128;
const STX_PAYLOAD: usize = 1024;

/// Trailer mode, negotiated at the start of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Checksum,
    Crc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    WaitingForInit,
    WaitingForAck,
    WaitingForEotAck,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    WaitingForBlock,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    None,
    Completed,
    Failed,
    Cancelled,
}

/// XMODEM sender/receiver state machine.
pub struct XmodemMachine {
    direction: Direction,
    use_1k: bool,
    send_state: SendState,
    recv_state: RecvState,
    terminal: Terminal,
    mode: Mode,
    block_num: u8,
    retry_count: u32,
    error_count: u32,

    // Sender-only
    data: Vec<u8>,
    send_offset: usize,

    // Receiver-only
    accumulator: Vec<u8>,
    block_buf: Vec<u8>,
    expected_block_size: usize,
}

impl XmodemMachine {
    /// Create a machine configured for sending, optionally preferring 1K
    /// (STX) blocks once CRC-16 mode is negotiated.
    #[must_use]
    pub fn new_sender(use_1k: bool) -> Self {
        Self {
            direction: Direction::Send,
            use_1k,
            send_state: SendState::WaitingForInit,
            recv_state: RecvState::WaitingForBlock,
            terminal: Terminal::None,
            mode: Mode::Crc,
            block_num: 1,
            retry_count: 0,
            error_count: 0,
            data: Vec::new(),
            send_offset: 0,
            accumulator: Vec::new(),
            block_buf: Vec::new(),
            expected_block_size: SOH_PAYLOAD,
        }
    }

    /// Create a machine configured for receiving.
    #[must_use]
    pub fn new_receiver() -> Self {
        Self {
            direction: Direction::Receive,
            use_1k: false,
            send_state: SendState::WaitingForInit,
            recv_state: RecvState::WaitingForBlock,
            terminal: Terminal::None,
            mode: Mode::Crc,
            block_num: 1,
            retry_count: 0,
            error_count: 0,
            data: Vec::new(),
            send_offset: 0,
            accumulator: Vec::new(),
            block_buf: Vec::new(),
            expected_block_size: SOH_PAYLOAD,
        }
    }

    /// Begin a send, emitting `started` and the first block once negotiated.
    pub fn start_send(&mut self, sink: &mut dyn EventSink, data: &[u8]) {
        self.data = data.to_vec();
        sink.on_event(Event::Started {
            file_name: None,
            file_size: self.data.len() as u64,
        });
    }

    /// Begin a receive: request CRC-16 mode.
    pub fn start_receive(&mut self, sink: &mut dyn EventSink) {
        sink.on_event(Event::Started {
            file_name: None,
            file_size: 0,
        });
        emit_bytes(sink, &[C]);
    }

    /// Returns true while neither idle (not yet started) nor terminal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.terminal == Terminal::None
    }

    #[must_use]
    pub fn received_data(&self) -> &[u8] {
        &self.accumulator
    }

    /// Feed inbound bytes to the machine.
    pub fn process_data(&mut self, sink: &mut dyn EventSink, bytes: &[u8]) {
        if self.terminal != Terminal::None {
            return;
        }
        match self.direction {
            Direction::Send => {
                for &b in bytes {
                    self.process_send_byte(sink, b);
                    if self.terminal != Terminal::None {
                        break;
                    }
                }
            },
            Direction::Receive => {
                for &b in bytes {
                    self.process_recv_byte(sink, b);
                    if self.terminal != Terminal::None {
                        break;
                    }
                }
            },
        }
    }

    /// Cancel the transfer: idempotent, emits a CAN*3 sequence then `cancelled`.
    pub fn cancel(&mut self, sink: &mut dyn EventSink) {
        if self.terminal != Terminal::None {
            return;
        }
        debug!("xmodem: cancelled by host");
        self.terminal = Terminal::Cancelled;
        emit_bytes(sink, &[CAN, CAN, CAN]);
        sink.on_event(Event::Cancelled);
    }

    fn fail(&mut self, sink: &mut dyn EventSink, message: &str) {
        debug!("xmodem: failing: {message}");
        self.terminal = Terminal::Failed;
        emit_bytes(sink, &[CAN, CAN, CAN]);
        sink.on_event(Event::Failed { message });
    }

    fn payload_size(&self) -> usize {
        if self.use_1k && self.mode == Mode::Crc {
            STX_PAYLOAD
        } else {
            SOH_PAYLOAD
        }
    }

    fn build_block(&self, block_num: u8, offset: usize) -> Vec<u8> {
        let payload_size = self.payload_size();
        let header = if payload_size == STX_PAYLOAD { STX } else { SOH };

        let mut block = Vec::with_capacity(3 + payload_size + 2);
        block.push(header);
        block.push(block_num);
        block.push(!block_num);

        let end = (offset + payload_size).min(self.data.len());
        block.extend_from_slice(&self.data[offset..end]);
        block.resize(3 + payload_size, SUB);

        match self.mode {
            Mode::Checksum => {
                let cs = checksum(&block[3..3 + payload_size]);
                block.push(cs);
            },
            Mode::Crc => {
                let crc = crc16(&block[3..3 + payload_size]);
                block.push((crc >> 8) as u8);
                block.push((crc & 0xFF) as u8);
            },
        }
        block
    }

    fn send_current_block(&mut self, sink: &mut dyn EventSink) {
        let block = self.build_block(self.block_num, self.send_offset);
        emit_bytes(sink, &block);
        self.send_state = SendState::WaitingForAck;
    }

    fn process_send_byte(&mut self, sink: &mut dyn EventSink, b: u8) {
        match self.send_state {
            SendState::WaitingForInit => match b {
                NAK => {
                    debug!("xmodem: negotiated checksum mode");
                    self.mode = Mode::Checksum;
                    self.send_current_block(sink);
                },
                C => {
                    debug!("xmodem: negotiated CRC-16 mode (1k={})", self.use_1k);
                    self.mode = Mode::Crc;
                    self.send_current_block(sink);
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForAck => match b {
                ACK => {
                    self.retry_count = 0;
                    let payload_size = self.payload_size();
                    let next_offset = self.send_offset + payload_size;
                    if next_offset >= self.data.len() {
                        debug!("xmodem: all blocks acked, sending EOT");
                        emit_bytes(sink, &[EOT]);
                        self.send_state = SendState::WaitingForEotAck;
                    } else {
                        self.send_offset = next_offset;
                        self.block_num = self.block_num.wrapping_add(1);
                        self.emit_progress(sink);
                        self.send_current_block(sink);
                    }
                },
                NAK => {
                    self.retry_count += 1;
                    self.error_count += 1;
                    warn!("xmodem: NAK on block {}, retry {}", self.block_num, self.retry_count);
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        self.send_current_block(sink);
                    }
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForEotAck => match b {
                ACK => {
                    self.terminal = Terminal::Completed;
                    sink.on_event(Event::Completed);
                },
                NAK => {
                    self.retry_count += 1;
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        emit_bytes(sink, &[EOT]);
                    }
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::Terminal => {},
        }
    }

    fn emit_progress(&self, sink: &mut dyn EventSink) {
        sink.on_event(Event::Progress {
            state: TransferState::Transferring,
            bytes_transferred: self.send_offset.min(self.data.len()) as u64,
            total_bytes: self.data.len() as u64,
            current_block: u32::from(self.block_num),
            error_count: self.error_count,
            file_name: None,
        });
    }

    fn send_nak(&mut self, sink: &mut dyn EventSink) {
        self.retry_count += 1;
        self.error_count += 1;
        warn!("xmodem: sending NAK, retry {}", self.retry_count);
        if self.retry_count > MAX_RETRIES {
            self.fail(sink, "too many errors");
        } else {
            emit_bytes(sink, &[NAK]);
        }
        self.block_buf.clear();
    }

    fn process_recv_byte(&mut self, sink: &mut dyn EventSink, b: u8) {
        if self.recv_state == RecvState::Terminal {
            return;
        }

        if self.block_buf.is_empty() {
            match b {
                SOH => {
                    trace!("xmodem: SOH, expecting 128-byte block");
                    self.expected_block_size = SOH_PAYLOAD;
                    self.block_buf.push(b);
                },
                STX => {
                    trace!("xmodem: STX, expecting 1024-byte block");
                    self.expected_block_size = STX_PAYLOAD;
                    self.block_buf.push(b);
                },
                EOT => {
                    emit_bytes(sink, &[ACK]);
                    self.terminal = Terminal::Completed;
                    self.recv_state = RecvState::Terminal;
                    sink.on_event(Event::Completed);
                },
                CAN => self.cancel(sink),
                _ => {},
            }
            return;
        }

        self.block_buf.push(b);

        if self.block_buf.len() == 3 {
            if self.block_buf[1] != !self.block_buf[2] {
                self.send_nak(sink);
            }
            return;
        }

        let check_size = 2; // receiver always negotiates CRC-16
        let total_len = 3 + self.expected_block_size + check_size;
        if self.block_buf.len() < total_len {
            return;
        }

        let payload = &self.block_buf[3..3 + self.expected_block_size];
        let trailer = &self.block_buf[3 + self.expected_block_size..];
        let expected_crc = crc16(payload);
        let actual_crc = (u16::from(trailer[0]) << 8) | u16::from(trailer[1]);

        if actual_crc != expected_crc {
            warn!(
                "xmodem: CRC mismatch on block {}: expected {expected_crc:#06x}, got {actual_crc:#06x}",
                self.block_buf[1]
            );
            self.send_nak(sink);
            return;
        }

        let recv_block_num = self.block_buf[1];
        if recv_block_num == self.block_num {
            self.accumulator.extend_from_slice(payload);
            self.block_num = self.block_num.wrapping_add(1);
            self.retry_count = 0;
            emit_bytes(sink, &[ACK]);
            sink.on_event(Event::Progress {
                state: TransferState::Transferring,
                bytes_transferred: self.accumulator.len() as u64,
                total_bytes: 0,
                current_block: u32::from(recv_block_num),
                error_count: self.error_count,
                file_name: None,
            });
        } else if recv_block_num == self.block_num.wrapping_sub(1) {
            warn!("xmodem: duplicate block {recv_block_num}, not appending");
            emit_bytes(sink, &[ACK]);
        } else {
            self.send_nak(sink);
            return;
        }

        self.block_buf.clear();
    }
}

/// Emit a borrowed byte slice as a `SendData` event.
pub(crate) fn emit_bytes(sink: &mut dyn EventSink, bytes: &[u8]) {
    sink.on_event(Event::SendData { bytes });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        out: Vec<u8>,
        events: Vec<String>,
    }

    impl EventSink for Recorder {
        fn on_event(&mut self, event: Event<'_>) {
            match event {
                Event::SendData { bytes } => self.out.extend_from_slice(bytes),
                Event::Completed => self.events.push("completed".into()),
                Event::Failed { message } => self.events.push(format!("failed:{message}")),
                Event::Cancelled => self.events.push("cancelled".into()),
                Event::Started { .. } => self.events.push("started".into()),
                Event::Progress { .. } => self.events.push("progress".into()),
            }
        }
    }

    /// Drives a sender against a receiver in lockstep over an in-memory "pipe".
    fn run_transfer(data: &[u8], use_1k: bool) -> (Vec<u8>, Vec<String>) {
        let mut sender = XmodemMachine::new_sender(use_1k);
        let mut receiver = XmodemMachine::new_receiver();

        let sender_rec = RefCell::new(Recorder::default());
        let recv_rec = RefCell::new(Recorder::default());

        sender.start_send(&mut *sender_rec.borrow_mut(), data);
        receiver.start_receive(&mut *recv_rec.borrow_mut());

        // Feed receiver's outbound bytes (the initial 'C') to the sender, and
        // vice versa, until both reach a terminal state.
        let mut to_sender: Vec<u8> = std::mem::take(&mut recv_rec.borrow_mut().out);
        let mut to_receiver: Vec<u8> = Vec::new();

        for _ in 0..10_000 {
            if !sender.is_active() && !receiver.is_active() {
                break;
            }
            if !to_sender.is_empty() {
                let bytes = std::mem::take(&mut to_sender);
                sender.process_data(&mut *sender_rec.borrow_mut(), &bytes);
                to_receiver.extend(std::mem::take(&mut sender_rec.borrow_mut().out));
            }
            if !to_receiver.is_empty() {
                let bytes = std::mem::take(&mut to_receiver);
                receiver.process_data(&mut *recv_rec.borrow_mut(), &bytes);
                to_sender.extend(std::mem::take(&mut recv_rec.borrow_mut().out));
            }
            if to_sender.is_empty() && to_receiver.is_empty() {
                break;
            }
        }

        (
            receiver.received_data().to_vec(),
            recv_rec.borrow().events.clone(),
        )
    }

    #[test]
    fn single_block_round_trip() {
        let data: Vec<u8> = (0..100u8).collect();
        let (received, events) = run_transfer(&data, false);
        assert_eq!(received.len(), 128);
        assert_eq!(&received[..100], &data[..]);
        assert!(received[100..].iter().all(|&b| b == SUB));
        assert!(events.contains(&"completed".to_string()));
    }

    #[test]
    fn multi_block_1k_round_trip() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let (received, _events) = run_transfer(&data, true);
        assert_eq!(&received[..data.len()], &data[..]);
    }

    #[test]
    fn duplicate_block_does_not_grow_accumulator() {
        let mut receiver = XmodemMachine::new_receiver();
        let mut rec = Recorder::default();
        receiver.start_receive(&mut rec);

        let payload = vec![0xAAu8; SOH_PAYLOAD];
        let mut block = vec![SOH, 1, !1u8];
        block.extend_from_slice(&payload);
        let crc = crc16(&payload);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);

        receiver.process_data(&mut rec, &block);
        assert_eq!(receiver.received_data().len(), SOH_PAYLOAD);

        // Resend the same block (simulating a lost ACK): must not grow.
        receiver.process_data(&mut rec, &block);
        assert_eq!(receiver.received_data().len(), SOH_PAYLOAD);
    }

    #[test]
    fn bad_header_complement_triggers_nak() {
        let mut receiver = XmodemMachine::new_receiver();
        let mut rec = Recorder::default();
        receiver.start_receive(&mut rec);
        rec.out.clear();

        receiver.process_data(&mut rec, &[SOH, 1, 1]); // bad complement
        assert!(rec.out.contains(&NAK));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sender = XmodemMachine::new_sender(false);
        let mut rec = Recorder::default();
        sender.start_send(&mut rec, b"hi");
        sender.cancel(&mut rec);
        sender.cancel(&mut rec);
        let cancelled_count = rec.events.iter().filter(|e| *e == "cancelled").count();
        assert_eq!(cancelled_count, 1);
    }

    #[test]
    fn retries_exceeded_fails() {
        let mut sender = XmodemMachine::new_sender(false);
        let mut rec = Recorder::default();
        sender.start_send(&mut rec, b"hello world");
        sender.process_data(&mut rec, &[C]); // negotiate CRC, sends block 1
        for _ in 0..=MAX_RETRIES {
            sender.process_data(&mut rec, &[NAK]);
        }
        assert!(rec.events.iter().any(|e| e.starts_with("failed")));
    }
}
