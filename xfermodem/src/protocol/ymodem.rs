//! YMODEM machine: XMODEM-1K-CRC extended with a block-0 metadata block and
//! a batch terminator.

use log::{debug, trace, warn};

use crate::event::{Event, EventSink, TransferState};
use crate::protocol::crc::crc16;
use crate::protocol::xmodem::{ACK, CAN, C, EOT, MAX_RETRIES, NAK, SOH, STX, SUB, emit_bytes};

const BLOCK0_SIZE: usize = 1024;
const DATA_BLOCK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    WaitingForInit,
    WaitingForBlock0Ack,
    WaitingForDataInit,
    WaitingForAck,
    WaitingForEotAck,
    WaitingForFinalAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    WaitingForBlock0,
    WaitingForDataBlock,
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

/// YMODEM batch sender/receiver state machine.
pub struct YmodemMachine {
    direction: Direction,
    send_state: SendState,
    recv_state: RecvState,
    terminal: Terminal,
    retry_count: u32,
    error_count: u32,

    // Sender-only
    file_name: Option<String>,
    data: Vec<u8>,
    send_offset: usize,
    block_num: u8,

    // Receiver-only
    accumulator: Vec<u8>,
    recv_file_name: Option<String>,
    bytes_remaining: u64,
    expected_block_num: u8,
    block_buf: Vec<u8>,
    expected_block_size: usize,
}

impl YmodemMachine {
    /// Create a machine configured for sending a single file.
    #[must_use]
    pub fn new_sender() -> Self {
        Self {
            direction: Direction::Send,
            send_state: SendState::WaitingForInit,
            recv_state: RecvState::WaitingForBlock0,
            terminal: Terminal::None,
            retry_count: 0,
            error_count: 0,
            file_name: None,
            data: Vec::new(),
            send_offset: 0,
            block_num: 1,
            accumulator: Vec::new(),
            recv_file_name: None,
            bytes_remaining: 0,
            expected_block_num: 1,
            block_buf: Vec::new(),
            expected_block_size: DATA_BLOCK_SIZE,
        }
    }

    /// Create a machine configured for receiving.
    #[must_use]
    pub fn new_receiver() -> Self {
        Self {
            direction: Direction::Receive,
            send_state: SendState::WaitingForInit,
            recv_state: RecvState::WaitingForBlock0,
            terminal: Terminal::None,
            retry_count: 0,
            error_count: 0,
            file_name: None,
            data: Vec::new(),
            send_offset: 0,
            block_num: 1,
            accumulator: Vec::new(),
            recv_file_name: None,
            bytes_remaining: 0,
            expected_block_num: 1,
            block_buf: Vec::new(),
            expected_block_size: DATA_BLOCK_SIZE,
        }
    }

    /// Begin sending `data` as a single-file batch named `file_name`.
    pub fn start_send(&mut self, sink: &mut dyn EventSink, file_name: &str, data: &[u8]) {
        if file_name.len() > 255 {
            self.fail(sink, "filename too long");
            return;
        }
        self.file_name = Some(file_name.to_string());
        self.data = data.to_vec();
        sink.on_event(Event::Started {
            file_name: Some(file_name.to_string()),
            file_size: self.data.len() as u64,
        });
    }

    /// Begin receiving: request CRC mode by emitting `C`.
    pub fn start_receive(&mut self, sink: &mut dyn EventSink) {
        emit_bytes(sink, &[C]);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.terminal == Terminal::None
    }

    #[must_use]
    pub fn received_data(&self) -> &[u8] {
        &self.accumulator
    }

    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.recv_file_name.as_deref()
    }

    pub fn cancel(&mut self, sink: &mut dyn EventSink) {
        if self.terminal != Terminal::None {
            return;
        }
        debug!("ymodem: cancelled by host");
        self.terminal = Terminal::Cancelled;
        emit_bytes(sink, &[CAN, CAN, CAN]);
        sink.on_event(Event::Cancelled);
    }

    fn fail(&mut self, sink: &mut dyn EventSink, message: &str) {
        debug!("ymodem: failing: {message}");
        self.terminal = Terminal::Failed;
        emit_bytes(sink, &[CAN, CAN, CAN]);
        sink.on_event(Event::Failed { message });
    }

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

    // ---- sender ----

    fn build_block0(&self) -> Vec<u8> {
        let name = self.file_name.as_deref().unwrap_or("");
        let mut payload = vec![0u8; BLOCK0_SIZE];
        let mut pos = 0;
        payload[pos..pos + name.len()].copy_from_slice(name.as_bytes());
        pos += name.len() + 1; // skip the NUL terminator
        let size_str = self.data.len().to_string();
        payload[pos..pos + size_str.len()].copy_from_slice(size_str.as_bytes());
        // remainder stays zero-padded

        let mut block = vec![STX, 0, !0u8];
        block.extend_from_slice(&payload);
        let crc = crc16(&payload);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);
        block
    }

    fn build_final_block0(&self) -> Vec<u8> {
        let payload = vec![0u8; 128];
        let mut block = vec![SOH, 0, !0u8];
        block.extend_from_slice(&payload);
        let crc = crc16(&payload);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);
        block
    }

    fn build_data_block(&self, block_num: u8, offset: usize) -> Vec<u8> {
        let mut block = vec![STX, block_num, !block_num];
        let end = (offset + DATA_BLOCK_SIZE).min(self.data.len());
        block.extend_from_slice(&self.data[offset..end]);
        block.resize(3 + DATA_BLOCK_SIZE, SUB);
        let crc = crc16(&block[3..3 + DATA_BLOCK_SIZE]);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);
        block
    }

    fn emit_progress(&self, sink: &mut dyn EventSink) {
        sink.on_event(Event::Progress {
            state: TransferState::Transferring,
            bytes_transferred: self.send_offset.min(self.data.len()) as u64,
            total_bytes: self.data.len() as u64,
            current_block: u32::from(self.block_num),
            error_count: self.error_count,
            file_name: self.file_name.clone(),
        });
    }

    fn process_send_byte(&mut self, sink: &mut dyn EventSink, b: u8) {
        match self.send_state {
            SendState::WaitingForInit => match b {
                C => {
                    debug!("ymodem: negotiated CRC mode, sending block 0 ({:?})", self.file_name);
                    let block = self.build_block0();
                    emit_bytes(sink, &block);
                    self.send_state = SendState::WaitingForBlock0Ack;
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForBlock0Ack => match b {
                ACK => self.send_state = SendState::WaitingForDataInit,
                NAK => {
                    self.retry_count += 1;
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        let block = self.build_block0();
                        emit_bytes(sink, &block);
                    }
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForDataInit => match b {
                C => {
                    self.block_num = 1;
                    self.send_offset = 0;
                    let block = self.build_data_block(self.block_num, self.send_offset);
                    emit_bytes(sink, &block);
                    self.send_state = SendState::WaitingForAck;
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForAck => match b {
                ACK => {
                    self.retry_count = 0;
                    let next_offset = self.send_offset + DATA_BLOCK_SIZE;
                    if next_offset >= self.data.len() {
                        self.send_offset = self.data.len();
                        debug!("ymodem: all data blocks acked, sending EOT");
                        emit_bytes(sink, &[EOT]);
                        self.send_state = SendState::WaitingForEotAck;
                    } else {
                        self.send_offset = next_offset;
                        self.block_num = self.block_num.wrapping_add(1);
                        self.emit_progress(sink);
                        let block = self.build_data_block(self.block_num, self.send_offset);
                        emit_bytes(sink, &block);
                    }
                },
                NAK => {
                    self.retry_count += 1;
                    self.error_count += 1;
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        let block = self.build_data_block(self.block_num, self.send_offset);
                        emit_bytes(sink, &block);
                    }
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForEotAck => match b {
                NAK => {
                    self.retry_count += 1;
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        emit_bytes(sink, &[EOT]);
                    }
                },
                ACK => {
                    let block = self.build_final_block0();
                    emit_bytes(sink, &block);
                    self.send_state = SendState::WaitingForFinalAck;
                },
                CAN => self.cancel(sink),
                _ => {},
            },
            SendState::WaitingForFinalAck => match b {
                ACK => {
                    self.terminal = Terminal::Completed;
                    sink.on_event(Event::Completed);
                },
                NAK => {
                    self.retry_count += 1;
                    if self.retry_count > MAX_RETRIES {
                        self.fail(sink, "too many retries");
                    } else {
                        let block = self.build_final_block0();
                        emit_bytes(sink, &block);
                    }
                },
                CAN => self.cancel(sink),
                _ => {},
            },
        }
    }

    // ---- receiver ----

    fn send_nak(&mut self, sink: &mut dyn EventSink) {
        self.retry_count += 1;
        self.error_count += 1;
        warn!("ymodem: sending NAK, retry {}", self.retry_count);
        if self.retry_count > MAX_RETRIES {
            self.fail(sink, "too many errors");
        } else {
            emit_bytes(sink, &[NAK]);
        }
        self.block_buf.clear();
    }

    fn process_recv_byte(&mut self, sink: &mut dyn EventSink, b: u8) {
        if self.block_buf.is_empty() {
            match b {
                SOH => {
                    self.expected_block_size = 128;
                    self.block_buf.push(b);
                },
                STX => {
                    self.expected_block_size = DATA_BLOCK_SIZE;
                    self.block_buf.push(b);
                },
                EOT if self.recv_state == RecvState::WaitingForDataBlock => {
                    debug!("ymodem: EOT received, requesting next batch entry");
                    emit_bytes(sink, &[NAK, ACK, C]);
                    self.recv_state = RecvState::WaitingForBlock0;
                    self.expected_block_num = 1;
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

        let total_len = 3 + self.expected_block_size + 2;
        if self.block_buf.len() < total_len {
            return;
        }

        let payload = self.block_buf[3..3 + self.expected_block_size].to_vec();
        let trailer = self.block_buf[3 + self.expected_block_size..].to_vec();
        let expected_crc = crc16(&payload);
        let actual_crc = (u16::from(trailer[0]) << 8) | u16::from(trailer[1]);
        if actual_crc != expected_crc {
            warn!("ymodem: CRC mismatch: expected {expected_crc:#06x}, got {actual_crc:#06x}");
            self.send_nak(sink);
            return;
        }

        let recv_block_num = self.block_buf[1];

        match self.recv_state {
            RecvState::WaitingForBlock0 => {
                if payload[0] == 0 {
                    debug!("ymodem: empty block 0, batch terminator");
                    emit_bytes(sink, &[ACK]);
                    self.terminal = Terminal::Completed;
                    sink.on_event(Event::Completed);
                } else {
                    let (name, size) = parse_block0(&payload);
                    trace!("ymodem: block 0 parsed: name={name:?} size={size}");
                    self.recv_file_name = Some(name.clone());
                    self.bytes_remaining = size;
                    emit_bytes(sink, &[ACK]);
                    sink.on_event(Event::Started {
                        file_name: Some(name),
                        file_size: size,
                    });
                    emit_bytes(sink, &[C]);
                    self.expected_block_num = 1;
                    self.recv_state = RecvState::WaitingForDataBlock;
                }
            },
            RecvState::WaitingForDataBlock => {
                if recv_block_num == self.expected_block_num {
                    let take = (payload.len() as u64).min(self.bytes_remaining) as usize;
                    self.accumulator.extend_from_slice(&payload[..take]);
                    self.bytes_remaining -= take as u64;
                    self.expected_block_num = self.expected_block_num.wrapping_add(1);
                    self.retry_count = 0;
                    emit_bytes(sink, &[ACK]);
                    sink.on_event(Event::Progress {
                        state: TransferState::Transferring,
                        bytes_transferred: self.accumulator.len() as u64,
                        total_bytes: 0,
                        current_block: u32::from(recv_block_num),
                        error_count: self.error_count,
                        file_name: self.recv_file_name.clone(),
                    });
                } else if recv_block_num == self.expected_block_num.wrapping_sub(1) {
                    warn!("ymodem: duplicate block {recv_block_num}, not appending");
                    emit_bytes(sink, &[ACK]);
                } else {
                    self.send_nak(sink);
                    return;
                }
            },
        }

        self.block_buf.clear();
    }
}

/// Parse a block-0 metadata payload: `filename NUL decimal_size [NUL|pad...]`.
fn parse_block0(payload: &[u8]) -> (String, u64) {
    let nul = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let name = String::from_utf8_lossy(&payload[..nul]).into_owned();

    let rest = &payload[(nul + 1).min(payload.len())..];
    let size_end = rest
        .iter()
        .position(|&b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    let size = std::str::from_utf8(&rest[..size_end])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    (name, size)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn run_transfer(filename: &str, data: &[u8]) -> (Vec<u8>, Option<String>, Vec<String>) {
        let mut sender = YmodemMachine::new_sender();
        let mut receiver = YmodemMachine::new_receiver();
        let mut sender_rec = Recorder::default();
        let mut recv_rec = Recorder::default();

        sender.start_send(&mut sender_rec, filename, data);
        receiver.start_receive(&mut recv_rec);

        let mut to_sender = std::mem::take(&mut recv_rec.out);
        let mut to_receiver = Vec::new();

        for _ in 0..10_000 {
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

        (
            receiver.received_data().to_vec(),
            receiver.file_name().map(str::to_string),
            recv_rec.events.clone(),
        )
    }

    #[test]
    fn batch_single_file_round_trip() {
        let data = b"ABC".to_vec();
        let (received, name, events) = run_transfer("a.bin", &data);
        assert_eq!(received, data);
        assert_eq!(name.as_deref(), Some("a.bin"));
        assert!(events.contains(&"completed".to_string()));
    }

    #[test]
    fn multi_block_file_round_trip() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let (received, _, _) = run_transfer("big.bin", &data);
        assert_eq!(received, data);
    }

    #[test]
    fn parse_block0_extracts_name_and_size() {
        let mut payload = vec![0u8; 1024];
        payload[..5].copy_from_slice(b"a.bin");
        payload[6..7].copy_from_slice(b"3");
        let (name, size) = parse_block0(&payload);
        assert_eq!(name, "a.bin");
        assert_eq!(size, 3);
    }

    #[test]
    fn empty_block0_is_batch_terminator() {
        let mut receiver = YmodemMachine::new_receiver();
        let mut rec = Recorder::default();
        receiver.start_receive(&mut rec);

        let payload = vec![0u8; 128];
        let mut block = vec![SOH, 0, !0u8];
        block.extend_from_slice(&payload);
        let crc = crc16(&payload);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);

        receiver.process_data(&mut rec, &block);
        assert!(rec.events.contains(&"completed".to_string()));
    }
}
