//! ZMODEM machine: framed hex/binary protocol with ZDLE byte-escaping,
//! streaming data subpackets, and offset-based resume.

use log::{debug, trace, warn};

use crate::event::{Event, EventSink, TransferState};
use crate::protocol::crc::{crc16, crc32};

const ZDLE: u8 = 0x18;
const ZDLEE: u8 = 0x58;
const ZPAD: u8 = b'*';
const XON: u8 = 0x11;
const CR: u8 = b'\r';
const LF: u8 = b'\n';

const ZCRCW: u8 = b'h';
const ZCRCE: u8 = b'i';
const ZCRCG: u8 = b'j';
const ZCRCQ: u8 = b'k';

const CANFDX: u8 = 0x01;
const CANOVIO: u8 = 0x02;
const CANFC32: u8 = 0x20;

const MAX_CHUNK: usize = 1024;
const MAX_RETRIES: u32 = 10;

/// Eighteen-byte ZMODEM cancel sequence: eight `ZDLE` bytes then ten `0x08`.
const CANCEL_SEQUENCE: [u8; 18] = [
    ZDLE, ZDLE, ZDLE, ZDLE, ZDLE, ZDLE, ZDLE, ZDLE, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08,
    0x08, 0x08,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    ZRqinit = 0,
    ZRinit = 1,
    ZSinit = 2,
    ZAck = 3,
    ZFile = 4,
    ZSkip = 5,
    ZNak = 6,
    ZAbort = 7,
    ZFin = 8,
    ZRpos = 9,
    ZData = 10,
    ZEof = 11,
    ZFerr = 12,
    ZCrc = 13,
    ZChallenge = 14,
    ZCompl = 15,
    ZCan = 16,
    ZFreecnt = 17,
    ZCommand = 18,
    ZStderr = 19,
}

impl FrameType {
    fn from_u8(v: u8) -> Option<Self> {
        use FrameType::{
            ZAbort, ZAck, ZCan, ZChallenge, ZCommand, ZCompl, ZCrc, ZData, ZEof, ZFerr, ZFile,
            ZFin, ZFreecnt, ZNak, ZRinit, ZRpos, ZRqinit, ZSinit, ZSkip, ZStderr,
        };
        Some(match v {
            0 => ZRqinit,
            1 => ZRinit,
            2 => ZSinit,
            3 => ZAck,
            4 => ZFile,
            5 => ZSkip,
            6 => ZNak,
            7 => ZAbort,
            8 => ZFin,
            9 => ZRpos,
            10 => ZData,
            11 => ZEof,
            12 => ZFerr,
            13 => ZCrc,
            14 => ZChallenge,
            15 => ZCompl,
            16 => ZCan,
            17 => ZFreecnt,
            18 => ZCommand,
            19 => ZStderr,
            _ => return None,
        })
    }
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    WaitingZrinit,
    WaitingZrpos,
    WaitingZack,
    WaitingZfin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    WaitingZfile,
    WaitingZdata,
    InData,
}

/// ZMODEM sender/receiver state machine.
pub struct ZmodemMachine {
    direction: Direction,
    terminal: Terminal,
    send_state: SendState,
    recv_state: RecvState,
    use_crc32: bool,
    retry_count: u32,
    error_count: u32,

    // Sender-only
    file_name: Option<String>,
    data: Vec<u8>,
    send_offset: usize,

    // Receiver-only
    accumulator: Vec<u8>,
    recv_file_name: Option<String>,
    bytes_remaining: u64,
    file_pos: u64,

    // Inbound wire parsing
    in_buf: Vec<u8>,
}

impl ZmodemMachine {
    /// Create a machine configured for sending a single file.
    #[must_use]
    pub fn new_sender() -> Self {
        Self {
            direction: Direction::Send,
            terminal: Terminal::None,
            send_state: SendState::WaitingZrinit,
            recv_state: RecvState::WaitingZfile,
            use_crc32: false,
            retry_count: 0,
            error_count: 0,
            file_name: None,
            data: Vec::new(),
            send_offset: 0,
            accumulator: Vec::new(),
            recv_file_name: None,
            bytes_remaining: 0,
            file_pos: 0,
            in_buf: Vec::new(),
        }
    }

    /// Create a machine configured for receiving.
    #[must_use]
    pub fn new_receiver() -> Self {
        Self {
            direction: Direction::Receive,
            terminal: Terminal::None,
            send_state: SendState::WaitingZrinit,
            recv_state: RecvState::WaitingZfile,
            use_crc32: false,
            retry_count: 0,
            error_count: 0,
            file_name: None,
            data: Vec::new(),
            send_offset: 0,
            accumulator: Vec::new(),
            recv_file_name: None,
            bytes_remaining: 0,
            file_pos: 0,
            in_buf: Vec::new(),
        }
    }

    pub fn start_send(&mut self, sink: &mut dyn EventSink, file_name: &str, data: &[u8]) {
        self.file_name = Some(file_name.to_string());
        self.data = data.to_vec();
        sink.on_event(Event::Started {
            file_name: Some(file_name.to_string()),
            file_size: self.data.len() as u64,
        });
        emit_hex_header(sink, FrameType::ZRqinit, &[0; 4]);
    }

    pub fn start_receive(&mut self, sink: &mut dyn EventSink) {
        let caps = CANFDX | CANOVIO | CANFC32;
        emit_hex_header(sink, FrameType::ZRinit, &[0, 0, 0, caps]);
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
        debug!("zmodem: cancelled by host");
        self.terminal = Terminal::Cancelled;
        sink.on_event(Event::SendData {
            bytes: &CANCEL_SEQUENCE,
        });
        sink.on_event(Event::Cancelled);
    }

    fn fail(&mut self, sink: &mut dyn EventSink, message: &str) {
        debug!("zmodem: failing: {message}");
        self.terminal = Terminal::Failed;
        sink.on_event(Event::SendData {
            bytes: &CANCEL_SEQUENCE,
        });
        sink.on_event(Event::Failed { message });
    }

    pub fn process_data(&mut self, sink: &mut dyn EventSink, bytes: &[u8]) {
        if self.terminal != Terminal::None {
            return;
        }
        self.in_buf.extend_from_slice(bytes);

        loop {
            if self.terminal != Terminal::None {
                break;
            }
            if self.in_buf.len() >= CANCEL_SEQUENCE.len()
                && self.in_buf[..CANCEL_SEQUENCE.len()] == CANCEL_SEQUENCE
            {
                self.in_buf.drain(..CANCEL_SEQUENCE.len());
                debug!("zmodem: peer cancel sequence received");
                self.cancel(sink);
                break;
            }

            let awaiting_subpacket =
                self.direction == Direction::Receive && self.recv_state == RecvState::InData;

            if awaiting_subpacket {
                match parse_subpacket(&self.in_buf, 0, self.crc_len()) {
                    Some((consumed, payload, terminator, crc_bytes)) => {
                        let mut crc_input = payload.clone();
                        crc_input.push(terminator);
                        if !verify_crc(&crc_input, &crc_bytes, self.use_crc32) {
                            warn!("zmodem: subpacket CRC mismatch, sending ZNAK");
                            self.in_buf.drain(..consumed);
                            self.send_nak(sink);
                            continue;
                        }
                        self.in_buf.drain(..consumed);
                        trace!("zmodem: subpacket ok, {} payload bytes, terminator {terminator:#04x}", payload.len());
                        self.handle_subpacket(sink, &payload, terminator);
                    },
                    None => break,
                }
            } else {
                match parse_header(&self.in_buf, 0) {
                    Some((consumed, frame_type, flags)) => {
                        self.in_buf.drain(..consumed);
                        trace!("zmodem: frame {frame_type:?} flags={flags:?}");
                        self.handle_frame(sink, frame_type, flags);
                    },
                    None => break,
                }
            }
        }
    }

    fn crc_len(&self) -> usize {
        if self.use_crc32 { 4 } else { 2 }
    }

    fn send_nak(&mut self, sink: &mut dyn EventSink) {
        self.error_count += 1;
        self.retry_count += 1;
        warn!("zmodem: sending ZNAK, retry {}", self.retry_count);
        if self.retry_count > MAX_RETRIES {
            self.fail(sink, "too many retries");
        } else {
            emit_hex_header(sink, FrameType::ZNak, &[0; 4]);
        }
    }

    // ---- frame dispatch ----

    fn handle_frame(&mut self, sink: &mut dyn EventSink, frame_type: FrameType, flags: [u8; 4]) {
        match self.direction {
            Direction::Send => self.handle_frame_send(sink, frame_type, flags),
            Direction::Receive => self.handle_frame_receive(sink, frame_type, flags),
        }
    }

    fn handle_frame_send(&mut self, sink: &mut dyn EventSink, frame_type: FrameType, flags: [u8; 4]) {
        match frame_type {
            FrameType::ZRinit => {
                self.use_crc32 = flags[3] & CANFC32 != 0;
                debug!("zmodem: peer ZRINIT, crc32={}", self.use_crc32);
                self.emit_zfile(sink);
                self.send_state = SendState::WaitingZrpos;
            },
            FrameType::ZRpos => {
                let offset = u32::from_le_bytes(flags) as usize;
                debug!("zmodem: ZRPOS requests resume from offset {offset}");
                self.send_offset = offset.min(self.data.len());
                self.emit_next_chunk(sink);
                self.send_state = SendState::WaitingZack;
            },
            FrameType::ZAck => {
                if self.send_state == SendState::WaitingZack {
                    self.retry_count = 0;
                    if self.send_offset >= self.data.len() {
                        debug!("zmodem: all data acked, sending ZEOF");
                        emit_hex_header(
                            sink,
                            FrameType::ZEof,
                            &(self.send_offset as u32).to_le_bytes(),
                        );
                        self.send_state = SendState::WaitingZfin;
                    } else {
                        self.emit_next_chunk(sink);
                    }
                }
            },
            FrameType::ZSkip => {
                debug!("zmodem: peer skipped file");
                self.terminal = Terminal::Completed;
                sink.on_event(Event::Completed);
            },
            FrameType::ZFin => {
                debug!("zmodem: peer ZFIN, session complete");
                emit_hex_header(sink, FrameType::ZFin, &[0; 4]);
                self.terminal = Terminal::Completed;
                sink.on_event(Event::Completed);
            },
            FrameType::ZCan => self.cancel(sink),
            _ => {},
        }
    }

    fn emit_zfile(&self, sink: &mut dyn EventSink) {
        emit_hex_header(sink, FrameType::ZFile, &[0; 4]);
        let name = self.file_name.as_deref().unwrap_or("");
        let mut payload = Vec::with_capacity(name.len() + 16);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.data.len().to_string().as_bytes());
        payload.push(0);
        emit_subpacket(sink, &payload, ZCRCW, self.use_crc32);
    }

    fn emit_next_chunk(&mut self, sink: &mut dyn EventSink) {
        let end = (self.send_offset + MAX_CHUNK).min(self.data.len());
        let chunk = self.data[self.send_offset..end].to_vec();
        let terminator = if end >= self.data.len() { ZCRCE } else { ZCRCG };
        emit_hex_header(
            sink,
            FrameType::ZData,
            &(self.send_offset as u32).to_le_bytes(),
        );
        self.send_offset = end;
        sink.on_event(Event::Progress {
            state: TransferState::Transferring,
            bytes_transferred: self.send_offset as u64,
            total_bytes: self.data.len() as u64,
            current_block: 0,
            error_count: self.error_count,
            file_name: self.file_name.clone(),
        });
        emit_subpacket(sink, &chunk, terminator, self.use_crc32);
    }

    fn handle_frame_receive(
        &mut self,
        sink: &mut dyn EventSink,
        frame_type: FrameType,
        flags: [u8; 4],
    ) {
        match frame_type {
            FrameType::ZRqinit => self.start_receive(sink),
            FrameType::ZFile => {
                if self.recv_state == RecvState::WaitingZfile {
                    self.recv_state = RecvState::InData;
                }
            },
            FrameType::ZData => {
                let offset = u32::from_le_bytes(flags) as u64;
                trace!("zmodem: ZDATA at offset {offset}");
                self.file_pos = offset;
                self.recv_state = RecvState::InData;
            },
            FrameType::ZEof => {
                if u32::from_le_bytes(flags) as u64 == self.file_pos {
                    debug!("zmodem: ZEOF matches received length, re-sending ZRINIT");
                    let caps = CANFDX | CANOVIO | CANFC32;
                    emit_hex_header(sink, FrameType::ZRinit, &[0, 0, 0, caps]);
                } else {
                    warn!("zmodem: ZEOF offset mismatch, awaiting retransmit");
                }
            },
            FrameType::ZFin => {
                debug!("zmodem: sending ZFIN, session complete");
                emit_hex_header(sink, FrameType::ZFin, &[0; 4]);
                self.terminal = Terminal::Completed;
                sink.on_event(Event::Completed);
            },
            FrameType::ZCan => self.cancel(sink),
            _ => {},
        }
    }

    fn handle_subpacket(&mut self, sink: &mut dyn EventSink, payload: &[u8], terminator: u8) {
        if self.recv_state != RecvState::InData {
            return;
        }

        // The block following ZFILE carries the name/size metadata instead of
        // file data; distinguish by whether a file name has been parsed yet.
        if self.recv_file_name.is_none() {
            let (name, size) = parse_zfile_payload(payload);
            debug!("zmodem: ZFILE metadata parsed: name={name:?} size={size}");
            self.recv_file_name = Some(name.clone());
            self.bytes_remaining = size;
            self.file_pos = 0;
            sink.on_event(Event::Started {
                file_name: Some(name),
                file_size: size,
            });
            emit_hex_header(sink, FrameType::ZRpos, &0u32.to_le_bytes());
            self.recv_state = RecvState::WaitingZdata;
            return;
        }

        let take = (payload.len() as u64).min(self.bytes_remaining) as usize;
        self.accumulator.extend_from_slice(&payload[..take]);
        self.bytes_remaining -= take as u64;
        self.file_pos += take as u64;
        sink.on_event(Event::Progress {
            state: TransferState::Transferring,
            bytes_transferred: self.accumulator.len() as u64,
            total_bytes: 0,
            current_block: 0,
            error_count: self.error_count,
            file_name: self.recv_file_name.clone(),
        });

        // Every subpacket here is a complete one-chunk-per-ZDATA burst (see
        // emit_next_chunk), so the sender always awaits a ZACK before the
        // next chunk regardless of which terminator labeled this one.
        match terminator {
            ZCRCQ => emit_hex_header(sink, FrameType::ZAck, &(self.file_pos as u32).to_le_bytes()),
            _ => {
                emit_hex_header(sink, FrameType::ZAck, &(self.file_pos as u32).to_le_bytes());
                self.recv_state = RecvState::WaitingZdata;
            },
        }
    }
}

/// Returns true iff `bytes` contains the ASCII trigraph `rz\r` or the byte
/// sequence `**` `ZDLE` `B`, either of which marks an inbound ZMODEM
/// auto-start request.
#[must_use]
pub fn detect_zmodem_autostart(bytes: &[u8]) -> bool {
    if bytes.windows(3).any(|w| w == b"rz\r") {
        return true;
    }
    bytes.windows(4).any(|w| w == [ZPAD, ZPAD, ZDLE, b'B'])
}

fn parse_zfile_payload(payload: &[u8]) -> (String, u64) {
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

fn unescape_pair(b2: u8) -> u8 {
    if b2 == ZDLEE { ZDLE } else { b2 ^ 0x40 }
}

fn needs_escape(b: u8) -> bool {
    b == ZDLE || b < 0x20 || b == 0x7F || b == 0xFF
}

fn write_byte_escaped(out: &mut Vec<u8>, b: u8) {
    if b == ZDLE {
        out.push(ZDLE);
        out.push(ZDLEE);
    } else if needs_escape(b) {
        out.push(ZDLE);
        out.push(b ^ 0x40);
    } else {
        out.push(b);
    }
}

fn write_slice_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        write_byte_escaped(out, b);
    }
}

/// Reads `count` logical (unescaped) bytes starting at `buf[start]`.
/// Returns `(wire_bytes_consumed, logical_bytes)`, or `None` if `buf` runs
/// out before `count` logical bytes have been collected.
fn read_escaped(buf: &[u8], start: usize, count: usize) -> Option<(usize, Vec<u8>)> {
    let mut i = start;
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        if i >= buf.len() {
            return None;
        }
        let b = buf[i];
        if b == ZDLE {
            if i + 1 >= buf.len() {
                return None;
            }
            out.push(unescape_pair(buf[i + 1]));
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Some((i - start, out))
}

fn is_subpacket_terminator(b: u8) -> bool {
    matches!(b, ZCRCE | ZCRCG | ZCRCQ | ZCRCW)
}

/// Parses one frame header starting at `buf[start]`. Returns
/// `(wire_bytes_consumed, frame_type, flags)` or `None` if more bytes are
/// needed.
fn parse_header(buf: &[u8], start: usize) -> Option<(usize, FrameType, [u8; 4])> {
    let mut i = start;
    if i >= buf.len() || buf[i] != ZPAD {
        return None;
    }
    i += 1;
    if i < buf.len() && buf[i] == ZPAD {
        i += 1;
    }
    if i >= buf.len() {
        return None;
    }
    if buf[i] != ZDLE {
        return None;
    }
    i += 1;
    if i >= buf.len() {
        return None;
    }
    let encoding = buf[i];
    i += 1;

    match encoding {
        b'B' => parse_hex_header_body(buf, i).map(|(consumed, ft, flags)| (i + consumed - start, ft, flags)),
        b'A' => parse_bin_header_body(buf, i, 2).map(|(consumed, ft, flags)| (i + consumed - start, ft, flags)),
        b'C' => parse_bin_header_body(buf, i, 4).map(|(consumed, ft, flags)| (i + consumed - start, ft, flags)),
        _ => None,
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn parse_hex_header_body(buf: &[u8], start: usize) -> Option<(usize, FrameType, [u8; 4])> {
    // 10 hex chars (frame type + 4 flags) + 4 hex chars (CRC16) + CR LF [XON]
    let hex_len = 14;
    if buf.len() < start + hex_len {
        return None;
    }
    let mut raw = [0u8; 7];
    for idx in 0..7 {
        let hi = hex_val(buf[start + idx * 2])?;
        let lo = hex_val(buf[start + idx * 2 + 1])?;
        raw[idx] = (hi << 4) | lo;
    }
    let frame_type = FrameType::from_u8(raw[0])?;
    let mut flags = [0u8; 4];
    flags.copy_from_slice(&raw[1..5]);
    let crc_bytes = [raw[5], raw[6]];
    let mut crc_input = Vec::with_capacity(5);
    crc_input.push(raw[0]);
    crc_input.extend_from_slice(&flags);
    if !verify_crc(&crc_input, &crc_bytes, false) {
        return None;
    }

    let mut i = start + hex_len;
    if i + 1 >= buf.len() {
        return None;
    }
    if buf[i] != CR || buf[i + 1] != LF {
        return None;
    }
    i += 2;
    if i >= buf.len() {
        return None;
    }
    i += 1; // skip XON
    Some((i - start, frame_type, flags))
}

fn parse_bin_header_body(
    buf: &[u8],
    start: usize,
    crc_len: usize,
) -> Option<(usize, FrameType, [u8; 4])> {
    let (consumed, logical) = read_escaped(buf, start, 5 + crc_len)?;
    let frame_type = FrameType::from_u8(logical[0])?;
    let mut flags = [0u8; 4];
    flags.copy_from_slice(&logical[1..5]);
    if !verify_crc(&logical[..5], &logical[5..5 + crc_len], crc_len == 4) {
        return None;
    }
    Some((consumed, frame_type, flags))
}

/// Parses a data subpacket starting at `buf[start]`: escaped payload bytes,
/// then `ZDLE` + terminator + CRC trailer. Returns
/// `(wire_bytes_consumed, payload, terminator, crc_bytes)`.
fn parse_subpacket(
    buf: &[u8],
    start: usize,
    crc_len: usize,
) -> Option<(usize, Vec<u8>, u8, Vec<u8>)> {
    let mut i = start;
    let mut payload = Vec::new();
    loop {
        if i >= buf.len() {
            return None;
        }
        let b = buf[i];
        if b == ZDLE {
            if i + 1 >= buf.len() {
                return None;
            }
            let b2 = buf[i + 1];
            if is_subpacket_terminator(b2) {
                let terminator = b2;
                i += 2;
                let (consumed, crc_bytes) = read_escaped(buf, i, crc_len)?;
                i += consumed;
                return Some((i - start, payload, terminator, crc_bytes));
            }
            payload.push(unescape_pair(b2));
            i += 2;
        } else {
            payload.push(b);
            i += 1;
        }
    }
}

fn verify_crc(data: &[u8], crc_bytes: &[u8], use_crc32: bool) -> bool {
    if use_crc32 {
        if crc_bytes.len() != 4 {
            return false;
        }
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        crc32(data) == expected
    } else {
        if crc_bytes.len() != 2 {
            return false;
        }
        let expected = (u16::from(crc_bytes[0]) << 8) | u16::from(crc_bytes[1]);
        crc16(data) == expected
    }
}

fn emit_hex_header(sink: &mut dyn EventSink, frame_type: FrameType, flags: &[u8; 4]) {
    let mut out = vec![ZPAD, ZPAD, ZDLE, b'B'];
    let mut body = Vec::with_capacity(5);
    body.push(frame_type as u8);
    body.extend_from_slice(flags);
    let crc = crc16(&body);
    for &b in &body {
        out.push(hex_digit(b >> 4));
        out.push(hex_digit(b & 0xF));
    }
    out.push(hex_digit((crc >> 12) as u8 & 0xF));
    out.push(hex_digit((crc >> 8) as u8 & 0xF));
    out.push(hex_digit((crc >> 4) as u8 & 0xF));
    out.push(hex_digit(crc as u8 & 0xF));
    out.push(CR);
    out.push(LF);
    out.push(XON);
    sink.on_event(Event::SendData { bytes: &out });
}

fn hex_digit(v: u8) -> u8 {
    if v < 10 { b'0' + v } else { b'a' + (v - 10) }
}

fn emit_subpacket(sink: &mut dyn EventSink, payload: &[u8], terminator: u8, use_crc32: bool) {
    let mut out = Vec::with_capacity(payload.len() + 8);
    write_slice_escaped(&mut out, payload);
    out.push(ZDLE);
    out.push(terminator);
    let mut crc_input = payload.to_vec();
    crc_input.push(terminator);
    if use_crc32 {
        let crc = crc32(&crc_input);
        write_slice_escaped(&mut out, &crc.to_le_bytes());
    } else {
        let crc = crc16(&crc_input);
        write_slice_escaped(&mut out, &[(crc >> 8) as u8, (crc & 0xFF) as u8]);
    }
    sink.on_event(Event::SendData { bytes: &out });
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
        let mut sender = ZmodemMachine::new_sender();
        let mut receiver = ZmodemMachine::new_receiver();
        let mut sender_rec = Recorder::default();
        let mut recv_rec = Recorder::default();

        sender.start_send(&mut sender_rec, filename, data);

        let mut to_receiver = std::mem::take(&mut sender_rec.out);
        let mut to_sender = Vec::new();

        for _ in 0..10_000 {
            if !sender.is_active() && !receiver.is_active() {
                break;
            }
            if !to_receiver.is_empty() {
                let bytes = std::mem::take(&mut to_receiver);
                receiver.process_data(&mut recv_rec, &bytes);
                to_sender.extend(std::mem::take(&mut recv_rec.out));
            }
            if !to_sender.is_empty() {
                let bytes = std::mem::take(&mut to_sender);
                sender.process_data(&mut sender_rec, &bytes);
                to_receiver.extend(std::mem::take(&mut sender_rec.out));
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
    fn small_file_round_trip() {
        let data = b"hello zmodem".to_vec();
        let (received, name, events) = run_transfer("hello.txt", &data);
        assert_eq!(received, data);
        assert_eq!(name.as_deref(), Some("hello.txt"));
        assert!(events.contains(&"completed".to_string()));
    }

    #[test]
    fn multi_chunk_round_trip() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let (received, _, _) = run_transfer("big.bin", &data);
        assert_eq!(received, data);
    }

    #[test]
    fn escape_round_trip() {
        let data: Vec<u8> = vec![0x00, 0x18, 0x7F, 0xFF, 0x11, 0x13, b'A'];
        let mut escaped = Vec::new();
        write_slice_escaped(&mut escaped, &data);
        let (consumed, logical) = read_escaped(&escaped, 0, data.len()).unwrap();
        assert_eq!(consumed, escaped.len());
        assert_eq!(logical, data);
    }

    #[test]
    fn autostart_detects_rz_trigraph() {
        assert!(detect_zmodem_autostart(b"garbage rz\r more"));
        assert!(!detect_zmodem_autostart(b"no trigger here"));
    }

    #[test]
    fn autostart_detects_star_star_zdle_b() {
        let bytes = [b'*', b'*', ZDLE, b'B'];
        assert!(detect_zmodem_autostart(&bytes));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut machine = ZmodemMachine::new_sender();
        let mut rec = Recorder::default();
        machine.cancel(&mut rec);
        machine.cancel(&mut rec);
        assert_eq!(
            rec.events.iter().filter(|e| *e == "cancelled").count(),
            1
        );
    }

    #[test]
    fn hex_header_round_trip() {
        let mut rec = Recorder::default();
        emit_hex_header(&mut rec, FrameType::ZRinit, &[0, 0, 0, CANFDX]);
        let (consumed, frame_type, flags) = parse_header(&rec.out, 0).unwrap();
        assert_eq!(consumed, rec.out.len());
        assert_eq!(frame_type, FrameType::ZRinit);
        assert_eq!(flags, [0, 0, 0, CANFDX]);
    }
}
