//! ZMODEM frame decoding for one direction of the stream.
//!
//! The decoder only observes bytes; it never changes what is relayed. It
//! recognises hex, binary-16 and binary-32 headers, undoes ZDLE quoting,
//! verifies header checksums, and follows the sub-packets that trail `ZFILE`,
//! `ZDATA`, `ZSINIT` and `ZCOMMAND` headers so that payload bytes are never
//! mistaken for headers.

use log::trace;

use super::crc::{crc16_xmodem, crc32};

pub const ZPAD: u8 = b'*';
pub const ZDLE: u8 = 0x18;
pub const ZBIN: u8 = b'A';
pub const ZHEX: u8 = b'B';
pub const ZBIN32: u8 = b'C';

pub const ZCRCE: u8 = b'h';
pub const ZCRCG: u8 = b'i';
pub const ZCRCQ: u8 = b'j';
pub const ZCRCW: u8 = b'k';
pub const ZRUB0: u8 = b'l';
pub const ZRUB1: u8 = b'm';

/// Consecutive CAN bytes that abort a transfer.
pub const CANCEL_RUN: usize = 5;

const HEX_DIGITS: usize = 14;
const MAX_FILE_INFO: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    ZRqInit,
    ZRInit,
    ZSInit,
    ZAck,
    ZFile,
    ZSkip,
    ZNak,
    ZAbort,
    ZFin,
    ZRPos,
    ZData,
    ZEof,
    ZFErr,
    ZCrc,
    ZChallenge,
    ZCompl,
    ZCan,
    ZFreeCnt,
    ZCommand,
    ZStdErr,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        use FrameType::*;
        let t = match b {
            0 => ZRqInit,
            1 => ZRInit,
            2 => ZSInit,
            3 => ZAck,
            4 => ZFile,
            5 => ZSkip,
            6 => ZNak,
            7 => ZAbort,
            8 => ZFin,
            9 => ZRPos,
            10 => ZData,
            11 => ZEof,
            12 => ZFErr,
            13 => ZCrc,
            14 => ZChallenge,
            15 => ZCompl,
            16 => ZCan,
            17 => ZFreeCnt,
            18 => ZCommand,
            19 => ZStdErr,
            _ => return None,
        };
        Some(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    Hex,
    Bin16,
    Bin32,
}

impl HeaderEncoding {
    fn crc_len(self) -> usize {
        match self {
            HeaderEncoding::Bin32 => 4,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub frame_type: FrameType,
    pub data: [u8; 4],
    pub encoding: HeaderEncoding,
}

impl Header {
    /// File offset carried by position headers (`ZRPOS`, `ZDATA`, `ZEOF`).
    pub fn position(&self) -> u32 {
        u32::from_le_bytes(self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Header(Header),
    FileInfo { filename: String, size: u64 },
    Data(usize),
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    FileInfo,
    Data,
    Skip,
}

#[derive(Debug)]
enum State {
    Scan,
    Pad,
    PadZdle,
    Hex(Vec<u8>),
    Binary {
        encoding: HeaderEncoding,
        bytes: Vec<u8>,
        escaped: bool,
    },
    Subpacket {
        purpose: Purpose,
        crc_len: usize,
        body: Vec<u8>,
        count: usize,
        escaped: bool,
    },
    SubpacketCrc {
        purpose: Purpose,
        crc_len: usize,
        body: Vec<u8>,
        count: usize,
        end: u8,
        remaining: usize,
        escaped: bool,
    },
}

/// Result of undoing ZDLE quoting on the byte following a ZDLE.
enum Unescaped {
    Byte(u8),
    FrameEnd(u8),
    Invalid,
}

fn unescape(b: u8) -> Unescaped {
    match b {
        ZCRCE | ZCRCG | ZCRCQ | ZCRCW => Unescaped::FrameEnd(b),
        ZRUB0 => Unescaped::Byte(0x7f),
        ZRUB1 => Unescaped::Byte(0xff),
        _ if b & 0x60 == 0x40 => Unescaped::Byte(b ^ 0x40),
        _ => Unescaped::Invalid,
    }
}

fn is_flow_control(b: u8) -> bool {
    matches!(b, 0x11 | 0x13 | 0x91 | 0x93)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn parse_file_info(body: &[u8]) -> (String, u64) {
    let mut parts = body.splitn(2, |b| *b == 0);
    let name = String::from_utf8_lossy(parts.next().unwrap_or_default()).to_string();
    let size = parts
        .next()
        .map(|rest| rest.split(|b| *b == 0).next().unwrap_or_default())
        .map(|meta| String::from_utf8_lossy(meta).to_string())
        .and_then(|meta| meta.split_whitespace().next().map(str::to_string))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    (name, size)
}

/// Streaming decoder for the frames travelling in one direction.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    can_run: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Scan,
            can_run: 0,
        }
    }

    /// Feeds `data` and returns the frame-level events it completed.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        for &b in data {
            if b == ZDLE {
                self.can_run += 1;
                if self.can_run >= CANCEL_RUN {
                    self.can_run = 0;
                    self.state = State::Scan;
                    events.push(FrameEvent::Cancel);
                    continue;
                }
            } else {
                self.can_run = 0;
            }
            if let Some(ev) = self.step(b) {
                events.push(ev);
            }
        }
        events
    }

    /// True while the decoder sits inside a header or sub-packet.
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Scan)
    }

    fn step(&mut self, b: u8) -> Option<FrameEvent> {
        let state = std::mem::replace(&mut self.state, State::Scan);
        match state {
            State::Scan => {
                if b == ZPAD {
                    self.state = State::Pad;
                }
                None
            }
            State::Pad => {
                self.state = match b {
                    ZPAD => State::Pad,
                    ZDLE => State::PadZdle,
                    _ => State::Scan,
                };
                None
            }
            State::PadZdle => {
                self.state = match b {
                    ZHEX => State::Hex(Vec::with_capacity(HEX_DIGITS)),
                    ZBIN => State::Binary {
                        encoding: HeaderEncoding::Bin16,
                        bytes: Vec::with_capacity(7),
                        escaped: false,
                    },
                    ZBIN32 => State::Binary {
                        encoding: HeaderEncoding::Bin32,
                        bytes: Vec::with_capacity(9),
                        escaped: false,
                    },
                    ZPAD => State::Pad,
                    _ => State::Scan,
                };
                None
            }
            State::Hex(mut digits) => {
                match hex_value(b) {
                    Some(v) => digits.push(v),
                    None => {
                        trace!("zmodem: abandoned hex header after {} digit(s)", digits.len());
                        if b == ZPAD {
                            self.state = State::Pad;
                        }
                        return None;
                    }
                }
                if digits.len() < HEX_DIGITS {
                    self.state = State::Hex(digits);
                    return None;
                }
                let bytes: Vec<u8> = digits.chunks(2).map(|p| (p[0] << 4) | p[1]).collect();
                let crc = u16::from_be_bytes([bytes[5], bytes[6]]);
                if crc16_xmodem(&bytes[..5]) != crc {
                    trace!("zmodem: hex header checksum mismatch");
                    return None;
                }
                self.header(&bytes[..5], HeaderEncoding::Hex)
            }
            State::Binary {
                encoding,
                mut bytes,
                escaped,
            } => {
                let byte = if escaped {
                    match unescape(b) {
                        Unescaped::Byte(v) => v,
                        _ => return None,
                    }
                } else if b == ZDLE {
                    self.state = State::Binary {
                        encoding,
                        bytes,
                        escaped: true,
                    };
                    return None;
                } else {
                    b
                };
                bytes.push(byte);
                if bytes.len() < 5 + encoding.crc_len() {
                    self.state = State::Binary {
                        encoding,
                        bytes,
                        escaped: false,
                    };
                    return None;
                }
                let valid = match encoding {
                    HeaderEncoding::Bin32 => {
                        crc32(&bytes[..5]) == u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]])
                    }
                    _ => crc16_xmodem(&bytes[..5]) == u16::from_be_bytes([bytes[5], bytes[6]]),
                };
                if !valid {
                    trace!("zmodem: binary header checksum mismatch");
                    return None;
                }
                self.header(&bytes[..5], encoding)
            }
            State::Subpacket {
                purpose,
                crc_len,
                mut body,
                mut count,
                escaped,
            } => {
                if escaped {
                    match unescape(b) {
                        Unescaped::FrameEnd(end) => {
                            self.state = State::SubpacketCrc {
                                purpose,
                                crc_len,
                                body,
                                count,
                                end,
                                remaining: crc_len,
                                escaped: false,
                            };
                            return None;
                        }
                        Unescaped::Byte(v) => {
                            count += 1;
                            if purpose == Purpose::FileInfo {
                                body.push(v);
                            }
                        }
                        Unescaped::Invalid => {}
                    }
                } else if b == ZDLE {
                    self.state = State::Subpacket {
                        purpose,
                        crc_len,
                        body,
                        count,
                        escaped: true,
                    };
                    return None;
                } else if !is_flow_control(b) {
                    count += 1;
                    if purpose == Purpose::FileInfo {
                        body.push(b);
                    }
                }
                if purpose == Purpose::FileInfo && body.len() > MAX_FILE_INFO {
                    trace!("zmodem: oversized file header sub-packet dropped");
                    return None;
                }
                self.state = State::Subpacket {
                    purpose,
                    crc_len,
                    body,
                    count,
                    escaped: false,
                };
                None
            }
            State::SubpacketCrc {
                purpose,
                crc_len,
                body,
                count,
                end,
                remaining,
                escaped,
            } => {
                let remaining = if !escaped && b == ZDLE {
                    self.state = State::SubpacketCrc {
                        purpose,
                        crc_len,
                        body,
                        count,
                        end,
                        remaining,
                        escaped: true,
                    };
                    return None;
                } else {
                    remaining - 1
                };
                if remaining > 0 {
                    self.state = State::SubpacketCrc {
                        purpose,
                        crc_len,
                        body,
                        count,
                        end,
                        remaining,
                        escaped: false,
                    };
                    return None;
                }
                let event = match purpose {
                    Purpose::FileInfo => {
                        let (filename, size) = parse_file_info(&body);
                        Some(FrameEvent::FileInfo { filename, size })
                    }
                    Purpose::Data => Some(FrameEvent::Data(count)),
                    Purpose::Skip => None,
                };
                // ZCRCG/ZCRCQ keep the frame open, ZCRCE/ZCRCW close it
                if purpose == Purpose::Data && matches!(end, ZCRCG | ZCRCQ) {
                    self.state = State::Subpacket {
                        purpose,
                        crc_len,
                        body: Vec::new(),
                        count: 0,
                        escaped: false,
                    };
                }
                event
            }
        }
    }

    fn header(&mut self, bytes: &[u8], encoding: HeaderEncoding) -> Option<FrameEvent> {
        let frame_type = FrameType::from_byte(bytes[0])?;
        let header = Header {
            frame_type,
            data: [bytes[1], bytes[2], bytes[3], bytes[4]],
            encoding,
        };
        let purpose = match frame_type {
            FrameType::ZFile => Some(Purpose::FileInfo),
            FrameType::ZData => Some(Purpose::Data),
            FrameType::ZSInit | FrameType::ZCommand => Some(Purpose::Skip),
            _ => None,
        };
        if let Some(purpose) = purpose {
            self.state = State::Subpacket {
                purpose,
                crc_len: encoding.crc_len(),
                body: Vec::new(),
                count: 0,
                escaped: false,
            };
        }
        trace!("zmodem: header {:?} ({:?})", frame_type, encoding);
        Some(FrameEvent::Header(header))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoders used to build synthetic frames in tests.
#[cfg(test)]
pub(crate) mod encode {
    use super::*;

    pub fn escape(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &b in data {
            match b {
                ZDLE | 0x10 | 0x11 | 0x13 | 0x90 | 0x91 | 0x93 => {
                    out.push(ZDLE);
                    out.push(b ^ 0x40);
                }
                _ => out.push(b),
            }
        }
        out
    }

    pub fn hex_header(frame_type: u8, data: [u8; 4]) -> Vec<u8> {
        let mut raw = vec![frame_type];
        raw.extend_from_slice(&data);
        let crc = crc16_xmodem(&raw);
        raw.extend_from_slice(&crc.to_be_bytes());
        let mut out = vec![ZPAD, ZPAD, ZDLE, ZHEX];
        for b in raw {
            out.extend_from_slice(format!("{:02x}", b).as_bytes());
        }
        out.extend_from_slice(b"\r\n\x11");
        out
    }

    pub fn bin16_header(frame_type: u8, data: [u8; 4]) -> Vec<u8> {
        let mut raw = vec![frame_type];
        raw.extend_from_slice(&data);
        let crc = crc16_xmodem(&raw);
        raw.extend_from_slice(&crc.to_be_bytes());
        let mut out = vec![ZPAD, ZDLE, ZBIN];
        out.extend(escape(&raw));
        out
    }

    pub fn bin32_header(frame_type: u8, data: [u8; 4]) -> Vec<u8> {
        let mut raw = vec![frame_type];
        raw.extend_from_slice(&data);
        let crc = crc32(&raw);
        raw.extend_from_slice(&crc.to_le_bytes());
        let mut out = vec![ZPAD, ZDLE, ZBIN32];
        out.extend(escape(&raw));
        out
    }

    pub fn subpacket16(body: &[u8], end: u8) -> Vec<u8> {
        let mut crc_input = body.to_vec();
        crc_input.push(end);
        let crc = crc16_xmodem(&crc_input);
        let mut out = escape(body);
        out.push(ZDLE);
        out.push(end);
        out.extend(escape(&crc.to_be_bytes()));
        out
    }
}
