use crate::{
    constants::{CR, LF, XOFF, XOFF_0X80, XON, XON_0X80, ZBIN, ZBIN32, ZDLE, ZHEX, ZPAD},
    crc::{check_crc16, check_crc32},
    from_hex,
    header::{Header, HeaderType},
};

/// Where the byte-at-a-time scanner currently is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Waiting for the first ZPAD of a frame prefix.
    Hunt,
    /// Saw `*`.
    Pad,
    /// Saw `**`.
    PadPad,
    /// Saw `*` ZDLE, the next byte picks ZBIN or ZBIN32.
    BinMark,
    /// Saw `**` ZDLE, the next byte must be ZHEX.
    HexMark,
    /// Collecting the high nibble of a hex header byte.
    HexHigh,
    /// Collecting the low nibble of a hex header byte.
    HexLow,
    /// Collecting binary header bytes.
    BinHeader,
    /// Collecting data subpacket bytes.
    Packet,
    /// Collecting the CRC trailer of a data subpacket.
    PacketCrc,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Header(Header),
    Packet { data: Vec<u8>, terminator: u8 },
    PacketCrcError,
}

/// Byte-driven frame decoder. Headers arrive unsolicited; data
/// subpackets are only collected after [`Decoder::expect_packet`] arms
/// the machine, since only the transfer controller knows whether the
/// preceding header announces one.
pub struct Decoder {
    state: ScanState,
    hdr: Vec<u8>,
    pck: Vec<u8>,
    nibble: u8,
    wide: bool,
    escaped: bool,
    body_len: usize,
    crc_need: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: ScanState::Hunt,
            hdr: Vec::with_capacity(9),
            pck: Vec::new(),
            nibble: 0,
            wide: false,
            escaped: false,
            body_len: 0,
            crc_need: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = ScanState::Hunt;
        self.hdr.clear();
        self.pck.clear();
        self.escaped = false;
    }

    /// Arm data subpacket collection. `wide` selects the CRC-32 trailer,
    /// matching the encoding of the header that announced the packet.
    pub fn expect_packet(&mut self, wide: bool) {
        self.state = ScanState::Packet;
        self.pck.clear();
        self.wide = wide;
        self.escaped = false;
        self.body_len = 0;
    }

    pub fn push(&mut self, byte: u8) -> Option<Decoded> {
        match self.state {
            ScanState::Hunt => {
                if byte == ZPAD {
                    self.state = ScanState::Pad;
                }
                None
            }
            ScanState::Pad => {
                self.state = match byte {
                    ZPAD => ScanState::PadPad,
                    ZDLE => ScanState::BinMark,
                    _ => ScanState::Hunt,
                };
                None
            }
            ScanState::PadPad => {
                self.state = if byte == ZDLE { ScanState::HexMark } else { ScanState::Hunt };
                None
            }
            ScanState::BinMark => {
                match byte {
                    ZBIN => {
                        self.wide = false;
                        self.begin_bin_header();
                    }
                    ZBIN32 => {
                        self.wide = true;
                        self.begin_bin_header();
                    }
                    _ => self.state = ScanState::Hunt,
                }
                None
            }
            ScanState::HexMark => {
                if byte == ZHEX {
                    self.hdr.clear();
                    self.state = ScanState::HexHigh;
                } else {
                    self.state = ScanState::Hunt;
                }
                None
            }
            ScanState::HexHigh => {
                if byte == CR || byte == LF {
                    return self.finish_hex_header();
                }
                match from_hex(byte) {
                    Ok(n) => {
                        self.nibble = n << 4;
                        self.state = ScanState::HexLow;
                    }
                    Err(_) => self.state = ScanState::Hunt,
                }
                None
            }
            ScanState::HexLow => {
                match from_hex(byte) {
                    Ok(n) => {
                        self.hdr.push(self.nibble | n);
                        self.state = ScanState::HexHigh;
                    }
                    Err(_) => self.state = ScanState::Hunt,
                }
                None
            }
            ScanState::BinHeader => {
                let Some(b) = self.unescape(byte) else { return None };
                self.hdr.push(b);
                let need = if self.wide { 9 } else { 7 };
                if self.hdr.len() == need {
                    return self.finish_bin_header();
                }
                None
            }
            ScanState::Packet => {
                if self.escaped {
                    self.escaped = false;
                    if (0x68..=0x6F).contains(&byte) {
                        // in-band frame terminator, CRC trailer follows
                        self.pck.push(byte);
                        self.body_len = self.pck.len();
                        self.crc_need = if self.wide { 4 } else { 2 };
                        self.state = ScanState::PacketCrc;
                    } else {
                        self.pck.push(byte ^ 0x40);
                    }
                } else if byte == ZDLE {
                    self.escaped = true;
                } else if !is_flow_control(byte) {
                    self.pck.push(byte);
                }
                None
            }
            ScanState::PacketCrc => {
                let Some(b) = self.unescape(byte) else { return None };
                self.pck.push(b);
                if self.pck.len() == self.body_len + self.crc_need {
                    return Some(self.finish_packet());
                }
                None
            }
        }
    }

    fn begin_bin_header(&mut self) {
        self.hdr.clear();
        self.escaped = false;
        self.state = ScanState::BinHeader;
    }

    fn unescape(&mut self, byte: u8) -> Option<u8> {
        if self.escaped {
            self.escaped = false;
            Some(byte ^ 0x40)
        } else if byte == ZDLE {
            self.escaped = true;
            None
        } else if is_flow_control(byte) {
            None
        } else {
            Some(byte)
        }
    }

    fn finish_hex_header(&mut self) -> Option<Decoded> {
        self.state = ScanState::Hunt;
        if self.hdr.len() != 7 {
            log::debug!("hex header with {} bytes dropped", self.hdr.len());
            return None;
        }
        if !check_crc16(&self.hdr[..5], &self.hdr[5..7]) {
            log::debug!("hex header crc mismatch, dropped");
            return None;
        }
        self.take_header(HeaderType::Hex)
    }

    fn finish_bin_header(&mut self) -> Option<Decoded> {
        self.state = ScanState::Hunt;
        let ok = if self.wide {
            check_crc32(&self.hdr[..5], &self.hdr[5..9])
        } else {
            check_crc16(&self.hdr[..5], &self.hdr[5..7])
        };
        if !ok {
            log::debug!("binary header crc mismatch, dropped");
            return None;
        }
        self.take_header(if self.wide { HeaderType::Bin32 } else { HeaderType::Bin })
    }

    fn take_header(&mut self, header_type: HeaderType) -> Option<Decoded> {
        let frame_type = match Header::get_frame_type(self.hdr[0]) {
            Ok(ft) => ft,
            Err(err) => {
                log::debug!("{err}, header dropped");
                return None;
            }
        };
        let data = self.hdr[1..5].try_into().unwrap_or_default();
        Some(Decoded::Header(Header {
            header_type,
            frame_type,
            data,
        }))
    }

    fn finish_packet(&mut self) -> Decoded {
        self.state = ScanState::Hunt;
        let body = &self.pck[..self.body_len];
        let trailer = &self.pck[self.body_len..];
        let ok = if self.wide {
            check_crc32(body, trailer)
        } else {
            check_crc16(body, trailer)
        };
        if ok {
            let terminator = body[body.len() - 1];
            Decoded::Packet {
                data: self.pck[..self.body_len - 1].to_vec(),
                terminator,
            }
        } else {
            Decoded::PacketCrcError
        }
    }
}

/// Raw (unescaped) software flow control bytes are dropped inside
/// binary collection states.
fn is_flow_control(byte: u8) -> bool {
    matches!(byte, XON | XOFF | XON_0X80 | XOFF_0X80)
}
