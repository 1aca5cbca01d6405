use std::fmt::Display;

use crate::{
    append_zdle_encoded,
    constants::{CR, LF, XON, ZBIN, ZBIN32, ZDLE, ZHEX, ZPAD},
    crc::{get_crc16, get_crc32},
    err::TransmissionError,
    get_hex, TransferResult,
};

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum HeaderType {
    Bin,
    Bin32,
    Hex,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ZFrameType {
    /// Request receive init (s->r)
    RQInit = 0,
    /// Receive init (r->s)
    RInit = 1,
    /// Send init sequence, optional (s->r)
    Sinit = 2,
    /// ACK to RQInit, RInit or Sinit (s<->r)
    Ack = 3,
    /// File name from sender (s->r)
    File = 4,
    /// To sender: skip this file (r->s)
    Skip = 5,
    /// Last packet was garbled (???)
    Nak = 6,
    /// Abort batch transfers (???)
    Abort = 7,
    /// Finish session (s<->r)
    Fin = 8,
    /// Resume data trans at this position (r->s)
    RPos = 9,
    /// Data packet(s) follow (s->r)
    Data = 10,
    /// End of file (s->r)
    Eof = 11,
    /// Fatal Read or Write error Detected (?)
    FErr = 12,
    /// Request for file CRC and response (?)
    Crc = 13,
    /// Receiver's Challenge (r->s)
    Challenge = 14,
    /// Request is complete (?)
    Compl = 15,
    /// Other end canned session with CAN*5 (?)
    Can = 16,
    /// Request for free bytes on filesystem (s->r)
    FreeCnt = 17,
    /// Command from sending program (s->r)
    Command = 18,
    /// Output to standard error, data follows (?)
    StdErr = 19,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Header {
    pub header_type: HeaderType,
    pub frame_type: ZFrameType,
    pub data: [u8; 4],
}

impl Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame_type {
            ZFrameType::RPos | ZFrameType::Eof | ZFrameType::FreeCnt | ZFrameType::Data | ZFrameType::Ack => {
                write!(f, "[{:?} header with {:?} number = {}]", self.header_type, self.frame_type, self.number())
            }
            ZFrameType::Crc | ZFrameType::Challenge => {
                write!(f, "[{:?} header with {:?} number = x{:08X}]", self.header_type, self.frame_type, self.number())
            }
            _ => write!(
                f,
                "[{:?} header with {:?} frame flags = x{:02X}, x{:02X}, x{:02X}, x{:02X}]",
                self.header_type,
                self.frame_type,
                self.f3(),
                self.f2(),
                self.f1(),
                self.f0()
            ),
        }
    }
}

impl Header {
    pub fn empty(header_type: HeaderType, frame_type: ZFrameType) -> Self {
        Self {
            header_type,
            frame_type,
            data: [0, 0, 0, 0],
        }
    }

    pub fn from_flags(header_type: HeaderType, frame_type: ZFrameType, f3: u8, f2: u8, f1: u8, f0: u8) -> Self {
        Self {
            header_type,
            frame_type,
            data: [f3, f2, f1, f0],
        }
    }

    pub fn from_number(header_type: HeaderType, frame_type: ZFrameType, number: u32) -> Self {
        Self {
            header_type,
            frame_type,
            data: u32::to_le_bytes(number),
        }
    }

    pub fn f0(&self) -> u8 {
        self.data[3]
    }
    pub fn p3(&self) -> u8 {
        self.data[3]
    }

    pub fn f1(&self) -> u8 {
        self.data[2]
    }
    pub fn p2(&self) -> u8 {
        self.data[2]
    }

    pub fn f2(&self) -> u8 {
        self.data[1]
    }
    pub fn p1(&self) -> u8 {
        self.data[1]
    }

    pub fn f3(&self) -> u8 {
        self.data[0]
    }
    pub fn p0(&self) -> u8 {
        self.data[0]
    }

    pub fn number(&self) -> u32 {
        u32::from_le_bytes(self.data)
    }

    /// The five raw header bytes the CRC trailer covers.
    fn raw_bytes(&self) -> [u8; 5] {
        [
            self.frame_type as u8,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]
    }

    pub fn build(&self) -> Vec<u8> {
        let mut res = Vec::new();
        let raw = self.raw_bytes();

        match self.header_type {
            HeaderType::Bin => {
                res.extend_from_slice(&[ZPAD, ZDLE, ZBIN]);
                append_zdle_encoded(&mut res, &raw);
                append_zdle_encoded(&mut res, &u16::to_be_bytes(get_crc16(&raw)));
            }

            HeaderType::Bin32 => {
                res.extend_from_slice(&[ZPAD, ZDLE, ZBIN32]);
                append_zdle_encoded(&mut res, &raw);
                append_zdle_encoded(&mut res, &u32::to_le_bytes(get_crc32(&raw)));
            }

            HeaderType::Hex => {
                res.extend_from_slice(&[ZPAD, ZPAD, ZDLE, ZHEX]);
                for b in raw {
                    res.push(get_hex((b >> 4) & 0xF));
                    res.push(get_hex(b & 0xF));
                }

                let crc16 = get_crc16(&raw);
                res.push(get_hex((crc16 >> 12) as u8 & 0xF));
                res.push(get_hex((crc16 >> 8) as u8 & 0xF));
                res.push(get_hex((crc16 >> 4) as u8 & 0xF));
                res.push(get_hex((crc16 & 0xF) as u8));
                res.extend_from_slice(&[CR, LF, XON]);
            }
        }
        res
    }

    pub fn get_frame_type(ftype: u8) -> TransferResult<ZFrameType> {
        match ftype {
            0 => Ok(ZFrameType::RQInit),
            1 => Ok(ZFrameType::RInit),
            2 => Ok(ZFrameType::Sinit),
            3 => Ok(ZFrameType::Ack),
            4 => Ok(ZFrameType::File),
            5 => Ok(ZFrameType::Skip),
            6 => Ok(ZFrameType::Nak),
            7 => Ok(ZFrameType::Abort),
            8 => Ok(ZFrameType::Fin),
            9 => Ok(ZFrameType::RPos),
            10 => Ok(ZFrameType::Data),
            11 => Ok(ZFrameType::Eof),
            12 => Ok(ZFrameType::FErr),
            13 => Ok(ZFrameType::Crc),
            14 => Ok(ZFrameType::Challenge),
            15 => Ok(ZFrameType::Compl),
            16 => Ok(ZFrameType::Can),
            17 => Ok(ZFrameType::FreeCnt),
            18 => Ok(ZFrameType::Command),
            19 => Ok(ZFrameType::StdErr),
            _ => Err(TransmissionError::InvalidFrameType(ftype).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Header, HeaderType, ZFrameType};
    use crate::constants::{XON, ZBIN, ZBIN32, ZDLE, ZHEX, ZPAD};

    #[test]
    fn test_bin_header_data() {
        assert_eq!(
            Header::empty(HeaderType::Bin, ZFrameType::RQInit).build(),
            vec![ZPAD, ZDLE, ZBIN, 0, 0, 0, 0, 0, 0, 0]
        );

        assert_eq!(
            Header::from_flags(HeaderType::Bin, ZFrameType::RQInit, 1, 1, 1, 1).build(),
            vec![ZPAD, ZDLE, ZBIN, 0, 1, 1, 1, 1, 0x62, 0x94]
        );
    }

    #[test]
    fn test_bin32_header_data() {
        assert_eq!(
            Header::empty(HeaderType::Bin32, ZFrameType::Data).build(),
            vec![ZPAD, ZDLE, ZBIN32, 0x0A, 0, 0, 0, 0, 0xBC, 0xEF, 0x92, 0x8C]
        );
    }

    #[test]
    fn test_hex_header_data() {
        assert_eq!(
            Header::empty(HeaderType::Hex, ZFrameType::RPos).build(),
            vec![
                ZPAD, ZPAD, ZDLE, ZHEX, b'0', b'9', b'0', b'0', b'0', b'0', b'0', b'0', b'0', b'0', b'a', b'8', b'7', b'c', b'\r', b'\n', XON
            ]
        );

        assert_eq!(
            "**\x18B0100000023be50\r\n\x11".as_bytes().to_vec(),
            Header::from_flags(HeaderType::Hex, ZFrameType::RInit, 0, 0, 0, 0x23).build()
        );
    }

    #[test]
    fn test_header_escaping() {
        // position 0x18 lands a ZDLE byte inside the binary header
        let built = Header::from_number(HeaderType::Bin, ZFrameType::RPos, 0x18).build();
        assert_eq!(&built[..3], &[ZPAD, ZDLE, ZBIN]);
        assert_eq!(&built[3..6], &[9, ZDLE, 0x18 ^ 0x40]);
    }

    #[test]
    fn test_position_accessors() {
        let header = Header::from_number(HeaderType::Bin, ZFrameType::RPos, 0x0102_0304);
        assert_eq!(0x0102_0304, header.number());
        assert_eq!(0x04, header.p0());
        assert_eq!(0x01, header.p3());
    }
}
