//
// Constants taken from:
//
//   Z M O D E M . H     Manifest constants for ZMODEM
//    application to application file transfer protocol
//    Copyright 1991 Omen Technology Inc All Rights Reserved
//    04-17-89  Chuck Forsberg Omen Technology Inc
//
// See https://www.rpi.edu/dept/acm/packages/zmodem/3.17/sun4c_41/src/

pub const ZPAD: u8 = b'*'; // 052 Padding character begins frames
pub const ZDLE: u8 = 0x18; // Ctrl-X Zmodem escape - `ala BISYNC DLE
pub const ZDLEE: u8 = 0x58; // Escaped ZDLE as transmitted
pub const ZBIN: u8 = b'A'; // Binary frame indicator (CRC-16)
pub const ZHEX: u8 = b'B'; // HEX frame indicator
pub const ZBIN32: u8 = b'C'; // Binary frame with 32 bit FCS

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
pub const XON_0X80: u8 = XON | 0x80;
pub const XOFF_0X80: u8 = XOFF | 0x80;

/* ZDLE sequences */
/// CRC next, frame ends, header packet follows
pub const ZCRCE: u8 = b'h';
/// CRC next, frame continues nonstop
pub const ZCRCG: u8 = b'i';
/// CRC next, frame continues, ZACK expected
pub const ZCRCQ: u8 = b'j';
/// CRC next, ZACK expected, end of frame
pub const ZCRCW: u8 = b'k';
pub const ZRUB0: u8 = b'l'; /* Translate to rubout 0177 */
pub const ZRUB1: u8 = b'm'; /* Translate to rubout 0377 */

/// Largest data subpacket the sender emits.
pub const MAX_SUBPACKET_LEN: usize = 2048;

/// Consecutive data-level failures tolerated before the session aborts.
pub const MAX_FAIL_COUNT: u32 = 5;

pub const ABORT_SEQ: [u8; 18] = [
    0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, /* 8 CAN */
    0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, /* 10 BS */
];

pub mod zrinit_flag {
    // Bit Masks for ZRINIT flags byte ZF0
    pub const CANFDX: u8 = 0x01; // Rx can send and receive true full duplex
    pub const CANOVIO: u8 = 0x02; // Rx can receive data during disk I/O
    pub const CANBRK: u8 = 0x04; // Rx can send a break signal
    pub const CANCRY: u8 = 0x08; // Receiver can decode RLE
    pub const CANLZW: u8 = 0x10; // Receiver can uncompress
    pub const CANFC32: u8 = 0x20; // Receiver can use 32 bit Frame Check
    pub const ESCCTL: u8 = 0x40; // Receiver expects ctl chars to be escaped
    pub const ESC8: u8 = 0x80; // Receiver expects 8th bit to be escaped
}

pub mod zfile_flag {
    /* Conversion options, one of these in ZF0 */
    pub const ZCBIN: u8 = 1; /* Binary transfer - inhibit conversion */
    pub const ZCNL: u8 = 2; /* Convert NL to local end of line convention */
    pub const ZCRESUM: u8 = 3; /* Resume interrupted file transfer */

    /* Management options, one of these ored in ZF1 */
    pub const ZMNEWL: u8 = 1; /* Transfer if source newer or longer */
    pub const ZMCRC: u8 = 2; /* Transfer if different file CRC or length */
    pub const ZMAPND: u8 = 3; /* Append contents to existing file (if any) */
    pub const ZMCLOB: u8 = 4; /* Replace existing file */
    pub const ZMNEW: u8 = 5; /* Transfer if source newer */
}
