#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_lossless,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//
// ZModem protocol specification http://cristal.inria.fr/~doligez/zmodem/zmodem.txt
//
// Transport-agnostic engine: inbound bytes are pushed one at a time
// through `Zmodem::receive_byte`, outbound bytes leave through the
// `TransferEvents::on_data` sink. The embedder owns the transport, the
// timers and the UI.

pub mod constants;
pub use constants::*;

mod crc;
pub use crc::*;

mod err;
pub use err::*;

mod header;
pub use header::*;

mod decoder;
pub use decoder::*;

mod storage;
pub use storage::*;

mod engine;
pub use engine::*;


use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

pub type TransferResult<T> = anyhow::Result<T>;

/// A file in the send queue or offered by the sending peer. `date` is
/// the last write time in UTC seconds since the Unix epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path_name: String,
    pub file_name: String,
    pub size: u64,
    pub date: u64,
    path: PathBuf,
}

impl FileDescriptor {
    pub fn create(path: &Path) -> TransferResult<Self> {
        let metadata = fs::metadata(path)?;
        let date = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?
            .to_string_lossy()
            .to_string();

        Ok(Self {
            path_name: path.to_string_lossy().to_string(),
            file_name,
            size: metadata.len(),
            date,
            path: path.to_path_buf(),
        })
    }

    /// Descriptor for a file announced by the peer. There is no local
    /// path until the embedder accepts the offer.
    pub fn from_offer(file_name: String, size: u64, date: u64) -> Self {
        Self {
            path_name: String::new(),
            file_name,
            size,
            date,
            path: PathBuf::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Event surface between the engine and its embedder. Events fire
/// synchronously inside the engine call that triggered them; react to
/// offer/request events by calling back into the engine after that
/// call returns.
pub trait TransferEvents {
    /// A complete outbound fragment for the transport, in wire order.
    fn on_data(&mut self, data: &[u8]);
    fn on_progress(&mut self, _pos: u32) {}
    fn on_error(&mut self, _msg: &str) {}
    fn on_complete_file(&mut self) {}
    /// The peer asked us to start a receive session (ZRQINIT).
    fn on_receive_request(&mut self) {}
    /// The peer invited us to send (ZRINIT while idle).
    fn on_send_request(&mut self) {}
    /// The peer offered a file; answer with `accept_file_as` or `skip_file`.
    fn on_accept_file(&mut self, _offer: &FileDescriptor) {}
    fn on_finish(&mut self) {}
}

fn get_hex(n: u8) -> u8 {
    if n < 10 {
        b'0' + n
    } else {
        b'a' + (n - 10)
    }
}

fn from_hex(n: u8) -> TransferResult<u8> {
    match n {
        b'0'..=b'9' => Ok(n - b'0'),
        b'A'..=b'F' => Ok(10 + n - b'A'),
        b'a'..=b'f' => Ok(10 + n - b'a'),
        _ => Err(anyhow::anyhow!("hex number expected, got 0x{n:02X}")),
    }
}

pub fn append_zdle_encoded(v: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        match b {
            ZDLE | 0x10 | 0x11 | 0x13 | 0x90 | 0x91 | 0x93 => v.extend_from_slice(&[ZDLE, b ^ 0x40]),
            _ => v.push(b),
        }
    }
}

pub fn encode_subpacket_crc16(zcrc_byte: u8, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    let mut crc = get_crc16(data);
    crc = update_crc16(crc, zcrc_byte);
    append_zdle_encoded(&mut v, data);
    v.extend_from_slice(&[ZDLE, zcrc_byte]);
    append_zdle_encoded(&mut v, &u16::to_be_bytes(crc));
    v
}

pub fn encode_subpacket_crc32(zcrc_byte: u8, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    let mut crc = get_crc32(data);
    crc = !update_crc32(!crc, zcrc_byte);

    append_zdle_encoded(&mut v, data);
    v.extend_from_slice(&[ZDLE, zcrc_byte]);
    append_zdle_encoded(&mut v, &u32::to_le_bytes(crc));
    v
}

/// Reads the leading NUL-terminated field of a block as UTF-8, or the
/// whole block when no NUL is present.
pub fn str_from_null_terminated(s: &[u8]) -> &str {
    let end = s.iter().position(|&b| b == 0).unwrap_or(s.len());
    std::str::from_utf8(&s[..end]).unwrap_or_default()
}
