use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use crate::{
    constants::{zfile_flag, zrinit_flag, ABORT_SEQ, MAX_FAIL_COUNT, MAX_SUBPACKET_LEN, ZCRCE, ZCRCG, ZCRCQ, ZCRCW},
    decoder::{Decoded, Decoder},
    encode_subpacket_crc16, encode_subpacket_crc32,
    err::TransmissionError,
    header::{Header, HeaderType, ZFrameType},
    storage::{DiskStorageHandler, StorageHandler},
    str_from_null_terminated, FileDescriptor, TransferEvents, TransferResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Idle,
    Sending,
    /// ZEOF is on the wire, the next ZRINIT advances the queue.
    SendingFin,
    Receiving,
}

/// The transfer engine. Feed inbound transport bytes through
/// [`Zmodem::receive_byte`]; outbound bytes and user-visible events are
/// raised on the [`TransferEvents`] implementation passed into every
/// call.
pub struct Zmodem {
    mode: TransferMode,
    decoder: Decoder,
    storage: Box<dyn StorageHandler>,
    files: VecDeque<FileDescriptor>,
    offer: Option<FileDescriptor>,
    /// Frame type that armed the current data subpacket.
    subpacket_frame: Option<ZFrameType>,
    /// Current inbound binary frames carry CRC-32 trailers.
    recv_wide: bool,
    /// The peer advertised CANFC32, outbound frames may use CRC-32.
    allow_crc32: bool,
    send_pos: u32,
    recv_pos: u32,
    send_len: u32,
    fail_count: u32,
}

impl Default for Zmodem {
    fn default() -> Self {
        Self::new()
    }
}

impl Zmodem {
    pub fn new() -> Self {
        Self::with_storage(Box::new(DiskStorageHandler::new()))
    }

    pub fn with_storage(storage: Box<dyn StorageHandler>) -> Self {
        Self {
            mode: TransferMode::Idle,
            decoder: Decoder::new(),
            storage,
            files: VecDeque::new(),
            offer: None,
            subpacket_frame: None,
            recv_wide: false,
            allow_crc32: false,
            send_pos: 0,
            recv_pos: 0,
            send_len: 0,
            fail_count: 0,
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Populate the send queue. Every file is stat'ed now for size and
    /// last write time.
    pub fn set_files(&mut self, paths: &[PathBuf]) -> TransferResult<()> {
        self.files.clear();
        for path in paths {
            self.files.push_back(FileDescriptor::create(path)?);
        }
        Ok(())
    }

    pub fn start_receiving(&mut self, events: &mut dyn TransferEvents) -> TransferResult<()> {
        if self.mode != TransferMode::Idle {
            return Err(TransmissionError::TransferActive.into());
        }
        self.mode = TransferMode::Receiving;
        self.recv_pos = 0;
        self.fail_count = 0;
        self.send_zrinit(events);
        Ok(())
    }

    pub fn start_sending(&mut self, events: &mut dyn TransferEvents) -> TransferResult<()> {
        if self.mode != TransferMode::Idle {
            return Err(TransmissionError::TransferActive.into());
        }
        if self.files.is_empty() {
            return Err(TransmissionError::NoFilesToSend.into());
        }
        self.mode = TransferMode::Sending;
        self.next_send(events);
        Ok(())
    }

    /// Accept the pending file offer, writing the payload to `path`.
    pub fn accept_file_as(&mut self, events: &mut dyn TransferEvents, path: &Path) -> TransferResult<()> {
        if self.mode != TransferMode::Receiving {
            return Err(TransmissionError::NotReceiving.into());
        }
        if self.offer.is_none() {
            return Err(TransmissionError::NoPendingOffer.into());
        }
        self.storage.open_write(path)?;
        self.recv_pos = 0;
        self.fail_count = 0;
        self.emit_header(events, &Header::from_number(HeaderType::Hex, ZFrameType::RPos, 0));
        Ok(())
    }

    /// Decline the pending file offer.
    pub fn skip_file(&mut self, events: &mut dyn TransferEvents) -> TransferResult<()> {
        if self.mode != TransferMode::Receiving {
            return Err(TransmissionError::NotReceiving.into());
        }
        if self.offer.take().is_none() {
            return Err(TransmissionError::NoPendingOffer.into());
        }
        self.emit_header(events, &Header::empty(HeaderType::Hex, ZFrameType::Skip));
        Ok(())
    }

    /// Refuse a peer's invitation to send (ZRINIT while idle).
    pub fn deny_sending(&mut self, events: &mut dyn TransferEvents) -> TransferResult<()> {
        if self.mode != TransferMode::Idle {
            return Err(TransmissionError::TransferActive.into());
        }
        self.emit_header(events, &Header::from_number(self.bin_encoding(), ZFrameType::Fin, 0));
        Ok(())
    }

    /// Emit the canonical abort sequence and drop back to idle.
    pub fn cancel(&mut self, events: &mut dyn TransferEvents) {
        events.on_data(&ABORT_SEQ);
        self.reset();
    }

    /// Feed one inbound transport byte. Faults on this path are
    /// reported through `on_error`, never returned.
    pub fn receive_byte(&mut self, events: &mut dyn TransferEvents, byte: u8) {
        let Some(decoded) = self.decoder.push(byte) else {
            return;
        };
        let result = match decoded {
            Decoded::Header(header) => self.process_header(events, &header),
            Decoded::Packet { data, terminator } => self.process_packet(events, &data, terminator),
            Decoded::PacketCrcError => {
                if self.subpacket_frame.take() == Some(ZFrameType::Data) {
                    log::warn!("data subpacket crc mismatch");
                    self.data_failure(events);
                } else {
                    log::warn!("non-data subpacket crc mismatch, dropped");
                }
                Ok(())
            }
        };
        if let Err(err) = result {
            self.fatal(events, &err.to_string());
        }
    }

    fn process_header(&mut self, events: &mut dyn TransferEvents, header: &Header) -> TransferResult<()> {
        log::debug!("received {header}");
        match header.frame_type {
            ZFrameType::RQInit => events.on_receive_request(),

            ZFrameType::RInit => {
                self.allow_crc32 = header.f0() & zrinit_flag::CANFC32 != 0;
                match self.mode {
                    TransferMode::Idle => events.on_send_request(),
                    TransferMode::Sending => self.next_send(events),
                    TransferMode::SendingFin => {
                        self.storage.close();
                        self.files.pop_front();
                        self.mode = TransferMode::Sending;
                        self.next_send(events);
                    }
                    TransferMode::Receiving => log::warn!("ZRINIT during a receive session, ignored"),
                }
            }

            ZFrameType::Sinit => {
                self.subpacket_frame = Some(ZFrameType::Sinit);
                self.recv_wide = header.header_type == HeaderType::Bin32;
                self.decoder.expect_packet(self.recv_wide);
            }

            ZFrameType::File => {
                if self.mode != TransferMode::Receiving {
                    log::warn!("ZFILE outside of a receive session, ignored");
                    return Ok(());
                }
                self.subpacket_frame = Some(ZFrameType::File);
                self.recv_wide = header.header_type == HeaderType::Bin32;
                self.decoder.expect_packet(self.recv_wide);
            }

            ZFrameType::Data => {
                if self.mode != TransferMode::Receiving || !self.storage.is_open() {
                    log::warn!("ZDATA without an open receive file, ignored");
                    return Ok(());
                }
                let pos = header.number();
                if pos == self.recv_pos {
                    self.subpacket_frame = Some(ZFrameType::Data);
                    self.recv_wide = header.header_type == HeaderType::Bin32;
                    self.decoder.expect_packet(self.recv_wide);
                } else {
                    log::warn!("ZDATA at position {pos}, expected {}", self.recv_pos);
                    self.data_failure(events);
                }
            }

            ZFrameType::Eof => {
                if self.mode != TransferMode::Receiving || !self.storage.is_open() {
                    log::warn!("ZEOF without an open receive file, ignored");
                    return Ok(());
                }
                let pos = header.number();
                if pos == self.recv_pos {
                    self.storage.close();
                    self.offer = None;
                    self.fail_count = 0;
                    events.on_complete_file();
                    self.send_zrinit(events);
                } else {
                    log::warn!("ZEOF at position {pos}, expected {}", self.recv_pos);
                    self.data_failure(events);
                }
            }

            ZFrameType::RPos => match self.mode {
                TransferMode::Sending | TransferMode::SendingFin => {
                    self.send_pos = header.number();
                    self.mode = TransferMode::Sending;
                    self.send_data(events)?;
                }
                _ => log::warn!("ZRPOS outside of a send session, ignored"),
            },

            ZFrameType::Ack => match self.mode {
                TransferMode::Sending => {
                    self.send_pos = header.number();
                    self.send_data(events)?;
                }
                TransferMode::SendingFin => self.send_pos = header.number(),
                _ => log::warn!("ZACK outside of a send session, ignored"),
            },

            ZFrameType::Fin => match self.mode {
                TransferMode::Sending | TransferMode::SendingFin => {
                    events.on_data(b"OO");
                    self.reset();
                    events.on_finish();
                }
                TransferMode::Receiving => {
                    self.emit_header(events, &Header::empty(HeaderType::Hex, ZFrameType::Fin));
                    self.reset();
                    events.on_finish();
                }
                TransferMode::Idle => log::warn!("ZFIN outside of a transfer session, ignored"),
            },

            ZFrameType::Skip | ZFrameType::Nak => {
                log::warn!("{header} not acted upon");
            }

            ZFrameType::Challenge => {
                self.emit_header(
                    events,
                    &Header::from_number(self.response_encoding(), ZFrameType::Ack, header.number()),
                );
            }

            ZFrameType::FreeCnt => {
                // 0 means unlimited; actual free space is not leaked to the peer
                self.emit_header(events, &Header::from_number(self.response_encoding(), ZFrameType::Ack, 0));
            }

            ZFrameType::Abort | ZFrameType::FErr | ZFrameType::Can => {
                self.emit_header(events, &Header::empty(self.response_encoding(), ZFrameType::Fin));
                self.reset();
                events.on_error("transfer aborted by peer");
            }

            ZFrameType::Crc | ZFrameType::Compl | ZFrameType::Command | ZFrameType::StdErr => {
                log::warn!("unsupported frame {header}, ignored");
            }
        }
        Ok(())
    }

    fn process_packet(&mut self, events: &mut dyn TransferEvents, data: &[u8], terminator: u8) -> TransferResult<()> {
        match self.subpacket_frame.take() {
            Some(ZFrameType::File) => {
                if self.storage.is_open() {
                    log::warn!("repeated ZFILE for an open transfer, requesting resync");
                    self.emit_header(events, &Header::from_number(HeaderType::Hex, ZFrameType::RPos, self.recv_pos));
                    return Ok(());
                }
                match parse_zfile_subpacket(data) {
                    Ok(offer) => {
                        self.fail_count = 0;
                        self.offer = Some(offer.clone());
                        events.on_accept_file(&offer);
                    }
                    Err(err) => log::warn!("malformed ZFILE subpacket dropped: {err}"),
                }
            }

            Some(ZFrameType::Data) => {
                self.fail_count = 0;
                self.storage.write(data)?;
                self.recv_pos += data.len() as u32;
                events.on_progress(self.recv_pos);
                match terminator {
                    ZCRCG => {
                        self.subpacket_frame = Some(ZFrameType::Data);
                        self.decoder.expect_packet(self.recv_wide);
                    }
                    ZCRCQ => {
                        self.emit_header(events, &Header::from_number(HeaderType::Hex, ZFrameType::Ack, self.recv_pos));
                        self.subpacket_frame = Some(ZFrameType::Data);
                        self.decoder.expect_packet(self.recv_wide);
                    }
                    ZCRCW => {
                        self.emit_header(events, &Header::from_number(HeaderType::Hex, ZFrameType::Ack, self.recv_pos));
                    }
                    ZCRCE => {}
                    _ => log::warn!("unknown subpacket terminator 0x{terminator:02X}, treated as end of frame"),
                }
            }

            Some(ZFrameType::Sinit) => {
                self.fail_count = 0;
                log::debug!("ZSINIT attention string {:?}", str_from_null_terminated(data));
                self.emit_header(events, &Header::from_number(self.response_encoding(), ZFrameType::Ack, 0));
            }

            _ => log::warn!("unexpected data subpacket, dropped"),
        }
        Ok(())
    }

    /// Transmit from `send_pos`, opening the head-of-queue file first
    /// if no handle is active.
    fn send_data(&mut self, events: &mut dyn TransferEvents) -> TransferResult<()> {
        let Some(fd) = self.files.front() else {
            log::warn!("send-data with an empty queue, ignored");
            return Ok(());
        };
        let path = fd.path().to_path_buf();
        if !self.storage.is_open() {
            self.send_len = self.storage.open_read(&path)? as u32;
        }
        if self.send_pos >= self.send_len {
            self.finish_file(events);
            return Ok(());
        }
        self.storage.seek(u64::from(self.send_pos))?;
        let mut buf = vec![0u8; MAX_SUBPACKET_LEN];
        let n = self.storage.read(&mut buf)?;
        if n == 0 {
            // file shrank under us, close out at the current offset
            self.finish_file(events);
            return Ok(());
        }

        let last = u64::from(self.send_pos) + n as u64 >= u64::from(self.send_len);
        let zcrc_byte = if last { ZCRCE } else { ZCRCW };
        let mut out = Header::from_number(self.bin_encoding(), ZFrameType::Data, self.send_pos).build();
        out.extend_from_slice(&self.encode_subpacket(zcrc_byte, &buf[..n]));
        self.send_pos += n as u32;
        events.on_data(&out);
        events.on_progress(self.send_pos);

        if last {
            self.finish_file(events);
            events.on_complete_file();
        }
        Ok(())
    }

    fn finish_file(&mut self, events: &mut dyn TransferEvents) {
        self.mode = TransferMode::SendingFin;
        self.emit_header(events, &Header::from_number(self.bin_encoding(), ZFrameType::Eof, self.send_pos));
    }

    /// Offer the head of the queue, or close the session when the
    /// queue has drained.
    fn next_send(&mut self, events: &mut dyn TransferEvents) {
        self.storage.close();
        self.send_pos = 0;
        if let Some(fd) = self.files.front() {
            let bytes_remaining: u64 = self.files.iter().map(|f| f.size).sum();
            let options = format!(
                "{}\0{} {:o} 0 0 {} {}\0",
                fd.file_name,
                fd.size,
                fd.date,
                self.files.len(),
                bytes_remaining
            );
            let mut out = Header::from_flags(self.bin_encoding(), ZFrameType::File, 0, 0, 0, zfile_flag::ZCBIN).build();
            out.extend_from_slice(&self.encode_subpacket(ZCRCW, options.as_bytes()));
            log::debug!("offering file {}", fd.file_name);
            events.on_data(&out);
        } else {
            self.emit_header(events, &Header::from_number(self.bin_encoding(), ZFrameType::Fin, 0));
        }
    }

    fn send_zrinit(&self, events: &mut dyn TransferEvents) {
        let flags = zrinit_flag::CANFDX | zrinit_flag::CANOVIO | zrinit_flag::CANFC32;
        self.emit_header(events, &Header::from_flags(HeaderType::Hex, ZFrameType::RInit, 0, 0, 0, flags));
    }

    fn data_failure(&mut self, events: &mut dyn TransferEvents) {
        self.fail_count += 1;
        if self.fail_count > MAX_FAIL_COUNT {
            self.fatal(events, "Fail count exceeded");
        } else {
            self.emit_header(events, &Header::from_number(HeaderType::Hex, ZFrameType::RPos, self.recv_pos));
        }
    }

    fn fatal(&mut self, events: &mut dyn TransferEvents, msg: &str) {
        log::error!("session aborted: {msg}");
        self.reset();
        events.on_error(msg);
    }

    fn reset(&mut self) {
        self.mode = TransferMode::Idle;
        self.decoder.reset();
        self.storage.close();
        self.offer = None;
        self.subpacket_frame = None;
        self.fail_count = 0;
    }

    fn bin_encoding(&self) -> HeaderType {
        if self.allow_crc32 {
            HeaderType::Bin32
        } else {
            HeaderType::Bin
        }
    }

    /// Receiver-side replies are canonical HEX, sender-side replies
    /// follow the negotiated binary encoding.
    fn response_encoding(&self) -> HeaderType {
        match self.mode {
            TransferMode::Sending | TransferMode::SendingFin => self.bin_encoding(),
            _ => HeaderType::Hex,
        }
    }

    fn encode_subpacket(&self, zcrc_byte: u8, data: &[u8]) -> Vec<u8> {
        if self.allow_crc32 {
            encode_subpacket_crc32(zcrc_byte, data)
        } else {
            encode_subpacket_crc16(zcrc_byte, data)
        }
    }

    fn emit_header(&self, events: &mut dyn TransferEvents, header: &Header) {
        log::debug!("sending {header}");
        events.on_data(&header.build());
    }
}

fn parse_zfile_subpacket(block: &[u8]) -> TransferResult<FileDescriptor> {
    let file_name = str_from_null_terminated(block);
    if file_name.is_empty() {
        return Err(anyhow::anyhow!("empty file name"));
    }
    let rest = block.get(file_name.len() + 1..).unwrap_or_default();
    let options = str_from_null_terminated(rest);
    let mut fields = options.split_whitespace();
    let size = fields.next().and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
    let date = fields.next().and_then(|f| u64::from_str_radix(f, 8).ok()).unwrap_or(0);
    Ok(FileDescriptor::from_offer(file_name.to_string(), size, date))
}
