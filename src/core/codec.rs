//! Fixed-offset binary packet codec.
//!
//! Layout rules shared by every module packet:
//!
//! ```text
//! +------------------------------------------------------------+
//! | type (2) | request id (2) | packet id (2) | flags (2)        |
//! | payload length (4) | map id / reply status (4)            |
//! | payload (var): big-endian, 4-byte values aligned to 4,     |
//! |                2-byte values aligned to 2, NUL strings      |
//! +------------------------------------------------------------+
//! ```

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const HEADER_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("string at offset {offset} is not NUL terminated")]
    UnterminatedString { offset: usize },

    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u16),

    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("payload length mismatch: header says {declared}, packet has {actual}")]
    PayloadLength { declared: usize, actual: usize },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

fn padding(position: usize, alignment: usize) -> usize {
    (alignment - position % alignment) % alignment
}

#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn align(&mut self, alignment: usize) {
        let pad = padding(self.buf.len(), alignment);
        self.buf.resize(self.buf.len() + pad, 0);
    }

    fn reserve_slot(&mut self, alignment: usize, size: usize) -> &mut [u8] {
        self.align(alignment);
        let start = self.buf.len();
        self.buf.resize(start + size, 0);
        &mut self.buf[start..]
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        BigEndian::write_u16(self.reserve_slot(2, 2), value);
    }

    pub fn write_u32(&mut self, value: u32) {
        BigEndian::write_u32(self.reserve_slot(4, 4), value);
    }

    pub fn write_i32(&mut self, value: i32) {
        BigEndian::write_i32(self.reserve_slot(4, 4), value);
    }

    pub fn write_u64(&mut self, value: u64) {
        BigEndian::write_u64(self.reserve_slot(4, 8), value);
    }

    pub fn write_f32(&mut self, value: f32) {
        BigEndian::write_f32(self.reserve_slot(4, 4), value);
    }

    /// UTF-8 位元組加上結尾的 NUL
    pub fn write_string(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, alignment: usize, size: usize) -> CodecResult<&'a [u8]> {
        let start = self.pos + padding(self.pos, alignment);
        let end = start + size;
        if end > self.data.len() {
            return Err(CodecError::Truncated {
                offset: start,
                needed: size,
                available: self.data.len().saturating_sub(start),
            });
        }
        self.pos = end;
        Ok(&self.data[start..end])
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1, 1)?[0])
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(BigEndian::read_u16(self.take(2, 2)?))
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(BigEndian::read_u32(self.take(4, 4)?))
    }

    pub fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(BigEndian::read_i32(self.take(4, 4)?))
    }

    pub fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(BigEndian::read_u64(self.take(4, 8)?))
    }

    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(BigEndian::read_f32(self.take(4, 4)?))
    }

    pub fn read_string(&mut self) -> CodecResult<String> {
        let start = self.pos;
        let rest = self.data.get(start..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::UnterminatedString { offset: start })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| CodecError::InvalidUtf8 { offset: start })?;
        self.pos = start + len + 1;
        Ok(text.to_string())
    }

    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.take(1, len)
    }

    /// 讀取元素數量，並確認剩餘資料足夠（每個元素至少 `min_item_size` 位元組）
    pub fn read_count(&mut self, min_item_size: usize) -> CodecResult<usize> {
        let count = self.read_u32()? as usize;
        let needed = count.saturating_mul(min_item_size);
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(count)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok = 0,
    NotOk = 1,
    NotUnique = 2,
    NotFound = 3,
    Timeout = 4,
}

impl ReplyStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> CodecResult<Self> {
        match code {
            0 => Ok(ReplyStatus::Ok),
            1 => Ok(ReplyStatus::NotOk),
            2 => Ok(ReplyStatus::NotUnique),
            3 => Ok(ReplyStatus::NotFound),
            4 => Ok(ReplyStatus::Timeout),
            value => Err(CodecError::InvalidValue {
                field: "reply status",
                value,
            }),
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyStatus::Ok => "OK",
            ReplyStatus::NotOk => "NOT_OK",
            ReplyStatus::NotUnique => "NOT_UNIQUE",
            ReplyStatus::NotFound => "NOT_FOUND",
            ReplyStatus::Timeout => "TIMEOUT",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: u16,
    pub request_id: u16,
    pub packet_id: u16,
    pub flags: u16,
    pub payload_len: u32,
    /// 請求封包為地圖 id，回覆封包為狀態碼
    pub map_id_or_status: u32,
}

impl PacketHeader {
    pub fn write(&self, w: &mut PacketWriter) {
        w.write_u16(self.packet_type);
        w.write_u16(self.request_id);
        w.write_u16(self.packet_id);
        w.write_u16(self.flags);
        w.write_u32(self.payload_len);
        w.write_u32(self.map_id_or_status);
    }

    pub fn read(r: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            packet_type: r.read_u16()?,
            request_id: r.read_u16()?,
            packet_id: r.read_u16()?,
            flags: r.read_u16()?,
            payload_len: r.read_u32()?,
            map_id_or_status: r.read_u32()?,
        })
    }
}

/// 組合標頭與酬載
pub fn frame(mut header: PacketHeader, payload: &[u8]) -> Vec<u8> {
    header.payload_len = payload.len() as u32;
    let mut w = PacketWriter::with_capacity(HEADER_SIZE + payload.len());
    header.write(&mut w);
    w.write_bytes(payload);
    w.into_inner()
}

/// 拆出標頭與酬載，酬載長度必須與標頭一致
pub fn unframe(packet: &[u8]) -> CodecResult<(PacketHeader, &[u8])> {
    let mut r = PacketReader::new(packet);
    let header = PacketHeader::read(&mut r)?;
    let payload = r.read_bytes(packet.len().saturating_sub(HEADER_SIZE))?;
    if payload.len() != header.payload_len as usize {
        return Err(CodecError::PayloadLength {
            declared: header.payload_len as usize,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_aligned_big_endian() {
        let mut w = PacketWriter::new();
        w.write_u8(7);
        w.write_u32(0x0102_0304);
        w.write_u8(1);
        w.write_u16(0xabcd);

        assert_eq!(
            w.into_inner(),
            vec![7, 0, 0, 0, 1, 2, 3, 4, 1, 0, 0xab, 0xcd]
        );
    }

    #[test]
    fn test_reader_skips_alignment_padding() {
        let mut w = PacketWriter::new();
        w.write_string("E4");
        w.write_i32(-5);
        w.write_u64(1 << 40);
        w.write_f32(1.5);
        let bytes = w.into_inner();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "E4");
        assert_eq!(r.read_i32().unwrap(), -5);
        assert_eq!(r.read_u64().unwrap(), 1 << 40);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_reads_are_errors() {
        let bytes = [0u8, 1, 2];
        let mut r = PacketReader::new(&bytes);
        assert!(matches!(
            r.read_u32(),
            Err(CodecError::Truncated { needed: 4, .. })
        ));

        let mut r = PacketReader::new(b"abc");
        assert_eq!(
            r.read_string(),
            Err(CodecError::UnterminatedString { offset: 0 })
        );
    }

    #[test]
    fn test_count_larger_than_payload_is_rejected() {
        let mut w = PacketWriter::new();
        w.write_u32(1_000_000);
        let bytes = w.into_inner();
        let mut r = PacketReader::new(&bytes);
        assert!(r.read_count(8).is_err());
    }

    #[test]
    fn test_frame_checks_payload_length() {
        let header = PacketHeader {
            packet_type: 0x81,
            request_id: 3,
            packet_id: 9,
            flags: 0,
            payload_len: 0,
            map_id_or_status: ReplyStatus::NotFound.code(),
        };
        let mut packet = frame(header, &[1, 2, 3, 4]);
        let (decoded, payload) = unframe(&packet).unwrap();
        assert_eq!(decoded.payload_len, 4);
        assert_eq!(decoded.request_id, 3);
        assert_eq!(ReplyStatus::from_code(decoded.map_id_or_status), Ok(ReplyStatus::NotFound));
        assert_eq!(payload, &[1, 2, 3, 4]);

        packet.push(0);
        assert!(matches!(
            unframe(&packet),
            Err(CodecError::PayloadLength { declared: 4, actual: 5 })
        ));
    }
}
