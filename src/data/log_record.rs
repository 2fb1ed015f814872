use bytes::{Buf, BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

use crate::errors::{Errors, Result};

pub const CRC_LEN: usize = 4;

// widest varint encoding of a 32-bit length
const MAX_VARINT32_LEN: usize = 5;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LogRecordType {
  Normal = 1,

  Deleted = 2,

  TxnFinished = 3,
}

#[derive(Debug)]
pub struct LogRecord {
  pub(crate) key: Vec<u8>,
  pub(crate) value: Vec<u8>,
  pub(crate) rec_type: LogRecordType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogRecordPos {
  pub(crate) file_id: u32,
  pub(crate) offset: u64,
  pub(crate) size: u32,
}

/// Decoded header fields, before the key/value tail has been read.
#[derive(Debug)]
pub struct LogRecordHeader {
  pub(crate) crc: u32,
  pub(crate) rec_type_byte: u8,
  pub(crate) key_size: usize,
  pub(crate) value_size: usize,
  /// Encoded header length in bytes.
  pub(crate) size: usize,
}

#[derive(Debug)]
pub struct ReadLogRecord {
  pub(crate) record: LogRecord,
  pub(crate) size: usize,
}

/// A record staged during recovery until its batch terminator shows up.
pub struct TransactionRecord {
  pub(crate) record: LogRecord,
  pub(crate) pos: LogRecordPos,
}

impl LogRecord {
  // Encoded layout, CRC first so a reader can validate everything after it:
  // +---------+----------+----------------+------------------+---------+-----------+
  // |   Crc   |   Type   |   Key Length   |   Value Length   |   Key   |   Value   |
  // +---------+----------+----------------+------------------+---------+-----------+
  //   4 bytes   1 byte     n(n<=5) bytes    m(m<=5) bytes         x          y
  //
  // The lengths are Zig-Zag varints; the CRC is IEEE CRC-32 over every byte
  // after itself, stored little-endian.
  pub fn encode(&self) -> Vec<u8> {
    let (encode_buf, _) = self.encode_and_get_crc();
    encode_buf
  }

  pub fn get_crc(&self) -> u32 {
    let (_, crc_val) = self.encode_and_get_crc();
    crc_val
  }

  fn encode_and_get_crc(&self) -> (Vec<u8>, u32) {
    let mut buf = BytesMut::with_capacity(self.encoded_length());

    // crc placeholder, patched once the payload is in place
    buf.put_u32_le(0);
    buf.put_u8(self.rec_type as u8);

    encode_varint_i64(self.key.len() as i64, &mut buf);
    encode_varint_i64(self.value.len() as i64, &mut buf);

    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let crc = crc32fast::hash(&buf[CRC_LEN..]);
    buf[..CRC_LEN].copy_from_slice(&crc.to_le_bytes());

    (buf.to_vec(), crc)
  }

  fn encoded_length(&self) -> usize {
    CRC_LEN
      + std::mem::size_of::<u8>()
      + encoded_len_varint(zigzag(self.key.len() as i64))
      + encoded_len_varint(zigzag(self.value.len() as i64))
      + self.key.len()
      + self.value.len()
  }
}

impl LogRecordPos {
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_varint(self.file_id as u64, &mut buf);
    encode_varint(self.offset, &mut buf);
    encode_varint(self.size as u64, &mut buf);
    buf.to_vec()
  }
}

impl LogRecordType {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      1 => Some(LogRecordType::Normal),
      2 => Some(LogRecordType::Deleted),
      3 => Some(LogRecordType::TxnFinished),
      _ => None,
    }
  }
}

pub fn max_log_record_header_size() -> usize {
  CRC_LEN + std::mem::size_of::<u8>() + MAX_VARINT32_LEN * 2
}

/// Decode the header fields from up to `max_log_record_header_size()` bytes.
///
/// Returns `ReadDataFileEOF` for the shapes a truncated file tail can take: a
/// buffer too short to hold the fixed fields, an all-zero header, or a length
/// varint running off the end of a short buffer. A varint failure inside a
/// full-size header means the stream itself is bad.
pub fn decode_log_record_header(header_buf: &[u8]) -> Result<LogRecordHeader> {
  if header_buf.len() <= CRC_LEN + 1 {
    return Err(Errors::ReadDataFileEOF);
  }
  let short_header = header_buf.len() < max_log_record_header_size();

  let mut buf = header_buf;
  let crc = buf.get_u32_le();
  let rec_type_byte = buf.get_u8();

  let var_err = if short_header {
    Errors::ReadDataFileEOF
  } else {
    Errors::DataDirectoryCorrupted
  };
  let key_size = decode_varint_i64(&mut buf).map_err(|_| var_err)? as usize;
  let value_size = decode_varint_i64(&mut buf).map_err(|_| var_err)? as usize;

  // a zeroed region past the last durable record reads as a clean end of stream
  if crc == 0 && rec_type_byte == 0 && key_size == 0 && value_size == 0 {
    return Err(Errors::ReadDataFileEOF);
  }

  Ok(LogRecordHeader {
    crc,
    rec_type_byte,
    key_size,
    value_size,
    size: header_buf.len() - buf.remaining(),
  })
}

pub fn decode_log_record_pos(pos: Vec<u8>) -> Result<LogRecordPos> {
  let mut buf = BytesMut::new();
  buf.put_slice(&pos);

  let fid = decode_varint(&mut buf).map_err(|_| Errors::DataDirectoryCorrupted)?;
  let offset = decode_varint(&mut buf).map_err(|_| Errors::DataDirectoryCorrupted)?;
  let size = decode_varint(&mut buf).map_err(|_| Errors::DataDirectoryCorrupted)?;

  Ok(LogRecordPos {
    file_id: fid as u32,
    offset,
    size: size as u32,
  })
}

fn zigzag(v: i64) -> u64 {
  ((v << 1) ^ (v >> 63)) as u64
}

pub(crate) fn encode_varint_i64(v: i64, buf: &mut BytesMut) {
  encode_varint(zigzag(v), buf);
}

pub(crate) fn decode_varint_i64<B: Buf>(buf: &mut B) -> Result<i64> {
  let n = decode_varint(buf).map_err(|_| Errors::DataDirectoryCorrupted)?;
  Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_log_record_encode_layout() {
    let rec = LogRecord {
      key: "key-a".as_bytes().to_vec(),
      value: "value-a".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc = rec.encode();

    // crc is stored first, little-endian, computed over everything after it
    let stored_crc = u32::from_le_bytes(enc[..CRC_LEN].try_into().unwrap());
    assert_eq!(stored_crc, crc32fast::hash(&enc[CRC_LEN..]));
    assert_eq!(stored_crc, rec.get_crc());

    // the type byte follows the crc
    assert_eq!(enc[CRC_LEN], LogRecordType::Normal as u8);

    // small lengths fit in one zig-zag varint byte each
    assert_eq!(enc.len(), CRC_LEN + 1 + 1 + 1 + 5 + 7);
  }

  #[test]
  fn test_log_record_encode_and_get_crc() {
    let verify_crc = |record: &LogRecord| {
      let enc = record.encode();
      assert!(enc.len() > CRC_LEN);
      let stored_crc = u32::from_le_bytes(enc[..CRC_LEN].try_into().unwrap());
      assert_eq!(
        crc32fast::hash(&enc[CRC_LEN..]),
        stored_crc,
        "CRC mismatch for record: {:?}",
        record
      );
      assert_eq!(record.get_crc(), stored_crc);
    };

    let rec1 = LogRecord {
      key: "key-a".as_bytes().to_vec(),
      value: "value-a".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    verify_crc(&rec1);

    // empty value
    let rec2 = LogRecord {
      key: "cinder-kv".as_bytes().to_vec(),
      value: vec![],
      rec_type: LogRecordType::Normal,
    };
    verify_crc(&rec2);

    // tombstone
    let rec3 = LogRecord {
      key: "key-b".as_bytes().to_vec(),
      value: "value-b".as_bytes().to_vec(),
      rec_type: LogRecordType::Deleted,
    };
    verify_crc(&rec3);
  }

  #[test]
  fn test_decode_log_record_header() {
    let rec = LogRecord {
      key: "key-a".as_bytes().to_vec(),
      value: "value-a".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc = rec.encode();

    let header = decode_log_record_header(&enc[..max_log_record_header_size().min(enc.len())])
      .expect("failed to decode header");
    assert_eq!(header.crc, rec.get_crc());
    assert_eq!(header.rec_type_byte, LogRecordType::Normal as u8);
    assert_eq!(header.key_size, 5);
    assert_eq!(header.value_size, 7);
    assert_eq!(header.size, CRC_LEN + 1 + 1 + 1);

    // all-zero header reads as end of stream
    let zeros = vec![0u8; max_log_record_header_size()];
    assert_eq!(
      decode_log_record_header(&zeros).err().unwrap(),
      Errors::ReadDataFileEOF
    );

    // too short to hold the fixed fields
    assert_eq!(
      decode_log_record_header(&enc[..3]).err().unwrap(),
      Errors::ReadDataFileEOF
    );
  }

  #[test]
  fn test_varint_i64_round_trip() {
    for v in [0i64, 1, 2, 5, 127, 128, 300, u32::MAX as i64] {
      let mut buf = BytesMut::new();
      encode_varint_i64(v, &mut buf);
      let mut slice = &buf[..];
      assert_eq!(decode_varint_i64(&mut slice).unwrap(), v);
    }
  }

  #[test]
  fn test_log_record_pos_round_trip() {
    let pos = LogRecordPos {
      file_id: 7,
      offset: 1024,
      size: 93,
    };
    let decoded = decode_log_record_pos(pos.encode()).expect("failed to decode pos");
    assert_eq!(decoded, pos);

    let truncated = pos.encode()[..1].to_vec();
    assert_eq!(
      decode_log_record_pos(truncated).err().unwrap(),
      Errors::DataDirectoryCorrupted
    );
  }
}
