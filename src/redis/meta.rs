use bytes::{BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::{
  data::log_record::{decode_varint_i64, encode_varint_i64},
  errors::{Errors, Result},
};

use super::RedisDataType;

/// Lists grow in both directions from the middle of the index space.
pub(crate) const INITIAL_LIST_MARK: u64 = u64::MAX / 2;

/// Per-key metadata for the aggregate types. Stored under the user key
/// itself; the members live under derived internal keys that embed the
/// version, so dropping a key orphans all its members at once.
pub(crate) struct Metadata {
  pub(crate) data_type: RedisDataType,
  /// Expiry as a unix nanosecond timestamp; 0 means no expiry.
  pub(crate) expire: i64,
  pub(crate) version: i64,
  /// Number of members.
  pub(crate) size: u32,
  pub(crate) head: u64,
  pub(crate) tail: u64,
}

impl Metadata {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(self.data_type as u8);
    encode_varint_i64(self.expire, &mut buf);
    encode_varint_i64(self.version, &mut buf);
    encode_varint_i64(self.size as i64, &mut buf);

    if self.data_type == RedisDataType::List {
      encode_varint(self.head, &mut buf);
      encode_varint(self.tail, &mut buf);
    }
    buf.to_vec()
  }
}

pub(crate) fn decode_metadata(buf: Vec<u8>) -> Result<Metadata> {
  if buf.is_empty() {
    return Err(Errors::DataDirectoryCorrupted);
  }
  let data_type = RedisDataType::from_u8(buf[0]).ok_or(Errors::DataDirectoryCorrupted)?;

  let mut rest = &buf[1..];
  let expire = decode_varint_i64(&mut rest)?;
  let version = decode_varint_i64(&mut rest)?;
  let size = decode_varint_i64(&mut rest)? as u32;

  let (mut head, mut tail) = (0, 0);
  if data_type == RedisDataType::List {
    head = decode_varint(&mut rest).map_err(|_| Errors::DataDirectoryCorrupted)?;
    tail = decode_varint(&mut rest).map_err(|_| Errors::DataDirectoryCorrupted)?;
  }

  Ok(Metadata {
    data_type,
    expire,
    version,
    size,
    head,
    tail,
  })
}

/// `key | version | field`
pub(crate) struct HashInternalKey {
  pub(crate) key: Vec<u8>,
  pub(crate) version: i64,
  pub(crate) field: Vec<u8>,
}

impl HashInternalKey {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.key.len() + 8 + self.field.len());
    buf.extend_from_slice(&self.key);
    buf.put_i64_le(self.version);
    buf.extend_from_slice(&self.field);
    buf.to_vec()
  }
}

/// `key | version | member | member_len`; the trailing length keeps two
/// members from colliding when one is a prefix of the other.
pub(crate) struct SetInternalKey {
  pub(crate) key: Vec<u8>,
  pub(crate) version: i64,
  pub(crate) member: Vec<u8>,
}

impl SetInternalKey {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.key.len() + 8 + self.member.len() + 4);
    buf.extend_from_slice(&self.key);
    buf.put_i64_le(self.version);
    buf.extend_from_slice(&self.member);
    buf.put_u32_le(self.member.len() as u32);
    buf.to_vec()
  }
}

/// `key | version | index`
pub(crate) struct ListInternalKey {
  pub(crate) key: Vec<u8>,
  pub(crate) version: i64,
  pub(crate) index: u64,
}

impl ListInternalKey {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.key.len() + 8 + 8);
    buf.extend_from_slice(&self.key);
    buf.put_i64_le(self.version);
    buf.put_u64_le(self.index);
    buf.to_vec()
  }
}
