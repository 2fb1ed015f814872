//! Redis-style data structures encoded on top of the KV primitives.
//!
//! Every structure is a pure encoding choice: strings carry their type and
//! expiry inline with the value, while hashes, sets and lists keep a
//! metadata record under the user key and their members under versioned
//! internal keys. No wire protocol lives here.

mod meta;

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use time::OffsetDateTime;

use crate::{
  data::log_record::{decode_varint_i64, encode_varint_i64},
  db::Engine,
  errors::{Errors, Result},
  option::{Options, WriteBatchOptions},
};

use self::meta::{
  decode_metadata, HashInternalKey, ListInternalKey, Metadata, SetInternalKey, INITIAL_LIST_MARK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisDataType {
  String = 0,
  Hash = 1,
  Set = 2,
  List = 3,
}

impl RedisDataType {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(RedisDataType::String),
      1 => Some(RedisDataType::Hash),
      2 => Some(RedisDataType::Set),
      3 => Some(RedisDataType::List),
      _ => None,
    }
  }
}

/// The structure layer over one owned engine instance.
pub struct RedisDataStructure {
  eng: Engine,
}

fn now_nanos() -> i64 {
  OffsetDateTime::now_utc().unix_timestamp_nanos() as i64
}

impl RedisDataStructure {
  pub fn new(options: Options) -> Result<Self> {
    let eng = Engine::open(options)?;
    Ok(Self { eng })
  }

  pub fn close(&self) -> Result<()> {
    self.eng.close()
  }

  // ------------------------------- String --------------------------------

  /// value = `type | expire | payload`
  pub fn set(&self, key: Bytes, ttl: Option<Duration>, value: Bytes) -> Result<()> {
    let mut buf = BytesMut::new();
    buf.put_u8(RedisDataType::String as u8);
    let expire = match ttl {
      Some(ttl) => now_nanos() + ttl.as_nanos() as i64,
      None => 0,
    };
    encode_varint_i64(expire, &mut buf);
    buf.extend_from_slice(&value);

    self.eng.put(key, buf.freeze())
  }

  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    let enc = self.eng.get(key)?;

    let mut rest = &enc[..];
    if rest.is_empty() {
      return Err(Errors::DataDirectoryCorrupted);
    }
    if rest[0] != RedisDataType::String as u8 {
      return Err(Errors::WrongTypeOperation);
    }
    rest = &rest[1..];
    let expire = decode_varint_i64(&mut rest)?;
    if expire > 0 && expire <= now_nanos() {
      return Err(Errors::KeyNotFound);
    }

    Ok(enc.slice(enc.len() - rest.len()..))
  }

  // ------------------------------- generic -------------------------------

  pub fn del(&self, key: Bytes) -> Result<()> {
    self.eng.delete(key)
  }

  /// The stored type of `key`, read from its leading tag byte.
  pub fn type_of(&self, key: Bytes) -> Result<RedisDataType> {
    let enc = self.eng.get(key)?;
    if enc.is_empty() {
      return Err(Errors::DataDirectoryCorrupted);
    }
    RedisDataType::from_u8(enc[0]).ok_or(Errors::DataDirectoryCorrupted)
  }

  /// Fetch the metadata record for an aggregate key, or mint a fresh one if
  /// the key is absent or its old value has expired.
  fn find_metadata(&self, key: &Bytes, data_type: RedisDataType) -> Result<Metadata> {
    match self.eng.get(key.clone()) {
      Ok(buf) => {
        let meta = decode_metadata(buf.to_vec())?;
        if meta.data_type != data_type {
          return Err(Errors::WrongTypeOperation);
        }
        if meta.expire > 0 && meta.expire <= now_nanos() {
          return Ok(fresh_metadata(data_type));
        }
        Ok(meta)
      }
      Err(Errors::KeyNotFound) => Ok(fresh_metadata(data_type)),
      Err(e) => Err(e),
    }
  }

  // -------------------------------- Hash ---------------------------------

  /// Returns true when the field did not exist before.
  pub fn hset(&self, key: Bytes, field: Bytes, value: Bytes) -> Result<bool> {
    let mut meta = self.find_metadata(&key, RedisDataType::Hash)?;

    let hk = HashInternalKey {
      key: key.to_vec(),
      version: meta.version,
      field: field.to_vec(),
    }
    .encode();
    let exist = self.eng.get(Bytes::from(hk.clone())).is_ok();

    // the member and the size bump land together or not at all
    let wb = self.eng.new_write_batch(WriteBatchOptions::default())?;
    if !exist {
      meta.size += 1;
      wb.put(key, Bytes::from(meta.encode()))?;
    }
    wb.put(Bytes::from(hk), value)?;
    wb.commit()?;

    Ok(!exist)
  }

  pub fn hget(&self, key: Bytes, field: Bytes) -> Result<Bytes> {
    let meta = self.find_metadata(&key, RedisDataType::Hash)?;
    if meta.size == 0 {
      return Err(Errors::KeyNotFound);
    }

    let hk = HashInternalKey {
      key: key.to_vec(),
      version: meta.version,
      field: field.to_vec(),
    }
    .encode();
    self.eng.get(Bytes::from(hk))
  }

  /// Returns true when the field existed and was removed.
  pub fn hdel(&self, key: Bytes, field: Bytes) -> Result<bool> {
    let mut meta = self.find_metadata(&key, RedisDataType::Hash)?;
    if meta.size == 0 {
      return Ok(false);
    }

    let hk = HashInternalKey {
      key: key.to_vec(),
      version: meta.version,
      field: field.to_vec(),
    }
    .encode();
    let exist = self.eng.get(Bytes::from(hk.clone())).is_ok();
    if exist {
      let wb = self.eng.new_write_batch(WriteBatchOptions::default())?;
      meta.size -= 1;
      wb.put(key, Bytes::from(meta.encode()))?;
      wb.delete(Bytes::from(hk))?;
      wb.commit()?;
    }

    Ok(exist)
  }

  // --------------------------------- Set ----------------------------------

  /// Returns true when the member was newly added.
  pub fn sadd(&self, key: Bytes, member: Bytes) -> Result<bool> {
    let mut meta = self.find_metadata(&key, RedisDataType::Set)?;

    let sk = SetInternalKey {
      key: key.to_vec(),
      version: meta.version,
      member: member.to_vec(),
    }
    .encode();

    if self.eng.get(Bytes::from(sk.clone())).is_ok() {
      return Ok(false);
    }

    let wb = self.eng.new_write_batch(WriteBatchOptions::default())?;
    meta.size += 1;
    wb.put(key, Bytes::from(meta.encode()))?;
    wb.put(Bytes::from(sk), Bytes::new())?;
    wb.commit()?;
    Ok(true)
  }

  pub fn sismember(&self, key: Bytes, member: Bytes) -> Result<bool> {
    let meta = self.find_metadata(&key, RedisDataType::Set)?;
    if meta.size == 0 {
      return Ok(false);
    }

    let sk = SetInternalKey {
      key: key.to_vec(),
      version: meta.version,
      member: member.to_vec(),
    }
    .encode();
    match self.eng.get(Bytes::from(sk)) {
      Ok(_) => Ok(true),
      Err(Errors::KeyNotFound) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Returns true when the member existed and was removed.
  pub fn srem(&self, key: Bytes, member: Bytes) -> Result<bool> {
    let mut meta = self.find_metadata(&key, RedisDataType::Set)?;
    if meta.size == 0 {
      return Ok(false);
    }

    let sk = SetInternalKey {
      key: key.to_vec(),
      version: meta.version,
      member: member.to_vec(),
    }
    .encode();
    if self.eng.get(Bytes::from(sk.clone())).is_err() {
      return Ok(false);
    }

    let wb = self.eng.new_write_batch(WriteBatchOptions::default())?;
    meta.size -= 1;
    wb.put(key, Bytes::from(meta.encode()))?;
    wb.delete(Bytes::from(sk))?;
    wb.commit()?;
    Ok(true)
  }

  // --------------------------------- List ---------------------------------

  pub fn lpush(&self, key: Bytes, element: Bytes) -> Result<u32> {
    self.push_inner(key, element, true)
  }

  pub fn rpush(&self, key: Bytes, element: Bytes) -> Result<u32> {
    self.push_inner(key, element, false)
  }

  pub fn lpop(&self, key: Bytes) -> Result<Option<Bytes>> {
    self.pop_inner(key, true)
  }

  pub fn rpop(&self, key: Bytes) -> Result<Option<Bytes>> {
    self.pop_inner(key, false)
  }

  fn push_inner(&self, key: Bytes, element: Bytes, is_left: bool) -> Result<u32> {
    let mut meta = self.find_metadata(&key, RedisDataType::List)?;

    let lk = ListInternalKey {
      key: key.to_vec(),
      version: meta.version,
      index: if is_left { meta.head - 1 } else { meta.tail },
    }
    .encode();

    let wb = self.eng.new_write_batch(WriteBatchOptions::default())?;
    meta.size += 1;
    if is_left {
      meta.head -= 1;
    } else {
      meta.tail += 1;
    }
    wb.put(key, Bytes::from(meta.encode()))?;
    wb.put(Bytes::from(lk), element)?;
    wb.commit()?;

    Ok(meta.size)
  }

  fn pop_inner(&self, key: Bytes, is_left: bool) -> Result<Option<Bytes>> {
    let mut meta = self.find_metadata(&key, RedisDataType::List)?;
    if meta.size == 0 {
      return Ok(None);
    }

    let lk = ListInternalKey {
      key: key.to_vec(),
      version: meta.version,
      index: if is_left { meta.head } else { meta.tail - 1 },
    }
    .encode();
    let element = self.eng.get(Bytes::from(lk))?;

    // the popped slot just falls outside the [head, tail) window
    meta.size -= 1;
    if is_left {
      meta.head += 1;
    } else {
      meta.tail -= 1;
    }
    self.eng.put(key, Bytes::from(meta.encode()))?;

    Ok(Some(element))
  }
}

fn fresh_metadata(data_type: RedisDataType) -> Metadata {
  Metadata {
    data_type,
    expire: 0,
    version: now_nanos(),
    size: 0,
    head: INITIAL_LIST_MARK,
    tail: INITIAL_LIST_MARK,
  }
}
