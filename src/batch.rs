use std::{
  collections::{BTreeMap, HashMap},
  sync::{atomic::Ordering, Arc},
};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use prost::{decode_length_delimiter, encode_length_delimiter};

use crate::{
  data::log_record::{LogRecord, LogRecordType},
  db::Engine,
  errors::{Errors, Result},
  option::{IndexType, WriteBatchOptions},
};

const TXN_FIN_KEY: &[u8] = "txn-fin".as_bytes();
pub(crate) const NON_TXN_SEQ_NO: usize = 0;

/// A buffered set of writes committed atomically under one transaction
/// sequence number. None of the batch is visible, on disk or in the index,
/// until `commit` has appended the terminator record.
pub struct WriteBatch<'a> {
  // ordered by user key; a later op on the same key supersedes the earlier one
  pending_writes: Arc<Mutex<BTreeMap<Vec<u8>, LogRecord>>>,
  engine: &'a Engine,
  options: WriteBatchOptions,
}

impl Engine {
  /// Creates a write batch for grouped atomic operations.
  ///
  /// With the persistent B+ tree index the batch sequence can only be trusted
  /// after a clean close has persisted it, so a store that was never closed
  /// cleanly refuses batches.
  pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
    if self.options.index_type == IndexType::BPlusTree && !self.seq_file_exists && !self.is_initial
    {
      return Err(Errors::UnableToUseWriteBatch);
    }

    Ok(WriteBatch {
      pending_writes: Arc::new(Mutex::new(BTreeMap::new())),
      engine: self,
      options,
    })
  }
}

impl WriteBatch<'_> {
  /// Buffers a put; visible only after `commit`.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };

    let mut pending_writes = self.pending_writes.lock();
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  /// Buffers a delete. Deleting a key with no committed version simply drops
  /// any pending write for it from the batch.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut pending_writes = self.pending_writes.lock();
    let index_pos = self.engine.index.get(key.to_vec());
    if index_pos.is_none() {
      pending_writes.remove(&key.to_vec());
      return Ok(());
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  /// Commits the batch: appends every buffered record under a fresh sequence
  /// number, appends the terminator, then — and only then — applies the index
  /// updates. An empty batch commits trivially.
  pub fn commit(&self) -> Result<()> {
    let mut pending_writes = self.pending_writes.lock();
    if pending_writes.is_empty() {
      return Ok(());
    }
    if pending_writes.len() > self.options.max_batch_num {
      return Err(Errors::ExceedMaxBatchNum);
    }

    let _lock = self.engine.batch_commit_lock.lock();

    let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

    // append every record, keeping its position for the index update below
    let mut positions = HashMap::new();
    for (_, item) in pending_writes.iter() {
      let mut record = LogRecord {
        key: log_record_key_with_seq(item.key.clone(), seq_no),
        value: item.value.clone(),
        rec_type: item.rec_type,
      };

      let pos = self.engine.append_log_record(&mut record)?;
      positions.insert(item.key.clone(), pos);
    }

    // the terminator makes the batch effective for recovery
    let mut finish_record = LogRecord {
      key: log_record_key_with_seq(TXN_FIN_KEY.to_vec(), seq_no),
      value: Default::default(),
      rec_type: LogRecordType::TxnFinished,
    };
    self.engine.append_log_record(&mut finish_record)?;

    if self.options.sync_writes {
      self.engine.sync()?;
    }

    for (_, item) in pending_writes.iter() {
      let record_pos = positions
        .get(&item.key)
        .expect("batch record lost its position");
      if item.rec_type == LogRecordType::Normal {
        if let Some(old_pos) = self.engine.index.put(item.key.clone(), *record_pos) {
          self
            .engine
            .reclaim_size
            .fetch_add(old_pos.size as usize, Ordering::SeqCst);
        }
      }
      if item.rec_type == LogRecordType::Deleted {
        // both the tombstone and the version it kills are dead weight
        let mut size = record_pos.size;
        if let Some(old_pos) = self.engine.index.delete(item.key.clone()) {
          size += old_pos.size;
        }
        self
          .engine
          .reclaim_size
          .fetch_add(size as usize, Ordering::SeqCst);
      }
    }

    pending_writes.clear();

    Ok(())
  }
}

/// Prefix `key` with the varint-encoded sequence number, the way every record
/// key is stored on disk.
pub(crate) fn log_record_key_with_seq(key: Vec<u8>, seq_no: usize) -> Vec<u8> {
  let mut enc_key = BytesMut::new();
  encode_length_delimiter(seq_no, &mut enc_key).expect("failed to encode sequence number");
  enc_key.extend_from_slice(&key);
  enc_key.to_vec()
}

/// Split a stored key into the user key and its sequence number.
pub(crate) fn parse_log_record_key(key: Vec<u8>) -> Result<(Vec<u8>, usize)> {
  let mut buf = BytesMut::new();
  buf.put_slice(&key);
  let seq_no = decode_length_delimiter(&mut buf).map_err(|_| Errors::DataDirectoryCorrupted)?;
  Ok((buf.to_vec(), seq_no))
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use crate::{
    option::Options,
    util::rand_kv::{get_test_key, get_test_value},
  };

  use super::*;

  #[test]
  fn test_write_batch_commit_then_visible() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    let wb = engine
      .new_write_batch(WriteBatchOptions::default())
      .expect("failed to create write batch");

    // uncommitted puts stay invisible
    wb.put(get_test_key(1), get_test_value(10)).unwrap();
    wb.put(get_test_key(2), get_test_value(20)).unwrap();
    let res1 = engine.get(get_test_key(1));
    assert_eq!(Errors::KeyNotFound, res1.err().unwrap());

    wb.commit().expect("failed to commit");
    let res2 = engine.get(get_test_key(1));
    assert_eq!(get_test_value(10), res2.unwrap());

    let seq_no = engine.seq_no.load(Ordering::SeqCst);
    assert_eq!(1, seq_no);
  }

  #[test]
  fn test_write_batch_mixed_ops_and_reopen() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    engine
      .put(Bytes::from("a"), Bytes::from("1"))
      .expect("failed to put");

    let wb = engine
      .new_write_batch(WriteBatchOptions::default())
      .expect("failed to create write batch");
    wb.put(Bytes::from("b"), Bytes::from("2")).unwrap();
    wb.delete(Bytes::from("a")).unwrap();

    // nothing moved yet
    assert_eq!(engine.get(Bytes::from("a")).unwrap(), Bytes::from("1"));
    assert_eq!(
      engine.get(Bytes::from("b")).err().unwrap(),
      Errors::KeyNotFound
    );

    wb.commit().expect("failed to commit");
    assert_eq!(
      engine.get(Bytes::from("a")).err().unwrap(),
      Errors::KeyNotFound
    );
    assert_eq!(engine.get(Bytes::from("b")).unwrap(), Bytes::from("2"));

    // the batch survives a restart, sequence number included
    engine.close().expect("failed to close");
    std::mem::drop(engine);
    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert_eq!(
      engine2.get(Bytes::from("a")).err().unwrap(),
      Errors::KeyNotFound
    );
    assert_eq!(engine2.get(Bytes::from("b")).unwrap(), Bytes::from("2"));
    assert_eq!(1, engine2.seq_no.load(Ordering::SeqCst));
  }

  #[test]
  fn test_write_batch_sequence_across_restart() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    let wb = engine
      .new_write_batch(WriteBatchOptions::default())
      .expect("failed to create write batch");
    wb.put(get_test_key(1), get_test_value(10)).unwrap();
    wb.put(get_test_key(2), get_test_value(20)).unwrap();
    wb.commit().expect("failed to commit");

    wb.put(get_test_key(3), get_test_value(30)).unwrap();
    wb.commit().expect("failed to commit");

    engine.close().expect("failed to close");
    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    let keys = engine2.list_keys().unwrap();
    assert_eq!(3, keys.len());
    assert_eq!(2, engine2.seq_no.load(Ordering::SeqCst));
  }

  #[test]
  fn test_write_batch_exceeds_max_batch_num() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt).expect("failed to open engine");

    let mut wb_opts = WriteBatchOptions::default();
    wb_opts.max_batch_num = 10;
    let wb = engine
      .new_write_batch(wb_opts)
      .expect("failed to create write batch");

    for i in 0..=10 {
      wb.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    assert_eq!(wb.commit().err().unwrap(), Errors::ExceedMaxBatchNum);
  }

  #[test]
  fn test_write_batch_without_terminator_is_dropped() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    // simulate a crash mid-batch: records carry a sequence number but the
    // terminator never lands
    for i in 0..10 {
      let mut record = LogRecord {
        key: log_record_key_with_seq(get_test_key(i).to_vec(), 7),
        value: get_test_value(i).to_vec(),
        rec_type: LogRecordType::Normal,
      };
      engine
        .append_log_record(&mut record)
        .expect("failed to append record");
    }

    engine.close().expect("failed to close");
    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    for i in 0..10 {
      let res = engine2.get(get_test_key(i));
      assert_eq!(Errors::KeyNotFound, res.err().unwrap());
    }
    assert_eq!(10, engine2.uncommitted_record_count());
    // the dangling sequence number is still observed, never reissued
    assert!(engine2.seq_no.load(Ordering::SeqCst) >= 7);
  }

  #[test]
  fn test_write_batch_large_commit() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opt = Options::default();
    opt.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    let mut wb_opts = WriteBatchOptions::default();
    wb_opts.max_batch_num = 1000000;
    let wb = engine
      .new_write_batch(wb_opts)
      .expect("failed to create write batch");

    for i in 0..100000 {
      wb.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    wb.commit().expect("failed to commit");

    assert_eq!(engine.list_keys().unwrap().len(), 100000);
  }
}
