use std::{path::Path, sync::Arc};

use bytes::Bytes;
use jammdb::DB;

use crate::{
  data::log_record::{decode_log_record_pos, LogRecordPos},
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer};

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BPTREE_BUCKET_NAME: &str = "cinder-index";

/// Persistent B+ tree index, a thin wrapper over a jammdb bucket stored next
/// to the data files. Because the mapping survives restarts, an engine using
/// this variant skips log replay at open.
///
/// The index store is a process-fatal dependency: a fault inside it leaves no
/// sane way to continue, so internal errors panic rather than propagate.
pub struct BPlusTree {
  tree: Arc<DB>,
}

impl BPlusTree {
  pub fn new<P>(dir_path: P) -> Self
  where
    P: AsRef<Path>,
  {
    let tree =
      DB::open(dir_path.as_ref().join(BPTREE_INDEX_FILE_NAME)).expect("failed to open bptree");

    let tx = tree
      .tx(true)
      .expect("failed to begin a transaction in bptree");
    tx.get_or_create_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to create bucket in bptree");
    tx.commit().expect("failed to commit transaction in bptree");

    Self {
      tree: Arc::new(tree),
    }
  }
}

impl Indexer for BPlusTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let tx = self
      .tree
      .tx(true)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    let old_pos = bucket.get_kv(&key).map(|kv| {
      decode_log_record_pos(kv.value().to_vec()).expect("bptree holds a corrupted position")
    });
    bucket
      .put(key, pos.encode())
      .expect("failed to put key-value in bptree");
    tx.commit().expect("failed to commit transaction in bptree");

    old_pos
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let tx = self
      .tree
      .tx(false)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    bucket.get_kv(&key).map(|kv| {
      decode_log_record_pos(kv.value().to_vec()).expect("bptree holds a corrupted position")
    })
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let tx = self
      .tree
      .tx(true)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    let old_pos = bucket.get_kv(&key).map(|kv| {
      decode_log_record_pos(kv.value().to_vec()).expect("bptree holds a corrupted position")
    });
    if old_pos.is_some() {
      bucket
        .delete(key)
        .expect("failed to delete key-value in bptree");
    }
    tx.commit().expect("failed to commit transaction in bptree");

    old_pos
  }

  fn size(&self) -> usize {
    let tx = self
      .tree
      .tx(false)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    bucket.kv_pairs().count()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let tx = self
      .tree
      .tx(false)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    let keys = bucket
      .kv_pairs()
      .map(|kv| Bytes::copy_from_slice(kv.key()))
      .collect();
    Ok(keys)
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let tx = self
      .tree
      .tx(false)
      .expect("failed to begin a transaction in bptree");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get bucket in bptree");

    // read-only view of the bucket, materialised in key order
    let mut items = bucket
      .kv_pairs()
      .map(|kv| {
        let pos = decode_log_record_pos(kv.value().to_vec())
          .expect("bptree holds a corrupted position");
        (kv.key().to_vec(), pos)
      })
      .collect::<Vec<_>>();
    if options.reverse {
      items.reverse();
    }

    Box::new(BPTreeIterator {
      items,
      curr_index: 0,
      options,
    })
  }

  fn close(&self) -> Result<()> {
    // jammdb flushes on every commit; dropping the handle releases the file
    Ok(())
  }
}

pub struct BPTreeIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for BPTreeIterator {
  fn rewind(&mut self) {
    self.curr_index = 0;
  }

  fn seek(&mut self, key: Vec<u8>) {
    self.curr_index = match self.items.binary_search_by(|(x, _)| {
      if self.options.reverse {
        x.cmp(&key).reverse()
      } else {
        x.cmp(&key)
      }
    }) {
      Ok(equal_val) => equal_val,
      Err(insert_val) => insert_val,
    };
  }

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)> {
    while self.curr_index < self.items.len() {
      let i = self.curr_index;
      self.curr_index += 1;
      let (key, pos) = &self.items[i];
      if self.options.prefix.is_empty() || key.starts_with(&self.options.prefix) {
        return Some((key, pos));
      }
    }
    None
  }
}
