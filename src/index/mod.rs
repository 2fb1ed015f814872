pub mod art;
pub mod bptree;
pub mod btree;

use std::path::Path;

use bytes::Bytes;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::{IndexType, IteratorOptions},
};

/// The in-memory key directory: an ordered mapping from key bytes to the
/// position of the key's most recent record.
pub trait Indexer: Sync + Send {
  /// Insert or replace; returns the displaced entry if any.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

  /// Point lookup.
  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Remove; returns the removed entry if any.
  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Current key count.
  fn size(&self) -> usize;

  /// Snapshot of all keys in byte-lexicographic order.
  fn list_keys(&self) -> Result<Vec<Bytes>>;

  /// Ordered traversal honouring the prefix/reverse options.
  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator>;

  /// Release resources; a no-op for the in-memory variants.
  fn close(&self) -> Result<()>;
}

pub fn new_indexer<P>(index_type: &IndexType, dir_path: P) -> Box<dyn Indexer>
where
  P: AsRef<Path>,
{
  match *index_type {
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::ART => Box::new(art::AdaptiveRadixTree::new()),
    IndexType::BPlusTree => Box::new(bptree::BPlusTree::new(dir_path)),
  }
}

/// Ordered traversal over index entries.
///
/// `seek` positions at the first key >= the target, or <= when the iterator
/// is reversed; `next` yields entries until the traversal is exhausted.
pub trait IndexIterator: Sync + Send {
  /// Back to the first entry of the traversal.
  fn rewind(&mut self);

  fn seek(&mut self, key: Vec<u8>);

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)>;
}
