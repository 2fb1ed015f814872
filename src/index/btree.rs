use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer};

/// Default index: an ordered in-memory tree behind a reader-writer lock.
pub struct BTree {
  tree: Arc<RwLock<BTreeMap<Vec<u8>, LogRecordPos>>>,
}

impl BTree {
  pub fn new() -> Self {
    Self {
      tree: Arc::new(RwLock::new(BTreeMap::new())),
    }
  }
}

impl Default for BTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for BTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.insert(key, pos)
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let read_guard = self.tree.read();
    read_guard.get(&key).copied()
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.remove(&key)
  }

  fn size(&self) -> usize {
    let read_guard = self.tree.read();
    read_guard.len()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let read_guard = self.tree.read();
    let keys = read_guard
      .keys()
      .map(|k| Bytes::copy_from_slice(k))
      .collect();
    Ok(keys)
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let read_guard = self.tree.read();

    // ordered snapshot of the tree at iterator creation time
    let mut items = read_guard
      .iter()
      .map(|(key, pos)| (key.clone(), *pos))
      .collect::<Vec<_>>();
    if options.reverse {
      items.reverse();
    }

    Box::new(BTreeIterator {
      items,
      curr_index: 0,
      options,
    })
  }

  fn close(&self) -> Result<()> {
    Ok(())
  }
}

pub struct BTreeIterator {
  /// (key, position) pairs in traversal order.
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for BTreeIterator {
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

#[cfg(test)]
mod tests {
  use super::*;

  fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos {
      file_id,
      offset,
      size: 10,
    }
  }

  #[test]
  fn test_btree_put_get() {
    let bt = BTree::new();

    assert!(bt.put(b"key-a".to_vec(), pos(1, 10)).is_none());
    assert!(bt.put(b"key-b".to_vec(), pos(1, 20)).is_none());

    let got = bt.get(b"key-a".to_vec()).unwrap();
    assert_eq!(got.file_id, 1);
    assert_eq!(got.offset, 10);

    // replace returns the displaced entry
    let old = bt.put(b"key-a".to_vec(), pos(2, 0)).unwrap();
    assert_eq!(old.offset, 10);
    assert_eq!(bt.get(b"key-a".to_vec()).unwrap().file_id, 2);

    assert!(bt.get(b"key-c".to_vec()).is_none());
  }

  #[test]
  fn test_btree_delete() {
    let bt = BTree::new();

    bt.put(b"key-a".to_vec(), pos(1, 10));
    let old = bt.delete(b"key-a".to_vec()).unwrap();
    assert_eq!(old.offset, 10);
    assert!(bt.get(b"key-a".to_vec()).is_none());

    assert!(bt.delete(b"not-exist".to_vec()).is_none());
  }

  #[test]
  fn test_btree_size_and_list_keys() {
    let bt = BTree::new();
    assert_eq!(bt.size(), 0);

    bt.put(b"bb".to_vec(), pos(1, 1));
    bt.put(b"aa".to_vec(), pos(1, 2));
    bt.put(b"cc".to_vec(), pos(1, 3));
    assert_eq!(bt.size(), 3);

    let keys = bt.list_keys().unwrap();
    assert_eq!(keys, vec![Bytes::from("aa"), Bytes::from("bb"), Bytes::from("cc")]);
  }

  #[test]
  fn test_btree_iterator() {
    let bt = BTree::new();
    bt.put(b"ccde".to_vec(), pos(1, 1));
    bt.put(b"aade".to_vec(), pos(1, 2));
    bt.put(b"bbed".to_vec(), pos(1, 3));
    bt.put(b"cadd".to_vec(), pos(1, 4));

    // forward, strictly increasing
    let mut iter1 = bt.iterator(IteratorOptions::default());
    let mut last = Vec::new();
    while let Some((key, _)) = iter1.next() {
      assert!(*key > last);
      last = key.clone();
    }

    // reverse, strictly decreasing
    let mut iter2 = bt.iterator(IteratorOptions {
      prefix: Vec::new(),
      reverse: true,
    });
    let mut last = b"zzzz".to_vec();
    while let Some((key, _)) = iter2.next() {
      assert!(*key < last);
      last = key.clone();
    }

    // seek lands on the first key >= target
    let mut iter3 = bt.iterator(IteratorOptions::default());
    iter3.seek(b"bb".to_vec());
    let (key, _) = iter3.next().unwrap();
    assert_eq!(key, &b"bbed".to_vec());

    // prefix filter
    let mut iter4 = bt.iterator(IteratorOptions {
      prefix: b"c".to_vec(),
      reverse: false,
    });
    let mut count = 0;
    while let Some((key, _)) = iter4.next() {
      assert!(key.starts_with(b"c"));
      count += 1;
    }
    assert_eq!(count, 2);

    // rewind restarts the traversal
    iter3.rewind();
    assert_eq!(iter3.next().unwrap().0, &b"aade".to_vec());
  }
}
