use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{db::Engine, errors::Result, index::IndexIterator, option::IteratorOptions};

/// Engine-level iterator: walks the index in order and resolves each position
/// to its value through the read path. The engine's read view is only taken
/// while a value is being resolved, never across the whole traversal.
pub struct Iterator<'a> {
  index_iter: Arc<RwLock<Box<dyn IndexIterator>>>,
  engine: &'a Engine,
}

impl Engine {
  /// Creates an iterator over the live keys, honouring the prefix and
  /// direction options. The iterator must not outlive the engine.
  pub fn iter(&self, options: IteratorOptions) -> Iterator {
    Iterator {
      index_iter: Arc::new(RwLock::new(self.index.iterator(options))),
      engine: self,
    }
  }
}

impl Iterator<'_> {
  pub fn rewind(&self) {
    let mut index_iter = self.index_iter.write();
    index_iter.rewind();
  }

  pub fn seek(&self, key: Vec<u8>) {
    let mut index_iter = self.index_iter.write();
    index_iter.seek(key);
  }

  /// Advances and yields the next (key, value) pair, or `None` once the
  /// traversal is exhausted.
  pub fn next(&self) -> Option<Result<(Bytes, Bytes)>> {
    let mut index_iter = self.index_iter.write();
    let (key, pos) = index_iter.next()?;
    let key = Bytes::copy_from_slice(key);
    let pos = *pos;

    match self.engine.get_value_by_position(&pos) {
      Ok(value) => Some(Ok((key, value))),
      Err(e) => Some(Err(e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use crate::option::Options;

  use super::*;

  #[test]
  fn test_iterator_ordering() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opts = Options::default();
    opts.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opts).expect("failed to open engine");

    engine.put(Bytes::from("ccde"), Bytes::from("v3")).unwrap();
    engine.put(Bytes::from("aade"), Bytes::from("v1")).unwrap();
    engine.put(Bytes::from("bbed"), Bytes::from("v2")).unwrap();

    // forward: strictly increasing
    let iter = engine.iter(IteratorOptions::default());
    let mut collected = Vec::new();
    while let Some(item) = iter.next() {
      let (key, _) = item.unwrap();
      collected.push(key);
    }
    assert_eq!(
      collected,
      vec![Bytes::from("aade"), Bytes::from("bbed"), Bytes::from("ccde")]
    );

    // reverse: strictly decreasing
    let rev_iter = engine.iter(IteratorOptions {
      prefix: Vec::new(),
      reverse: true,
    });
    let mut collected = Vec::new();
    while let Some(item) = rev_iter.next() {
      let (key, _) = item.unwrap();
      collected.push(key);
    }
    assert_eq!(
      collected,
      vec![Bytes::from("ccde"), Bytes::from("bbed"), Bytes::from("aade")]
    );
  }

  #[test]
  fn test_iterator_seek_and_rewind() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opts = Options::default();
    opts.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opts).expect("failed to open engine");

    engine.put(Bytes::from("aade"), Bytes::from("v1")).unwrap();
    engine.put(Bytes::from("bbed"), Bytes::from("v2")).unwrap();
    engine.put(Bytes::from("ccde"), Bytes::from("v3")).unwrap();

    let iter = engine.iter(IteratorOptions::default());
    iter.seek(b"bb".to_vec());
    let (key, value) = iter.next().unwrap().unwrap();
    assert_eq!(key, Bytes::from("bbed"));
    assert_eq!(value, Bytes::from("v2"));

    iter.rewind();
    let (key, _) = iter.next().unwrap().unwrap();
    assert_eq!(key, Bytes::from("aade"));
  }

  #[test]
  fn test_iterator_prefix() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opts = Options::default();
    opts.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opts).expect("failed to open engine");

    engine.put(Bytes::from("apple"), Bytes::from("v1")).unwrap();
    engine.put(Bytes::from("apricot"), Bytes::from("v2")).unwrap();
    engine.put(Bytes::from("banana"), Bytes::from("v3")).unwrap();

    let iter = engine.iter(IteratorOptions {
      prefix: b"ap".to_vec(),
      reverse: false,
    });
    let mut count = 0;
    while let Some(item) = iter.next() {
      let (key, _) = item.unwrap();
      assert!(key.starts_with(b"ap"));
      count += 1;
    }
    assert_eq!(count, 2);
  }

  #[test]
  fn test_iterator_empty_engine() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let mut opts = Options::default();
    opts.dir_path = temp_dir.path().to_path_buf();
    let engine = Engine::open(opts).expect("failed to open engine");

    let iter = engine.iter(IteratorOptions::default());
    assert!(iter.next().is_none());
  }
}
