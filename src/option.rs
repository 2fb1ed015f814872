use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("cinder-kv");
}

#[derive(Debug, Clone)]
pub struct Options {
  /// Database data directory.
  pub dir_path: PathBuf,

  /// Rotation threshold for the active data file, in bytes.
  pub data_file_size: u64,

  /// Fsync on every append.
  pub sync_writes: bool,

  /// If non-zero, fsync once the accumulated unsynced bytes cross this threshold.
  pub bytes_per_sync: usize,

  pub index_type: IndexType,

  /// Use read-only memory maps for the startup scan.
  pub mmap_at_startup: bool,

  /// Minimum reclaimable fraction of the directory required for a merge to proceed.
  pub data_file_merge_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
  /// Ordered in-memory tree, the default.
  BTree,

  /// Adaptive radix tree.
  ART,

  /// Persistent on-disk B+ tree. The index survives restarts, so the log is
  /// not replayed at open.
  BPlusTree,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      data_file_size: 256 * 1024 * 1024, // 256MB
      sync_writes: false,
      bytes_per_sync: 0,
      index_type: IndexType::BTree,
      mmap_at_startup: true,
      data_file_merge_ratio: 0.5,
    }
  }
}

pub struct IteratorOptions {
  pub prefix: Vec<u8>,
  pub reverse: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for IteratorOptions {
  fn default() -> Self {
    Self {
      prefix: Default::default(),
      reverse: false,
    }
  }
}

pub struct WriteBatchOptions {
  pub max_batch_num: usize,

  pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
  fn default() -> Self {
    Self {
      max_batch_num: 10000,
      sync_writes: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
