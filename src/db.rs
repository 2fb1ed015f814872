use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO},
  data::{
    data_file::{DataFile, DATA_FILE_NAME_SUFFIX, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME},
    log_record::{LogRecord, LogRecordPos, LogRecordType, TransactionRecord},
  },
  errors::{Errors, Result},
  index,
  merge::load_merge_files,
  option::{IOManagerType, IndexType, Options},
  util,
};
use bytes::Bytes;
use fs2::FileExt;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};
use std::{
  collections::HashMap,
  fs::{self, File},
  path::Path,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

const INITIAL_FILE_ID: u32 = 0;
const SEQ_NO_KEY: &str = "seq.no";
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// The storage engine: an append-only log of data files plus an in-memory
/// directory mapping each live key to the position of its newest record.
///
/// All mutating operations funnel through [`Engine::append_log_record`],
/// which serialises appends and file rotation; the index carries its own
/// synchronisation for point operations.
pub struct Engine {
  pub(crate) options: Arc<Options>,
  pub(crate) active_data_file: Arc<RwLock<DataFile>>, // the only file open for writes
  pub(crate) old_data_files: Arc<RwLock<HashMap<u32, DataFile>>>, // immutable, read-only
  pub(crate) index: Box<dyn index::Indexer>,
  file_ids: Vec<u32>, // ids found at open, in ascending order; used only by startup replay
  pub(crate) batch_commit_lock: Mutex<()>, // serialises batch commits
  pub(crate) seq_no: Arc<AtomicUsize>, // last transaction sequence number handed out
  pub(crate) merging_lock: Mutex<()>, // at most one merge at a time
  pub(crate) seq_file_exists: bool,
  pub(crate) is_initial: bool,
  lock_file: File, // advisory lock guaranteeing single-process ownership of the directory
  is_closed: AtomicBool,
  bytes_write: Arc<AtomicUsize>, // bytes appended since the last sync
  pub(crate) reclaim_size: Arc<AtomicUsize>, // bytes superseded but not yet merged away
  uncommitted_count: AtomicUsize, // records whose batch terminator never arrived
}

/// A point-in-time summary of the engine state.
#[derive(Debug, Clone)]
pub struct Stat {
  /// Number of live keys.
  pub key_count: usize,

  /// Number of data files on disk.
  pub data_file_count: usize,

  /// Bytes that a merge could reclaim.
  pub reclaimable_size: usize,

  /// Total size of the data directory on disk in bytes.
  pub disk_size: u64,
}

impl Engine {
  /// Opens a storage engine instance.
  ///
  /// Creates the directory when missing, takes the directory lock, imports a
  /// finished merge if one is waiting, loads the data files and rebuilds the
  /// in-memory index (except for the persistent B+ tree variant, which
  /// survives restarts on its own).
  ///
  /// # Errors
  ///
  /// Returns `DatabaseIsUsing` when another process holds the directory, and
  /// surfaces any validation or I/O failure encountered while loading.
  pub fn open(opts: Options) -> Result<Self> {
    if let Some(e) = check_options(&opts) {
      return Err(e);
    };
    let mut is_initial = false;
    let options = Arc::new(opts);

    let dir_path = &options.dir_path;
    if !dir_path.is_dir() {
      is_initial = true;
      if let Err(e) = fs::create_dir_all(dir_path.as_path()) {
        warn!("failed to create database directory error: {e}");
        return Err(Errors::FailedToCreateDatabaseDir);
      };
    }
    match fs::read_dir(dir_path) {
      Ok(entry) => {
        if entry.count() == 0 {
          is_initial = true;
        }
      }
      Err(_) => return Err(Errors::FailedToReadDatabaseDir),
    }

    let lock_file = fs::OpenOptions::new()
      .read(true)
      .create(true)
      .append(true)
      .open(dir_path.join(FILE_LOCK_NAME))
      .map_err(|e| {
        error!("failed to open the directory lock file error: {e}");
        Errors::FailedToOpenDataFile
      })?;
    if lock_file.try_lock_exclusive().is_err() {
      return Err(Errors::DatabaseIsUsing);
    }

    // a finished merge waiting next door is imported before anything is read
    load_merge_files(dir_path)?;

    let mut data_files = load_data_files(dir_path, options.mmap_at_startup)?;

    let mut file_ids = Vec::new();
    for v in data_files.iter() {
      file_ids.push(v.get_file_id());
    }

    // the file with the largest id becomes the active one
    data_files.reverse();
    let mut older_files = HashMap::new();
    if data_files.len() > 1 {
      for _ in 0..=data_files.len() - 2 {
        let file = data_files.pop().expect("older file list shrank unexpectedly");
        older_files.insert(file.get_file_id(), file);
      }
    }
    let active_file = match data_files.pop() {
      Some(v) => v,
      None => DataFile::new(dir_path, INITIAL_FILE_ID, IOManagerType::StandardFileIO)?,
    };

    let mut engine = Self {
      options: options.clone(),
      active_data_file: Arc::new(RwLock::new(active_file)),
      old_data_files: Arc::new(RwLock::new(older_files)),
      index: index::new_indexer(&options.index_type, &options.dir_path),
      file_ids,
      batch_commit_lock: Mutex::new(()),
      seq_no: Arc::new(AtomicUsize::new(NON_TXN_SEQ_NO)),
      merging_lock: Mutex::new(()),
      seq_file_exists: false,
      is_initial,
      lock_file,
      is_closed: AtomicBool::new(false),
      bytes_write: Arc::new(AtomicUsize::new(0)),
      reclaim_size: Arc::new(AtomicUsize::new(0)),
      uncommitted_count: AtomicUsize::new(0),
    };

    match engine.options.index_type {
      IndexType::BPlusTree => {
        // the index survives restarts; only the sequence counter and the
        // active file offset need restoring
        let (is_exists, seq_no) = engine.load_seq_no()?;
        if is_exists {
          engine.seq_no.store(seq_no, Ordering::SeqCst);
          engine.seq_file_exists = is_exists;
        }

        {
          let active_file = engine.active_data_file.write();
          active_file.set_write_off(active_file.file_size());
        }

        // the startup maps are read-only; writes need descriptor I/O back
        if engine.options.mmap_at_startup {
          engine.reset_io_type()?;
        }
      }
      _ => {
        // fast path first, then the unmerged tail of the log
        engine.load_index_from_hint_file()?;
        let curr_seq_no = engine.load_index_from_data_files()?;

        if curr_seq_no > NON_TXN_SEQ_NO {
          engine.seq_no.store(curr_seq_no, Ordering::SeqCst);
        }

        if engine.options.mmap_at_startup {
          engine.reset_io_type()?;
        }
      }
    }

    Ok(engine)
  }

  /// Closes the engine: persists the transaction sequence number, syncs the
  /// active file, closes the index and releases the directory lock. Calling
  /// `close` more than once is harmless.
  pub fn close(&self) -> Result<()> {
    if self.is_closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    if !self.options.dir_path.is_dir() {
      return Ok(());
    }

    // rewrite the sequence file from scratch so it always holds one record
    let seq_no_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
    if seq_no_path.is_file() {
      let _ = fs::remove_file(seq_no_path);
    }
    let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
    let seq_no = self.seq_no.load(Ordering::SeqCst);
    let record = LogRecord {
      key: SEQ_NO_KEY.as_bytes().to_vec(),
      value: seq_no.to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
    };
    seq_no_file.write(&record.encode())?;
    seq_no_file.sync()?;

    let read_guard = self.active_data_file.read();
    read_guard.sync()?;

    self.index.close()?;

    if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
      warn!("failed to release the directory lock error: {e}");
    }

    Ok(())
  }

  /// Flushes the active data file to persistent storage.
  pub fn sync(&self) -> Result<()> {
    let read_guard = self.active_data_file.read();
    read_guard.sync()
  }

  /// Collects statistics about the engine state.
  pub fn stat(&self) -> Result<Stat> {
    let old_files = self.old_data_files.read();

    Ok(Stat {
      key_count: self.index.size(),
      data_file_count: old_files.len() + 1,
      reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
      disk_size: util::file::dir_disk_size(&self.options.dir_path),
    })
  }

  /// Number of records seen at the last open whose batch terminator never
  /// arrived; they were dropped from recovery.
  pub fn uncommitted_record_count(&self) -> usize {
    self.uncommitted_count.load(Ordering::SeqCst)
  }

  /// Copies the data directory to `dir_path`, excluding the lock sentinel.
  pub fn backup<P>(&self, dir_path: P) -> Result<()>
  where
    P: AsRef<Path>,
  {
    // hold the read view so no rotation happens mid-copy
    let _active_guard = self.active_data_file.read();
    let exclude = &[FILE_LOCK_NAME];
    if let Err(e) = util::file::copy_dir(&self.options.dir_path, dir_path.as_ref(), exclude) {
      error!("failed to copy the data directory error: {e}");
      return Err(Errors::FailedToCopyDirectory);
    }
    Ok(())
  }

  /// Stores a key-value pair; an existing value for the key is superseded.
  ///
  /// # Errors
  ///
  /// Returns `KeyIsEmpty` for a zero-length key, or any append failure.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TXN_SEQ_NO),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };

    let log_record_pos = self.append_log_record(&mut record)?;

    // the displaced version, if any, becomes dead weight
    if let Some(old_pos) = self.index.put(key.to_vec(), log_record_pos) {
      self
        .reclaim_size
        .fetch_add(old_pos.size as usize, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Removes a key by appending a tombstone. Deleting an absent key is a
  /// no-op.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let pos = self.index.get(key.to_vec());
    if pos.is_none() {
      return Ok(());
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TXN_SEQ_NO),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };

    // the tombstone itself is dead weight from the moment it is written
    let pos = self.append_log_record(&mut record)?;
    self
      .reclaim_size
      .fetch_add(pos.size as usize, Ordering::SeqCst);

    match self.index.delete(key.to_vec()) {
      Some(old_pos) => {
        self
          .reclaim_size
          .fetch_add(old_pos.size as usize, Ordering::SeqCst);
      }
      None => return Err(Errors::IndexUpdateFailed),
    }
    Ok(())
  }

  /// Retrieves the value stored under `key`.
  ///
  /// # Errors
  ///
  /// `KeyIsEmpty` for a zero-length key, `KeyNotFound` for an absent or
  /// tombstoned key.
  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let pos = self.index.get(key.to_vec());
    if pos.is_none() {
      return Err(Errors::KeyNotFound);
    }

    self.get_value_by_position(&pos.expect("checked above"))
  }

  /// Snapshot of all live keys in byte-lexicographic order.
  pub fn list_keys(&self) -> Result<Vec<Bytes>> {
    self.index.list_keys()
  }

  /// Calls `f(key, value)` for every live pair in key order; stops early when
  /// `f` returns false.
  pub fn fold<F>(&self, mut f: F) -> Result<()>
  where
    F: FnMut(Bytes, Bytes) -> bool,
  {
    let mut index_iter = self.index.iterator(Default::default());
    while let Some((key, pos)) = index_iter.next() {
      let value = self.get_value_by_position(pos)?;
      if !f(Bytes::copy_from_slice(key), value) {
        break;
      }
    }
    Ok(())
  }

  /// Resolve a directory entry to the value bytes it points at.
  pub(crate) fn get_value_by_position(&self, log_record_pos: &LogRecordPos) -> Result<Bytes> {
    let active_file = self.active_data_file.read();
    let older_files = self.old_data_files.read();
    let log_record = match active_file.get_file_id() == log_record_pos.file_id {
      true => active_file.read_log_record(log_record_pos.offset)?.record,
      false => match older_files.get(&log_record_pos.file_id) {
        Some(data_file) => data_file.read_log_record(log_record_pos.offset)?.record,
        None => return Err(Errors::DataFileNotFound),
      },
    };

    if let LogRecordType::Deleted = log_record.rec_type {
      return Err(Errors::KeyNotFound);
    };

    Ok(log_record.value.into())
  }

  /// Append a record to the active file, rotating it first when the record
  /// would push it past the configured size bound. Returns the position the
  /// record was written at.
  pub(crate) fn append_log_record(&self, log_record: &mut LogRecord) -> Result<LogRecordPos> {
    let dir_path = &self.options.dir_path;

    let enc_record = log_record.encode();
    let record_len = enc_record.len() as u64;

    let mut active_file = self.active_data_file.write();
    if active_file.get_write_off() + record_len > self.options.data_file_size {
      active_file.sync()?;

      let current_fid = active_file.get_file_id();
      let mut old_files = self.old_data_files.write();
      let old_file = DataFile::new(dir_path, current_fid, IOManagerType::StandardFileIO)?;
      old_files.insert(current_fid, old_file);

      let new_file = DataFile::new(dir_path, current_fid + 1, IOManagerType::StandardFileIO)?;
      *active_file = new_file;
    }

    let write_off = active_file.get_write_off();
    active_file.write(&enc_record)?;

    let previous = self
      .bytes_write
      .fetch_add(enc_record.len(), Ordering::SeqCst);

    let mut need_sync = self.options.sync_writes;
    if !need_sync
      && self.options.bytes_per_sync > 0
      && previous + enc_record.len() >= self.options.bytes_per_sync
    {
      need_sync = true;
    }

    if need_sync {
      active_file.sync()?;
      self.bytes_write.store(0, Ordering::SeqCst);
    }

    Ok(LogRecordPos {
      file_id: active_file.get_file_id(),
      offset: write_off,
      size: enc_record.len() as u32,
    })
  }

  /// Rebuild the in-memory index by replaying every record in the unmerged
  /// part of the log. Batch records are staged until their terminator shows
  /// up, so a half-written batch from a crash takes no effect. Returns the
  /// largest transaction sequence number seen.
  fn load_index_from_data_files(&self) -> Result<usize> {
    let mut current_seq_no = NON_TXN_SEQ_NO;
    if self.file_ids.is_empty() {
      return Ok(current_seq_no);
    }

    // everything below the recorded non-merge id was already covered by the hint file
    let mut has_merged = false;
    let mut non_merge_fid = 0;
    let merge_fin_file = self.options.dir_path.join(MERGE_FINISHED_FILE_NAME);
    if merge_fin_file.is_file() {
      let merge_file = DataFile::new_merge_fin_file(&self.options.dir_path)?;
      let merge_fin_record = merge_file.read_log_record(0)?;
      let v = String::from_utf8(merge_fin_record.record.value)
        .map_err(|_| Errors::DataDirectoryCorrupted)?;

      non_merge_fid = v.parse::<u32>().map_err(|_| Errors::DataDirectoryCorrupted)?;
      has_merged = true;
    }

    let mut transaction_records: HashMap<usize, Vec<TransactionRecord>> = HashMap::new();

    let active_file = self.active_data_file.read();
    let old_files = self.old_data_files.read();

    for (i, file_id) in self.file_ids.iter().enumerate() {
      if has_merged && *file_id < non_merge_fid {
        continue;
      }

      let mut offset = 0;
      loop {
        let log_record_res = match *file_id == active_file.get_file_id() {
          true => active_file.read_log_record(offset),
          false => {
            let data_file = old_files.get(file_id).ok_or(Errors::DataFileNotFound)?;
            data_file.read_log_record(offset)
          }
        };

        let (mut log_record, size) = match log_record_res {
          Ok(result) => (result.record, result.size),
          Err(e) => {
            if e == Errors::ReadDataFileEOF {
              break;
            }
            return Err(e);
          }
        };

        let log_record_pos = LogRecordPos {
          file_id: *file_id,
          offset,
          size: size as u32,
        };

        let (real_key, seq_no) = parse_log_record_key(log_record.key.clone())?;
        if seq_no == NON_TXN_SEQ_NO {
          self.update_index(real_key, log_record.rec_type, log_record_pos);
        } else if log_record.rec_type == LogRecordType::TxnFinished {
          // the batch is complete, apply its staged records in order
          if let Some(records) = transaction_records.remove(&seq_no) {
            for txn_record in records.iter() {
              self.update_index(
                txn_record.record.key.clone(),
                txn_record.record.rec_type,
                txn_record.pos,
              );
            }
          }
        } else {
          log_record.key = real_key;
          transaction_records
            .entry(seq_no)
            .or_default()
            .push(TransactionRecord {
              record: log_record,
              pos: log_record_pos,
            });
        }

        if seq_no > current_seq_no {
          current_seq_no = seq_no;
        }

        offset += size as u64;
      }

      // writes resume where the replay of the newest file stopped
      if i == self.file_ids.len() - 1 {
        active_file.set_write_off(offset);
      }
    }

    // batches that never reached their terminator are dropped
    let dangling: usize = transaction_records.values().map(|v| v.len()).sum();
    if dangling > 0 {
      warn!("dropped {dangling} uncommitted transaction records during recovery");
      self.uncommitted_count.store(dangling, Ordering::SeqCst);
    }

    Ok(current_seq_no)
  }

  /// Read back the persisted sequence number, removing the file so a stale
  /// value can never be picked up twice.
  fn load_seq_no(&self) -> Result<(bool, usize)> {
    let file_name = self.options.dir_path.join(SEQ_NO_FILE_NAME);
    if !file_name.is_file() {
      return Ok((false, 0));
    }
    let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
    let record = seq_no_file.read_log_record(0)?.record;
    let v = String::from_utf8(record.value).map_err(|_| Errors::DataDirectoryCorrupted)?;
    let seq_no = v.parse::<usize>().map_err(|_| Errors::DataDirectoryCorrupted)?;

    if let Err(e) = fs::remove_file(file_name) {
      error!("failed to remove the sequence number file error: {e}");
      return Err(Errors::DataDirectoryCorrupted);
    }

    Ok((true, seq_no))
  }

  /// Apply one replayed record to the index, keeping the reclaim counter in
  /// step. Missing entries on delete are benign here: the tombstone may refer
  /// to a version that a merge already removed.
  fn update_index(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
    if rec_type == LogRecordType::Normal {
      if let Some(old_pos) = self.index.put(key.clone(), pos) {
        self
          .reclaim_size
          .fetch_add(old_pos.size as usize, Ordering::SeqCst);
      }
    }

    if rec_type == LogRecordType::Deleted {
      let mut size = pos.size;
      if let Some(old_pos) = self.index.delete(key) {
        size += old_pos.size;
      }
      self.reclaim_size.fetch_add(size as usize, Ordering::SeqCst);
    }
  }

  /// Swap every data file back to standard descriptor I/O after the
  /// memory-mapped startup scan.
  fn reset_io_type(&self) -> Result<()> {
    let mut active_file = self.active_data_file.write();
    active_file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;
    let mut old_files = self.old_data_files.write();
    for (_, file) in old_files.iter_mut() {
      file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;
    }
    Ok(())
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error while closing engine {e}");
    }
  }
}

/// Enumerate `*.data` files in the directory, parse their ids and open them
/// in ascending id order.
fn load_data_files<P>(dir_path: P, use_mmap: bool) -> Result<Vec<DataFile>>
where
  P: AsRef<Path>,
{
  let dir = match fs::read_dir(&dir_path) {
    Ok(dir) => dir,
    Err(_) => return Err(Errors::FailedToReadDatabaseDir),
  };

  let mut file_ids: Vec<u32> = Vec::new();
  let mut data_files: Vec<DataFile> = Vec::new();

  for file in dir.flatten() {
    let file_os_str = file.file_name();
    let file_name = match file_os_str.to_str() {
      Some(name) => name,
      None => continue,
    };

    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) {
      let split_names: Vec<&str> = file_name.split('.').collect();
      let file_id = match split_names[0].parse::<u32>() {
        Ok(fid) => fid,
        Err(_) => {
          return Err(Errors::DataDirectoryCorrupted);
        }
      };

      file_ids.push(file_id);
    }
  }

  if file_ids.is_empty() {
    return Ok(data_files);
  }

  file_ids.sort();

  for file_id in file_ids.iter() {
    let mut io_type = IOManagerType::StandardFileIO;
    if use_mmap {
      io_type = IOManagerType::MemoryMap;
    }
    let data_file = DataFile::new(&dir_path, *file_id, io_type)?;
    data_files.push(data_file);
  }
  Ok(data_files)
}

fn check_options(opts: &Options) -> Option<Errors> {
  let dir_path = opts.dir_path.to_str();
  if dir_path.is_none() || dir_path.expect("checked above").is_empty() {
    return Some(Errors::DirPathIsEmpty);
  }

  if opts.data_file_size == 0 {
    return Some(Errors::DataFileSizeTooSmall);
  }

  if opts.data_file_merge_ratio < 0f32 || opts.data_file_merge_ratio > 1f32 {
    return Some(Errors::InvalidMergeRatio);
  }

  None
}
