use std::{
  fs,
  path::{Path, PathBuf},
  sync::atomic::Ordering,
};

use log::error;

use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO},
  data::{
    data_file::{
      get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
      MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
    },
    log_record::{decode_log_record_pos, LogRecord, LogRecordType},
  },
  db::{Engine, FILE_LOCK_NAME},
  errors::{Errors, Result},
  option::{IOManagerType, IndexType},
  util,
};

const MERGE_DIR_NAME: &str = "merge";
const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

impl Engine {
  /// Rewrites all live records into a sibling `-merge` directory, leaving a
  /// hint file and a completion marker behind. The output is swapped in on
  /// the next open, so foreground writes keep flowing while the rewrite runs.
  ///
  /// # Errors
  ///
  /// `MergeInProgress` when a merge is already running, `MergeRatioUnreached`
  /// when the reclaimable fraction is below the configured ratio, and
  /// `NoEnoughSpaceForMerge` when the surviving data would not fit on disk.
  pub fn merge(&self) -> Result<()> {
    if self.is_engine_empty() {
      return Ok(());
    }

    let lock = self.merging_lock.try_lock();
    if lock.is_none() {
      return Err(Errors::MergeInProgress);
    }

    let reclaim_size = self.reclaim_size.load(Ordering::SeqCst);
    let total_size = util::file::dir_disk_size(&self.options.dir_path);
    let ratio = reclaim_size as f32 / total_size as f32;
    if ratio < self.options.data_file_merge_ratio {
      return Err(Errors::MergeRatioUnreached);
    }

    let available_space = util::file::available_disk_space(&self.options.dir_path);
    if total_size.saturating_sub(reclaim_size as u64) >= available_space {
      return Err(Errors::NoEnoughSpaceForMerge);
    }

    let merge_path = get_merge_path(&self.options.dir_path);

    // leftovers from an interrupted merge are worthless
    if merge_path.is_dir() {
      if let Err(e) = fs::remove_dir_all(merge_path.clone()) {
        error!("failed to clear the merge directory error: {e}");
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }
    if let Err(e) = fs::create_dir_all(merge_path.clone()) {
      error!("failed to create the merge directory error: {e}");
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    let merge_files = self.rotate_merge_files()?;

    let mut merge_db_opts = (*self.options).clone();
    merge_db_opts.dir_path = merge_path.clone();
    merge_db_opts.sync_writes = false;
    merge_db_opts.mmap_at_startup = false;
    // the rewrite engine only appends; its index never needs to persist
    merge_db_opts.index_type = IndexType::BTree;
    let merge_db = Engine::open(merge_db_opts)?;

    let hint_file = DataFile::new_hint_file(&merge_path)?;

    // ascending file order keeps the rewrite sequential
    for data_file in merge_files.iter() {
      let mut offset = 0;
      loop {
        let (mut log_record, size) = match data_file.read_log_record(offset) {
          Ok(result) => (result.record, result.size),
          Err(e) => {
            if e == Errors::ReadDataFileEOF {
              break;
            }
            return Err(e);
          }
        };

        // a record is live iff the index still points at this exact position
        let (real_key, _) = parse_log_record_key(log_record.key.clone())?;
        if let Some(index_pos) = self.index.get(real_key.clone()) {
          if index_pos.file_id == data_file.get_file_id() && index_pos.offset == offset {
            // committed long ago, the batch prefix has served its purpose
            log_record.key = log_record_key_with_seq(real_key.clone(), NON_TXN_SEQ_NO);
            let log_record_pos = merge_db.append_log_record(&mut log_record)?;
            hint_file.write_hint_record(real_key.clone(), log_record_pos)?;
          }
        }
        offset += size as u64;
      }
    }

    merge_db.sync()?;
    hint_file.sync()?;

    // data at or above this id was written after the snapshot and survives as-is
    let non_merge_file_id = merge_files
      .last()
      .expect("merge file snapshot is never empty")
      .get_file_id()
      + 1;
    let merge_fin_file = DataFile::new_merge_fin_file(&merge_path)?;
    let merge_fin_record = LogRecord {
      key: MERGE_FIN_KEY.to_vec(),
      value: non_merge_file_id.to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
    };
    let enc_record = merge_fin_record.encode();
    merge_fin_file.write(&enc_record)?;
    merge_fin_file.sync()?;

    Ok(())
  }

  fn is_engine_empty(&self) -> bool {
    let active_file = self.active_data_file.read();
    let old_files = self.old_data_files.read();
    active_file.get_write_off() == 0 && old_files.is_empty()
  }

  /// Rotate the active file so the merge works on a frozen snapshot, and
  /// return fresh read handles for every file in that snapshot.
  fn rotate_merge_files(&self) -> Result<Vec<DataFile>> {
    let mut merge_file_ids = Vec::new();
    let mut old_files = self.old_data_files.write();
    for fid in old_files.keys() {
      merge_file_ids.push(*fid);
    }

    let mut active_file = self.active_data_file.write();
    active_file.sync()?;
    let active_file_id = active_file.get_file_id();
    let new_active_file = DataFile::new(
      &self.options.dir_path,
      active_file_id + 1,
      IOManagerType::StandardFileIO,
    )?;
    *active_file = new_active_file;

    let old_file = DataFile::new(
      &self.options.dir_path,
      active_file_id,
      IOManagerType::StandardFileIO,
    )?;
    old_files.insert(active_file_id, old_file);
    merge_file_ids.push(active_file_id);

    merge_file_ids.sort();

    let mut merge_files = Vec::new();
    for file_id in merge_file_ids {
      let data_file = DataFile::new(
        &self.options.dir_path,
        file_id,
        IOManagerType::StandardFileIO,
      )?;
      merge_files.push(data_file);
    }

    Ok(merge_files)
  }

  /// Replay the hint file left by the last merge straight into the index,
  /// skipping the full scan of the merged data files.
  pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
    let hint_file_name = self.options.dir_path.join(HINT_FILE_NAME);
    if !hint_file_name.is_file() {
      return Ok(());
    }

    let hint_file = DataFile::new_hint_file(&self.options.dir_path)?;
    let mut offset = 0;
    loop {
      let (log_record, size) = match hint_file.read_log_record(offset) {
        Ok(result) => (result.record, result.size),
        Err(e) => {
          if e == Errors::ReadDataFileEOF {
            break;
          }
          return Err(e);
        }
      };

      let log_record_pos = decode_log_record_pos(log_record.value)?;
      self.index.put(log_record.key, log_record_pos);

      offset += size as u64;
    }

    Ok(())
  }
}

fn get_merge_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  let file_name = dir_path.as_ref().file_name().expect("data dir has a name");
  let merge_name = format!("{}-{}", file_name.to_string_lossy(), MERGE_DIR_NAME);
  let parent = dir_path.as_ref().parent().expect("data dir has a parent");
  parent.to_path_buf().join(merge_name)
}

/// Import a finished merge: verify the marker, drop the live files it
/// replaced, move the merge output into the data directory and discard the
/// workspace. An unfinished workspace is simply removed.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let merge_path = get_merge_path(&dir_path);
  if !merge_path.is_dir() {
    return Ok(());
  }

  let dir = match fs::read_dir(&merge_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read the merge directory error: {e}");
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut merge_file_names = Vec::new();
  let mut merge_finished = false;
  for file in dir.flatten() {
    let file_os_str = file.file_name();
    let file_name = file_os_str.to_string_lossy();

    if file_name.ends_with(MERGE_FINISHED_FILE_NAME) {
      merge_finished = true;
    }

    // the rewrite engine's private files stay behind
    if file_name.ends_with(SEQ_NO_FILE_NAME) {
      continue;
    }
    if file_name.ends_with(FILE_LOCK_NAME) {
      continue;
    }
    let meta = match file.metadata() {
      Ok(meta) => meta,
      Err(_) => continue,
    };
    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) && meta.len() == 0 {
      continue;
    }

    merge_file_names.push(file.file_name());
  }

  if !merge_finished {
    if let Err(e) = fs::remove_dir_all(merge_path.clone()) {
      error!("failed to remove the unfinished merge directory error: {e}");
      return Err(Errors::FailedToReadDatabaseDir);
    }
    return Ok(());
  }

  let merge_fin_file = DataFile::new_merge_fin_file(&merge_path)?;
  let merge_fin_record = merge_fin_file.read_log_record(0)?;
  let v = String::from_utf8(merge_fin_record.record.value)
    .map_err(|_| Errors::DataDirectoryCorrupted)?;
  let non_merge_file_id = v.parse::<u32>().map_err(|_| Errors::DataDirectoryCorrupted)?;

  // everything below the marker id has been rewritten, drop the originals
  for fid in 0..non_merge_file_id {
    let file = get_data_file_name(&dir_path, fid);
    if file.is_file() {
      if let Err(e) = fs::remove_file(file) {
        error!("failed to remove a merged data file error: {e}");
        return Err(Errors::FailedToReadDatabaseDir);
      }
    }
  }

  for file_name in merge_file_names {
    let src_path = merge_path.join(&file_name);
    let dst_path = dir_path.as_ref().join(&file_name);
    if let Err(e) = fs::rename(src_path, dst_path) {
      error!("failed to move a merge output file error: {e}");
      return Err(Errors::FailedToReadDatabaseDir);
    }
  }

  if let Err(e) = fs::remove_dir_all(merge_path.clone()) {
    error!("failed to remove the merge directory error: {e}");
    return Err(Errors::FailedToReadDatabaseDir);
  }

  Ok(())
}
