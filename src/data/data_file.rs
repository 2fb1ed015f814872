use bytes::BytesMut;
use parking_lot::RwLock;
use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use super::log_record::{
  decode_log_record_header, max_log_record_header_size, LogRecord, LogRecordPos, LogRecordType,
  ReadLogRecord, CRC_LEN,
};
use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "Hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq.no";

/// One append-only log file: its id, the current write offset and the I/O
/// manager doing the actual reads and writes. The file with the largest id is
/// the active one; all others are immutable.
pub struct DataFile {
  file_id: Arc<RwLock<u32>>,
  write_off: Arc<RwLock<u64>>,
  io_manager: Box<dyn IOManager>,
}

impl DataFile {
  /// Create or open the data file with the given id.
  pub fn new<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(&dir_path, file_id);
    Self::from_file_name(file_name, file_id, io_type)
  }

  /// Open the hint file written by the last merge.
  pub fn new_hint_file<P>(dir_path: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(HINT_FILE_NAME);
    Self::from_file_name(file_name, 0, IOManagerType::StandardFileIO)
  }

  /// Open the merge-finished marker file.
  pub fn new_merge_fin_file<P>(dir_path: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME);
    Self::from_file_name(file_name, 0, IOManagerType::StandardFileIO)
  }

  /// Open the transaction sequence number file.
  pub fn new_seq_no_file<P>(dir_path: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(SEQ_NO_FILE_NAME);
    Self::from_file_name(file_name, 0, IOManagerType::StandardFileIO)
  }

  fn from_file_name(file_name: PathBuf, file_id: u32, io_type: IOManagerType) -> Result<Self> {
    let io_manager = new_io_manager(&file_name, &io_type)?;
    Ok(Self {
      file_id: Arc::new(RwLock::new(file_id)),
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  pub fn file_size(&self) -> u64 {
    self.io_manager.size()
  }

  pub fn get_write_off(&self) -> u64 {
    let read_guard = self.write_off.read();
    *read_guard
  }

  pub fn set_write_off(&self, offset: u64) {
    let mut write_guard = self.write_off.write();
    *write_guard = offset;
  }

  pub fn get_file_id(&self) -> u32 {
    let read_guard = self.file_id.read();
    *read_guard
  }

  /// Read one log record starting at `offset`, verifying its CRC. Returns the
  /// record plus its encoded length so the caller can advance to the next one.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let file_size = self.io_manager.size();
    if offset >= file_size {
      return Err(Errors::ReadDataFileEOF);
    }

    // the last record of a file may be smaller than the widest header
    let mut header_len = max_log_record_header_size() as u64;
    if offset + header_len > file_size {
      header_len = file_size - offset;
    }

    let mut header_buf = BytesMut::zeroed(header_len as usize);
    self.io_manager.read(&mut header_buf, offset)?;

    let header = decode_log_record_header(&header_buf)?;
    let rec_type = match LogRecordType::from_u8(header.rec_type_byte) {
      Some(t) => t,
      None => return Err(Errors::DataDirectoryCorrupted),
    };

    let (key_size, value_size) = (header.key_size, header.value_size);
    let mut kv_buf = BytesMut::zeroed(key_size + value_size);
    let n_read = self
      .io_manager
      .read(&mut kv_buf, offset + header.size as u64)?;
    // a tail torn by a crash reads as a clean end of stream
    if n_read < kv_buf.len() {
      return Err(Errors::ReadDataFileEOF);
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_buf[CRC_LEN..header.size]);
    hasher.update(&kv_buf);
    if hasher.finalize() != header.crc {
      return Err(Errors::InvalidLogRecordCrc);
    }

    let log_record = LogRecord {
      key: kv_buf[..key_size].to_vec(),
      value: kv_buf[key_size..].to_vec(),
      rec_type,
    };

    Ok(ReadLogRecord {
      record: log_record,
      size: header.size + key_size + value_size,
    })
  }

  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    let n_bytes = self.io_manager.write(buf)?;

    let mut write_off = self.write_off.write();
    *write_off += n_bytes as u64;

    Ok(n_bytes)
  }

  /// Append one (key → position) entry to the hint file.
  pub fn write_hint_record(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
    let hint_record = LogRecord {
      key,
      value: pos.encode(),
      rec_type: LogRecordType::Normal,
    };
    let enc_record = hint_record.encode();
    self.write(&enc_record)?;
    Ok(())
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  /// Swap the underlying I/O; used when leaving the memory-mapped startup scan.
  pub fn set_io_manager<P>(&mut self, dir_path: P, io_type: IOManagerType) -> Result<()>
  where
    P: AsRef<Path>,
  {
    self.io_manager = new_io_manager(&get_data_file_name(dir_path, self.get_file_id()), &io_type)?;
    Ok(())
  }
}

pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  let name = format!("{file_id:09}") + DATA_FILE_NAME_SUFFIX;
  dir_path.as_ref().join(name)
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn test_new_data_file() {
    let temp_dir = tempdir().expect("failed to create temp dir");

    let data_file = DataFile::new(temp_dir.path(), 0, IOManagerType::StandardFileIO)
      .expect("failed to open data file");
    assert_eq!(data_file.get_file_id(), 0);

    // reopening the same id is fine
    let data_file2 = DataFile::new(temp_dir.path(), 0, IOManagerType::StandardFileIO)
      .expect("failed to open data file");
    assert_eq!(data_file2.get_file_id(), 0);

    let data_file3 = DataFile::new(temp_dir.path(), 160, IOManagerType::StandardFileIO)
      .expect("failed to open data file");
    assert_eq!(data_file3.get_file_id(), 160);
  }

  #[test]
  fn test_data_file_write() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let data_file = DataFile::new(temp_dir.path(), 2, IOManagerType::StandardFileIO)
      .expect("failed to open data file");

    let write_res1 = data_file.write("aaa".as_bytes());
    assert_eq!(write_res1.unwrap(), 3);
    let write_res2 = data_file.write("bbb".as_bytes());
    assert_eq!(write_res2.unwrap(), 3);
    assert_eq!(data_file.get_write_off(), 6);
  }

  #[test]
  fn test_data_file_sync() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let data_file = DataFile::new(temp_dir.path(), 3, IOManagerType::StandardFileIO)
      .expect("failed to open data file");

    assert!(data_file.sync().is_ok());
  }

  #[test]
  fn test_data_file_read_log_record() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let data_file = DataFile::new(temp_dir.path(), 600, IOManagerType::StandardFileIO)
      .expect("failed to open data file");

    let enc1 = LogRecord {
      key: "key-a".as_bytes().to_vec(),
      value: "value-a".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let buf1 = enc1.encode();
    data_file.write(&buf1).expect("failed to write record");

    let read_enc1 = data_file.read_log_record(0).expect("failed to read record");
    assert_eq!(enc1.key, read_enc1.record.key);
    assert_eq!(enc1.value, read_enc1.record.value);
    assert_eq!(enc1.rec_type, read_enc1.record.rec_type);
    assert_eq!(read_enc1.size, buf1.len());

    // several records back to back
    let enc2 = LogRecord {
      key: "key-b".as_bytes().to_vec(),
      value: "value-b".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc3 = LogRecord {
      key: "key-c".as_bytes().to_vec(),
      value: "value-c".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let buf2 = enc2.encode();
    let buf3 = enc3.encode();
    data_file.write(&buf2).expect("failed to write record");
    data_file.write(&buf3).expect("failed to write record");

    let mut offset = buf1.len() as u64;
    let read_enc2 = data_file
      .read_log_record(offset)
      .expect("failed to read record");
    assert_eq!(enc2.key, read_enc2.record.key);
    assert_eq!(enc2.value, read_enc2.record.value);

    offset += read_enc2.size as u64;
    let read_enc3 = data_file
      .read_log_record(offset)
      .expect("failed to read record");
    assert_eq!(enc3.key, read_enc3.record.key);
    assert_eq!(enc3.value, read_enc3.record.value);

    // tombstones read back with their type intact
    let enc4 = LogRecord {
      key: "key-d".as_bytes().to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    offset += read_enc3.size as u64;
    data_file.write(&enc4.encode()).expect("failed to write record");
    let read_enc4 = data_file
      .read_log_record(offset)
      .expect("failed to read record");
    assert_eq!(enc4.key, read_enc4.record.key);
    assert_eq!(read_enc4.record.rec_type, LogRecordType::Deleted);

    // reading past the last record is a clean end of stream
    offset += read_enc4.size as u64;
    let eof_res = data_file.read_log_record(offset);
    assert_eq!(eof_res.err().unwrap(), Errors::ReadDataFileEOF);
  }

  #[test]
  fn test_data_file_read_corrupted_record() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let data_file = DataFile::new(temp_dir.path(), 601, IOManagerType::StandardFileIO)
      .expect("failed to open data file");

    let rec = LogRecord {
      key: "key-a".as_bytes().to_vec(),
      value: "value-a".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let mut enc = rec.encode();
    // flip a bit in the value tail
    let last = enc.len() - 1;
    enc[last] ^= 0xff;
    data_file.write(&enc).expect("failed to write record");

    let res = data_file.read_log_record(0);
    assert_eq!(res.err().unwrap(), Errors::InvalidLogRecordCrc);
  }
}
