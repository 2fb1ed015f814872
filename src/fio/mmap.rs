use std::{fs::OpenOptions, path::Path, sync::Arc};

use log::error;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped I/O, used for the startup scan. Mapping an empty
/// file is invalid on most platforms, so a zero-length file maps to `None`
/// and every read reports end of stream.
pub struct MMapIO {
  map: Arc<Mutex<Option<Mmap>>>,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => {
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let map = if len == 0 {
          None
        } else {
          match unsafe { Mmap::map(&file) } {
            Ok(map) => Some(map),
            Err(e) => {
              error!("failed to map data file error: {e}");
              return Err(Errors::FailedToOpenDataFile);
            }
          }
        };
        Ok(MMapIO {
          map: Arc::new(Mutex::new(map)),
        })
      }
      Err(e) => {
        error!("failed to open data file error: {e}");
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let map_guard = self.map.lock();
    let map_arr = match map_guard.as_ref() {
      Some(map) => map,
      None => return Err(Errors::ReadDataFileEOF),
    };

    let end = offset + buf.len() as u64;
    if end > map_arr.len() as u64 {
      return Err(Errors::ReadDataFileEOF);
    }

    let val = &map_arr[offset as usize..end as usize];
    buf.copy_from_slice(val);

    Ok(val.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    unimplemented!("memory mapped files are read-only")
  }

  fn sync(&self) -> Result<()> {
    unimplemented!("memory mapped files are read-only")
  }

  fn size(&self) -> u64 {
    let map_guard = self.map.lock();
    match map_guard.as_ref() {
      Some(map) => map.len() as u64,
      None => 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use crate::fio::file_io::FileIO;

  use super::*;

  #[test]
  fn test_mmap_read() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let path = temp_dir.path().join("mmap-read.data");

    // empty file: every read is EOF
    let mmap_io1 = MMapIO::new(&path).expect("failed to map file");
    let mut buf1 = [0u8; 10];
    let read_res1 = mmap_io1.read(&mut buf1, 0);
    assert_eq!(read_res1.err().unwrap(), Errors::ReadDataFileEOF);

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"hello world").unwrap();
    fio.write(b"good morning").unwrap();
    fio.write(b"see you again").unwrap();
    fio.sync().unwrap();

    let mmap_io2 = MMapIO::new(&path).expect("failed to map file");
    let mut buf2 = [0u8; 11];
    let read_res2 = mmap_io2.read(&mut buf2, 0);
    assert_eq!(read_res2.unwrap(), 11);
    assert_eq!(&buf2, b"hello world");

    // reads past the mapped length report EOF
    let mut buf3 = [0u8; 64];
    let read_res3 = mmap_io2.read(&mut buf3, 0);
    assert_eq!(read_res3.err().unwrap(), Errors::ReadDataFileEOF);
  }

  #[test]
  fn test_mmap_size() {
    let temp_dir = tempdir().expect("failed to create temp dir");
    let path = temp_dir.path().join("mmap-size.data");

    let mmap_io1 = MMapIO::new(&path).expect("failed to map file");
    assert_eq!(mmap_io1.size(), 0);

    let fio = FileIO::new(&path).expect("failed to open file");
    fio.write(b"hello world").unwrap();
    fio.sync().unwrap();

    let mmap_io2 = MMapIO::new(&path).expect("failed to map file");
    assert_eq!(mmap_io2.size(), 11);
  }
}
