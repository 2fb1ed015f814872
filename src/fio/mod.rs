pub mod file_io;
pub mod mmap;

use std::path::Path;

use crate::{errors::Result, option::IOManagerType};

use self::{file_io::FileIO, mmap::MMapIO};

/// Abstract I/O management interface over one file.
///
/// Two implementations exist: standard descriptor I/O, and a read-only
/// memory map used for the startup scan.
pub trait IOManager: Sync + Send {
  /// Positioned read into `buf` starting at `offset`; returns the number of
  /// bytes actually read.
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

  /// Append `buf` at the end of the file; returns the number of bytes written.
  fn write(&self, buf: &[u8]) -> Result<usize>;

  /// Flush OS buffers for this file.
  fn sync(&self) -> Result<()>;

  fn size(&self) -> u64;
}

pub fn new_io_manager<P>(filename: P, io_type: &IOManagerType) -> Result<Box<dyn IOManager>>
where
  P: AsRef<Path>,
{
  match *io_type {
    IOManagerType::StandardFileIO => Ok(Box::new(FileIO::new(filename)?)),
    IOManagerType::MemoryMap => Ok(Box::new(MMapIO::new(filename)?)),
  }
}
