use thiserror::Error;

/// Every failure the public API can surface.
///
/// Variants carry no payload so results stay cheaply comparable; the
/// underlying OS error, where one exists, is logged at the site that maps it.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Errors {
  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key is not found in database")]
  KeyNotFound,

  #[error("data file is not found in database")]
  DataFileNotFound,

  #[error("the database directory maybe corrupted")]
  DataDirectoryCorrupted,

  #[error("exceed the max batch num")]
  ExceedMaxBatchNum,

  #[error("merge is in progress, try again later")]
  MergeInProgress,

  #[error("the merge ratio option is unreached")]
  MergeRatioUnreached,

  #[error("no enough disk space for merge")]
  NoEnoughSpaceForMerge,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidLogRecordCrc,

  #[error("failed to update index")]
  IndexUpdateFailed,

  // internal sentinel for the record readers, never returned by the public API
  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("failed to copy the database directory")]
  FailedToCopyDirectory,

  #[error("the database dir path is empty")]
  DirPathIsEmpty,

  #[error("the data file size must be greater than 0")]
  DataFileSizeTooSmall,

  #[error("the merge ratio must be between 0 and 1")]
  InvalidMergeRatio,

  #[error("the write batch is unavailable, close the database and reopen it")]
  UnableToUseWriteBatch,

  #[error("operation against a key holding the wrong kind of value")]
  WrongTypeOperation,
}

pub type Result<T> = std::result::Result<T, Errors>;
