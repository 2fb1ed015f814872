//! CinderKV: an embeddable key-value storage engine in the bitcask style.
//!
//! The engine keeps an append-only log of record files on disk and an
//! in-memory directory mapping each live key to the file offset of its most
//! recent value. Reads are one index lookup plus one positioned read; writes
//! are one sequential append plus one index update.
//!
//! # Features
//!
//! * Atomic multi-key write batches
//! * Background compaction with a hint-file fast path for recovery
//! * Pluggable index structures (ordered tree, adaptive radix tree,
//!   persistent B+ tree)
//! * Memory-mapped startup scans
//! * A Redis-style structure layer encoded on top of the KV primitives
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use cinder_kv::{db::Engine, option::Options};
//!
//! let mut opts = Options::default();
//! opts.dir_path = std::env::temp_dir().join("cinder-kv-doc");
//! let engine = Engine::open(opts).expect("failed to open cinder-kv engine");
//!
//! let key = Bytes::from(b"hello".to_vec());
//! let value = Bytes::from(b"world".to_vec());
//! engine.put(key.clone(), value.clone()).expect("failed to put");
//!
//! let retrieved = engine.get(key.clone()).expect("failed to get");
//! assert_eq!(retrieved, value);
//!
//! engine.delete(key).expect("failed to delete");
//! ```

mod data;

mod fio;
mod index;
mod iterator;

pub mod batch;
pub mod db;
pub mod errors;
pub mod merge;
pub mod option;
pub mod redis;
pub mod util;
