//! Storage: per-type append-only logs and the in-memory indexed snapshot

pub mod compaction;
pub mod index;
pub mod log;

pub use compaction::CompactReport;
pub use index::IndexedStore;
pub use log::{LogOptions, LogStore};
