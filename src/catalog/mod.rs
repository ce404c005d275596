//! Catalog layer: the per-destination single-file index plus the
//! per-profile Faub directory catalog.

pub mod entry;
pub mod faub_cache;
pub mod faub_entry;
pub mod single_file;

pub use entry::{BackupEntry, Fingerprint};
pub use faub_cache::FaubCache;
pub use faub_entry::{DiskStats, FaubEntry};
pub use single_file::BackupCache;
