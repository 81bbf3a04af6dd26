pub mod storage_entry;

pub use storage_entry::StorageEntry;
