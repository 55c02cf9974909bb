//! In-process quota store.

pub mod store;

pub use store::MemoryQuotaStore;
