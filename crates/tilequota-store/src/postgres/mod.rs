//! PostgreSQL quota store.

pub mod store;

pub use store::PgQuotaStore;
