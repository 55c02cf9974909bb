//! # tilequota-database
//!
//! PostgreSQL connection management, embedded migrations and the
//! repositories backing the persistent quota store.

pub mod connection;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
