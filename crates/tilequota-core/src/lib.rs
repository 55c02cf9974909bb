//! # tilequota-core
//!
//! Core crate for tilequota. Contains the unified error system, the
//! configuration schemas, the clock abstraction, byte-quota and grid value
//! types, and the traits through which the engine talks to the surrounding
//! tile-cache server (layer catalog, tile truncation).
//!
//! This crate has **no** internal dependencies on other tilequota crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
