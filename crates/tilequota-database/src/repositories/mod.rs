//! Repository implementations for the persistent quota store.
//!
//! Read methods run against the pool. Methods that take a
//! `&mut PgConnection` are meant to be called inside a transaction the
//! caller owns, so several of them commit atomically.

pub mod tile_page;
pub mod tileset;

pub use tile_page::TilePageRepository;
pub use tileset::TileSetRepository;

use tilequota_core::error::AppError;
use tilequota_core::result::AppResult;
use tilequota_core::types::Quota;

/// Parse a `NUMERIC` byte count rendered as text.
pub(crate) fn parse_bytes(text: &str) -> AppResult<Quota> {
    let integral = text.split('.').next().unwrap_or(text);
    integral
        .parse::<u128>()
        .map(Quota::from_bytes)
        .map_err(|e| AppError::internal(format!("Invalid byte count '{text}' in database: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("0").unwrap(), Quota::ZERO);
        assert_eq!(
            parse_bytes("340282366920938463463374607431768211455").unwrap(),
            Quota::from_bytes(u128::MAX)
        );
        assert_eq!(parse_bytes("42.000").unwrap(), Quota::from_bytes(42));
        assert!(parse_bytes("-1").is_err());
    }
}
