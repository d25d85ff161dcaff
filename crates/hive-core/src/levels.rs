//! Membership level tables
//!
//! | Level | Price (USDT) | BCC unlock |
//! |-------|--------------|------------|
//! | 1 | 100 | 100 |
//! | 2 | 150 | 150 |
//! | ... | +50 | +50 |
//! | 19 | 1000 | 1000 |
//!
//! Both columns are base values; the tier multiplier is applied per event.

use crate::error::{HiveError, Result};
use crate::types::{units, Amount};
use crate::MAX_LEVEL;

/// Check a level is in 1..=19
pub fn validate_level(level: u8) -> Result<u8> {
    if level == 0 || level > MAX_LEVEL {
        return Err(HiveError::InvalidLevel(level));
    }
    Ok(level)
}

/// Base USDT price of `level`, also the base reward paid for it
pub fn base_price(level: u8) -> Result<Amount> {
    let level = validate_level(level)? as u64;
    Ok(units(100 + (level - 1) * 50))
}

/// Base BCC released when a member reaches `level`
pub fn base_bcc_unlock(level: u8) -> Result<Amount> {
    let level = validate_level(level)? as u64;
    Ok(units(50 + 50 * level))
}

/// Sum of every level's base unlock, locked at activation
pub fn total_bcc_lockup() -> Amount {
    (1..=MAX_LEVEL as u64).map(|level| units(50 + 50 * level)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_table() {
        assert_eq!(base_price(1).unwrap(), units(100));
        assert_eq!(base_price(2).unwrap(), units(150));
        assert_eq!(base_price(19).unwrap(), units(1000));
        assert!(matches!(base_price(0), Err(HiveError::InvalidLevel(0))));
        assert!(base_price(20).is_err());
    }

    #[test]
    fn test_unlock_table() {
        assert_eq!(base_bcc_unlock(1).unwrap(), units(100));
        assert_eq!(base_bcc_unlock(10).unwrap(), units(550));
        assert_eq!(base_bcc_unlock(19).unwrap(), units(1000));
        assert_eq!(total_bcc_lockup(), units(10_450));
    }
}
