//! Core type definitions for Thermae

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a fungible token market (one pool per asset)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Any balance holder: users, pools, the router, the fee collector
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Account under which a pool holds its underlying tokens
    pub fn pool(asset: &AssetId) -> Self {
        Self(format!("pool:{}", asset))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seconds since an arbitrary epoch, supplied by the caller
pub type Timestamp = u64;

/// Constants
pub mod constants {
    use super::U256;

    /// 1.0 in 18-decimal fixed point
    pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

    /// Number of decimals carried by every fixed-point fraction
    pub const WAD_DECIMALS: u8 = 18;

    /// 365 days
    pub const SECONDS_PER_YEAR: u64 = 31_536_000;

    /// Token decimals assumed when a pool config omits them
    pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_display_and_order() {
        let a = AssetId::new("usdc");
        let b = AssetId::new("wnative");
        assert_eq!(a.to_string(), "usdc");
        assert!(a < b);

        let pool = AccountId::pool(&a);
        assert_eq!(pool.as_str(), "pool:usdc");
    }

    #[test]
    fn test_identifier_serde_is_transparent() {
        let json = serde_json::to_string(&AccountId::new("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
        let parsed: AssetId = serde_json::from_str("\"usdc\"").unwrap();
        assert_eq!(parsed, AssetId::new("usdc"));
    }

    #[test]
    fn test_wad_constant() {
        assert_eq!(constants::WAD, U256::from(10u64).pow(U256::from(18u64)));
    }
}
