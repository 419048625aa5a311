//! Configuration types for Thermae
//!
//! Fractions are 18-decimal fixed point and are written as decimal strings in
//! JSON (`"0.75"`). Interest rate curves are written as yearly rates and held
//! per second in memory.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TOKEN_DECIMALS, SECONDS_PER_YEAR, WAD};
use crate::math::{self, fraction};
use crate::{AccountId, AssetId, LendingError, Result};

/// Risk parameters of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingConfig {
    /// Share of a collateral deposit's value that can be borrowed against
    #[serde(with = "fraction")]
    pub collateral_factor: U256,

    /// Bonus on seized collateral paid to liquidators
    #[serde(with = "fraction")]
    pub liquidation_fee: U256,

    /// Reserve factor of the deposit rate and share of repaid interest sent
    /// to the fee collector
    #[serde(with = "fraction")]
    pub protocol_fee: U256,

    /// Largest share of a debt one liquidation may repay
    #[serde(with = "fraction")]
    pub max_liquidation_threshold: U256,

    #[serde(default = "default_true")]
    pub borrowing_allowed: bool,
}

fn default_true() -> bool {
    true
}

impl LendingConfig {
    pub fn new(
        collateral_factor: U256,
        liquidation_fee: U256,
        protocol_fee: U256,
        max_liquidation_threshold: U256,
        borrowing_allowed: bool,
    ) -> Result<Self> {
        let config = Self {
            collateral_factor,
            liquidation_fee,
            protocol_fee,
            max_liquidation_threshold,
            borrowing_allowed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_liquidation_threshold >= WAD {
            return Err(LendingError::invalid_config(
                "max_liquidation_threshold must be below 1",
            ));
        }
        if self.collateral_factor > self.max_liquidation_threshold {
            return Err(LendingError::invalid_config(
                "collateral_factor must not exceed max_liquidation_threshold",
            ));
        }
        if self.protocol_fee > WAD {
            return Err(LendingError::invalid_config("protocol_fee must be at most 1"));
        }
        Ok(())
    }
}

impl Default for LendingConfig {
    fn default() -> Self {
        // 75% collateral factor, 5% liquidation bonus, 10% protocol fee
        Self {
            collateral_factor: U256::from(750_000_000_000_000_000u64),
            liquidation_fee: U256::from(50_000_000_000_000_000u64),
            protocol_fee: U256::from(100_000_000_000_000_000u64),
            max_liquidation_threshold: U256::from(900_000_000_000_000_000u64),
            borrowing_allowed: true,
        }
    }
}

/// Kinked utilization curve, per-second rates
///
/// A curve built from yearly figures keeps them and writes them back out
/// unchanged. Otherwise the yearly figures are the per-second rates times
/// [`SECONDS_PER_YEAR`], which is short of the input by the truncation of the
/// division (under 4e-11 per rate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AnnualRateCurve", into = "AnnualRateCurve")]
pub struct InterestRateConfig {
    pub base_rate: U256,
    pub slope1: U256,
    pub slope2: U256,
    pub optimal_utilization: U256,
    annual: Option<AnnualRateCurve>,
}

impl InterestRateConfig {
    /// Build a curve from per-second rates
    pub fn new(
        base_rate: U256,
        slope1: U256,
        slope2: U256,
        optimal_utilization: U256,
    ) -> Result<Self> {
        let config = Self {
            base_rate,
            slope1,
            slope2,
            optimal_utilization,
            annual: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a curve from yearly rates such as `slope1 = 0.07`
    pub fn from_annual(
        base_rate: U256,
        slope1: U256,
        slope2: U256,
        optimal_utilization: U256,
    ) -> Result<Self> {
        let config = Self::per_second(AnnualRateCurve {
            base_rate,
            slope1,
            slope2,
            optimal_utilization,
        });
        config.validate()?;
        Ok(config)
    }

    fn per_second(curve: AnnualRateCurve) -> Self {
        let year = U256::from(SECONDS_PER_YEAR);
        Self {
            base_rate: curve.base_rate / year,
            slope1: curve.slope1 / year,
            slope2: curve.slope2 / year,
            optimal_utilization: curve.optimal_utilization,
            annual: Some(curve),
        }
    }

    /// The curve as yearly rates
    pub fn annual(&self) -> AnnualRateCurve {
        match &self.annual {
            // fields edited after construction no longer match the kept figures
            Some(curve) if Self::per_second(curve.clone()).same_rates(self) => curve.clone(),
            _ => {
                let year = U256::from(SECONDS_PER_YEAR);
                AnnualRateCurve {
                    base_rate: self.base_rate.saturating_mul(year),
                    slope1: self.slope1.saturating_mul(year),
                    slope2: self.slope2.saturating_mul(year),
                    optimal_utilization: self.optimal_utilization,
                }
            }
        }
    }

    fn same_rates(&self, other: &Self) -> bool {
        self.base_rate == other.base_rate
            && self.slope1 == other.slope1
            && self.slope2 == other.slope2
            && self.optimal_utilization == other.optimal_utilization
    }

    pub fn validate(&self) -> Result<()> {
        if self.optimal_utilization.is_zero() || self.optimal_utilization >= WAD {
            return Err(LendingError::invalid_config(
                "optimal_utilization must be strictly between 0 and 1",
            ));
        }
        Ok(())
    }
}

impl Default for InterestRateConfig {
    fn default() -> Self {
        // 0% base, 4% and 300% slopes, kink at 80%
        Self::per_second(AnnualRateCurve {
            base_rate: U256::ZERO,
            slope1: U256::from(40_000_000_000_000_000u64),
            slope2: U256::from(3_000_000_000_000_000_000u64),
            optimal_utilization: U256::from(800_000_000_000_000_000u64),
        })
    }
}

/// Serialized form of [`InterestRateConfig`]: yearly rates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualRateCurve {
    #[serde(with = "fraction")]
    pub base_rate: U256,
    #[serde(with = "fraction")]
    pub slope1: U256,
    #[serde(with = "fraction")]
    pub slope2: U256,
    #[serde(with = "fraction")]
    pub optimal_utilization: U256,
}

impl TryFrom<AnnualRateCurve> for InterestRateConfig {
    type Error = LendingError;

    fn try_from(curve: AnnualRateCurve) -> Result<Self> {
        Self::from_annual(
            curve.base_rate,
            curve.slope1,
            curve.slope2,
            curve.optimal_utilization,
        )
    }
}

impl From<InterestRateConfig> for AnnualRateCurve {
    fn from(config: InterestRateConfig) -> Self {
        config.annual()
    }
}

/// Flash loan parameters of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(with = "fraction")]
    pub flash_fee: U256,
}

impl FlashLoanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flash_fee > WAD {
            return Err(LendingError::invalid_config("flash_fee must be at most 1"));
        }
        Ok(())
    }
}

impl Default for FlashLoanConfig {
    fn default() -> Self {
        // 0.08%
        Self {
            enabled: false,
            flash_fee: U256::from(800_000_000_000_000u64),
        }
    }
}

/// Everything needed to open a pool for one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub asset: AssetId,

    #[serde(default = "default_decimals")]
    pub decimals: u8,

    #[serde(default)]
    pub lending: LendingConfig,

    #[serde(default)]
    pub interest_rate: InterestRateConfig,

    #[serde(default)]
    pub flash_loan: FlashLoanConfig,
}

fn default_decimals() -> u8 {
    DEFAULT_TOKEN_DECIMALS
}

impl PoolConfig {
    /// A pool for `asset` with default parameters
    pub fn new(asset: AssetId) -> Self {
        Self {
            asset,
            decimals: DEFAULT_TOKEN_DECIMALS,
            lending: LendingConfig::default(),
            interest_rate: InterestRateConfig::default(),
            flash_loan: FlashLoanConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset.as_str().is_empty() {
            return Err(LendingError::invalid_config("asset must not be empty"));
        }
        // token amounts are scaled by 10^decimals when priced
        math::pow10(self.decimals)?;
        self.lending.validate()?;
        self.interest_rate.validate()?;
        self.flash_loan.validate()
    }
}

/// Protocol deployment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Account the router acts as when calling into pools
    #[serde(default = "default_router")]
    pub router: AccountId,

    /// Accounts allowed to create pools and manage listings
    #[serde(default)]
    pub admins: Vec<AccountId>,

    #[serde(default = "default_fee_collector")]
    pub fee_collector: AccountId,

    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

fn default_router() -> AccountId {
    AccountId::new("entrypoint")
}

fn default_fee_collector() -> AccountId {
    AccountId::new("fee-collector")
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            router: default_router(),
            admins: Vec::new(),
            fee_collector: default_fee_collector(),
            pools: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !seen.insert(&pool.asset) {
                return Err(LendingError::PoolAlreadyExists {
                    asset: pool.asset.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{parse_fraction, wad};

    fn frac(s: &str) -> U256 {
        parse_fraction(s).unwrap()
    }

    #[test]
    fn test_default_configs_are_valid() {
        assert!(LendingConfig::default().validate().is_ok());
        assert!(InterestRateConfig::default().validate().is_ok());
        assert!(FlashLoanConfig::default().validate().is_ok());
        assert!(ProtocolConfig::default().validate().is_ok());
        assert_eq!(PoolConfig::new(AssetId::new("usdc")).decimals, 18);
    }

    #[test]
    fn test_lending_config_invariants() {
        let err = LendingConfig::new(frac("0.8"), frac("0.05"), frac("0.1"), frac("0.75"), true)
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_config");

        let err =
            LendingConfig::new(frac("0.5"), frac("0.05"), frac("0.1"), wad(1), true).unwrap_err();
        assert_eq!(err.error_code(), "invalid_config");

        // liquidation fee multipliers may exceed 1
        assert!(LendingConfig::new(frac("0.5"), frac("1.5"), frac("0.1"), frac("0.9"), true).is_ok());
    }

    #[test]
    fn test_interest_rate_from_annual() {
        let curve =
            InterestRateConfig::from_annual(U256::ZERO, frac("0.07"), frac("3"), frac("0.8"))
                .unwrap();
        assert_eq!(curve.slope1, frac("0.07") / U256::from(SECONDS_PER_YEAR));

        assert!(
            InterestRateConfig::from_annual(U256::ZERO, frac("0.07"), frac("3"), U256::ZERO)
                .is_err()
        );
        assert!(InterestRateConfig::new(U256::ZERO, U256::ZERO, U256::ZERO, WAD).is_err());
    }

    #[test]
    fn test_annual_rates_written_back_unchanged() {
        let json = r#"{ "base_rate": "0.01", "slope1": "0.07", "slope2": "5", "optimal_utilization": "0.75" }"#;
        let curve: InterestRateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(curve.slope1, frac("0.07") / U256::from(SECONDS_PER_YEAR));

        let written = serde_json::to_value(&curve).unwrap();
        assert_eq!(written["slope1"], "0.07");
        assert_eq!(written["base_rate"], "0.01");
        assert_eq!(written["slope2"], "5");
        let reparsed: InterestRateConfig = serde_json::from_value(written).unwrap();
        assert_eq!(reparsed, curve);
    }

    #[test]
    fn test_per_second_curve_serializes_truncated() {
        let year = U256::from(SECONDS_PER_YEAR);
        let curve =
            InterestRateConfig::new(U256::ZERO, frac("0.07") / year, wad(5) / year, frac("0.75"))
                .unwrap();
        let annual = curve.annual();
        assert_eq!(annual.slope1, frac("0.069999999972768"));
        assert!(frac("0.07") - annual.slope1 < year);

        // an edited curve reports its new rates, not the ones it was built from
        let mut edited =
            InterestRateConfig::from_annual(U256::ZERO, frac("0.07"), wad(5), frac("0.75"))
                .unwrap();
        edited.slope1 = wad(1) / year;
        assert_eq!(edited.annual().slope1, wad(1) / year * year);
        assert_eq!(edited.annual().slope2, wad(5) / year * year);
    }

    #[test]
    fn test_protocol_config_from_json() {
        let json = r#"{
            "admins": ["deployer"],
            "pools": [
                {
                    "asset": "wnative",
                    "lending": {
                        "collateral_factor": "0.75",
                        "liquidation_fee": "0.05",
                        "protocol_fee": "0.1",
                        "max_liquidation_threshold": "0.8"
                    },
                    "interest_rate": {
                        "base_rate": "0",
                        "slope1": "0.07",
                        "slope2": "3",
                        "optimal_utilization": "0.8"
                    },
                    "flash_loan": { "enabled": true, "flash_fee": "0.0008" }
                },
                { "asset": "usdc", "decimals": 6 }
            ]
        }"#;

        let config = ProtocolConfig::from_json_str(json).unwrap();
        assert_eq!(config.router, AccountId::new("entrypoint"));
        assert_eq!(config.admins, vec![AccountId::new("deployer")]);
        assert_eq!(config.pools.len(), 2);

        let native = &config.pools[0];
        assert_eq!(native.lending.collateral_factor, frac("0.75"));
        assert!(native.lending.borrowing_allowed);
        assert!(native.flash_loan.enabled);
        assert_eq!(native.flash_loan.flash_fee, frac("0.0008"));
        assert_eq!(
            native.interest_rate.slope2,
            wad(3) / U256::from(SECONDS_PER_YEAR)
        );

        let usdc = &config.pools[1];
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.lending, LendingConfig::default());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = ProtocolConfig::default();
        config.pools.push(PoolConfig::new(AssetId::new("usdc")));
        let json = config.to_json().unwrap();
        let parsed = ProtocolConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(json.contains("\"collateral_factor\": \"0.75\""));
    }

    #[test]
    fn test_duplicate_pools_rejected() {
        let mut config = ProtocolConfig::default();
        config.pools.push(PoolConfig::new(AssetId::new("usdc")));
        config.pools.push(PoolConfig::new(AssetId::new("usdc")));
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "pool_already_exists");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ProtocolConfig::from_json_str("{ \"pools\": 3 }").unwrap_err();
        assert_eq!(err.error_code(), "config");

        let bad_fraction = r#"{ "pools": [ { "asset": "x", "flash_loan": { "flash_fee": "abc" } } ] }"#;
        assert!(ProtocolConfig::from_json_str(bad_fraction).is_err());
    }
}
