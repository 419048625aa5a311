//! Error types for Thermae

use alloy_primitives::U256;
use thiserror::Error;

use crate::{AccountId, AssetId};

/// Errors raised by the lending engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("No more liquidity: requested {requested}, available {available}")]
    InsufficientCash { requested: U256, available: U256 },

    #[error("Insufficient deposit: requested {requested}, deposited {available}")]
    InsufficientDeposit { requested: U256, available: U256 },

    #[error("Insufficient {asset} balance for {holder}: need {required}, have {available}")]
    InsufficientBalance {
        asset: AssetId,
        holder: AccountId,
        required: U256,
        available: U256,
    },

    #[error("{action}: Liquidation threshold reached")]
    LiquidationThresholdReached { action: &'static str },

    #[error("Account {account} is not liquidatable")]
    NotLiquidatable { account: AccountId },

    #[error("Borrowing is disabled for {asset}")]
    BorrowingDisabled { asset: AssetId },

    #[error("Timestamp {now} is before the last accrual at {last}")]
    InvalidTimestamp { now: u64, last: u64 },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Flash loans are disabled for {asset}")]
    FlashLoanDisabled { asset: AssetId },

    #[error("Flash loan not repaid: expected pool balance {expected}, found {received}")]
    FlashLoanNotRepaid { expected: U256, received: U256 },

    #[error("Pool for {asset} is locked by a flash loan in flight")]
    Reentrancy { asset: AssetId },

    #[error("Asset not supported: {asset}")]
    UnsupportedAsset { asset: AssetId },

    #[error("No price available for {asset}")]
    UnpricedAsset { asset: AssetId },

    #[error("No Pool for asset {asset}")]
    NoPoolForAsset { asset: AssetId },

    #[error("Pool already exists for {asset}")]
    PoolAlreadyExists { asset: AssetId },

    #[error("{caller} is not allowed to {action}")]
    Unauthorized {
        caller: AccountId,
        action: &'static str,
    },

    #[error("Rewards are paused for {asset}")]
    RewardPaused { asset: AssetId },

    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Swap failed: {reason}")]
    SwapFailed { reason: String },

    #[error("Slippage exceeded: wanted at least {min_amount_out}, got {amount_out}")]
    SlippageExceeded {
        min_amount_out: U256,
        amount_out: U256,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Thermae operations
pub type Result<T> = std::result::Result<T, LendingError>;

impl LendingError {
    /// Get a stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "zero_amount",
            Self::InsufficientCash { .. } => "insufficient_cash",
            Self::InsufficientDeposit { .. } => "insufficient_deposit",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::LiquidationThresholdReached { .. } => "liquidation_threshold_reached",
            Self::NotLiquidatable { .. } => "not_liquidatable",
            Self::BorrowingDisabled { .. } => "borrowing_disabled",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::ArithmeticOverflow => "arithmetic_overflow",
            Self::DivisionByZero => "division_by_zero",
            Self::FlashLoanDisabled { .. } => "flash_loan_disabled",
            Self::FlashLoanNotRepaid { .. } => "flash_loan_not_repaid",
            Self::Reentrancy { .. } => "reentrancy",
            Self::UnsupportedAsset { .. } => "unsupported_asset",
            Self::UnpricedAsset { .. } => "unpriced_asset",
            Self::NoPoolForAsset { .. } => "no_pool_for_asset",
            Self::PoolAlreadyExists { .. } => "pool_already_exists",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RewardPaused { .. } => "reward_paused",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::SwapFailed { .. } => "swap_failed",
            Self::SlippageExceeded { .. } => "slippage_exceeded",
            Self::Config(_) => "config",
        }
    }

    /// Shorthand for [`LendingError::InvalidConfig`]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for LendingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}
