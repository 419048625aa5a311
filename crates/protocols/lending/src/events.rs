//! Pool events
//!
//! Every committed pool operation appends one event to the log carried in
//! [`crate::PoolEnv`]. Events also drive the rewards notifications the router
//! sends after an operation commits.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, AssetId, FlashLoanConfig, InterestRateConfig, LendingConfig};

use crate::collaborators::DepositDelta;
use crate::roles::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    Deposit {
        asset: AssetId,
        account: AccountId,
        amount: U256,
    },
    Withdraw {
        asset: AssetId,
        account: AccountId,
        amount: U256,
    },
    Borrow {
        asset: AssetId,
        account: AccountId,
        amount: U256,
    },
    Repay {
        asset: AssetId,
        payer: AccountId,
        account: AccountId,
        amount: U256,
        interest: U256,
        fee: U256,
    },
    Liquidation {
        asset: AssetId,
        liquidator: AccountId,
        borrower: AccountId,
        repaid: U256,
        seized: U256,
    },
    /// Deposit principal moved between accounts by a cross-pool liquidation
    Seize {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: U256,
    },
    FlashLoan {
        asset: AssetId,
        receiver: AccountId,
        amount: U256,
        fee: U256,
    },
    SetCollateral {
        asset: AssetId,
        account: AccountId,
        enabled: bool,
    },
    LendingConfigUpdated {
        asset: AssetId,
        config: LendingConfig,
    },
    InterestRateConfigUpdated {
        asset: AssetId,
        config: InterestRateConfig,
    },
    FlashLoanConfigUpdated {
        asset: AssetId,
        config: FlashLoanConfig,
    },
    RoleGranted {
        asset: AssetId,
        account: AccountId,
        role: Role,
    },
    RoleRevoked {
        asset: AssetId,
        account: AccountId,
        role: Role,
    },
}

impl PoolEvent {
    pub fn asset(&self) -> &AssetId {
        match self {
            Self::Deposit { asset, .. }
            | Self::Withdraw { asset, .. }
            | Self::Borrow { asset, .. }
            | Self::Repay { asset, .. }
            | Self::Liquidation { asset, .. }
            | Self::Seize { asset, .. }
            | Self::FlashLoan { asset, .. }
            | Self::SetCollateral { asset, .. }
            | Self::LendingConfigUpdated { asset, .. }
            | Self::InterestRateConfigUpdated { asset, .. }
            | Self::FlashLoanConfigUpdated { asset, .. }
            | Self::RoleGranted { asset, .. }
            | Self::RoleRevoked { asset, .. } => asset,
        }
    }

    /// Deposit principal changes this event records
    pub fn deposit_deltas(&self) -> Vec<(AccountId, DepositDelta)> {
        match self {
            Self::Deposit {
                account, amount, ..
            } => vec![(account.clone(), DepositDelta::Increase(*amount))],
            Self::Withdraw {
                account, amount, ..
            } => vec![(account.clone(), DepositDelta::Decrease(*amount))],
            Self::Liquidation {
                liquidator,
                borrower,
                seized,
                ..
            } => vec![
                (borrower.clone(), DepositDelta::Decrease(*seized)),
                (liquidator.clone(), DepositDelta::Increase(*seized)),
            ],
            Self::Seize {
                from, to, amount, ..
            } => vec![
                (from.clone(), DepositDelta::Decrease(*amount)),
                (to.clone(), DepositDelta::Increase(*amount)),
            ],
            _ => Vec::new(),
        }
    }
}
