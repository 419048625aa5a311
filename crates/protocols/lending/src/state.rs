//! Pool Snapshots
//!
//! Serializable read-only views of a pool and its positions.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, AssetId, FlashLoanConfig, InterestRateConfig, LendingConfig, Result};

use crate::ledger::PoolState;
use crate::pool::LendingPool;
use crate::rates;

/// Pool state for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub asset: AssetId,
    pub address: AccountId,
    pub decimals: u8,
    pub state: PoolState,

    // Rates (18-decimal fixed point)
    pub utilization: U256,
    pub borrow_rate_per_second: U256,
    pub deposit_rate_per_second: U256,
    pub borrow_apr: U256,
    pub deposit_apr: U256,

    pub lending: LendingConfig,
    pub interest_rate: InterestRateConfig,
    pub flash_loan: FlashLoanConfig,
    pub flash_loan_in_flight: bool,
    pub accounts: usize,
}

/// One account's position, valued at the pool's last accrual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub account: AccountId,
    pub deposit: U256,
    pub debt: U256,
    pub is_collateral: bool,
}

impl LendingPool {
    pub fn snapshot(&self) -> Result<PoolSnapshot> {
        let utilization = self.utilization()?;
        let borrow_rate = self.borrow_rate()?;
        let deposit_rate = self.deposit_rate()?;
        Ok(PoolSnapshot {
            asset: self.asset().clone(),
            address: self.address().clone(),
            decimals: self.decimals(),
            state: self.state().clone(),
            utilization,
            borrow_rate_per_second: borrow_rate,
            deposit_rate_per_second: deposit_rate,
            borrow_apr: rates::annualize(borrow_rate),
            deposit_apr: rates::annualize(deposit_rate),
            lending: self.lending_config().clone(),
            interest_rate: self.interest_rate_config().clone(),
            flash_loan: self.flash_loan_config().clone(),
            flash_loan_in_flight: self.is_flash_loan_in_flight(),
            accounts: self.ledger().positions().count(),
        })
    }

    pub fn position_snapshots(&self) -> Result<Vec<PositionSnapshot>> {
        let state = self.state();
        self.ledger()
            .positions()
            .map(|(account, position)| {
                Ok(PositionSnapshot {
                    account: account.clone(),
                    deposit: position.current_deposit(state)?,
                    debt: position.current_debt(state)?,
                    is_collateral: position.is_collateral,
                })
            })
            .collect()
    }
}
