//! Cross-pool positions
//!
//! An account's standing is the sum of its positions in every market it has
//! entered, valued at oracle prices. It is derived on demand and never stored.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::math::{checked_add, mul_fixed};
use thermae_core::{AccountId, AssetId, LendingError, Result, Timestamp};

use crate::router::EntryPoint;

/// Aggregated value of an account's positions, in oracle units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLiquidity {
    pub deposit_value: U256,
    /// Deposits flagged as collateral
    pub collateral_value: U256,
    /// Collateral value weighted by each pool's collateral factor
    pub max_debt_value: U256,
    pub debt_value: U256,
}

impl AccountLiquidity {
    pub fn is_liquidatable(&self) -> bool {
        self.debt_value > self.max_debt_value
    }

    /// Borrowing capacity left
    pub fn headroom(&self) -> U256 {
        self.max_debt_value.saturating_sub(self.debt_value)
    }
}

impl EntryPoint {
    /// Values as of each pool's last accrual
    pub fn account_liquidity(&self, account: &AccountId) -> Result<AccountLiquidity> {
        let oracle = self.oracle.as_ref();
        let mut liquidity = AccountLiquidity::default();
        for asset in self.registry.account_markets(account) {
            let pool = self.registry.pool(&asset)?;
            let deposit = pool.account_deposit_value(oracle, account)?;
            let collateral = if pool.is_collateral(account) {
                deposit
            } else {
                U256::ZERO
            };
            let max_debt = mul_fixed(collateral, pool.lending_config().collateral_factor)?;
            let debt = pool.account_debt_value(oracle, account)?;

            liquidity.deposit_value = checked_add(liquidity.deposit_value, deposit)?;
            liquidity.collateral_value = checked_add(liquidity.collateral_value, collateral)?;
            liquidity.max_debt_value = checked_add(liquidity.max_debt_value, max_debt)?;
            liquidity.debt_value = checked_add(liquidity.debt_value, debt)?;
        }
        Ok(liquidity)
    }

    /// Accrue every market the account is in. A pool lending out a flash loan
    /// was accrued when the loan left and is skipped.
    pub(crate) fn accrue_markets(&mut self, account: &AccountId, now: Timestamp) -> Result<()> {
        for asset in self.registry.account_markets(account) {
            self.accrue_market(&asset, now)?;
        }
        Ok(())
    }

    pub(crate) fn accrue_market(&mut self, asset: &AssetId, now: Timestamp) -> Result<()> {
        if self.registry.pool(asset)?.is_flash_loan_in_flight() {
            return Ok(());
        }
        self.delegate(asset, now, |pool, env| pool.accrue_interest(env))
    }

    /// The account's debt does not exceed its collateral bound
    pub(crate) fn ensure_solvent(&self, account: &AccountId, action: &'static str) -> Result<()> {
        let liquidity = self.account_liquidity(account)?;
        if liquidity.is_liquidatable() {
            tracing::warn!(
                account = %account,
                debt_value = %liquidity.debt_value,
                max_debt_value = %liquidity.max_debt_value,
                action,
                "Position check failed"
            );
            return Err(LendingError::LiquidationThresholdReached { action });
        }
        Ok(())
    }

    /// Borrowing `amount` of `asset` keeps the debt within the collateral
    /// bound
    pub(crate) fn ensure_borrow_allowed(
        &self,
        account: &AccountId,
        asset: &AssetId,
        amount: U256,
    ) -> Result<()> {
        let liquidity = self.account_liquidity(account)?;
        let added = self
            .registry
            .pool(asset)?
            .value_of(self.oracle.as_ref(), amount)?;
        let debt_after = checked_add(liquidity.debt_value, added)?;
        if debt_after > liquidity.max_debt_value {
            tracing::warn!(
                account = %account,
                asset = %asset,
                debt_value = %debt_after,
                max_debt_value = %liquidity.max_debt_value,
                "Borrow rejected"
            );
            return Err(LendingError::LiquidationThresholdReached { action: "Borrow" });
        }
        Ok(())
    }

    /// Withdrawing `amount` of `asset` keeps the debt within the reduced
    /// collateral bound
    pub(crate) fn ensure_withdraw_allowed(
        &self,
        account: &AccountId,
        asset: &AssetId,
        amount: U256,
    ) -> Result<()> {
        let pool = self.registry.pool(asset)?;
        if !pool.is_collateral(account) {
            return Ok(());
        }
        let liquidity = self.account_liquidity(account)?;
        if liquidity.debt_value.is_zero() {
            return Ok(());
        }
        let removed = pool.value_of(self.oracle.as_ref(), amount)?;
        let lost_bound = mul_fixed(removed, pool.lending_config().collateral_factor)?;
        let max_after = liquidity.max_debt_value.saturating_sub(lost_bound);
        if liquidity.debt_value > max_after {
            tracing::warn!(
                account = %account,
                asset = %asset,
                debt_value = %liquidity.debt_value,
                max_debt_value = %max_after,
                "Withdraw rejected"
            );
            return Err(LendingError::LiquidationThresholdReached { action: "Withdraw" });
        }
        Ok(())
    }
}
