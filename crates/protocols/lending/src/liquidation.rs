//! Liquidation
//!
//! An account whose debt exceeds its collateral bound can be liquidated: the
//! liquidator repays part of the debt and takes over deposit principal worth
//! the repayment plus the liquidation bonus.

use alloy_primitives::U256;
use thermae_core::constants::WAD;
use thermae_core::math::{checked_add, div_fixed, mul_fixed};
use thermae_core::{AccountId, LendingError, Result};

use crate::events::PoolEvent;
use crate::pool::{atomic, settle_debt, LendingPool, PoolEnv};
use crate::roles::Role;

/// Outcome of a liquidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiquidationReceipt {
    pub repaid: U256,
    /// Deposit principal moved to the liquidator
    pub seized: U256,
    pub interest_paid: U256,
    pub fee: U256,
}

/// Repay and seize amounts for a liquidation request.
///
/// The repayment is capped at `debt * close_factor`; the seizure is
/// `repay * (1 + bonus)`, capped at the deposit, in which case the repayment
/// shrinks to match.
pub fn liquidation_amounts(
    debt: U256,
    deposit: U256,
    requested: U256,
    close_factor: U256,
    bonus: U256,
) -> Result<(U256, U256)> {
    let max_repay = mul_fixed(debt, close_factor)?;
    let mut repay = requested.min(max_repay).min(debt);
    let multiplier = checked_add(WAD, bonus)?;
    let mut seize = mul_fixed(repay, multiplier)?;
    if seize > deposit {
        seize = deposit;
        repay = div_fixed(deposit, multiplier)?;
    }
    Ok((repay, seize))
}

impl LendingPool {
    /// Whether the account's debt here exceeds its collateral bound here
    pub fn is_liquidatable(&self, account: &AccountId) -> Result<bool> {
        let debt = self.account_debt_amount(account)?;
        if debt.is_zero() {
            return Ok(false);
        }
        let bound = if self.is_collateral(account) {
            mul_fixed(
                self.account_deposit_amount(account)?,
                self.params.lending.collateral_factor,
            )?
        } else {
            U256::ZERO
        };
        Ok(debt > bound)
    }

    /// Single-pool liquidation: `liquidator` repays up to `repay_amount` of
    /// `borrower`'s debt and receives the borrower's deposit plus the bonus
    pub fn liquidate(
        &mut self,
        env: &mut PoolEnv<'_>,
        liquidator: &AccountId,
        borrower: &AccountId,
        repay_amount: U256,
    ) -> Result<LiquidationReceipt> {
        self.ensure_idle()?;
        self.ensure_acting_for(env.caller, liquidator, "liquidate")?;
        if repay_amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        if liquidator == borrower {
            return Err(LendingError::Unauthorized {
                caller: liquidator.clone(),
                action: "liquidate itself",
            });
        }

        let receipt = atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;

            let debt = cache.current_debt(borrower)?;
            let deposit = cache.current_deposit(borrower)?;
            let bound = if cache.is_collateral(borrower) {
                mul_fixed(deposit, params.lending.collateral_factor)?
            } else {
                U256::ZERO
            };
            if debt.is_zero() || debt <= bound {
                return Err(LendingError::NotLiquidatable {
                    account: borrower.clone(),
                });
            }

            let (repay, seize) = liquidation_amounts(
                debt,
                deposit,
                repay_amount,
                params.lending.max_liquidation_threshold,
                params.lending.liquidation_fee,
            )?;
            if repay.is_zero() {
                return Err(LendingError::ZeroAmount);
            }

            cache.move_deposit(borrower, liquidator, seize)?;
            let repaid = settle_debt(params, &mut cache, env, liquidator, borrower, repay)?;
            cache.commit();

            env.events.push(PoolEvent::Liquidation {
                asset: params.asset.clone(),
                liquidator: liquidator.clone(),
                borrower: borrower.clone(),
                repaid: repaid.repaid,
                seized: seize,
            });
            Ok(LiquidationReceipt {
                repaid: repaid.repaid,
                seized: seize,
                interest_paid: repaid.interest_paid,
                fee: repaid.fee,
            })
        })?;

        tracing::info!(
            asset = %self.params.asset,
            liquidator = %liquidator,
            borrower = %borrower,
            repaid = %receipt.repaid,
            seized = %receipt.seized,
            "Liquidation"
        );
        Ok(receipt)
    }

    /// Move deposit principal from `from` to `to` on a delegator's order
    /// (the collateral leg of a cross-pool liquidation)
    pub fn seize(
        &mut self,
        env: &mut PoolEnv<'_>,
        from: &AccountId,
        to: &AccountId,
        amount: U256,
    ) -> Result<()> {
        self.ensure_idle()?;
        self.roles.ensure(env.caller, Role::Delegator, "seize deposits")?;
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;
            cache.move_deposit(from, to, amount)?;
            cache.commit();

            env.events.push(PoolEvent::Seize {
                asset: params.asset.clone(),
                from: from.clone(),
                to: to.clone(),
                amount,
            });
            Ok(())
        })?;

        tracing::info!(asset = %self.params.asset, from = %from, to = %to, amount = %amount, "Seize");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::{acct, frac, Harness};
    use thermae_core::math::wad;

    /// bob borrows 75 against 100 and is underwater one second later
    fn underwater() -> Harness {
        let mut h = Harness::new();
        h.deposit("bob", wad(100)).unwrap();
        h.set_collateral("bob", true).unwrap();
        h.borrow("bob", wad(75)).unwrap();
        h.now = 1;
        h
    }

    #[test]
    fn test_liquidation_amounts() {
        // close factor caps the request
        let (repay, seize) =
            liquidation_amounts(wad(100), wad(1_000), wad(500), frac("0.5"), frac("0.1")).unwrap();
        assert_eq!(repay, wad(50));
        assert_eq!(seize, wad(55));

        // deposit caps the seizure and the repayment follows
        let (repay, seize) =
            liquidation_amounts(wad(100), wad(22), wad(50), frac("0.5"), frac("0.1")).unwrap();
        assert_eq!(seize, wad(22));
        assert_eq!(repay, wad(20));
    }

    #[test]
    fn test_healthy_account_not_liquidatable() {
        let mut h = Harness::new();
        h.deposit("bob", wad(100)).unwrap();
        h.set_collateral("bob", true).unwrap();
        h.borrow("bob", wad(50)).unwrap();
        assert!(!h.pool.is_liquidatable(&acct("bob")).unwrap());

        let err = h
            .run("keeper", |pool, env| {
                pool.liquidate(env, &acct("keeper"), &acct("bob"), wad(10))
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "not_liquidatable");
    }

    #[test]
    fn test_liquidation_repays_and_seizes() {
        let mut h = underwater();
        let receipt = h
            .run("keeper", |pool, env| {
                pool.liquidate(env, &acct("keeper"), &acct("bob"), wad(10))
            })
            .unwrap();

        // debt 75 * 1.09375 = 82.03125; deposit 100 * 1.06328125
        assert_eq!(receipt.repaid, wad(10));
        assert_eq!(receipt.seized, frac("10.5"));
        assert_eq!(receipt.interest_paid, frac("7.03125"));
        assert_eq!(receipt.fee, frac("0.703125"));

        let pool = &h.pool;
        assert_eq!(pool.account_deposit_amount(&acct("keeper")).unwrap(), frac("10.5"));
        assert_eq!(
            pool.account_deposit_amount(&acct("bob")).unwrap(),
            frac("95.828125")
        );
        assert_eq!(pool.account_debt_amount(&acct("bob")).unwrap(), frac("72.03125"));
        assert_eq!(h.balance("keeper"), wad(990));
        assert!(pool.state().is_solvent());
        assert!(matches!(h.events.last(), Some(PoolEvent::Liquidation { .. })));
    }

    #[test]
    fn test_liquidation_respects_close_factor() {
        let mut h = underwater();
        let receipt = h
            .run("keeper", |pool, env| {
                pool.liquidate(env, &acct("keeper"), &acct("bob"), wad(1_000))
            })
            .unwrap();
        // 90% of 82.03125
        assert_eq!(receipt.repaid, frac("73.828125"));
        assert_eq!(receipt.seized, frac("77.51953125"));
    }

    #[test]
    fn test_self_liquidation_rejected() {
        let mut h = underwater();
        let err = h
            .run("bob", |pool, env| {
                pool.liquidate(env, &acct("bob"), &acct("bob"), wad(1))
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized");
    }

    #[test]
    fn test_seize_requires_delegator() {
        let mut h = underwater();
        let err = h
            .run("keeper", |pool, env| {
                pool.seize(env, &acct("bob"), &acct("keeper"), wad(1))
            })
            .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized");

        h.run("admin", |pool, env| {
            pool.grant_role(env, &acct("router"), Role::Delegator)
        })
        .unwrap();
        h.run("router", |pool, env| {
            pool.seize(env, &acct("bob"), &acct("keeper"), wad(1))
        })
        .unwrap();
        assert_eq!(h.pool.account_deposit_amount(&acct("keeper")).unwrap(), wad(1));
    }
}
