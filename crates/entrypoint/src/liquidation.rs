//! Cross-pool liquidation
//!
//! An account is liquidatable when its total debt value exceeds the
//! collateral-factor-weighted value of its collateral. A liquidator repays
//! debt in one pool and receives the borrower's deposit in another, worth the
//! repayment plus the collateral pool's liquidation bonus.

use alloy_primitives::U256;
use lending::LiquidationReceipt;
use thermae_core::constants::WAD;
use thermae_core::math::{checked_add, from_value, mul_div, mul_fixed};
use thermae_core::{AccountId, AssetId, LendingError, Result};

use crate::events::RouterEvent;
use crate::router::{Call, EntryPoint};

impl EntryPoint {
    /// Whether the account's aggregate position can be liquidated, as of each
    /// pool's last accrual
    pub fn is_liquidatable(&self, account: &AccountId) -> Result<bool> {
        Ok(self.account_liquidity(account)?.is_liquidatable())
    }

    /// The caller repays up to `amount` of `borrower`'s `debt_asset` debt and
    /// seizes `collateral_asset` deposit
    pub fn liquidate(
        &mut self,
        call: &Call,
        borrower: &AccountId,
        debt_asset: &AssetId,
        collateral_asset: &AssetId,
        amount: U256,
    ) -> Result<LiquidationReceipt> {
        let liquidator = &call.sender;
        if liquidator == borrower {
            return Err(LendingError::Unauthorized {
                caller: liquidator.clone(),
                action: "liquidate itself",
            });
        }
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }

        let receipt = self.atomically("liquidate", |router| {
            router.accrue_market(debt_asset, call.now)?;
            router.accrue_market(collateral_asset, call.now)?;
            router.accrue_markets(borrower, call.now)?;

            if !router.is_liquidatable(borrower)? {
                return Err(LendingError::NotLiquidatable {
                    account: borrower.clone(),
                });
            }

            let (repay, seize) =
                router.liquidation_amounts(borrower, debt_asset, collateral_asset, amount)?;
            if repay.is_zero() || seize.is_zero() {
                return Err(LendingError::ZeroAmount);
            }

            router.delegate(collateral_asset, call.now, |pool, env| {
                pool.seize(env, borrower, liquidator, seize)
            })?;
            router.registry.enter_market(liquidator, collateral_asset);
            let repaid = router.delegate(debt_asset, call.now, |pool, env| {
                pool.repay_for(env, liquidator, borrower, repay)
            })?;

            router.events.push(RouterEvent::Liquidation {
                liquidator: liquidator.clone(),
                borrower: borrower.clone(),
                debt_asset: debt_asset.clone(),
                collateral_asset: collateral_asset.clone(),
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
            liquidator = %liquidator,
            borrower = %borrower,
            debt_asset = %debt_asset,
            collateral_asset = %collateral_asset,
            repaid = %receipt.repaid,
            seized = %receipt.seized,
            "Liquidation"
        );
        Ok(receipt)
    }

    /// Repay and seize amounts: the repayment is capped by the debt pool's
    /// close factor, the seizure is priced at repay value times one plus the
    /// collateral pool's bonus and capped at the borrower's collateral, in
    /// which case the repayment shrinks in proportion
    fn liquidation_amounts(
        &self,
        borrower: &AccountId,
        debt_asset: &AssetId,
        collateral_asset: &AssetId,
        requested: U256,
    ) -> Result<(U256, U256)> {
        let oracle = self.oracle.as_ref();
        let debt_pool = self.registry.pool(debt_asset)?;
        let collateral_pool = self.registry.pool(collateral_asset)?;

        let debt = debt_pool.account_debt_amount(borrower)?;
        let close_factor = debt_pool.lending_config().max_liquidation_threshold;
        let mut repay = requested.min(mul_fixed(debt, close_factor)?);
        if repay.is_zero() {
            return Ok((U256::ZERO, U256::ZERO));
        }

        let available = if collateral_pool.is_collateral(borrower) {
            collateral_pool.account_deposit_amount(borrower)?
        } else {
            U256::ZERO
        };
        if available.is_zero() {
            return Err(LendingError::InsufficientDeposit {
                requested: U256::ZERO,
                available,
            });
        }

        let bonus = checked_add(WAD, collateral_pool.lending_config().liquidation_fee)?;
        let seize_value = mul_fixed(debt_pool.value_of(oracle, repay)?, bonus)?;
        let mut seize = from_value(
            seize_value,
            collateral_pool.price(oracle)?,
            collateral_pool.decimals(),
        )?;
        if seize > available {
            repay = mul_div(repay, available, seize)?;
            seize = available;
        }
        Ok((repay, seize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{acct, frac, link, wnative, World};
    use lending::PoolEvent;
    use thermae_core::math::wad;

    /// alice owes 37 link against 10 wnative that now trades at $4
    fn underwater() -> World {
        let mut w = World::with_collateral();
        w.router.borrow(&w.call("alice"), &link(), wad(37)).unwrap();
        w.oracle.set_price(wnative(), wad(4));
        w
    }

    #[test]
    fn test_healthy_account_not_liquidatable() {
        let mut w = World::with_collateral();
        w.router.borrow(&w.call("alice"), &link(), wad(30)).unwrap();
        assert!(!w.router.is_liquidatable(&acct("alice")).unwrap());

        let err = w
            .router
            .liquidate(&w.call("keeper"), &acct("alice"), &link(), &wnative(), wad(10))
            .unwrap_err();
        assert_eq!(err.error_code(), "not_liquidatable");
    }

    #[test]
    fn test_cross_pool_liquidation() {
        let mut w = underwater();
        let receipt = w
            .router
            .liquidate(&w.call("keeper"), &acct("alice"), &link(), &wnative(), wad(10))
            .unwrap();

        // $10 repaid, $11 of wnative at $4 seized
        assert_eq!(receipt.repaid, wad(10));
        assert_eq!(receipt.seized, frac("2.75"));

        let (wnative_pool, link_pool) = (
            w.router.pool(&wnative()).unwrap(),
            w.router.pool(&link()).unwrap(),
        );
        assert_eq!(link_pool.account_debt_amount(&acct("alice")).unwrap(), wad(27));
        assert_eq!(
            wnative_pool.account_deposit_amount(&acct("alice")).unwrap(),
            frac("7.25")
        );
        assert_eq!(
            wnative_pool.account_deposit_amount(&acct("keeper")).unwrap(),
            frac("2.75")
        );
        assert_eq!(w.balance(&link(), "keeper"), wad(990));
        assert!(w.router.is_account_in_market(&acct("keeper"), &wnative()));
        assert!(matches!(
            w.router.pool_events().iter().rev().nth(1),
            Some(PoolEvent::Seize { .. })
        ));
        assert!(matches!(
            w.router.events().last(),
            Some(RouterEvent::Liquidation { .. })
        ));
    }

    #[test]
    fn test_seizure_capped_at_collateral() {
        let mut w = underwater();
        w.oracle.set_price(wnative(), wad(2));
        let receipt = w
            .router
            .liquidate(&w.call("keeper"), &acct("alice"), &link(), &wnative(), wad(1_000))
            .unwrap();

        // 95% of 37 would need 19.33 wnative; only 10 exist
        assert_eq!(receipt.seized, wad(10));
        assert!(receipt.repaid < frac("35.15"));
        assert!(receipt.repaid > wad(18));
        assert!(w
            .router
            .pool(&wnative())
            .unwrap()
            .account_deposit_amount(&acct("alice"))
            .unwrap()
            .is_zero());
    }

    #[test]
    fn test_self_liquidation_rejected() {
        let mut w = underwater();
        let err = w
            .router
            .liquidate(&w.call("alice"), &acct("alice"), &link(), &wnative(), wad(1))
            .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized");
    }

    #[test]
    fn test_non_collateral_deposit_cannot_be_seized() {
        let mut w = underwater();
        w.router.deposit(&w.call("alice"), &link(), wad(1)).unwrap();
        let err = w
            .router
            .liquidate(&w.call("keeper"), &acct("alice"), &link(), &link(), wad(10))
            .unwrap_err();
        assert_eq!(err.error_code(), "insufficient_deposit");
    }
}
