//! Swap routing interface
//!
//! Collateral swaps trade the flash-borrowed asset through a [`Swapper`].
//! Route discovery lives outside the engine; [`FixedRateSwapper`] is an
//! in-memory market maker quoting fixed rates from its own inventory.

use std::collections::BTreeMap;
use std::sync::RwLock;

use alloy_primitives::U256;
use lending::TokenLedger;
use serde::{Deserialize, Serialize};
use thermae_core::math::mul_fixed;
use thermae_core::{AccountId, AssetId, LendingError, Result};

/// A priced swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    pub amount_in: U256,
    pub amount_out: U256,
}

pub trait Swapper: Send + Sync {
    /// Best quote for selling `amount_in` of `asset_in`
    fn best_swap(&self, asset_in: &AssetId, asset_out: &AssetId, amount_in: U256)
        -> Result<SwapQuote>;

    /// Take `quote.amount_in` from `from` and pay it the output; returns the
    /// amount actually paid out
    fn execute_swap(
        &self,
        tokens: &mut TokenLedger,
        from: &AccountId,
        quote: &SwapQuote,
    ) -> Result<U256>;
}

/// Swaps at operator-set rates (18-decimal output per unit of input)
#[derive(Debug)]
pub struct FixedRateSwapper {
    account: AccountId,
    rates: RwLock<BTreeMap<(AssetId, AssetId), U256>>,
}

impl FixedRateSwapper {
    /// A swapper trading out of `account`'s balances
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            rates: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn with_rate(self, asset_in: AssetId, asset_out: AssetId, rate: U256) -> Self {
        self.set_rate(asset_in, asset_out, rate);
        self
    }

    pub fn set_rate(&self, asset_in: AssetId, asset_out: AssetId, rate: U256) {
        let mut rates = self.rates.write().unwrap_or_else(|e| e.into_inner());
        rates.insert((asset_in, asset_out), rate);
    }

    fn rate(&self, asset_in: &AssetId, asset_out: &AssetId) -> Option<U256> {
        let rates = self.rates.read().unwrap_or_else(|e| e.into_inner());
        rates.get(&(asset_in.clone(), asset_out.clone())).copied()
    }
}

impl Swapper for FixedRateSwapper {
    fn best_swap(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: U256,
    ) -> Result<SwapQuote> {
        let rate = self
            .rate(asset_in, asset_out)
            .filter(|rate| !rate.is_zero())
            .ok_or_else(|| LendingError::SwapFailed {
                reason: format!("no route from {asset_in} to {asset_out}"),
            })?;
        Ok(SwapQuote {
            asset_in: asset_in.clone(),
            asset_out: asset_out.clone(),
            amount_in,
            amount_out: mul_fixed(amount_in, rate)?,
        })
    }

    fn execute_swap(
        &self,
        tokens: &mut TokenLedger,
        from: &AccountId,
        quote: &SwapQuote,
    ) -> Result<U256> {
        let fresh = self.best_swap(&quote.asset_in, &quote.asset_out, quote.amount_in)?;
        if fresh.amount_out < quote.amount_out {
            return Err(LendingError::SwapFailed {
                reason: "rate moved since the quote".to_string(),
            });
        }
        tokens.transfer(&quote.asset_in, from, &self.account, quote.amount_in)?;
        tokens.transfer(&quote.asset_out, &self.account, from, fresh.amount_out)?;
        Ok(fresh.amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermae_core::math::{parse_fraction, wad};

    fn setup() -> (FixedRateSwapper, TokenLedger) {
        let (wnative, link) = (AssetId::new("wnative"), AssetId::new("link"));
        let swapper = FixedRateSwapper::new(AccountId::new("dex"))
            .with_rate(wnative.clone(), link.clone(), wad(5));
        let mut tokens = TokenLedger::new();
        tokens.mint(&link, &AccountId::new("dex"), wad(1_000)).unwrap();
        tokens.mint(&wnative, &AccountId::new("alice"), wad(10)).unwrap();
        (swapper, tokens)
    }

    #[test]
    fn test_quote_and_execute() {
        let (swapper, mut tokens) = setup();
        let (wnative, link) = (AssetId::new("wnative"), AssetId::new("link"));
        let alice = AccountId::new("alice");

        let quote = swapper.best_swap(&wnative, &link, wad(2)).unwrap();
        assert_eq!(quote.amount_out, wad(10));

        let out = swapper.execute_swap(&mut tokens, &alice, &quote).unwrap();
        assert_eq!(out, wad(10));
        assert_eq!(tokens.balance_of(&link, &alice), wad(10));
        assert_eq!(tokens.balance_of(&wnative, &alice), wad(8));
        assert_eq!(tokens.balance_of(&wnative, swapper.account()), wad(2));
    }

    #[test]
    fn test_unknown_route() {
        let (swapper, _) = setup();
        let err = swapper
            .best_swap(&AssetId::new("link"), &AssetId::new("wnative"), wad(1))
            .unwrap_err();
        assert_eq!(err.error_code(), "swap_failed");
    }

    #[test]
    fn test_stale_quote_rejected() {
        let (swapper, mut tokens) = setup();
        let (wnative, link) = (AssetId::new("wnative"), AssetId::new("link"));
        let quote = swapper.best_swap(&wnative, &link, wad(1)).unwrap();
        swapper.set_rate(wnative, link, parse_fraction("4.5").unwrap());

        let err = swapper
            .execute_swap(&mut tokens, &AccountId::new("alice"), &quote)
            .unwrap_err();
        assert_eq!(err.error_code(), "swap_failed");
    }

    #[test]
    fn test_unfunded_swapper() {
        let (swapper, mut tokens) = setup();
        let (wnative, link) = (AssetId::new("wnative"), AssetId::new("link"));
        let quote = swapper.best_swap(&wnative, &link, wad(10)).unwrap();
        tokens.burn(&link, swapper.account(), wad(990)).unwrap();

        let err = swapper
            .execute_swap(&mut tokens, &AccountId::new("alice"), &quote)
            .unwrap_err();
        assert_eq!(err.error_code(), "insufficient_balance");
    }
}
