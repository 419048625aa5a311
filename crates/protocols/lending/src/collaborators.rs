//! External collaborators consumed by pools
//!
//! The price oracle, the fee collector and the rewards manager live outside
//! the accounting engine. Pools and the router only see these traits; the
//! in-memory implementations below back embedding and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, AssetId, LendingError, Result};

/// Source of 18-decimal asset prices
pub trait PriceOracle: Send + Sync {
    fn get_price(&self, asset: &AssetId) -> Result<U256>;

    fn get_prices(&self, assets: &[AssetId]) -> Result<Vec<U256>> {
        assets.iter().map(|asset| self.get_price(asset)).collect()
    }
}

/// Receiver of protocol fees
///
/// Pools push the fee tokens to [`FeeCollector::address`] and then call
/// [`FeeCollector::receive_fee`]. An error aborts the operation.
pub trait FeeCollector: Send + Sync {
    fn address(&self) -> AccountId;

    fn receive_fee(&self, asset: &AssetId, amount: U256) -> Result<()>;
}

/// Direction and size of a deposit principal change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositDelta {
    Increase(U256),
    Decrease(U256),
}

/// Staking rewards module notified of deposit changes
pub trait RewardsManager: Send + Sync {
    fn notify_deposit(&self, account: &AccountId, asset: &AssetId, delta: DepositDelta)
        -> Result<()>;
}

/// Prices set by hand
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    prices: RwLock<BTreeMap<AssetId, U256>>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, asset: AssetId, price: U256) -> Self {
        self.set_price(asset, price);
        self
    }

    pub fn set_price(&self, asset: AssetId, price: U256) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(asset, price);
    }
}

impl PriceOracle for StaticPriceOracle {
    fn get_price(&self, asset: &AssetId) -> Result<U256> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        match prices.get(asset) {
            Some(price) if !price.is_zero() => Ok(*price),
            _ => Err(LendingError::UnpricedAsset {
                asset: asset.clone(),
            }),
        }
    }
}

/// Fee collector that keeps a running total per asset
#[derive(Debug)]
pub struct FeeVault {
    address: AccountId,
    received: Mutex<BTreeMap<AssetId, U256>>,
    rejecting: AtomicBool,
}

impl FeeVault {
    pub fn new(address: AccountId) -> Self {
        Self {
            address,
            received: Mutex::new(BTreeMap::new()),
            rejecting: AtomicBool::new(false),
        }
    }

    pub fn total_received(&self, asset: &AssetId) -> U256 {
        self.received().get(asset).copied().unwrap_or(U256::ZERO)
    }

    /// Make every subsequent `receive_fee` fail
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    fn received(&self) -> MutexGuard<'_, BTreeMap<AssetId, U256>> {
        self.received.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FeeCollector for FeeVault {
    fn address(&self) -> AccountId {
        self.address.clone()
    }

    fn receive_fee(&self, asset: &AssetId, amount: U256) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(LendingError::Unauthorized {
                caller: self.address.clone(),
                action: "receive fees",
            });
        }
        let mut received = self.received();
        let total = received.entry(asset.clone()).or_insert(U256::ZERO);
        *total = total.saturating_add(amount);
        Ok(())
    }
}

/// A notification seen by [`RecordingRewards`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardNotice {
    pub account: AccountId,
    pub asset: AssetId,
    pub delta: DepositDelta,
}

/// Rewards manager that records notifications and can be paused
#[derive(Debug, Default)]
pub struct RecordingRewards {
    notices: Mutex<Vec<RewardNotice>>,
    paused: AtomicBool,
}

impl RecordingRewards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<RewardNotice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RewardsManager for RecordingRewards {
    fn notify_deposit(
        &self,
        account: &AccountId,
        asset: &AssetId,
        delta: DepositDelta,
    ) -> Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(LendingError::RewardPaused {
                asset: asset.clone(),
            });
        }
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RewardNotice {
                account: account.clone(),
                asset: asset.clone(),
                delta,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_oracle_rejects_missing_and_zero_prices() {
        let oracle = StaticPriceOracle::new()
            .with_price(AssetId::new("wnative"), U256::from(5u64))
            .with_price(AssetId::new("dead"), U256::ZERO);

        assert_eq!(
            oracle.get_price(&AssetId::new("wnative")).unwrap(),
            U256::from(5u64)
        );
        assert!(matches!(
            oracle.get_price(&AssetId::new("dead")),
            Err(LendingError::UnpricedAsset { .. })
        ));
        assert!(oracle
            .get_prices(&[AssetId::new("wnative"), AssetId::new("usdc")])
            .is_err());
    }

    #[test]
    fn test_fee_vault_accumulates() {
        let vault = FeeVault::new(AccountId::new("collector"));
        let usdc = AssetId::new("usdc");
        vault.receive_fee(&usdc, U256::from(3u64)).unwrap();
        vault.receive_fee(&usdc, U256::from(4u64)).unwrap();
        assert_eq!(vault.total_received(&usdc), U256::from(7u64));

        vault.set_rejecting(true);
        assert!(vault.receive_fee(&usdc, U256::from(1u64)).is_err());
        assert_eq!(vault.total_received(&usdc), U256::from(7u64));
    }

    #[test]
    fn test_paused_rewards() {
        let rewards = RecordingRewards::new();
        let alice = AccountId::new("alice");
        let usdc = AssetId::new("usdc");
        rewards
            .notify_deposit(&alice, &usdc, DepositDelta::Increase(U256::from(1u64)))
            .unwrap();
        rewards.set_paused(true);
        let err = rewards
            .notify_deposit(&alice, &usdc, DepositDelta::Decrease(U256::from(1u64)))
            .unwrap_err();
        assert_eq!(err.error_code(), "reward_paused");
        assert_eq!(rewards.notices().len(), 1);
    }
}
