//! Pool registry
//!
//! Owned by the router: the pool of every asset, the assets currently listed
//! for new deposits and borrows, and the markets each account has entered.

use std::collections::{BTreeMap, BTreeSet};

use lending::LendingPool;
use thermae_core::{AccountId, AssetId, LendingError, Result};

#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: BTreeMap<AssetId, LendingPool>,
    supported: BTreeSet<AssetId>,
    account_markets: BTreeMap<AccountId, BTreeSet<AssetId>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, asset: &AssetId) -> bool {
        self.pools.contains_key(asset)
    }

    pub(crate) fn insert(&mut self, pool: LendingPool) -> Result<()> {
        let asset = pool.asset().clone();
        if self.pools.contains_key(&asset) {
            return Err(LendingError::PoolAlreadyExists { asset });
        }
        self.pools.insert(asset, pool);
        Ok(())
    }

    pub fn pool(&self, asset: &AssetId) -> Result<&LendingPool> {
        self.pools
            .get(asset)
            .ok_or_else(|| LendingError::NoPoolForAsset {
                asset: asset.clone(),
            })
    }

    pub(crate) fn pool_mut(&mut self, asset: &AssetId) -> Result<&mut LendingPool> {
        self.pools
            .get_mut(asset)
            .ok_or_else(|| LendingError::NoPoolForAsset {
                asset: asset.clone(),
            })
    }

    pub fn pools(&self) -> impl Iterator<Item = &LendingPool> {
        self.pools.values()
    }

    /// Account holding the underlying of `asset`'s pool
    pub fn pool_for_underlying(&self, asset: &AssetId) -> Result<&AccountId> {
        self.pool(asset).map(LendingPool::address)
    }

    // ---- Listing ----

    /// List an asset; returns false if it already was
    pub(crate) fn support(&mut self, asset: &AssetId) -> Result<bool> {
        self.pool(asset)?;
        Ok(self.supported.insert(asset.clone()))
    }

    pub(crate) fn remove_support(&mut self, asset: &AssetId) -> Result<()> {
        if !self.supported.remove(asset) {
            return Err(LendingError::UnsupportedAsset {
                asset: asset.clone(),
            });
        }
        Ok(())
    }

    pub fn is_supported(&self, asset: &AssetId) -> bool {
        self.supported.contains(asset)
    }

    pub fn supported_assets(&self) -> Vec<AssetId> {
        self.supported.iter().cloned().collect()
    }

    /// The asset has a pool and is listed
    pub(crate) fn ensure_supported(&self, asset: &AssetId) -> Result<()> {
        self.pool(asset)?;
        if !self.is_supported(asset) {
            return Err(LendingError::UnsupportedAsset {
                asset: asset.clone(),
            });
        }
        Ok(())
    }

    // ---- Markets ----

    pub(crate) fn enter_market(&mut self, account: &AccountId, asset: &AssetId) {
        self.account_markets
            .entry(account.clone())
            .or_default()
            .insert(asset.clone());
    }

    pub fn is_account_in_market(&self, account: &AccountId, asset: &AssetId) -> bool {
        self.account_markets
            .get(account)
            .is_some_and(|markets| markets.contains(asset))
    }

    pub fn account_markets(&self, account: &AccountId) -> Vec<AssetId> {
        self.account_markets
            .get(account)
            .map(|markets| markets.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermae_core::PoolConfig;

    fn registry_with(assets: &[&str]) -> PoolRegistry {
        let mut registry = PoolRegistry::new();
        for asset in assets {
            let config = PoolConfig::new(AssetId::new(*asset));
            let pool = LendingPool::new(config, &AccountId::new("admin"), 0).unwrap();
            registry.insert(pool).unwrap();
        }
        registry
    }

    #[test]
    fn test_pool_lookup() {
        let registry = registry_with(&["wnative"]);
        let asset = AssetId::new("wnative");
        assert_eq!(
            registry.pool_for_underlying(&asset).unwrap(),
            &AccountId::new("pool:wnative")
        );

        let err = registry.pool(&AssetId::new("doge")).unwrap_err();
        assert_eq!(err.error_code(), "no_pool_for_asset");
    }

    #[test]
    fn test_duplicate_pool_rejected() {
        let mut registry = registry_with(&["wnative"]);
        let pool = LendingPool::new(
            PoolConfig::new(AssetId::new("wnative")),
            &AccountId::new("admin"),
            0,
        )
        .unwrap();
        let err = registry.insert(pool).unwrap_err();
        assert_eq!(err.error_code(), "pool_already_exists");
    }

    #[test]
    fn test_listing() {
        let mut registry = registry_with(&["wnative", "link"]);
        let link = AssetId::new("link");

        assert!(registry.support(&link).unwrap());
        assert!(!registry.support(&link).unwrap());
        assert!(registry.ensure_supported(&link).is_ok());

        registry.remove_support(&link).unwrap();
        let err = registry.ensure_supported(&link).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_asset");
        assert!(registry.remove_support(&link).is_err());

        // listing needs a pool
        let err = registry.support(&AssetId::new("doge")).unwrap_err();
        assert_eq!(err.error_code(), "no_pool_for_asset");
    }

    #[test]
    fn test_account_markets() {
        let mut registry = registry_with(&["wnative", "link"]);
        let alice = AccountId::new("alice");
        assert!(registry.account_markets(&alice).is_empty());

        registry.enter_market(&alice, &AssetId::new("link"));
        registry.enter_market(&alice, &AssetId::new("wnative"));
        registry.enter_market(&alice, &AssetId::new("link"));

        assert!(registry.is_account_in_market(&alice, &AssetId::new("link")));
        assert!(!registry.is_account_in_market(&AccountId::new("bob"), &AssetId::new("link")));
        assert_eq!(
            registry.account_markets(&alice),
            vec![AssetId::new("link"), AssetId::new("wnative")]
        );
    }
}
