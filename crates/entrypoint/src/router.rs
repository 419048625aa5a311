//! Entry point router
//!
//! The single front door of the protocol. It owns every pool through the
//! [`PoolRegistry`], the underlying [`TokenLedger`] and the external
//! collaborators, and drives the pools as their delegator: cross-pool checks
//! happen here, bookkeeping happens in the pools.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::U256;
use lending::{
    FeeCollector, LendingPool, PoolEnv, PoolEvent, PoolSnapshot, PriceOracle, RepayReceipt, Role,
    RewardsManager, TokenLedger,
};
use thermae_core::{
    AccountId, AssetId, FlashLoanConfig, InterestRateConfig, LendingConfig, LendingError,
    PoolConfig, ProtocolConfig, Result, Timestamp,
};

use crate::events::RouterEvent;
use crate::registry::PoolRegistry;
use crate::swap::Swapper;

/// Who is calling and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub sender: AccountId,
    pub now: Timestamp,
}

impl Call {
    pub fn new(sender: impl Into<String>, now: Timestamp) -> Self {
        Self {
            sender: AccountId::new(sender),
            now,
        }
    }
}

/// External services the router talks to
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub fee_collector: Arc<dyn FeeCollector>,
    pub rewards: Option<Arc<dyn RewardsManager>>,
    pub swapper: Option<Arc<dyn Swapper>>,
}

impl Collaborators {
    pub fn new(oracle: Arc<dyn PriceOracle>, fee_collector: Arc<dyn FeeCollector>) -> Self {
        Self {
            oracle,
            fee_collector,
            rewards: None,
            swapper: None,
        }
    }

    pub fn with_rewards(mut self, rewards: Arc<dyn RewardsManager>) -> Self {
        self.rewards = Some(rewards);
        self
    }

    pub fn with_swapper(mut self, swapper: Arc<dyn Swapper>) -> Self {
        self.swapper = Some(swapper);
        self
    }
}

/// Stands in for the fee collector while an operation runs. Notices are held
/// here and handed to the real collector once the outermost operation commits.
#[derive(Debug)]
struct PendingFees {
    collector: AccountId,
    queue: Mutex<Vec<(AssetId, U256)>>,
}

impl PendingFees {
    fn new(collector: AccountId) -> Self {
        Self {
            collector,
            queue: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, Vec<(AssetId, U256)>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn len(&self) -> usize {
        self.queue().len()
    }

    fn truncate(&self, len: usize) {
        self.queue().truncate(len);
    }

    fn take_from(&self, from: usize) -> Vec<(AssetId, U256)> {
        let mut queue = self.queue();
        let from = from.min(queue.len());
        queue.split_off(from)
    }
}

impl FeeCollector for PendingFees {
    fn address(&self) -> AccountId {
        self.collector.clone()
    }

    fn receive_fee(&self, asset: &AssetId, amount: U256) -> Result<()> {
        self.queue().push((asset.clone(), amount));
        Ok(())
    }
}

pub struct EntryPoint {
    pub(crate) address: AccountId,
    pub(crate) admins: BTreeSet<AccountId>,
    pub(crate) registry: PoolRegistry,
    pub(crate) tokens: TokenLedger,
    pub(crate) oracle: Arc<dyn PriceOracle>,
    pub(crate) fee_collector: Arc<dyn FeeCollector>,
    pub(crate) rewards: Option<Arc<dyn RewardsManager>>,
    pub(crate) swapper: Option<Arc<dyn Swapper>>,
    pub(crate) pool_events: Vec<PoolEvent>,
    pub(crate) events: Vec<RouterEvent>,
    /// Fee notices not yet delivered to `fee_collector`
    pending_fees: PendingFees,
    /// Nesting level of `atomically`; fees and rewards go out when it drops
    /// to zero
    depth: usize,
}

impl EntryPoint {
    /// A router acting as `address` with no pools yet
    pub fn new(
        address: AccountId,
        admins: impl IntoIterator<Item = AccountId>,
        collaborators: Collaborators,
    ) -> Self {
        let pending_fees = PendingFees::new(collaborators.fee_collector.address());
        Self {
            address,
            admins: admins.into_iter().collect(),
            registry: PoolRegistry::new(),
            tokens: TokenLedger::new(),
            oracle: collaborators.oracle,
            fee_collector: collaborators.fee_collector,
            rewards: collaborators.rewards,
            swapper: collaborators.swapper,
            pool_events: Vec::new(),
            events: Vec::new(),
            pending_fees,
            depth: 0,
        }
    }

    /// Build a router and open every configured pool, created by the first
    /// admin
    pub fn from_config(
        config: &ProtocolConfig,
        collaborators: Collaborators,
        now: Timestamp,
    ) -> Result<Self> {
        config.validate()?;
        if collaborators.fee_collector.address() != config.fee_collector {
            return Err(LendingError::invalid_config(format!(
                "fee collector {} does not match configured {}",
                collaborators.fee_collector.address(),
                config.fee_collector
            )));
        }
        let creator = config
            .admins
            .first()
            .cloned()
            .ok_or_else(|| LendingError::invalid_config("at least one admin is required"))?;

        let mut router = Self::new(
            config.router.clone(),
            config.admins.iter().cloned(),
            collaborators,
        );
        let call = Call {
            sender: creator,
            now,
        };
        for pool in &config.pools {
            router.create_pool(&call, pool.clone())?;
        }
        tracing::info!(
            router = %router.address,
            pools = config.pools.len(),
            admins = router.admins.len(),
            "Router initialized"
        );
        Ok(router)
    }

    // ---- Accessors ----

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn is_admin(&self, account: &AccountId) -> bool {
        self.admins.contains(account)
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn pool(&self, asset: &AssetId) -> Result<&LendingPool> {
        self.registry.pool(asset)
    }

    pub fn pool_for_underlying(&self, asset: &AssetId) -> Result<&AccountId> {
        self.registry.pool_for_underlying(asset)
    }

    pub fn supported_assets(&self) -> Vec<AssetId> {
        self.registry.supported_assets()
    }

    pub fn is_account_in_market(&self, account: &AccountId, asset: &AssetId) -> bool {
        self.registry.is_account_in_market(account, asset)
    }

    pub fn account_markets(&self, account: &AccountId) -> Vec<AssetId> {
        self.registry.account_markets(account)
    }

    pub fn tokens(&self) -> &TokenLedger {
        &self.tokens
    }

    /// Direct access to balances, for funding accounts
    pub fn tokens_mut(&mut self) -> &mut TokenLedger {
        &mut self.tokens
    }

    pub fn oracle(&self) -> &dyn PriceOracle {
        self.oracle.as_ref()
    }

    pub fn events(&self) -> &[RouterEvent] {
        &self.events
    }

    pub fn pool_events(&self) -> &[PoolEvent] {
        &self.pool_events
    }

    /// Snapshot of every pool
    pub fn markets(&self) -> Result<Vec<PoolSnapshot>> {
        self.registry.pools().map(LendingPool::snapshot).collect()
    }

    // ---- Plumbing ----

    /// Run `op` as one unit: if it fails, every pool, the token ledger, the
    /// registry and both event logs are put back as they were. Fee notices
    /// and rewards go out once the outermost operation has committed; a fee
    /// collector refusing its notice reverts the operation.
    pub(crate) fn atomically<R>(
        &mut self,
        action: &'static str,
        op: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let registry = self.registry.clone();
        let checkpoint = self.tokens.checkpoint();
        let pool_events = self.pool_events.len();
        let events = self.events.len();
        let fees = self.pending_fees.len();

        self.depth += 1;
        let result = op(self);
        self.depth -= 1;

        let result = match result {
            Ok(value) if self.depth == 0 => self.deliver_fees(fees).map(|()| value),
            other => other,
        };

        match result {
            Ok(value) => {
                if self.depth == 0 {
                    self.notify_rewards(pool_events);
                }
                Ok(value)
            }
            Err(e) => {
                self.registry = registry;
                self.tokens.rollback(checkpoint);
                self.pool_events.truncate(pool_events);
                self.events.truncate(events);
                self.pending_fees.truncate(fees);
                tracing::warn!(action, error = %e, code = e.error_code(), "Operation reverted");
                Err(e)
            }
        }
    }

    /// Hand queued fee notices to the collector, stopping at the first refusal
    fn deliver_fees(&self, from: usize) -> Result<()> {
        for (asset, amount) in self.pending_fees.take_from(from) {
            self.fee_collector.receive_fee(&asset, amount)?;
            tracing::debug!(asset = %asset, amount = %amount, "Fee delivered");
        }
        Ok(())
    }

    fn notify_rewards(&self, from: usize) {
        let Some(rewards) = &self.rewards else {
            return;
        };
        for event in &self.pool_events[from..] {
            for (account, delta) in event.deposit_deltas() {
                if let Err(e) = rewards.notify_deposit(&account, event.asset(), delta) {
                    tracing::warn!(
                        account = %account,
                        asset = %event.asset(),
                        error = %e,
                        "Rewards notification failed"
                    );
                }
            }
        }
    }

    /// Call into `asset`'s pool as `caller`
    pub(crate) fn with_pool<R>(
        &mut self,
        asset: &AssetId,
        caller: &AccountId,
        now: Timestamp,
        op: impl FnOnce(&mut LendingPool, &mut PoolEnv<'_>) -> Result<R>,
    ) -> Result<R> {
        let pool = self.registry.pool_mut(asset)?;
        let mut env = PoolEnv {
            caller,
            now,
            tokens: &mut self.tokens,
            oracle: self.oracle.as_ref(),
            fees: &self.pending_fees,
            events: &mut self.pool_events,
        };
        op(pool, &mut env)
    }

    /// Call into `asset`'s pool as the router
    pub(crate) fn delegate<R>(
        &mut self,
        asset: &AssetId,
        now: Timestamp,
        op: impl FnOnce(&mut LendingPool, &mut PoolEnv<'_>) -> Result<R>,
    ) -> Result<R> {
        let router = self.address.clone();
        self.with_pool(asset, &router, now, op)
    }

    fn ensure_admin(&self, caller: &AccountId, action: &'static str) -> Result<()> {
        if !self.is_admin(caller) {
            return Err(LendingError::Unauthorized {
                caller: caller.clone(),
                action,
            });
        }
        Ok(())
    }

    // ---- Administration ----

    /// Open a pool for `config.asset` and list it. The caller becomes the
    /// pool's admin; the router becomes its delegator.
    pub fn create_pool(&mut self, call: &Call, config: PoolConfig) -> Result<AccountId> {
        self.ensure_admin(&call.sender, "create pools")?;
        let asset = config.asset.clone();

        let address = self.atomically("create_pool", |router| {
            if router.registry.contains(&asset) {
                return Err(LendingError::PoolAlreadyExists {
                    asset: asset.clone(),
                });
            }
            let pool = LendingPool::new(config, &call.sender, call.now)?;
            let address = pool.address().clone();
            router.registry.insert(pool)?;

            let delegate = router.address.clone();
            router.with_pool(&asset, &call.sender, call.now, |pool, env| {
                pool.grant_role(env, &delegate, Role::Delegator)?;
                pool.grant_role(env, &delegate, Role::Admin)
            })?;
            router.registry.support(&asset)?;

            router.events.push(RouterEvent::NewPool {
                asset: asset.clone(),
                pool: address.clone(),
                creator: call.sender.clone(),
            });
            Ok(address)
        })?;

        tracing::info!(asset = %asset, pool = %address, creator = %call.sender, "New pool");
        Ok(address)
    }

    /// List an asset that has a pool
    pub fn support_asset(&mut self, call: &Call, asset: &AssetId) -> Result<()> {
        self.ensure_admin(&call.sender, "list assets")?;
        self.atomically("support_asset", |router| {
            if router.registry.support(asset)? {
                router.events.push(RouterEvent::AssetSupported {
                    asset: asset.clone(),
                });
                tracing::info!(asset = %asset, "Asset supported");
            }
            Ok(())
        })
    }

    /// Delist an asset: new deposits and borrows are refused, everything
    /// else keeps working
    pub fn remove_support_for_asset(&mut self, call: &Call, asset: &AssetId) -> Result<()> {
        self.ensure_admin(&call.sender, "delist assets")?;
        self.atomically("remove_support_for_asset", |router| {
            router.registry.remove_support(asset)?;
            router.events.push(RouterEvent::AssetSupportRemoved {
                asset: asset.clone(),
            });
            tracing::info!(asset = %asset, "Asset support removed");
            Ok(())
        })
    }

    pub fn set_lending_config(
        &mut self,
        call: &Call,
        asset: &AssetId,
        config: LendingConfig,
    ) -> Result<()> {
        self.atomically("set_lending_config", |router| {
            router.with_pool(asset, &call.sender, call.now, |pool, env| {
                pool.set_lending_config(env, config)
            })
        })
    }

    pub fn set_interest_rate_config(
        &mut self,
        call: &Call,
        asset: &AssetId,
        config: InterestRateConfig,
    ) -> Result<()> {
        self.atomically("set_interest_rate_config", |router| {
            router.with_pool(asset, &call.sender, call.now, |pool, env| {
                pool.set_interest_rate_config(env, config)
            })
        })
    }

    pub fn set_flash_loan_config(
        &mut self,
        call: &Call,
        asset: &AssetId,
        config: FlashLoanConfig,
    ) -> Result<()> {
        self.atomically("set_flash_loan_config", |router| {
            router.with_pool(asset, &call.sender, call.now, |pool, env| {
                pool.set_flash_loan_config(env, config)
            })
        })
    }

    pub fn grant_role(
        &mut self,
        call: &Call,
        asset: &AssetId,
        account: &AccountId,
        role: Role,
    ) -> Result<()> {
        self.atomically("grant_role", |router| {
            router.with_pool(asset, &call.sender, call.now, |pool, env| {
                pool.grant_role(env, account, role)
            })
        })
    }

    pub fn revoke_role(
        &mut self,
        call: &Call,
        asset: &AssetId,
        account: &AccountId,
        role: Role,
    ) -> Result<()> {
        self.atomically("revoke_role", |router| {
            router.with_pool(asset, &call.sender, call.now, |pool, env| {
                pool.revoke_role(env, account, role)
            })
        })
    }

    // ---- Account operations ----

    /// Bring `asset`'s pool forward to `call.now`
    pub fn accrue_interest(&mut self, call: &Call, asset: &AssetId) -> Result<()> {
        self.atomically("accrue_interest", |router| {
            router.delegate(asset, call.now, |pool, env| pool.accrue_interest(env))
        })
    }

    pub fn deposit(&mut self, call: &Call, asset: &AssetId, amount: U256) -> Result<()> {
        self.atomically("deposit", |router| {
            router.registry.ensure_supported(asset)?;
            router.registry.enter_market(&call.sender, asset);
            router.delegate(asset, call.now, |pool, env| {
                pool.deposit(env, &call.sender, amount)
            })?;
            router.events.push(RouterEvent::Deposit {
                account: call.sender.clone(),
                asset: asset.clone(),
                amount,
            });
            Ok(())
        })
    }

    /// Withdraw, refused if the remaining collateral would not cover the
    /// account's debt across all pools
    pub fn withdraw(&mut self, call: &Call, asset: &AssetId, amount: U256) -> Result<()> {
        self.atomically("withdraw", |router| {
            router.registry.pool(asset)?;
            router.accrue_markets(&call.sender, call.now)?;
            router.ensure_withdraw_allowed(&call.sender, asset, amount)?;
            router.delegate(asset, call.now, |pool, env| {
                pool.withdraw_delegated(env, &call.sender, amount)
            })?;
            router.events.push(RouterEvent::Withdraw {
                account: call.sender.clone(),
                asset: asset.clone(),
                amount,
            });
            Ok(())
        })
    }

    /// Withdraw the whole deposit, returning the amount
    pub fn withdraw_all(&mut self, call: &Call, asset: &AssetId) -> Result<U256> {
        self.atomically("withdraw_all", |router| {
            router.delegate(asset, call.now, |pool, env| pool.accrue_interest(env))?;
            let amount = router.pool(asset)?.account_deposit_amount(&call.sender)?;
            router.withdraw(call, asset, amount)?;
            Ok(amount)
        })
    }

    /// Borrow, refused if the new debt would exceed the account's collateral
    /// bound across all pools
    pub fn borrow(&mut self, call: &Call, asset: &AssetId, amount: U256) -> Result<()> {
        self.atomically("borrow", |router| {
            router.registry.ensure_supported(asset)?;
            router.registry.enter_market(&call.sender, asset);
            router.accrue_markets(&call.sender, call.now)?;
            router.ensure_borrow_allowed(&call.sender, asset, amount)?;
            router.delegate(asset, call.now, |pool, env| {
                pool.borrow_delegated(env, &call.sender, amount)
            })?;
            router.events.push(RouterEvent::Borrow {
                account: call.sender.clone(),
                asset: asset.clone(),
                amount,
            });
            Ok(())
        })
    }

    /// Repay the caller's own debt
    pub fn repay(&mut self, call: &Call, asset: &AssetId, amount: U256) -> Result<RepayReceipt> {
        self.repay_for(call, &call.sender, asset, amount)
    }

    /// The caller repays up to `amount` of `borrower`'s debt
    pub fn repay_for(
        &mut self,
        call: &Call,
        borrower: &AccountId,
        asset: &AssetId,
        amount: U256,
    ) -> Result<RepayReceipt> {
        self.atomically("repay", |router| {
            let receipt = router.delegate(asset, call.now, |pool, env| {
                pool.repay_for(env, &call.sender, borrower, amount)
            })?;
            router.events.push(RouterEvent::Repay {
                payer: call.sender.clone(),
                account: borrower.clone(),
                asset: asset.clone(),
                amount: receipt.repaid,
            });
            Ok(receipt)
        })
    }

    /// Use (or stop using) the caller's deposit in `asset` as collateral;
    /// turning it off must leave the account solvent across all pools
    pub fn set_collateral(&mut self, call: &Call, asset: &AssetId, enabled: bool) -> Result<()> {
        self.atomically("set_collateral", |router| {
            router.registry.pool(asset)?;
            router.registry.enter_market(&call.sender, asset);
            router.accrue_markets(&call.sender, call.now)?;
            router.delegate(asset, call.now, |pool, env| {
                pool.set_collateral_delegated(env, &call.sender, enabled)
            })?;
            if !enabled {
                router.ensure_solvent(&call.sender, "Disable collateral")?;
            }
            router.events.push(RouterEvent::SetCollateral {
                account: call.sender.clone(),
                asset: asset.clone(),
                enabled,
            });
            Ok(())
        })
    }
}
