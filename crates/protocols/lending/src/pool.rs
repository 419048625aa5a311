//! Lending Pool
//!
//! One pool per underlying asset. The pool owns its [`MarketLedger`], accrues
//! interest before every operation and moves underlying tokens through the
//! [`TokenLedger`] handed in with the [`PoolEnv`].
//!
//! Operations are atomic: ledger changes are staged in a cache and committed
//! only once every check and token transfer succeeded; transfers made by a
//! failed operation are unwound from the token journal.

use alloy_primitives::U256;
use thermae_core::math::{checked_add, mul_fixed, to_value};
use thermae_core::{
    AccountId, AssetId, FlashLoanConfig, InterestRateConfig, LendingConfig, LendingError,
    PoolConfig, Result, Timestamp,
};

use crate::collaborators::{FeeCollector, PriceOracle};
use crate::events::PoolEvent;
use crate::ledger::{LedgerCache, MarketLedger, PoolState};
use crate::rates;
use crate::roles::{Role, Roles};
use crate::tokens::TokenLedger;

/// Everything a pool operation needs from the outside world
pub struct PoolEnv<'a> {
    /// Account invoking the operation
    pub caller: &'a AccountId,
    pub now: Timestamp,
    pub tokens: &'a mut TokenLedger,
    pub oracle: &'a dyn PriceOracle,
    pub fees: &'a dyn FeeCollector,
    pub events: &'a mut Vec<PoolEvent>,
}

/// Outcome of a repayment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepayReceipt {
    /// Debt actually repaid (the request capped at the outstanding debt)
    pub repaid: U256,
    /// Part of `repaid` that was interest
    pub interest_paid: U256,
    /// Pushed to the fee collector
    pub fee: U256,
}

/// Immutable identity plus the mutable configuration of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PoolParams {
    pub(crate) asset: AssetId,
    pub(crate) address: AccountId,
    pub(crate) decimals: u8,
    pub(crate) lending: LendingConfig,
    pub(crate) interest_rate: InterestRateConfig,
    pub(crate) flash_loan: FlashLoanConfig,
}

impl PoolParams {
    pub(crate) fn accrue(&self, cache: &mut LedgerCache<'_>, now: Timestamp) -> Result<()> {
        let accrual = cache.accrue(now, &self.interest_rate, self.lending.protocol_fee)?;
        if accrual.elapsed > 0 {
            tracing::debug!(
                asset = %self.asset,
                elapsed = accrual.elapsed,
                utilization = %accrual.utilization,
                borrow_rate = %accrual.borrow_rate,
                deposit_rate = %accrual.deposit_rate,
                borrow_interest = %accrual.borrow_interest,
                "Accrued interest"
            );
        }
        Ok(())
    }

    /// Push `fee` from the pool to the fee collector and notify it
    pub(crate) fn push_fee(&self, env: &mut PoolEnv<'_>, fee: U256) -> Result<()> {
        if fee.is_zero() {
            return Ok(());
        }
        let collector = env.fees.address();
        env.tokens
            .transfer(&self.asset, &self.address, &collector, fee)?;
        env.fees.receive_fee(&self.asset, fee)
    }

    pub(crate) fn price(&self, oracle: &dyn PriceOracle) -> Result<U256> {
        let price = oracle.get_price(&self.asset)?;
        if price.is_zero() {
            return Err(LendingError::UnpricedAsset {
                asset: self.asset.clone(),
            });
        }
        Ok(price)
    }
}

/// Run `op`, unwinding its token transfers and events if it fails
pub(crate) fn atomic<R>(
    env: &mut PoolEnv<'_>,
    op: impl FnOnce(&mut PoolEnv<'_>) -> Result<R>,
) -> Result<R> {
    let checkpoint = env.tokens.checkpoint();
    let events = env.events.len();
    match op(env) {
        Ok(value) => Ok(value),
        Err(e) => {
            env.tokens.rollback(checkpoint);
            env.events.truncate(events);
            Err(e)
        }
    }
}

fn ensure_non_zero(amount: U256) -> Result<()> {
    if amount.is_zero() {
        return Err(LendingError::ZeroAmount);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LendingPool {
    pub(crate) params: PoolParams,
    pub(crate) ledger: MarketLedger,
    pub(crate) roles: Roles,
    pub(crate) in_flight: bool,
}

impl LendingPool {
    /// Open a pool at `now`; `admin` receives the [`Role::Admin`] capability
    pub fn new(config: PoolConfig, admin: &AccountId, now: Timestamp) -> Result<Self> {
        config.validate()?;
        let mut roles = Roles::new();
        roles.grant(admin, Role::Admin);
        Ok(Self {
            params: PoolParams {
                address: AccountId::pool(&config.asset),
                asset: config.asset,
                decimals: config.decimals,
                lending: config.lending,
                interest_rate: config.interest_rate,
                flash_loan: config.flash_loan,
            },
            ledger: MarketLedger::new(now),
            roles,
            in_flight: false,
        })
    }

    pub fn asset(&self) -> &AssetId {
        &self.params.asset
    }

    /// Account holding the pool's underlying tokens
    pub fn address(&self) -> &AccountId {
        &self.params.address
    }

    pub fn decimals(&self) -> u8 {
        self.params.decimals
    }

    pub fn lending_config(&self) -> &LendingConfig {
        &self.params.lending
    }

    pub fn interest_rate_config(&self) -> &InterestRateConfig {
        &self.params.interest_rate
    }

    pub fn flash_loan_config(&self) -> &FlashLoanConfig {
        &self.params.flash_loan
    }

    pub fn config(&self) -> PoolConfig {
        PoolConfig {
            asset: self.params.asset.clone(),
            decimals: self.params.decimals,
            lending: self.params.lending.clone(),
            interest_rate: self.params.interest_rate.clone(),
            flash_loan: self.params.flash_loan.clone(),
        }
    }

    pub fn ledger(&self) -> &MarketLedger {
        &self.ledger
    }

    pub fn state(&self) -> &PoolState {
        self.ledger.state()
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn is_flash_loan_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if self.in_flight {
            return Err(LendingError::Reentrancy {
                asset: self.params.asset.clone(),
            });
        }
        Ok(())
    }

    /// The caller is the account itself or a delegator
    pub(crate) fn ensure_acting_for(
        &self,
        caller: &AccountId,
        account: &AccountId,
        action: &'static str,
    ) -> Result<()> {
        if caller == account {
            return Ok(());
        }
        self.roles.ensure(caller, Role::Delegator, action)
    }

    // ---- Views ----

    pub fn cash(&self) -> U256 {
        self.state().cash
    }

    pub fn total_deposits(&self) -> U256 {
        self.state().total_deposits
    }

    pub fn total_borrows(&self) -> U256 {
        self.state().total_borrows
    }

    pub fn reserves(&self) -> U256 {
        self.state().reserves
    }

    pub fn utilization(&self) -> Result<U256> {
        self.ledger.current_utilization()
    }

    /// Current borrow rate per second
    pub fn borrow_rate(&self) -> Result<U256> {
        rates::borrow_rate_per_second(self.utilization()?, &self.params.interest_rate)
    }

    /// Current deposit rate per second
    pub fn deposit_rate(&self) -> Result<U256> {
        let utilization = self.utilization()?;
        let borrow_rate = rates::borrow_rate_per_second(utilization, &self.params.interest_rate)?;
        rates::deposit_rate_per_second(utilization, borrow_rate, self.params.lending.protocol_fee)
    }

    pub fn account_deposit_amount(&self, account: &AccountId) -> Result<U256> {
        self.ledger.current_deposit(account)
    }

    pub fn account_debt_amount(&self, account: &AccountId) -> Result<U256> {
        self.ledger.current_debt(account)
    }

    pub fn is_collateral(&self, account: &AccountId) -> bool {
        self.ledger
            .position(account)
            .is_some_and(|position| position.is_collateral)
    }

    /// Oracle price of the underlying; zero counts as unpriced
    pub fn price(&self, oracle: &dyn PriceOracle) -> Result<U256> {
        self.params.price(oracle)
    }

    /// Value of `amount` underlying at the oracle price
    pub fn value_of(&self, oracle: &dyn PriceOracle, amount: U256) -> Result<U256> {
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        to_value(amount, self.price(oracle)?, self.params.decimals)
    }

    pub fn account_deposit_value(
        &self,
        oracle: &dyn PriceOracle,
        account: &AccountId,
    ) -> Result<U256> {
        self.value_of(oracle, self.account_deposit_amount(account)?)
    }

    pub fn account_debt_value(&self, oracle: &dyn PriceOracle, account: &AccountId) -> Result<U256> {
        self.value_of(oracle, self.account_debt_amount(account)?)
    }

    /// Deposit value if the deposit is used as collateral, else 0
    pub fn account_collateral_value(
        &self,
        oracle: &dyn PriceOracle,
        account: &AccountId,
    ) -> Result<U256> {
        if !self.is_collateral(account) {
            return Ok(U256::ZERO);
        }
        self.account_deposit_value(oracle, account)
    }

    /// Collateral value times the collateral factor
    pub fn account_max_debt_value(
        &self,
        oracle: &dyn PriceOracle,
        account: &AccountId,
    ) -> Result<U256> {
        let collateral = self.account_collateral_value(oracle, account)?;
        mul_fixed(collateral, self.params.lending.collateral_factor)
    }

    // ---- Operations ----

    /// Bring the pool's indices forward to `env.now`
    pub fn accrue_interest(&mut self, env: &mut PoolEnv<'_>) -> Result<()> {
        self.ensure_idle()?;
        let params = &self.params;
        let mut cache = self.ledger.cache();
        params.accrue(&mut cache, env.now)?;
        cache.commit();
        Ok(())
    }

    pub fn deposit(&mut self, env: &mut PoolEnv<'_>, account: &AccountId, amount: U256) -> Result<()> {
        self.ensure_idle()?;
        self.ensure_acting_for(env.caller, account, "deposit")?;
        ensure_non_zero(amount)?;

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;
            env.tokens
                .transfer(&params.asset, account, &params.address, amount)?;
            cache.add_deposit(account, amount)?;
            cache.credit_cash(amount)?;
            cache.commit();

            env.events.push(PoolEvent::Deposit {
                asset: params.asset.clone(),
                account: account.clone(),
                amount,
            });
            Ok(())
        })?;

        tracing::info!(asset = %self.params.asset, account = %account, amount = %amount, "Deposit");
        Ok(())
    }

    pub fn withdraw(&mut self, env: &mut PoolEnv<'_>, account: &AccountId, amount: U256) -> Result<()> {
        self.ensure_acting_for(env.caller, account, "withdraw")?;
        self.withdraw_checked(env, account, amount, true)
    }

    /// Withdraw without the single-pool collateral bound; the delegator has
    /// already checked the account across pools
    pub fn withdraw_delegated(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        amount: U256,
    ) -> Result<()> {
        self.roles.ensure(env.caller, Role::Delegator, "withdraw on behalf")?;
        self.withdraw_checked(env, account, amount, false)
    }

    /// Withdraw the whole current deposit, returning the amount
    pub fn withdraw_all(&mut self, env: &mut PoolEnv<'_>, account: &AccountId) -> Result<U256> {
        let state = self.ledger.state().accrued(
            env.now,
            &self.params.interest_rate,
            self.params.lending.protocol_fee,
        )?;
        let amount = match self.ledger.position(account) {
            Some(position) => position.current_deposit(&state)?,
            None => U256::ZERO,
        };
        self.withdraw(env, account, amount)?;
        Ok(amount)
    }

    fn withdraw_checked(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        amount: U256,
        local_bound: bool,
    ) -> Result<()> {
        self.ensure_idle()?;
        ensure_non_zero(amount)?;

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;

            let deposit = cache.current_deposit(account)?;
            if amount > deposit {
                return Err(LendingError::InsufficientDeposit {
                    requested: amount,
                    available: deposit,
                });
            }
            if local_bound && cache.is_collateral(account) {
                let debt = cache.current_debt(account)?;
                let bound = mul_fixed(deposit - amount, params.lending.collateral_factor)?;
                if !debt.is_zero() && debt > bound {
                    return Err(LendingError::LiquidationThresholdReached { action: "Withdraw" });
                }
            }

            cache.remove_deposit(account, amount)?;
            cache.debit_cash(amount)?;
            env.tokens
                .transfer(&params.asset, &params.address, account, amount)?;
            cache.commit();

            env.events.push(PoolEvent::Withdraw {
                asset: params.asset.clone(),
                account: account.clone(),
                amount,
            });
            Ok(())
        })?;

        tracing::info!(asset = %self.params.asset, account = %account, amount = %amount, "Withdraw");
        Ok(())
    }

    pub fn borrow(&mut self, env: &mut PoolEnv<'_>, account: &AccountId, amount: U256) -> Result<()> {
        self.ensure_acting_for(env.caller, account, "borrow")?;
        self.borrow_checked(env, account, amount, true)
    }

    /// Borrow without the single-pool collateral bound; the delegator has
    /// already checked the account across pools
    pub fn borrow_delegated(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        amount: U256,
    ) -> Result<()> {
        self.roles.ensure(env.caller, Role::Delegator, "borrow on behalf")?;
        self.borrow_checked(env, account, amount, false)
    }

    fn borrow_checked(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        amount: U256,
        local_bound: bool,
    ) -> Result<()> {
        self.ensure_idle()?;
        if !self.params.lending.borrowing_allowed {
            return Err(LendingError::BorrowingDisabled {
                asset: self.params.asset.clone(),
            });
        }
        ensure_non_zero(amount)?;

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;

            let cash = cache.state().cash;
            if amount > cash {
                return Err(LendingError::InsufficientCash {
                    requested: amount,
                    available: cash,
                });
            }
            if local_bound {
                let debt = checked_add(cache.current_debt(account)?, amount)?;
                let bound = if cache.is_collateral(account) {
                    mul_fixed(cache.current_deposit(account)?, params.lending.collateral_factor)?
                } else {
                    U256::ZERO
                };
                if debt > bound {
                    return Err(LendingError::LiquidationThresholdReached { action: "Borrow" });
                }
            }

            cache.add_borrow(account, amount)?;
            cache.debit_cash(amount)?;
            env.tokens
                .transfer(&params.asset, &params.address, account, amount)?;
            cache.commit();

            env.events.push(PoolEvent::Borrow {
                asset: params.asset.clone(),
                account: account.clone(),
                amount,
            });
            Ok(())
        })?;

        tracing::info!(asset = %self.params.asset, account = %account, amount = %amount, "Borrow");
        Ok(())
    }

    /// Repay the account's own debt
    pub fn repay(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        amount: U256,
    ) -> Result<RepayReceipt> {
        self.repay_for(env, account, account, amount)
    }

    /// `payer` repays up to `amount` of `borrower`'s debt
    pub fn repay_for(
        &mut self,
        env: &mut PoolEnv<'_>,
        payer: &AccountId,
        borrower: &AccountId,
        amount: U256,
    ) -> Result<RepayReceipt> {
        self.ensure_idle()?;
        self.ensure_acting_for(env.caller, payer, "repay")?;
        ensure_non_zero(amount)?;

        let receipt = atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;
            let receipt = settle_debt(params, &mut cache, env, payer, borrower, amount)?;
            cache.commit();

            if !receipt.repaid.is_zero() {
                env.events.push(PoolEvent::Repay {
                    asset: params.asset.clone(),
                    payer: payer.clone(),
                    account: borrower.clone(),
                    amount: receipt.repaid,
                    interest: receipt.interest_paid,
                    fee: receipt.fee,
                });
            }
            Ok(receipt)
        })?;

        tracing::info!(
            asset = %self.params.asset,
            payer = %payer,
            account = %borrower,
            repaid = %receipt.repaid,
            interest = %receipt.interest_paid,
            fee = %receipt.fee,
            "Repay"
        );
        Ok(receipt)
    }

    /// Use (or stop using) the account's deposit as collateral
    pub fn set_collateral(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        enabled: bool,
    ) -> Result<()> {
        self.ensure_acting_for(env.caller, account, "set collateral")?;
        self.set_collateral_checked(env, account, enabled, true)
    }

    /// Toggle collateral without the single-pool bound
    pub fn set_collateral_delegated(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        enabled: bool,
    ) -> Result<()> {
        self.roles
            .ensure(env.caller, Role::Delegator, "set collateral on behalf")?;
        self.set_collateral_checked(env, account, enabled, false)
    }

    fn set_collateral_checked(
        &mut self,
        env: &mut PoolEnv<'_>,
        account: &AccountId,
        enabled: bool,
        local_bound: bool,
    ) -> Result<()> {
        self.ensure_idle()?;

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;
            // without collateral here the local bound is zero
            if !enabled && local_bound && !cache.current_debt(account)?.is_zero() {
                return Err(LendingError::LiquidationThresholdReached {
                    action: "Disable collateral",
                });
            }
            cache.set_collateral(account, enabled);
            cache.commit();

            env.events.push(PoolEvent::SetCollateral {
                asset: params.asset.clone(),
                account: account.clone(),
                enabled,
            });
            Ok(())
        })?;

        tracing::info!(asset = %self.params.asset, account = %account, enabled, "Set collateral");
        Ok(())
    }

    // ---- Administration ----

    pub fn set_lending_config(&mut self, env: &mut PoolEnv<'_>, config: LendingConfig) -> Result<()> {
        self.roles.ensure(env.caller, Role::Admin, "set lending config")?;
        config.validate()?;
        self.accrue_interest(env)?;
        self.params.lending = config.clone();
        env.events.push(PoolEvent::LendingConfigUpdated {
            asset: self.params.asset.clone(),
            config,
        });
        tracing::info!(asset = %self.params.asset, caller = %env.caller, "Lending config updated");
        Ok(())
    }

    pub fn set_interest_rate_config(
        &mut self,
        env: &mut PoolEnv<'_>,
        config: InterestRateConfig,
    ) -> Result<()> {
        self.roles
            .ensure(env.caller, Role::Admin, "set interest rate config")?;
        config.validate()?;
        // interest up to now is owed at the old curve
        self.accrue_interest(env)?;
        self.params.interest_rate = config.clone();
        env.events.push(PoolEvent::InterestRateConfigUpdated {
            asset: self.params.asset.clone(),
            config,
        });
        tracing::info!(asset = %self.params.asset, caller = %env.caller, "Interest rate config updated");
        Ok(())
    }

    pub fn set_flash_loan_config(
        &mut self,
        env: &mut PoolEnv<'_>,
        config: FlashLoanConfig,
    ) -> Result<()> {
        self.roles
            .ensure(env.caller, Role::Admin, "set flash loan config")?;
        config.validate()?;
        self.accrue_interest(env)?;
        self.params.flash_loan = config.clone();
        env.events.push(PoolEvent::FlashLoanConfigUpdated {
            asset: self.params.asset.clone(),
            config,
        });
        tracing::info!(asset = %self.params.asset, caller = %env.caller, "Flash loan config updated");
        Ok(())
    }

    pub fn grant_role(&mut self, env: &mut PoolEnv<'_>, account: &AccountId, role: Role) -> Result<()> {
        self.roles.ensure(env.caller, Role::Admin, "grant roles")?;
        if self.roles.grant(account, role) {
            env.events.push(PoolEvent::RoleGranted {
                asset: self.params.asset.clone(),
                account: account.clone(),
                role,
            });
            tracing::info!(asset = %self.params.asset, account = %account, ?role, "Role granted");
        }
        Ok(())
    }

    pub fn revoke_role(&mut self, env: &mut PoolEnv<'_>, account: &AccountId, role: Role) -> Result<()> {
        self.roles.ensure(env.caller, Role::Admin, "revoke roles")?;
        if self.roles.revoke(account, role) {
            env.events.push(PoolEvent::RoleRevoked {
                asset: self.params.asset.clone(),
                account: account.clone(),
                role,
            });
            tracing::info!(asset = %self.params.asset, account = %account, ?role, "Role revoked");
        }
        Ok(())
    }
}

/// Repay up to `amount` of `borrower`'s debt with `payer`'s tokens and route
/// the protocol's cut of the interest to the fee collector.
///
/// The request is capped at the outstanding debt; only the capped amount is
/// pulled from the payer.
pub(crate) fn settle_debt(
    params: &PoolParams,
    cache: &mut LedgerCache<'_>,
    env: &mut PoolEnv<'_>,
    payer: &AccountId,
    borrower: &AccountId,
    amount: U256,
) -> Result<RepayReceipt> {
    let debt = cache.current_debt(borrower)?;
    let repaid = amount.min(debt);
    if repaid.is_zero() {
        return Ok(RepayReceipt::default());
    }

    env.tokens
        .transfer(&params.asset, payer, &params.address, repaid)?;
    let interest_paid = cache.remove_borrow(borrower, repaid)?;
    cache.credit_cash(repaid)?;

    let fee = mul_fixed(interest_paid, params.lending.protocol_fee)?;
    let fee = cache.take_protocol_fee(fee)?;
    params.push_fee(env, fee)?;

    Ok(RepayReceipt {
        repaid,
        interest_paid,
        fee,
    })
}
