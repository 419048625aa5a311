//! Market ledger
//!
//! Per-account principal-plus-index bookkeeping for one asset. Amounts owed
//! to and by an account grow with the pool indices between principal changes;
//! every change first realizes the account at the current indices.
//!
//! Mutations go through a [`LedgerCache`]: a working copy of the pool state
//! and of the positions an operation touches. Nothing reaches the ledger
//! until [`LedgerCache::commit`]; dropping the cache discards the work.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::constants::WAD;
use thermae_core::math::{
    checked_add, checked_sub, compound_linear, mul_div, mul_div_up, mul_fixed,
};
use thermae_core::{AccountId, InterestRateConfig, LendingError, Result, Timestamp};

use crate::rates;

/// Pool-wide accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Owed to depositors as of `last_accrual`
    pub total_deposits: U256,
    /// Owed by borrowers as of `last_accrual`
    pub total_borrows: U256,
    pub deposit_index: U256,
    pub borrow_index: U256,
    pub last_accrual: Timestamp,
    /// Underlying held by the pool
    pub cash: U256,
    /// Protocol share of accrued interest not yet routed out
    pub reserves: U256,
}

impl PoolState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            total_deposits: U256::ZERO,
            total_borrows: U256::ZERO,
            deposit_index: WAD,
            borrow_index: WAD,
            last_accrual: now,
            cash: U256::ZERO,
            reserves: U256::ZERO,
        }
    }

    pub fn utilization(&self) -> Result<U256> {
        rates::utilization(self.total_borrows, self.cash)
    }

    /// `cash + total_borrows >= total_deposits`
    pub fn is_solvent(&self) -> bool {
        self.cash.saturating_add(self.total_borrows) >= self.total_deposits
    }

    /// What the pool holds beyond what it owes depositors
    pub fn surplus(&self) -> U256 {
        self.cash
            .saturating_add(self.total_borrows)
            .saturating_sub(self.total_deposits)
    }

    /// This state brought forward to `now`, leaving `self` untouched
    pub fn accrued(
        &self,
        now: Timestamp,
        curve: &InterestRateConfig,
        reserve_factor: U256,
    ) -> Result<Self> {
        let mut state = self.clone();
        state.accrue(now, curve, reserve_factor)?;
        Ok(state)
    }

    fn accrue(
        &mut self,
        now: Timestamp,
        curve: &InterestRateConfig,
        reserve_factor: U256,
    ) -> Result<Accrual> {
        if now < self.last_accrual {
            return Err(LendingError::InvalidTimestamp {
                now,
                last: self.last_accrual,
            });
        }
        let elapsed = now - self.last_accrual;
        if elapsed == 0 {
            return Ok(Accrual::default());
        }

        let utilization = self.utilization()?;
        let borrow_rate = rates::borrow_rate_per_second(utilization, curve)?;
        let deposit_rate = rates::deposit_rate_per_second(utilization, borrow_rate, reserve_factor)?;
        let borrow_factor = compound_linear(borrow_rate, elapsed)?;
        let deposit_factor = compound_linear(deposit_rate, elapsed)?;

        let borrow_index = mul_fixed(self.borrow_index, borrow_factor)?;
        let deposit_index = mul_fixed(self.deposit_index, deposit_factor)?;
        let total_borrows = mul_fixed(self.total_borrows, borrow_factor)?;
        let total_deposits = mul_fixed(self.total_deposits, deposit_factor)?;

        let borrow_interest = total_borrows - self.total_borrows;
        let deposit_interest = total_deposits - self.total_deposits;
        let reserves = checked_add(
            self.reserves,
            borrow_interest.saturating_sub(deposit_interest),
        )?;

        self.borrow_index = borrow_index;
        self.deposit_index = deposit_index;
        self.total_borrows = total_borrows;
        self.total_deposits = total_deposits;
        self.reserves = reserves;
        self.last_accrual = now;

        Ok(Accrual {
            elapsed,
            utilization,
            borrow_rate,
            deposit_rate,
            borrow_interest,
            deposit_interest,
        })
    }
}

/// Outcome of one interest accrual
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accrual {
    pub elapsed: u64,
    pub utilization: U256,
    pub borrow_rate: U256,
    pub deposit_rate: U256,
    pub borrow_interest: U256,
    pub deposit_interest: U256,
}

/// One account's stake in one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub deposit_principal: U256,
    pub deposit_index_snapshot: U256,
    pub borrow_principal: U256,
    pub borrow_index_snapshot: U256,
    /// Amount actually borrowed and not yet repaid, interest excluded
    #[serde(default)]
    pub borrowed_base: U256,
    pub is_collateral: bool,
}

impl AccountPosition {
    /// Rounded down
    pub fn current_deposit(&self, state: &PoolState) -> Result<U256> {
        if self.deposit_principal.is_zero() {
            return Ok(U256::ZERO);
        }
        mul_div(
            self.deposit_principal,
            state.deposit_index,
            self.deposit_index_snapshot,
        )
    }

    /// Rounded up, so the pool's `total_borrows` never exceeds what
    /// accounts actually owe
    pub fn current_debt(&self, state: &PoolState) -> Result<U256> {
        if self.borrow_principal.is_zero() {
            return Ok(U256::ZERO);
        }
        mul_div_up(
            self.borrow_principal,
            state.borrow_index,
            self.borrow_index_snapshot,
        )
    }

    /// Interest owed on top of the borrowed base
    pub fn outstanding_interest(&self, state: &PoolState) -> Result<U256> {
        Ok(self.current_debt(state)?.saturating_sub(self.borrowed_base))
    }

    pub fn is_empty(&self) -> bool {
        self.deposit_principal.is_zero() && self.borrow_principal.is_zero() && !self.is_collateral
    }

    fn realize(&mut self, state: &PoolState) -> Result<()> {
        let deposit = self.current_deposit(state)?;
        let debt = self.current_debt(state)?;
        self.deposit_principal = deposit;
        self.deposit_index_snapshot = state.deposit_index;
        self.borrow_principal = debt;
        self.borrow_index_snapshot = state.borrow_index;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketLedger {
    state: PoolState,
    positions: BTreeMap<AccountId, AccountPosition>,
}

impl MarketLedger {
    pub fn new(now: Timestamp) -> Self {
        Self {
            state: PoolState::new(now),
            positions: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn position(&self, account: &AccountId) -> Option<&AccountPosition> {
        self.positions.get(account)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&AccountId, &AccountPosition)> {
        self.positions.iter()
    }

    pub fn current_deposit(&self, account: &AccountId) -> Result<U256> {
        self.position(account)
            .map_or(Ok(U256::ZERO), |p| p.current_deposit(&self.state))
    }

    pub fn current_debt(&self, account: &AccountId) -> Result<U256> {
        self.position(account)
            .map_or(Ok(U256::ZERO), |p| p.current_debt(&self.state))
    }

    pub fn current_utilization(&self) -> Result<U256> {
        self.state.utilization()
    }

    /// Bring indices and totals forward to `now`
    pub fn accrue_interest(
        &mut self,
        now: Timestamp,
        curve: &InterestRateConfig,
        reserve_factor: U256,
    ) -> Result<Accrual> {
        let mut state = self.state.clone();
        let accrual = state.accrue(now, curve, reserve_factor)?;
        self.state = state;
        Ok(accrual)
    }

    /// Rewrite an account's principals at the current indices
    pub fn realize(&mut self, account: &AccountId) -> Result<()> {
        let Some(position) = self.positions.get(account) else {
            return Ok(());
        };
        let mut position = position.clone();
        position.realize(&self.state)?;
        self.positions.insert(account.clone(), position);
        Ok(())
    }

    /// Start a transactional view of the ledger
    pub fn cache(&mut self) -> LedgerCache<'_> {
        LedgerCache {
            state: self.state.clone(),
            touched: BTreeMap::new(),
            ledger: self,
        }
    }

    pub(crate) fn restore_state(&mut self, state: PoolState) {
        self.state = state;
    }
}

/// Working copy of a [`MarketLedger`] for one operation
pub struct LedgerCache<'a> {
    ledger: &'a mut MarketLedger,
    state: PoolState,
    touched: BTreeMap<AccountId, AccountPosition>,
}

impl LedgerCache<'_> {
    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn accrue(
        &mut self,
        now: Timestamp,
        curve: &InterestRateConfig,
        reserve_factor: U256,
    ) -> Result<Accrual> {
        self.state.accrue(now, curve, reserve_factor)
    }

    fn stored(&self, account: &AccountId) -> Option<&AccountPosition> {
        self.touched
            .get(account)
            .or_else(|| self.ledger.positions.get(account))
    }

    fn entry<'m>(
        touched: &'m mut BTreeMap<AccountId, AccountPosition>,
        stored: &BTreeMap<AccountId, AccountPosition>,
        account: &AccountId,
    ) -> &'m mut AccountPosition {
        touched
            .entry(account.clone())
            .or_insert_with(|| stored.get(account).cloned().unwrap_or_default())
    }

    pub fn current_deposit(&self, account: &AccountId) -> Result<U256> {
        self.stored(account)
            .map_or(Ok(U256::ZERO), |p| p.current_deposit(&self.state))
    }

    pub fn current_debt(&self, account: &AccountId) -> Result<U256> {
        self.stored(account)
            .map_or(Ok(U256::ZERO), |p| p.current_debt(&self.state))
    }

    pub fn is_collateral(&self, account: &AccountId) -> bool {
        self.stored(account).is_some_and(|p| p.is_collateral)
    }

    pub fn set_collateral(&mut self, account: &AccountId, enabled: bool) {
        let position = Self::entry(&mut self.touched, &self.ledger.positions, account);
        position.is_collateral = enabled;
    }

    pub fn add_deposit(&mut self, account: &AccountId, amount: U256) -> Result<()> {
        let position = Self::entry(&mut self.touched, &self.ledger.positions, account);
        position.realize(&self.state)?;
        position.deposit_principal = checked_add(position.deposit_principal, amount)?;
        self.state.total_deposits = checked_add(self.state.total_deposits, amount)?;
        Ok(())
    }

    pub fn remove_deposit(&mut self, account: &AccountId, amount: U256) -> Result<()> {
        let position = Self::entry(&mut self.touched, &self.ledger.positions, account);
        position.realize(&self.state)?;
        if amount > position.deposit_principal {
            return Err(LendingError::InsufficientDeposit {
                requested: amount,
                available: position.deposit_principal,
            });
        }
        position.deposit_principal -= amount;
        self.state.total_deposits = self.state.total_deposits.saturating_sub(amount);
        Ok(())
    }

    /// Transfer deposit principal between accounts (liquidation seizure)
    pub fn move_deposit(&mut self, from: &AccountId, to: &AccountId, amount: U256) -> Result<()> {
        self.remove_deposit(from, amount)?;
        self.add_deposit(to, amount)
    }

    pub fn add_borrow(&mut self, account: &AccountId, amount: U256) -> Result<()> {
        let position = Self::entry(&mut self.touched, &self.ledger.positions, account);
        position.realize(&self.state)?;
        position.borrow_principal = checked_add(position.borrow_principal, amount)?;
        position.borrowed_base = checked_add(position.borrowed_base, amount)?;
        self.state.total_borrows = checked_add(self.state.total_borrows, amount)?;
        Ok(())
    }

    /// Reduce an account's debt by `amount`, interest first.
    ///
    /// Returns the interest portion of the repayment.
    pub fn remove_borrow(&mut self, account: &AccountId, amount: U256) -> Result<U256> {
        let position = Self::entry(&mut self.touched, &self.ledger.positions, account);
        position.realize(&self.state)?;
        let remaining = checked_sub(position.borrow_principal, amount)?;

        let interest_owed = position.borrow_principal.saturating_sub(position.borrowed_base);
        let interest_paid = amount.min(interest_owed);
        position.borrowed_base = if remaining.is_zero() {
            U256::ZERO
        } else {
            position.borrowed_base.saturating_sub(amount - interest_paid)
        };
        position.borrow_principal = remaining;
        self.state.total_borrows = self.state.total_borrows.saturating_sub(amount);
        Ok(interest_paid)
    }

    pub fn credit_cash(&mut self, amount: U256) -> Result<()> {
        self.state.cash = checked_add(self.state.cash, amount)?;
        Ok(())
    }

    pub fn debit_cash(&mut self, amount: U256) -> Result<()> {
        if amount > self.state.cash {
            return Err(LendingError::InsufficientCash {
                requested: amount,
                available: self.state.cash,
            });
        }
        self.state.cash -= amount;
        Ok(())
    }

    /// Route `amount` of protocol income out of the pool's cash.
    ///
    /// Never takes more than the pool's surplus over what depositors are owed;
    /// returns the amount actually taken.
    pub fn take_protocol_fee(&mut self, amount: U256) -> Result<U256> {
        let fee = amount.min(self.state.surplus()).min(self.state.cash);
        self.debit_cash(fee)?;
        self.state.reserves = self.state.reserves.saturating_sub(fee);
        Ok(fee)
    }

    /// Write the working copy back to the ledger
    pub fn commit(self) {
        self.ledger.state = self.state;
        self.ledger.positions.extend(self.touched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermae_core::math::{parse_fraction, wad};

    fn frac(s: &str) -> U256 {
        parse_fraction(s).unwrap()
    }

    fn curve() -> InterestRateConfig {
        // 10% per second at full kink utilization keeps numbers visible
        InterestRateConfig::new(U256::ZERO, frac("0.1"), frac("1"), frac("0.8")).unwrap()
    }

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    /// alice deposits 100, bob borrows 50
    fn half_utilized() -> MarketLedger {
        let mut ledger = MarketLedger::new(0);
        let mut cache = ledger.cache();
        cache.add_deposit(&alice(), wad(100)).unwrap();
        cache.credit_cash(wad(100)).unwrap();
        cache.add_borrow(&bob(), wad(50)).unwrap();
        cache.debit_cash(wad(50)).unwrap();
        cache.commit();
        ledger
    }

    #[test]
    fn test_new_ledger() {
        let ledger = MarketLedger::new(42);
        assert_eq!(ledger.state().deposit_index, WAD);
        assert_eq!(ledger.state().borrow_index, WAD);
        assert_eq!(ledger.state().last_accrual, 42);
        assert_eq!(ledger.current_deposit(&alice()).unwrap(), U256::ZERO);
        assert_eq!(ledger.current_utilization().unwrap(), U256::ZERO);
    }

    #[test]
    fn test_accrual_is_idempotent_at_same_timestamp() {
        let mut ledger = half_utilized();
        ledger.accrue_interest(10, &curve(), frac("0.1")).unwrap();
        let after_first = ledger.clone();

        let accrual = ledger.accrue_interest(10, &curve(), frac("0.1")).unwrap();
        assert_eq!(accrual, Accrual::default());
        assert_eq!(ledger, after_first);
    }

    #[test]
    fn test_accrual_grows_indices_and_totals() {
        let mut ledger = half_utilized();
        let accrual = ledger.accrue_interest(1, &curve(), frac("0.1")).unwrap();

        // u = 0.5, borrow rate = 0.1 * 0.5 / 0.8 = 0.0625
        assert_eq!(accrual.utilization, frac("0.5"));
        assert_eq!(accrual.borrow_rate, frac("0.0625"));
        // deposit rate = 0.0625 * 0.5 * 0.9
        assert_eq!(accrual.deposit_rate, frac("0.028125"));

        let state = ledger.state();
        assert_eq!(state.borrow_index, frac("1.0625"));
        assert_eq!(state.deposit_index, frac("1.028125"));
        assert_eq!(state.total_borrows, frac("53.125"));
        assert_eq!(state.total_deposits, frac("102.8125"));
        assert_eq!(state.reserves, frac("0.3125"));
        assert!(state.is_solvent());

        assert_eq!(ledger.current_debt(&bob()).unwrap(), frac("53.125"));
        assert_eq!(ledger.current_deposit(&alice()).unwrap(), frac("102.8125"));
    }

    #[test]
    fn test_accrual_rejects_time_travel() {
        let mut ledger = MarketLedger::new(100);
        let err = ledger.accrue_interest(99, &curve(), U256::ZERO).unwrap_err();
        assert_eq!(err, LendingError::InvalidTimestamp { now: 99, last: 100 });
    }

    #[test]
    fn test_no_interest_without_borrows() {
        let mut ledger = MarketLedger::new(0);
        let mut cache = ledger.cache();
        cache.add_deposit(&alice(), wad(10)).unwrap();
        cache.credit_cash(wad(10)).unwrap();
        cache.commit();

        ledger.accrue_interest(1_000, &curve(), U256::ZERO).unwrap();
        assert_eq!(ledger.state().deposit_index, WAD);
        assert_eq!(ledger.current_deposit(&alice()).unwrap(), wad(10));
        assert_eq!(ledger.state().last_accrual, 1_000);
    }

    #[test]
    fn test_realize_rewrites_principal() {
        let mut ledger = half_utilized();
        ledger.accrue_interest(1, &curve(), frac("0.1")).unwrap();
        ledger.realize(&bob()).unwrap();

        let position = ledger.position(&bob()).unwrap();
        assert_eq!(position.borrow_principal, frac("53.125"));
        assert_eq!(position.borrow_index_snapshot, frac("1.0625"));
        assert_eq!(position.borrowed_base, wad(50));
        assert_eq!(ledger.current_debt(&bob()).unwrap(), frac("53.125"));
    }

    #[test]
    fn test_remove_borrow_consumes_interest_first() {
        let mut ledger = half_utilized();
        ledger.accrue_interest(1, &curve(), frac("0.1")).unwrap();

        let mut cache = ledger.cache();
        let interest = cache.remove_borrow(&bob(), wad(2)).unwrap();
        assert_eq!(interest, wad(2));
        let interest = cache.remove_borrow(&bob(), wad(2)).unwrap();
        assert_eq!(interest, frac("1.125"));
        cache.commit();

        let position = ledger.position(&bob()).unwrap();
        assert_eq!(position.borrowed_base, frac("49.125"));
        assert_eq!(position.borrow_principal, frac("49.125"));
    }

    #[test]
    fn test_dropped_cache_leaves_ledger_untouched() {
        let mut ledger = half_utilized();
        let before = ledger.clone();
        {
            let mut cache = ledger.cache();
            cache.add_deposit(&alice(), wad(5)).unwrap();
            cache.credit_cash(wad(5)).unwrap();
            assert!(cache.debit_cash(wad(1_000)).is_err());
        }
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_remove_deposit_checks_balance() {
        let mut ledger = half_utilized();
        let mut cache = ledger.cache();
        let err = cache.remove_deposit(&alice(), wad(101)).unwrap_err();
        assert!(matches!(err, LendingError::InsufficientDeposit { .. }));
    }

    #[test]
    fn test_move_deposit_keeps_totals() {
        let mut ledger = half_utilized();
        let mut cache = ledger.cache();
        cache.move_deposit(&alice(), &bob(), wad(30)).unwrap();
        cache.commit();

        assert_eq!(ledger.current_deposit(&alice()).unwrap(), wad(70));
        assert_eq!(ledger.current_deposit(&bob()).unwrap(), wad(30));
        assert_eq!(ledger.state().total_deposits, wad(100));
    }

    #[test]
    fn test_protocol_fee_is_capped_by_surplus() {
        let mut ledger = half_utilized();
        let mut cache = ledger.cache();
        // nothing accrued: no surplus to take from
        assert_eq!(cache.take_protocol_fee(wad(1)).unwrap(), U256::ZERO);
        cache.accrue(1, &curve(), frac("0.1")).unwrap();
        assert_eq!(cache.take_protocol_fee(wad(1)).unwrap(), frac("0.3125"));
        assert!(cache.state().is_solvent());
    }
}
