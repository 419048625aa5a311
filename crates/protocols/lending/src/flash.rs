//! Flash loans
//!
//! A flash loan lends out pool cash for the duration of one callback. While it
//! is in flight the pool refuses every other state-changing operation, and it
//! only settles once the pool's token balance is back up by amount plus fee.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::math::{checked_add, mul_fixed};
use thermae_core::{AccountId, AssetId, LendingError, Result};

use crate::events::PoolEvent;
use crate::pool::{atomic, LendingPool, PoolEnv};
use crate::roles::Role;
use crate::tokens::TokenLedger;

/// A loan handed out by [`LendingPool::begin_flash_loan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoan {
    pub asset: AssetId,
    /// Account to send the repayment to
    pub pool: AccountId,
    pub receiver: AccountId,
    pub amount: U256,
    pub fee: U256,
    /// Pool token balance before the loan left
    pub balance_before: U256,
}

impl FlashLoan {
    /// What the receiver must send back
    pub fn amount_owed(&self) -> Result<U256> {
        checked_add(self.amount, self.fee)
    }
}

/// Code run while holding a flash loan
pub trait FlashLoanReceiver {
    fn on_flash_loan(
        &mut self,
        tokens: &mut TokenLedger,
        loan: &FlashLoan,
        params: &[u8],
    ) -> Result<()>;
}

impl LendingPool {
    /// Fee charged on a flash loan of `amount`
    pub fn flash_fee(&self, amount: U256) -> Result<U256> {
        mul_fixed(amount, self.params.flash_loan.flash_fee)
    }

    /// Largest loan available right now, 0 when flash loans are disabled
    pub fn max_flash_loan(&self) -> U256 {
        if !self.params.flash_loan.enabled {
            return U256::ZERO;
        }
        self.cash()
    }

    /// Lend `amount` to `receiver`, run its callback and settle. Anyone may
    /// name any receiver: the loan cannot outlive this call.
    ///
    /// Any failure after the loan left restores the pool as it was.
    pub fn flash_loan(
        &mut self,
        env: &mut PoolEnv<'_>,
        receiver: &AccountId,
        callback: &mut dyn FlashLoanReceiver,
        amount: U256,
        params: &[u8],
    ) -> Result<FlashLoan> {
        let saved = self.ledger.state().clone();
        let checkpoint = env.tokens.checkpoint();
        let events = env.events.len();

        let loan = self.lend(env, receiver, amount)?;
        let settled = callback
            .on_flash_loan(env.tokens, &loan, params)
            .and_then(|()| self.settle(env, &loan));

        if let Err(e) = settled {
            self.ledger.restore_state(saved);
            self.in_flight = false;
            env.tokens.rollback(checkpoint);
            env.events.truncate(events);
            tracing::warn!(asset = %loan.asset, receiver = %receiver, error = %e, "Flash loan reverted");
            return Err(e);
        }
        Ok(loan)
    }

    /// Send `amount` to `receiver` and lock the pool until the loan settles.
    /// The lock spans calls, so only the receiver or a delegator may open it.
    pub fn begin_flash_loan(
        &mut self,
        env: &mut PoolEnv<'_>,
        receiver: &AccountId,
        amount: U256,
    ) -> Result<FlashLoan> {
        self.ensure_acting_for(env.caller, receiver, "take a flash loan")?;
        self.lend(env, receiver, amount)
    }

    fn lend(
        &mut self,
        env: &mut PoolEnv<'_>,
        receiver: &AccountId,
        amount: U256,
    ) -> Result<FlashLoan> {
        self.ensure_idle()?;
        if !self.params.flash_loan.enabled {
            return Err(LendingError::FlashLoanDisabled {
                asset: self.params.asset.clone(),
            });
        }
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        let fee = self.flash_fee(amount)?;

        let loan = atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            params.accrue(&mut cache, env.now)?;
            cache.debit_cash(amount)?;

            let balance_before = env.tokens.balance_of(&params.asset, &params.address);
            env.tokens
                .transfer(&params.asset, &params.address, receiver, amount)?;
            cache.commit();

            Ok(FlashLoan {
                asset: params.asset.clone(),
                pool: params.address.clone(),
                receiver: receiver.clone(),
                amount,
                fee,
                balance_before,
            })
        })?;
        self.in_flight = true;

        tracing::info!(asset = %loan.asset, receiver = %receiver, amount = %amount, fee = %fee, "Flash loan out");
        Ok(loan)
    }

    /// Settle a loan the receiver has paid back in tokens
    pub fn finish_flash_loan(&mut self, env: &mut PoolEnv<'_>, loan: &FlashLoan) -> Result<()> {
        self.ensure_acting_for(env.caller, &loan.receiver, "settle a flash loan")?;
        self.settle(env, loan)
    }

    fn settle(&mut self, env: &mut PoolEnv<'_>, loan: &FlashLoan) -> Result<()> {
        self.ensure_settling(env.caller, loan)?;

        let expected = checked_add(loan.balance_before, loan.fee)?;
        let received = env.tokens.balance_of(&loan.asset, &loan.pool);
        if received < expected {
            return Err(LendingError::FlashLoanNotRepaid { expected, received });
        }

        atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            cache.credit_cash(loan.amount)?;
            params.push_fee(env, loan.fee)?;
            cache.commit();

            env.events.push(PoolEvent::FlashLoan {
                asset: params.asset.clone(),
                receiver: loan.receiver.clone(),
                amount: loan.amount,
                fee: loan.fee,
            });
            Ok(())
        })?;
        self.in_flight = false;

        tracing::info!(asset = %loan.asset, receiver = %loan.receiver, fee = %loan.fee, "Flash loan repaid");
        Ok(())
    }

    /// Settle a loan out of `account`'s deposit in this pool instead of
    /// tokens: the deposit shrinks by amount plus fee (collateral swaps)
    pub fn finish_flash_loan_from_deposit(
        &mut self,
        env: &mut PoolEnv<'_>,
        loan: &FlashLoan,
        account: &AccountId,
    ) -> Result<U256> {
        self.ensure_settling(env.caller, loan)?;
        self.roles
            .ensure(env.caller, Role::Delegator, "settle a flash loan from a deposit")?;
        let owed = loan.amount_owed()?;

        let fee = atomic(env, |env| {
            let params = &self.params;
            let mut cache = self.ledger.cache();
            cache.remove_deposit(account, owed)?;
            let fee = cache.take_protocol_fee(loan.fee)?;
            params.push_fee(env, fee)?;
            cache.commit();

            env.events.push(PoolEvent::Withdraw {
                asset: params.asset.clone(),
                account: account.clone(),
                amount: owed,
            });
            env.events.push(PoolEvent::FlashLoan {
                asset: params.asset.clone(),
                receiver: loan.receiver.clone(),
                amount: loan.amount,
                fee,
            });
            Ok(fee)
        })?;
        self.in_flight = false;

        tracing::info!(asset = %loan.asset, account = %account, owed = %owed, fee = %fee, "Flash loan settled from deposit");
        Ok(fee)
    }

    fn ensure_settling(&self, caller: &AccountId, loan: &FlashLoan) -> Result<()> {
        if !self.in_flight || loan.asset != self.params.asset {
            return Err(LendingError::Unauthorized {
                caller: caller.clone(),
                action: "settle a flash loan that is not in flight",
            });
        }
        Ok(())
    }
}
