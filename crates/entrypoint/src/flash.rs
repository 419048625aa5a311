//! Router flash loans
//!
//! Two flavours:
//! - a callback loan, where the borrower gets a [`FlashLoanScope`] and may use
//!   every other pool before paying the loan back;
//! - a collateral swap, where the router borrows asset A, swaps it to B,
//!   deposits B for the caller and settles the loan out of the caller's A
//!   deposit.
//!
//! Either way the whole operation is atomic and the lending pool stays locked
//! until its loan settles.

use alloy_primitives::U256;
use lending::{FlashLoan, RepayReceipt};
use thermae_core::{AccountId, AssetId, LendingError, Result};

use crate::events::RouterEvent;
use crate::router::{Call, EntryPoint};
use crate::swap::SwapQuote;

/// Code run while holding a router flash loan
pub trait FlashBorrower {
    fn on_flash_loan(
        &mut self,
        scope: &mut FlashLoanScope<'_>,
        loan: &FlashLoan,
        params: &[u8],
    ) -> Result<()>;
}

pub enum FlashRequest<'r> {
    Callback {
        receiver: &'r mut dyn FlashBorrower,
        params: Vec<u8>,
    },
    CollateralSwap {
        swap_to: AssetId,
        min_amount_out: U256,
    },
}

/// Outcome of a router flash loan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanReceipt {
    pub loan: FlashLoan,
    /// Fee that reached the fee collector
    pub fee: U256,
    /// The swap made by a collateral swap
    pub swap: Option<SwapQuote>,
}

/// The router as seen from inside a flash loan callback. Every operation runs
/// as the borrower.
pub struct FlashLoanScope<'a> {
    router: &'a mut EntryPoint,
    call: Call,
}

impl FlashLoanScope<'_> {
    pub fn sender(&self) -> &AccountId {
        &self.call.sender
    }

    pub fn router(&self) -> &EntryPoint {
        &*self.router
    }

    pub fn balance_of(&self, asset: &AssetId) -> U256 {
        self.router.tokens.balance_of(asset, &self.call.sender)
    }

    /// Send the borrower's tokens to `to`
    pub fn transfer(&mut self, asset: &AssetId, to: &AccountId, amount: U256) -> Result<()> {
        self.router
            .tokens
            .transfer(asset, &self.call.sender, to, amount)
    }

    /// Pay back principal plus fee
    pub fn repay_loan(&mut self, loan: &FlashLoan) -> Result<()> {
        let owed = loan.amount_owed()?;
        self.transfer(&loan.asset, &loan.pool, owed)
    }

    pub fn deposit(&mut self, asset: &AssetId, amount: U256) -> Result<()> {
        self.router.deposit(&self.call, asset, amount)
    }

    pub fn withdraw(&mut self, asset: &AssetId, amount: U256) -> Result<()> {
        self.router.withdraw(&self.call, asset, amount)
    }

    pub fn borrow(&mut self, asset: &AssetId, amount: U256) -> Result<()> {
        self.router.borrow(&self.call, asset, amount)
    }

    pub fn repay(&mut self, asset: &AssetId, amount: U256) -> Result<RepayReceipt> {
        self.router.repay(&self.call, asset, amount)
    }

    pub fn set_collateral(&mut self, asset: &AssetId, enabled: bool) -> Result<()> {
        self.router.set_collateral(&self.call, asset, enabled)
    }

    pub fn flash_loan(
        &mut self,
        asset: &AssetId,
        amount: U256,
        request: FlashRequest<'_>,
    ) -> Result<FlashLoanReceipt> {
        self.router.flash_loan(&self.call, asset, amount, request)
    }
}

impl EntryPoint {
    /// Fee on a flash loan of `amount` from `asset`'s pool
    pub fn flash_fee(&self, asset: &AssetId, amount: U256) -> Result<U256> {
        self.registry.pool(asset)?.flash_fee(amount)
    }

    /// Largest flash loan `asset`'s pool can make, 0 when disabled
    pub fn max_flash_loan(&self, asset: &AssetId) -> Result<U256> {
        Ok(self.registry.pool(asset)?.max_flash_loan())
    }

    pub fn flash_loan(
        &mut self,
        call: &Call,
        asset: &AssetId,
        amount: U256,
        request: FlashRequest<'_>,
    ) -> Result<FlashLoanReceipt> {
        match request {
            FlashRequest::Callback { receiver, params } => {
                self.callback_loan(call, asset, amount, receiver, &params)
            }
            FlashRequest::CollateralSwap {
                swap_to,
                min_amount_out,
            } => self.collateral_swap(call, asset, amount, &swap_to, min_amount_out),
        }
    }

    fn callback_loan(
        &mut self,
        call: &Call,
        asset: &AssetId,
        amount: U256,
        receiver: &mut dyn FlashBorrower,
        params: &[u8],
    ) -> Result<FlashLoanReceipt> {
        let loan = self.atomically("flash_loan", |router| {
            let loan = router.delegate(asset, call.now, |pool, env| {
                pool.begin_flash_loan(env, &call.sender, amount)
            })?;

            let mut scope = FlashLoanScope {
                router: &mut *router,
                call: call.clone(),
            };
            receiver.on_flash_loan(&mut scope, &loan, params)?;

            router.delegate(asset, call.now, |pool, env| pool.finish_flash_loan(env, &loan))?;
            router.events.push(RouterEvent::FlashLoan {
                receiver: call.sender.clone(),
                asset: asset.clone(),
                amount,
                fee: loan.fee,
            });
            Ok(loan)
        })?;

        tracing::info!(receiver = %call.sender, asset = %asset, amount = %amount, fee = %loan.fee, "Flash loan");
        Ok(FlashLoanReceipt {
            fee: loan.fee,
            loan,
            swap: None,
        })
    }

    /// Move `amount` of the caller's `asset` deposit into `swap_to`
    fn collateral_swap(
        &mut self,
        call: &Call,
        asset: &AssetId,
        amount: U256,
        swap_to: &AssetId,
        min_amount_out: U256,
    ) -> Result<FlashLoanReceipt> {
        let swapper = self.swapper.clone().ok_or_else(|| LendingError::SwapFailed {
            reason: "no swapper configured".to_string(),
        })?;
        if swap_to == asset {
            return Err(LendingError::SwapFailed {
                reason: format!("cannot swap {asset} into itself"),
            });
        }
        let account = &call.sender;

        let receipt = self.atomically("collateral_swap", |router| {
            router.registry.ensure_supported(swap_to)?;
            let was_collateral = router.registry.pool(asset)?.is_collateral(account);

            let delegate = router.address.clone();
            let loan = router.delegate(asset, call.now, |pool, env| {
                pool.begin_flash_loan(env, &delegate, amount)
            })?;

            let quote = swapper.best_swap(asset, swap_to, amount)?;
            if quote.amount_out < min_amount_out {
                return Err(LendingError::SlippageExceeded {
                    min_amount_out,
                    amount_out: quote.amount_out,
                });
            }
            let amount_out = swapper.execute_swap(&mut router.tokens, &delegate, &quote)?;
            if amount_out < min_amount_out {
                return Err(LendingError::SlippageExceeded {
                    min_amount_out,
                    amount_out,
                });
            }

            router
                .tokens
                .transfer(swap_to, &delegate, account, amount_out)?;
            router.registry.enter_market(account, swap_to);
            router.delegate(swap_to, call.now, |pool, env| {
                pool.deposit(env, account, amount_out)?;
                if was_collateral && !pool.is_collateral(account) {
                    pool.set_collateral_delegated(env, account, true)?;
                }
                Ok(())
            })?;

            let fee = router.delegate(asset, call.now, |pool, env| {
                pool.finish_flash_loan_from_deposit(env, &loan, account)
            })?;

            router.accrue_markets(account, call.now)?;
            router.ensure_solvent(account, "Collateral swap")?;

            router.events.push(RouterEvent::CollateralSwap {
                account: account.clone(),
                asset_from: asset.clone(),
                asset_to: swap_to.clone(),
                amount_in: amount,
                amount_out,
                fee,
            });
            Ok(FlashLoanReceipt {
                loan,
                fee,
                swap: Some(SwapQuote {
                    amount_out,
                    ..quote
                }),
            })
        })?;

        tracing::info!(
            account = %account,
            from = %asset,
            to = %swap_to,
            amount_in = %amount,
            fee = %receipt.fee,
            "Collateral swap"
        );
        Ok(receipt)
    }
}
