//! Underlying token balances
//!
//! An in-memory balance book shared by every pool and account. Every movement
//! is journaled so a failed operation can unwind the transfers it already made.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, AssetId, LendingError, Result};

/// A recorded balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenMovement {
    Mint {
        asset: AssetId,
        to: AccountId,
        amount: U256,
    },
    Burn {
        asset: AssetId,
        from: AccountId,
        amount: U256,
    },
    Transfer {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: U256,
    },
}

/// Position in the journal to roll back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCheckpoint(usize);

#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: BTreeMap<AssetId, BTreeMap<AccountId, U256>>,
    journal: Vec<TokenMovement>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, asset: &AssetId, holder: &AccountId) -> U256 {
        self.balances
            .get(asset)
            .and_then(|book| book.get(holder))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn total_supply(&self, asset: &AssetId) -> U256 {
        self.balances
            .get(asset)
            .map(|book| book.values().fold(U256::ZERO, |acc, v| acc.saturating_add(*v)))
            .unwrap_or(U256::ZERO)
    }

    pub fn mint(&mut self, asset: &AssetId, to: &AccountId, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = self.balance_of(asset, to);
        let updated = balance
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow)?;
        self.set(asset, to, updated);
        self.journal.push(TokenMovement::Mint {
            asset: asset.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn burn(&mut self, asset: &AssetId, from: &AccountId, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = self.ensure_balance(asset, from, amount)?;
        self.set(asset, from, balance - amount);
        self.journal.push(TokenMovement::Burn {
            asset: asset.clone(),
            from: from.clone(),
            amount,
        });
        Ok(())
    }

    /// Move `amount` from `from` to `to` (transferFrom semantics: the ledger
    /// trusts the caller to have the holder's approval)
    pub fn transfer(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: U256,
    ) -> Result<()> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let from_balance = self.ensure_balance(asset, from, amount)?;
        let to_balance = self
            .balance_of(asset, to)
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow)?;
        self.set(asset, from, from_balance - amount);
        self.set(asset, to, to_balance);
        self.journal.push(TokenMovement::Transfer {
            asset: asset.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn checkpoint(&self) -> TokenCheckpoint {
        TokenCheckpoint(self.journal.len())
    }

    /// Undo every movement made after `checkpoint`, newest first
    pub fn rollback(&mut self, checkpoint: TokenCheckpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(movement) = self.journal.pop() else {
                break;
            };
            match movement {
                TokenMovement::Mint { asset, to, amount } => {
                    let balance = self.balance_of(&asset, &to);
                    self.set(&asset, &to, balance.saturating_sub(amount));
                }
                TokenMovement::Burn {
                    asset,
                    from,
                    amount,
                } => {
                    let balance = self.balance_of(&asset, &from);
                    self.set(&asset, &from, balance.saturating_add(amount));
                }
                TokenMovement::Transfer {
                    asset,
                    from,
                    to,
                    amount,
                } => {
                    let to_balance = self.balance_of(&asset, &to);
                    let from_balance = self.balance_of(&asset, &from);
                    self.set(&asset, &to, to_balance.saturating_sub(amount));
                    self.set(&asset, &from, from_balance.saturating_add(amount));
                }
            }
        }
    }

    /// Movements recorded since `checkpoint`
    pub fn movements_since(&self, checkpoint: TokenCheckpoint) -> &[TokenMovement] {
        self.journal.get(checkpoint.0..).unwrap_or(&[])
    }

    pub fn movements(&self) -> &[TokenMovement] {
        &self.journal
    }

    fn ensure_balance(&self, asset: &AssetId, holder: &AccountId, amount: U256) -> Result<U256> {
        let balance = self.balance_of(asset, holder);
        if balance < amount {
            return Err(LendingError::InsufficientBalance {
                asset: asset.clone(),
                holder: holder.clone(),
                required: amount,
                available: balance,
            });
        }
        Ok(balance)
    }

    fn set(&mut self, asset: &AssetId, holder: &AccountId, amount: U256) {
        let book = self.balances.entry(asset.clone()).or_default();
        if amount.is_zero() {
            book.remove(holder);
        } else {
            book.insert(holder.clone(), amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::new("usdc")
    }

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    #[test]
    fn test_mint_transfer_burn() {
        let mut tokens = TokenLedger::new();
        tokens.mint(&usdc(), &alice(), U256::from(100u64)).unwrap();
        tokens
            .transfer(&usdc(), &alice(), &bob(), U256::from(30u64))
            .unwrap();
        tokens.burn(&usdc(), &bob(), U256::from(10u64)).unwrap();

        assert_eq!(tokens.balance_of(&usdc(), &alice()), U256::from(70u64));
        assert_eq!(tokens.balance_of(&usdc(), &bob()), U256::from(20u64));
        assert_eq!(tokens.total_supply(&usdc()), U256::from(90u64));
        assert_eq!(tokens.movements().len(), 3);
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut tokens = TokenLedger::new();
        tokens.mint(&usdc(), &alice(), U256::from(5u64)).unwrap();
        let err = tokens
            .transfer(&usdc(), &alice(), &bob(), U256::from(6u64))
            .unwrap_err();
        assert!(matches!(err, LendingError::InsufficientBalance { .. }));
        assert_eq!(tokens.balance_of(&usdc(), &alice()), U256::from(5u64));
        assert_eq!(tokens.movements().len(), 1);
    }

    #[test]
    fn test_rollback_restores_balances() {
        let mut tokens = TokenLedger::new();
        tokens.mint(&usdc(), &alice(), U256::from(100u64)).unwrap();
        let checkpoint = tokens.checkpoint();

        tokens
            .transfer(&usdc(), &alice(), &bob(), U256::from(40u64))
            .unwrap();
        tokens.mint(&usdc(), &bob(), U256::from(7u64)).unwrap();
        tokens.burn(&usdc(), &alice(), U256::from(60u64)).unwrap();
        assert_eq!(tokens.movements_since(checkpoint).len(), 3);

        tokens.rollback(checkpoint);
        assert_eq!(tokens.balance_of(&usdc(), &alice()), U256::from(100u64));
        assert_eq!(tokens.balance_of(&usdc(), &bob()), U256::ZERO);
        assert!(tokens.movements_since(checkpoint).is_empty());
    }

    #[test]
    fn test_zero_and_self_transfers_are_noops() {
        let mut tokens = TokenLedger::new();
        tokens
            .transfer(&usdc(), &alice(), &bob(), U256::ZERO)
            .unwrap();
        tokens.mint(&usdc(), &alice(), U256::from(1u64)).unwrap();
        tokens
            .transfer(&usdc(), &alice(), &alice(), U256::from(1u64))
            .unwrap();
        assert_eq!(tokens.movements().len(), 1);
    }
}
