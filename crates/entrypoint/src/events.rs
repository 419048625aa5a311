//! Router events
//!
//! One event per committed top-level operation. The pools' own events are
//! kept in a separate log on the router.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, AssetId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    NewPool {
        asset: AssetId,
        pool: AccountId,
        creator: AccountId,
    },
    AssetSupported {
        asset: AssetId,
    },
    AssetSupportRemoved {
        asset: AssetId,
    },
    Deposit {
        account: AccountId,
        asset: AssetId,
        amount: U256,
    },
    Withdraw {
        account: AccountId,
        asset: AssetId,
        amount: U256,
    },
    Borrow {
        account: AccountId,
        asset: AssetId,
        amount: U256,
    },
    Repay {
        payer: AccountId,
        account: AccountId,
        asset: AssetId,
        amount: U256,
    },
    SetCollateral {
        account: AccountId,
        asset: AssetId,
        enabled: bool,
    },
    Liquidation {
        liquidator: AccountId,
        borrower: AccountId,
        debt_asset: AssetId,
        collateral_asset: AssetId,
        repaid: U256,
        seized: U256,
    },
    FlashLoan {
        receiver: AccountId,
        asset: AssetId,
        amount: U256,
        fee: U256,
    },
    /// A deposit moved from one asset to another through a flash loan
    CollateralSwap {
        account: AccountId,
        asset_from: AssetId,
        asset_to: AssetId,
        amount_in: U256,
        amount_out: U256,
        fee: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = RouterEvent::AssetSupported {
            asset: AssetId::new("link"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "asset_supported");
        assert_eq!(json["asset"], "link");

        let back: RouterEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
