//! Lending Pool Engine
//!
//! Accounting core of a single-asset lending market:
//! - `rates`: utilization-based interest rate curve
//! - `ledger`: per-account principal-plus-index bookkeeping
//! - `pool`: deposit, withdraw, borrow, repay and administration
//! - `liquidation`, `flash`: liquidations and flash loans
//!
//! Pools are driven through a [`PoolEnv`] that carries the caller, the clock,
//! the shared [`TokenLedger`] and the external collaborators.

pub mod collaborators;
pub mod events;
pub mod flash;
pub mod ledger;
pub mod liquidation;
pub mod pool;
pub mod rates;
pub mod roles;
pub mod state;
pub mod tokens;

pub use collaborators::{
    DepositDelta, FeeCollector, FeeVault, PriceOracle, RecordingRewards, RewardNotice,
    RewardsManager, StaticPriceOracle,
};
pub use events::PoolEvent;
pub use flash::{FlashLoan, FlashLoanReceiver};
pub use ledger::{AccountPosition, Accrual, LedgerCache, MarketLedger, PoolState};
pub use liquidation::{liquidation_amounts, LiquidationReceipt};
pub use pool::{LendingPool, PoolEnv, RepayReceipt};
pub use roles::{Role, Roles};
pub use state::{PoolSnapshot, PositionSnapshot};
pub use tokens::{TokenCheckpoint, TokenLedger, TokenMovement};
