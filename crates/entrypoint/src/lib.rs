//! Thermae Entry Point
//!
//! Cross-pool facade over the lending pools:
//! - `registry`: asset to pool mapping, listings and account markets
//! - `router`: the [`EntryPoint`] and its account operations
//! - `position`: aggregate account liquidity across pools
//! - `liquidation`: cross-pool liquidations
//! - `flash`: callback flash loans and collateral swaps
//! - `swap`: the swap routing interface
//!
//! Every operation takes a [`Call`] naming the sender and the time, and either
//! commits completely or leaves no trace.

pub mod events;
pub mod flash;
pub mod liquidation;
pub mod position;
pub mod registry;
pub mod router;
pub mod swap;

pub use events::RouterEvent;
pub use flash::{FlashBorrower, FlashLoanReceipt, FlashLoanScope, FlashRequest};
pub use position::AccountLiquidity;
pub use registry::PoolRegistry;
pub use router::{Call, Collaborators, EntryPoint};
pub use swap::{FixedRateSwapper, SwapQuote, Swapper};
