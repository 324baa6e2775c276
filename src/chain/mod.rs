//! C8 — the chain reconciler: one task per configured network that watches
//! the custody contract and converts its events into ledger/channel truth.

pub mod custody;
pub mod reconciler;

pub use custody::{ChainProvider, CustodyClient, connect_provider};
pub use reconciler::{Reconciler, run_balance_metrics_loop};
