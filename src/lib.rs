//! A clearnode: an off-chain clearinghouse for collateralized state-channel
//! payments.
//!
//! Wallets open custody-contract channels on one of several supported EVM
//! networks; this node watches those channels, keeps a double-entry ledger
//! of spendable balances, and brokers multi-party application sessions over
//! an authenticated WebSocket protocol. It never custodies funds itself —
//! the custody contract does — this node is the off-chain bookkeeper and
//! counter-signer every channel needs a broker participant for.
//!
//! # Modules
//!
//! - [`auth`] — EIP-712 challenge/response login and JWT session issuance.
//! - [`chain`] — C8, the per-network log watcher that turns custody-contract
//!   events into ledger and channel mutations.
//! - [`config`] — C12, startup configuration and the fixed network table.
//! - [`error`] — the crate-wide error taxonomy.
//! - [`ledger`] — C2, the double-entry balance ledger.
//! - [`metrics`] — C14, Prometheus instrumentation.
//! - [`rpc`] — the WebSocket wire frame, connection state machine, and
//!   per-method handlers (C9–C10).
//! - [`session_fanout`] — C11, wallet-to-connection routing for
//!   server-initiated notifications.
//! - [`signer`] — C1, the broker's signing identity and signature recovery.
//! - [`sig_down`] — graceful shutdown on SIGTERM/SIGINT.
//! - [`state`] — channel state ABI encoding and the custody contract's
//!   inline interface.
//! - [`store`] — C3–C7, the persisted tables: channels, app-sessions, the
//!   signer-wallet index, the asset registry, and the RPC audit trail.
//! - [`telemetry`] — structured logging setup.
//! - [`timestamp`] — the millisecond Unix timestamp type used throughout
//!   the wire protocol.
//! - [`util`] — decimal/raw-amount conversion and other small helpers.

pub mod auth;
pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod rpc;
pub mod session_fanout;
pub mod signer;
pub mod sig_down;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod timestamp;
pub mod util;
