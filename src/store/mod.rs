//! C3–C7 — persisted state: channels, app-sessions, the signer-wallet
//! index, the asset registry, and the RPC audit trail.
//!
//! Each sub-store wraps a `sqlx::PgPool` directly rather than taking a
//! borrowed transaction, unlike [`crate::ledger::WalletLedger`] — only the
//! ledger's balance checks need the row-lock-until-commit property: these
//! stores are consulted either read-only or as single-row upserts.

pub mod app_session;
pub mod asset;
pub mod channel;
pub mod rpc_record;
pub mod signer_wallet;

pub use app_session::{AppSession, AppSessionStore};
pub use asset::{Asset, AssetStore};
pub use channel::{Channel, ChannelStatus, ChannelStore};
pub use rpc_record::{RpcRecord, RpcStore};
pub use signer_wallet::SignerWalletIndex;
