//! Per-method RPC handlers (§4.3–4.5), sharing one `(state, wallet, policy,
//! req) -> Result<Vec<Value>>` shape rather than a trait-object registry —
//! the dispatch table in [`crate::rpc::router`] is a plain match on method
//! name, same granularity as the Go original's `switch rpc.Req.Method`.

pub mod app_session;
pub mod channel_ops;
pub mod queries;

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::session_fanout::SessionFanout;
use crate::signer::BrokerSigner;
use crate::store::{AppSessionStore, AssetStore, ChannelStore, RpcStore, SignerWalletIndex};

/// Everything a handler needs, shared across every connection via `Arc`.
pub struct AppState {
    pub config: Arc<Config>,
    pub signer: BrokerSigner,
    pub pool: PgPool,
    pub channels: ChannelStore,
    pub assets: AssetStore,
    pub app_sessions: AppSessionStore,
    pub rpc_store: RpcStore,
    pub signer_wallets: SignerWalletIndex,
    pub auth: AuthManager,
    pub metrics: Metrics,
    pub fanout: SessionFanout,
}

/// Resolves a recovered signer address to the wallet it acts for, falling
/// back to the address itself for a wallet signing with its own key —
/// mirrors `GetWalletBySigner`'s "empty means self" contract.
pub fn wallet_for_signer(state: &AppState, signer_address: &str) -> String {
    state.signer_wallets.wallet_for(signer_address).unwrap_or_else(|| signer_address.to_string())
}

/// Extracts a param object's string fields the way the Go handlers do via
/// `map[string]string` — unknown keys are ignored, missing keys yield `""`.
pub fn string_param(params: &[serde_json::Value], index: usize, key: &str) -> String {
    params
        .get(index)
        .and_then(|v| v.as_object())
        .and_then(|obj| obj.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
