//! Read-only RPC methods (§4.3): `ping`, `get_config`, `get_assets`,
//! `get_app_definition`, `get_app_sessions`, `get_channels`,
//! `get_ledger_balances`, `get_ledger_entries`, `get_rpc_history`.
//!
//! None of these mutate state, so each takes a `&AppState` and the already
//! resolved `wallet` rather than a transaction — grounded on `handlers.go`'s
//! `HandleGetConfig`/`HandlePing`/etc., which all read straight off the
//! store without a surrounding transaction.

use serde_json::{Value, json};

use super::AppState;
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::ledger::ledger_for;
use crate::rpc::types::{
    AppSessionResponse, AssetResponse, Balance, BrokerConfig, ChannelResponse, LedgerEntryResponse, NetworkInfo,
    RpcHistoryEntry,
};
use crate::store::ChannelStatus;

pub async fn ping() -> ClearnodeResult<Vec<Value>> {
    Ok(vec![json!("pong")])
}

/// Broker identity and the set of networks this node watches.
pub async fn get_config(state: &AppState) -> ClearnodeResult<Vec<Value>> {
    let networks = state
        .config
        .networks
        .iter()
        .map(|n| NetworkInfo {
            name: n.name.clone(),
            chain_id: n.chain_id,
            custody_address: n.custody_address.to_string(),
            adjudicator_address: n.adjudicator_address.to_string(),
        })
        .collect();
    let config = BrokerConfig { broker_address: state.signer.address().to_string(), networks };
    Ok(vec![serde_json::to_value(config)?])
}

/// `params[0].chain_id` optionally restricts the listing to one chain.
pub async fn get_assets(state: &AppState, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let chain_id = params.first().and_then(|p| p.get("chain_id")).and_then(|v| v.as_u64()).map(|c| c as u32);
    let assets = state.assets.all(chain_id).await?;
    let response: Vec<AssetResponse> = assets.into_iter().map(Into::into).collect();
    Ok(vec![serde_json::to_value(response)?])
}

/// `account_id` resolution used by both ledger query handlers: the Go
/// original accepts `participant`/`account_id`/`wallet` as aliases, falling
/// back to the caller's own wallet when none is given.
fn resolve_account_id(params: &[Value], wallet: &str) -> String {
    for key in ["participant", "account_id", "wallet"] {
        if let Some(v) = params.first().and_then(|p| p.get(key)).and_then(|v| v.as_str()) {
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    wallet.to_string()
}

pub async fn get_ledger_balances(state: &AppState, wallet: &str, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let account_id = resolve_account_id(params, wallet);
    let mut tx = state.pool.begin().await?;
    let balances = ledger_for(wallet, &mut tx).balances(&account_id).await?;
    tx.commit().await?;
    let response: Vec<Balance> = balances.into_iter().map(|b| Balance { asset: b.asset, amount: b.amount }).collect();
    Ok(vec![serde_json::to_value(response)?])
}

pub async fn get_ledger_entries(state: &AppState, wallet: &str, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let account_id = resolve_account_id(params, wallet);
    let asset = params.first().and_then(|p| p.get("asset")).and_then(|v| v.as_str());
    let mut tx = state.pool.begin().await?;
    let entries = ledger_for(wallet, &mut tx).entries(Some(&account_id), asset).await?;
    tx.commit().await?;
    let response: Vec<LedgerEntryResponse> = entries
        .into_iter()
        .map(|e| LedgerEntryResponse {
            id: e.id,
            account_id: e.account_id,
            account_type: e.account_type,
            asset: e.asset_symbol,
            participant: e.wallet,
            credit: e.credit,
            debit: e.debit,
            created_at: e.created_at.to_rfc3339(),
        })
        .collect();
    Ok(vec![serde_json::to_value(response)?])
}

/// Reconstructs the app-session's definition from its stored row, the same
/// fields `HandleGetAppDefinition` builds from its gorm model.
pub async fn get_app_definition(state: &AppState, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let session_id = params.first().and_then(|p| p.get("app_session_id")).and_then(|v| v.as_str()).unwrap_or_default();
    let session = state
        .app_sessions
        .by_session_id(session_id)
        .await?
        .ok_or_else(|| ClearnodeError::conflict(format!("app session {session_id} not found")))?;

    let response = json!({
        "protocol": session.protocol,
        "participants": session.participants,
        "weights": session.weights,
        "quorum": session.quorum,
        "challenge": session.challenge,
        "nonce": session.nonce,
    });
    Ok(vec![response])
}

pub async fn get_app_sessions(state: &AppState, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let participant = params.first().and_then(|p| p.get("participant")).and_then(|v| v.as_str());
    let status = params
        .first()
        .and_then(|p| p.get("status"))
        .and_then(|v| v.as_str())
        .and_then(parse_status);
    let sessions = state.app_sessions.list(participant, status).await?;
    let response: Vec<AppSessionResponse> = sessions
        .into_iter()
        .map(|s| AppSessionResponse {
            app_session_id: s.session_id,
            status: format!("{:?}", s.status).to_lowercase(),
            participants: s.participants,
            protocol: s.protocol,
            challenge: s.challenge as u64,
            weights: s.weights,
            quorum: s.quorum as u64,
            version: s.version as u64,
            nonce: s.nonce as u64,
        })
        .collect();
    Ok(vec![serde_json::to_value(response)?])
}

pub async fn get_channels(state: &AppState, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let participant = params.first().and_then(|p| p.get("participant")).and_then(|v| v.as_str());
    let status = params
        .first()
        .and_then(|p| p.get("status"))
        .and_then(|v| v.as_str())
        .and_then(parse_status);

    let channels = match participant {
        Some(wallet) => state.channels.by_wallet(wallet, status).await?,
        None => state.channels.all(status).await?,
    };
    let response: Vec<ChannelResponse> = channels.into_iter().map(Into::into).collect();
    Ok(vec![serde_json::to_value(response)?])
}

/// History is always scoped to the caller's own wallet — the Go original
/// uses `policy.Wallet` directly rather than a request parameter.
pub async fn get_rpc_history(state: &AppState, wallet: &str, params: &[Value]) -> ClearnodeResult<Vec<Value>> {
    let limit = params.first().and_then(|p| p.get("limit")).and_then(|v| v.as_i64()).unwrap_or(100).clamp(1, 1000);
    let offset = params.first().and_then(|p| p.get("offset")).and_then(|v| v.as_i64()).unwrap_or(0).max(0);
    let (records, _total) = state.rpc_store.history(wallet, limit, offset).await?;
    let response: Vec<RpcHistoryEntry> = records
        .into_iter()
        .map(|r| RpcHistoryEntry {
            id: r.id,
            sender: r.sender,
            req_id: r.req_id as u64,
            method: r.method,
            params: r.params,
            timestamp: r.timestamp as u64,
            req_sig: r.req_sig,
            response: r.response,
            res_sig: r.res_sig,
        })
        .collect();
    Ok(vec![serde_json::to_value(response)?])
}

fn parse_status(s: &str) -> Option<ChannelStatus> {
    match s {
        "joining" => Some(ChannelStatus::Joining),
        "open" => Some(ChannelStatus::Open),
        "closed" => Some(ChannelStatus::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_account_id_prefers_participant_key() {
        let params = vec![json!({"participant": "0xabc", "account_id": "0xdef"})];
        assert_eq!(resolve_account_id(&params, "0xwallet"), "0xabc");
    }

    #[test]
    fn resolve_account_id_falls_back_to_wallet() {
        let params: Vec<Value> = vec![json!({})];
        assert_eq!(resolve_account_id(&params, "0xwallet"), "0xwallet");
    }

    #[test]
    fn parse_status_rejects_unknown_strings() {
        assert!(parse_status("pending").is_none());
        assert_eq!(parse_status("open"), Some(ChannelStatus::Open));
    }
}
