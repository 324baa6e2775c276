//! `create_app_session` / `close_app_session` (§4.4): multi-party virtual
//! ledger accounts funded and redistributed by participant quorum.
//!
//! Grounded on `HandleCreateApplication`/`HandleCloseApplication` in
//! `handlers.go`. The session id is `keccak256(json(definition))`; signing
//! follows this crate's uniform rule (§ decision in DESIGN.md) of signing
//! the canonical `[request_id, method, params, timestamp]` envelope for
//! every method, rather than the Go original's bespoke per-method
//! `*SignData.MarshalJSON` wrappers — both shapes carry the same fields, so
//! the byte difference has no observable effect here.

use alloy::primitives::keccak256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AppState, wallet_for_signer};
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::ledger::ledger_for;
use crate::rpc::frame::RpcRequest;
use crate::signer::Signature;
use crate::store::ChannelStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<String>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppAllocation {
    pub participant: String,
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct CreateAppSessionParams {
    definition: AppDefinition,
    allocations: Vec<AppAllocation>,
}

#[derive(Debug, Deserialize)]
struct CloseAppSessionParams {
    app_session_id: String,
    allocations: Vec<AppAllocation>,
}

fn first_param<T: for<'de> Deserialize<'de>>(req: &RpcRequest) -> ClearnodeResult<T> {
    let raw = req.params.first().ok_or_else(|| ClearnodeError::validation("missing parameters"))?;
    serde_json::from_value(raw.clone()).map_err(|e| ClearnodeError::validation(format!("invalid parameters: {e}")))
}

fn recovered_wallets(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<Vec<String>> {
    let req_bytes = serde_json::to_vec(req)?;
    sigs.iter()
        .map(|hex| {
            let sig = Signature::from_hex(hex)?;
            let addr = crate::signer::recover_address(&req_bytes, sig)?;
            Ok(wallet_for_signer(state, &addr.to_string()))
        })
        .collect()
}

/// Creates a multi-party app session: funds each positive allocation from
/// its participant's wallet balance into the new session's sub-account.
pub async fn create_app_session(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<Vec<Value>> {
    let params: CreateAppSessionParams = first_param(req)?;
    let definition = &params.definition;

    if definition.participants.len() < 2 {
        return Err(ClearnodeError::validation("invalid number of participants"));
    }
    if params.allocations.len() != definition.participants.len() {
        return Err(ClearnodeError::validation("number of allocations must equal participants"));
    }
    if definition.weights.len() != definition.participants.len() {
        return Err(ClearnodeError::validation("number of weights must equal participants"));
    }
    if definition.nonce == 0 {
        return Err(ClearnodeError::validation("invalid nonce"));
    }

    let recovered: std::collections::HashSet<String> =
        recovered_wallets(state, req, sigs)?.into_iter().collect();

    let definition_json = serde_json::to_vec(definition)?;
    let session_id = format!("0x{}", hex::encode(keccak256(&definition_json)));

    let mut tx = state.pool.begin().await?;
    for alloc in &params.allocations {
        if alloc.amount.is_sign_negative() {
            return Err(ClearnodeError::validation("invalid allocation"));
        }
        if !alloc.amount.is_zero() && !recovered.contains(&alloc.participant) {
            return Err(ClearnodeError::validation(format!("missing signature for participant {}", alloc.participant)));
        }

        let mut ledger = ledger_for(&alloc.participant, &mut tx);
        let balance = ledger.balance(&alloc.participant, &alloc.asset).await?;
        if alloc.amount > balance {
            return Err(ClearnodeError::validation("insufficient funds"));
        }
        ledger.record(&alloc.participant, &alloc.asset, -alloc.amount).await?;
        ledger.record(&session_id, &alloc.asset, alloc.amount).await?;
    }

    let weights: Vec<i64> = definition.weights.iter().map(|w| *w as i64).collect();
    state
        .app_sessions
        .create(
            &mut tx,
            &definition.protocol,
            &session_id,
            definition.challenge,
            definition.nonce,
            &definition.participants,
            &weights,
            definition.quorum,
            req.timestamp,
        )
        .await?;
    tx.commit().await?;

    state.metrics.app_sessions_total.inc();

    Ok(vec![serde_json::json!({
        "app_session_id": session_id,
        "status": "open",
    })])
}

/// Closes an app session: redistributes its sub-account balance to
/// participants per `allocations`, requiring weighted quorum among the
/// recovered signers and a fully accounted-for redistribution per asset.
pub async fn close_app_session(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<Vec<Value>> {
    let params: CloseAppSessionParams = first_param(req)?;
    if params.app_session_id.is_empty() || params.allocations.is_empty() {
        return Err(ClearnodeError::validation("missing required parameters: app_session_id or allocations"));
    }
    for alloc in &params.allocations {
        if alloc.participant.is_empty() || alloc.asset.is_empty() || alloc.amount.is_sign_negative() {
            return Err(ClearnodeError::validation("invalid allocation row"));
        }
    }

    let session = state
        .app_sessions
        .by_session_id(&params.app_session_id)
        .await?
        .filter(|s| s.status == ChannelStatus::Open)
        .ok_or_else(|| ClearnodeError::conflict("virtual app not found or not open"))?;

    let weights: std::collections::HashMap<&str, i64> =
        session.participants.iter().map(String::as_str).zip(session.weights.iter().copied()).collect();

    let req_bytes = serde_json::to_vec(req)?;
    let mut total_weight: i64 = 0;
    let mut seen = std::collections::HashSet::new();
    for hex in sigs {
        let sig = Signature::from_hex(hex)?;
        let addr = crate::signer::recover_address(&req_bytes, sig)?.to_string();
        let wallet = wallet_for_signer(state, &addr);
        if !seen.insert(wallet.clone()) {
            continue;
        }
        let weight = *weights
            .get(wallet.as_str())
            .ok_or_else(|| ClearnodeError::validation(format!("signature from unknown participant wallet {wallet}")))?;
        if weight <= 0 {
            return Err(ClearnodeError::validation(format!("zero weight for signer {wallet}")));
        }
        total_weight += weight;
    }
    if total_weight < session.quorum {
        return Err(ClearnodeError::validation(format!("quorum not met: {total_weight} / {}", session.quorum)));
    }

    let mut tx = state.pool.begin().await?;

    let mut session_balance: std::collections::HashMap<String, Decimal> = std::collections::HashMap::new();
    let assets: std::collections::HashSet<&str> = params.allocations.iter().map(|a| a.asset.as_str()).collect();
    for participant in &session.participants {
        let mut ledger = ledger_for(participant, &mut tx);
        for asset in &assets {
            let bal = ledger.balance(&session.session_id, asset).await?;
            *session_balance.entry(asset.to_string()).or_default() += bal;
        }
    }

    let mut allocation_sum: std::collections::HashMap<String, Decimal> = std::collections::HashMap::new();
    for alloc in &params.allocations {
        if !weights.contains_key(alloc.participant.as_str()) {
            return Err(ClearnodeError::validation(format!("allocation to non-participant {}", alloc.participant)));
        }
        let mut ledger = ledger_for(&alloc.participant, &mut tx);
        let balance = ledger.balance(&session.session_id, &alloc.asset).await?;
        ledger.record(&session.session_id, &alloc.asset, -balance).await?;
        ledger.record(&alloc.participant, &alloc.asset, alloc.amount).await?;
        *allocation_sum.entry(alloc.asset.clone()).or_default() += alloc.amount;
    }

    for (asset, balance) in &session_balance {
        match allocation_sum.get(asset) {
            Some(sum) if sum == balance => {}
            _ => return Err(ClearnodeError::validation(format!("asset {asset} not fully redistributed"))),
        }
    }
    for asset in allocation_sum.keys() {
        if !session_balance.contains_key(asset) {
            return Err(ClearnodeError::validation(format!("allocation references unknown asset {asset}")));
        }
    }

    state.app_sessions.close(&mut tx, &session.session_id, session.version as u64 + 1).await?;
    tx.commit().await?;

    Ok(vec![serde_json::json!({
        "app_session_id": params.app_session_id,
        "status": "closed",
    })])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_json_preserves_field_order_for_session_id() {
        let def = AppDefinition {
            protocol: "NitroRPC/0.2".to_string(),
            participants: vec!["0xa".to_string(), "0xb".to_string()],
            weights: vec![1, 1],
            quorum: 2,
            challenge: 0,
            nonce: 1,
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.starts_with(r#"{"protocol":"#));
        assert!(json.contains(r#""nonce":1"#));
    }
}
