//! `resize_channel` / `close_channel` (§4.6): co-signs the next on-chain
//! channel state without touching the ledger or channel row directly — the
//! channel's stored balance only moves once the custody contract emits the
//! matching `Resized`/`Closed` event, handled by [`crate::chain::reconciler`].
//!
//! Grounded on `HandleResizeChannel`/`HandleCloseChannel` in `handlers.go`.

use alloy::primitives::{Address, B256, I256, U256};
use alloy::sol_types::SolValue;
use serde::Deserialize;
use serde_json::Value;

use super::{AppState, wallet_for_signer};
use crate::error::{ClearnodeError, ClearnodeResult};
use crate::ledger::ledger_for;
use crate::rpc::frame::RpcRequest;
use crate::rpc::types::{Allocation as AllocationResponse, ChannelSigResponse};
use crate::signer::Signature;
use crate::state::{Intent, allocation, encode_state};
use crate::util::money_amount::decimal_to_raw;

#[derive(Debug, Deserialize)]
struct ResizeChannelParams {
    channel_id: String,
    #[serde(default)]
    resize_amount: i128,
    #[serde(default)]
    allocate_amount: i128,
    funds_destination: String,
}

#[derive(Debug, Deserialize)]
struct CloseChannelParams {
    channel_id: String,
    funds_destination: String,
}

fn first_param<T: for<'de> Deserialize<'de>>(req: &RpcRequest) -> ClearnodeResult<T> {
    let raw = req.params.first().ok_or_else(|| ClearnodeError::validation("missing parameters"))?;
    serde_json::from_value(raw.clone()).map_err(|e| ClearnodeError::validation(format!("invalid parameters: {e}")))
}

/// Recovers the single required signature and resolves it to a wallet via
/// the signer-wallet index, matching `GetWalletBySigner`'s "empty means
/// self" contract used by both handlers.
fn recover_sole_signer(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<String> {
    let sig_hex = sigs.first().ok_or_else(|| ClearnodeError::auth("missing signature"))?;
    let req_bytes = serde_json::to_vec(req)?;
    let sig = Signature::from_hex(sig_hex)?;
    let addr = crate::signer::recover_address(&req_bytes, sig)?;
    Ok(wallet_for_signer(state, &addr.to_string()))
}

fn parse_address(s: &str) -> ClearnodeResult<Address> {
    s.parse().map_err(|_| ClearnodeError::validation(format!("invalid address: {s}")))
}

/// Co-signs a resize: new channel amount is the current on-chain amount
/// plus `allocate_amount` (funded from the wallet's spendable balance) plus
/// `resize_amount` (a pure channel-size delta with no balance backing).
pub async fn resize_channel(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<Vec<Value>> {
    let params: ResizeChannelParams = first_param(req)?;

    let channel = state
        .channels
        .by_id(&params.channel_id)
        .await?
        .ok_or_else(|| ClearnodeError::conflict(format!("channel {} not found", params.channel_id)))?;

    let signer_wallet = recover_sole_signer(state, req, sigs)?;
    if !signer_wallet.eq_ignore_ascii_case(&channel.wallet) {
        return Err(ClearnodeError::auth("invalid signature"));
    }

    let asset = state
        .assets
        .by_token(&channel.token, channel.chain_id as u32)
        .await?
        .ok_or_else(|| ClearnodeError::validation(format!("asset not found: {}", channel.token)))?;

    let mut tx = state.pool.begin().await?;
    let balance = ledger_for(&channel.wallet, &mut tx).balance(&channel.wallet, &asset.symbol).await?;
    tx.rollback().await?;
    let raw_balance = decimal_to_raw(balance, asset.decimals as u8) as i128;

    let new_amount_after_allocate = channel.amount as i128 + params.allocate_amount;
    if raw_balance < new_amount_after_allocate {
        return Err(ClearnodeError::validation("insufficient unified balance"));
    }
    let new_channel_amount = new_amount_after_allocate + params.resize_amount;
    if new_channel_amount < 0 {
        return Err(ClearnodeError::validation("new channel amount must be positive"));
    }

    let token_address = parse_address(&channel.token)?;
    let funds_destination = parse_address(&params.funds_destination)?;
    let allocations = vec![
        allocation(funds_destination, token_address, U256::try_from(new_channel_amount).unwrap_or(U256::ZERO)),
        allocation(state.signer.address(), token_address, U256::ZERO),
    ];

    let resize_amounts = vec![I256::try_from(params.allocate_amount).unwrap_or(I256::ZERO), I256::try_from(params.resize_amount).unwrap_or(I256::ZERO)];
    let state_data = (resize_amounts,).abi_encode_params();

    let channel_id: B256 = params.channel_id.parse().map_err(|_| ClearnodeError::validation("invalid channel id"))?;
    let next_version = U256::from(channel.version as u64 + 1);
    let encoded_state = encode_state(channel_id, Intent::Resize, next_version, &state_data, &allocations);
    let state_hash = alloy::primitives::keccak256(&encoded_state);
    let server_signature = state.signer.sign(&encoded_state).await?;

    let response = ChannelSigResponse {
        channel_id: channel.channel_id,
        intent: Intent::Resize as u8,
        version: channel.version as u64 + 1,
        state_data: format!("0x{}", hex::encode(&state_data)),
        allocations: allocations
            .iter()
            .map(|a| AllocationResponse {
                destination: a.destination.to_string(),
                token: a.token.to_string(),
                amount: a.amount.to_string(),
            })
            .collect(),
        state_hash: state_hash.to_string(),
        server_signature: server_signature.to_hex(),
    };

    Ok(vec![serde_json::to_value(response)?])
}

/// Co-signs a final close: the wallet's on-chain raw balance goes to
/// `funds_destination`, the remainder of the channel's locked amount goes
/// to the broker.
pub async fn close_channel(state: &AppState, req: &RpcRequest, sigs: &[String]) -> ClearnodeResult<Vec<Value>> {
    let params: CloseChannelParams = first_param(req)?;

    let channel = state
        .channels
        .by_id(&params.channel_id)
        .await?
        .ok_or_else(|| ClearnodeError::conflict(format!("channel {} not found", params.channel_id)))?;

    let signer_wallet = recover_sole_signer(state, req, sigs)?;
    if !signer_wallet.eq_ignore_ascii_case(&channel.wallet) {
        return Err(ClearnodeError::auth("invalid signature"));
    }

    let asset = state
        .assets
        .by_token(&channel.token, channel.chain_id as u32)
        .await?
        .ok_or_else(|| ClearnodeError::validation(format!("asset not found: {}", channel.token)))?;

    let mut tx = state.pool.begin().await?;
    let balance = ledger_for(&channel.wallet, &mut tx).balance(&channel.wallet, &asset.symbol).await?;
    tx.rollback().await?;
    if balance.is_sign_negative() {
        return Err(ClearnodeError::validation(format!("insufficient funds for participant: {}", channel.token)));
    }
    let raw_balance = decimal_to_raw(balance, asset.decimals as u8);

    if (channel.amount as u128) < raw_balance {
        return Err(ClearnodeError::validation("resize this channel first"));
    }
    let broker_amount = channel.amount as u128 - raw_balance;

    let token_address = parse_address(&channel.token)?;
    let funds_destination = parse_address(&params.funds_destination)?;
    let allocations = vec![
        allocation(funds_destination, token_address, U256::from(raw_balance)),
        allocation(state.signer.address(), token_address, U256::from(broker_amount)),
    ];

    let channel_id: B256 = params.channel_id.parse().map_err(|_| ClearnodeError::validation("invalid channel id"))?;
    let next_version = U256::from(channel.version as u64 + 1);
    let encoded_state = encode_state(channel_id, Intent::Finalize, next_version, &[], &allocations);
    let state_hash = alloy::primitives::keccak256(&encoded_state);
    let server_signature = state.signer.sign(&encoded_state).await?;

    let response = ChannelSigResponse {
        channel_id: channel.channel_id,
        intent: Intent::Finalize as u8,
        version: channel.version as u64 + 1,
        state_data: "0x".to_string(),
        allocations: allocations
            .iter()
            .map(|a| AllocationResponse {
                destination: a.destination.to_string(),
                token: a.token.to_string(),
                amount: a.amount.to_string(),
            })
            .collect(),
        state_hash: state_hash.to_string(),
        server_signature: server_signature.to_hex(),
    };

    Ok(vec![serde_json::to_value(response)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_params_default_amounts_to_zero() {
        let params: ResizeChannelParams = serde_json::from_value(serde_json::json!({
            "channel_id": "0xabc",
            "funds_destination": "0xdef",
        }))
        .unwrap();
        assert_eq!(params.resize_amount, 0);
        assert_eq!(params.allocate_amount, 0);
    }
}
