//! Response DTOs shared across RPC handlers — the JSON shapes returned as
//! `res.params[0]`, grounded in `handlers.go`'s response structs.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::AccountType;
use crate::store::{Asset, Channel, ChannelStatus};

#[derive(Debug, Serialize)]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u32,
    pub custody_address: String,
    pub adjudicator_address: String,
}

#[derive(Debug, Serialize)]
pub struct BrokerConfig {
    pub broker_address: String,
    pub networks: Vec<NetworkInfo>,
}

#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub token: String,
    pub chain_id: u32,
    pub symbol: String,
    pub decimals: u8,
}

impl From<Asset> for AssetResponse {
    fn from(a: Asset) -> Self {
        Self { token: a.token, chain_id: a.chain_id as u32, symbol: a.symbol, decimals: a.decimals as u8 }
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub channel_id: String,
    pub participant: String,
    pub wallet: String,
    pub status: ChannelStatus,
    pub token: String,
    pub amount: String,
    pub chain_id: u32,
    pub adjudicator: String,
    pub challenge: u64,
    pub nonce: u64,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Channel> for ChannelResponse {
    fn from(c: Channel) -> Self {
        Self {
            channel_id: c.channel_id,
            participant: c.participant,
            wallet: c.wallet,
            status: c.status,
            token: c.token,
            amount: c.amount.to_string(),
            chain_id: c.chain_id as u32,
            adjudicator: c.adjudicator,
            challenge: c.challenge as u64,
            nonce: c.nonce as u64,
            version: c.version as u64,
            created_at: c.created_at.to_rfc3339(),
            updated_at: c.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppSessionResponse {
    pub app_session_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub challenge: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weights: Vec<i64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub quorum: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub version: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub nonce: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub id: i64,
    pub account_id: String,
    pub account_type: AccountType,
    pub asset: String,
    pub participant: String,
    pub credit: Decimal,
    pub debit: Decimal,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct Balance {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RpcHistoryEntry {
    pub id: i64,
    pub sender: String,
    pub req_id: u64,
    pub method: String,
    pub params: String,
    pub timestamp: u64,
    pub req_sig: Vec<String>,
    pub response: String,
    pub res_sig: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Allocation {
    pub destination: String,
    pub token: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelSigResponse {
    pub channel_id: String,
    pub intent: u8,
    pub version: u64,
    pub state_data: String,
    pub allocations: Vec<Allocation>,
    pub state_hash: String,
    pub server_signature: String,
}
