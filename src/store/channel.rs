//! C5 — channel records (`channels` table).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::ClearnodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Joining,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub channel_id: String,
    pub chain_id: i64,
    pub token: String,
    pub wallet: String,
    pub participant: String,
    pub amount: i64,
    pub status: ChannelStatus,
    pub challenge: i64,
    pub nonce: i64,
    pub version: i64,
    pub adjudicator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ChannelStore {
    pool: PgPool,
}

impl ChannelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a freshly-joined channel in `Joining` status. The broker is
    /// always the implicit second participant; only the opening wallet's
    /// signer is stored here.
    ///
    /// Takes the caller's transaction rather than `&self.pool` — this insert
    /// must land atomically with the signer-wallet upsert that precedes it
    /// in [`crate::chain::reconciler`]'s Created-event handler.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        channel_id: &str,
        wallet: &str,
        participant_signer: &str,
        nonce: u64,
        challenge: u64,
        adjudicator: &str,
        chain_id: u32,
        token_address: &str,
        amount: u128,
    ) -> ClearnodeResult<Channel> {
        let channel = sqlx::query_as::<_, Channel>(
            "INSERT INTO channels \
             (channel_id, chain_id, token, wallet, participant, amount, status, challenge, nonce, version, adjudicator, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'joining', $7, $8, 0, $9, now(), now()) \
             RETURNING *",
        )
        .bind(channel_id)
        .bind(chain_id as i64)
        .bind(token_address)
        .bind(wallet)
        .bind(participant_signer)
        .bind(amount.to_string().parse::<i64>().unwrap_or(i64::MAX))
        .bind(challenge as i64)
        .bind(nonce as i64)
        .bind(adjudicator)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(channel_id, chain_id, "created new channel");
        Ok(channel)
    }

    pub async fn by_id(&self, channel_id: &str) -> ClearnodeResult<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE channel_id = $1")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(channel)
    }

    pub async fn by_wallet(
        &self,
        wallet: &str,
        status: Option<ChannelStatus>,
    ) -> ClearnodeResult<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE wallet = $1 \
             AND ($2::text IS NULL OR status = $2) ORDER BY created_at DESC",
        )
        .bind(wallet)
        .bind(status.map(|s| format!("{s:?}").to_lowercase()))
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    pub async fn all(&self, status: Option<ChannelStatus>) -> ClearnodeResult<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC",
        )
        .bind(status.map(|s| format!("{s:?}").to_lowercase()))
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    /// An existing `open` channel for (wallet, token, chain) — at most one
    /// may exist per triple, enforced at the RPC layer rather than by a DB
    /// constraint, matching the Go original's check-then-create.
    pub async fn existing_open(
        &self,
        wallet: &str,
        token: &str,
        chain_id: u32,
    ) -> ClearnodeResult<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE wallet = $1 AND token = $2 AND chain_id = $3 AND status = 'open' LIMIT 1",
        )
        .bind(wallet)
        .bind(token)
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }

    /// Takes the caller's transaction: every call site pairs this with a
    /// ledger write that must land in the same commit (§4.2).
    pub async fn update_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        channel_id: &str,
        status: ChannelStatus,
        amount: u128,
        version: u64,
    ) -> ClearnodeResult<()> {
        sqlx::query(
            "UPDATE channels SET status = $1, amount = $2, version = $3, updated_at = now() WHERE channel_id = $4",
        )
        .bind(format!("{status:?}").to_lowercase())
        .bind(amount.to_string().parse::<i64>().unwrap_or(i64::MAX))
        .bind(version as i64)
        .bind(channel_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
