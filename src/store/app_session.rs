//! C6 — multi-party app-session records (`app_sessions` table).

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use super::channel::ChannelStatus;
use crate::error::ClearnodeResult;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppSession {
    pub id: i64,
    pub protocol: String,
    pub session_id: String,
    pub challenge: i64,
    pub nonce: i64,
    pub participants: Vec<String>,
    pub weights: Vec<i64>,
    pub quorum: i64,
    pub version: i64,
    pub status: ChannelStatus,
}

pub struct AppSessionStore {
    pool: PgPool,
}

impl AppSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Takes the caller's transaction — the insert must land atomically
    /// with the ledger funding writes that precede it in
    /// `create_app_session` (§4.4 step 4). `version` is the caller's
    /// request timestamp, matching the Go original's `Version:
    /// rpc.Req.Timestamp`, not a counter starting at 1.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        protocol: &str,
        session_id: &str,
        challenge: u64,
        nonce: u64,
        participants: &[String],
        weights: &[i64],
        quorum: u64,
        version: u64,
    ) -> ClearnodeResult<AppSession> {
        let session = sqlx::query_as::<_, AppSession>(
            "INSERT INTO app_sessions \
             (protocol, session_id, challenge, nonce, participants, weights, quorum, version, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'open') RETURNING *",
        )
        .bind(protocol)
        .bind(session_id)
        .bind(challenge as i64)
        .bind(nonce as i64)
        .bind(participants)
        .bind(weights)
        .bind(quorum as i64)
        .bind(version as i64)
        .fetch_one(&mut **tx)
        .await?;
        Ok(session)
    }

    pub async fn by_session_id(&self, session_id: &str) -> ClearnodeResult<Option<AppSession>> {
        let session =
            sqlx::query_as::<_, AppSession>("SELECT * FROM app_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    /// Sessions visible to `participant_wallet` (`ANY(participants)`), or
    /// every session when no wallet filter is given.
    pub async fn list(
        &self,
        participant_wallet: Option<&str>,
        status: Option<ChannelStatus>,
    ) -> ClearnodeResult<Vec<AppSession>> {
        let sessions = sqlx::query_as::<_, AppSession>(
            "SELECT * FROM app_sessions \
             WHERE ($1::text IS NULL OR $1 = ANY(participants)) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY id DESC",
        )
        .bind(participant_wallet)
        .bind(status.map(|s| format!("{s:?}").to_lowercase()))
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    /// Takes the caller's transaction — `close_app_session` must commit this
    /// alongside its redistribution ledger writes, or a concurrent close on
    /// the same session could observe `status = 'open'` from both callers.
    pub async fn close(&self, tx: &mut Transaction<'_, Postgres>, session_id: &str, version: u64) -> ClearnodeResult<()> {
        sqlx::query("UPDATE app_sessions SET status = 'closed', version = $1 WHERE session_id = $2")
            .bind(version as i64)
            .bind(session_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
