//! C7 — the RPC audit trail (`rpc_store` table): every request/response
//! pair this node has handled, signatures included, for replay protection
//! and history queries.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::ClearnodeResult;
use crate::rpc::frame::RpcRequest;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RpcRecord {
    pub id: i64,
    pub sender: String,
    pub req_id: i64,
    pub method: String,
    pub params: String,
    pub timestamp: i64,
    pub req_sig: Vec<String>,
    pub response: String,
    pub res_sig: Vec<String>,
}

pub struct RpcStore {
    pool: PgPool,
}

impl RpcStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn store(
        &self,
        sender: &str,
        req: &RpcRequest,
        req_sig: &[String],
        response_json: &str,
        res_sig: &[String],
    ) -> ClearnodeResult<()> {
        let params = serde_json::to_string(&req.params)?;
        sqlx::query(
            "INSERT INTO rpc_store (sender, req_id, method, params, timestamp, req_sig, response, res_sig) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(sender)
        .bind(req.request_id as i64)
        .bind(&req.method)
        .bind(params)
        .bind(req.timestamp as i64)
        .bind(req_sig)
        .bind(response_json)
        .bind(res_sig)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history(
        &self,
        sender: &str,
        limit: i64,
        offset: i64,
    ) -> ClearnodeResult<(Vec<RpcRecord>, i64)> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rpc_store WHERE sender = $1")
            .bind(sender)
            .fetch_one(&self.pool)
            .await?;

        let records = sqlx::query_as::<_, RpcRecord>(
            "SELECT * FROM rpc_store WHERE sender = $1 ORDER BY timestamp DESC OFFSET $2 LIMIT $3",
        )
        .bind(sender)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok((records, total.0))
    }

    pub async fn by_req_id(&self, req_id: u64) -> ClearnodeResult<Option<RpcRecord>> {
        let record = sqlx::query_as::<_, RpcRecord>("SELECT * FROM rpc_store WHERE req_id = $1")
            .bind(req_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}
