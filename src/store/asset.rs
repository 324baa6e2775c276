//! C4 — the asset registry (`assets` table): maps (token, chain) to a
//! symbol and a decimals scale used by [`crate::util::money_amount`].

use serde::Serialize;
use sqlx::PgPool;

use crate::error::ClearnodeResult;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Asset {
    pub token: String,
    pub chain_id: i64,
    pub symbol: String,
    pub decimals: i16,
}

pub struct AssetStore {
    pool: PgPool,
}

impl AssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_token(&self, token: &str, chain_id: u32) -> ClearnodeResult<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE token = $1 AND chain_id = $2")
            .bind(token)
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(asset)
    }

    pub async fn by_symbol(&self, symbol: &str, chain_id: u32) -> ClearnodeResult<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE symbol = $1 AND chain_id = $2")
            .bind(symbol)
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(asset)
    }

    pub async fn all(&self, chain_id: Option<u32>) -> ClearnodeResult<Vec<Asset>> {
        let assets = sqlx::query_as::<_, Asset>(
            "SELECT * FROM assets WHERE ($1::bigint IS NULL OR chain_id = $1) ORDER BY chain_id, symbol",
        )
        .bind(chain_id.map(|c| c as i64))
        .fetch_all(&self.pool)
        .await?;
        Ok(assets)
    }
}
