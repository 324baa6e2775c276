//! C3 — the signer-to-wallet index (`signers` table).
//!
//! A wallet may delegate signing to any number of session-key addresses;
//! every inbound RPC auth recovers a signer address and looks it up here to
//! find the wallet whose balances/channels it's allowed to act on. The
//! table is small and read on every authenticated request, so it's mirrored
//! in a [`DashMap`] loaded once at startup, the same shape as the Go
//! original's `sync.Map` cache.

use dashmap::DashMap;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::ClearnodeResult;

pub struct SignerWalletIndex {
    pool: PgPool,
    cache: DashMap<String, String>,
}

impl SignerWalletIndex {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
        }
    }

    /// Loads every (signer, wallet) pair into the in-memory cache. Call
    /// once during startup before serving connections.
    pub async fn warm(&self) -> ClearnodeResult<()> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT signer, wallet FROM signers").fetch_all(&self.pool).await?;
        for (signer, wallet) in rows {
            self.cache.insert(signer, wallet);
        }
        tracing::info!(count = self.cache.len(), "loaded signer-wallet index");
        Ok(())
    }

    /// Returns the wallet a signer acts for, or `None` if the signer is
    /// unknown (in which case it is treated as its own wallet by callers).
    pub fn wallet_for(&self, signer: &str) -> Option<String> {
        self.cache.get(signer).map(|v| v.clone())
    }

    /// Takes the caller's transaction — the Created-event handler must
    /// commit this upsert atomically with the channel row it inserts right
    /// after, or a crash between the two writes leaves a channel with no
    /// signer mapping.
    pub async fn add_signer(&self, tx: &mut Transaction<'_, Postgres>, wallet: &str, signer: &str) -> ClearnodeResult<()> {
        sqlx::query("INSERT INTO signers (signer, wallet) VALUES ($1, $2) ON CONFLICT (signer) DO NOTHING")
            .bind(signer)
            .bind(wallet)
            .execute(&mut **tx)
            .await?;
        self.cache.insert(signer.to_string(), wallet.to_string());
        Ok(())
    }

    pub async fn remove_signer(&self, wallet: &str, signer: &str) -> ClearnodeResult<()> {
        sqlx::query("DELETE FROM signers WHERE signer = $1 AND wallet = $2")
            .bind(signer)
            .bind(wallet)
            .execute(&self.pool)
            .await?;
        self.cache.remove(signer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_signer_resolves_to_none() {
        let cache: DashMap<String, String> = DashMap::new();
        cache.insert("0xsignerA".to_string(), "0xwalletA".to_string());
        assert_eq!(cache.get("0xsignerA").map(|v| v.clone()), Some("0xwalletA".to_string()));
        assert!(cache.get("0xunknown").is_none());
    }
}
