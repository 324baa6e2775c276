//! C2 — the double-entry ledger, single source of truth for spendable
//! balances.
//!
//! Every multi-step mutation (app-session create/close, chain-event
//! reconciliation) runs its `record`/`balance` calls against the same
//! [`sqlx::Transaction`], so check-then-debit is race-free: the row lock
//! taken by `balance`'s `SELECT ... FOR UPDATE` is held until the caller
//! commits or rolls back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Postgres, Transaction};

use crate::error::ClearnodeResult;

/// Whether an account-id names a wallet's own account or an app-session's
/// shared sub-account. Not a stored column value by itself — derived by
/// comparing `account_id` to `wallet` at read time, matching the
/// teacher-adjacent source's `AccountType` enum usage in ledger read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Wallet,
    AppSession,
}

impl AccountType {
    pub fn of(account_id: &str, wallet: &str) -> Self {
        if account_id.eq_ignore_ascii_case(wallet) {
            AccountType::Wallet
        } else {
            AccountType::AppSession
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: String,
    pub account_type: AccountType,
    pub asset_symbol: String,
    pub wallet: String,
    pub credit: Decimal,
    pub debit: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetBalance {
    pub asset: String,
    pub amount: Decimal,
}

/// A ledger view scoped to one wallet, mirroring the Go original's
/// `GetWalletLedger(db, wallet)` constructor — every entry this type writes
/// carries `wallet` as its owner, even when the `account_id` it writes
/// against is an app-session id.
pub struct WalletLedger<'a, 'tx> {
    wallet: &'a str,
    tx: &'a mut Transaction<'tx, Postgres>,
}

pub fn ledger_for<'a, 'tx>(
    wallet: &'a str,
    tx: &'a mut Transaction<'tx, Postgres>,
) -> WalletLedger<'a, 'tx> {
    WalletLedger { wallet, tx }
}

impl<'a, 'tx> WalletLedger<'a, 'tx> {
    /// Appends one entry. Positive `amount` credits, negative debits (by
    /// absolute value), zero is a no-op — never writes a zero-amount row.
    pub async fn record(
        &mut self,
        account_id: &str,
        asset_symbol: &str,
        amount: Decimal,
    ) -> ClearnodeResult<()> {
        let (credit, debit) = if amount.is_sign_positive() && !amount.is_zero() {
            (amount, Decimal::ZERO)
        } else if amount.is_sign_negative() {
            (Decimal::ZERO, amount.abs())
        } else {
            return Ok(());
        };

        tracing::debug!(wallet = self.wallet, account_id, asset_symbol, %amount, "recording ledger entry");

        sqlx::query(
            "INSERT INTO ledger (account_id, account_type, asset_symbol, wallet, credit, debit, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(account_id)
        .bind(format!("{:?}", AccountType::of(account_id, self.wallet)))
        .bind(asset_symbol)
        .bind(self.wallet)
        .bind(credit)
        .bind(debit)
        .execute(&mut **self.tx)
        .await?;
        Ok(())
    }

    /// `Σcredit − Σdebit` for (account-id, wallet, asset), locking the
    /// matching rows for the remainder of the transaction.
    pub async fn balance(&mut self, account_id: &str, asset_symbol: &str) -> ClearnodeResult<Decimal> {
        let row: (Decimal,) = sqlx::query_as(
            "SELECT COALESCE(SUM(credit),0) - COALESCE(SUM(debit),0) FROM ledger \
             WHERE account_id = $1 AND asset_symbol = $2 AND wallet = $3 FOR UPDATE",
        )
        .bind(account_id)
        .bind(asset_symbol)
        .bind(self.wallet)
        .fetch_one(&mut **self.tx)
        .await?;
        Ok(row.0)
    }

    /// Grouped-by-asset balances for (account-id, wallet).
    pub async fn balances(&mut self, account_id: &str) -> ClearnodeResult<Vec<AssetBalance>> {
        let rows: Vec<(String, Decimal)> = sqlx::query_as(
            "SELECT asset_symbol, COALESCE(SUM(credit),0) - COALESCE(SUM(debit),0) AS balance \
             FROM ledger WHERE account_id = $1 AND wallet = $2 GROUP BY asset_symbol",
        )
        .bind(account_id)
        .bind(self.wallet)
        .fetch_all(&mut **self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(asset, amount)| AssetBalance { asset, amount })
            .collect())
    }

    /// Filtered entry listing; `None` filters match all.
    pub async fn entries(
        &mut self,
        account_id: Option<&str>,
        asset_symbol: Option<&str>,
    ) -> ClearnodeResult<Vec<LedgerEntry>> {
        let rows: Vec<(i64, String, String, String, Decimal, Decimal, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, account_id, asset_symbol, wallet, credit, debit, created_at FROM ledger \
             WHERE ($1::text IS NULL OR account_id = $1) \
               AND ($2::text IS NULL OR wallet = $2) \
               AND ($3::text IS NULL OR asset_symbol = $3) \
             ORDER BY id ASC",
        )
        .bind(account_id)
        .bind(self.wallet)
        .bind(asset_symbol)
        .fetch_all(&mut **self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, account_id, wallet, asset_symbol, credit, debit, created_at)| LedgerEntry {
                id,
                account_type: AccountType::of(&account_id, &wallet),
                account_id,
                asset_symbol,
                wallet,
                credit,
                debit,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_type_distinguishes_wallet_from_session() {
        let wallet = "0xabc";
        assert_eq!(AccountType::of(wallet, wallet), AccountType::Wallet);
        assert_eq!(AccountType::of("session-123", wallet), AccountType::AppSession);
    }

    #[test]
    fn account_type_is_case_insensitive() {
        assert_eq!(AccountType::of("0xABC", "0xabc"), AccountType::Wallet);
    }
}
