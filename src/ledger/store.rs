//! SQLite-backed ledger: per-owner currency balances plus an append-only
//! transaction log.
//!
//! All writes go through one connection behind a mutex, so adjustments on
//! the same `(owner, currency)` key are serialized and a stale
//! read-then-write can never erase a concurrent delta.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Reconciliation treats balances within this distance of the transaction
/// sum as consistent.
const RECONCILE_TOLERANCE: f64 = 1e-6;

const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: {currency} balance {balance:.2} cannot absorb delta {delta:.2}")]
    InsufficientFunds {
        currency: String,
        balance: f64,
        delta: f64,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("malformed ledger row: {0}")]
    Malformed(String),
    #[error("transaction {id} is {current} and can only move from pending to completed or failed")]
    InvalidStatusTransition { id: String, current: String },
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Accrual,
    Bonus,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Accrual => "ACCRUAL",
            TransactionKind::Bonus => "BONUS",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            "ACCRUAL" => Ok(TransactionKind::Accrual),
            "BONUS" => Ok(TransactionKind::Bonus),
            other => Err(LedgerError::Malformed(format!(
                "unknown transaction kind {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(LedgerError::Malformed(format!(
                "unknown transaction status {other:?}"
            ))),
        }
    }
}

/// Current balance snapshot for one `(owner, currency)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub id: i64,
    pub user_id: String,
    pub currency: String,
    pub amount: f64,
}

/// One row of the append-only transaction log. Amounts are signed:
/// withdrawals are recorded negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub currency: String,
    pub amount: f64,
    pub status: TransactionStatus,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount REAL NOT NULL DEFAULT 0.0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, currency)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                comment TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user_created
             ON transactions(user_id, created_at DESC)",
            [],
        )?;
        Ok(())
    }

    pub async fn get_balances(&self, user_id: &str) -> Result<Vec<Balance>, LedgerError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, currency, amount FROM balances
             WHERE user_id = ?1 ORDER BY currency ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Balance {
                id: row.get(0)?,
                user_id: row.get(1)?,
                currency: row.get(2)?,
                amount: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Latest balance rows across all owners, newest accounts first.
    pub async fn list_balances(&self, limit: usize) -> Result<Vec<Balance>, LedgerError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, currency, amount FROM balances
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(Balance {
                id: row.get(0)?,
                user_id: row.get(1)?,
                currency: row.get(2)?,
                amount: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Apply a signed delta to one balance and return the new amount.
    ///
    /// The whole read-check-write runs under the connection lock. A delta
    /// that would drive the balance negative is refused and nothing
    /// changes.
    pub async fn post_delta(
        &self,
        user_id: &str,
        currency: &str,
        delta: f64,
    ) -> Result<f64, LedgerError> {
        if !delta.is_finite() {
            return Err(LedgerError::InvalidAmount(
                "delta must be a finite number".into(),
            ));
        }

        let conn = self.conn.lock().await;
        let current = current_amount(&conn, user_id, currency)?;
        let updated = current + delta;
        if updated < 0.0 {
            return Err(LedgerError::InsufficientFunds {
                currency: currency.to_string(),
                balance: current,
                delta,
            });
        }

        upsert_amount(&conn, user_id, currency, updated)?;
        Ok(updated)
    }

    /// Overwrite a balance to an absolute value. This is the explicit
    /// admin operation; system events should use [`post_delta`].
    ///
    /// The resulting balance will not match the transaction log until a
    /// matching transaction is recorded; [`reconcile`] will flag it.
    ///
    /// [`post_delta`]: LedgerStore::post_delta
    /// [`reconcile`]: LedgerStore::reconcile
    pub async fn set_absolute(
        &self,
        user_id: &str,
        currency: &str,
        amount: f64,
    ) -> Result<f64, LedgerError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::InvalidAmount(
                "absolute balance must be a finite non-negative number".into(),
            ));
        }

        let conn = self.conn.lock().await;
        upsert_amount(&conn, user_id, currency, amount)?;
        Ok(amount)
    }

    /// Append a transaction. Rows are never edited after insert except for
    /// the one-way pending status transition.
    pub async fn record_transaction(
        &self,
        user_id: &str,
        kind: TransactionKind,
        currency: &str,
        amount: f64,
        status: TransactionStatus,
        comment: Option<&str>,
    ) -> Result<LedgerTransaction, LedgerError> {
        if !amount.is_finite() {
            return Err(LedgerError::InvalidAmount(
                "transaction amount must be a finite number".into(),
            ));
        }

        let tx = LedgerTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            currency: currency.to_string(),
            amount,
            status,
            comment: comment.map(str::to_string),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO transactions (id, user_id, kind, currency, amount, status, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &tx.id,
                &tx.user_id,
                tx.kind.as_str(),
                &tx.currency,
                tx.amount,
                tx.status.as_str(),
                tx.comment.as_deref(),
                tx.created_at.to_rfc3339(),
            ],
        )?;
        Ok(tx)
    }

    /// Move a pending transaction to `completed` or `failed`. Completed
    /// and failed rows are terminal and are never reopened.
    pub async fn update_status(
        &self,
        id: &str,
        new_status: TransactionStatus,
    ) -> Result<LedgerTransaction, LedgerError> {
        if new_status == TransactionStatus::Pending {
            return Err(LedgerError::InvalidStatusTransition {
                id: id.to_string(),
                current: TransactionStatus::Pending.as_str().to_string(),
            });
        }

        let conn = self.conn.lock().await;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM transactions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(current) = current else {
            return Err(LedgerError::TransactionNotFound(id.to_string()));
        };
        if current != TransactionStatus::Pending.as_str() {
            return Err(LedgerError::InvalidStatusTransition {
                id: id.to_string(),
                current,
            });
        }

        conn.execute(
            "UPDATE transactions SET status = ?1 WHERE id = ?2",
            params![new_status.as_str(), id],
        )?;

        read_transaction(&conn, id)?.ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// Most recent transactions, optionally filtered by owner. `limit` is
    /// clamped to 500.
    pub async fn list_transactions(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let conn = self.conn.lock().await;

        let mut out = Vec::new();
        if let Some(user_id) = user_id {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, kind, currency, amount, status, comment, created_at
                 FROM transactions WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit], map_transaction_row)?;
            for row in rows {
                out.push(row?);
            }
            return Ok(out);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, kind, currency, amount, status, comment, created_at
             FROM transactions ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], map_transaction_row)?;
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Check that every balance of one owner equals the sum of that
    /// owner's completed transactions in the same currency.
    ///
    /// Mismatches are logged as data-integrity warnings and left for
    /// manual review; nothing is auto-corrected.
    pub async fn reconcile(&self, user_id: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock().await;

        let mut balances: HashMap<String, f64> = HashMap::new();
        {
            let mut stmt = conn
                .prepare_cached("SELECT currency, amount FROM balances WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (currency, amount) = row?;
                balances.insert(currency, amount);
            }
        }

        let mut sums: HashMap<String, f64> = HashMap::new();
        {
            let mut stmt = conn.prepare_cached(
                "SELECT currency, COALESCE(SUM(amount), 0.0) FROM transactions
                 WHERE user_id = ?1 AND status = 'completed' GROUP BY currency",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (currency, sum) = row?;
                sums.insert(currency, sum);
            }
        }

        let mut consistent = true;
        let currencies: BTreeSet<&String> = balances.keys().chain(sums.keys()).collect();
        for currency in currencies {
            let balance = balances.get(currency.as_str()).copied().unwrap_or(0.0);
            let sum = sums.get(currency.as_str()).copied().unwrap_or(0.0);
            if (balance - sum).abs() > RECONCILE_TOLERANCE {
                consistent = false;
                warn!(
                    user_id,
                    currency = currency.as_str(),
                    balance,
                    transaction_sum = sum,
                    "ledger drift: balance does not match completed transactions"
                );
            }
        }

        Ok(consistent)
    }

    /// Run [`reconcile`] for every known owner; returns how many owners
    /// drifted.
    ///
    /// [`reconcile`]: LedgerStore::reconcile
    pub async fn reconcile_all(&self) -> Result<usize, LedgerError> {
        let owners = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT user_id FROM balances
                 UNION SELECT DISTINCT user_id FROM transactions",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut drifted = 0;
        for owner in owners {
            if !self.reconcile(&owner).await? {
                drifted += 1;
            }
        }
        Ok(drifted)
    }
}

fn current_amount(conn: &Connection, user_id: &str, currency: &str) -> rusqlite::Result<f64> {
    let mut stmt = conn.prepare_cached(
        "SELECT amount FROM balances WHERE user_id = ?1 AND currency = ?2 LIMIT 1",
    )?;
    let mut rows = stmt.query(params![user_id, currency])?;
    match rows.next()? {
        Some(row) => row.get(0),
        None => Ok(0.0),
    }
}

fn upsert_amount(
    conn: &Connection,
    user_id: &str,
    currency: &str,
    amount: f64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO balances (user_id, currency, amount, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, currency) DO UPDATE SET
            amount = excluded.amount,
            updated_at = excluded.updated_at",
        params![user_id, currency, amount, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn read_transaction(conn: &Connection, id: &str) -> rusqlite::Result<Option<LedgerTransaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, kind, currency, amount, status, comment, created_at
         FROM transactions WHERE id = ?1 LIMIT 1",
    )?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => map_transaction_row(row).map(Some),
        None => Ok(None),
    }
}

fn map_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    let kind_raw: String = row.get(2)?;
    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(7)?;

    let kind = kind_raw.parse::<TransactionKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status = status_raw.parse::<TransactionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(LedgerTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind,
        currency: row.get(3)?,
        amount: row.get(4)?,
        status,
        comment: row.get(6)?,
        created_at,
    })
}
