use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgExecutor, FromRow, PgPool};
use tracing::{debug, info};

use super::models::*;
use super::store::LedgerStore;
use crate::error::{AppError, AppResult};

/// Postgres ledger - THE source of truth for orders and withdrawals
pub struct PgLedgerStore {
    pub pool: PgPool,
}

#[derive(FromRow)]
struct ChargeRow {
    order_number: OrderNumber,
    owner_id: String,
    status: OrderStatus,
    accrual: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ChargeRow> for ChargeEntry {
    fn from(row: ChargeRow) -> Self {
        Self {
            order_number: row.order_number,
            owner: row.owner_id,
            status: row.status,
            accrual: row.accrual,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct WithdrawalRow {
    order_number: OrderNumber,
    owner_id: String,
    withdrawal: Decimal,
    created_at: DateTime<Utc>,
}

impl From<WithdrawalRow> for WithdrawalEntry {
    fn from(row: WithdrawalRow) -> Self {
        Self {
            order_number: row.order_number,
            owner: row.owner_id,
            amount: row.withdrawal,
            created_at: row.created_at,
        }
    }
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("✅ Ledger migrations applied");
        Ok(())
    }

    /// Single aggregate over the owner's entries. Runs on the pool or inside
    /// the withdrawal transaction.
    async fn fetch_balance<'e, E>(executor: E, owner: &str) -> AppResult<Balance>
    where
        E: PgExecutor<'e>,
    {
        let (accrued, withdrawn) = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT
                COALESCE(SUM(accrual) FILTER (WHERE kind = 'charge' AND status = 'PROCESSED'), 0),
                COALESCE(SUM(withdrawal) FILTER (WHERE kind = 'withdrawal'), 0)
            FROM ledger_entries
            WHERE owner_id = $1
            "#,
        )
        .bind(owner)
        .fetch_one(executor)
        .await?;

        Ok(Balance::from_totals(accrued, withdrawn))
    }
}

fn map_insert_error(err: sqlx::Error, order_number: &OrderNumber) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return AppError::DuplicateOrder(order_number.to_string());
        }
    }
    AppError::Storage(err)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    // ========== CHARGE OPERATIONS ==========

    async fn insert_charge(&self, owner: &str, order_number: &OrderNumber) -> AppResult<ChargeEntry> {
        let row = sqlx::query_as::<_, ChargeRow>(
            r#"
            INSERT INTO ledger_entries (order_number, owner_id, kind, status)
            VALUES ($1, $2, 'charge', 'NEW')
            RETURNING order_number, owner_id, status, accrual, created_at, updated_at
            "#,
        )
        .bind(order_number)
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, order_number))?;

        Ok(row.into())
    }

    async fn find_owner_by_order(&self, order_number: &OrderNumber) -> AppResult<Option<String>> {
        let owner = sqlx::query_scalar::<_, String>(
            "SELECT owner_id FROM ledger_entries WHERE order_number = $1",
        )
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    async fn list_pending(&self) -> AppResult<Vec<OrderNumber>> {
        let pending = sqlx::query_scalar::<_, OrderNumber>(
            r#"
            SELECT order_number
            FROM ledger_entries
            WHERE kind = 'charge' AND status IN ('NEW', 'PROCESSING')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(pending)
    }

    async fn apply_reconciliation(&self, update: &ReconciliationUpdate) -> AppResult<bool> {
        // Conditional transition: terminal rows and regressions match nothing
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = $2,
                accrual = CASE WHEN $2 = 'PROCESSED'::order_status THEN $3 ELSE accrual END,
                updated_at = NOW()
            WHERE order_number = $1
              AND kind = 'charge'
              AND status IN ('NEW', 'PROCESSING')
              AND status <> $2
              AND $2 <> 'NEW'::order_status
            "#,
        )
        .bind(&update.order_number)
        .bind(update.status)
        .bind(update.accrual)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            debug!(
                "Order {} moved to {} (accrual: {:?})",
                update.order_number, update.status, update.accrual
            );
        }

        Ok(applied)
    }

    async fn list_orders(&self, owner: &str) -> AppResult<Vec<ChargeEntry>> {
        let rows = sqlx::query_as::<_, ChargeRow>(
            r#"
            SELECT order_number, owner_id, status, accrual, created_at, updated_at
            FROM ledger_entries
            WHERE owner_id = $1 AND kind = 'charge'
            ORDER BY created_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChargeEntry::from).collect())
    }

    // ========== BALANCE OPERATIONS ==========

    async fn aggregate_balance(&self, owner: &str) -> AppResult<Balance> {
        Self::fetch_balance(&self.pool, owner).await
    }

    /// Balance check and insert share one transaction holding a per-owner
    /// advisory lock, so concurrent withdrawals by one owner serialize.
    async fn insert_withdrawal(
        &self,
        owner: &str,
        order_number: &OrderNumber,
        amount: Decimal,
    ) -> AppResult<WithdrawalEntry> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        let balance = Self::fetch_balance(&mut *tx, owner).await?;
        if !balance.covers(amount) {
            return Err(AppError::InsufficientFunds {
                required: amount.to_string(),
                available: balance.current.to_string(),
            });
        }

        let row = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            INSERT INTO ledger_entries (order_number, owner_id, kind, withdrawal)
            VALUES ($1, $2, 'withdrawal', $3)
            RETURNING order_number, owner_id, withdrawal, created_at
            "#,
        )
        .bind(order_number)
        .bind(owner)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, order_number))?;

        tx.commit().await?;

        Ok(row.into())
    }

    async fn list_withdrawals(&self, owner: &str) -> AppResult<Vec<WithdrawalEntry>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT order_number, owner_id, withdrawal, created_at
            FROM ledger_entries
            WHERE owner_id = $1 AND kind = 'withdrawal'
            ORDER BY created_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WithdrawalEntry::from).collect())
    }
}
