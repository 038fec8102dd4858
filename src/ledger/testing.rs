// Test doubles for the ledger store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use parking_lot::Mutex;
use std::time::Duration;

use super::models::*;
use super::store::LedgerStore;
use super::MemoryLedgerStore;
use crate::error::{AppError, AppResult};

/// How a side of the store currently misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Healthy,
    /// Database unreachable: the pool gives up waiting for a connection
    Unreachable,
    /// Database up, but rejects the statement (bad data, constraint, overflow)
    Rejecting,
}

impl Fault {
    fn check(self) -> AppResult<()> {
        match self {
            Fault::Healthy => Ok(()),
            Fault::Unreachable => Err(AppError::Storage(sqlx::Error::PoolTimedOut)),
            Fault::Rejecting => Err(AppError::Storage(sqlx::Error::Decode(
                "numeric field overflow".into(),
            ))),
        }
    }
}

/// Memory ledger whose reads or writes can be made to fail on demand.
pub struct FlakyLedger {
    pub inner: MemoryLedgerStore,
    reads: Mutex<Fault>,
    writes: Mutex<Fault>,
    write_delay: Mutex<Duration>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            reads: Mutex::new(Fault::Healthy),
            writes: Mutex::new(Fault::Healthy),
            write_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Reads fail as if the database were unreachable
    pub fn fail_reads(&self, down: bool) {
        *self.reads.lock() = if down { Fault::Unreachable } else { Fault::Healthy };
    }

    /// Writes fail as if the database were unreachable
    pub fn fail_writes(&self, down: bool) {
        *self.writes.lock() = if down { Fault::Unreachable } else { Fault::Healthy };
    }

    /// Reads reach the database but the statement is rejected
    pub fn reject_reads(&self, rejecting: bool) {
        *self.reads.lock() = if rejecting { Fault::Rejecting } else { Fault::Healthy };
    }

    /// Writes reach the database but the statement is rejected
    pub fn reject_writes(&self, rejecting: bool) {
        *self.writes.lock() = if rejecting { Fault::Rejecting } else { Fault::Healthy };
    }

    /// Every write takes at least `delay` before reaching the store
    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    fn check_reads(&self) -> AppResult<()> {
        let fault = *self.reads.lock();
        fault.check()
    }

    async fn check_writes(&self) -> AppResult<()> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fault = *self.writes.lock();
        fault.check()
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn insert_charge(&self, owner: &str, order_number: &OrderNumber) -> AppResult<ChargeEntry> {
        self.check_writes().await?;
        self.inner.insert_charge(owner, order_number).await
    }

    async fn insert_withdrawal(
        &self,
        owner: &str,
        order_number: &OrderNumber,
        amount: Decimal,
    ) -> AppResult<WithdrawalEntry> {
        self.check_writes().await?;
        self.inner.insert_withdrawal(owner, order_number, amount).await
    }

    async fn find_owner_by_order(&self, order_number: &OrderNumber) -> AppResult<Option<String>> {
        self.check_reads()?;
        self.inner.find_owner_by_order(order_number).await
    }

    async fn list_pending(&self) -> AppResult<Vec<OrderNumber>> {
        self.check_reads()?;
        self.inner.list_pending().await
    }

    async fn apply_reconciliation(&self, update: &ReconciliationUpdate) -> AppResult<bool> {
        self.check_writes().await?;
        self.inner.apply_reconciliation(update).await
    }

    async fn aggregate_balance(&self, owner: &str) -> AppResult<Balance> {
        self.check_reads()?;
        self.inner.aggregate_balance(owner).await
    }

    async fn list_withdrawals(&self, owner: &str) -> AppResult<Vec<WithdrawalEntry>> {
        self.check_reads()?;
        self.inner.list_withdrawals(owner).await
    }

    async fn list_orders(&self, owner: &str) -> AppResult<Vec<ChargeEntry>> {
        self.check_reads()?;
        self.inner.list_orders(owner).await
    }
}
