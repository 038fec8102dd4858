use async_trait::async_trait;
use rust_decimal::Decimal;

use super::models::*;
use crate::error::AppResult;

/// Query contract every ledger backend must honour.
///
/// The store owns the uniqueness of `order_number` across both entry kinds
/// and the per-owner serialization of withdrawals. Callers never keep a
/// balance of their own.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a NEW charge entry. A taken order number fails with `DuplicateOrder`.
    async fn insert_charge(&self, owner: &str, order_number: &OrderNumber) -> AppResult<ChargeEntry>;

    /// Append a withdrawal, atomically with a check that the owner's
    /// balance covers `amount`. Fails with `InsufficientFunds` or `DuplicateOrder`.
    async fn insert_withdrawal(
        &self,
        owner: &str,
        order_number: &OrderNumber,
        amount: Decimal,
    ) -> AppResult<WithdrawalEntry>;

    async fn find_owner_by_order(&self, order_number: &OrderNumber) -> AppResult<Option<String>>;

    /// Charge entries in NEW or PROCESSING, oldest first
    async fn list_pending(&self) -> AppResult<Vec<OrderNumber>>;

    /// Conditional status transition on a charge entry.
    /// Returns false when nothing changed (terminal, regression, unknown order).
    async fn apply_reconciliation(&self, update: &ReconciliationUpdate) -> AppResult<bool>;

    async fn aggregate_balance(&self, owner: &str) -> AppResult<Balance>;

    async fn list_withdrawals(&self, owner: &str) -> AppResult<Vec<WithdrawalEntry>>;

    async fn list_orders(&self, owner: &str) -> AppResult<Vec<ChargeEntry>>;
}
