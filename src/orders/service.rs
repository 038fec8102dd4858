use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::{models::*, LedgerStore};

/// Order intake - validates and registers orders for accrual.
///
/// Registration never talks to the accrual service; leaving the entry in
/// NEW is what queues it for the reconciler.
pub struct OrderIntake {
    ledger: Arc<dyn LedgerStore>,
}

impl OrderIntake {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Register `raw_number` for `owner`.
    ///
    /// A number already taken resolves to `AlreadyRegisteredBySelf` (callers
    /// treat it as success) or `AlreadyRegisteredByOther`.
    pub async fn register(&self, owner: &str, raw_number: &str) -> AppResult<ChargeEntry> {
        let order_number = OrderNumber::parse(raw_number).map_err(|e| {
            warn!("Rejected order number {:?} from {}", raw_number, owner);
            e
        })?;

        match self.ledger.insert_charge(owner, &order_number).await {
            Ok(entry) => {
                info!("📥 Order {} registered for {}", order_number, owner);
                Ok(entry)
            }
            Err(AppError::DuplicateOrder(_)) => {
                let existing = self.ledger.find_owner_by_order(&order_number).await?;
                match existing {
                    Some(existing) if existing == owner => {
                        Err(AppError::AlreadyRegisteredBySelf(order_number.to_string()))
                    }
                    Some(_) => {
                        warn!("Order {} belongs to another user", order_number);
                        Err(AppError::AlreadyRegisteredByOther(order_number.to_string()))
                    }
                    // Entries are never deleted, so a conflict always has an owner
                    None => Err(AppError::Internal(format!(
                        "order {} reported duplicate but has no owner",
                        order_number
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Charge history for `owner`, oldest first
    pub async fn list_orders(&self, owner: &str) -> AppResult<Vec<ChargeEntry>> {
        self.ledger.list_orders(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FlakyLedger;
    use crate::ledger::MemoryLedgerStore;

    fn intake() -> (OrderIntake, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        (OrderIntake::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_register_new_order() {
        let (intake, _) = intake();

        let entry = intake.register("u1", "12345678903").await.unwrap();
        assert_eq!(entry.status, OrderStatus::New);
        assert_eq!(entry.owner, "u1");
        assert_eq!(entry.accrual, None);
    }

    #[tokio::test]
    async fn test_register_twice_by_same_owner() {
        let (intake, store) = intake();
        intake.register("u1", "12345678903").await.unwrap();

        let err = intake.register("u1", "12345678903").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyRegisteredBySelf(_)));
        assert_eq!(store.list_orders("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_taken_by_other_owner() {
        let (intake, store) = intake();
        intake.register("u1", "12345678903").await.unwrap();

        let err = intake.register("u2", "12345678903").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyRegisteredByOther(_)));
        assert!(store.list_orders("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_invalid_number() {
        let (intake, store) = intake();

        let err = intake.register("u1", "1234").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrderNumber(_)));
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let ledger = Arc::new(FlakyLedger::new());
        ledger.fail_writes(true);
        let intake = OrderIntake::new(ledger);

        let err = intake.register("u1", "12345678903").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[tokio::test]
    async fn test_list_orders_is_per_owner() {
        let (intake, _) = intake();
        intake.register("u1", "12345678903").await.unwrap();
        intake.register("u2", "2377225624").await.unwrap();
        intake.register("u1", "79927398713").await.unwrap();

        let orders = intake.list_orders("u1").await.unwrap();
        let numbers: Vec<_> = orders.iter().map(|o| o.order_number.as_str()).collect();
        assert_eq!(numbers, vec!["12345678903", "79927398713"]);
    }
}
