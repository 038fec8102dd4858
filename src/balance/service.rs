use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::{models::*, LedgerStore};

/// Balance engine - recomputes the balance from the ledger on every call
pub struct BalanceEngine {
    ledger: Arc<dyn LedgerStore>,
}

impl BalanceEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn balance(&self, owner: &str) -> AppResult<Balance> {
        self.ledger.aggregate_balance(owner).await
    }
}

/// Withdrawal service - debits points against the live balance
pub struct WithdrawalService {
    ledger: Arc<dyn LedgerStore>,
}

impl WithdrawalService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Withdraw `amount` points against `raw_number`.
    ///
    /// The number is free-form (it need not match a charge) but must pass
    /// the same checksum. The balance check happens inside the store,
    /// serialized with every other withdrawal by the same owner.
    pub async fn withdraw(
        &self,
        owner: &str,
        raw_number: &str,
        amount: Decimal,
    ) -> AppResult<WithdrawalEntry> {
        let order_number = OrderNumber::parse(raw_number)?;

        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "withdrawal amount must be positive, got {}",
                amount
            )));
        }
        if !is_storable_amount(amount) {
            return Err(AppError::InvalidInput(format!(
                "withdrawal amount {} has more than {} decimal places or is out of range",
                amount, AMOUNT_SCALE
            )));
        }

        match self.ledger.insert_withdrawal(owner, &order_number, amount).await {
            Ok(entry) => {
                info!("💸 {} withdrew {} against {}", owner, amount, order_number);
                Ok(entry)
            }
            Err(AppError::InsufficientFunds { required, available }) => {
                warn!(
                    "Withdrawal by {} rejected: required {}, available {}",
                    owner, required, available
                );
                Err(AppError::InsufficientFunds { required, available })
            }
            Err(AppError::DuplicateOrder(_)) => {
                match self.ledger.find_owner_by_order(&order_number).await? {
                    Some(existing) if existing == owner => {
                        Err(AppError::AlreadyRegisteredBySelf(order_number.to_string()))
                    }
                    _ => Err(AppError::AlreadyRegisteredByOther(order_number.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Withdrawal history for `owner`, oldest first
    pub async fn list_withdrawals(&self, owner: &str) -> AppResult<Vec<WithdrawalEntry>> {
        self.ledger.list_withdrawals(owner).await
    }
}
