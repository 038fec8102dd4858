use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::*;
use super::store::LedgerStore;
use crate::error::{AppError, AppResult};

/// In-process ledger, used when no database is configured and in tests.
///
/// Every write takes the single write lock, so a withdrawal's balance
/// check and its insert can never interleave with another writer.
pub struct MemoryLedgerStore {
    ledger: RwLock<MemoryLedger>,
}

#[derive(Default)]
struct MemoryLedger {
    entries: Vec<LedgerEntry>,
    index: HashMap<OrderNumber, usize>,
}

impl MemoryLedger {
    fn balance(&self, owner: &str) -> Balance {
        let mut accrued = Decimal::ZERO;
        let mut withdrawn = Decimal::ZERO;

        for entry in self.entries.iter().filter(|e| e.owner() == owner) {
            match entry {
                LedgerEntry::Charge(c) => accrued += c.credited(),
                LedgerEntry::Withdrawal(w) => withdrawn += w.amount,
            }
        }

        Balance::from_totals(accrued, withdrawn)
    }

    fn append(&mut self, entry: LedgerEntry) -> AppResult<()> {
        if self.index.contains_key(entry.order_number()) {
            return Err(AppError::DuplicateOrder(entry.order_number().to_string()));
        }

        self.index.insert(entry.order_number().clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            ledger: RwLock::new(MemoryLedger::default()),
        }
    }

    #[cfg(test)]
    pub async fn get(&self, order_number: &OrderNumber) -> Option<LedgerEntry> {
        let ledger = self.ledger.read().await;
        ledger
            .index
            .get(order_number)
            .map(|idx| ledger.entries[*idx].clone())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_charge(&self, owner: &str, order_number: &OrderNumber) -> AppResult<ChargeEntry> {
        let entry = ChargeEntry::new(owner, order_number.clone());
        let mut ledger = self.ledger.write().await;
        ledger.append(LedgerEntry::Charge(entry.clone()))?;
        Ok(entry)
    }

    async fn insert_withdrawal(
        &self,
        owner: &str,
        order_number: &OrderNumber,
        amount: Decimal,
    ) -> AppResult<WithdrawalEntry> {
        let mut ledger = self.ledger.write().await;

        if ledger.index.contains_key(order_number) {
            return Err(AppError::DuplicateOrder(order_number.to_string()));
        }

        let balance = ledger.balance(owner);
        if !balance.covers(amount) {
            return Err(AppError::InsufficientFunds {
                required: amount.to_string(),
                available: balance.current.to_string(),
            });
        }

        let entry = WithdrawalEntry::new(owner, order_number.clone(), amount);
        ledger.append(LedgerEntry::Withdrawal(entry.clone()))?;
        Ok(entry)
    }

    async fn find_owner_by_order(&self, order_number: &OrderNumber) -> AppResult<Option<String>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .index
            .get(order_number)
            .map(|idx| ledger.entries[*idx].owner().to_string()))
    }

    async fn list_pending(&self) -> AppResult<Vec<OrderNumber>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Charge(c) if c.status.is_pending() => Some(c.order_number.clone()),
                _ => None,
            })
            .collect())
    }

    async fn apply_reconciliation(&self, update: &ReconciliationUpdate) -> AppResult<bool> {
        let mut ledger = self.ledger.write().await;
        let Some(idx) = ledger.index.get(&update.order_number).copied() else {
            return Ok(false);
        };

        match &mut ledger.entries[idx] {
            LedgerEntry::Charge(charge) => Ok(update.apply_to(charge)),
            LedgerEntry::Withdrawal(_) => Ok(false),
        }
    }

    async fn aggregate_balance(&self, owner: &str) -> AppResult<Balance> {
        Ok(self.ledger.read().await.balance(owner))
    }

    async fn list_withdrawals(&self, owner: &str) -> AppResult<Vec<WithdrawalEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Withdrawal(w) if w.owner == owner => Some(w.clone()),
                _ => None,
            })
            .collect())
    }

    async fn list_orders(&self, owner: &str) -> AppResult<Vec<ChargeEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Charge(c) if c.owner == owner => Some(c.clone()),
                _ => None,
            })
            .collect())
    }
}
