use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

use crate::error::AppResult;
use crate::orders::validator::validate_order_number;

/// Order number that passed checksum validation.
///
/// Unique across the whole ledger, for charges and withdrawals alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(raw: &str) -> AppResult<Self> {
        validate_order_number(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Charge entry status
///
/// NEW -> PROCESSING -> PROCESSED, or straight to INVALID. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// Terminal entries leave the pending set for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a forward step.
    /// Same-status "transitions" are not steps and report false.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::New, OrderStatus::Processing) => true,
            (OrderStatus::New, OrderStatus::Processed) => true,
            (OrderStatus::New, OrderStatus::Invalid) => true,
            (OrderStatus::Processing, OrderStatus::Processed) => true,
            (OrderStatus::Processing, OrderStatus::Invalid) => true,
            _ => false,
        }
    }
}

/// Order registered for accrual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeEntry {
    pub order_number: OrderNumber,
    pub owner: String,
    pub status: OrderStatus,
    /// Set once, when the entry reaches PROCESSED
    #[serde(with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChargeEntry {
    pub fn new(owner: &str, order_number: OrderNumber) -> Self {
        let now = Utc::now();
        Self {
            order_number,
            owner: owner.to_string(),
            status: OrderStatus::New,
            accrual: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Points this entry contributes to the owner's balance
    pub fn credited(&self) -> Decimal {
        match self.status {
            OrderStatus::Processed => self.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}

/// Debit against the balance. Settled on creation and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalEntry {
    pub order_number: OrderNumber,
    pub owner: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl WithdrawalEntry {
    pub fn new(owner: &str, order_number: OrderNumber, amount: Decimal) -> Self {
        Self {
            order_number,
            owner: owner.to_string(),
            amount,
            created_at: Utc::now(),
        }
    }
}

/// One row of the append-only ledger
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    Charge(ChargeEntry),
    Withdrawal(WithdrawalEntry),
}

impl LedgerEntry {
    pub fn order_number(&self) -> &OrderNumber {
        match self {
            LedgerEntry::Charge(c) => &c.order_number,
            LedgerEntry::Withdrawal(w) => &w.order_number,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            LedgerEntry::Charge(c) => &c.owner,
            LedgerEntry::Withdrawal(w) => &w.owner,
        }
    }
}

/// Decimal places kept for every stored amount (`NUMERIC(18, 2)`)
pub const AMOUNT_SCALE: u32 = 2;

/// Largest amount a ledger column can hold
pub const MAX_AMOUNT: Decimal = dec!(9999999999999999.99);

/// Whether `amount` is stored exactly: at most two decimal places and
/// within the column range. Anything else would be rounded or rejected
/// by Postgres while the memory store kept it verbatim.
pub fn is_storable_amount(amount: Decimal) -> bool {
    amount.normalize().scale() <= AMOUNT_SCALE && amount.abs() <= MAX_AMOUNT
}

/// Balance derived from the ledger. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn from_totals(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    pub fn covers(&self, amount: Decimal) -> bool {
        self.current >= amount
    }
}

/// Status/accrual change produced by one accrual lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationUpdate {
    pub order_number: OrderNumber,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
}

impl ReconciliationUpdate {
    pub fn processing(order_number: OrderNumber) -> Self {
        Self {
            order_number,
            status: OrderStatus::Processing,
            accrual: None,
        }
    }

    pub fn processed(order_number: OrderNumber, accrual: Decimal) -> Self {
        Self {
            order_number,
            status: OrderStatus::Processed,
            accrual: Some(accrual),
        }
    }

    pub fn invalid(order_number: OrderNumber) -> Self {
        Self {
            order_number,
            status: OrderStatus::Invalid,
            accrual: None,
        }
    }

    /// Apply to a charge entry in place. Returns false when the update is a no-op.
    pub fn apply_to(&self, entry: &mut ChargeEntry) -> bool {
        if !entry.status.can_transition_to(self.status) {
            return false;
        }

        entry.status = self.status;
        if self.status == OrderStatus::Processed {
            entry.accrual = self.accrual;
        }
        entry.updated_at = Utc::now();
        true
    }
}
