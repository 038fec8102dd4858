use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::bootstrap::AppState;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{ChargeEntry, OrderStatus};
use crate::middleware::Owner;

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: String,
}

impl From<ChargeEntry> for OrderView {
    fn from(entry: ChargeEntry) -> Self {
        let accrual = match entry.status {
            OrderStatus::Processed => entry.accrual,
            _ => None,
        };

        Self {
            number: entry.order_number.to_string(),
            status: entry.status,
            accrual,
            uploaded_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// POST /api/user/orders - body is the bare order number
///
/// 202 when newly queued for accrual, 200 when the caller already owns it.
pub async fn upload_order(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: String,
) -> AppResult<StatusCode> {
    let number = body.trim();
    if number.is_empty() {
        return Err(AppError::InvalidInput("order number is required".to_string()));
    }

    match state.intake.register(&owner, number).await {
        Ok(_) => Ok(StatusCode::ACCEPTED),
        Err(AppError::AlreadyRegisteredBySelf(_)) => Ok(StatusCode::OK),
        Err(e) => Err(e),
    }
}

/// GET /api/user/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> AppResult<Response> {
    let orders = state.intake.list_orders(&owner).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let views: Vec<OrderView> = orders.into_iter().map(OrderView::from).collect();
    Ok(Json(views).into_response())
}
