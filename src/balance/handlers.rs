use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::bootstrap::AppState;
use crate::error::AppResult;
use crate::ledger::models::{Balance, WithdrawalEntry};
use crate::middleware::{Owner, ValidatedJson};

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(length(min = 1, message = "order number is required"))]
    pub order: String,
    pub sum: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalView {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: String,
}

impl From<WithdrawalEntry> for WithdrawalView {
    fn from(entry: WithdrawalEntry) -> Self {
        Self {
            order: entry.order_number.to_string(),
            sum: entry.amount,
            processed_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> AppResult<Json<Balance>> {
    let balance = state.balance.balance(&owner).await?;
    Ok(Json(balance))
}

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    Owner(owner): Owner,
    ValidatedJson(request): ValidatedJson<WithdrawRequest>,
) -> AppResult<StatusCode> {
    state
        .withdrawals
        .withdraw(&owner, request.order.trim(), request.sum)
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> AppResult<Response> {
    let withdrawals = state.withdrawals.list_withdrawals(&owner).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let views: Vec<WithdrawalView> = withdrawals.into_iter().map(WithdrawalView::from).collect();
    Ok(Json(views).into_response())
}
