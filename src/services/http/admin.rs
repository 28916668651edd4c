use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::models::{amount::Amount, users::UserId};
use crate::services::{ledger::LedgerRequest, LedgerError};

#[derive(Deserialize)]
pub struct DepositRequest {
    /// Idempotency key; resend the same one when a response was lost.
    deposit_id: Option<Uuid>,
    user_id: UserId,
    /// Decimal string; parsed here so a malformed value is an `InvalidAmount`.
    amount: String,
    currency: Option<String>,
}

pub async fn credit_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DepositRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.require_admin(&headers)?;
    let amount = Amount::parse(&req.amount).map_err(LedgerError::from)?;
    let deposit_id = req.deposit_id.unwrap_or_else(Uuid::new_v4);

    log::info!(
        "Admin {} credits {} to user {} as deposit {}.",
        actor,
        amount,
        req.user_id,
        deposit_id
    );

    let outcome = state
        .dispatch(|response| LedgerRequest::CreditDeposit {
            deposit_id,
            user_id: req.user_id,
            amount,
            currency: req.currency,
            response,
        })
        .await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.require_admin(&headers)?;

    let stats = state
        .dispatch(|response| LedgerRequest::Stats { response })
        .await?;

    Ok(Json(stats))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.require_admin(&headers)?;
    log::info!("Admin {} marks withdrawal {} as paid.", actor, id);

    let withdrawal = state
        .dispatch(|response| LedgerRequest::MarkPaid { id, response })
        .await?;

    Ok(Json(withdrawal))
}

pub async fn mark_rejected(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.require_admin(&headers)?;
    log::info!("Admin {} rejects withdrawal {}.", actor, id);

    let withdrawal = state
        .dispatch(|response| LedgerRequest::MarkRejected { id, response })
        .await?;

    Ok(Json(withdrawal))
}
