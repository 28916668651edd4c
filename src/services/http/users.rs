use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, AppState};
use crate::models::users::{UserId, UserIdentity};
use crate::services::ledger::LedgerRequest;

/// RFC 3339 bounds of a `[start, end)` window.
#[derive(Deserialize)]
pub struct EarningsQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(flatten)]
    identity: UserIdentity,
    referral_arg: Option<String>,
}

pub async fn register_or_touch(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .dispatch(|response| LedgerRequest::RegisterOrTouch {
            identity: req.identity,
            referral_arg: req.referral_arg,
            response,
        })
        .await?;

    Ok(Json(user))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .dispatch(|response| LedgerRequest::GetProfile { id, response })
        .await?;

    Ok(Json(profile))
}

pub async fn list_referrals(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let referrals = state
        .dispatch(|response| LedgerRequest::ListReferredUsers {
            referrer_id: id,
            response,
        })
        .await?;

    let referrals: Vec<_> = referrals
        .into_iter()
        .map(|user| {
            json!({
                "id": user.id,
                "display_name": user.display_name(),
                "joined_at": user.joined_at,
            })
        })
        .collect();

    Ok(Json(referrals))
}

pub async fn get_income(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .dispatch(|response| LedgerRequest::IncomeSummary {
            user_id: id,
            response,
        })
        .await?;

    Ok(Json(summary))
}

/// Lifetime earnings, or the earnings inside `start..end` when either bound is given.
pub async fn get_earnings(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Query(window): Query<EarningsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let earned = match (window.start, window.end) {
        (None, None) => {
            state
                .dispatch(|response| LedgerRequest::TotalEarned {
                    user_id: id,
                    response,
                })
                .await?
        }
        (start, end) => {
            state
                .dispatch(|response| LedgerRequest::EarnedInInterval {
                    user_id: id,
                    start: start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    end: end.unwrap_or_else(Utc::now),
                    response,
                })
                .await?
        }
    };

    Ok(Json(json!({
        "user_id": id,
        "start": window.start,
        "end": window.end,
        "earned": earned,
    })))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let withdrawable = state
        .dispatch(|response| LedgerRequest::Withdrawable {
            user_id: id,
            response,
        })
        .await?;

    Ok(Json(json!({
        "user_id": id,
        "withdrawable": withdrawable,
    })))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let withdrawals = state
        .dispatch(|response| LedgerRequest::ListWithdrawals {
            user_id: id,
            response,
        })
        .await?;

    Ok(Json(withdrawals))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state
        .dispatch(|response| LedgerRequest::RequestWithdrawal {
            user_id: id,
            response,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}
