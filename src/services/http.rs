use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{ledger::LedgerRequest, LedgerError};
use crate::models::users::UserId;

mod admin;
mod users;

pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct AppState {
    ledger_channel: mpsc::Sender<LedgerRequest>,
    admins: Arc<Vec<UserId>>,
}

impl AppState {
    pub fn new(ledger_channel: mpsc::Sender<LedgerRequest>, admins: Vec<UserId>) -> Self {
        AppState {
            ledger_channel,
            admins: Arc::new(admins),
        }
    }

    /// Sends one request to the ledger service and waits for its answer.
    async fn dispatch<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, LedgerError>>) -> LedgerRequest,
    ) -> Result<T, ApiError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.ledger_channel
            .send(build(response_tx))
            .await
            .map_err(|e| LedgerError::Communication("HTTP => Ledger".to_string(), e.to_string()))?;

        let result = response_rx
            .await
            .map_err(|e| LedgerError::Communication("Ledger => HTTP".to_string(), e.to_string()))?;

        Ok(result?)
    }

    /// The admin named by the actor header, or `Unauthorized`.
    fn require_admin(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let actor = headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .ok_or_else(|| {
                LedgerError::Unauthorized(format!("missing or malformed {} header", ACTOR_HEADER))
            })?;

        if !self.admins.contains(&actor) {
            log::warn!("User {} attempted an admin operation.", actor);
            return Err(LedgerError::Unauthorized(format!("user {} is not an admin", actor)).into());
        }

        Ok(actor)
    }
}

pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            LedgerError::InvalidAmount(_) | LedgerError::SelfReferral(_) => StatusCode::BAD_REQUEST,
            LedgerError::Unauthorized(_) => StatusCode::FORBIDDEN,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::NothingToWithdraw
            | LedgerError::InvalidTransition(_)
            | LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::StoreUnavailable(_) | LedgerError::Communication(_, _) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.0.kind(),
            "details": self.0.to_string(),
        });
        if self.0.is_retryable() {
            body["retry"] = json!(true);
        }

        (status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/users", post(users::register_or_touch))
        .route("/users/{id}", get(users::get_profile))
        .route("/users/{id}/referrals", get(users::list_referrals))
        .route("/users/{id}/income", get(users::get_income))
        .route("/users/{id}/earnings", get(users::get_earnings))
        .route("/users/{id}/balance", get(users::get_balance))
        .route(
            "/users/{id}/withdrawals",
            get(users::list_withdrawals).post(users::request_withdrawal),
        )
        .route("/admin/deposits", post(admin::credit_deposit))
        .route("/admin/stats", get(admin::get_stats))
        .route("/admin/withdrawals/{id}/paid", post(admin::mark_paid))
        .route("/admin/withdrawals/{id}/rejected", post(admin::mark_rejected))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the API on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    ledger_channel: mpsc::Sender<LedgerRequest>,
    admins: Vec<UserId>,
) -> Result<(), anyhow::Error> {
    let app = build_router(AppState::new(ledger_channel, admins));

    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

pub async fn start_http_server(
    ledger_channel: mpsc::Sender<LedgerRequest>,
    admins: Vec<UserId>,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(listen).await?;
    serve(listener, ledger_channel, admins).await
}
