use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{amount::AmountError, users::UserId};
use crate::repositories::{LedgerStore, StoreError};
use crate::settings::Settings;

pub mod balance;
pub mod http;
pub mod ledger;
pub mod locks;
pub mod notifications;
pub mod referrals;
pub mod users;
pub mod withdrawals;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("User {0} cannot be credited for their own deposit")]
    SelfReferral(UserId),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Nothing to withdraw")]
    NothingToWithdraw,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl LedgerError {
    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_) | LedgerError::Communication(_, _)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::SelfReferral(_) => "self_referral",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::NothingToWithdraw => "nothing_to_withdraw",
            LedgerError::InvalidTransition(_) => "invalid_transition",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
            LedgerError::Unauthorized(_) => "unauthorized",
            LedgerError::Communication(_, _) => "communication",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidAmount(amount) => LedgerError::InvalidAmount(amount.to_string()),
            StoreError::SelfReferral(id) => LedgerError::SelfReferral(id),
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            e @ StoreError::InvalidTransition { .. } => LedgerError::InvalidTransition(e.to_string()),
            StoreError::OutOfRange(details) => LedgerError::InvalidAmount(details),
            StoreError::Amount(e) => LedgerError::InvalidAmount(e.to_string()),
            StoreError::Conflict(details) => LedgerError::Conflict(details),
            e @ (StoreError::Unavailable(_) | StoreError::Timeout(_)) => {
                log::error!("Ledger store failure: {}", e);
                LedgerError::StoreUnavailable(e.to_string())
            }
        }
    }
}

impl From<AmountError> for LedgerError {
    fn from(error: AmountError) -> Self {
        LedgerError::InvalidAmount(error.to_string())
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders for the running services.
#[derive(Clone)]
pub struct ServiceChannels {
    pub ledger: mpsc::Sender<ledger::LedgerRequest>,
    pub notifications: mpsc::Sender<notifications::Notification>,
}

/// Starts the ledger and notification services and returns their channels.
pub fn spawn_services(
    store: Arc<dyn LedgerStore>,
    settings: &Settings,
) -> Result<ServiceChannels, anyhow::Error> {
    let (ledger_tx, mut ledger_rx) = mpsc::channel(512);
    let (notification_tx, mut notification_rx) = mpsc::channel(512);

    let mut ledger_service = ledger::LedgerService::new();
    let mut notification_service = notifications::NotificationService::new();

    log::info!("Starting notification service.");
    tokio::spawn(async move {
        notification_service
            .run(
                notifications::NotificationRequestHandler::new(),
                &mut notification_rx,
            )
            .await;
    });

    log::info!("Starting ledger service.");
    let ledger = ledger::Ledger::new(store, ledger::LedgerConfig::from_settings(settings)?);
    let handler =
        ledger::LedgerRequestHandler::new(ledger, notification_tx.clone(), settings.admins.clone());
    tokio::spawn(async move {
        ledger_service.run(handler, &mut ledger_rx).await;
    });

    Ok(ServiceChannels {
        ledger: ledger_tx,
        notifications: notification_tx,
    })
}

pub async fn start_services(
    store: Arc<dyn LedgerStore>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let channels = spawn_services(store, &settings)?;

    log::info!("Starting HTTP server.");
    http::start_http_server(channels.ledger, settings.admins.clone(), &settings.http.listen)
        .await?;

    Ok(())
}
