use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    amount::{Amount, AmountError},
    deposits::{CreditOutcome, Deposit, NewDeposit},
    earnings::{NewEarning, ReferralEarning},
    users::{User, UserId, UserIdentity},
    withdrawals::{Withdrawal, WithdrawalStatus},
};

pub mod memory;
pub mod postgres;
pub mod timed;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use timed::TimedStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),
    #[error("User {0} cannot be its own referrer")]
    SelfReferral(UserId),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Withdrawal {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },
    #[error("Amount out of range: {0}")]
    OutOfRange(String),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Half-open `[start, end)` window; an open side is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| *at >= start) && self.end.map_or(true, |end| *at < end)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UserFilter {
    pub referred_by: Option<UserId>,
    pub referred_only: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DepositFilter {
    pub user_id: Option<UserId>,
    pub range: TimeRange,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EarningFilter {
    pub referrer_id: Option<UserId>,
    pub range: TimeRange,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WithdrawalFilter {
    pub user_id: Option<UserId>,
    pub status: Option<WithdrawalStatus>,
}

/// Durable, append-mostly storage for users, deposits, earnings and withdrawals.
///
/// Implementations hold no business rules beyond the record-level constraints
/// below; balance policy lives in the services.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Creates the user on first sight (a self-referencing `referred_by` is
    /// stored as none), otherwise refreshes only the display fields.
    async fn upsert_user_identity(
        &self,
        identity: &UserIdentity,
        referred_by: Option<UserId>,
    ) -> Result<User, StoreError>;

    /// Creates a bare user if missing. Never touches an existing record.
    async fn ensure_user(&self, id: UserId) -> Result<User, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Newest first.
    async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, StoreError>;

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, StoreError>;

    async fn record_deposit(&self, deposit: &NewDeposit) -> Result<Deposit, StoreError> {
        Ok(self.record_credit(deposit, None).await?.deposit)
    }

    async fn record_earning(&self, earning: &NewEarning) -> Result<ReferralEarning, StoreError>;

    /// Records a deposit and its derived earning as one all-or-nothing unit.
    ///
    /// Keyed by `deposit.id`: a repeat of an already recorded deposit writes
    /// nothing and returns the stored rows with `replayed` set, while a repeat
    /// whose fields differ is a `Conflict`.
    async fn record_credit(
        &self,
        deposit: &NewDeposit,
        earning: Option<&NewEarning>,
    ) -> Result<CreditOutcome, StoreError>;

    /// Opens a `pending` withdrawal.
    async fn record_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Withdrawal, StoreError>;

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError>;

    /// Newest first.
    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError>;

    async fn set_withdrawal_status(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, StoreError>;

    async fn sum_deposits(&self, filter: &DepositFilter) -> Result<Amount, StoreError>;

    async fn sum_earnings(&self, filter: &EarningFilter) -> Result<Amount, StoreError>;

    async fn sum_withdrawals(&self, filter: &WithdrawalFilter) -> Result<Amount, StoreError>;

    async fn count_withdrawals(&self, filter: &WithdrawalFilter) -> Result<i64, StoreError>;
}

pub(crate) fn normalize_referrer(id: UserId, referred_by: Option<UserId>) -> Option<UserId> {
    referred_by.filter(|referrer| *referrer != id)
}

pub(crate) fn validate_deposit(deposit: &NewDeposit) -> Result<(), StoreError> {
    if !deposit.amount.is_positive() {
        return Err(StoreError::InvalidAmount(deposit.amount));
    }
    Ok(())
}

pub(crate) fn check_replay(existing: &Deposit, deposit: &NewDeposit) -> Result<(), StoreError> {
    if !existing.matches(deposit) {
        return Err(StoreError::Conflict(format!(
            "deposit {} was already recorded with different details",
            deposit.id
        )));
    }
    Ok(())
}

pub(crate) fn validate_earning(earning: &NewEarning) -> Result<(), StoreError> {
    if !earning.amount.is_positive() {
        return Err(StoreError::InvalidAmount(earning.amount));
    }
    if earning.referrer_id == earning.source_user_id {
        return Err(StoreError::SelfReferral(earning.referrer_id));
    }
    Ok(())
}

pub(crate) fn validate_withdrawal(amount: Amount) -> Result<(), StoreError> {
    if !amount.is_positive() {
        return Err(StoreError::InvalidAmount(amount));
    }
    Ok(())
}

pub(crate) fn check_transition(
    withdrawal: &Withdrawal,
    next: WithdrawalStatus,
) -> Result<(), StoreError> {
    if !withdrawal.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            id: withdrawal.id,
            from: withdrawal.status,
            to: next,
        });
    }
    Ok(())
}
