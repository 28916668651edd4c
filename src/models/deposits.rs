use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;
use super::earnings::ReferralEarning;
use super::users::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: UserId,
    #[sqlx(try_from = "Decimal")]
    pub amount: Amount,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// `id` is chosen by the caller and makes the write idempotent: recording the
/// same id twice yields the first record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDeposit {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: String,
}

/// A recorded deposit together with the bonus it produced, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreditOutcome {
    pub deposit: Deposit,
    pub earning: Option<ReferralEarning>,
    /// Set when the deposit id was already recorded and nothing new was written.
    pub replayed: bool,
}

impl Deposit {
    /// Whether `other` describes this same deposit.
    pub fn matches(&self, other: &NewDeposit) -> bool {
        self.id == other.id
            && self.user_id == other.user_id
            && self.amount == other.amount
            && self.currency == other.currency
    }
}
