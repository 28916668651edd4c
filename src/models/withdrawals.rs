use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;
use super::users::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Paid,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Paid => "paid",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }

    /// Only `pending -> paid` and `pending -> rejected` are allowed.
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawalStatus::Pending, WithdrawalStatus::Paid)
                | (WithdrawalStatus::Pending, WithdrawalStatus::Rejected)
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown withdrawal status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for WithdrawalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "paid" => Ok(WithdrawalStatus::Paid),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for WithdrawalStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: UserId,
    #[sqlx(try_from = "Decimal")]
    pub amount: Amount,
    #[sqlx(try_from = "String")]
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

/// A freshly opened withdrawal plus what operators need to process it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal: Withdrawal,
    pub requester: String,
    pub currency: String,
}
