use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;
use super::users::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct ReferralEarning {
    pub id: Uuid,
    pub referrer_id: UserId,
    pub source_user_id: UserId,
    #[sqlx(try_from = "Decimal")]
    pub amount: Amount,
    pub note: String,
    /// The deposit that produced this bonus; none for earnings recorded on their own.
    pub deposit_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEarning {
    pub referrer_id: UserId,
    pub source_user_id: UserId,
    pub amount: Amount,
    pub note: String,
}
