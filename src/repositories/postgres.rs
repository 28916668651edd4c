use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    check_replay, check_transition, normalize_referrer, validate_deposit, validate_earning, validate_withdrawal,
    DepositFilter, EarningFilter, LedgerStore, StoreError, TimeRange, UserFilter,
    WithdrawalFilter,
};
use crate::models::{
    amount::Amount,
    deposits::{CreditOutcome, Deposit, NewDeposit},
    earnings::{NewEarning, ReferralEarning},
    users::{User, UserId, UserIdentity},
    withdrawals::{Withdrawal, WithdrawalStatus},
};

const USER_COLUMNS: &str = "id, username, first_name, referred_by, joined_at";
const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount, status, created_at";
const DEPOSIT_COLUMNS: &str = "id, user_id, amount, currency, created_at";
const EARNING_COLUMNS: &str = "id, referrer_id, source_user_id, amount, note, deposit_id, created_at";

const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
const CHECK_VIOLATION: &str = "23514";
const UNIQUE_VIOLATION: &str = "23505";

/// Maps a rejected statement to the error it means for the ledger.
///
/// Constraint and range failures are final; retrying them cannot succeed.
fn classify_database_error(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> StoreError {
    let constraint = constraint.unwrap_or_default();
    match code {
        Some(NUMERIC_VALUE_OUT_OF_RANGE) => StoreError::OutOfRange(message.to_string()),
        Some(CHECK_VIOLATION) if constraint.ends_with("_amount_check") => {
            StoreError::OutOfRange(message.to_string())
        }
        Some(CHECK_VIOLATION) | Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(format!("{} ({})", message, constraint))
        }
        _ => StoreError::Unavailable(message.to_string()),
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable("timed out acquiring a connection".to_string())
            }
            sqlx::Error::Database(e) => {
                classify_database_error(e.code().as_deref(), e.constraint(), e.message())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

fn push_range(query: &mut QueryBuilder<'_, Postgres>, column: &str, range: &TimeRange) {
    if let Some(start) = range.start {
        query.push(format!(" AND {} >= ", column)).push_bind(start);
    }
    if let Some(end) = range.end {
        query.push(format!(" AND {} < ", column)).push_bind(end);
    }
}

fn push_withdrawal_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &WithdrawalFilter) {
    if let Some(user_id) = filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
}

#[derive(Clone)]
pub struct PgLedgerStore {
    conn: PgPool,
}

impl PgLedgerStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    async fn insert_earning<'e, E>(
        executor: E,
        earning: &NewEarning,
        deposit_id: Option<Uuid>,
    ) -> Result<ReferralEarning, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let inserted = sqlx::query_as::<_, ReferralEarning>(&format!(
            r#"
                INSERT INTO referral_earnings
                (id, referrer_id, source_user_id, amount, note, deposit_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {}
            "#,
            EARNING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(earning.referrer_id)
        .bind(earning.source_user_id)
        .bind(earning.amount.value())
        .bind(earning.note.clone())
        .bind(deposit_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(details) if details.contains("no_self_referral") => {
                StoreError::SelfReferral(earning.referrer_id)
            }
            other => other,
        })?;

        Ok(inserted)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn upsert_user_identity(
        &self,
        identity: &UserIdentity,
        referred_by: Option<UserId>,
    ) -> Result<User, StoreError> {
        let referred_by = normalize_referrer(identity.id, referred_by);

        // referred_by and joined_at are only written on insert.
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
                INSERT INTO users (id, username, first_name, referred_by, joined_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE
                SET username = EXCLUDED.username, first_name = EXCLUDED.first_name
                RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(identity.id)
        .bind(&identity.username)
        .bind(&identity.first_name)
        .bind(referred_by)
        .bind(Utc::now())
        .fetch_one(&self.conn)
        .await?;

        Ok(user)
    }

    async fn ensure_user(&self, id: UserId) -> Result<User, StoreError> {
        sqlx::query(
            "INSERT INTO users (id, joined_at) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.conn)
        .await?;

        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE referred_by = $1 ORDER BY joined_at DESC, id DESC",
            USER_COLUMNS
        ))
        .bind(referrer_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE TRUE");
        if filter.referred_only {
            query.push(" AND referred_by IS NOT NULL");
        }
        if let Some(referrer_id) = filter.referred_by {
            query.push(" AND referred_by = ").push_bind(referrer_id);
        }

        let count: i64 = query.build_query_scalar().fetch_one(&self.conn).await?;
        Ok(count)
    }

    async fn record_earning(&self, earning: &NewEarning) -> Result<ReferralEarning, StoreError> {
        validate_earning(earning)?;
        Self::insert_earning(&self.conn, earning, None).await
    }

    async fn record_credit(
        &self,
        deposit: &NewDeposit,
        earning: Option<&NewEarning>,
    ) -> Result<CreditOutcome, StoreError> {
        validate_deposit(deposit)?;
        if let Some(earning) = earning {
            validate_earning(earning)?;
        }

        // Dropping the transaction on any error below rolls the deposit back.
        let mut tx = self.conn.begin().await?;

        // A concurrent insert of the same id blocks here until it commits.
        let inserted = sqlx::query_as::<_, Deposit>(&format!(
            r#"
                INSERT INTO deposits (id, user_id, amount, currency, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(deposit.id)
        .bind(deposit.user_id)
        .bind(deposit.amount.value())
        .bind(&deposit.currency)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let recorded = match inserted {
            Some(recorded) => recorded,
            None => {
                let existing = sqlx::query_as::<_, Deposit>(&format!(
                    "SELECT {} FROM deposits WHERE id = $1",
                    DEPOSIT_COLUMNS
                ))
                .bind(deposit.id)
                .fetch_one(&mut *tx)
                .await?;
                check_replay(&existing, deposit)?;

                let earning = sqlx::query_as::<_, ReferralEarning>(&format!(
                    "SELECT {} FROM referral_earnings WHERE deposit_id = $1",
                    EARNING_COLUMNS
                ))
                .bind(deposit.id)
                .fetch_optional(&mut *tx)
                .await?;

                return Ok(CreditOutcome {
                    deposit: existing,
                    earning,
                    replayed: true,
                });
            }
        };

        let earning = match earning {
            Some(earning) => {
                Some(Self::insert_earning(&mut *tx, earning, Some(recorded.id)).await?)
            }
            None => None,
        };

        tx.commit().await?;

        Ok(CreditOutcome {
            deposit: recorded,
            earning,
            replayed: false,
        })
    }

    async fn record_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Withdrawal, StoreError> {
        validate_withdrawal(amount)?;

        let withdrawal = sqlx::query_as::<_, Withdrawal>(&format!(
            r#"
                INSERT INTO withdrawals (id, user_id, amount, status, created_at)
                VALUES ($1, $2, $3, 'pending', $4)
                RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount.value())
        .bind(Utc::now())
        .fetch_one(&self.conn)
        .await?;

        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC",
            WITHDRAWAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(withdrawals)
    }

    async fn set_withdrawal_status(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, StoreError> {
        let mut tx = self.conn.begin().await?;

        let current = sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;

        check_transition(&current, status)?;

        let updated = sqlx::query_as::<_, Withdrawal>(&format!(
            r#"
                UPDATE withdrawals SET status = $1, updated_at = CURRENT_TIMESTAMP
                WHERE id = $2
                RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(status.as_str())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn sum_deposits(&self, filter: &DepositFilter) -> Result<Amount, StoreError> {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT COALESCE(SUM(amount), 0) FROM deposits WHERE TRUE");
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        push_range(&mut query, "created_at", &filter.range);

        let total: Decimal = query.build_query_scalar().fetch_one(&self.conn).await?;
        Ok(Amount::new(total)?)
    }

    async fn sum_earnings(&self, filter: &EarningFilter) -> Result<Amount, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT COALESCE(SUM(amount), 0) FROM referral_earnings WHERE TRUE",
        );
        if let Some(referrer_id) = filter.referrer_id {
            query.push(" AND referrer_id = ").push_bind(referrer_id);
        }
        push_range(&mut query, "created_at", &filter.range);

        let total: Decimal = query.build_query_scalar().fetch_one(&self.conn).await?;
        Ok(Amount::new(total)?)
    }

    async fn sum_withdrawals(&self, filter: &WithdrawalFilter) -> Result<Amount, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT COALESCE(SUM(amount), 0) FROM withdrawals WHERE TRUE",
        );
        push_withdrawal_filter(&mut query, filter);

        let total: Decimal = query.build_query_scalar().fetch_one(&self.conn).await?;
        Ok(Amount::new(total)?)
    }

    async fn count_withdrawals(&self, filter: &WithdrawalFilter) -> Result<i64, StoreError> {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM withdrawals WHERE TRUE");
        push_withdrawal_filter(&mut query, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&self.conn).await?;
        Ok(count)
    }
}
