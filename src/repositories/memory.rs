use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    check_replay, check_transition, normalize_referrer, validate_deposit, validate_earning, validate_withdrawal,
    DepositFilter, EarningFilter, LedgerStore, StoreError, UserFilter, WithdrawalFilter,
};
use crate::models::{
    amount::Amount,
    deposits::{CreditOutcome, Deposit, NewDeposit},
    earnings::{NewEarning, ReferralEarning},
    users::{User, UserId, UserIdentity},
    withdrawals::{Withdrawal, WithdrawalStatus},
};

struct StoredUser {
    seq: u64,
    user: User,
}

#[derive(Default)]
struct Tables {
    next_seq: u64,
    users: HashMap<UserId, StoredUser>,
    deposits: Vec<Deposit>,
    earnings: Vec<ReferralEarning>,
    withdrawals: Vec<Withdrawal>,
}

impl Tables {
    fn insert_user(&mut self, user: User) -> User {
        self.next_seq += 1;
        self.users.insert(
            user.id,
            StoredUser {
                seq: self.next_seq,
                user: user.clone(),
            },
        );
        user
    }

    fn bare_user(id: UserId) -> User {
        User {
            id,
            username: None,
            first_name: None,
            referred_by: None,
            joined_at: Utc::now(),
        }
    }

    fn earning_row(earning: &NewEarning, deposit_id: Option<Uuid>) -> ReferralEarning {
        ReferralEarning {
            id: Uuid::new_v4(),
            referrer_id: earning.referrer_id,
            source_user_id: earning.source_user_id,
            amount: earning.amount,
            note: earning.note.clone(),
            deposit_id,
            created_at: Utc::now(),
        }
    }

    fn replay(&self, deposit: &NewDeposit) -> Result<Option<CreditOutcome>, StoreError> {
        let existing = match self.deposits.iter().find(|d| d.id == deposit.id) {
            Some(existing) => existing,
            None => return Ok(None),
        };
        check_replay(existing, deposit)?;

        let earning = self
            .earnings
            .iter()
            .find(|e| e.deposit_id == Some(deposit.id))
            .cloned();
        Ok(Some(CreditOutcome {
            deposit: existing.clone(),
            earning,
            replayed: true,
        }))
    }

    fn matching_withdrawals<'a>(
        &'a self,
        filter: &'a WithdrawalFilter,
    ) -> impl Iterator<Item = &'a Withdrawal> + 'a {
        self.withdrawals.iter().filter(move |w| {
            filter.user_id.map_or(true, |id| w.user_id == id)
                && filter.status.map_or(true, |status| w.status == status)
        })
    }
}

/// In-process store with the same record semantics as [`super::PgLedgerStore`].
///
/// Used by tests and `--memory` development runs; nothing survives a restart.
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every operation, to exercise timeouts against a slow backend.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            tables: RwLock::default(),
            latency: Some(latency),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn upsert_user_identity(
        &self,
        identity: &UserIdentity,
        referred_by: Option<UserId>,
    ) -> Result<User, StoreError> {
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        if let Some(stored) = tables.users.get_mut(&identity.id) {
            stored.user.username = identity.username.clone();
            stored.user.first_name = identity.first_name.clone();
            return Ok(stored.user.clone());
        }

        let user = User {
            id: identity.id,
            username: identity.username.clone(),
            first_name: identity.first_name.clone(),
            referred_by: normalize_referrer(identity.id, referred_by),
            joined_at: Utc::now(),
        };
        Ok(tables.insert_user(user))
    }

    async fn ensure_user(&self, id: UserId) -> Result<User, StoreError> {
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        if let Some(stored) = tables.users.get(&id) {
            return Ok(stored.user.clone());
        }
        Ok(tables.insert_user(Tables::bare_user(id)))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).map(|stored| stored.user.clone()))
    }

    async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;

        let mut referred: Vec<&StoredUser> = tables
            .users
            .values()
            .filter(|stored| stored.user.referred_by == Some(referrer_id))
            .collect();
        referred.sort_by(|a, b| {
            b.user
                .joined_at
                .cmp(&a.user.joined_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(referred.into_iter().map(|stored| stored.user.clone()).collect())
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;

        let count = tables
            .users
            .values()
            .filter(|stored| {
                let referred_by = stored.user.referred_by;
                (!filter.referred_only || referred_by.is_some())
                    && filter.referred_by.map_or(true, |id| referred_by == Some(id))
            })
            .count();
        Ok(count as i64)
    }

    async fn record_earning(&self, earning: &NewEarning) -> Result<ReferralEarning, StoreError> {
        validate_earning(earning)?;
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        let row = Tables::earning_row(earning, None);
        tables.earnings.push(row.clone());
        Ok(row)
    }

    async fn record_credit(
        &self,
        deposit: &NewDeposit,
        earning: Option<&NewEarning>,
    ) -> Result<CreditOutcome, StoreError> {
        // Validate both rows before touching the tables so a rejected
        // earning never leaves its deposit behind.
        validate_deposit(deposit)?;
        if let Some(earning) = earning {
            validate_earning(earning)?;
        }
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        if let Some(outcome) = tables.replay(deposit)? {
            return Ok(outcome);
        }

        let deposit = Deposit {
            id: deposit.id,
            user_id: deposit.user_id,
            amount: deposit.amount,
            currency: deposit.currency.clone(),
            created_at: Utc::now(),
        };
        let earning = earning.map(|earning| Tables::earning_row(earning, Some(deposit.id)));

        tables.deposits.push(deposit.clone());
        if let Some(earning) = &earning {
            tables.earnings.push(earning.clone());
        }

        Ok(CreditOutcome {
            deposit,
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
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            amount,
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
        };
        tables.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;
        Ok(tables.withdrawals.iter().find(|w| w.id == id).cloned())
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;

        // Rows are appended in creation order.
        Ok(tables
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_withdrawal_status(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, StoreError> {
        self.simulate_latency().await;
        let mut tables = self.tables.write().await;

        let withdrawal = tables
            .withdrawals
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;

        check_transition(withdrawal, status)?;
        withdrawal.status = status;
        Ok(withdrawal.clone())
    }

    async fn sum_deposits(&self, filter: &DepositFilter) -> Result<Amount, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;

        let total = Amount::checked_sum(
            tables
                .deposits
                .iter()
                .filter(|d| {
                    filter.user_id.map_or(true, |id| d.user_id == id)
                        && filter.range.contains(&d.created_at)
                })
                .map(|d| d.amount),
        )?;
        Ok(total)
    }

    async fn sum_earnings(&self, filter: &EarningFilter) -> Result<Amount, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;

        let total = Amount::checked_sum(
            tables
                .earnings
                .iter()
                .filter(|e| {
                    filter.referrer_id.map_or(true, |id| e.referrer_id == id)
                        && filter.range.contains(&e.created_at)
                })
                .map(|e| e.amount),
        )?;
        Ok(total)
    }

    async fn sum_withdrawals(&self, filter: &WithdrawalFilter) -> Result<Amount, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;
        let total = Amount::checked_sum(tables.matching_withdrawals(filter).map(|w| w.amount))?;
        Ok(total)
    }

    async fn count_withdrawals(&self, filter: &WithdrawalFilter) -> Result<i64, StoreError> {
        self.simulate_latency().await;
        let tables = self.tables.read().await;
        Ok(tables.matching_withdrawals(filter).count() as i64)
    }
}
