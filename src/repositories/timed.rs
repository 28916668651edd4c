use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DepositFilter, EarningFilter, LedgerStore, StoreError, UserFilter, WithdrawalFilter,
};
use crate::models::{
    amount::Amount,
    deposits::{CreditOutcome, Deposit, NewDeposit},
    earnings::{NewEarning, ReferralEarning},
    users::{User, UserId, UserIdentity},
    withdrawals::{Withdrawal, WithdrawalStatus},
};

/// Bounds every call on the wrapped store so a stuck backend surfaces as
/// [`StoreError::Timeout`] instead of hanging the calling task.
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: LedgerStore> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                log::error!("Store operation {} timed out after {:?}.", operation, self.timeout);
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for TimedStore<S> {
    async fn upsert_user_identity(
        &self,
        identity: &UserIdentity,
        referred_by: Option<UserId>,
    ) -> Result<User, StoreError> {
        self.bounded(
            "upsert_user_identity",
            self.inner.upsert_user_identity(identity, referred_by),
        )
        .await
    }

    async fn ensure_user(&self, id: UserId) -> Result<User, StoreError> {
        self.bounded("ensure_user", self.inner.ensure_user(id)).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.bounded("get_user", self.inner.get_user(id)).await
    }

    async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, StoreError> {
        self.bounded(
            "list_referred_users",
            self.inner.list_referred_users(referrer_id),
        )
        .await
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, StoreError> {
        self.bounded("count_users", self.inner.count_users(filter))
            .await
    }

    async fn record_deposit(&self, deposit: &NewDeposit) -> Result<Deposit, StoreError> {
        self.bounded("record_deposit", self.inner.record_deposit(deposit))
            .await
    }

    async fn record_earning(&self, earning: &NewEarning) -> Result<ReferralEarning, StoreError> {
        self.bounded("record_earning", self.inner.record_earning(earning))
            .await
    }

    async fn record_credit(
        &self,
        deposit: &NewDeposit,
        earning: Option<&NewEarning>,
    ) -> Result<CreditOutcome, StoreError> {
        self.bounded("record_credit", self.inner.record_credit(deposit, earning))
            .await
    }

    async fn record_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Withdrawal, StoreError> {
        self.bounded(
            "record_withdrawal",
            self.inner.record_withdrawal(user_id, amount),
        )
        .await
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError> {
        self.bounded("get_withdrawal", self.inner.get_withdrawal(id))
            .await
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        self.bounded("list_withdrawals", self.inner.list_withdrawals(user_id))
            .await
    }

    async fn set_withdrawal_status(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, StoreError> {
        self.bounded(
            "set_withdrawal_status",
            self.inner.set_withdrawal_status(id, status),
        )
        .await
    }

    async fn sum_deposits(&self, filter: &DepositFilter) -> Result<Amount, StoreError> {
        self.bounded("sum_deposits", self.inner.sum_deposits(filter))
            .await
    }

    async fn sum_earnings(&self, filter: &EarningFilter) -> Result<Amount, StoreError> {
        self.bounded("sum_earnings", self.inner.sum_earnings(filter))
            .await
    }

    async fn sum_withdrawals(&self, filter: &WithdrawalFilter) -> Result<Amount, StoreError> {
        self.bounded("sum_withdrawals", self.inner.sum_withdrawals(filter))
            .await
    }

    async fn count_withdrawals(&self, filter: &WithdrawalFilter) -> Result<i64, StoreError> {
        self.bounded("count_withdrawals", self.inner.count_withdrawals(filter))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryLedgerStore;

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = TimedStore::new(
            MemoryLedgerStore::with_latency(Duration::from_millis(200)),
            Duration::from_millis(20),
        );

        let result = store.get_user(1).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_store_passes_through() {
        let store = TimedStore::new(MemoryLedgerStore::new(), Duration::from_secs(1));

        let user = store.ensure_user(7).await.unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(store.get_user(7).await.unwrap(), Some(user));
    }
}
