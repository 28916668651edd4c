use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use super::LedgerError;
use crate::models::{amount::Amount, stats::IncomeSummary, users::UserId, withdrawals::WithdrawalStatus};
use crate::repositories::{EarningFilter, LedgerStore, TimeRange, WithdrawalFilter};

/// `[midnight, next midnight)` of the UTC day containing `now`.
pub fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

/// Earned minus what has actually been paid out.
pub fn net_withdrawable(total_earned: Amount, paid: Amount) -> Result<Amount, LedgerError> {
    Ok(total_earned.checked_sub(paid)?)
}

/// Read-side balance figures. Never mutates the store.
#[derive(Clone)]
pub struct BalanceCalculator {
    store: Arc<dyn LedgerStore>,
}

impl BalanceCalculator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn total_earned(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        let filter = EarningFilter {
            referrer_id: Some(user_id),
            ..EarningFilter::default()
        };
        Ok(self.store.sum_earnings(&filter).await?)
    }

    pub async fn earned_in_interval(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Amount, LedgerError> {
        let filter = EarningFilter {
            referrer_id: Some(user_id),
            range: TimeRange::between(start, end),
        };
        Ok(self.store.sum_earnings(&filter).await?)
    }

    pub async fn earned_today(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Amount, LedgerError> {
        let (start, end) = day_bounds(now);
        self.earned_in_interval(user_id, start, end).await
    }

    async fn withdrawn(
        &self,
        user_id: UserId,
        status: WithdrawalStatus,
    ) -> Result<Amount, LedgerError> {
        let filter = WithdrawalFilter {
            user_id: Some(user_id),
            status: Some(status),
        };
        Ok(self.store.sum_withdrawals(&filter).await?)
    }

    pub async fn paid_out(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.withdrawn(user_id, WithdrawalStatus::Paid).await
    }

    pub async fn pending(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.withdrawn(user_id, WithdrawalStatus::Pending).await
    }

    /// Total earned minus `paid` withdrawals. Pending requests are not subtracted.
    pub async fn withdrawable(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        let total = self.total_earned(user_id).await?;
        let paid = self.paid_out(user_id).await?;
        net_withdrawable(total, paid)
    }

    pub async fn income_summary(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<IncomeSummary, LedgerError> {
        Ok(IncomeSummary {
            total_earned: self.total_earned(user_id).await?,
            earned_today: self.earned_today(user_id, now).await?,
            withdrawable: self.withdrawable(user_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{deposits::NewDeposit, earnings::NewEarning};
    use crate::repositories::MemoryLedgerStore;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    async fn seeded() -> (Arc<MemoryLedgerStore>, BalanceCalculator) {
        let store = Arc::new(MemoryLedgerStore::new());
        for (source, bonus) in [(2, "1.25"), (3, "0.75")] {
            store
                .record_credit(
                    &NewDeposit {
                        id: uuid::Uuid::new_v4(),
                        user_id: source,
                        amount: amount("100.00"),
                        currency: "USDT".to_string(),
                    },
                    Some(&NewEarning {
                        referrer_id: 1,
                        source_user_id: source,
                        amount: amount(bonus),
                        note: "seed".to_string(),
                    }),
                )
                .await
                .unwrap();
        }
        let calculator = BalanceCalculator::new(store.clone());
        (store, calculator)
    }

    #[test]
    fn day_bounds_cover_one_utc_day() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 15, 30, 0).unwrap();
        let (start, end) = day_bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());

        let midnight = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        assert_eq!(day_bounds(midnight).0, midnight);
    }

    #[tokio::test]
    async fn empty_sums_are_zero() {
        let calculator = BalanceCalculator::new(Arc::new(MemoryLedgerStore::new()));
        assert_eq!(calculator.total_earned(1).await.unwrap().to_string(), "0.00");
        assert_eq!(calculator.withdrawable(1).await.unwrap().to_string(), "0.00");
    }

    #[tokio::test]
    async fn earned_today_excludes_other_days() {
        let (_, calculator) = seeded().await;
        let now = Utc::now();

        assert_eq!(calculator.total_earned(1).await.unwrap(), amount("2.00"));
        assert_eq!(calculator.earned_today(1, now).await.unwrap(), amount("2.00"));
        assert_eq!(
            calculator
                .earned_today(1, now - Duration::days(1))
                .await
                .unwrap(),
            Amount::zero()
        );
        assert_eq!(calculator.total_earned(2).await.unwrap(), Amount::zero());
    }

    #[tokio::test]
    async fn interval_end_is_exclusive() {
        let (_, calculator) = seeded().await;
        let now = Utc::now();

        let up_to_now = calculator
            .earned_in_interval(1, now - Duration::hours(1), now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(up_to_now, amount("2.00"));

        let ended_before = calculator
            .earned_in_interval(1, now - Duration::hours(1), now - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(ended_before, Amount::zero());
    }

    #[tokio::test]
    async fn only_paid_withdrawals_reduce_the_balance() {
        let (store, calculator) = seeded().await;

        let pending = store.record_withdrawal(1, amount("1.50")).await.unwrap();
        assert_eq!(calculator.withdrawable(1).await.unwrap(), amount("2.00"));
        assert_eq!(calculator.pending(1).await.unwrap(), amount("1.50"));

        store
            .set_withdrawal_status(pending.id, WithdrawalStatus::Paid)
            .await
            .unwrap();
        assert_eq!(calculator.withdrawable(1).await.unwrap(), amount("0.50"));

        let rejected = store.record_withdrawal(1, amount("0.50")).await.unwrap();
        store
            .set_withdrawal_status(rejected.id, WithdrawalStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(calculator.withdrawable(1).await.unwrap(), amount("0.50"));

        let summary = calculator.income_summary(1, Utc::now()).await.unwrap();
        assert_eq!(summary.total_earned, amount("2.00"));
        assert_eq!(summary.earned_today, amount("2.00"));
        assert_eq!(summary.withdrawable, amount("0.50"));
    }
}
