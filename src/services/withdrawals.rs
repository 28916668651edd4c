use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use super::balance::BalanceCalculator;
use super::LedgerError;
use crate::models::{
    amount::Amount,
    users::UserId,
    withdrawals::{Withdrawal, WithdrawalStatus},
};
use crate::repositories::LedgerStore;

/// How open (`pending`) requests weigh on what a new request may claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Pending requests stay part of the withdrawable balance until paid or
    /// rejected, so several requests may each claim the full balance.
    #[default]
    Counted,
    /// Pending requests are reserved: a new request may only claim what is
    /// left after them, capping pending plus paid at total earned.
    Reserved,
}

/// `pending -> paid | rejected`; both targets are terminal.
#[derive(Clone)]
pub struct WithdrawalMachine {
    store: Arc<dyn LedgerStore>,
    balance: BalanceCalculator,
    policy: PendingPolicy,
}

impl WithdrawalMachine {
    pub fn new(store: Arc<dyn LedgerStore>, policy: PendingPolicy) -> Self {
        let balance = BalanceCalculator::new(store.clone());

        Self {
            store,
            balance,
            policy,
        }
    }

    /// The amount a new request would be opened for.
    pub async fn claimable(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        let withdrawable = self.balance.withdrawable(user_id).await?;

        match self.policy {
            PendingPolicy::Counted => Ok(withdrawable),
            PendingPolicy::Reserved => {
                let pending = self.balance.pending(user_id).await?;
                Ok(withdrawable.checked_sub(pending)?)
            }
        }
    }

    /// Opens a `pending` withdrawal for a snapshot of the claimable balance.
    ///
    /// Must run under the user's lock so the balance read and the insert
    /// cannot interleave with another request.
    pub async fn request_withdrawal(&self, user_id: UserId) -> Result<Withdrawal, LedgerError> {
        let amount = self.claimable(user_id).await?;
        if !amount.is_positive() {
            log::warn!("User {} requested a withdrawal with nothing to withdraw.", user_id);
            return Err(LedgerError::NothingToWithdraw);
        }

        let withdrawal = self.store.record_withdrawal(user_id, amount).await?;
        log::info!(
            "Opened withdrawal {} for user {}: {}.",
            withdrawal.id,
            user_id,
            withdrawal.amount
        );
        Ok(withdrawal)
    }

    pub async fn mark_paid(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Paid).await
    }

    pub async fn mark_rejected(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Rejected).await
    }

    pub async fn transition(
        &self,
        id: Uuid,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, LedgerError> {
        let withdrawal = self
            .store
            .set_withdrawal_status(id, status)
            .await
            .map_err(|e| {
                log::warn!("Withdrawal {} could not move to {}: {}", id, status, e);
                LedgerError::from(e)
            })?;

        log::info!("Withdrawal {} is now {}.", id, status);
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::earnings::NewEarning;
    use crate::repositories::MemoryLedgerStore;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    async fn store_with_earnings(value: &str) -> Arc<MemoryLedgerStore> {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .record_earning(&NewEarning {
                referrer_id: 1,
                source_user_id: 2,
                amount: amount(value),
                note: "seed".to_string(),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn nothing_to_withdraw_without_earnings() {
        let machine = WithdrawalMachine::new(Arc::new(MemoryLedgerStore::new()), PendingPolicy::Counted);
        assert!(matches!(
            machine.request_withdrawal(1).await,
            Err(LedgerError::NothingToWithdraw)
        ));
    }

    #[tokio::test]
    async fn counted_policy_lets_pending_requests_overlap() {
        let store = store_with_earnings("10.00").await;
        let machine = WithdrawalMachine::new(store.clone(), PendingPolicy::Counted);

        let first = machine.request_withdrawal(1).await.unwrap();
        let second = machine.request_withdrawal(1).await.unwrap();
        assert_eq!(first.amount, amount("10.00"));
        assert_eq!(second.amount, amount("10.00"));
        assert_eq!(first.status, WithdrawalStatus::Pending);
    }

    #[tokio::test]
    async fn reserved_policy_caps_pending_at_balance() {
        let store = store_with_earnings("10.00").await;
        let machine = WithdrawalMachine::new(store.clone(), PendingPolicy::Reserved);

        let first = machine.request_withdrawal(1).await.unwrap();
        assert_eq!(first.amount, amount("10.00"));
        assert!(matches!(
            machine.request_withdrawal(1).await,
            Err(LedgerError::NothingToWithdraw)
        ));

        // A rejected request frees its reservation.
        machine.mark_rejected(first.id).await.unwrap();
        let retry = machine.request_withdrawal(1).await.unwrap();
        assert_eq!(retry.amount, amount("10.00"));
    }

    #[tokio::test]
    async fn requested_amount_is_a_snapshot() {
        let store = store_with_earnings("3.00").await;
        let machine = WithdrawalMachine::new(store.clone(), PendingPolicy::Counted);

        let withdrawal = machine.request_withdrawal(1).await.unwrap();
        store
            .record_earning(&NewEarning {
                referrer_id: 1,
                source_user_id: 3,
                amount: amount("2.00"),
                note: "later".to_string(),
            })
            .await
            .unwrap();

        let paid = machine.mark_paid(withdrawal.id).await.unwrap();
        assert_eq!(paid.amount, amount("3.00"));
        assert_eq!(machine.claimable(1).await.unwrap(), amount("2.00"));
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        let store = store_with_earnings("3.00").await;
        let machine = WithdrawalMachine::new(store, PendingPolicy::Counted);

        let withdrawal = machine.request_withdrawal(1).await.unwrap();
        machine.mark_paid(withdrawal.id).await.unwrap();

        assert!(matches!(
            machine.mark_rejected(withdrawal.id).await,
            Err(LedgerError::InvalidTransition(_))
        ));
        assert!(matches!(
            machine.mark_paid(withdrawal.id).await,
            Err(LedgerError::InvalidTransition(_))
        ));
        assert!(matches!(
            machine.mark_paid(Uuid::new_v4()).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
