use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::balance::BalanceCalculator;
use super::locks::UserLocks;
use super::notifications::Notification;
use super::referrals::ReferralBonusEngine;
use super::users::IdentityService;
use super::withdrawals::{PendingPolicy, WithdrawalMachine};
use super::{LedgerError, RequestHandler, Service};
use crate::models::{
    amount::{Amount, ReferralPercent},
    deposits::CreditOutcome,
    stats::{IncomeSummary, LedgerStats},
    users::{User, UserId, UserIdentity, UserProfile},
    withdrawals::{Withdrawal, WithdrawalReceipt, WithdrawalStatus},
};
use crate::repositories::{
    DepositFilter, EarningFilter, LedgerStore, UserFilter, WithdrawalFilter,
};
use crate::settings::Settings;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub referral_percent: ReferralPercent,
    pub default_currency: String,
    pub pending_policy: PendingPolicy,
    pub lock_timeout: Duration,
    pub bot_username: String,
}

impl LedgerConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, anyhow::Error> {
        let referral_percent = ReferralPercent::parse(&settings.ledger.referral_percent)
            .map_err(|e| {
                anyhow::anyhow!(
                    "Invalid ledger.referral_percent {:?}: {}",
                    settings.ledger.referral_percent,
                    e
                )
            })?;

        Ok(Self {
            referral_percent,
            default_currency: settings.ledger.default_currency.clone(),
            pending_policy: settings.ledger.pending_policy,
            lock_timeout: Duration::from_millis(settings.ledger.lock_timeout_ms),
            bot_username: settings.bot.username.clone(),
        })
    }
}

/// Everything the presentation layer may ask of the ledger.
///
/// Writes that move a balance take the affected users' locks first; reads go
/// straight to the store.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    identities: IdentityService,
    balance: BalanceCalculator,
    bonuses: ReferralBonusEngine,
    withdrawals: WithdrawalMachine,
    locks: UserLocks,
    config: Arc<LedgerConfig>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Ledger {
            identities: IdentityService::new(store.clone(), config.bot_username.clone()),
            balance: BalanceCalculator::new(store.clone()),
            bonuses: ReferralBonusEngine::new(store.clone()),
            withdrawals: WithdrawalMachine::new(store.clone(), config.pending_policy),
            locks: UserLocks::new(config.lock_timeout),
            config: Arc::new(config),
            store,
        }
    }

    pub async fn register_or_touch(
        &self,
        identity: &UserIdentity,
        referral_arg: Option<&str>,
    ) -> Result<User, LedgerError> {
        self.identities
            .register_or_touch(identity, referral_arg)
            .await
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.identities.get_user(id).await
    }

    pub async fn profile(&self, id: UserId) -> Result<UserProfile, LedgerError> {
        self.identities.profile(id).await
    }

    pub async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, LedgerError> {
        self.identities.list_referred_users(referrer_id).await
    }

    pub async fn total_earned(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.balance.total_earned(user_id).await
    }

    pub async fn earned_in_interval(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Amount, LedgerError> {
        self.balance.earned_in_interval(user_id, start, end).await
    }

    pub async fn withdrawable(&self, user_id: UserId) -> Result<Amount, LedgerError> {
        self.balance.withdrawable(user_id).await
    }

    pub async fn income_summary(&self, user_id: UserId) -> Result<IncomeSummary, LedgerError> {
        self.balance.income_summary(user_id, Utc::now()).await
    }

    /// Credits `amount` to `user_id` and its referrer's bonus in one unit.
    ///
    /// An unknown target is created bare, as the deposit itself proves the
    /// user exists somewhere upstream. `deposit_id` is the caller's key for
    /// this deposit; sending it again after a lost response is safe.
    pub async fn credit_deposit(
        &self,
        deposit_id: Uuid,
        user_id: UserId,
        amount: Amount,
        currency: Option<String>,
    ) -> Result<CreditOutcome, LedgerError> {
        if !amount.is_positive() {
            log::warn!("Rejected deposit of {} for user {}.", amount, user_id);
            return Err(LedgerError::InvalidAmount(amount.to_string()));
        }

        let depositor = self.identities.ensure_user(user_id).await?;

        let mut involved = vec![depositor.id];
        involved.extend(depositor.referred_by);
        let _guard = self.locks.acquire(&involved).await?;

        let currency = currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.config.default_currency.clone());

        self.bonuses
            .credit_deposit(
                deposit_id,
                &depositor,
                amount,
                &currency,
                &self.config.referral_percent,
            )
            .await
    }

    pub async fn request_withdrawal(&self, user_id: UserId) -> Result<WithdrawalReceipt, LedgerError> {
        let withdrawal = {
            let _guard = self.locks.acquire(&[user_id]).await?;
            self.withdrawals.request_withdrawal(user_id).await?
        };

        let requester = match self.store.get_user(user_id).await? {
            Some(user) => user.display_name(),
            None => user_id.to_string(),
        };

        Ok(WithdrawalReceipt {
            withdrawal,
            requester,
            currency: self.config.default_currency.clone(),
        })
    }

    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        Ok(self.store.list_withdrawals(user_id).await?)
    }

    pub async fn mark_paid(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Paid).await
    }

    pub async fn mark_rejected(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Rejected).await
    }

    async fn transition(&self, id: Uuid, status: WithdrawalStatus) -> Result<Withdrawal, LedgerError> {
        let withdrawal = self
            .store
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", id)))?;

        let _guard = self.locks.acquire(&[withdrawal.user_id]).await?;
        self.withdrawals.transition(id, status).await
    }

    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let referred_only = UserFilter {
            referred_only: true,
            ..UserFilter::default()
        };
        let paid = WithdrawalFilter {
            status: Some(WithdrawalStatus::Paid),
            ..WithdrawalFilter::default()
        };
        let pending = WithdrawalFilter {
            status: Some(WithdrawalStatus::Pending),
            ..WithdrawalFilter::default()
        };

        Ok(LedgerStats {
            total_users: self.store.count_users(&UserFilter::default()).await?,
            referred_users: self.store.count_users(&referred_only).await?,
            total_deposits: self.store.sum_deposits(&DepositFilter::default()).await?,
            total_earnings: self.store.sum_earnings(&EarningFilter::default()).await?,
            total_paid_withdrawals: self.store.sum_withdrawals(&paid).await?,
            pending_withdrawals: self.store.count_withdrawals(&pending).await?,
        })
    }
}

type Responder<T> = oneshot::Sender<Result<T, LedgerError>>;

pub enum LedgerRequest {
    RegisterOrTouch {
        identity: UserIdentity,
        referral_arg: Option<String>,
        response: Responder<User>,
    },
    GetProfile {
        id: UserId,
        response: Responder<UserProfile>,
    },
    ListReferredUsers {
        referrer_id: UserId,
        response: Responder<Vec<User>>,
    },
    TotalEarned {
        user_id: UserId,
        response: Responder<Amount>,
    },
    EarnedInInterval {
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        response: Responder<Amount>,
    },
    Withdrawable {
        user_id: UserId,
        response: Responder<Amount>,
    },
    IncomeSummary {
        user_id: UserId,
        response: Responder<IncomeSummary>,
    },
    CreditDeposit {
        deposit_id: Uuid,
        user_id: UserId,
        amount: Amount,
        currency: Option<String>,
        response: Responder<CreditOutcome>,
    },
    RequestWithdrawal {
        user_id: UserId,
        response: Responder<WithdrawalReceipt>,
    },
    ListWithdrawals {
        user_id: UserId,
        response: Responder<Vec<Withdrawal>>,
    },
    MarkPaid {
        id: Uuid,
        response: Responder<Withdrawal>,
    },
    MarkRejected {
        id: Uuid,
        response: Responder<Withdrawal>,
    },
    Stats {
        response: Responder<LedgerStats>,
    },
}

#[derive(Clone)]
pub struct LedgerRequestHandler {
    ledger: Ledger,
    notification_channel: mpsc::Sender<Notification>,
    admins: Arc<Vec<UserId>>,
}

impl LedgerRequestHandler {
    pub fn new(
        ledger: Ledger,
        notification_channel: mpsc::Sender<Notification>,
        admins: Vec<UserId>,
    ) -> Self {
        LedgerRequestHandler {
            ledger,
            notification_channel,
            admins: Arc::new(admins),
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notification_channel.send(notification).await {
            log::warn!("Could not queue notification: {}", e);
        }
    }

    async fn credit_deposit(
        &self,
        deposit_id: Uuid,
        user_id: UserId,
        amount: Amount,
        currency: Option<String>,
    ) -> Result<CreditOutcome, LedgerError> {
        let outcome = self
            .ledger
            .credit_deposit(deposit_id, user_id, amount, currency)
            .await?;
        if outcome.replayed {
            return Ok(outcome);
        }

        if let Some(earning) = &outcome.earning {
            let source = match self.ledger.get_user(user_id).await {
                Ok(user) => user.display_name(),
                Err(_) => user_id.to_string(),
            };
            self.notify(Notification::ReferralCredited {
                referrer_id: earning.referrer_id,
                source,
                deposit: outcome.deposit.amount,
                currency: outcome.deposit.currency.clone(),
                bonus: earning.amount,
            })
            .await;
        }

        Ok(outcome)
    }

    async fn request_withdrawal(&self, user_id: UserId) -> Result<WithdrawalReceipt, LedgerError> {
        let receipt = self.ledger.request_withdrawal(user_id).await?;

        self.notify(Notification::WithdrawalRequested {
            receipt: receipt.clone(),
            recipients: self.admins.as_ref().clone(),
        })
        .await;

        Ok(receipt)
    }
}

#[async_trait]
impl RequestHandler<LedgerRequest> for LedgerRequestHandler {
    async fn handle_request(&self, request: LedgerRequest) {
        match request {
            LedgerRequest::RegisterOrTouch {
                identity,
                referral_arg,
                response,
            } => {
                let result = self
                    .ledger
                    .register_or_touch(&identity, referral_arg.as_deref())
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::GetProfile { id, response } => {
                let _ = response.send(self.ledger.profile(id).await);
            }
            LedgerRequest::ListReferredUsers {
                referrer_id,
                response,
            } => {
                let _ = response.send(self.ledger.list_referred_users(referrer_id).await);
            }
            LedgerRequest::TotalEarned { user_id, response } => {
                let _ = response.send(self.ledger.total_earned(user_id).await);
            }
            LedgerRequest::EarnedInInterval {
                user_id,
                start,
                end,
                response,
            } => {
                let result = self.ledger.earned_in_interval(user_id, start, end).await;
                let _ = response.send(result);
            }
            LedgerRequest::Withdrawable { user_id, response } => {
                let _ = response.send(self.ledger.withdrawable(user_id).await);
            }
            LedgerRequest::IncomeSummary { user_id, response } => {
                let _ = response.send(self.ledger.income_summary(user_id).await);
            }
            LedgerRequest::CreditDeposit {
                deposit_id,
                user_id,
                amount,
                currency,
                response,
            } => {
                let result = self
                    .credit_deposit(deposit_id, user_id, amount, currency)
                    .await;
                let _ = response.send(result);
            }
            LedgerRequest::RequestWithdrawal { user_id, response } => {
                let _ = response.send(self.request_withdrawal(user_id).await);
            }
            LedgerRequest::ListWithdrawals { user_id, response } => {
                let _ = response.send(self.ledger.list_withdrawals(user_id).await);
            }
            LedgerRequest::MarkPaid { id, response } => {
                let _ = response.send(self.ledger.mark_paid(id).await);
            }
            LedgerRequest::MarkRejected { id, response } => {
                let _ = response.send(self.ledger.mark_rejected(id).await);
            }
            LedgerRequest::Stats { response } => {
                let _ = response.send(self.ledger.stats().await);
            }
        }
    }
}

pub struct LedgerService;

impl LedgerService {
    pub fn new() -> Self {
        LedgerService {}
    }
}

#[async_trait]
impl Service<LedgerRequest, LedgerRequestHandler> for LedgerService {}
