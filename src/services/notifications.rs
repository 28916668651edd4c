use async_trait::async_trait;

use super::{RequestHandler, Service};
use crate::models::{amount::Amount, users::UserId, withdrawals::WithdrawalReceipt};

/// Messages the ledger emits after a successful write. Delivery belongs to the
/// chat transport; the handler here only renders and logs them.
#[derive(Clone, Debug)]
pub enum Notification {
    WithdrawalRequested {
        receipt: WithdrawalReceipt,
        recipients: Vec<UserId>,
    },
    ReferralCredited {
        referrer_id: UserId,
        source: String,
        deposit: Amount,
        currency: String,
        bonus: Amount,
    },
}

impl Notification {
    /// One `(recipient, text)` pair per addressee.
    pub fn render(&self) -> Vec<(UserId, String)> {
        match self {
            Notification::WithdrawalRequested {
                receipt,
                recipients,
            } => {
                let text = format!(
                    "Withdrawal request {}\nUser: {} ({})\nAmount: {} {}",
                    receipt.withdrawal.id,
                    receipt.requester,
                    receipt.withdrawal.user_id,
                    receipt.withdrawal.amount,
                    receipt.currency
                );
                recipients.iter().map(|id| (*id, text.clone())).collect()
            }
            Notification::ReferralCredited {
                referrer_id,
                source,
                deposit,
                currency,
                bonus,
            } => vec![(
                *referrer_id,
                format!(
                    "Your referral {} deposited {} {}. You earned {} {}.",
                    source, deposit, currency, bonus, currency
                ),
            )],
        }
    }
}

#[derive(Clone)]
pub struct NotificationRequestHandler;

impl NotificationRequestHandler {
    pub fn new() -> Self {
        NotificationRequestHandler {}
    }
}

#[async_trait]
impl RequestHandler<Notification> for NotificationRequestHandler {
    async fn handle_request(&self, notification: Notification) {
        let messages = notification.render();
        if messages.is_empty() {
            log::warn!("Notification without recipients dropped: {:?}", notification);
            return;
        }

        for (recipient, text) in messages {
            log::info!(target: "notifications", "to {}: {}", recipient, text);
        }
    }
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        NotificationService {}
    }
}

#[async_trait]
impl Service<Notification, NotificationRequestHandler> for NotificationService {}
