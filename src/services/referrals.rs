use std::sync::Arc;

use uuid::Uuid;

use super::LedgerError;
use crate::models::{
    amount::{Amount, ReferralPercent},
    deposits::{CreditOutcome, NewDeposit},
    earnings::NewEarning,
    users::User,
};
use crate::repositories::LedgerStore;

/// The earning a deposit by `depositor` owes its referrer, if any.
///
/// Nothing is owed without a referrer, for a self-referencing one, or when
/// the truncated bonus comes out as zero.
pub fn bonus_for(
    depositor: &User,
    amount: Amount,
    percent: &ReferralPercent,
) -> Result<Option<NewEarning>, LedgerError> {
    let referrer_id = match depositor.referred_by {
        Some(referrer_id) if referrer_id != depositor.id => referrer_id,
        _ => return Ok(None),
    };

    let bonus = percent.bonus_on(amount)?;
    if !bonus.is_positive() {
        log::info!(
            "Bonus on {} from user {} truncates to zero, nothing recorded.",
            amount,
            depositor.id
        );
        return Ok(None);
    }

    Ok(Some(NewEarning {
        referrer_id,
        source_user_id: depositor.id,
        amount: bonus,
        note: format!("Referral bonus {}% from {}", percent, depositor.id),
    }))
}

/// Turns deposits into referral earnings.
///
/// Callers are trusted to have authorized the deposit; no role check is made here.
#[derive(Clone)]
pub struct ReferralBonusEngine {
    store: Arc<dyn LedgerStore>,
}

impl ReferralBonusEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Records the deposit and, when one is owed, the referrer's bonus, as one unit.
    ///
    /// Repeating a `deposit_id` returns the first outcome without writing again.
    pub async fn credit_deposit(
        &self,
        deposit_id: Uuid,
        depositor: &User,
        amount: Amount,
        currency: &str,
        percent: &ReferralPercent,
    ) -> Result<CreditOutcome, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount.to_string()));
        }

        let earning = bonus_for(depositor, amount, percent)?;
        let deposit = NewDeposit {
            id: deposit_id,
            user_id: depositor.id,
            amount,
            currency: currency.to_string(),
        };

        let outcome = self.store.record_credit(&deposit, earning.as_ref()).await?;
        if outcome.replayed {
            log::info!("Deposit {} was already recorded, nothing written.", deposit_id);
            return Ok(outcome);
        }

        match &outcome.earning {
            Some(earning) => log::info!(
                "Deposit {} {} for user {} credited {} to referrer {}.",
                outcome.deposit.amount,
                outcome.deposit.currency,
                depositor.id,
                earning.amount,
                earning.referrer_id
            ),
            None => log::info!(
                "Deposit {} {} for user {} recorded without bonus.",
                outcome.deposit.amount,
                outcome.deposit.currency,
                depositor.id
            ),
        }

        Ok(outcome)
    }
}
