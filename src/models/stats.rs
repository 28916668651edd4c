use serde::Serialize;

use super::amount::Amount;

/// Ledger-wide figures for the operator dashboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total_users: i64,
    pub referred_users: i64,
    pub total_deposits: Amount,
    pub total_earnings: Amount,
    pub total_paid_withdrawals: Amount,
    pub pending_withdrawals: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IncomeSummary {
    pub total_earned: Amount,
    pub earned_today: Amount,
    pub withdrawable: Amount,
}
