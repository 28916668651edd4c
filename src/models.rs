pub mod amount;
pub mod deposits;
pub mod earnings;
pub mod stats;
pub mod users;
pub mod withdrawals;
