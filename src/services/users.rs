use std::sync::Arc;

use super::LedgerError;
use crate::models::users::{User, UserId, UserIdentity, UserProfile};
use crate::repositories::{LedgerStore, UserFilter};

/// Reads the referrer out of a start argument. Anything that is not a user
/// identifier means "no referrer".
pub fn parse_referral_arg(arg: Option<&str>) -> Option<UserId> {
    arg.map(str::trim)
        .filter(|arg| !arg.is_empty())
        .and_then(|arg| arg.parse::<UserId>().ok())
}

pub fn referral_link(bot_username: &str, user_id: UserId) -> String {
    format!("https://t.me/{}?start={}", bot_username, user_id)
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn LedgerStore>,
    bot_username: String,
}

impl IdentityService {
    pub fn new(store: Arc<dyn LedgerStore>, bot_username: String) -> Self {
        Self {
            store,
            bot_username,
        }
    }

    /// Entry point for every contact with a user: creates the record with its
    /// referrer on first contact, refreshes display fields afterwards.
    pub async fn register_or_touch(
        &self,
        identity: &UserIdentity,
        referral_arg: Option<&str>,
    ) -> Result<User, LedgerError> {
        let referred_by = parse_referral_arg(referral_arg);
        let user = self
            .store
            .upsert_user_identity(identity, referred_by)
            .await?;

        log::info!(
            "Registered user {} (referred by {:?}).",
            user.id,
            user.referred_by
        );
        Ok(user)
    }

    pub async fn ensure_user(&self, id: UserId) -> Result<User, LedgerError> {
        Ok(self.store.ensure_user(id).await?)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", id)))
    }

    pub async fn list_referred_users(&self, referrer_id: UserId) -> Result<Vec<User>, LedgerError> {
        Ok(self.store.list_referred_users(referrer_id).await?)
    }

    pub async fn profile(&self, id: UserId) -> Result<UserProfile, LedgerError> {
        let user = self.get_user(id).await?;
        let referral_count = self
            .store
            .count_users(&UserFilter {
                referred_by: Some(id),
                ..UserFilter::default()
            })
            .await?;

        Ok(UserProfile {
            referral_link: referral_link(&self.bot_username, user.id),
            user,
            referral_count,
        })
    }
}
