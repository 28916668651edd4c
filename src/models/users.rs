use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub referred_by: Option<UserId>,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// Username, else first name, else the numeric identifier.
    pub fn display_name(&self) -> String {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.first_name.as_deref().filter(|name| !name.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Display fields reported by the chat transport on every contact.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserProfile {
    pub user: User,
    pub referral_link: String,
    pub referral_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: Option<&str>, first_name: Option<&str>) -> User {
        User {
            id: 77,
            username: username.map(str::to_string),
            first_name: first_name.map(str::to_string),
            referred_by: None,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn display_name_falls_back_in_order() {
        assert_eq!(user(Some("alice"), Some("Alice")).display_name(), "alice");
        assert_eq!(user(None, Some("Alice")).display_name(), "Alice");
        assert_eq!(user(Some(""), Some("Alice")).display_name(), "Alice");
        assert_eq!(user(None, None).display_name(), "77");
    }
}
