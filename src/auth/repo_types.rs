use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User account record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    pub authenticated: bool,
    pub email_confirmed: bool,
    pub email_confirmed_on: Option<OffsetDateTime>,
    pub email_confirmation_sent_on: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    /// A freshly registered account. Registration counts as signed in,
    /// but the mailbox is not confirmed yet.
    pub fn new_registered(email: String, username: String, password_hash: String) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            email,
            username,
            password_hash,
            authenticated: true,
            email_confirmed: false,
            email_confirmed_on: None,
            email_confirmation_sent_on: Some(now),
            created_at: now,
        }
    }

    /// Marks the mailbox as confirmed. Returns false (and changes nothing)
    /// when it already was.
    pub fn confirm_email(&mut self, at: OffsetDateTime) -> bool {
        if self.email_confirmed {
            return false;
        }
        self.email_confirmed = true;
        self.email_confirmed_on = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_unconfirmed() {
        let user = User::new_registered("a@x.com".into(), "alice".into(), "hash".into());
        assert!(user.authenticated);
        assert!(!user.email_confirmed);
        assert!(user.email_confirmed_on.is_none());
        assert!(user.email_confirmation_sent_on.is_some());
    }

    #[test]
    fn confirm_email_sets_timestamp_once() {
        let mut user = User::new_registered("a@x.com".into(), "alice".into(), "hash".into());
        let first = OffsetDateTime::now_utc();
        assert!(user.confirm_email(first));
        let later = first + time::Duration::hours(1);
        assert!(!user.confirm_email(later));
        assert_eq!(user.email_confirmed_on, Some(first));
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User::new_registered("a@x.com".into(), "alice".into(), "secret-hash".into());
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("a@x.com"));
        assert!(!json.contains("secret-hash"));
    }
}
