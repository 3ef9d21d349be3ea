use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Column whose uniqueness was violated on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("duplicate {0:?}")]
    Conflict(UniqueField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence operations on user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    /// Insert a new account; uniqueness violations map to `RepoError::Conflict`
    /// and leave the table untouched.
    async fn insert(&self, user: &User) -> Result<(), RepoError>;
    /// Write back the mutable flags of an existing account.
    async fn update(&self, user: &User) -> Result<(), RepoError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const USER_COLUMNS: &str = "id, email, username, password_hash, authenticated, email_confirmed, \
     email_confirmed_on, email_confirmation_sent_on, created_at";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: &User) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, password_hash, authenticated,
                               email_confirmed, email_confirmed_on,
                               email_confirmation_sent_on, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.authenticated)
        .bind(user.email_confirmed)
        .bind(user.email_confirmed_on)
        .bind(user.email_confirmation_sent_on)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), RepoError> {
        // email_confirmed_on is write-once.
        sqlx::query(
            r#"
            UPDATE users
               SET authenticated = $2,
                   email_confirmed = $3,
                   email_confirmed_on = COALESCE(email_confirmed_on, $4),
                   email_confirmation_sent_on = $5
             WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(user.authenticated)
        .bind(user.email_confirmed)
        .bind(user.email_confirmed_on)
        .bind(user.email_confirmation_sent_on)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some("users_username_key") => UniqueField::Username,
                _ => UniqueField::Email,
            };
            return RepoError::Conflict(field);
        }
    }
    RepoError::Database(err)
}
