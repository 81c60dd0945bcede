use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::repo_types::{NewUser, User, UserRow};

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the insert; carries the column name.
    #[error("{0} already registered")]
    Conflict(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Credential store. Owns user records; uniqueness of username and email is
/// enforced by the store itself in the same step as the insert.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn conflict_column(err: &sqlx::Error) -> Option<&'static str> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some(PG_UNIQUE_VIOLATION) {
        return None;
    }
    match db_err.constraint() {
        Some(c) if c.contains("email") => Some("email"),
        _ => Some("username"),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, role, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.code())
        .fetch_one(&self.db)
        .await
        .map_err(|e| match conflict_column(&e) {
            Some(column) => StoreError::Conflict(column),
            None => StoreError::Database(e),
        })?;
        Ok(row.into())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }
}

/// In-process store with the same contract as `PgUserStore`.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUserStore {
    users: tokio::sync::Mutex<Vec<User>>,
}

#[cfg(test)]
impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username"));
        }
        if users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email"));
        }
        let created = User {
            id: users.len() as i64 + 1,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: time::OffsetDateTime::now_utc(),
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    /// Minimal driver error carrying a SQLSTATE and constraint name.
    #[derive(Debug)]
    struct PgLikeError {
        code: &'static str,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for PgLikeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sqlstate {}", self.code)
        }
    }

    impl StdError for PgLikeError {}

    impl DatabaseError for PgLikeError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> ErrorKind {
            if self.code == PG_UNIQUE_VIOLATION {
                ErrorKind::UniqueViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    fn db_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgLikeError { code, constraint }))
    }

    #[test]
    fn unique_violation_names_the_column() {
        assert_eq!(
            conflict_column(&db_error("23505", Some("users_email_key"))),
            Some("email")
        );
        assert_eq!(
            conflict_column(&db_error("23505", Some("users_username_key"))),
            Some("username")
        );
    }

    #[test]
    fn other_database_errors_are_not_conflicts() {
        assert_eq!(conflict_column(&db_error("23503", Some("users_email_key"))), None);
        assert_eq!(conflict_column(&db_error("42P01", None)), None);
        assert_eq!(conflict_column(&sqlx::Error::RowNotFound), None);
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_finds_by_email_and_id() {
        let store = MemoryUserStore::new();
        let a = store.create(new_user("alice", "a@x.com")).await.unwrap();
        let b = store.create(new_user("bob", "b@x.com")).await.unwrap();
        assert_ne!(a.id, b.id);

        let by_email = store.find_by_email("b@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, b.id);
        let by_id = store.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert!(store.find_by_id(999).await.unwrap().is_none());
        assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_regardless_of_username() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "a@x.com")).await.unwrap();
        let err = store.create(new_user("someone-else", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("email")));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "a@x.com")).await.unwrap();
        let err = store.create(new_user("alice", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("username")));
        assert_eq!(err.to_string(), "username already registered");
    }
}
