use std::time::{SystemTime, UNIX_EPOCH};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::RunQueryDsl;
use rand::rngs::SysRng;
use rand::TryRng;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::error::{PlanoraError, Result};

mod schema;
use schema::{user_sessions, users};

const EMAIL_TAKEN: &str = "Email already registered";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

#[derive(Queryable)]
struct UserRow {
    id: i32,
    name: String,
    email: String,
    password_hash: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    name: &'a str,
    email: &'a str,
    password_hash: &'a str,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = user_sessions)]
struct NewSession<'a> {
    token: &'a str,
    user_id: i32,
    created_at: i64,
}

pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let name = name.trim();
        let email = normalize_email(email);
        if name.is_empty() {
            return Err(PlanoraError::Validation("Name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(PlanoraError::Validation("Invalid email address".to_string()));
        }
        if password.is_empty() {
            return Err(PlanoraError::Validation("Password is required".to_string()));
        }

        let mut conn = self.db.conn().await?;
        let existing: Option<i32> = users::table
            .filter(users::email.eq(&email))
            .select(users::id)
            .first(&mut conn)
            .await
            .optional()?;
        if existing.is_some() {
            return Err(PlanoraError::Validation(EMAIL_TAKEN.to_string()));
        }

        let password_hash = hash_password_blocking(password).await?;
        let new = NewUser {
            name,
            email: &email,
            password_hash: &password_hash,
            created_at: now_ts(),
        };
        // a concurrent signup can still win the UNIQUE(email) race
        diesel::insert_into(users::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    PlanoraError::Validation(EMAIL_TAKEN.to_string())
                }
                other => other.into(),
            })?;

        let row: UserRow = users::table
            .filter(users::email.eq(&email))
            .first(&mut conn)
            .await?;
        tracing::info!(user_id = row.id, "Registered user");
        Ok(map_row(row))
    }

    /// Checks credentials and opens a new session. Unknown email and wrong
    /// password produce the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let email = normalize_email(email);
        let mut conn = self.db.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::email.eq(&email))
            .first(&mut conn)
            .await
            .optional()?;

        let Some(row) = row else {
            return Err(PlanoraError::Validation("Invalid credentials".to_string()));
        };
        if !verify_password_blocking(password, &row.password_hash).await? {
            tracing::debug!(user_id = row.id, "Rejected login with wrong password");
            return Err(PlanoraError::Validation("Invalid credentials".to_string()));
        }

        let token = generate_token()?;
        let token_hash = token_digest(&token);
        diesel::insert_into(user_sessions::table)
            .values(&NewSession {
                token: &token_hash,
                user_id: row.id,
                created_at: now_ts(),
            })
            .execute(&mut conn)
            .await?;
        Ok(token)
    }

    pub async fn user_for_token(&self, token: &str) -> Result<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PlanoraError::Unauthorized("Unauthorized".to_string()));
        }
        let mut conn = self.db.conn().await?;
        let row: Option<UserRow> = user_sessions::table
            .inner_join(users::table)
            .filter(user_sessions::token.eq(token_digest(token)))
            .select((
                users::id,
                users::name,
                users::email,
                users::password_hash,
                users::created_at,
            ))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(map_row)
            .ok_or_else(|| PlanoraError::Unauthorized("Unauthorized".to_string()))
    }

    pub async fn logout(&self, token: &str) -> Result<bool> {
        let mut conn = self.db.conn().await?;
        let token_hash = token_digest(token.trim());
        let deleted = diesel::delete(user_sessions::table.filter(user_sessions::token.eq(token_hash)))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

fn map_row(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        created_at: row.created_at,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    Ok(bytes)
}

fn generate_token() -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

/// Sessions are keyed by the SHA-256 of the token, never the token itself.
fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Argon2id with default parameters, encoded as a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(&random_bytes::<16>()?)
        .map_err(|e| PlanoraError::Runtime(format!("password salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PlanoraError::Runtime(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

async fn hash_password_blocking(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?
}

async fn verify_password_blocking(password: &str, stored: &str) -> Result<bool> {
    let (password, stored) = (password.to_string(), stored.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_and_is_salted() {
        let first = hash_password("hunter2").unwrap();
        let second = hash_password("hunter2").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &first));
        assert!(verify_password("hunter2", &second));
        assert!(!verify_password("hunter3", &first));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "$argon2id$garbage"));
        assert!(!verify_password("x", "sha256$10000$c2FsdA$aGFzaA"));
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token_digest(&a), a);
        assert_eq!(token_digest(&a), token_digest(&a));
    }
}
