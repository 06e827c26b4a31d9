//! User accounts and balance reads

use base64::{engine::general_purpose::STANDARD_NO_PAD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{Balance, User};
use crate::error::{LedgerError, Result};
use crate::persistence::{LedgerStore, UserStore};
use crate::validation::validate_credentials;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 password hashing.
///
/// Stored form: `pbkdf2-sha256$<iterations>$<salt>$<digest>`, base64 without
/// padding. The iteration count is read back from the stored hash, so it can
/// be raised without invalidating existing accounts.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = derive(password.as_bytes(), &salt, self.iterations);

        Ok(format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            BASE64.encode(salt),
            BASE64.encode(digest)
        ))
    }

    pub fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        let parts: Vec<&str> = stored.split('$').collect();
        let [scheme, iterations, salt, digest] = parts.as_slice() else {
            return Err(LedgerError::Internal("malformed password hash".to_string()));
        };
        if *scheme != SCHEME {
            return Err(LedgerError::Internal(format!(
                "unsupported password scheme: {}",
                scheme
            )));
        }

        let iterations: u32 = iterations
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| LedgerError::Internal("malformed password hash".to_string()))?;
        let salt = BASE64
            .decode(salt)
            .map_err(|e| LedgerError::Internal(format!("malformed password salt: {}", e)))?;
        let expected = BASE64
            .decode(digest)
            .map_err(|e| LedgerError::Internal(format!("malformed password digest: {}", e)))?;

        let actual = derive(password.as_bytes(), &salt, iterations);
        Ok(constant_time_eq(&actual, &expected))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(100_000)
    }
}

/// PBKDF2-HMAC-SHA256 with a 32-byte output
fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

pub struct UserService {
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn LedgerStore>,
    hasher: PasswordHasher,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn LedgerStore>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            users,
            ledger,
            hasher,
        }
    }

    /// Create an account with a zero balance
    #[instrument(skip(self, password))]
    pub async fn register(&self, login: &str, password: &str) -> Result<User> {
        let login = validate_credentials(login, password)?;

        let hasher = self.hasher;
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| LedgerError::Internal(format!("password hashing task failed: {}", e)))??;

        let user = self.users.create_user(&login, &hash).await?;
        info!("Registered user {} with id {}", user.login, user.id);
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User> {
        let login = validate_credentials(login, password)?;
        let Some(user) = self.users.find_user_by_login(&login).await? else {
            warn!("Login attempt for unknown user {}", login);
            return Err(LedgerError::InvalidCredentials);
        };

        let hasher = self.hasher;
        let password = password.to_string();
        let stored = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(|e| LedgerError::Internal(format!("password check task failed: {}", e)))??;

        if !matches {
            warn!("Wrong password for user {}", login);
            return Err(LedgerError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn balance(&self, user_id: i64) -> Result<Balance> {
        self.ledger.balance(user_id).await
    }
}
