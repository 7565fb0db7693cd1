use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tokio::task;

use crate::config::PasswordHashConfig;
use crate::error::{GatewayError, GatewayResult};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Argon2id hashing, always run off the async workers.
#[derive(Clone)]
pub struct Passwords {
    params: Params,
    /// Verified against when no user matched, so unknown emails cost the
    /// same as wrong passwords.
    dummy_hash: String,
}

impl Passwords {
    pub fn new(config: &PasswordHashConfig) -> GatewayResult<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| GatewayError::Internal(format!("invalid argon2 parameters: {e}")))?;

        let dummy_hash = hash_with(&params, "docvault-dummy-password")?;
        Ok(Self { params, dummy_hash })
    }

    pub async fn hash(&self, password: String) -> GatewayResult<String> {
        let params = self.params.clone();
        task::spawn_blocking(move || hash_with(&params, &password))
            .await
            .map_err(|_| GatewayError::Internal("password hashing worker failed".into()))?
    }

    pub async fn verify(&self, password: String, hash: String) -> GatewayResult<bool> {
        task::spawn_blocking(move || match PasswordHash::new(&hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        })
        .await
        .map_err(|_| GatewayError::Internal("password verification worker failed".into()))
    }

    /// Burns one verification and always reports a mismatch.
    pub async fn verify_dummy(&self, password: String) -> GatewayResult<bool> {
        self.verify(password, self.dummy_hash.clone()).await?;
        Ok(false)
    }
}

fn hash_with(params: &Params, password: &str) -> GatewayResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatewayError::Internal(format!("password hashing failed: {e}")))
}

pub fn is_acceptable_password(password: &str) -> bool {
    let len = password.chars().count();
    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len)
}

impl std::fmt::Debug for Passwords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passwords")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .finish_non_exhaustive()
    }
}
