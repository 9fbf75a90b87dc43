use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use log::{debug, warn};

use crate::core::shared::error::PqrsError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Argon2Config {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub output_length: usize,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19456,
            time_cost: 2,
            parallelism: 1,
            output_length: 32,
        }
    }
}

pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: Argon2Config) -> Result<Self, PqrsError> {
        let params = Params::new(
            config.memory_cost_kib,
            config.time_cost,
            config.parallelism,
            Some(config.output_length),
        )
        .map_err(|e| PqrsError::Internal(format!("Invalid Argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn with_defaults() -> Result<Self, PqrsError> {
        Self::new(Argon2Config::default())
    }

    pub fn hash(&self, password: &str) -> Result<String, PqrsError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(PqrsError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PqrsError::Internal(format!("Failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    /// A malformed stored hash counts as a failed login, not a server error.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Stored password hash is not a valid PHC string: {e}");
                return false;
            }
        };

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(argon2::password_hash::Error::Password) => false,
            Err(e) => {
                debug!("Password verification error: {e}");
                false
            }
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, PqrsError> {
    PasswordHasher::with_defaults()?.hash(password)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHasher::with_defaults() {
        Ok(hasher) => hasher.verify(password, hash),
        Err(_) => false,
    }
}
