use crate::model::user::User;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

pub const PASSWORD_SALT_LEN: usize = 8;
pub const PASSWORD_KEY_LEN: usize = 32;
pub const PASSWORD_HASH_LEN: usize = PASSWORD_SALT_LEN + PASSWORD_KEY_LEN;

const PASSWORD_MEMORY_KIB: u32 = 64 * 1024;
const PASSWORD_ITERATIONS: u32 = 1;
const PASSWORD_PARALLELISM: u32 = 4;

const SALT_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing password failed: {0}")]
pub struct PasswordHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The stored password hash had length {0}, expected {PASSWORD_HASH_LEN}")]
pub struct InvalidPasswordHashError(usize);

/// Salted password hash: the ASCII salt followed by the Argon2id key derived from it.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PasswordHash(Box<[u8; PASSWORD_HASH_LEN]>);

impl PasswordHash {
    pub fn generate(password: &str) -> Result<Self, PasswordHashError> {
        let mut rng = rand::rng();
        let salt = std::array::from_fn(|_| SALT_ALPHABET[rng.random_range(0..SALT_ALPHABET.len())]);

        Self::with_salt(password, salt)
    }

    pub fn with_salt(password: &str, salt: [u8; PASSWORD_SALT_LEN]) -> Result<Self, PasswordHashError> {
        let params = Params::new(
            PASSWORD_MEMORY_KIB,
            PASSWORD_ITERATIONS,
            PASSWORD_PARALLELISM,
            Some(PASSWORD_KEY_LEN),
        )
        .map_err(PasswordHashError)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut hash = Box::new([0; PASSWORD_HASH_LEN]);
        let (salt_part, key_part) = hash.split_at_mut(PASSWORD_SALT_LEN);
        salt_part.copy_from_slice(&salt);
        argon2
            .hash_password_into(password.as_bytes(), &salt, key_part)
            .map_err(PasswordHashError)?;

        Ok(Self(hash))
    }

    #[must_use]
    pub fn salt(&self) -> [u8; PASSWORD_SALT_LEN] {
        let mut salt = [0; PASSWORD_SALT_LEN];
        salt.copy_from_slice(&self.0[..PASSWORD_SALT_LEN]);
        salt
    }

    /// Re-derives the key with the stored salt and compares the whole byte sequence.
    pub fn verify(&self, password: &str) -> Result<bool, PasswordHashError> {
        let candidate = Self::with_salt(password, self.salt())?;
        Ok(candidate == *self)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Debug for PasswordHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordHash").field(&"[redacted]").finish()
    }
}

impl TryFrom<Vec<u8>> for PasswordHash {
    type Error = InvalidPasswordHashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let len = value.len();
        let bytes: Box<[u8; PASSWORD_HASH_LEN]> = value
            .into_boxed_slice()
            .try_into()
            .map_err(|_| InvalidPasswordHashError(len))?;

        Ok(Self(bytes))
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claims carried by a signed session token.
///
/// `iat` and `exp` are unix timestamps in seconds; `jti` names the session record
/// that must still exist in the session store for the token to be accepted.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user: User,
    pub iat: i64,
    pub exp: i64,
    pub jti: SessionId,
}
