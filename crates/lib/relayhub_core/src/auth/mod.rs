//! Authentication and authorization logic.
//!
//! The token authority issues and validates the bearer credentials that link
//! the assistant platform to a user. Device report-state messages are
//! authenticated separately with a per-user pre-shared secret.

pub mod authority;
pub mod device;
pub mod password;
pub mod token;

use thiserror::Error;

use crate::store::StoreError;

pub use authority::{Authenticated, TokenAuthority};
pub use password::{BcryptVerifier, CredentialVerifier};
pub use token::{BearerToken, TokenKind};

/// Authentication errors.
///
/// `InvalidGrant` and `Unauthorized` deliberately carry no detail; the failing
/// check is logged, not returned.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid_grant")]
    InvalidGrant,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden")]
    Forbidden,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
