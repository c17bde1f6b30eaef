//! Error taxonomy for the session, privilege and store boundaries.
//!
//! None of these ever reach the requester from the access gate: the gate
//! degrades each of them to the least privileged decision available.

use thiserror::Error;

/// Failures while resolving or refreshing a session with the auth provider.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("auth provider unavailable: {0}")]
    ProviderUnavailable(#[from] reqwest::Error),

    #[error("session invalid: {0}")]
    SessionInvalid(String),

    #[error("auth provider rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Failures while looking up the profile that carries an identity's role.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("no profile for identity {0}")]
    ProfileNotFound(uuid::Uuid),

    #[error("profile query failed: {0}")]
    ProfileQuery(#[from] sqlx::Error),
}

/// A role integer outside the 0..=2 encoding shared with the store.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("role value {0} is not a valid role")]
pub struct RoleError(pub i64);

/// A status integer that does not belong to the record kind it was read for.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{value} is not a valid {kind}")]
pub struct StatusError {
    pub kind: &'static str,
    pub value: i16,
}

/// A priority label outside `low | medium | high`.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown ticket priority '{0}'")]
pub struct PriorityError(pub String);
