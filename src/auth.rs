use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::Identity,
    provider::{AuthProviderState, TokenPair},
    repository::RepositoryState,
    roles::Role,
};

pub const ACCESS_COOKIE: &str = "sb-access-token";
pub const REFRESH_COOKIE: &str = "sb-refresh-token";

// Refresh tokens outlive access tokens; the provider decides when they die.
const REFRESH_COOKIE_MAX_AGE: i64 = 60 * 60 * 24 * 30;

/// Claims
///
/// The payload of a GoTrue access token. Tokens are HS256-signed with the project's JWT
/// secret and carry `aud = "authenticated"` for signed-in users.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The identity id, equal to `profiles.id`.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub aud: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub email_verified: bool,
}

/// Session
///
/// A validated session: the identity plus the access token that proved it, so that
/// downstream calls (e.g. sign-out) can act on the caller's behalf.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
}

/// Resolution
///
/// Output of one session resolution: the session (if any) and every `Set-Cookie` value the
/// response must carry. Cookies are non-empty whenever tokens were rotated or cleared.
#[derive(Debug, Default)]
pub struct Resolution {
    pub session: Option<Session>,
    pub cookies: Vec<HeaderValue>,
}

impl Resolution {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// SessionResolver
///
/// Maps the credentials on an inbound request to a session. Implementations may call out
/// to the auth provider and must report any failure as an error, never as a session.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Resolution, AuthError>;
}

pub type SessionState = Arc<dyn SessionResolver>;

/// JwtSessionResolver
///
/// Validates access tokens locally against the JWT secret and falls back to the provider's
/// refresh grant when the access token is expired or missing but a refresh cookie is present.
pub struct JwtSessionResolver {
    decoding_key: DecodingKey,
    validation: Validation,
    provider: AuthProviderState,
    cookie_secure: bool,
}

impl JwtSessionResolver {
    pub fn new(jwt_secret: &str, provider: AuthProviderState, cookie_secure: bool) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_audience(&["authenticated"]);

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            provider,
            cookie_secure,
        }
    }

    fn decode_session(&self, token: &str) -> Result<Session, ErrorKind> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| e.into_kind())?;
        Ok(Session {
            identity: Identity {
                id: data.claims.sub,
                email: data.claims.email,
                email_verified: data.claims.user_metadata.email_verified,
            },
            access_token: token.to_string(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Resolution, AuthError> {
        match self.provider.refresh(refresh_token).await {
            Ok(pair) => {
                let session = self
                    .decode_session(&pair.access_token)
                    .map_err(|kind| AuthError::SessionInvalid(format!("{kind:?}")))?;
                tracing::debug!(user_id = %session.identity.id, "session refreshed");
                Ok(Resolution {
                    session: Some(session),
                    cookies: session_cookies(&pair, self.cookie_secure)?,
                })
            }
            // The provider said no: the refresh token is dead, so drop the cookies with it.
            Err(AuthError::Rejected { status, .. }) => {
                tracing::info!(status, "refresh token rejected, clearing session cookies");
                Ok(Resolution {
                    session: None,
                    cookies: clear_session_cookies(self.cookie_secure),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionResolver for JwtSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Resolution, AuthError> {
        // API clients send a bearer token; there is nothing to refresh for them.
        if let Some(token) = bearer_token(headers) {
            return self
                .decode_session(token)
                .map(|session| Resolution {
                    session: Some(session),
                    cookies: Vec::new(),
                })
                .map_err(|kind| AuthError::SessionInvalid(format!("{kind:?}")));
        }

        let access = read_cookie(headers, ACCESS_COOKIE);
        let refresh = read_cookie(headers, REFRESH_COOKIE);

        if let Some(token) = access.as_deref() {
            match self.decode_session(token) {
                Ok(session) => {
                    return Ok(Resolution {
                        session: Some(session),
                        cookies: Vec::new(),
                    });
                }
                Err(ErrorKind::ExpiredSignature) => {}
                Err(kind) => return Err(AuthError::SessionInvalid(format!("{kind:?}"))),
            }
        }

        match refresh.as_deref() {
            Some(refresh_token) => self.refresh(refresh_token).await,
            None => Ok(Resolution::anonymous()),
        }
    }
}

// --- Cookie Helpers ---

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reads one cookie across every `Cookie` header on the request.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn cookie(name: &str, value: &str, max_age: i64, secure: bool) -> Result<HeaderValue, AuthError> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{name}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax{secure}"
    ))
    .map_err(|_| AuthError::SessionInvalid(format!("token for {name} is not a valid header value")))
}

/// The pair of `Set-Cookie` values that persist a freshly issued session.
pub fn session_cookies(pair: &TokenPair, secure: bool) -> Result<Vec<HeaderValue>, AuthError> {
    Ok(vec![
        cookie(ACCESS_COOKIE, &pair.access_token, pair.expires_in, secure)?,
        cookie(REFRESH_COOKIE, &pair.refresh_token, REFRESH_COOKIE_MAX_AGE, secure)?,
    ])
}

/// Expires both session cookies.
pub fn clear_session_cookies(secure: bool) -> Vec<HeaderValue> {
    [ACCESS_COOKIE, REFRESH_COOKIE]
        .iter()
        .filter_map(|name| cookie(name, "", 0, secure).ok())
        .collect()
}

/// ResolvedRole
///
/// Request extension set by the access gate when it already looked up the caller's role
/// for a privileged route, so `AuthUser` does not query the store a second time.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRole(pub Role);

/// AuthUser
///
/// The authenticated caller as seen by handlers: identity id and role.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub session: Session,
}

/// AuthUser Extractor Implementation
///
/// Reads the `Session` the access gate placed in the request extensions and resolves the
/// role, either from the gate's own lookup or from the store. A failed role lookup yields
/// `Role::Client`, never an error and never a higher role.
///
/// Rejection: `401 Unauthorized` when no session is attached to the request.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let role = match parts.extensions.get::<ResolvedRole>() {
            Some(ResolvedRole(role)) => *role,
            None => {
                let repo = RepositoryState::from_ref(state);
                crate::gate::lookup_role(repo.as_ref(), session.identity.id).await
            }
        };

        Ok(AuthUser {
            id: session.identity.id,
            role,
            session,
        })
    }
}
