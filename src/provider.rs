use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{config::AppConfig, error::AuthError};

/// TokenPair
///
/// A freshly issued (or rotated) session from the auth provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    pub user: ProviderUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
}

/// AuthProvider
///
/// The contract with the hosted auth service (Supabase GoTrue). Everything the portal
/// needs from it goes through this trait so handlers and the session resolver can run
/// against an in-memory double in tests.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates an identity; `name` lands in the user metadata picked up by the
    /// profile-creation trigger. Returns the new identity id.
    async fn sign_up(&self, email: &str, password: &str, name: Option<&str>)
        -> Result<Uuid, AuthError>;

    /// Password grant.
    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenPair, AuthError>;

    /// Refresh-token grant. The provider rotates the refresh token on every call.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Revokes the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// Service-key user creation used by the staff invite flow. The account is created
    /// already confirmed.
    async fn create_user(&self, email: &str, password: &str, name: &str)
        -> Result<Uuid, AuthError>;
}

pub type AuthProviderState = Arc<dyn AuthProvider>;

/// SupabaseAuthClient
///
/// `AuthProvider` over GoTrue's REST API.
#[derive(Clone)]
pub struct SupabaseAuthClient {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    service_key: String,
}

// GoTrue answers sign-up with either the bare user (email confirmation on) or a
// session wrapping it (auto-confirm on).
#[derive(Deserialize)]
struct SignUpResponse {
    id: Option<Uuid>,
    user: Option<ProviderUser>,
}

impl SupabaseAuthClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_url: config.auth_url(),
            anon_key: config.supabase_anon_key.clone(),
            service_key: config.supabase_service_key.clone(),
        }
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<TokenPair, AuthError> {
        let response = self
            .http
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json::<TokenPair>().await?)
    }
}

/// Turns a non-2xx provider response into `AuthError::Rejected`, keeping the body for logs.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(AuthError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl AuthProvider for SupabaseAuthClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Uuid, AuthError> {
        let response = self
            .http
            .post(format!("{}/signup", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "name": name },
            }))
            .send()
            .await?;

        let body = ensure_success(response)
            .await?
            .json::<SignUpResponse>()
            .await?;

        body.id
            .or(body.user.map(|u| u.id))
            .ok_or_else(|| AuthError::SessionInvalid("sign-up response carried no user id".into()))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        ensure_success(response).await.map(|_| ())
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Uuid, AuthError> {
        let response = self
            .http
            .post(format!("{}/admin/users", self.auth_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "name": name },
            }))
            .send()
            .await?;

        let user = ensure_success(response)
            .await?
            .json::<ProviderUser>()
            .await?;
        Ok(user.id)
    }
}
