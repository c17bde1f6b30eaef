use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

const TERMS: &str = "By using the client portal you agree that tickets, quotes and service \
notes are stored for as long as your account exists.";

/// Public Router Module
///
/// Endpoints any requester may call. Login and registration are public paths, but the
/// access gate still sends a requester who already holds a session to the dashboard.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Health check for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // GET /
        .route("/", get(|| async { "agency-portal" }))
        // GET /terms
        // Never intercepted by the access gate.
        .route("/terms", get(|| async { TERMS }))
        // POST /register
        // Client self-registration: provider sign-up, then a role 0 profile.
        .route("/register", post(handlers::register))
        // POST /login
        // Password sign-in; sets the session cookies.
        .route("/login", post(handlers::login))
        // POST /logout
        // Revokes the session and clears the cookies.
        .route("/logout", post(handlers::logout))
}
