use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Every handler here takes an `AuthUser`, which only exists when the access gate attached
/// a session to the request. Clients see their own rows, staff see all of them.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PUT /me
        // The caller's profile; the owner may edit name and phone.
        .route("/me", get(handlers::get_me).put(handlers::update_me))
        // GET /dashboard
        // The caller's open tickets, pending quotes and services in development.
        .route("/dashboard", get(handlers::get_dashboard))
        // --- Tickets ---
        .route(
            "/tickets",
            get(handlers::list_tickets).post(handlers::create_ticket),
        )
        .route("/tickets/{id}", get(handlers::get_ticket))
        .route("/tickets/{id}/messages", post(handlers::post_message))
        // PUT /tickets/{id}/status
        // Staff only; checked in the handler since the path is merely protected.
        .route("/tickets/{id}/status", put(handlers::update_ticket_status))
        // --- Quotes ---
        .route("/quotes", get(handlers::list_quotes))
        .route(
            "/quotes/{id}",
            get(handlers::get_quote).put(handlers::update_quote),
        )
        // POST /quotes/{id}/decision
        // The recipient approves or rejects while the quote is pending.
        .route("/quotes/{id}/decision", post(handlers::decide_quote))
        // --- Services ---
        .route("/services", get(handlers::list_services))
        .route(
            "/services/{id}",
            get(handlers::get_service).put(handlers::update_service),
        )
}
