use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Staff Router Module
///
/// Paths the access gate classifies as privileged: a client reaching any of them is
/// redirected to the dashboard before a handler runs. Handlers check the role again.
pub fn staff_routes() -> Router<AppState> {
    Router::new()
        // GET /clients
        .route("/clients", get(handlers::list_clients))
        // POST /tickets/reply/{id}
        // Staff answer; moves an open ticket to in progress.
        .route("/tickets/reply/{id}", post(handlers::reply_ticket))
        // POST /quotes/new
        .route("/quotes/new", post(handlers::create_quote))
        // POST /services/new
        // A linked quote must be approved.
        .route("/services/new", post(handlers::create_service))
}

/// Admin Router Module
///
/// Nested under `/admin`. Any staff member may read the dashboard; inviting staff is
/// reserved for admins.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin
        .route("/", get(handlers::get_admin_stats))
        // POST /admin/invite-employee
        .route("/invite-employee", post(handlers::invite_employee))
}
