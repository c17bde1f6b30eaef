use axum::{
    Router,
    extract::FromRef,
    http::{HeaderMap, HeaderName},
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access control: sessions, route classes, the gate and the role taxonomy.
pub mod auth;
pub mod classifier;
pub mod gate;
pub mod privilege_cache;
pub mod roles;

// Application services and components.
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Staff/Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{JwtSessionResolver, SessionState};
pub use classifier::RouteTable;
pub use config::AppConfig;
pub use gate::AccessGate;
pub use privilege_cache::{PrivilegeCache, PrivilegeContext};
pub use provider::{AuthProviderState, SupabaseAuthClient};
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the OpenAPI
/// document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::logout, handlers::get_me,
        handlers::update_me,
        handlers::get_dashboard, handlers::get_admin_stats, handlers::list_clients,
        handlers::invite_employee, handlers::list_tickets, handlers::create_ticket,
        handlers::get_ticket, handlers::post_message, handlers::update_ticket_status,
        handlers::reply_ticket, handlers::list_quotes, handlers::get_quote,
        handlers::create_quote, handlers::decide_quote, handlers::update_quote,
        handlers::list_services, handlers::get_service, handlers::create_service,
        handlers::update_service
    ),
    components(
        schemas(
            models::Profile, models::PartyRef, models::Ticket, models::TicketMessage,
            models::TicketWithClient, models::MessageWithSender, models::TicketDetail,
            models::TicketPriority, models::QuoteItem, models::Quote, models::QuoteDetail,
            models::Service, models::ServiceDetail, models::RegisterRequest,
            models::LoginRequest, models::LoginResponse, models::UpdateProfileRequest,
            models::CreateTicketRequest,
            models::PostMessageRequest, models::UpdateTicketStatusRequest,
            models::TicketReplyRequest, models::CreateQuoteRequest,
            models::QuoteDecisionRequest, models::UpdateQuoteRequest,
            models::CreateServiceRequest, models::UpdateServiceRequest,
            models::InviteEmployeeRequest, models::InviteResponse, models::MeResponse,
            models::ClientDashboardStats, models::AdminDashboardStats,
        )
    ),
    tags(
        (name = "agency-portal", description = "Client portal API: tickets, quotes and services")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container of shared services. Cloned per request; every field
/// is an `Arc` or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for profiles, tickets, quotes and services.
    pub repo: RepositoryState,
    /// Maps request credentials to a session.
    pub sessions: SessionState,
    /// The hosted auth service (sign-up, sign-in, sign-out, staff creation).
    pub provider: AuthProviderState,
    /// The access gate run in front of every intercepted request.
    pub gate: AccessGate,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the gate from the same resolver and repository the handlers use.
    pub fn new(
        repo: RepositoryState,
        sessions: SessionState,
        provider: AuthProviderState,
        config: AppConfig,
    ) -> Self {
        let gate = AccessGate::new(RouteTable::portal(), sessions.clone(), repo.clone(), &config);
        Self {
            repo,
            sessions,
            provider,
            gate,
            config,
        }
    }

    /// Starts a privilege cache for the session carried by `credentials`, bounded by the
    /// configured loading timeout.
    pub fn privilege_cache(&self, credentials: HeaderMap) -> PrivilegeCache {
        PrivilegeCache::spawn(
            self.sessions.clone(),
            self.repo.clone(),
            self.provider.clone(),
            credentials,
            self.config.auth_loading_timeout,
        )
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AuthProviderState {
    fn from_ref(app_state: &AppState) -> AuthProviderState {
        app_state.provider.clone()
    }
}

impl FromRef<AppState> for AccessGate {
    fn from_ref(app_state: &AppState) -> AccessGate {
        app_state.gate.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routers, installs the access gate in front of all of them and wraps the
/// result in the observability layers.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .merge(admin::staff_routes())
        .nest("/admin", admin::admin_routes())
        // The gate sees every path; `RouteTable::intercepts` decides which ones it skips.
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            gate::access_gate,
        ))
        .with_state(state);

    // 3. Observability and Correlation Layers (outermost)
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of one request carries its method, URI
/// and `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
