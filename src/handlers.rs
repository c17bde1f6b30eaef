use crate::{
    AppState,
    auth::{AuthUser, Session, clear_session_cookies, session_cookies},
    error::{AuthError, LookupError},
    models::{
        AdminDashboardStats, ClientDashboardStats, CreateQuoteRequest, CreateServiceRequest,
        CreateTicketRequest, InviteEmployeeRequest, InviteResponse, LoginRequest, LoginResponse,
        MeResponse, PostMessageRequest, Profile, Quote, QuoteDecisionRequest, QuoteDetail,
        QuoteStatus, RegisterRequest, Service, ServiceDetail, Ticket, TicketDetail,
        TicketMessage, TicketReplyRequest, TicketStatus, TicketWithClient, UpdateProfileRequest,
        UpdateQuoteRequest, UpdateServiceRequest, UpdateTicketStatusRequest,
    },
    repository::Visibility,
    roles::Role,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;

// --- Helpers ---

/// Staff-only guard used by handlers whose path the access gate only treats as protected.
fn require_staff(role: Role) -> Result<(), StatusCode> {
    if role.is_employee() {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

fn cookie_headers(cookies: Vec<HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
    headers
}

/// Provider rejections are the caller's fault (bad credentials, taken email); anything
/// else means we could not reach the provider.
fn provider_status(error: &AuthError, rejected: StatusCode) -> StatusCode {
    match error {
        AuthError::Rejected { .. } => rejected,
        AuthError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
        AuthError::SessionInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

// --- Session Handlers ---

/// register
///
/// [Public Route] Client self-registration. Creates the identity at the provider, then the
/// matching `profiles` row. New accounts are always clients; staff accounts only come from
/// the invite flow.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = Profile),
        (status = 400, description = "Rejected by the auth provider")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Profile>), StatusCode> {
    if is_blank(&payload.email) || payload.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let id = state
        .provider
        .sign_up(&payload.email, &payload.password, payload.name.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "sign-up failed");
            provider_status(&e, StatusCode::BAD_REQUEST)
        })?;

    let profile = state
        .repo
        .create_profile(
            id,
            &payload.email,
            payload.name.as_deref(),
            payload.phone.as_deref(),
        )
        .await
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %id, "client registered");
    Ok((StatusCode::CREATED, Json(profile)))
}

/// login
///
/// [Public Route] Password sign-in. On success the session cookies are set and the body
/// tells the UI where to go next.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let pair = state
        .provider
        .sign_in(&payload.email, &payload.password)
        .await
        .map_err(|e| {
            tracing::info!(error = %e, "sign-in failed");
            provider_status(&e, StatusCode::UNAUTHORIZED)
        })?;

    let cookies = session_cookies(&pair, state.config.cookie_secure)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        cookie_headers(cookies),
        Json(LoginResponse {
            user_id: pair.user.id,
            redirect_to: state.config.home_path.clone(),
        }),
    ))
}

/// logout
///
/// [Public Route] Revokes the session at the provider (when there is one) and always clears
/// the session cookies.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(
    State(state): State<AppState>,
    session: Option<Extension<Session>>,
) -> impl IntoResponse {
    if let Some(Extension(session)) = session {
        if let Err(e) = state.provider.sign_out(&session.access_token).await {
            tracing::warn!(user_id = %session.identity.id, error = %e, "provider sign-out failed");
        }
    }
    (
        StatusCode::NO_CONTENT,
        cookie_headers(clear_session_cookies(state.config.cookie_secure)),
    )
}

/// get_me
///
/// [Authenticated Route] The caller's profile with the derived privilege booleans.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile", body = MeResponse),
        (status = 404, description = "No profile for this identity")
    )
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MeResponse>, StatusCode> {
    match state.repo.get_profile(id).await {
        Some(profile) => Ok(Json(MeResponse::from(profile))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// update_me
///
/// [Authenticated Route] The owner edits their own name and phone. Roles only change
/// through the invite flow.
#[utoipa::path(
    put,
    path = "/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated", body = MeResponse),
        (status = 404, description = "No profile for this identity")
    )
)]
pub async fn update_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<MeResponse>, StatusCode> {
    match state.repo.update_profile(id, payload).await {
        Some(profile) => Ok(Json(MeResponse::from(profile))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// --- Dashboards ---

/// get_dashboard
///
/// [Authenticated Route] The caller's own counters.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses((status = 200, description = "Client dashboard", body = ClientDashboardStats))
)]
pub async fn get_dashboard(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Json<ClientDashboardStats> {
    Json(state.repo.client_stats(id).await)
}

/// get_admin_stats
///
/// [Staff Route] Agency-wide counters.
#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Admin dashboard", body = AdminDashboardStats),
        (status = 403, description = "Not staff")
    )
)]
pub async fn get_admin_stats(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AdminDashboardStats>, StatusCode> {
    require_staff(role)?;
    Ok(Json(state.repo.admin_stats().await))
}

/// list_clients
///
/// [Staff Route] Every profile, newest first.
#[utoipa::path(
    get,
    path = "/clients",
    responses((status = 200, description = "Profiles", body = [Profile]))
)]
pub async fn list_clients(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Profile>>, StatusCode> {
    require_staff(role)?;
    Ok(Json(state.repo.list_profiles().await))
}

/// invite_employee
///
/// [Admin Route] Creates a confirmed staff account with the service key and promotes its
/// profile. Only admins may invite, and only to the employee or admin role.
///
/// The identity exists once the provider call succeeds; a failed promotion afterwards is
/// logged at error level and the account is left as a client.
#[utoipa::path(
    post,
    path = "/admin/invite-employee",
    request_body = InviteEmployeeRequest,
    responses(
        (status = 201, description = "Invited", body = InviteResponse),
        (status = 400, description = "Incomplete data or invalid role"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn invite_employee(
    AuthUser { id: inviter, role, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<InviteEmployeeRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), StatusCode> {
    if !role.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }
    if is_blank(&payload.email)
        || payload.password.is_empty()
        || is_blank(&payload.name)
        || !payload.role.is_employee()
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = state
        .provider
        .create_user(&payload.email, &payload.password, &payload.name)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "staff account creation failed");
            provider_status(&e, StatusCode::BAD_REQUEST)
        })?;

    // The sign-up trigger normally creates the profile; make sure it exists before promoting.
    if state
        .repo
        .create_profile(user_id, &payload.email, Some(&payload.name), None)
        .await
        .is_none()
    {
        tracing::warn!(%user_id, "staff profile could not be created before promotion");
    }

    if !state.repo.set_role(user_id, payload.role).await {
        tracing::error!(
            %user_id,
            role = %payload.role,
            "staff account created but role update failed"
        );
    }

    tracing::info!(%inviter, %user_id, role = %payload.role, "staff account invited");
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            user_id,
            message: format!("{} invited as {}", payload.name, payload.role.label()),
        }),
    ))
}

// --- Tickets ---

/// list_tickets
///
/// [Authenticated Route] Staff see every ticket; clients only their own.
#[utoipa::path(
    get,
    path = "/tickets",
    responses((status = 200, description = "Tickets", body = [TicketWithClient]))
)]
pub async fn list_tickets(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Json<Vec<TicketWithClient>> {
    Json(state.repo.list_tickets(Visibility::for_caller(id, role)).await)
}

/// create_ticket
///
/// [Authenticated Route] A client opens a ticket. It always starts out open.
#[utoipa::path(
    post,
    path = "/tickets",
    request_body = CreateTicketRequest,
    responses(
        (status = 201, description = "Opened", body = Ticket),
        (status = 403, description = "Only clients open tickets")
    )
)]
pub async fn create_ticket(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), StatusCode> {
    if !role.is_client() {
        return Err(StatusCode::FORBIDDEN);
    }
    if is_blank(&payload.title) {
        return Err(StatusCode::BAD_REQUEST);
    }
    match state.repo.create_ticket(id, payload).await {
        Some(ticket) => Ok((StatusCode::CREATED, Json(ticket))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// get_ticket
///
/// [Authenticated Route] A ticket with its conversation. A ticket outside the caller's
/// visibility is indistinguishable from a missing one.
#[utoipa::path(
    get,
    path = "/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Found", body = TicketDetail),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_ticket(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketDetail>, StatusCode> {
    let ticket = state
        .repo
        .get_ticket(id, Visibility::for_caller(caller, role))
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let messages = state.repo.list_messages(id).await;
    Ok(Json(TicketDetail { ticket, messages }))
}

/// post_message
///
/// [Authenticated Route] Adds a message to a ticket the caller can see.
#[utoipa::path(
    post,
    path = "/tickets/{id}/messages",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Posted", body = TicketMessage),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_message(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<TicketMessage>), StatusCode> {
    if is_blank(&payload.body) {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .repo
        .get_ticket(id, Visibility::for_caller(caller, role))
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    match state.repo.add_message(id, caller, &payload.body).await {
        Some(message) => Ok((StatusCode::CREATED, Json(message))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// update_ticket_status
///
/// [Staff Route] Moves a ticket between open, in progress and closed.
#[utoipa::path(
    put,
    path = "/tickets/{id}/status",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = UpdateTicketStatusRequest,
    responses(
        (status = 200, description = "Updated", body = Ticket),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_ticket_status(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTicketStatusRequest>,
) -> Result<Json<Ticket>, StatusCode> {
    require_staff(role)?;
    match state.repo.set_ticket_status(id, payload.status).await {
        Some(ticket) => Ok(Json(ticket)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// reply_ticket
///
/// [Staff Route] Staff answer to a ticket. Unless an explicit status is given, answering
/// an open ticket puts it in progress.
#[utoipa::path(
    post,
    path = "/tickets/reply/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = TicketReplyRequest,
    responses(
        (status = 201, description = "Replied", body = TicketMessage),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn reply_ticket(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TicketReplyRequest>,
) -> Result<(StatusCode, Json<TicketMessage>), StatusCode> {
    require_staff(role)?;
    if is_blank(&payload.body) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let current = state
        .repo
        .get_ticket(id, Visibility::All)
        .await
        .ok_or(StatusCode::NOT_FOUND)?
        .ticket
        .status;

    let message = state
        .repo
        .add_message(id, caller, &payload.body)
        .await
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let next = payload.status.unwrap_or(match current {
        TicketStatus::Open => TicketStatus::InProgress,
        other => other,
    });
    if next != current && state.repo.set_ticket_status(id, next).await.is_none() {
        tracing::warn!(ticket_id = %id, ?next, "reply posted but status change failed");
    }

    Ok((StatusCode::CREATED, Json(message)))
}

// --- Quotes ---

/// list_quotes
///
/// [Authenticated Route] Staff see every quote; clients only the ones addressed to them.
#[utoipa::path(
    get,
    path = "/quotes",
    responses((status = 200, description = "Quotes", body = [QuoteDetail]))
)]
pub async fn list_quotes(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Json<Vec<QuoteDetail>> {
    Json(state.repo.list_quotes(Visibility::for_caller(id, role)).await)
}

#[utoipa::path(
    get,
    path = "/quotes/{id}",
    params(("id" = Uuid, Path, description = "Quote ID")),
    responses(
        (status = 200, description = "Found", body = QuoteDetail),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_quote(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuoteDetail>, StatusCode> {
    match state
        .repo
        .get_quote(id, Visibility::for_caller(caller, role))
        .await
    {
        Some(quote) => Ok(Json(quote)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// create_quote
///
/// [Staff Route] Issues a pending quote to a client. The total is always computed from the
/// line items; the recipient must hold the client role.
#[utoipa::path(
    post,
    path = "/quotes/new",
    request_body = CreateQuoteRequest,
    responses(
        (status = 201, description = "Issued", body = Quote),
        (status = 400, description = "Invalid items or recipient is not a client"),
        (status = 403, description = "Not staff")
    )
)]
pub async fn create_quote(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<Quote>), StatusCode> {
    require_staff(role)?;
    if is_blank(&payload.title)
        || payload.items.is_empty()
        || payload
            .items
            .iter()
            .any(|item| item.quantity == 0 || !item.unit_price.is_finite() || item.unit_price < 0.0)
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.repo.fetch_role(payload.client_id).await {
        Ok(Role::Client) => {}
        Ok(_) | Err(LookupError::ProfileNotFound(_)) => return Err(StatusCode::BAD_REQUEST),
        Err(e) => {
            tracing::error!(error = %e, "recipient lookup failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let total = payload.items.iter().map(|item| item.subtotal()).sum();
    match state.repo.create_quote(caller, payload, total).await {
        Some(quote) => Ok((StatusCode::CREATED, Json(quote))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// decide_quote
///
/// [Authenticated Route] The recipient approves or rejects a pending quote. Decisions are
/// final: a quote that already left `pending` answers 409.
#[utoipa::path(
    post,
    path = "/quotes/{id}/decision",
    params(("id" = Uuid, Path, description = "Quote ID")),
    request_body = QuoteDecisionRequest,
    responses(
        (status = 200, description = "Decided", body = Quote),
        (status = 403, description = "Not a client"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Quote is no longer pending")
    )
)]
pub async fn decide_quote(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuoteDecisionRequest>,
) -> Result<Json<Quote>, StatusCode> {
    if !role.is_client() {
        return Err(StatusCode::FORBIDDEN);
    }
    let detail = state
        .repo
        .get_quote(id, Visibility::OwnedBy(caller))
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    if detail.quote.status != QuoteStatus::Pending {
        return Err(StatusCode::CONFLICT);
    }

    let decision = if payload.approve {
        QuoteStatus::Approved
    } else {
        QuoteStatus::Rejected
    };
    // Another decision can land between the read above and this write.
    match state.repo.decide_quote(id, caller, decision).await {
        Some(quote) => Ok(Json(quote)),
        None => Err(StatusCode::CONFLICT),
    }
}

#[utoipa::path(
    put,
    path = "/quotes/{id}",
    params(("id" = Uuid, Path, description = "Quote ID")),
    request_body = UpdateQuoteRequest,
    responses(
        (status = 200, description = "Updated", body = Quote),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_quote(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateQuoteRequest>,
) -> Result<Json<Quote>, StatusCode> {
    require_staff(role)?;
    match state.repo.update_quote(id, payload.status, payload.notes).await {
        Some(quote) => Ok(Json(quote)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// --- Services ---

#[utoipa::path(
    get,
    path = "/services",
    responses((status = 200, description = "Services", body = [ServiceDetail]))
)]
pub async fn list_services(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Json<Vec<ServiceDetail>> {
    Json(state.repo.list_services(Visibility::for_caller(id, role)).await)
}

#[utoipa::path(
    get,
    path = "/services/{id}",
    params(("id" = Uuid, Path, description = "Service ID")),
    responses(
        (status = 200, description = "Found", body = ServiceDetail),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_service(
    AuthUser { id: caller, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceDetail>, StatusCode> {
    match state
        .repo
        .get_service(id, Visibility::for_caller(caller, role))
        .await
    {
        Some(service) => Ok(Json(service)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// create_service
///
/// [Staff Route] Starts a service for a client. When it is linked to a quote, that quote
/// must belong to the same client and be approved.
#[utoipa::path(
    post,
    path = "/services/new",
    request_body = CreateServiceRequest,
    responses(
        (status = 201, description = "Created", body = Service),
        (status = 400, description = "Invalid data or unknown quote"),
        (status = 403, description = "Not staff"),
        (status = 409, description = "Linked quote is not approved")
    )
)]
pub async fn create_service(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), StatusCode> {
    require_staff(role)?;
    if is_blank(&payload.name) {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Some(quote_id) = payload.quote_id {
        let quote = state
            .repo
            .get_quote(quote_id, Visibility::All)
            .await
            .ok_or(StatusCode::BAD_REQUEST)?
            .quote;
        if quote.client_id != payload.client_id {
            return Err(StatusCode::BAD_REQUEST);
        }
        if quote.status != QuoteStatus::Approved {
            return Err(StatusCode::CONFLICT);
        }
    }

    match state.repo.create_service(payload).await {
        Some(service) => Ok((StatusCode::CREATED, Json(service))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[utoipa::path(
    put,
    path = "/services/{id}",
    params(("id" = Uuid, Path, description = "Service ID")),
    request_body = UpdateServiceRequest,
    responses(
        (status = 200, description = "Updated", body = Service),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_service(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, StatusCode> {
    require_staff(role)?;
    match state.repo.update_service(id, payload).await {
        Some(service) => Ok(Json(service)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
