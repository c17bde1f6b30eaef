use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{Resolution, ResolvedRole, Session, SessionState},
    classifier::{RouteClass, RouteTable},
    config::AppConfig,
    error::LookupError,
    repository::{Repository, RepositoryState},
    roles::Role,
};

/// AccessDecision
///
/// The gate's verdict for one request. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    RedirectLogin,
    RedirectHome,
}

/// GateOutcome
///
/// Everything the middleware needs to finish the request: the decision, the session and
/// role the gate resolved on the way, and the cookies to write back regardless of the
/// decision.
#[derive(Debug)]
pub struct GateOutcome {
    pub decision: AccessDecision,
    pub session: Option<Session>,
    pub role: Option<Role>,
    pub cookies: Vec<HeaderValue>,
}

/// Privilege lookup with the gate's failure policy applied: a missing profile or a failed
/// query both read as `Role::Client`.
pub async fn lookup_role(repo: &dyn Repository, id: Uuid) -> Role {
    match repo.fetch_role(id).await {
        Ok(role) => role,
        Err(LookupError::ProfileNotFound(id)) => {
            tracing::warn!(user_id = %id, "no profile for session, treating as client");
            Role::Client
        }
        Err(e) => {
            tracing::warn!(user_id = %id, error = %e, "role lookup failed, treating as client");
            Role::Client
        }
    }
}

/// AccessGate
///
/// Composes session resolution, route classification and privilege lookup. Holds only
/// shared read-only state, so one instance serves every request concurrently.
#[derive(Clone)]
pub struct AccessGate {
    routes: Arc<RouteTable>,
    sessions: SessionState,
    repo: RepositoryState,
    login_path: String,
    home_path: String,
}

impl AccessGate {
    pub fn new(
        routes: RouteTable,
        sessions: SessionState,
        repo: RepositoryState,
        config: &AppConfig,
    ) -> Self {
        Self {
            routes: Arc::new(routes),
            sessions,
            repo,
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// evaluate
    ///
    /// Runs the gate for one request. The session is always resolved first, even on public
    /// paths, so rotated tokens reach the browser. Neither lookup can fail this call: a
    /// resolver error means anonymous, a role lookup error means client.
    pub async fn evaluate(&self, path: &str, headers: &HeaderMap) -> GateOutcome {
        let Resolution { session, cookies } = match self.sessions.resolve(headers).await {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(
                    path,
                    error = %e,
                    "session resolution failed, treating as anonymous"
                );
                Resolution::anonymous()
            }
        };

        let class = self.routes.classify(path);
        let mut role = None;

        let decision = match (&session, class) {
            (None, class) if class.requires_session() => AccessDecision::RedirectLogin,
            (Some(s), RouteClass::Privileged) => {
                let resolved = lookup_role(self.repo.as_ref(), s.identity.id).await;
                role = Some(resolved);
                if resolved.is_employee() {
                    AccessDecision::Allow
                } else {
                    AccessDecision::RedirectHome
                }
            }
            (Some(_), _) if self.routes.is_auth_form(path) => AccessDecision::RedirectHome,
            _ => AccessDecision::Allow,
        };

        tracing::debug!(path, ?class, ?decision, "access gate decision");

        GateOutcome {
            decision,
            session,
            role,
            cookies,
        }
    }

    /// Where a redirect decision sends the browser.
    pub fn redirect_target(&self, decision: AccessDecision) -> Option<&str> {
        match decision {
            AccessDecision::Allow => None,
            AccessDecision::RedirectLogin => Some(&self.login_path),
            AccessDecision::RedirectHome => Some(&self.home_path),
        }
    }
}

/// access_gate
///
/// The middleware installed in front of the whole router. On `Allow` the resolved session
/// (and role, when looked up) travel to the handlers as request extensions. Refreshed
/// cookies are appended to every response the gate touches, redirects included.
pub async fn access_gate(
    State(gate): State<AccessGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !gate.routes().intercepts(&path) {
        return next.run(request).await;
    }

    let GateOutcome {
        decision,
        session,
        role,
        cookies,
    } = gate.evaluate(&path, request.headers()).await;

    let mut response = match gate.redirect_target(decision) {
        Some(target) => Redirect::to(target).into_response(),
        None => {
            if let Some(session) = session {
                request.extensions_mut().insert(session);
            }
            if let Some(role) = role {
                request.extensions_mut().insert(ResolvedRole(role));
            }
            next.run(request).await
        }
    };

    let headers = response.headers_mut();
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
    response
}
