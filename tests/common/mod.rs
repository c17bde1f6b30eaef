#![allow(dead_code)]

use agency_portal::{
    AppState,
    auth::{Claims, JwtSessionResolver, SessionState, UserMetadata},
    config::AppConfig,
    error::{AuthError, LookupError},
    models::{
        AdminDashboardStats, ClientDashboardStats, CreateQuoteRequest, CreateServiceRequest,
        CreateTicketRequest, MessageWithSender, PartyRef, Profile, Quote, QuoteDetail,
        QuoteStatus, Service, ServiceDetail, ServiceStatus, Ticket, TicketMessage, TicketStatus,
        TicketWithClient, UpdateProfileRequest, UpdateServiceRequest,
    },
    provider::{AuthProvider, AuthProviderState, ProviderUser, TokenPair},
    repository::{Repository, RepositoryState, Visibility},
    roles::Role,
};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

// --- Tokens ---

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as usize
}

/// Mints an HS256 access token the way GoTrue would.
pub fn mint_token(secret: &str, sub: Uuid, ttl_secs: i64, aud: &str) -> String {
    let iat = now();
    let exp = (iat as i64 + ttl_secs).max(0) as usize;
    let claims = Claims {
        sub,
        exp,
        iat,
        aud: aud.to_string(),
        email: Some(format!("{sub}@portal.test")),
        user_metadata: UserMetadata {
            email_verified: true,
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encoding")
}

/// A valid token for `sub` signed with the default test secret.
pub fn access_token(sub: Uuid) -> String {
    mint_token(&AppConfig::default().jwt_secret, sub, 3600, "authenticated")
}

/// Well past the validator's leeway.
pub fn expired_token(sub: Uuid) -> String {
    mint_token(&AppConfig::default().jwt_secret, sub, -3600, "authenticated")
}

pub fn refresh_token_for(sub: Uuid) -> String {
    format!("refresh-{sub}")
}

// --- Mock Auth Provider ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderMode {
    #[default]
    Accept,
    /// The provider answers with a 4xx.
    Reject,
    /// Anything other than a clean rejection.
    Broken,
}

#[derive(Default)]
pub struct MockProvider {
    pub mode: ProviderMode,
    /// Id handed out by sign-up, sign-in and staff creation.
    pub next_user: Uuid,
    pub refreshes: AtomicUsize,
    pub sign_outs: Mutex<Vec<String>>,
    pub created_users: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    pub fn new(mode: ProviderMode) -> Self {
        Self {
            mode,
            next_user: Uuid::new_v4(),
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), AuthError> {
        match self.mode {
            ProviderMode::Accept => Ok(()),
            ProviderMode::Reject => Err(AuthError::Rejected {
                status: 400,
                message: "invalid_grant".to_string(),
            }),
            ProviderMode::Broken => Err(AuthError::SessionInvalid("provider broken".to_string())),
        }
    }

    fn pair_for(&self, id: Uuid) -> TokenPair {
        TokenPair {
            access_token: access_token(id),
            refresh_token: format!("{}-rotated", refresh_token_for(id)),
            expires_in: 3600,
            user: ProviderUser { id },
        }
    }
}

#[async_trait]
impl AuthProvider for MockProvider {
    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _name: Option<&str>,
    ) -> Result<Uuid, AuthError> {
        self.check()?;
        Ok(self.next_user)
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<TokenPair, AuthError> {
        self.check()?;
        Ok(self.pair_for(self.next_user))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let id = refresh_token
            .strip_prefix("refresh-")
            .and_then(|rest| Uuid::parse_str(&rest[..36.min(rest.len())]).ok())
            .ok_or_else(|| AuthError::Rejected {
                status: 400,
                message: "unknown refresh token".to_string(),
            })?;
        Ok(self.pair_for(id))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.sign_outs.lock().unwrap().push(access_token.to_string());
        self.check()
    }

    async fn create_user(
        &self,
        email: &str,
        _password: &str,
        name: &str,
    ) -> Result<Uuid, AuthError> {
        self.check()?;
        self.created_users
            .lock()
            .unwrap()
            .push((email.to_string(), name.to_string()));
        Ok(self.next_user)
    }
}

// --- Mock Repository ---

/// In-memory store. Behaves like the Postgres implementation for the rules handlers rely
/// on (visibility scope, pending-only decisions, role never touched by profile creation).
#[derive(Default)]
pub struct MockRepo {
    pub profiles: Mutex<HashMap<Uuid, Profile>>,
    pub tickets: Mutex<Vec<Ticket>>,
    pub messages: Mutex<Vec<TicketMessage>>,
    pub quotes: Mutex<Vec<Quote>>,
    pub services: Mutex<Vec<Service>>,
    /// `fetch_role` fails with a query error.
    pub role_query_fails: bool,
    /// `set_role` reports failure.
    pub set_role_fails: bool,
    /// `create_profile` reports failure.
    pub create_profile_fails: bool,
    /// `get_profile` never completes.
    pub profile_lookup_stalls: bool,
    pub role_lookups: AtomicUsize,
}

impl MockRepo {
    pub fn with_profile(self, id: Uuid, role: Role) -> Self {
        self.profiles.lock().unwrap().insert(id, profile(id, role));
        self
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        self.tickets.lock().unwrap().push(ticket);
        self
    }

    pub fn with_quote(self, quote: Quote) -> Self {
        self.quotes.lock().unwrap().push(quote);
        self
    }

    pub fn role_of(&self, id: Uuid) -> Option<Role> {
        self.profiles.lock().unwrap().get(&id).map(|p| p.role)
    }

    pub fn ticket(&self, id: Uuid) -> Option<Ticket> {
        self.tickets.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    fn party(&self, id: Uuid) -> PartyRef {
        self.profiles
            .lock()
            .unwrap()
            .get(&id)
            .map(|p| PartyRef {
                id,
                name: p.name.clone(),
                email: p.email.clone(),
            })
            .unwrap_or(PartyRef {
                id,
                ..Default::default()
            })
    }

    fn quote_detail(&self, quote: Quote) -> QuoteDetail {
        let creator_name = quote
            .created_by
            .and_then(|id| self.profiles.lock().unwrap().get(&id).and_then(|p| p.name.clone()));
        QuoteDetail {
            client: self.party(quote.client_id),
            creator_name,
            quote,
        }
    }

    fn service_detail(&self, service: Service) -> ServiceDetail {
        let quote_title = service.quote_id.and_then(|qid| {
            self.quotes
                .lock()
                .unwrap()
                .iter()
                .find(|q| q.id == qid)
                .map(|q| q.title.clone())
        });
        ServiceDetail {
            client: self.party(service.client_id),
            quote_title,
            service,
        }
    }
}

pub fn profile(id: Uuid, role: Role) -> Profile {
    Profile {
        id,
        name: Some(format!("{} {}", role.label(), &id.to_string()[..8])),
        email: format!("{id}@portal.test"),
        phone: None,
        role,
        created_at: Utc::now(),
    }
}

pub fn ticket(client_id: Uuid, status: TicketStatus) -> Ticket {
    Ticket {
        id: Uuid::new_v4(),
        client_id,
        title: "Site is down".to_string(),
        description: Some("Since this morning".to_string()),
        status,
        created_at: Utc::now(),
        ..Default::default()
    }
}

pub fn quote(client_id: Uuid, status: QuoteStatus) -> Quote {
    Quote {
        id: Uuid::new_v4(),
        client_id,
        title: "Landing page".to_string(),
        status,
        total: 1200.0,
        created_at: Utc::now(),
        ..Default::default()
    }
}

#[async_trait]
impl Repository for MockRepo {
    async fn fetch_role(&self, id: Uuid) -> Result<Role, LookupError> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        if self.role_query_fails {
            return Err(LookupError::ProfileQuery(sqlx::Error::PoolTimedOut));
        }
        self.role_of(id).ok_or(LookupError::ProfileNotFound(id))
    }

    async fn get_profile(&self, id: Uuid) -> Option<Profile> {
        if self.profile_lookup_stalls {
            std::future::pending::<()>().await;
        }
        self.profiles.lock().unwrap().get(&id).cloned()
    }

    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Option<Profile> {
        if self.create_profile_fails {
            return None;
        }
        let mut profiles = self.profiles.lock().unwrap();
        let entry = profiles.entry(id).or_insert_with(|| Profile {
            id,
            name: None,
            email: email.to_string(),
            phone: None,
            role: Role::Client,
            created_at: Utc::now(),
        });
        if entry.name.is_none() {
            entry.name = name.map(str::to_string);
        }
        if entry.phone.is_none() {
            entry.phone = phone.map(str::to_string);
        }
        Some(entry.clone())
    }

    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> Option<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(&id)?;
        if req.name.is_some() {
            profile.name = req.name;
        }
        if req.phone.is_some() {
            profile.phone = req.phone;
        }
        Some(profile.clone())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> bool {
        if self.set_role_fails {
            return false;
        }
        match self.profiles.lock().unwrap().get_mut(&id) {
            Some(p) => {
                p.role = role;
                true
            }
            None => false,
        }
    }

    async fn list_profiles(&self) -> Vec<Profile> {
        self.profiles.lock().unwrap().values().cloned().collect()
    }

    async fn client_stats(&self, client_id: Uuid) -> ClientDashboardStats {
        ClientDashboardStats {
            open_tickets: self
                .tickets
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.client_id == client_id && t.status == TicketStatus::Open)
                .count() as i64,
            pending_quotes: self
                .quotes
                .lock()
                .unwrap()
                .iter()
                .filter(|q| q.client_id == client_id && q.status == QuoteStatus::Pending)
                .count() as i64,
            services_in_development: self
                .services
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.client_id == client_id && s.status == ServiceStatus::InDevelopment)
                .count() as i64,
        }
    }

    async fn admin_stats(&self) -> AdminDashboardStats {
        AdminDashboardStats {
            total_clients: self
                .profiles
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.role.is_client())
                .count() as i64,
            tickets_in_progress: self
                .tickets
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.status == TicketStatus::InProgress)
                .count() as i64,
            pending_quotes: self
                .quotes
                .lock()
                .unwrap()
                .iter()
                .filter(|q| q.status == QuoteStatus::Pending)
                .count() as i64,
            services_in_development: self
                .services
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.status == ServiceStatus::InDevelopment)
                .count() as i64,
        }
    }

    async fn list_tickets(&self, scope: Visibility) -> Vec<TicketWithClient> {
        let tickets: Vec<Ticket> = self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .filter(|t| scope.permits(t.client_id))
            .cloned()
            .collect();
        tickets
            .into_iter()
            .map(|ticket| TicketWithClient {
                client: self.party(ticket.client_id),
                ticket,
            })
            .collect()
    }

    async fn get_ticket(&self, id: Uuid, scope: Visibility) -> Option<TicketWithClient> {
        let ticket = self.ticket(id).filter(|t| scope.permits(t.client_id))?;
        Some(TicketWithClient {
            client: self.party(ticket.client_id),
            ticket,
        })
    }

    async fn create_ticket(&self, client_id: Uuid, req: CreateTicketRequest) -> Option<Ticket> {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            client_id,
            title: req.title,
            description: req.description,
            status: TicketStatus::Open,
            priority: req.priority,
            created_at: Utc::now(),
        };
        self.tickets.lock().unwrap().push(ticket.clone());
        Some(ticket)
    }

    async fn set_ticket_status(&self, id: Uuid, status: TicketStatus) -> Option<Ticket> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets.iter_mut().find(|t| t.id == id)?;
        ticket.status = status;
        Some(ticket.clone())
    }

    async fn list_messages(&self, ticket_id: Uuid) -> Vec<MessageWithSender> {
        let messages: Vec<TicketMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.ticket_id == ticket_id)
            .cloned()
            .collect();
        messages
            .into_iter()
            .map(|message| MessageWithSender {
                sender: self.party(message.sender_id),
                message,
            })
            .collect()
    }

    async fn add_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Option<TicketMessage> {
        let message = TicketMessage {
            id: Uuid::new_v4(),
            ticket_id,
            sender_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Some(message)
    }

    async fn list_quotes(&self, scope: Visibility) -> Vec<QuoteDetail> {
        let quotes: Vec<Quote> = self
            .quotes
            .lock()
            .unwrap()
            .iter()
            .filter(|q| scope.permits(q.client_id))
            .cloned()
            .collect();
        quotes.into_iter().map(|q| self.quote_detail(q)).collect()
    }

    async fn get_quote(&self, id: Uuid, scope: Visibility) -> Option<QuoteDetail> {
        let quote = self
            .quotes
            .lock()
            .unwrap()
            .iter()
            .find(|q| q.id == id && scope.permits(q.client_id))
            .cloned()?;
        Some(self.quote_detail(quote))
    }

    async fn create_quote(
        &self,
        created_by: Uuid,
        req: CreateQuoteRequest,
        total: f64,
    ) -> Option<Quote> {
        let quote = Quote {
            id: Uuid::new_v4(),
            client_id: req.client_id,
            title: req.title,
            items: req.items,
            status: QuoteStatus::Pending,
            total,
            created_by: Some(created_by),
            notes: req.notes,
            created_at: Utc::now(),
        };
        self.quotes.lock().unwrap().push(quote.clone());
        Some(quote)
    }

    async fn decide_quote(&self, id: Uuid, client_id: Uuid, status: QuoteStatus) -> Option<Quote> {
        let mut quotes = self.quotes.lock().unwrap();
        let quote = quotes.iter_mut().find(|q| {
            q.id == id && q.client_id == client_id && q.status == QuoteStatus::Pending
        })?;
        quote.status = status;
        Some(quote.clone())
    }

    async fn update_quote(
        &self,
        id: Uuid,
        status: Option<QuoteStatus>,
        notes: Option<String>,
    ) -> Option<Quote> {
        let mut quotes = self.quotes.lock().unwrap();
        let quote = quotes.iter_mut().find(|q| q.id == id)?;
        if let Some(status) = status {
            quote.status = status;
        }
        if notes.is_some() {
            quote.notes = notes;
        }
        Some(quote.clone())
    }

    async fn list_services(&self, scope: Visibility) -> Vec<ServiceDetail> {
        let services: Vec<Service> = self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|s| scope.permits(s.client_id))
            .cloned()
            .collect();
        services.into_iter().map(|s| self.service_detail(s)).collect()
    }

    async fn get_service(&self, id: Uuid, scope: Visibility) -> Option<ServiceDetail> {
        let service = self
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id && scope.permits(s.client_id))
            .cloned()?;
        Some(self.service_detail(service))
    }

    async fn create_service(&self, req: CreateServiceRequest) -> Option<Service> {
        let service = Service {
            id: Uuid::new_v4(),
            quote_id: req.quote_id,
            client_id: req.client_id,
            name: req.name,
            status: ServiceStatus::Open,
            notes: req.notes,
            client_progress: None,
            created_at: Utc::now(),
        };
        self.services.lock().unwrap().push(service.clone());
        Some(service)
    }

    async fn update_service(&self, id: Uuid, req: UpdateServiceRequest) -> Option<Service> {
        let mut services = self.services.lock().unwrap();
        let service = services.iter_mut().find(|s| s.id == id)?;
        if let Some(status) = req.status {
            service.status = status;
        }
        if req.notes.is_some() {
            service.notes = req.notes;
        }
        if req.client_progress.is_some() {
            service.client_progress = req.client_progress;
        }
        Some(service.clone())
    }
}

// --- State Assembly ---

pub struct Harness {
    pub repo: Arc<MockRepo>,
    pub provider: Arc<MockProvider>,
    pub state: AppState,
}

/// AppState over the in-memory doubles, with the real JWT session resolver.
pub fn harness(repo: MockRepo, provider: MockProvider) -> Harness {
    let config = AppConfig::default();
    let repo = Arc::new(repo);
    let provider = Arc::new(provider);
    let provider_state = provider.clone() as AuthProviderState;
    let sessions = Arc::new(JwtSessionResolver::new(
        &config.jwt_secret,
        provider_state.clone(),
        config.cookie_secure,
    )) as SessionState;
    let state = AppState::new(repo.clone() as RepositoryState, sessions, provider_state, config);

    Harness {
        repo,
        provider,
        state,
    }
}
