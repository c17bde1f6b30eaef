use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{PriorityError, StatusError},
    roles::Role,
};

// --- Status Encodings ---

/// Declares a status enum stored as a small integer, serialized as that integer,
/// and rejecting any value outside its own range.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i16", into = "i16")]
        pub enum $name {
            $($variant),+
        }

        impl TryFrom<i16> for $name {
            type Error = StatusError;

            fn try_from(value: i16) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(StatusError { kind: stringify!($name), value: other }),
                }
            }
        }

        impl From<$name> for i16 {
            fn from(status: $name) -> i16 {
                match status {
                    $($name::$variant => $value),+
                }
            }
        }
    };
}

status_enum! {
    /// Lifecycle of a support ticket.
    TicketStatus { Open = 0, InProgress = 1, Closed = 2 }
}

status_enum! {
    /// Lifecycle of a quote. Only `Pending` quotes can be decided by the client.
    QuoteStatus { Pending = 0, Approved = 1, Rejected = 2, Cancelled = 3 }
}

status_enum! {
    /// Delivery progress of a service/project.
    ServiceStatus { Open = 0, InDevelopment = 1, InTesting = 2, Completed = 3 }
}

impl Default for TicketStatus {
    fn default() -> Self {
        TicketStatus::Open
    }
}

impl Default for QuoteStatus {
    fn default() -> Self {
        QuoteStatus::Pending
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        ServiceStatus::Open
    }
}

/// TicketPriority
///
/// Stored as lowercase text in `tickets.priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
        }
    }
}

impl TryFrom<String> for TicketPriority {
    type Error = PriorityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "low" => Ok(TicketPriority::Low),
            "medium" => Ok(TicketPriority::Medium),
            "high" => Ok(TicketPriority::High),
            _ => Err(PriorityError(value)),
        }
    }
}

// --- Identity & Profile ---

/// Identity
///
/// The authenticated subject issued by the auth provider. Not owned by the portal:
/// it is rebuilt from the access token on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Profile
///
/// One row of `public.profiles`, one-to-one with an Identity. `role` is read through
/// `Role::try_from(Option<i16>)`, so a NULL column surfaces as `Role::Client`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    #[sqlx(try_from = "Option<i16>")]
    #[ts(type = "0 | 1 | 2")]
    #[schema(value_type = i16)]
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// PartyRef
///
/// The slice of a profile that joined views need: who opened, sent or owns a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PartyRef {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
}

// --- Domain Records ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Ticket {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[sqlx(try_from = "i16")]
    #[ts(type = "0 | 1 | 2")]
    #[schema(value_type = i16)]
    pub status: TicketStatus,
    #[sqlx(try_from = "String")]
    pub priority: TicketPriority,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// One priced line of a quote, stored inside the `quotes.items` JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct QuoteItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl QuoteItem {
    pub fn subtotal(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Quote {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    #[sqlx(json)]
    pub items: Vec<QuoteItem>,
    #[sqlx(try_from = "i16")]
    #[ts(type = "0 | 1 | 2 | 3")]
    #[schema(value_type = i16)]
    pub status: QuoteStatus,
    pub total: f64,
    pub created_by: Option<Uuid>,
    pub notes: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Service {
    pub id: Uuid,
    pub quote_id: Option<Uuid>,
    pub client_id: Uuid,
    pub name: String,
    #[sqlx(try_from = "i16")]
    #[ts(type = "0 | 1 | 2 | 3")]
    #[schema(value_type = i16)]
    pub status: ServiceStatus,
    pub notes: Option<String>,
    pub client_progress: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Joined Projections (Output) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TicketWithClient {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub client: PartyRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: TicketMessage,
    pub sender: PartyRef,
}

/// TicketDetail
///
/// The conversation view of a ticket: the ticket with its client, and every message
/// in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TicketDetail {
    pub ticket: TicketWithClient,
    pub messages: Vec<MessageWithSender>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: Quote,
    pub client: PartyRef,
    pub creator_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ServiceDetail {
    #[serde(flatten)]
    pub service: Service,
    pub client: PartyRef,
    pub quote_title: Option<String>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Self-service sign-up. The password is forwarded to the auth provider and never stored
/// or logged here. Every self-registered profile is a client.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// UpdateProfileRequest
///
/// Contact details the owner may change. The role is not part of it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TicketPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateTicketStatusRequest {
    #[ts(type = "0 | 1 | 2")]
    #[schema(value_type = i16)]
    pub status: TicketStatus,
}

/// TicketReplyRequest
///
/// Staff reply. When `status` is omitted an open ticket moves to in-progress.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TicketReplyRequest {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "0 | 1 | 2 | null")]
    #[schema(value_type = Option<i16>)]
    pub status: Option<TicketStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateQuoteRequest {
    pub client_id: Uuid,
    pub title: String,
    pub items: Vec<QuoteItem>,
    pub notes: Option<String>,
}

/// The owning client's answer to a pending quote.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct QuoteDecisionRequest {
    pub approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateQuoteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "0 | 1 | 2 | 3 | null")]
    #[schema(value_type = Option<i16>)]
    pub status: Option<QuoteStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateServiceRequest {
    pub client_id: Uuid,
    pub quote_id: Option<Uuid>,
    pub name: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateServiceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "0 | 1 | 2 | 3 | null")]
    #[schema(value_type = Option<i16>)]
    pub status: Option<ServiceStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_progress: Option<String>,
}

/// InviteEmployeeRequest
///
/// Admin-only creation of a staff account. `role` must be employee (1) or admin (2).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct InviteEmployeeRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[ts(type = "1 | 2")]
    #[schema(value_type = i16)]
    pub role: Role,
}

// --- Dashboard & Session Schemas (Output) ---

/// Counters shown on a client's own dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ClientDashboardStats {
    pub open_tickets: i64,
    pub pending_quotes: i64,
    pub services_in_development: i64,
}

/// Counters shown on the staff overview at `/admin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_clients: i64,
    pub tickets_in_progress: i64,
    pub pending_quotes: i64,
    pub services_in_development: i64,
}

/// MeResponse
///
/// The caller's profile plus the derived privilege booleans. The booleans are computed
/// from `profile.role` on every response and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MeResponse {
    pub profile: Profile,
    pub is_admin: bool,
    pub is_employee: bool,
    pub is_client: bool,
}

impl From<Profile> for MeResponse {
    fn from(profile: Profile) -> Self {
        let role = profile.role;
        Self {
            profile,
            is_admin: role.is_admin(),
            is_employee: role.is_employee(),
            is_client: role.is_client(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub redirect_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct InviteResponse {
    pub user_id: Uuid,
    pub message: String,
}
