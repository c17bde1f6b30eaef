use crate::{
    error::LookupError,
    models::{
        AdminDashboardStats, ClientDashboardStats, CreateQuoteRequest, CreateServiceRequest,
        CreateTicketRequest, MessageWithSender, PartyRef, Profile, Quote, QuoteDetail,
        QuoteStatus, Service, ServiceDetail, ServiceStatus, Ticket, TicketMessage, TicketStatus,
        TicketWithClient, UpdateProfileRequest, UpdateServiceRequest,
    },
    roles::Role,
};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder, types::Json};
use std::sync::Arc;
use uuid::Uuid;

/// Visibility
///
/// Row scope for domain records: staff see every row, clients only the rows they own.
/// Handlers derive it from the caller's role and pass it down; the repository never
/// decides visibility on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    OwnedBy(Uuid),
}

impl Visibility {
    pub fn for_caller(id: Uuid, role: Role) -> Self {
        if role.is_employee() {
            Visibility::All
        } else {
            Visibility::OwnedBy(id)
        }
    }

    pub fn permits(self, owner: Uuid) -> bool {
        match self {
            Visibility::All => true,
            Visibility::OwnedBy(id) => id == owner,
        }
    }
}

/// Repository Trait
///
/// The contract for every persistence operation of the portal. Handlers and the access gate
/// only see this trait, so tests swap in in-memory doubles.
///
/// Read methods log store errors and degrade to empty results, except `fetch_role`,
/// whose failure modes the access gate must be able to tell apart.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles / Privilege ---
    /// Privilege lookup: the role column of the profile with this id, NULL read as client.
    async fn fetch_role(&self, id: Uuid) -> Result<Role, LookupError>;
    async fn get_profile(&self, id: Uuid) -> Option<Profile>;
    /// Creates (or completes, when the sign-up trigger got there first) a client profile.
    /// Never touches the role of an existing row.
    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Option<Profile>;
    /// Owner edit of name and phone; absent fields are kept.
    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> Option<Profile>;
    async fn set_role(&self, id: Uuid, role: Role) -> bool;
    async fn list_profiles(&self) -> Vec<Profile>;

    // --- Dashboards ---
    async fn client_stats(&self, client_id: Uuid) -> ClientDashboardStats;
    async fn admin_stats(&self) -> AdminDashboardStats;

    // --- Tickets ---
    async fn list_tickets(&self, scope: Visibility) -> Vec<TicketWithClient>;
    async fn get_ticket(&self, id: Uuid, scope: Visibility) -> Option<TicketWithClient>;
    async fn create_ticket(&self, client_id: Uuid, req: CreateTicketRequest) -> Option<Ticket>;
    async fn set_ticket_status(&self, id: Uuid, status: TicketStatus) -> Option<Ticket>;
    async fn list_messages(&self, ticket_id: Uuid) -> Vec<MessageWithSender>;
    async fn add_message(&self, ticket_id: Uuid, sender_id: Uuid, body: &str)
        -> Option<TicketMessage>;

    // --- Quotes ---
    async fn list_quotes(&self, scope: Visibility) -> Vec<QuoteDetail>;
    async fn get_quote(&self, id: Uuid, scope: Visibility) -> Option<QuoteDetail>;
    async fn create_quote(&self, created_by: Uuid, req: CreateQuoteRequest, total: f64)
        -> Option<Quote>;
    /// Client decision: only applies while the quote is pending and owned by `client_id`.
    async fn decide_quote(&self, id: Uuid, client_id: Uuid, status: QuoteStatus) -> Option<Quote>;
    async fn update_quote(
        &self,
        id: Uuid,
        status: Option<QuoteStatus>,
        notes: Option<String>,
    ) -> Option<Quote>;

    // --- Services ---
    async fn list_services(&self, scope: Visibility) -> Vec<ServiceDetail>;
    async fn get_service(&self, id: Uuid, scope: Visibility) -> Option<ServiceDetail>;
    async fn create_service(&self, req: CreateServiceRequest) -> Option<Service>;
    async fn update_service(&self, id: Uuid, req: UpdateServiceRequest) -> Option<Service>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Joined Row Shapes ---
//
// Internal projections of the joined queries below. Each maps one-to-one onto a public
// projection type, so no caller ever sees an untyped join.

#[derive(FromRow)]
struct TicketRow {
    #[sqlx(flatten)]
    ticket: Ticket,
    client_name: Option<String>,
    client_email: String,
}

impl From<TicketRow> for TicketWithClient {
    fn from(row: TicketRow) -> Self {
        let client = PartyRef {
            id: row.ticket.client_id,
            name: row.client_name,
            email: row.client_email,
        };
        TicketWithClient {
            ticket: row.ticket,
            client,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    #[sqlx(flatten)]
    message: TicketMessage,
    sender_name: Option<String>,
    sender_email: String,
}

impl From<MessageRow> for MessageWithSender {
    fn from(row: MessageRow) -> Self {
        let sender = PartyRef {
            id: row.message.sender_id,
            name: row.sender_name,
            email: row.sender_email,
        };
        MessageWithSender {
            message: row.message,
            sender,
        }
    }
}

#[derive(FromRow)]
struct QuoteRow {
    #[sqlx(flatten)]
    quote: Quote,
    client_name: Option<String>,
    client_email: String,
    creator_name: Option<String>,
}

impl From<QuoteRow> for QuoteDetail {
    fn from(row: QuoteRow) -> Self {
        let client = PartyRef {
            id: row.quote.client_id,
            name: row.client_name,
            email: row.client_email,
        };
        QuoteDetail {
            quote: row.quote,
            client,
            creator_name: row.creator_name,
        }
    }
}

#[derive(FromRow)]
struct ServiceRow {
    #[sqlx(flatten)]
    service: Service,
    client_name: Option<String>,
    client_email: String,
    quote_title: Option<String>,
}

impl From<ServiceRow> for ServiceDetail {
    fn from(row: ServiceRow) -> Self {
        let client = PartyRef {
            id: row.service.client_id,
            name: row.client_name,
            email: row.client_email,
        };
        ServiceDetail {
            service: row.service,
            client,
            quote_title: row.quote_title,
        }
    }
}

const TICKET_SELECT: &str = r#"
    SELECT t.id, t.client_id, t.title, t.description, t.status, t.priority, t.created_at,
           p.name AS client_name, p.email AS client_email
    FROM tickets t
    JOIN profiles p ON p.id = t.client_id
"#;

const QUOTE_SELECT: &str = r#"
    SELECT q.id, q.client_id, q.title, q.items, q.status, q.total, q.created_by, q.notes,
           q.created_at, c.name AS client_name, c.email AS client_email,
           cr.name AS creator_name
    FROM quotes q
    JOIN profiles c ON c.id = q.client_id
    LEFT JOIN profiles cr ON cr.id = q.created_by
"#;

const SERVICE_SELECT: &str = r#"
    SELECT s.id, s.quote_id, s.client_id, s.name, s.status, s.notes, s.client_progress,
           s.created_at, c.name AS client_name, c.email AS client_email,
           q.title AS quote_title
    FROM services s
    JOIN profiles c ON c.id = s.client_id
    LEFT JOIN quotes q ON q.id = s.quote_id
"#;

const PROFILE_COLUMNS: &str = "id, name, email, phone, role, created_at";
const TICKET_COLUMNS: &str = "id, client_id, title, description, status, priority, created_at";
const QUOTE_COLUMNS: &str =
    "id, client_id, title, items, status, total, created_by, notes, created_at";
const SERVICE_COLUMNS: &str =
    "id, quote_id, client_id, name, status, notes, client_progress, created_at";

/// Appends the ownership filter for `scope` to a query whose WHERE clause is already open
/// (`first = false`) or not yet started (`first = true`).
fn push_scope(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    scope: Visibility,
    first: bool,
) {
    if let Visibility::OwnedBy(owner) = scope {
        builder.push(if first { " WHERE " } else { " AND " });
        builder.push(column);
        builder.push(" = ");
        builder.push_bind(owner);
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by Supabase Postgres.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count(&self, sql: &str, bind: Option<Uuid>) -> i64 {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(id) = bind {
            query = query.bind(id);
        }
        query.fetch_one(&self.pool).await.unwrap_or_else(|e| {
            tracing::error!("count query failed: {:?}", e);
            0
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// fetch_role
    ///
    /// Exact id match, at most one row. A missing row and a failed query are reported
    /// separately; `COALESCE` covers a NULL column.
    async fn fetch_role(&self, id: Uuid) -> Result<Role, LookupError> {
        let raw = sqlx::query_scalar::<_, i16>(
            "SELECT COALESCE(role, 0::smallint) FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LookupError::ProfileNotFound(id))?;

        Ok(Role::coalesce(Some(raw)))
    }

    async fn get_profile(&self, id: Uuid) -> Option<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_profile error: {:?}", e);
            None
        })
    }

    /// create_profile
    ///
    /// Upsert keyed on the identity id. The sign-up trigger may already have inserted the
    /// row; in that case only missing contact fields are filled in.
    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Option<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            INSERT INTO profiles (id, email, name, phone, role)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (id) DO UPDATE
               SET name = COALESCE(profiles.name, EXCLUDED.name),
                   phone = COALESCE(profiles.phone, EXCLUDED.phone)
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("create_profile error: {:?}", e);
            None
        })
    }

    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> Option<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
               SET name = COALESCE($2, name),
                   phone = COALESCE($3, phone)
             WHERE id = $1
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.name)
        .bind(req.phone)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("update_profile error: {:?}", e);
            None
        })
    }

    async fn set_role(&self, id: Uuid, role: Role) -> bool {
        match sqlx::query("UPDATE profiles SET role = $1 WHERE id = $2")
            .bind(role.as_i16())
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("set_role error: {:?}", e);
                false
            }
        }
    }

    async fn list_profiles(&self) -> Vec<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("list_profiles error: {:?}", e);
            vec![]
        })
    }

    /// client_stats
    ///
    /// Open tickets, pending quotes and services in development owned by one client.
    async fn client_stats(&self, client_id: Uuid) -> ClientDashboardStats {
        ClientDashboardStats {
            open_tickets: self
                .count(
                    "SELECT COUNT(*) FROM tickets WHERE client_id = $1 AND status = 0",
                    Some(client_id),
                )
                .await,
            pending_quotes: self
                .count(
                    "SELECT COUNT(*) FROM quotes WHERE client_id = $1 AND status = 0",
                    Some(client_id),
                )
                .await,
            services_in_development: self
                .count(
                    "SELECT COUNT(*) FROM services WHERE client_id = $1 AND status = 1",
                    Some(client_id),
                )
                .await,
        }
    }

    async fn admin_stats(&self) -> AdminDashboardStats {
        AdminDashboardStats {
            total_clients: self
                .count("SELECT COUNT(*) FROM profiles WHERE COALESCE(role, 0) = 0", None)
                .await,
            tickets_in_progress: self
                .count("SELECT COUNT(*) FROM tickets WHERE status = 1", None)
                .await,
            pending_quotes: self
                .count("SELECT COUNT(*) FROM quotes WHERE status = 0", None)
                .await,
            services_in_development: self
                .count("SELECT COUNT(*) FROM services WHERE status = 1", None)
                .await,
        }
    }

    // --- TICKETS ---

    async fn list_tickets(&self, scope: Visibility) -> Vec<TicketWithClient> {
        let mut builder = QueryBuilder::<Postgres>::new(TICKET_SELECT);
        push_scope(&mut builder, "t.client_id", scope, true);
        builder.push(" ORDER BY t.created_at DESC");

        match builder.build_query_as::<TicketRow>().fetch_all(&self.pool).await {
            Ok(rows) => rows.into_iter().map(Into::into).collect(),
            Err(e) => {
                tracing::error!("list_tickets error: {:?}", e);
                vec![]
            }
        }
    }

    async fn get_ticket(&self, id: Uuid, scope: Visibility) -> Option<TicketWithClient> {
        let mut builder = QueryBuilder::<Postgres>::new(TICKET_SELECT);
        builder.push(" WHERE t.id = ");
        builder.push_bind(id);
        push_scope(&mut builder, "t.client_id", scope, false);

        builder
            .build_query_as::<TicketRow>()
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Into::into))
            .unwrap_or_else(|e| {
                tracing::error!("get_ticket error: {:?}", e);
                None
            })
    }

    async fn create_ticket(&self, client_id: Uuid, req: CreateTicketRequest) -> Option<Ticket> {
        sqlx::query_as::<_, Ticket>(&format!(
            r#"
            INSERT INTO tickets (id, client_id, title, description, status, priority, created_at)
            VALUES ($1, $2, $3, $4, 0, $5, NOW())
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(req.title)
        .bind(req.description)
        .bind(req.priority.as_str())
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("create_ticket error: {:?}", e);
            None
        })
    }

    async fn set_ticket_status(&self, id: Uuid, status: TicketStatus) -> Option<Ticket> {
        sqlx::query_as::<_, Ticket>(&format!(
            "UPDATE tickets SET status = $1 WHERE id = $2 RETURNING {TICKET_COLUMNS}"
        ))
        .bind(i16::from(status))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("set_ticket_status error: {:?}", e);
            None
        })
    }

    async fn list_messages(&self, ticket_id: Uuid) -> Vec<MessageWithSender> {
        sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT m.id, m.ticket_id, m.sender_id, m.body, m.created_at,
                   p.name AS sender_name, p.email AS sender_email
            FROM ticket_messages m
            JOIN profiles p ON p.id = m.sender_id
            WHERE m.ticket_id = $1
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Into::into).collect())
        .unwrap_or_else(|e| {
            tracing::error!("list_messages error: {:?}", e);
            vec![]
        })
    }

    async fn add_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Option<TicketMessage> {
        sqlx::query_as::<_, TicketMessage>(
            r#"
            INSERT INTO ticket_messages (id, ticket_id, sender_id, body, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, ticket_id, sender_id, body, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ticket_id)
        .bind(sender_id)
        .bind(body)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("add_message error: {:?}", e);
            None
        })
    }

    // --- QUOTES ---

    async fn list_quotes(&self, scope: Visibility) -> Vec<QuoteDetail> {
        let mut builder = QueryBuilder::<Postgres>::new(QUOTE_SELECT);
        push_scope(&mut builder, "q.client_id", scope, true);
        builder.push(" ORDER BY q.created_at DESC");

        match builder.build_query_as::<QuoteRow>().fetch_all(&self.pool).await {
            Ok(rows) => rows.into_iter().map(Into::into).collect(),
            Err(e) => {
                tracing::error!("list_quotes error: {:?}", e);
                vec![]
            }
        }
    }

    async fn get_quote(&self, id: Uuid, scope: Visibility) -> Option<QuoteDetail> {
        let mut builder = QueryBuilder::<Postgres>::new(QUOTE_SELECT);
        builder.push(" WHERE q.id = ");
        builder.push_bind(id);
        push_scope(&mut builder, "q.client_id", scope, false);

        builder
            .build_query_as::<QuoteRow>()
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Into::into))
            .unwrap_or_else(|e| {
                tracing::error!("get_quote error: {:?}", e);
                None
            })
    }

    async fn create_quote(
        &self,
        created_by: Uuid,
        req: CreateQuoteRequest,
        total: f64,
    ) -> Option<Quote> {
        sqlx::query_as::<_, Quote>(&format!(
            r#"
            INSERT INTO quotes
                (id, client_id, title, items, status, total, created_by, notes, created_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, NOW())
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(req.client_id)
        .bind(req.title)
        .bind(Json(req.items))
        .bind(total)
        .bind(created_by)
        .bind(req.notes)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("create_quote error: {:?}", e);
            None
        })
    }

    async fn decide_quote(&self, id: Uuid, client_id: Uuid, status: QuoteStatus) -> Option<Quote> {
        sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes SET status = $1
            WHERE id = $2 AND client_id = $3 AND status = $4
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(i16::from(status))
        .bind(id)
        .bind(client_id)
        .bind(i16::from(QuoteStatus::Pending))
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("decide_quote error: {:?}", e);
            None
        })
    }

    /// update_quote
    ///
    /// Staff edit. `COALESCE` keeps columns whose field was not supplied.
    async fn update_quote(
        &self,
        id: Uuid,
        status: Option<QuoteStatus>,
        notes: Option<String>,
    ) -> Option<Quote> {
        sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
               SET status = COALESCE($2, status),
                   notes = COALESCE($3, notes)
             WHERE id = $1
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.map(i16::from))
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("update_quote error: {:?}", e);
            None
        })
    }

    // --- SERVICES ---

    async fn list_services(&self, scope: Visibility) -> Vec<ServiceDetail> {
        let mut builder = QueryBuilder::<Postgres>::new(SERVICE_SELECT);
        push_scope(&mut builder, "s.client_id", scope, true);
        builder.push(" ORDER BY s.created_at DESC");

        match builder.build_query_as::<ServiceRow>().fetch_all(&self.pool).await {
            Ok(rows) => rows.into_iter().map(Into::into).collect(),
            Err(e) => {
                tracing::error!("list_services error: {:?}", e);
                vec![]
            }
        }
    }

    async fn get_service(&self, id: Uuid, scope: Visibility) -> Option<ServiceDetail> {
        let mut builder = QueryBuilder::<Postgres>::new(SERVICE_SELECT);
        builder.push(" WHERE s.id = ");
        builder.push_bind(id);
        push_scope(&mut builder, "s.client_id", scope, false);

        builder
            .build_query_as::<ServiceRow>()
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Into::into))
            .unwrap_or_else(|e| {
                tracing::error!("get_service error: {:?}", e);
                None
            })
    }

    async fn create_service(&self, req: CreateServiceRequest) -> Option<Service> {
        sqlx::query_as::<_, Service>(&format!(
            r#"
            INSERT INTO services (id, quote_id, client_id, name, status, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(req.quote_id)
        .bind(req.client_id)
        .bind(req.name)
        .bind(i16::from(ServiceStatus::Open))
        .bind(req.notes)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("create_service error: {:?}", e);
            None
        })
    }

    async fn update_service(&self, id: Uuid, req: UpdateServiceRequest) -> Option<Service> {
        sqlx::query_as::<_, Service>(&format!(
            r#"
            UPDATE services
               SET status = COALESCE($2, status),
                   notes = COALESCE($3, notes),
                   client_progress = COALESCE($4, client_progress)
             WHERE id = $1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.status.map(i16::from))
        .bind(req.notes)
        .bind(req.client_progress)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("update_service error: {:?}", e);
            None
        })
    }
}
