//! Per-session privilege cache.
//!
//! Holds `{identity, profile}` for one signed-in browser session and answers the role
//! questions the UI asks (`is_admin`, `is_employee`, `is_client`). One writer task owns the
//! state; any number of readers watch it through a `PrivilegeContext`.
//!
//! The loading flag is cleared by whichever comes first: the initial load, an auth event,
//! or the fallback timer. Once the owning `PrivilegeCache` is unmounted no further state is
//! published, even by lookups that were already in flight.

use axum::http::HeaderMap;
use std::{future::Future, pin::Pin, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{Session, SessionState},
    models::{Identity, Profile},
    provider::AuthProviderState,
    repository::RepositoryState,
    roles::Role,
};

const INBOX_CAPACITY: usize = 16;

/// PrivilegeSnapshot
///
/// What readers see. Role booleans are derived from `profile` on every call.
#[derive(Debug, Clone)]
pub struct PrivilegeSnapshot {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
}

impl Default for PrivilegeSnapshot {
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: true,
        }
    }
}

impl PrivilegeSnapshot {
    fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_some_and(Role::is_admin)
    }

    pub fn is_employee(&self) -> bool {
        self.role().is_some_and(Role::is_employee)
    }

    /// Only true once a client profile is actually loaded.
    pub fn is_client(&self) -> bool {
        self.role().is_some_and(Role::is_client)
    }
}

/// AuthEvent
///
/// Auth-state change notifications forwarded from the provider's session listener.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

#[derive(Debug)]
enum Message {
    Event(AuthEvent),
    RefreshProfile,
    SignOut,
}

/// PrivilegeContext
///
/// Cheap, cloneable handle passed down to whatever needs the caller's privileges.
#[derive(Clone)]
pub struct PrivilegeContext {
    snapshot: watch::Receiver<PrivilegeSnapshot>,
    inbox: mpsc::Sender<Message>,
}

impl PrivilegeContext {
    pub fn snapshot(&self) -> PrivilegeSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until the loading flag is down and returns the state at that point. Returns
    /// the last known state if the cache was unmounted first.
    pub async fn loaded(&self) -> PrivilegeSnapshot {
        let mut rx = self.snapshot.clone();
        if let Ok(snapshot) = rx.wait_for(|s| !s.is_loading).await {
            return snapshot.clone();
        }
        rx.borrow().clone()
    }

    /// Waits for the next published change.
    pub async fn changed(&mut self) -> Option<PrivilegeSnapshot> {
        self.snapshot.changed().await.ok()?;
        Some(self.snapshot.borrow_and_update().clone())
    }

    pub async fn notify(&self, event: AuthEvent) {
        self.send(Message::Event(event)).await;
    }

    /// Re-fetches the profile of the current identity (e.g. after the user edited it).
    pub async fn refresh_profile(&self) {
        self.send(Message::RefreshProfile).await;
    }

    /// Revokes the session at the provider and clears the cached identity and profile.
    pub async fn sign_out(&self) {
        self.send(Message::SignOut).await;
    }

    async fn send(&self, message: Message) {
        if self.inbox.send(message).await.is_err() {
            tracing::debug!("privilege cache already unmounted, message dropped");
        }
    }
}

/// PrivilegeCache
///
/// Owner of the writer task. Dropping or unmounting it cancels the writer.
pub struct PrivilegeCache {
    context: PrivilegeContext,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
}

impl PrivilegeCache {
    /// spawn
    ///
    /// Starts the writer and the initial load from `credentials` (the request headers or
    /// cookies of the session being mirrored). `fallback` bounds how long the loading flag
    /// can stay up.
    pub fn spawn(
        sessions: SessionState,
        repo: RepositoryState,
        provider: AuthProviderState,
        credentials: HeaderMap,
        fallback: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(PrivilegeSnapshot::default());
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let cancel = CancellationToken::new();

        let writer = Writer {
            state: tx,
            session: None,
            repo,
            provider,
            cancel: cancel.clone(),
            events_applied: 0,
            pending: None,
            pending_session: false,
        };
        let initial = initial_load(sessions, writer.repo.clone(), credentials);
        let writer = tokio::spawn(writer.run(inbox_rx, initial, fallback));

        Self {
            context: PrivilegeContext {
                snapshot: rx,
                inbox: inbox_tx,
            },
            cancel,
            writer: Some(writer),
        }
    }

    pub fn context(&self) -> PrivilegeContext {
        self.context.clone()
    }

    /// Stops the writer. Lookups still in flight are dropped and publish nothing.
    pub async fn unmount(mut self) {
        self.cancel.cancel();
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                tracing::warn!(error = %e, "privilege cache writer did not stop cleanly");
            }
        }
    }
}

impl Drop for PrivilegeCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves the session behind `credentials`, then its profile. Either step failing leaves
/// the rest empty.
async fn initial_load(
    sessions: SessionState,
    repo: RepositoryState,
    credentials: HeaderMap,
) -> (Option<Session>, Option<Profile>) {
    let session = match sessions.resolve(&credentials).await {
        Ok(resolution) => resolution.session,
        Err(e) => {
            tracing::warn!(error = %e, "initial session load failed");
            None
        }
    };
    let profile = match &session {
        Some(s) => repo.get_profile(s.identity.id).await,
        None => None,
    };
    (session, profile)
}

/// Result of a profile lookup started by the writer.
enum Lookup {
    /// An auth event's session together with its profile.
    Session(Session, Option<Profile>),
    /// A re-fetch of the current identity's profile.
    Refresh(Option<Profile>),
}

type PendingLookup = Pin<Box<dyn Future<Output = Lookup> + Send>>;

/// Polls the in-flight lookup, or never completes when there is none.
async fn in_flight(pending: &mut Option<PendingLookup>) -> Lookup {
    match pending {
        Some(lookup) => lookup.await,
        None => std::future::pending().await,
    }
}

struct Writer {
    state: watch::Sender<PrivilegeSnapshot>,
    // Kept out of the snapshot: readers never see the access token.
    session: Option<Session>,
    repo: RepositoryState,
    provider: AuthProviderState,
    cancel: CancellationToken,
    events_applied: u64,
    // At most one lookup at a time. Starting a new one drops the old one, so a stale
    // result can never land after a newer one.
    pending: Option<PendingLookup>,
    // Set while `pending` is an auth event's lookup rather than a refresh.
    pending_session: bool,
}

impl Writer {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Message>,
        initial: impl Future<Output = (Option<Session>, Option<Profile>)>,
        fallback: Duration,
    ) {
        tokio::pin!(initial);
        let fallback = tokio::time::sleep(fallback);
        tokio::pin!(fallback);
        let mut initial_done = false;
        let mut fallback_done = false;

        loop {
            let has_pending = self.pending.is_some();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                (session, profile) = &mut initial, if !initial_done => {
                    initial_done = true;
                    // An auth event that landed first is newer than this load.
                    if self.events_applied == 0 {
                        self.replace(session, profile);
                    }
                    if !self.pending_session {
                        self.finish_loading();
                    }
                }
                _ = &mut fallback, if !fallback_done => {
                    fallback_done = true;
                    if self.state.borrow().is_loading {
                        tracing::warn!(
                            "privilege cache still loading after fallback, forcing loaded"
                        );
                    }
                    self.finish_loading();
                }
                lookup = in_flight(&mut self.pending), if has_pending => {
                    self.pending = None;
                    self.pending_session = false;
                    self.apply(lookup);
                }
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Event(AuthEvent::SignedIn(session))
            | Message::Event(AuthEvent::TokenRefreshed(session)) => {
                self.events_applied += 1;
                let repo = self.repo.clone();
                self.pending = Some(Box::pin(async move {
                    let profile = repo.get_profile(session.identity.id).await;
                    Lookup::Session(session, profile)
                }));
                self.pending_session = true;
            }
            Message::Event(AuthEvent::SignedOut) => self.clear(),
            Message::RefreshProfile => {
                // A session lookup already in flight fetches the fresh profile anyway.
                if self.pending_session {
                    return;
                }
                let Some(id) = self.session.as_ref().map(|s| s.identity.id) else {
                    return;
                };
                let repo = self.repo.clone();
                self.pending = Some(Box::pin(async move {
                    Lookup::Refresh(repo.get_profile(id).await)
                }));
            }
            Message::SignOut => {
                if let Some(session) = self.session.as_ref() {
                    let provider = self.provider.clone();
                    let access_token = session.access_token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = provider.sign_out(&access_token).await {
                            tracing::warn!(
                                error = %e,
                                "provider sign-out failed, local state already cleared"
                            );
                        }
                    });
                }
                self.clear();
            }
        }
    }

    fn apply(&mut self, lookup: Lookup) {
        match lookup {
            Lookup::Session(session, profile) => {
                self.replace(Some(session), profile);
                self.finish_loading();
            }
            // A failed refresh keeps the profile we already have.
            Lookup::Refresh(Some(profile)) => self.publish(|s| s.profile = Some(profile)),
            Lookup::Refresh(None) => {}
        }
    }

    /// Drops any in-flight lookup and publishes the signed-out state.
    fn clear(&mut self) {
        self.events_applied += 1;
        self.pending = None;
        self.pending_session = false;
        self.replace(None, None);
        self.finish_loading();
    }

    /// Last write wins: identity and profile are overwritten together, never merged.
    fn replace(&mut self, session: Option<Session>, profile: Option<Profile>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let identity = session.as_ref().map(|s| s.identity.clone());
        self.session = session;
        self.publish(|s| {
            s.identity = identity;
            s.profile = profile;
        });
    }

    fn finish_loading(&self) {
        self.publish(|s| s.is_loading = false);
    }

    fn publish(&self, mutate: impl FnOnce(&mut PrivilegeSnapshot)) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_modify(mutate);
    }
}
