//! Session store: the single source of truth for `AuthState`.
//!
//! The store owns the subscription to the provider's change feed and turns
//! three inputs into state transitions:
//! - the one-shot boot resolution (`resolve`)
//! - provider push events
//! - local results of login / register / logout
//!
//! Every accepted input bumps a version counter. A resolution that finishes
//! after the version moved is stale and dropped. Readers always get a full
//! snapshot taken under the lock.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::identity::IdentityClient;
use crate::models::{AuthState, ChangeEvent, ProfileAttributes, Session, SignUpOutcome};
use crate::subscription::Subscription;

type Resolution = Shared<BoxFuture<'static, AuthState>>;

/// Where a transition came from (for logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Resolution,
    Push,
    Local,
    Expiry,
}

struct Inner {
    state: AuthState,
    version: u64,
    listeners: Vec<mpsc::UnboundedSender<AuthState>>,
    torn_down: bool,
}

impl Inner {
    /// Record an accepted input. Listeners hear about it only if the value changed.
    fn apply(&mut self, state: AuthState, source: Source) -> bool {
        let state = match state {
            AuthState::Authenticated(ref s) if s.is_expired() => {
                debug!(?source, "Incoming session already expired");
                AuthState::Unauthenticated
            }
            other => other,
        };

        self.version += 1;
        if self.state == state {
            debug!(?source, version = self.version, "State unchanged");
            return false;
        }

        info!(
            ?source,
            from = self.state.label(),
            to = state.label(),
            version = self.version,
            "Auth state transition"
        );
        self.state = state;
        let snapshot = self.state.clone();
        self.listeners.retain(|tx| tx.send(snapshot.clone()).is_ok());
        true
    }

    /// Demote an expired session before anyone reads it.
    fn expire_if_needed(&mut self) {
        if matches!(self.state, AuthState::Authenticated(ref s) if s.is_expired()) {
            self.apply(AuthState::Unauthenticated, Source::Expiry);
        }
    }
}

/// Stream of auth states: the current one first, then every transition.
pub struct StateStream {
    rx: mpsc::UnboundedReceiver<AuthState>,
}

impl StateStream {
    /// Next state, or `None` once the store is torn down.
    pub async fn recv(&mut self) -> Option<AuthState> {
        self.rx.recv().await
    }
}

pub struct SessionStore {
    identity: IdentityClient,
    inner: Mutex<Inner>,
    resolved: watch::Sender<bool>,
    resolution: Mutex<Option<Resolution>>,
    /// Dropped with the store, which unsubscribes.
    provider_subscription: Mutex<Option<Subscription>>,
}

impl SessionStore {
    pub fn new(identity: IdentityClient) -> Arc<Self> {
        let (resolved, _) = watch::channel(false);
        Arc::new(Self {
            identity,
            inner: Mutex::new(Inner {
                state: AuthState::Unresolved,
                version: 0,
                listeners: Vec::new(),
                torn_down: false,
            }),
            resolved,
            resolution: Mutex::new(None),
            provider_subscription: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start listening to provider push events. Safe to call more than once.
    pub fn init(self: &Arc<Self>) {
        let mut slot = self
            .provider_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() || self.lock().torn_down {
            return;
        }

        let store: Weak<Self> = Arc::downgrade(self);
        let subscription = self.identity.subscribe_to_changes(move |event: ChangeEvent| {
            if let Some(store) = store.upgrade() {
                store.transition(AuthState::from_session(event.session), Source::Push);
            }
        });
        *slot = Some(subscription);
        debug!("Session store subscribed to provider changes");
    }

    /// Stop listening to the provider and close every state stream.
    pub fn teardown(&self) {
        let subscription = self
            .provider_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        let mut inner = self.lock();
        inner.torn_down = true;
        inner.listeners.clear();
        // Nothing can resolve a torn-down store, so settle it as signed out.
        if !inner.state.is_resolved() {
            inner.state = AuthState::Unauthenticated;
            inner.version += 1;
        }
        drop(inner);

        self.resolved
            .send_if_modified(|flag| !std::mem::replace(flag, true));
        debug!("Session store torn down");
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub fn current(&self) -> AuthState {
        let mut inner = self.lock();
        inner.expire_if_needed();
        inner.state.clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.current().session().cloned()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().state.is_resolved()
    }

    /// Completes once the state has left `Unresolved`, whichever input did it.
    pub async fn wait_until_resolved(&self) {
        let mut rx = self.resolved.subscribe();
        // Only fails if the sender is gone, and the sender lives in `self`.
        let _ = rx.wait_for(|resolved| *resolved).await;
    }

    /// Register a stream. The current state is queued under the same lock that
    /// guards transitions, so nothing between "read" and "subscribe" is lost.
    /// After teardown the stream yields the final state and then ends.
    pub fn watch(&self) -> StateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.expire_if_needed();
        if tx.send(inner.state.clone()).is_ok() && !inner.torn_down {
            inner.listeners.push(tx);
        }
        StateStream { rx }
    }

    /// Callback form of `watch`. The listener runs on a spawned task.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(AuthState) + Send + Sync + 'static,
    {
        let mut stream = self.watch();
        let task = tokio::spawn(async move {
            while let Some(state) = stream.recv().await {
                listener(state);
            }
        });
        Subscription::new("auth-state-listener", task)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn transition(&self, state: AuthState, source: Source) -> bool {
        let inner = self.lock();
        self.commit(inner, state, source)
    }

    /// Apply only if nothing else was accepted since `started_at`. The check
    /// and the apply happen under one lock.
    fn transition_if_current(&self, started_at: u64, state: AuthState, source: Source) -> bool {
        let inner = self.lock();
        if inner.version != started_at {
            debug!(
                started_at,
                version = inner.version,
                "Superseded while in flight, discarding result"
            );
            return false;
        }
        self.commit(inner, state, source)
    }

    fn commit(&self, mut inner: MutexGuard<'_, Inner>, state: AuthState, source: Source) -> bool {
        if inner.torn_down {
            return false;
        }
        let changed = inner.apply(state, source);
        let resolved = inner.state.is_resolved();
        drop(inner);

        if resolved {
            self.resolved
                .send_if_modified(|flag| !std::mem::replace(flag, true));
        }
        changed
    }

    /// Resolve the current session once. Concurrent callers share the same
    /// in-flight resolution.
    pub async fn resolve(self: &Arc<Self>) -> AuthState {
        if self.lock().torn_down {
            return self.current();
        }
        self.init();

        let resolution = {
            let mut slot = self.resolution.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    // Weak so a queued, never-polled future does not keep the store alive.
                    let store = Arc::downgrade(self);
                    let fut = async move {
                        match store.upgrade() {
                            Some(store) => store.run_resolution().await,
                            None => AuthState::Unresolved,
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        resolution.await
    }

    async fn run_resolution(self: Arc<Self>) -> AuthState {
        let started_at = self.version();
        debug!(started_at, "Resolving session");

        let state = match self.identity.fetch_current_session().await {
            Ok(session) => AuthState::from_session(session),
            Err(e) => {
                warn!(error = %e, "Session resolution failed, treating as signed out");
                AuthState::Unauthenticated
            }
        };

        self.transition_if_current(started_at, state, Source::Resolution);
        self.resolution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.current()
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let session = self.identity.sign_in(identifier, secret).await?;
        self.transition(AuthState::Authenticated(session.clone()), Source::Local);
        Ok(session)
    }

    pub async fn register(
        &self,
        identifier: &str,
        secret: &str,
        attributes: &ProfileAttributes,
    ) -> Result<SignUpOutcome, AuthError> {
        let outcome = self.identity.sign_up(identifier, secret, attributes).await?;
        if let SignUpOutcome::SignedIn(ref session) = outcome {
            self.transition(AuthState::Authenticated(session.clone()), Source::Local);
        }
        Ok(outcome)
    }

    /// Always ends signed out locally. A failed remote sign-out is logged only.
    pub async fn logout(&self) {
        if let Err(e) = self.identity.sign_out().await {
            warn!(error = %e, "Remote sign-out failed, signing out locally");
        }
        self.transition(AuthState::Unauthenticated, Source::Local);
    }

    /// Update profile attributes and swap in the new user snapshot.
    pub async fn update_profile(&self, attributes: ProfileAttributes) -> Result<Session, AuthError> {
        let user = self.identity.update_profile(attributes).await?;
        let session = self
            .current_session()
            .ok_or(AuthError::Unauthenticated)?
            .with_user(user);
        self.transition(AuthState::Authenticated(session.clone()), Source::Local);
        Ok(session)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::ChangeKind;
    use crate::testing::{session_for, StubProvider};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn store_with(stub: StubProvider) -> (Arc<SessionStore>, Arc<StubProvider>) {
        let stub = Arc::new(stub);
        let store = SessionStore::new(IdentityClient::new(stub.clone()));
        (store, stub)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_initial_state_is_unresolved() {
        let (store, _) = store_with(StubProvider::new());
        assert_eq!(store.current(), AuthState::Unresolved);
        assert!(!store.is_resolved());
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_resolve_with_remote_session() {
        let session = session_for("a@b.com", ChronoDuration::hours(1));
        let (store, _) = store_with(StubProvider::new().with_session(session.clone()));
        assert_eq!(store.resolve().await, AuthState::Authenticated(session));
        assert!(store.is_resolved());
    }

    #[tokio::test]
    async fn test_resolve_failure_defaults_to_unauthenticated() {
        let (store, _) = store_with(
            StubProvider::new().with_fetch_error(ProviderError::Network("offline".to_string())),
        );
        assert_eq!(store.resolve().await, AuthState::Unauthenticated);
        assert!(store.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_fetch() {
        let (store, stub) = store_with(
            StubProvider::new().with_fetch_delay(Duration::from_millis(500)),
        );
        let (a, b, c) = tokio::join!(store.resolve(), store.resolve(), store.resolve());
        assert_eq!(a, AuthState::Unauthenticated);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(stub.fetch_calls(), 1);

        // Once finished, a new resolve is allowed.
        store.resolve().await;
        assert_eq!(stub.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_before_resolution_wins_over_stale_fetch() {
        let stale = session_for("a@b.com", ChronoDuration::hours(1));
        let (store, stub) = store_with(
            StubProvider::new()
                .with_session(stale)
                .with_fetch_delay(Duration::from_millis(500)),
        );

        let resolving = {
            let store = store.clone();
            tokio::spawn(async move { store.resolve().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        stub.push(ChangeEvent::signed_out());
        settle().await;
        assert_eq!(store.current(), AuthState::Unauthenticated);

        assert_eq!(resolving.await.unwrap(), AuthState::Unauthenticated);
        assert_eq!(store.current(), AuthState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_resolution_wins() {
        let (store, stub) = store_with(StubProvider::new());
        assert_eq!(store.resolve().await, AuthState::Unauthenticated);

        let session = session_for("a@b.com", ChronoDuration::hours(1));
        stub.push(ChangeEvent::new(ChangeKind::SignedIn, Some(session.clone())));
        settle().await;
        assert_eq!(store.current(), AuthState::Authenticated(session));
    }

    #[tokio::test]
    async fn test_push_resolves_before_fetch() {
        let (store, stub) = store_with(StubProvider::new());
        store.init();
        stub.push(ChangeEvent::signed_out());
        tokio::time::timeout(Duration::from_secs(1), store.wait_until_resolved())
            .await
            .unwrap();
        assert_eq!(store.current(), AuthState::Unauthenticated);
    }

    // -------------------------------------------------------------------------
    // Subscribers
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_watch_delivers_current_then_transitions() {
        let (store, stub) = store_with(StubProvider::new().with_account("a@b.com", "secret1"));
        store.resolve().await;

        let mut stream = store.watch();
        assert_eq!(stream.recv().await, Some(AuthState::Unauthenticated));

        let session = store.login("a@b.com", "secret1").await.unwrap();
        assert_eq!(stream.recv().await, Some(AuthState::Authenticated(session)));

        stub.push(ChangeEvent::signed_out());
        assert_eq!(stream.recv().await, Some(AuthState::Unauthenticated));
    }

    #[tokio::test]
    async fn test_echo_of_same_session_is_not_a_transition() {
        let (store, _) = store_with(StubProvider::new().with_account("a@b.com", "secret1"));
        store.resolve().await;
        let mut stream = store.watch();
        stream.recv().await;

        // The stub echoes SignedIn with the same session the login returns.
        store.login("a@b.com", "secret1").await.unwrap();
        settle().await;
        assert!(stream.recv().await.unwrap().is_authenticated());
        assert!(stream.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_on_change_callback() {
        let (store, _) = store_with(StubProvider::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.on_change(move |state| sink.lock().unwrap().push(state.label()));

        store.resolve().await;
        settle().await;
        assert_eq!(*seen.lock().unwrap(), vec!["unresolved", "unauthenticated"]);
    }

    // -------------------------------------------------------------------------
    // Local actions
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_rejected_leaves_state_unauthenticated() {
        let (store, _) = store_with(StubProvider::new().with_account("a@b.com", "right1"));
        store.resolve().await;
        assert_eq!(
            store.login("a@b.com", "wrong").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(store.current(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logout_succeeds_locally_when_remote_fails() {
        let session = session_for("a@b.com", ChronoDuration::hours(1));
        let (store, stub) = store_with(
            StubProvider::new()
                .with_session(session)
                .with_sign_out_error(ProviderError::Network("offline".to_string())),
        );
        assert!(store.resolve().await.is_authenticated());

        store.logout().await;
        assert_eq!(store.current(), AuthState::Unauthenticated);
        assert_eq!(stub.sign_out_calls(), 1);
    }

    #[tokio::test]
    async fn test_register_pending_confirmation_keeps_state() {
        let (store, _) = store_with(StubProvider::new().requiring_confirmation());
        store.resolve().await;
        let outcome = store
            .register("new@b.com", "secret1", &ProfileAttributes::with_names("Ana", ""))
            .await
            .unwrap();
        assert!(matches!(outcome, SignUpOutcome::PendingConfirmation { .. }));
        assert_eq!(store.current(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_register_signed_in_authenticates() {
        let (store, _) = store_with(StubProvider::new());
        store.resolve().await;
        store
            .register("new@b.com", "secret1", &ProfileAttributes::default())
            .await
            .unwrap();
        assert!(store.current().is_authenticated());
    }

    #[tokio::test]
    async fn test_update_profile_replaces_user_snapshot() {
        let session = session_for("a@b.com", ChronoDuration::hours(1));
        let (store, _) = store_with(StubProvider::new().with_session(session));
        store.resolve().await;

        let updated = store
            .update_profile(ProfileAttributes::with_names("Ana", "Reyes"))
            .await
            .unwrap();
        assert_eq!(store.current_session(), Some(updated));
        assert_eq!(store.current().user().unwrap().display_name(), "Ana Reyes");
    }

    // -------------------------------------------------------------------------
    // Expiry & lifecycle
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expired_session_is_never_observed_as_authenticated() {
        let (store, stub) = store_with(StubProvider::new());
        store.resolve().await;

        let expired = session_for("a@b.com", ChronoDuration::seconds(-1));
        stub.push(ChangeEvent::new(ChangeKind::TokenRefreshed, Some(expired)));
        settle().await;
        assert_eq!(store.current(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_session_expiring_while_held_is_demoted_on_read() {
        let (store, _) = store_with(StubProvider::new());
        store.resolve().await;

        let almost = session_for("a@b.com", ChronoDuration::milliseconds(50));
        store.transition(AuthState::Authenticated(almost), Source::Local);
        let mut stream = store.watch();
        assert!(stream.recv().await.unwrap().is_authenticated());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.current(), AuthState::Unauthenticated);
        assert_eq!(stream.recv().await, Some(AuthState::Unauthenticated));
    }

    #[tokio::test]
    async fn test_teardown_stops_push_delivery_and_closes_streams() {
        let (store, stub) = store_with(StubProvider::new());
        store.resolve().await;
        let mut stream = store.watch();
        stream.recv().await;

        store.teardown();
        settle().await;
        assert_eq!(stub.listener_count(), 0);

        stub.push(ChangeEvent::new(
            ChangeKind::SignedIn,
            Some(session_for("a@b.com", ChronoDuration::hours(1))),
        ));
        settle().await;
        assert_eq!(store.current(), AuthState::Unauthenticated);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_teardown_before_resolution_settles_unauthenticated() {
        let (store, stub) = store_with(StubProvider::new().with_session(session_for(
            "a@b.com",
            ChronoDuration::hours(1),
        )));
        store.teardown();

        tokio::time::timeout(Duration::from_secs(1), store.wait_until_resolved())
            .await
            .unwrap();
        assert_eq!(store.resolve().await, AuthState::Unauthenticated);
        assert_eq!(stub.fetch_calls(), 0);
        assert_eq!(stub.listener_count(), 0);

        let mut stream = store.watch();
        assert_eq!(stream.recv().await, Some(AuthState::Unauthenticated));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_teardown_keeps_resolved_state() {
        let session = session_for("a@b.com", ChronoDuration::hours(1));
        let (store, _) = store_with(StubProvider::new().with_session(session.clone()));
        store.resolve().await;

        store.teardown();
        assert_eq!(store.resolve().await, AuthState::Authenticated(session));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (store, stub) = store_with(StubProvider::new());
        store.init();
        store.init();
        store.resolve().await;
        assert_eq!(stub.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_store_releases_provider_listener() {
        let (store, stub) = store_with(StubProvider::new());
        store.init();
        assert_eq!(stub.listener_count(), 1);

        drop(store);
        settle().await;
        assert_eq!(stub.listener_count(), 0);
    }
}
