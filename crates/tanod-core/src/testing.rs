//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::ProviderError;
use crate::gate::Navigator;
use crate::models::{
    ChangeEvent, ChangeKind, ProfileAttributes, RouteId, Session, SignUpOutcome, User, UserPatch,
};
use crate::provider::{IdentityProvider, CHANGE_CHANNEL_CAPACITY};

pub(crate) fn session_for(email: &str, valid_for: chrono::Duration) -> Session {
    Session {
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        token_type: "bearer".to_string(),
        expires_at: Utc::now() + valid_for,
        user: User {
            id: "user-1".to_string(),
            email: email.to_string(),
            profile: ProfileAttributes::default(),
        },
    }
}

pub(crate) fn rejected_credentials() -> ProviderError {
    ProviderError::Api {
        status: 400,
        code: Some("invalid_credentials".to_string()),
        message: "Invalid login credentials".to_string(),
    }
}

/// Scriptable in-memory identity provider.
pub(crate) struct StubProvider {
    accounts: Mutex<HashMap<String, String>>,
    session: Mutex<Option<Session>>,
    fetch_delay: Mutex<Duration>,
    fetch_error: Mutex<Option<ProviderError>>,
    sign_out_error: Mutex<Option<ProviderError>>,
    reset_error: Mutex<Option<ProviderError>>,
    require_confirmation: AtomicBool,
    fetch_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    events: broadcast::Sender<ChangeEvent>,
}

impl StubProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            fetch_delay: Mutex::new(Duration::ZERO),
            fetch_error: Mutex::new(None),
            sign_out_error: Mutex::new(None),
            reset_error: Mutex::new(None),
            require_confirmation: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            events,
        }
    }

    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());
        self
    }

    pub fn with_session(self, session: Session) -> Self {
        *self.session.lock().unwrap() = Some(session);
        self
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_fetch_error(self, error: ProviderError) -> Self {
        *self.fetch_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_sign_out_error(self, error: ProviderError) -> Self {
        *self.sign_out_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_reset_error(self, error: ProviderError) -> Self {
        *self.reset_error.lock().unwrap() = Some(error);
        self
    }

    pub fn requiring_confirmation(self) -> Self {
        self.require_confirmation.store(true, Ordering::SeqCst);
        self
    }

    /// Simulate a provider-initiated change.
    pub fn push(&self, event: ChangeEvent) {
        *self.session.lock().unwrap() = event.session.clone();
        let _ = self.events.send(event);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let known = self.accounts.lock().unwrap().get(email).cloned();
        if known.as_deref() != Some(password) {
            return Err(rejected_credentials());
        }
        let session = session_for(email, chrono::Duration::hours(1));
        self.push(ChangeEvent::new(ChangeKind::SignedIn, Some(session.clone())));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: &ProfileAttributes,
    ) -> Result<SignUpOutcome, ProviderError> {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());

        let mut session = session_for(email, chrono::Duration::hours(1));
        session.user.profile = attributes.clone();

        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome::PendingConfirmation { user: session.user });
        }
        self.push(ChangeEvent::new(ChangeKind::SignedIn, Some(session.clone())));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.sign_out_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.push(ChangeEvent::signed_out());
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // Captured before the delay so a late answer can be stale.
        let session = self.session.lock().unwrap().clone();
        let error = self.fetch_error.lock().unwrap().clone();
        let delay = *self.fetch_delay.lock().unwrap();

        tokio::time::sleep(delay).await;
        match error {
            Some(err) => Err(err),
            None => Ok(session),
        }
    }

    async fn update_user(&self, patch: &UserPatch) -> Result<User, ProviderError> {
        let mut guard = self.session.lock().unwrap();
        let session = guard.as_mut().ok_or(ProviderError::MissingSession)?;
        if let Some(ref profile) = patch.profile {
            session.user.profile = profile.clone();
        }
        Ok(session.user.clone())
    }

    async fn reset_password_for_email(
        &self,
        _email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        match self.reset_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

/// Navigator that records every root replacement with its (tokio) time.
pub(crate) struct RecordingNavigator {
    calls: Mutex<Vec<(RouteId, Instant)>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn routes(&self) -> Vec<RouteId> {
        self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }

    pub fn calls(&self) -> Vec<(RouteId, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn replace_root(&self, route: RouteId) {
        self.calls.lock().unwrap().push((route, Instant::now()));
    }
}
