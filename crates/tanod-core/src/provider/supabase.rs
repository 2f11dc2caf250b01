//! GoTrue / Supabase Auth adapter.
//!
//! Talks to the provider's REST endpoints under `/auth/v1`, keeps the
//! provider-managed session in memory (and in `session.json` when a
//! `SessionFile` is configured), and broadcasts a `ChangeEvent` whenever the
//! session changes.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{IdentityProvider, SessionFile, CHANGE_CHANNEL_CAPACITY};
use crate::error::ProviderError;
use crate::models::{
    ChangeEvent, ChangeKind, ProfileAttributes, Session, SignUpOutcome, User, UserPatch,
};
use crate::subscription::Subscription;

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of the auth API
const AUTH_PATH: &str = "auth/v1";

/// Token lifetime assumed when the provider omits `expires_in`.
/// GoTrue's default JWT expiry is one hour.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// How often the auto-refresh task checks the session.
/// 30s is well inside the 5 minute refresh buffer.
const AUTO_REFRESH_TICK_SECS: u64 = 30;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    refresh_token: Option<String>,
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<ProfileAttributes>,
}

/// Sign-up returns a full token response when no confirmation is needed and
/// a bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(WireUser),
}

impl From<WireUser> for User {
    fn from(w: WireUser) -> Self {
        User {
            id: w.id,
            email: w.email.unwrap_or_default(),
            profile: w.user_metadata.unwrap_or_default(),
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let now = Utc::now();
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                now + chrono::Duration::seconds(
                    self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
                )
            });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user.into(),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Identity provider backed by a GoTrue-compatible REST API.
pub struct SupabaseProvider {
    client: Client,
    base_url: String,
    anon_key: String,
    file: Option<SessionFile>,
    session: RwLock<Option<Session>>,
    loaded: OnceCell<()>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<ChangeEvent>,
}

impl SupabaseProvider {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        file: Option<SessionFile>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            file,
            session: RwLock::new(None),
            loaded: OnceCell::new(),
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    /// Refresh the session in the background before it expires.
    /// The task stops when the returned handle is dropped or the provider goes away.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> Subscription {
        self.spawn_auto_refresh_every(Duration::from_secs(AUTO_REFRESH_TICK_SECS))
    }

    pub(crate) fn spawn_auto_refresh_every(self: &Arc<Self>, period: Duration) -> Subscription {
        let provider = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(provider) = provider.upgrade() else {
                    break;
                };
                provider.refresh_if_needed().await;
            }
        });
        Subscription::new("auto-refresh", task)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, AUTH_PATH, endpoint)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    async fn check_response(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), &body))
    }

    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let Some(ref file) = self.file else {
                    return;
                };
                match file.load().await {
                    Ok(Some(session)) => {
                        debug!(user_id = %session.user.id, "Restored persisted session");
                        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
                    }
                    Ok(None) => debug!("No persisted session"),
                    Err(e) => warn!(error = %e, "Failed to load persisted session"),
                }
            })
            .await;
    }

    /// Replace the current session, persist it and broadcast the change.
    async fn set_session(&self, session: Option<Session>, kind: ChangeKind) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session.clone();

        if let Some(ref file) = self.file {
            let result = match session {
                Some(ref s) => file.save(s).await,
                None => file.clear().await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to persist session");
            }
        }

        let receivers = self.events.send(ChangeEvent::new(kind, session)).unwrap_or(0);
        debug!(?kind, receivers, "Session change broadcast");
    }

    async fn refresh_session(&self, stale: &Session) -> Result<Session, ProviderError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(current) = self.current() {
            if current.refresh_token != stale.refresh_token && !current.needs_refresh() {
                return Ok(current);
            }
        }

        let refresh_token = stale
            .refresh_token
            .as_deref()
            .ok_or(ProviderError::MissingSession)?;

        let response = self
            .request(self.client.post(self.url("token")))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let tokens: TokenResponse = response.json().await?;
        let session = tokens.into_session();

        info!(user_id = %session.user.id, "Session refreshed");
        self.set_session(Some(session.clone()), ChangeKind::TokenRefreshed)
            .await;
        Ok(session)
    }

    /// Refresh a session close to expiry. A rejected refresh token signs the
    /// user out; a network failure keeps the session until it actually expires.
    async fn refresh_if_needed(&self) -> Option<Session> {
        self.ensure_loaded().await;
        let session = self.current()?;
        if !session.needs_refresh() {
            return Some(session);
        }

        if session.refresh_token.is_none() {
            if session.is_expired() {
                info!("Session expired without refresh token");
                self.set_session(None, ChangeKind::SignedOut).await;
                return None;
            }
            return Some(session);
        }

        match self.refresh_session(&session).await {
            Ok(refreshed) => Some(refreshed),
            Err(e) if e.is_refresh_rejected() => {
                warn!(error = %e, "Refresh token rejected, signing out");
                self.set_session(None, ChangeKind::SignedOut).await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                (!session.is_expired()).then_some(session)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let response = self
            .request(self.client.post(self.url("token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let tokens: TokenResponse = response.json().await?;
        let session = tokens.into_session();

        self.set_session(Some(session.clone()), ChangeKind::SignedIn)
            .await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: &ProfileAttributes,
    ) -> Result<SignUpOutcome, ProviderError> {
        let response = self
            .request(self.client.post(self.url("signup")))
            .json(&json!({ "email": email, "password": password, "data": attributes }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session(tokens) => {
                let session = tokens.into_session();
                self.set_session(Some(session.clone()), ChangeKind::SignedIn)
                    .await;
                Ok(SignUpOutcome::SignedIn(session))
            }
            SignUpResponse::User(user) => {
                info!(user_id = %user.id, "Sign-up pending email confirmation");
                Ok(SignUpOutcome::PendingConfirmation { user: user.into() })
            }
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.ensure_loaded().await;
        let token = self.current().map(|s| s.access_token);

        let remote = match token {
            Some(token) => {
                let result = self
                    .request(self.client.post(self.url("logout")))
                    .bearer_auth(token)
                    .send()
                    .await;
                match result {
                    Ok(response) => Self::check_response(response).await.map(|_| ()),
                    Err(e) => Err(e.into()),
                }
            }
            None => Ok(()),
        };

        // The local session always goes, whatever the provider said.
        self.set_session(None, ChangeKind::SignedOut).await;

        match remote {
            // Token already revoked or unknown: nothing left to sign out of.
            Err(ProviderError::Api {
                status: 401 | 403 | 404,
                ..
            }) => Ok(()),
            other => other,
        }
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        self.ensure_loaded().await;
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.needs_refresh() {
            return Ok(Some(session));
        }

        if session.refresh_token.is_none() {
            if session.is_expired() {
                self.set_session(None, ChangeKind::SignedOut).await;
                return Ok(None);
            }
            return Ok(Some(session));
        }

        match self.refresh_session(&session).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(e) if e.is_refresh_rejected() => {
                warn!(error = %e, "Refresh token rejected during session fetch");
                self.set_session(None, ChangeKind::SignedOut).await;
                Ok(None)
            }
            Err(e) if !session.is_expired() => {
                warn!(error = %e, "Refresh failed, using current session until expiry");
                Ok(Some(session))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_user(&self, patch: &UserPatch) -> Result<User, ProviderError> {
        self.ensure_loaded().await;
        let session = self.current().ok_or(ProviderError::MissingSession)?;

        let response = self
            .request(self.client.put(self.url("user")))
            .bearer_auth(&session.access_token)
            .json(patch)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let user: User = response.json::<WireUser>().await?.into();

        // Only swap the snapshot if the session wasn't replaced meanwhile.
        if self.current().map(|s| s.access_token) == Some(session.access_token.clone()) {
            self.set_session(Some(session.with_user(user.clone())), ChangeKind::UserUpdated)
                .await;
        }
        Ok(user)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut builder = self
            .request(self.client.post(self.url("recover")))
            .json(&json!({ "email": email }));
        if let Some(redirect) = redirect_to {
            builder = builder.query(&[("redirect_to", redirect)]);
        }

        let response = builder.send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
