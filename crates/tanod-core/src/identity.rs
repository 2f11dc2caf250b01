//! Typed facade over the identity provider.
//!
//! Every operation is a single provider round trip bounded by a client-side
//! timeout, with provider failures mapped into `AuthError`. Raw provider
//! messages are logged here and never shown to the user.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::{AuthError, ProviderError};
use crate::models::{ChangeEvent, ProfileAttributes, Session, SignUpOutcome, User, UserPatch};
use crate::provider::IdentityProvider;
use crate::subscription::Subscription;

/// Default timeout for a provider round trip.
/// 15s fails fast enough for good UX on a mobile connection.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct IdentityClient {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
    reset_redirect: Option<String>,
}

impl IdentityClient {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            reset_redirect: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deep link the password-reset email should open.
    pub fn with_reset_redirect(mut self, redirect: Option<String>) -> Self {
        self.reset_redirect = redirect;
        self
    }

    /// Run a provider call under the timeout, mapping failures.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match self.raw_call(operation, fut).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation, error = %e, "Identity provider call failed");
                Err(e.into())
            }
        }
    }

    async fn raw_call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        debug!(operation, "Identity provider call");
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_secs = self.timeout.as_secs(), "Identity provider timed out");
                Err(ProviderError::Timeout)
            }
        }
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let session = self
            .call("sign_in", self.provider.sign_in(identifier, secret))
            .await?;
        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }

    pub async fn sign_up(
        &self,
        identifier: &str,
        secret: &str,
        attributes: &ProfileAttributes,
    ) -> Result<SignUpOutcome, AuthError> {
        let outcome = self
            .call("sign_up", self.provider.sign_up(identifier, secret, attributes))
            .await?;
        match outcome {
            SignUpOutcome::SignedIn(ref s) => info!(user_id = %s.user.id, "Signed up"),
            SignUpOutcome::PendingConfirmation { ref user } => {
                info!(user_id = %user.id, "Signed up, awaiting email confirmation")
            }
        }
        Ok(outcome)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.call("sign_out", self.provider.sign_out()).await
    }

    /// Ask the provider to send a reset email. An unknown account is reported
    /// as success so the response does not reveal which emails are registered.
    pub async fn request_password_reset(&self, identifier: &str) -> Result<(), AuthError> {
        let redirect = self.reset_redirect.as_deref();
        match self
            .raw_call(
                "request_password_reset",
                self.provider.reset_password_for_email(identifier, redirect),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_user_not_found() => {
                debug!("Password reset for unknown account, reporting success");
                Ok(())
            }
            Err(e) => {
                warn!(operation = "request_password_reset", error = %e, "Identity provider call failed");
                Err(e.into())
            }
        }
    }

    pub async fn update_password(&self, new_secret: &str) -> Result<(), AuthError> {
        self.require_session().await?;
        let patch = UserPatch {
            password: Some(new_secret.to_string()),
            profile: None,
        };
        self.call("update_password", self.provider.update_user(&patch))
            .await?;
        info!("Password updated");
        Ok(())
    }

    pub async fn update_profile(&self, attributes: ProfileAttributes) -> Result<User, AuthError> {
        self.require_session().await?;
        let patch = UserPatch {
            password: None,
            profile: Some(attributes),
        };
        self.call("update_profile", self.provider.update_user(&patch))
            .await
    }

    pub async fn fetch_current_session(&self) -> Result<Option<Session>, AuthError> {
        self.call("fetch_current_session", self.provider.get_session())
            .await
    }

    async fn require_session(&self) -> Result<Session, AuthError> {
        match self.fetch_current_session().await? {
            Some(session) if !session.is_expired() => Ok(session),
            _ => Err(AuthError::Unauthenticated),
        }
    }

    /// Invoke `handler` for every provider-pushed change, in order.
    ///
    /// The provider registration happens before this returns, so no event
    /// sent afterwards is missed. Must be called inside a tokio runtime.
    pub fn subscribe_to_changes<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let mut events = self.provider.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(kind = ?event.kind, "Provider change event");
                        handler(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change listener lagged, older events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Provider change feed closed");
                        break;
                    }
                }
            }
        });
        Subscription::new("provider-changes", task)
    }
}

// ============================================================================
// Tests
// ============================================================================
