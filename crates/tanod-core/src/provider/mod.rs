//! Identity provider contract and adapters.
//!
//! The identity provider is the service of record for credentials and
//! sessions. `IdentityProvider` is the contract the rest of the crate
//! consumes; `SupabaseProvider` implements it against a GoTrue-compatible
//! REST API and keeps the provider-managed session on disk.

pub mod storage;
pub mod supabase;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ProviderError;
use crate::models::{ChangeEvent, ProfileAttributes, Session, SignUpOutcome, User, UserPatch};

pub use storage::SessionFile;
pub use supabase::SupabaseProvider;

/// Capacity of a provider's change-event channel.
/// Change events are rare (sign-in, refresh, sign-out); 16 leaves room for bursts.
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: &ProfileAttributes,
    ) -> Result<SignUpOutcome, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Current session, or `None` when signed out.
    async fn get_session(&self) -> Result<Option<Session>, ProviderError>;

    async fn update_user(&self, patch: &UserPatch) -> Result<User, ProviderError>;

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// Register for change events. Events sent after this returns are
    /// delivered to the receiver.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
