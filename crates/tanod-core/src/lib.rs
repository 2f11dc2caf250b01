//! Tanod core - session lifecycle for the Tanod mobile client.
//!
//! Knows whether a user is signed in, keeps that answer current as the
//! identity provider pushes changes, and decides which navigation root to
//! show at boot and afterwards. UI shells (the CLI, a mobile host) depend on
//! this crate and supply a `Navigator`.

pub mod app;
pub mod config;
pub mod error;
pub mod forms;
pub mod gate;
pub mod identity;
pub mod models;
pub mod provider;
pub mod store;
pub mod subscription;
pub mod vault;

#[cfg(test)]
mod testing;

pub use app::AppContext;
pub use config::{Config, SecretBackend};
pub use error::{AuthError, ProviderError};
pub use gate::{BootstrapGate, GateHandle, GatePhase, Navigator};
pub use identity::IdentityClient;
pub use models::{AuthState, ChangeEvent, ChangeKind, RouteId, Session, User};
pub use store::SessionStore;
pub use subscription::Subscription;
pub use vault::CredentialVault;
