use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Session, User};

/// The single current authentication state.
///
/// `Unresolved` only exists until the first resolution; after that the
/// state cycles between `Unauthenticated` and `Authenticated`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AuthState {
    #[default]
    Unresolved,
    Unauthenticated,
    Authenticated(Session),
}

impl AuthState {
    pub fn from_session(session: Option<Session>) -> Self {
        match session {
            Some(session) => AuthState::Authenticated(session),
            None => AuthState::Unauthenticated,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, AuthState::Unresolved)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }

    /// Short label for logs (never includes tokens)
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unresolved => "unresolved",
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated(_) => "authenticated",
        }
    }
}

/// Navigation roots the bootstrap gate can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum RouteId {
    AuthRoot,
    DashboardRoot,
}

impl RouteId {
    /// Root for a resolved state; `None` while still unresolved.
    pub fn for_state(state: &AuthState) -> Option<Self> {
        match state {
            AuthState::Unresolved => None,
            AuthState::Unauthenticated => Some(RouteId::AuthRoot),
            AuthState::Authenticated(_) => Some(RouteId::DashboardRoot),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteId::AuthRoot => "auth-root",
            RouteId::DashboardRoot => "dashboard-root",
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the provider pushed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Provider-initiated session notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub session: Option<Session>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_out() -> Self {
        Self::new(ChangeKind::SignedOut, None)
    }
}

/// Result of a registration.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The provider issued a session straight away.
    SignedIn(Session),
    /// The account exists but the email must be confirmed before signing in.
    PendingConfirmation { user: User },
}

/// Remembered login for the "remember me" option.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub identifier: String,
    pub secret: String,
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}
