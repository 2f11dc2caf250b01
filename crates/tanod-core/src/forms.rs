//! Form logic for the auth screens: validation, submission, remember-me.
//!
//! The forms hold raw field values and talk to the session store; rendering
//! and input capture belong to whatever UI drives them.

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::identity::IdentityClient;
use crate::models::{ProfileAttributes, Session, SignUpOutcome};
use crate::store::SessionStore;
use crate::vault::CredentialVault;

/// Maximum identifier length (RFC 5321 path limit)
const MAX_IDENTIFIER_LENGTH: usize = 254;

/// Maximum secret length
const MAX_SECRET_LENGTH: usize = 128;

/// Minimum password length accepted for new passwords.
/// Matches the identity provider's default policy.
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl FormError {
    /// Text safe to show the user.
    pub fn user_message(&self) -> &str {
        match self {
            FormError::Validation(msg) => msg,
            FormError::Auth(e) => e.user_message(),
        }
    }

    fn invalid(msg: &str) -> Self {
        FormError::Validation(msg.to_string())
    }
}

// ============================================================================
// Input helpers
// ============================================================================

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if an identifier character should be accepted
pub fn can_add_identifier_char(current_len: usize, c: char) -> bool {
    current_len < MAX_IDENTIFIER_LENGTH && is_valid_input_char(c)
}

/// Check if a secret character should be accepted
pub fn can_add_secret_char(current_len: usize, c: char) -> bool {
    current_len < MAX_SECRET_LENGTH && is_valid_input_char(c)
}

/// Loose shape check; the provider does the real validation.
fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

fn validate_identifier(identifier: &str) -> Result<(), FormError> {
    if identifier.is_empty() {
        return Err(FormError::invalid("Please enter your email."));
    }
    if !looks_like_email(identifier) {
        return Err(FormError::invalid("Please enter a valid email address."));
    }
    Ok(())
}

fn validate_new_password(password: &str) -> Result<(), FormError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(FormError::Validation(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub identifier: String,
    pub secret: String,
    pub remember_me: bool,
}

impl LoginForm {
    /// Build the form, prefilled from the vault when something is remembered.
    pub async fn mount(vault: &CredentialVault) -> Self {
        match vault.load().await {
            Ok(Some(saved)) => {
                debug!("Prefilling login form from vault");
                Self {
                    identifier: saved.identifier,
                    secret: saved.secret,
                    remember_me: true,
                }
            }
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read remembered credentials");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), FormError> {
        validate_identifier(self.identifier.trim())?;
        if self.secret.is_empty() {
            return Err(FormError::invalid("Please enter your password."));
        }
        Ok(())
    }

    /// Sign in, then save or forget the credentials per `remember_me`.
    /// The secret field is cleared whatever the outcome.
    pub async fn submit(
        &mut self,
        store: &SessionStore,
        vault: &CredentialVault,
    ) -> Result<Session, FormError> {
        let result = self.try_submit(store, vault).await;
        self.secret.clear();
        result
    }

    async fn try_submit(
        &self,
        store: &SessionStore,
        vault: &CredentialVault,
    ) -> Result<Session, FormError> {
        self.validate()?;
        let identifier = self.identifier.trim();
        let session = store.login(identifier, &self.secret).await?;

        let remembered = if self.remember_me {
            vault.save(identifier, &self.secret).await
        } else {
            vault.clear().await
        };
        if let Err(e) = remembered {
            warn!(error = %e, remember_me = self.remember_me, "Failed to update remembered credentials");
        }
        Ok(session)
    }
}

// ============================================================================
// Registration
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub first_name: String,
    pub last_name: String,
    pub identifier: String,
    pub secret: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.first_name.trim().is_empty() {
            return Err(FormError::invalid("Please enter your first name."));
        }
        validate_identifier(self.identifier.trim())?;
        validate_new_password(&self.secret)
    }

    pub fn attributes(&self) -> ProfileAttributes {
        ProfileAttributes::with_names(self.first_name.trim(), self.last_name.trim())
    }

    /// Create the account. The secret field is cleared afterwards.
    pub async fn submit(&mut self, store: &SessionStore) -> Result<SignUpOutcome, FormError> {
        let result = match self.validate() {
            Ok(()) => store
                .register(self.identifier.trim(), &self.secret, &self.attributes())
                .await
                .map_err(FormError::from),
            Err(e) => Err(e),
        };
        self.secret.clear();
        result
    }
}

// ============================================================================
// Password update
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PasswordUpdateForm {
    pub password: String,
    pub confirmation: String,
}

impl PasswordUpdateForm {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.password != self.confirmation {
            return Err(FormError::invalid("Passwords do not match."));
        }
        validate_new_password(&self.password)
    }

    /// Update the signed-in user's password. Both fields are cleared afterwards.
    pub async fn submit(&mut self, identity: &IdentityClient) -> Result<(), FormError> {
        let result = match self.validate() {
            Ok(()) => identity
                .update_password(&self.password)
                .await
                .map_err(FormError::from),
            Err(e) => Err(e),
        };
        self.password.clear();
        self.confirmation.clear();
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
