use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fallback shown when a user has no usable name or email.
const DEFAULT_DISPLAY_NAME: &str = "User";

/// Fallback avatar initial.
const DEFAULT_INITIAL: char = 'U';

/// Profile attributes supplied at registration or later updated.
///
/// The provider stores these as free-form metadata; the known keys are
/// typed here and anything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    #[serde(
        rename = "displayName",
        alias = "display_name",
        alias = "full_name",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub display_name: Option<String>,

    #[serde(
        rename = "firstName",
        alias = "first_name",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub first_name: Option<String>,

    #[serde(
        rename = "lastName",
        alias = "last_name",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub last_name: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProfileAttributes {
    pub fn with_names(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: non_blank(first_name),
            last_name: non_blank(last_name),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.extra.is_empty()
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Immutable user snapshot embedded in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile: ProfileAttributes,
}

impl User {
    /// Best available name: display name, then "first last", then email.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.profile.display_name.as_deref().and_then(non_blank) {
            return name;
        }

        let full = [self.profile.first_name.as_deref(), self.profile.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return full;
        }

        non_blank(&self.email).unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
    }

    /// Avatar initial from the first name
    pub fn initial(&self) -> char {
        self.profile
            .first_name
            .as_deref()
            .and_then(|n| n.trim().chars().next())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or(DEFAULT_INITIAL)
    }
}

/// Partial update sent to the provider's update-user endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "data", skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileAttributes>,
}
