//! Data models for the session lifecycle.
//!
//! This module contains the value types shared by the identity client,
//! the session store and the bootstrap gate:
//! - `Session` / `User`: provider-issued credentials and the user snapshot
//! - `AuthState`: the single current authentication state
//! - `ChangeEvent`: provider-pushed session notifications
//! - `RouteId`: the navigation roots the gate can select

pub mod session;
pub mod state;
pub mod user;

pub use session::Session;
pub use state::{AuthState, ChangeEvent, ChangeKind, RouteId, SignUpOutcome, StoredCredentials};
pub use user::{ProfileAttributes, User, UserPatch};
