//! Session state and the pre-dispatch gate.
//!
//! The gate answers one question per dispatch cycle: is it safe to attempt a
//! transfer right now? Both checks are read-only.

mod gate;
mod preferences;

pub use gate::{GateRejection, SessionGate};
pub use preferences::{validation, PreferencesStore};

use anyhow::Result;

/// Authentication state shared with the login flow.
pub trait AuthState: Send + Sync {
    /// True when the session marker holds the canonical "logged in" value.
    fn is_logged_in(&self) -> bool;

    /// Bearer token for the upload endpoint, if one is stored.
    fn session_token(&self) -> Option<String>;

    /// Base URL of the server the session belongs to.
    fn server_url(&self) -> Option<String>;

    /// Clears the marker and the token.
    fn invalidate_session(&self) -> Result<()>;
}
