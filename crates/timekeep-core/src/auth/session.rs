use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::User;

/// Body returned by login, signup and refresh, in application convention.
///
/// Only `accessToken` is required. A `user` this client cannot read is
/// logged and dropped rather than failing the whole exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default, deserialize_with = "lenient_user")]
    pub user: Option<User>,
}

fn lenient_user<'de, D>(deserializer: D) -> Result<Option<User>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match serde_json::from_value(value) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable user in session response");
            None
        }
    }))
}

/// Why the pipeline dropped the user's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `logout()` was called.
    UserRequested,
    /// The refresh call failed or was rejected.
    RefreshFailed,
    /// A call was rejected again after being retried with a fresh credential.
    Rejected,
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogoutReason::UserRequested => write!(f, "signed out"),
            LogoutReason::RefreshFailed => write!(f, "session could not be renewed"),
            LogoutReason::Rejected => write!(f, "credentials rejected by server"),
        }
    }
}

/// Session lifecycle notifications broadcast to the application.
///
/// `LoggedOut` with any reason other than `UserRequested` is the signal to
/// navigate to the login view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    Refreshed,
    LoggedOut { reason: LogoutReason },
}

impl AuthEvent {
    /// True when the application should show the login view.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthEvent::LoggedOut {
                reason: LogoutReason::RefreshFailed | LogoutReason::Rejected
            }
        )
    }
}
