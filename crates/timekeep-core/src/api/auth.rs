//! Session operations: login, signup, logout, current user.
//!
//! Login and signup are credential exchanges, so a 401 from them is a plain
//! application error and never starts a refresh.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::client::{to_value, ApiClient};
use super::pipeline::ApiRequest;
use super::ApiError;
use crate::auth::{AuthEvent, LogoutReason, Session};
use crate::models::User;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl ApiClient {
    /// Authenticate with email and password and install the returned credential.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let request = ApiRequest::post("/auth/login")
            .json(json!({ "email": email, "password": password }))
            .credential_exchange();
        let session: Session = self.fetch(request).await?;
        self.install(&session);
        info!("Logged in");
        Ok(session)
    }

    /// Create an account and install the returned credential.
    pub async fn signup(&self, signup: &SignupRequest) -> Result<Session, ApiError> {
        let request = ApiRequest::post("/auth/signup")
            .json(to_value(signup)?)
            .credential_exchange();
        let session: Session = self.fetch(request).await?;
        self.install(&session);
        info!("Signed up");
        Ok(session)
    }

    /// End the session. The server call is best effort; the local credential
    /// is always cleared.
    pub async fn logout(&self) {
        let request = ApiRequest::post("/auth/logout").credential_exchange();
        if let Err(e) = self.execute(request).await {
            debug!(error = %e, "Server logout failed, clearing local session anyway");
        }
        self.coordinator().sign_out(LogoutReason::UserRequested);
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    fn install(&self, session: &Session) {
        self.credentials().set(session.access_token.clone());
        self.coordinator().emit(AuthEvent::LoggedIn);
    }
}
