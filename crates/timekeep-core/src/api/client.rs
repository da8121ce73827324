//! API client for the timekeep REST backend.
//!
//! Every call goes through the same loop: build the request with the current
//! credential, send it, decode the response, and on a 401 ask the
//! [`RefreshCoordinator`] whether to refresh, wait for someone else's
//! refresh, or give up. A call is re-issued at most once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::pipeline::{ApiRequest, PendingCall, RequestPipeline, ResponseClass, ResponsePipeline};
use super::ApiError;
use crate::auth::{
    Admission, AuthEvent, CredentialStore, LogoutReason, RefreshCoordinator, RefreshFailure,
    RefreshTicket, Session,
};
use crate::codec::FieldCodec;
use crate::config::Config;

/// Path of the cookie-authenticated refresh endpoint.
pub(crate) const REFRESH_PATH: &str = "/auth/refresh";

/// HTTP request timeout in seconds.
/// Matches the transport timeout the backend's load balancer enforces.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// API client for the timekeep backend.
/// Clone is cheap - the reqwest client, credential store and coordinator are
/// shared, so every clone sees the same session.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    requests: RequestPipeline,
    responses: ResponsePipeline,
    credentials: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client for `base_url` with its own credential store.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        // The cookie store carries the refresh session between calls
        let http = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(concat!("timekeep/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let codec = FieldCodec::default();
        let credentials = Arc::new(CredentialStore::new());
        let refresh = Arc::new(RefreshCoordinator::new(Arc::clone(&credentials)));

        Ok(Self {
            http,
            requests: RequestPipeline::new(base_url, codec),
            responses: ResponsePipeline::new(codec),
            credentials,
            refresh,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Receive login/refresh/logout notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.refresh.subscribe()
    }

    /// Run one logical call through the pipeline and return its decoded body.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let mut call = PendingCall::new(request);

        loop {
            let sent = self.credentials.snapshot();
            let class = self.send(&call.request, sent.token.as_deref()).await?;

            let payload = match class {
                ResponseClass::Success(value) => return Ok(value),
                ResponseClass::Failure { status, payload } => {
                    return Err(ApiError::from_status(status, payload));
                }
                ResponseClass::AuthorizationExpired(payload) => payload,
            };

            if !call.request.recoverable {
                return Err(ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, payload));
            }

            if call.retried {
                warn!(
                    method = %call.request.method,
                    path = %call.request.path,
                    "Rejected again after refresh"
                );
                self.refresh.sign_out(LogoutReason::Rejected);
                return Err(ApiError::AuthorizationTerminal);
            }

            self.recover(sent.generation).await?;
            call.retried = true;
            debug!(method = %call.request.method, path = %call.request.path, "Re-issuing call");
        }
    }

    /// Wait until a usable credential exists, refreshing if this call is the
    /// first to notice the expiry.
    async fn recover(&self, sent_generation: u64) -> Result<(), ApiError> {
        loop {
            match self.refresh.admit(sent_generation) {
                Admission::Retry => return Ok(()),
                Admission::Rejected => return Err(ApiError::AuthorizationTerminal),
                Admission::Owner(ticket) => return self.run_refresh(ticket).await,
                Admission::Wait(waiter) => match waiter.wait().await {
                    Ok(_) => return Ok(()),
                    // Nobody settled the refresh; try to take it over
                    Err(RefreshFailure::Abandoned) => {
                        debug!("Refresh abandoned, requesting admission again");
                    }
                    Err(failure) => return Err(failure.into()),
                },
            }
        }
    }

    /// Perform the refresh on its own task, so dropping the owning call
    /// cannot cancel it out from under the waiters.
    async fn run_refresh(&self, ticket: RefreshTicket) -> Result<(), ApiError> {
        let client = self.clone();
        let task = tokio::spawn(async move {
            match client.request_refresh().await {
                Ok(session) => ticket
                    .succeed(session.access_token)
                    .map(|_| ())
                    .map_err(ApiError::from),
                Err(e) => {
                    warn!(error = %e, "Refresh call failed");
                    ticket.fail();
                    Err(ApiError::AuthorizationTerminal)
                }
            }
        });

        task.await.unwrap_or_else(|e| {
            warn!(error = %e, "Refresh task did not finish");
            Err(ApiError::RefreshAbandoned)
        })
    }

    /// Exchange the session cookie for a new access token.
    async fn request_refresh(&self) -> Result<Session, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).anonymous();
        match self.send(&request, None).await? {
            ResponseClass::Success(value) => serde_json::from_value(value)
                .map_err(|e| ApiError::InvalidResponse(format!("Bad refresh response: {}", e))),
            ResponseClass::AuthorizationExpired(_) => Err(ApiError::AuthorizationTerminal),
            ResponseClass::Failure { status, payload } => Err(ApiError::from_status(status, payload)),
        }
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<ResponseClass, ApiError> {
        debug!(method = %request.method, path = %request.path, "Sending request");
        let response = self.requests.build(&self.http, request, token)?.send().await?;
        self.responses.classify(response).await
    }

    /// Execute and deserialize the application-convention body into `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let value = self.execute(request).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.fetch(ApiRequest::post(path).json(to_value(body)?)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.fetch(ApiRequest::put(path).json(to_value(body)?)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }
}

pub(crate) fn to_value<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}
