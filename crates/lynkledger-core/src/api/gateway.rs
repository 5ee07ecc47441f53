//! Authenticated request gateway.
//!
//! Every call to the LynkLedger backend goes through [`Gateway::send`]. The
//! stored access token is attached as a bearer credential; when the backend
//! answers 401 the gateway refreshes the token once through
//! `POST /token/refresh/` and resubmits the request. If no refresh is
//! possible the session is torn down and the caller gets the original 401.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::request::{PendingRequest, RequestDescriptor};
use super::GatewayError;
use crate::auth::{SessionContext, SessionEndReason};
use crate::config::{Config, DEFAULT_TIMEOUT_SECS};

// ============================================================================
// Constants
// ============================================================================

/// Path of the token refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/token/refresh/";

const USER_AGENT: &str = concat!("lynkledger-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Terminal state of one logical request, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failed,
    RetriedSuccess,
    RetriedFailed,
    SessionCleared,
}

/// Client for the LynkLedger REST API.
/// Clone is cheap - the connection pool, session and refresh lock are shared.
#[derive(Clone)]
pub struct Gateway {
    client: Client,
    base_url: String,
    session: Arc<SessionContext>,
    refresh_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish()
    }
}

impl Gateway {
    /// Create a gateway with the default timeout.
    pub fn new(
        base_url: impl Into<String>,
        session: Arc<SessionContext>,
    ) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, session, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn from_config(config: &Config, session: Arc<SessionContext>) -> Result<Self, GatewayError> {
        Self::with_timeout(config.api_url.clone(), session, config.timeout())
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        session: Arc<SessionContext>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("API base URL is required".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(GatewayError::from_transport)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Send a request with the stored credentials.
    ///
    /// A 401 is recovered once through a token refresh; the caller only sees
    /// the final response or the terminal error.
    pub async fn send(&self, request: &RequestDescriptor) -> Result<Response, GatewayError> {
        let pending = PendingRequest::new(request.clone());
        let epoch = self.session.epoch();
        let token = self.session.access_token()?;

        let response = self.execute(&pending, token.as_deref()).await?;
        let status = response.status();
        if status.is_success() {
            log_outcome(&pending, status, RequestOutcome::Success);
            return Ok(response);
        }

        let error = Self::error_from(response).await;
        if status == StatusCode::UNAUTHORIZED {
            return self.on_unauthorized(pending, error, token, epoch).await;
        }

        log_outcome(&pending, status, RequestOutcome::Failed);
        Err(error)
    }

    /// Send without credentials and without refresh handling.
    ///
    /// For the credential endpoints themselves, where a 401 means "wrong
    /// password" rather than "expired session".
    pub async fn send_public(&self, request: &RequestDescriptor) -> Result<Response, GatewayError> {
        let pending = PendingRequest::new(request.clone());
        let response = self.execute(&pending, None).await?;
        let status = response.status();
        if status.is_success() {
            log_outcome(&pending, status, RequestOutcome::Success);
            Ok(response)
        } else {
            log_outcome(&pending, status, RequestOutcome::Failed);
            Err(Self::error_from(response).await)
        }
    }

    /// React to a first 401: refresh once, then resubmit once.
    async fn on_unauthorized(
        &self,
        pending: PendingRequest,
        original: GatewayError,
        rejected_token: Option<String>,
        epoch: u64,
    ) -> Result<Response, GatewayError> {
        let retry = pending.into_retry();

        let Some(token) = self.refreshed_token(rejected_token.as_deref(), epoch).await? else {
            log_outcome(&retry, StatusCode::UNAUTHORIZED, RequestOutcome::SessionCleared);
            return Err(original);
        };

        let response = self.execute(&retry, Some(&token)).await?;
        let status = response.status();
        if status.is_success() {
            log_outcome(&retry, status, RequestOutcome::RetriedSuccess);
            return Ok(response);
        }

        let error = Self::error_from(response).await;
        if status == StatusCode::UNAUTHORIZED {
            // A freshly issued token was rejected too; the session is unusable.
            warn!(path = retry.descriptor.path(), "Refreshed token rejected");
            self.session
                .teardown_if_current(epoch, SessionEndReason::RetryRejected);
        }
        log_outcome(&retry, status, RequestOutcome::RetriedFailed);
        Err(error)
    }

    /// Get a usable access token after `rejected` was refused.
    ///
    /// Refreshes are serialized: a request that waited on another request's
    /// refresh reuses its token instead of refreshing again. Returns `None`
    /// when the session has ended (here or by a concurrent request).
    async fn refreshed_token(
        &self,
        rejected: Option<&str>,
        epoch: u64,
    ) -> Result<Option<String>, GatewayError> {
        let _lock = self.refresh_lock.lock().await;

        if self.session.epoch() != epoch {
            debug!("Session ended while waiting for refresh");
            return Ok(None);
        }

        if let Some(current) = self.session.access_token()? {
            if rejected != Some(current.as_str()) {
                debug!("Reusing access token refreshed by a concurrent request");
                return Ok(Some(current));
            }
        }

        let Some(refresh_token) = self.session.refresh_token()? else {
            warn!("Received 401 with no refresh token stored");
            self.session
                .teardown_if_current(epoch, SessionEndReason::NoRefreshToken);
            return Ok(None);
        };

        let _expired = self.session.begin_refresh();
        match self.request_refresh(&refresh_token).await {
            Ok(access) => {
                self.session.replace_access_token(&access)?;
                info!("Access token refreshed");
                Ok(Some(access))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.session
                    .teardown_if_current(epoch, SessionEndReason::RefreshFailed);
                Ok(None)
            }
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Sent without credentials. Any non-2xx status or a body without a
    /// non-empty `access` field is a failure.
    async fn request_refresh(&self, refresh_token: &str) -> Result<String, GatewayError> {
        let request = RequestDescriptor::post(REFRESH_PATH).json(&RefreshRequest {
            refresh: refresh_token,
        })?;
        let response = self
            .client
            .execute(request.build(&self.client, &self.base_url, None)?)
            .await
            .map_err(GatewayError::from_transport)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body = response.bytes().await.map_err(GatewayError::from_transport)?;
        let parsed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Decode(format!("Malformed refresh response: {}", e)))?;
        if parsed.access.is_empty() {
            return Err(GatewayError::Decode("Refresh response has an empty access token".to_string()));
        }
        Ok(parsed.access)
    }

    async fn execute(
        &self,
        pending: &PendingRequest,
        token: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let descriptor = &pending.descriptor;
        debug!(
            method = %descriptor.method(),
            path = descriptor.path(),
            authenticated = token.is_some(),
            retry = pending.already_retried,
            "Sending request"
        );
        let request = descriptor.build(&self.client, &self.base_url, token)?;
        self.client.execute(request).await.map_err(|e| {
            warn!(method = %descriptor.method(), path = descriptor.path(), error = %e, "Request failed without a response");
            GatewayError::from_transport(e)
        })
    }

    async fn error_from(response: Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        GatewayError::from_status(status, &body)
    }

    // ===== Typed helpers =====

    /// Send and decode a JSON response body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        let body = response.bytes().await.map_err(GatewayError::from_transport)?;
        serde_json::from_slice(&body).map_err(|e| {
            GatewayError::Decode(format!("Failed to parse JSON response from {}: {}", request.path(), e))
        })
    }

    /// Send and discard the response body.
    pub async fn send_empty(&self, request: &RequestDescriptor) -> Result<(), GatewayError> {
        self.send(request).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.send_json(&RequestDescriptor::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(&RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(&RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(&RequestDescriptor::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        self.send_empty(&RequestDescriptor::delete(path)).await
    }
}

fn log_outcome(pending: &PendingRequest, status: StatusCode, outcome: RequestOutcome) {
    let descriptor = &pending.descriptor;
    match outcome {
        RequestOutcome::Success | RequestOutcome::RetriedSuccess => debug!(
            method = %descriptor.method(),
            path = descriptor.path(),
            status = status.as_u16(),
            outcome = ?outcome,
            "Request completed"
        ),
        _ => warn!(
            method = %descriptor.method(),
            path = descriptor.path(),
            status = status.as_u16(),
            outcome = ?outcome,
            "Request failed"
        ),
    }
}
