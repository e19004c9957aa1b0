//! HTTP client with bearer authentication and one-shot token refresh

use crate::error::{ClientError, Result};
use crate::session::SessionStore;
use crate::token_store::TokenStore;
use crate::types::*;
use async_singleflight::Group;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const TOKEN_PATH: &str = "/users/token/";
pub const TOKEN_REFRESH_PATH: &str = "/users/token/refresh/";
pub const PROFILE_PATH: &str = "/users/profile/";
pub const REGISTER_PATH: &str = "/users/register/";
pub const PASSWORD_RESET_PATH: &str = "/auth/password/reset/direct/";
pub const PASSWORD_CHANGE_PATH: &str = "/auth/password/change/";

/// Macro to check HTTP response status and return error if not successful
macro_rules! check_response {
    ($response:expr, $path:expr) => {
        if !$response.status().is_success() {
            let status = $response.status();
            let text = $response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, $path, text));
        }
    };
}

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct AuthClientConfig {
    /// API root, e.g. `http://localhost:8000/api`; endpoint paths are appended to it
    pub base_url: String,

    /// Transport timeout per request; a timed out call counts as a failure
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl AuthClientConfig {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("Invalid base URL {base_url}: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    /// Read `LMS_API_BASE_URL` and `LMS_REQUEST_TIMEOUT_SECS`, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let base_url = std::env::var("LMS_API_BASE_URL").unwrap_or(defaults.base_url);
        let request_timeout = match std::env::var("LMS_REQUEST_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(secs.parse().map_err(|e| {
                ClientError::Configuration(format!("Invalid LMS_REQUEST_TIMEOUT_SECS {secs}: {e}"))
            })?),
            Err(_) => defaults.request_timeout,
        };

        Self::new(base_url, request_timeout)
    }
}

impl Default for AuthClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Account operations the session layer depends on
pub trait AuthClient: Send + Sync + 'static {
    /// Fetch the identity behind the current access token
    fn fetch_profile(&self) -> impl Future<Output = Result<UserIdentity>> + Send;

    /// Exchange username and password for a credential pair
    fn obtain_tokens(
        &self,
        credentials: &LoginCredentials,
    ) -> impl Future<Output = Result<AuthTokens>> + Send;
}

/// An outbound API call
///
/// Kept as plain data so it can be resubmitted after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    /// Set once the request has been resubmitted after a refresh
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post(path: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

/// API client with bearer authentication and refresh-and-retry
///
/// On a 401 the request is resubmitted at most once after a token refresh.
/// Concurrent refreshes for the same expired token collapse into one call.
pub struct AuthClientHttp {
    config: AuthClientConfig,
    session: Arc<SessionStore>,
    http_client: Client,
    /// Singleflight group keyed by the access token that was rejected
    /// Error type is String because singleflight requires shared error type
    token_refresh_singleflight: Group<String, String>,
}

impl AuthClientHttp {
    /// Create a new API client bound to a session
    pub fn new(config: AuthClientConfig, session: Arc<SessionStore>) -> Result<Arc<Self>> {
        let http_client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Arc::new(Self {
            config,
            session,
            http_client,
            token_refresh_singleflight: Group::new(),
        }))
    }

    pub fn token_store(&self) -> &TokenStore {
        self.session.token_store()
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn dispatch(&self, request: &ApiRequest, access_token: Option<&str>) -> Result<Response> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), self.url(&request.path));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, retried = request.retried, "Sending request");
        Ok(builder.send().await?)
    }

    /// Send a request, refreshing the access token once on a 401
    ///
    /// Returns the response for any status other than 401. An unrecoverable
    /// 401 logs the session out and yields `ClientError::SessionExpired`.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response> {
        let epoch = self.session.epoch();
        let sent_with = self.token_store().access_token()?;
        let response = self.dispatch(&request, sent_with.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if request.path == TOKEN_PATH {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::Authentication(text));
        }
        if request.path == TOKEN_REFRESH_PATH || request.retried {
            return Err(self.end_session(&request, epoch, "authorization rejected after refresh"));
        }

        let access_token = match self.refreshed_access_token(sent_with).await {
            Ok(token) => token,
            Err(e) => return Err(self.end_session(&request, epoch, &e.to_string())),
        };
        // A logout while the refresh was pending ends this request too
        if self.session.epoch() != epoch {
            debug!(path = %request.path, "Session ended during refresh, request dropped");
            return Err(ClientError::SessionExpired(
                "session ended during token refresh".to_string(),
            ));
        }

        request.retried = true;
        let response = self.dispatch(&request, Some(&access_token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.end_session(&request, epoch, "retried request still unauthorized"));
        }

        Ok(response)
    }

    /// Terminal path: drop the session and send the user to login
    ///
    /// Skips the logout when the session that sent `request` has already ended.
    fn end_session(&self, request: &ApiRequest, epoch: u64, reason: &str) -> ClientError {
        if self.session.epoch() != epoch {
            debug!(path = %request.path, reason = %reason, "Session already ended");
            return ClientError::SessionExpired(reason.to_string());
        }
        warn!(path = %request.path, reason = %reason, "Unrecoverable authorization failure");
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "Logout after authorization failure was incomplete");
        }
        ClientError::SessionExpired(reason.to_string())
    }

    async fn refreshed_access_token(&self, stale: Option<String>) -> Result<String> {
        // Use singleflight so every request rejected with the same token awaits one refresh
        let stale_key = stale.unwrap_or_default();
        let (success_opt, error_opt, _shared) = self
            .token_refresh_singleflight
            .work(&stale_key, async {
                match self.do_refresh(&stale_key).await {
                    Ok(token) => Ok(token),
                    Err(e) => {
                        let err_msg = e.to_string();
                        warn!(error = %err_msg, "Token refresh failed");
                        Err(err_msg)
                    }
                }
            })
            .await;

        // Convert singleflight result to Result type
        match (success_opt, error_opt) {
            (Some(token), None) => Ok(token),
            (None, Some(err_str)) => Err(ClientError::SessionExpired(err_str)),
            _ => Err(ClientError::SessionExpired(
                "Unknown error during token refresh".to_string(),
            )),
        }
    }

    /// Exchange the refresh token for a new access token
    ///
    /// If the stored access token already differs from `stale`, an earlier
    /// refresh has replaced it and that token is returned without a call.
    /// Nothing is stored if the session is logged out before the exchange
    /// completes.
    async fn do_refresh(&self, stale: &str) -> Result<String> {
        let epoch = self.session.epoch();
        let store = self.token_store();
        if let Some(current) = store.access_token()? {
            if current != stale {
                debug!("Access token already refreshed");
                return Ok(current);
            }
        }

        let refresh_token = store
            .refresh_token()?
            .ok_or_else(|| ClientError::SessionExpired("no refresh token".to_string()))?;

        let response = self
            .http_client
            .post(self.url(TOKEN_REFRESH_PATH))
            .json(&RefreshRequest {
                refresh: &refresh_token,
            })
            .send()
            .await?;

        check_response!(response, TOKEN_REFRESH_PATH);

        let refreshed: RefreshResponse = response.json().await?;
        self.session.write_if_current(epoch, || {
            store.set_access_token(&refreshed.access)?;
            if let Some(rotated) = &refreshed.refresh {
                store.set_refresh_token(rotated)?;
            }
            Ok(())
        })?;
        info!("Access token refreshed successfully");

        Ok(refreshed.access)
    }

    /// Send a request and decode a JSON response body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        check_response!(response, &path);

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::InvalidResponse(format!("{path}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// Send a request whose response body is ignored
    pub async fn send(&self, request: ApiRequest) -> Result<()> {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        check_response!(response, &path);
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::delete(path)).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<UserIdentity> {
        self.send_json(ApiRequest::post(REGISTER_PATH, request)?).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserIdentity> {
        let epoch = self.session.epoch();
        let user: UserIdentity = self.send_json(ApiRequest::put(PROFILE_PATH, update)?).await?;
        self.session
            .write_if_current(epoch, || self.session.replace_user(user.clone()))?;
        Ok(user)
    }

    pub async fn reset_password_direct(&self, payload: &DirectPasswordReset) -> Result<()> {
        self.send(ApiRequest::post(PASSWORD_RESET_PATH, payload)?).await
    }

    pub async fn change_password(&self, payload: &PasswordChange) -> Result<()> {
        self.send(ApiRequest::post(PASSWORD_CHANGE_PATH, payload)?).await
    }
}

impl AuthClient for AuthClientHttp {
    async fn fetch_profile(&self) -> Result<UserIdentity> {
        self.get_json(PROFILE_PATH).await
    }

    async fn obtain_tokens(&self, credentials: &LoginCredentials) -> Result<AuthTokens> {
        let tokens: TokenResponse = self
            .send_json(ApiRequest::post(TOKEN_PATH, credentials)?)
            .await?;

        Ok(AuthTokens {
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        })
    }
}
