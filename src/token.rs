use crate::errors::AppError;
use crate::oauth::OAuthClient;
use crate::upstream::{HttpTransport, OutboundRequest, UpstreamResponse};
use axum::http::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use url::Url;

const AUTH_SCHEME: &str = "OAuth";

/// The token pair and instance URL of one browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: Url,
}

impl TokenState {
    pub fn authorization(&self) -> String {
        format!("{AUTH_SCHEME} {}", self.access_token)
    }
}

/// Sends `request` with the session's access token. A 401 with a refresh token
/// on hand triggers one refresh and one retry; whatever the retry returns,
/// including a second 401, goes back to the caller.
pub async fn authenticated_call(
    transport: &dyn HttpTransport,
    oauth: &OAuthClient,
    tokens: &mut TokenState,
    mut request: OutboundRequest,
) -> Result<UpstreamResponse, AppError> {
    request.authorization = Some(tokens.authorization());
    let response = transport.send(request.clone()).await?;
    if response.status != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }
    let Some(refresh_token) = tokens.refresh_token.as_deref() else {
        return Ok(response);
    };

    tracing::info!(url = %request.url.path(), "refreshing access token");
    let (access_token, rotated) = oauth.refresh(transport, refresh_token).await?;
    tokens.access_token = access_token;
    if let Some(rotated) = rotated {
        tokens.refresh_token = Some(rotated);
    }

    request.authorization = Some(tokens.authorization());
    transport.send(request).await
}

/// Request-scoped handle that owns a copy of the session's tokens.
pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    oauth: Arc<OAuthClient>,
    state: Mutex<TokenState>,
    /// Set once the provider refused the refresh token; the session is dead.
    refresh_rejected: AtomicBool,
}

impl TokenManager {
    pub fn new(transport: Arc<dyn HttpTransport>, oauth: Arc<OAuthClient>, state: TokenState) -> Self {
        Self {
            transport,
            oauth,
            state: Mutex::new(state),
            refresh_rejected: AtomicBool::new(false),
        }
    }

    pub async fn request(&self, request: OutboundRequest) -> Result<UpstreamResponse, AppError> {
        let mut state = self.state.lock().await;
        let result = authenticated_call(self.transport.as_ref(), &self.oauth, &mut state, request).await;
        // a 401 comes back as a response; TokenExpired here means the refresh itself failed
        if matches!(result, Err(AppError::TokenExpired)) {
            self.refresh_rejected.store(true, Ordering::Relaxed);
        }
        result
    }

    pub fn refresh_rejected(&self) -> bool {
        self.refresh_rejected.load(Ordering::Relaxed)
    }

    pub async fn get(&self, url: Url) -> Result<UpstreamResponse, AppError> {
        self.request(OutboundRequest::get(url)).await
    }

    pub async fn send_json(&self, method: Method, url: Url, body: Value) -> Result<UpstreamResponse, AppError> {
        self.request(OutboundRequest::new(method, url).with_json(body)).await
    }

    pub async fn delete(&self, url: Url) -> Result<UpstreamResponse, AppError> {
        self.request(OutboundRequest::new(Method::DELETE, url)).await
    }

    pub async fn snapshot(&self) -> TokenState {
        self.state.lock().await.clone()
    }

    pub async fn access_token(&self) -> String {
        self.state.lock().await.access_token.clone()
    }

    pub async fn instance_url(&self) -> Url {
        self.state.lock().await.instance_url.clone()
    }
}
