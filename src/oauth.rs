use crate::config::Config;
use crate::errors::AppError;
use crate::upstream::{HttpTransport, OutboundRequest, UpstreamResponse};
use axum::http::Method;
use serde::Deserialize;
use url::Url;

/// Tokens returned by the authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: Url,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    instance_url: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn failure_message(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => "token endpoint returned no access token".to_string(),
        }
    }
}

/// The provider side of the OAuth2 authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    login_server: Url,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, login_server: Url) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            login_server,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.client_id, &config.client_secret, config.login_server.clone())
    }

    fn endpoint(&self, name: &str) -> Url {
        let mut url = self.login_server.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["services", "oauth2", name]);
        }
        url
    }

    pub fn authorize_url(&self, redirect_uri: &str) -> Url {
        let mut url = self.endpoint("authorize");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri);
        url
    }

    pub fn revoke_url(&self, token: &str) -> Url {
        let mut url = self.endpoint("revoke");
        url.query_pairs_mut().append_pair("token", token);
        url
    }

    pub async fn exchange_code(
        &self,
        transport: &dyn HttpTransport,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AppError> {
        let request = OutboundRequest::new(Method::POST, self.endpoint("token")).with_form([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ]);
        let response = transport.send(request).await?;
        let status = response.status;
        let token = decode_token_response(response)?;

        let (Some(access_token), Some(instance_url)) = (&token.access_token, &token.instance_url) else {
            return Err(AppError::Upstream {
                status,
                message: token.failure_message(),
            });
        };
        let instance_url = Url::parse(instance_url)
            .map_err(|err| AppError::Transport(format!("invalid instance_url: {err}")))?;

        Ok(TokenGrant {
            access_token: access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            instance_url,
        })
    }

    /// Trades a refresh token for a new access token. Returns the access token and,
    /// if the provider rotated it, the new refresh token.
    pub async fn refresh(
        &self,
        transport: &dyn HttpTransport,
        refresh_token: &str,
    ) -> Result<(String, Option<String>), AppError> {
        let request = OutboundRequest::new(Method::POST, self.endpoint("token")).with_form([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ]);
        let response = transport.send(request).await?;
        let status = response.status;
        let token = match decode_token_response(response) {
            Ok(token) => token,
            Err(AppError::Upstream { status, message }) if status.is_client_error() => {
                tracing::warn!(%status, %message, "refresh token rejected");
                return Err(AppError::TokenExpired);
            }
            Err(err) => return Err(err),
        };

        match token.access_token {
            Some(access_token) => Ok((access_token, token.refresh_token)),
            None => Err(AppError::Upstream {
                status,
                message: token.failure_message(),
            }),
        }
    }
}

fn decode_token_response(response: UpstreamResponse) -> Result<TokenResponse, AppError> {
    let parsed: Result<TokenResponse, _> = serde_json::from_str(&response.body);
    match parsed {
        Ok(token) if response.is_success() => Ok(token),
        Ok(token) => Err(AppError::Upstream {
            status: response.status,
            message: token.failure_message(),
        }),
        Err(_) if !response.is_success() => Err(AppError::Upstream {
            status: response.status,
            message: format!("token endpoint answered {}", response.status),
        }),
        Err(err) => Err(AppError::Transport(format!(
            "unreadable token response ({}): {err}",
            response.status
        ))),
    }
}
