use crate::errors::AppError;
use crate::session::{SESSION_COOKIE, WriteBack};
use crate::state::AppState;
use crate::token::TokenManager;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

/// The authenticated session of the current request, inserted by [`require_session`].
#[derive(Clone)]
pub struct CrmSession {
    pub id: String,
    pub tokens: Arc<TokenManager>,
}

pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(id: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax{secure}")
}

pub fn expired_session_cookie(secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure}")
}

/// `<scheme>://<host>/oauth/callback`, built from the request's Host header.
pub fn callback_url(scheme: &str, headers: &HeaderMap) -> Result<String, AppError> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty() && !host.contains(['/', '?', '#', '@']))
        .ok_or_else(|| AppError::bad_request("missing or invalid Host header"))?;
    Ok(format!("{scheme}://{host}/oauth/callback"))
}

/// Lets the request through only with a live session; otherwise sends the browser
/// to the provider's authorize page. After the handler runs, refreshed tokens are
/// written back to the session store, or the session is dropped if the provider
/// refused the refresh token.
pub async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = match session_id_from(req.headers()) {
        Some(id) => state.sessions.get(&id).await.map(|tokens| (id, tokens)),
        None => None,
    };

    let Some((id, tokens)) = session else {
        return match callback_url(&state.config.callback_scheme, req.headers()) {
            Ok(redirect_uri) => {
                let authorize = state.oauth.authorize_url(&redirect_uri);
                tracing::info!(path = %req.uri().path(), %redirect_uri, "no session, redirecting to login");
                Redirect::to(authorize.as_str()).into_response()
            }
            Err(err) => err.into_response(),
        };
    };

    let stored = tokens.clone();
    let manager = Arc::new(TokenManager::new(
        state.transport.clone(),
        state.oauth.clone(),
        tokens,
    ));
    req.extensions_mut().insert(CrmSession {
        id: id.clone(),
        tokens: manager.clone(),
    });

    let mut response = next.run(req).await;

    if manager.refresh_rejected() {
        state.sessions.remove(&id).await;
        tracing::info!("refresh token rejected, session cleared");
        if let Ok(cookie) = HeaderValue::from_str(&expired_session_cookie(state.config.secure_cookies())) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        return response;
    }

    let current = manager.snapshot().await;
    if current != stored {
        match state
            .sessions
            .write_back(&id, &stored.access_token, current)
            .await
        {
            WriteBack::Stored => tracing::info!("stored refreshed tokens in session"),
            WriteBack::Superseded => {
                tracing::debug!("session token changed by a concurrent request, keeping that one")
            }
            WriteBack::Missing => tracing::debug!("session gone before refreshed token could be stored"),
        }
    }

    response
}
