use crate::aggregate::aggregate;
use crate::auth::{CrmSession, callback_url, expired_session_cookie, session_cookie};
use crate::crm::{self, OpportunityFields};
use crate::errors::AppError;
use crate::history::fetch_events;
use crate::state::AppState;
use crate::token::TokenState;
use crate::ui::{self, ChartPayload};
use axum::{
    Extension, Form, Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;

async fn build_chart(state: &AppState, session: &CrmSession) -> Result<ChartPayload, AppError> {
    let config = &state.config;
    let events = fetch_events(&session.tokens, &config.api_version, config.history_window).await?;
    let series = aggregate(&events, config.series_mode);
    if series.is_none() {
        tracing::info!(window = %config.history_window, "no opportunity edits in window");
    }
    Ok(ui::build_chart(
        series.as_ref(),
        config.series_mode,
        &config.history_window.to_string(),
    ))
}

pub async fn index(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
) -> Result<Html<String>, AppError> {
    let chart = build_chart(&state, &session).await?;
    Ok(Html(ui::render_dashboard(&chart)))
}

pub async fn get_series(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
) -> Result<Json<ChartPayload>, AppError> {
    Ok(Json(build_chart(&state, &session).await?))
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    match complete_login(&state, &headers, params).await {
        Ok(session_id) => {
            let cookie = session_cookie(&session_id, state.config.secure_cookies());
            ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "oauth callback failed");
            let detail = state.config.debug_errors.then(|| error_chain(&err));
            let status = err.status();
            (status, Html(ui::render_error("Login failed.", detail.as_deref()))).into_response()
        }
    }
}

async fn complete_login(state: &AppState, headers: &HeaderMap, params: CallbackParams) -> Result<String, AppError> {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        return Err(AppError::bad_request(format!("authorization denied: {error} {description}")));
    }
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::bad_request("missing authorization code"))?;

    let redirect_uri = callback_url(&state.config.callback_scheme, headers)?;
    let grant = state
        .oauth
        .exchange_code(state.transport.as_ref(), &code, &redirect_uri)
        .await?;

    tracing::info!(instance_url = %grant.instance_url, "login completed");
    let session_id = state
        .sessions
        .create(TokenState {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            instance_url: grant.instance_url,
        })
        .await;
    Ok(session_id)
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![format!("Error: {err}")];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("Caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    id: String,
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
    Query(params): Query<IdParams>,
) -> Result<Html<String>, AppError> {
    let record = crm::read(&session.tokens, &state.config.api_version, params.id.trim()).await?;
    Ok(Html(ui::render_detail(&record)))
}

#[derive(Debug, Deserialize)]
pub struct ActionForm {
    new: Option<String>,
    edit: Option<String>,
    delete: Option<String>,
    id: Option<String>,
}

fn required_id(id: Option<String>) -> Result<String, AppError> {
    id.map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("missing record id"))
}

pub async fn action(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
    Form(form): Form<ActionForm>,
) -> Result<Html<String>, AppError> {
    let api_version = &state.config.api_version;
    if form.new.is_some() {
        return Ok(Html(ui::render_edit_form(None, &OpportunityFields::default())));
    }
    if form.edit.is_some() {
        let id = required_id(form.id)?;
        let record = crm::read(&session.tokens, api_version, &id).await?;
        return Ok(Html(ui::render_edit_form(Some(&id), &crm::fields_of(&record))));
    }
    if form.delete.is_some() {
        let id = required_id(form.id)?;
        crm::delete(&session.tokens, api_version, &id).await?;
        return Ok(Html(ui::render_done("Deleted", &id)));
    }
    Err(AppError::bad_request("expected one of new, edit or delete"))
}

#[derive(Debug, Deserialize)]
pub struct OpportunityForm {
    create: Option<String>,
    update: Option<String>,
    id: Option<String>,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Industry", default)]
    industry: String,
    #[serde(rename = "TickerSymbol", default)]
    ticker_symbol: String,
}

pub async fn opportunity(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
    Form(form): Form<OpportunityForm>,
) -> Result<Html<String>, AppError> {
    let api_version = &state.config.api_version;
    let fields = OpportunityFields {
        name: form.name,
        industry: form.industry,
        ticker_symbol: form.ticker_symbol,
    };
    if form.create.is_some() {
        let id = crm::create(&session.tokens, api_version, &fields).await?;
        return Ok(Html(ui::render_done("Created", &id)));
    }
    if form.update.is_some() {
        let id = required_id(form.id)?;
        crm::update(&session.tokens, api_version, &id, &fields).await?;
        return Ok(Html(ui::render_done("Updated", &id)));
    }
    Err(AppError::bad_request("expected create or update"))
}

async fn revoke_access_token(state: &AppState, session: &CrmSession) -> Result<(), AppError> {
    let token = session.tokens.access_token().await;
    session
        .tokens
        .get(state.oauth.revoke_url(&token))
        .await?
        .error_for_status()?;
    Ok(())
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
) -> Response {
    if let Err(err) = revoke_access_token(&state, &session).await {
        tracing::warn!(error = %err, "token revoke failed, clearing session anyway");
    }
    let instance_url = session.tokens.instance_url().await;
    state.sessions.remove(&session.id).await;
    tracing::info!("session cleared");

    let crm_logout = instance_url.join("/secure/logout.jsp").ok();
    let cookie = expired_session_cookie(state.config.secure_cookies());
    (
        [(header::SET_COOKIE, cookie)],
        Html(ui::render_logout(crm_logout.as_ref().map(|url| url.as_str()))),
    )
        .into_response()
}

/// Revokes the access token but keeps it in the session, so the next CRM call
/// goes through the refresh path.
pub async fn revoke(
    State(state): State<AppState>,
    Extension(session): Extension<CrmSession>,
) -> Result<(StatusCode, &'static str), AppError> {
    revoke_access_token(&state, &session).await?;
    tracing::info!("access token revoked, session kept");
    Ok((StatusCode::OK, "Revoked access token; the next request will refresh it."))
}
