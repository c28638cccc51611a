use crate::auth::require_session;
use crate::handlers;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(handlers::index))
        .route("/api/series", get(handlers::get_series))
        .route("/detail", get(handlers::detail))
        .route("/action", post(handlers::action))
        .route("/opportunity", post(handlers::opportunity))
        .route("/logout", get(handlers::logout))
        .route("/revoke", get(handlers::revoke))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/oauth/callback", get(handlers::oauth_callback))
        .route("/healthz", get(handlers::health))
        .merge(protected)
        .with_state(state)
}
