use crate::config::Config;
use crate::oauth::OAuthClient;
use crate::session::SessionStore;
use crate::upstream::HttpTransport;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub oauth: Arc<OAuthClient>,
    pub transport: Arc<dyn HttpTransport>,
}

impl AppState {
    pub fn new(config: Config, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            sessions: SessionStore::new(config.session_ttl),
            oauth: Arc::new(OAuthClient::from_config(&config)),
            config: Arc::new(config),
            transport,
        }
    }
}
