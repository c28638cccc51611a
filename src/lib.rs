pub mod aggregate;
pub mod app;
pub mod auth;
pub mod config;
pub mod crm;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod oauth;
pub mod session;
pub mod state;
pub mod token;
pub mod ui;
pub mod upstream;

pub use app::router;
pub use config::Config;
pub use state::AppState;
pub use upstream::ReqwestTransport;
