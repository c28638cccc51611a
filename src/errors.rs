use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The CRM still answered 401 after the single refresh-and-retry, or the
    /// refresh exchange itself was rejected.
    #[error("access token expired and could not be refreshed")]
    TokenExpired,

    #[error("upstream returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream call timed out")]
    Timeout,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(err: impl std::error::Error) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::TokenExpired | AppError::Upstream { .. } | AppError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show the browser; details stay in the server log.
    pub fn public_message(&self) -> &str {
        match self {
            AppError::TokenExpired => "Your CRM session has expired. Please log in again.",
            AppError::Upstream { .. } | AppError::Transport(_) => "The CRM request failed.",
            AppError::Timeout => "The CRM did not answer in time.",
            AppError::BadRequest(message) => message,
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Html(crate::ui::render_error(self.public_message(), None))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failures_are_bad_gateway() {
        let err = AppError::Upstream {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(AppError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(AppError::TokenExpired.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_details_are_not_public() {
        let err = AppError::Internal("db password leaked".to_string());
        assert!(!err.public_message().contains("password"));
    }
}
