/*!
    Error types for the relay.
*/

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::session::SessionState;

/**
    Every failure the relay can report, either as a returned error
    or as a [`PlayerEvent::Error`](crate::events::PlayerEvent::Error).

    The type is `Clone` so a single failure can be handed back to the
    awaiting caller and emitted to passive observers at the same time.
*/
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    /// Every candidate port in the configured range was taken
    #[error("no available loopback port among {count} candidates starting at {start}")]
    NoAvailablePort { start: u16, count: u16 },
    /// Caller passed a value the operation cannot use
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation requires a different session state
    #[error("player is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
    /// The page never reported ready
    #[error("player did not report ready within {0:?}")]
    InitTimeout(Duration),
    /// The page reported a failure
    #[error("player error: {0}")]
    Player(String),
    /// The host web view refused to navigate
    #[error("navigation failed: {0}")]
    Navigation(String),
    /// The host web view refused to run a control script
    #[error("script invocation failed: {0}")]
    Script(String),
    /// A newer load replaced the one being awaited
    #[error("initialization superseded by a newer load")]
    Superseded,
    /// The session has been disposed
    #[error("session disposed")]
    Disposed,
    /// Outbound proxy request failed
    #[error("proxy request failed: {0}")]
    Proxy(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /**
        Whether the page never answered, as opposed to answering with a failure.
    */
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::InitTimeout(_))
    }

    /**
        Errors that come from shutting the session down rather than from playback.
    */
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Disposed | Self::Superseded)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_player_error() {
        assert!(RelayError::InitTimeout(Duration::from_secs(30)).is_timeout());
        assert!(!RelayError::Player("decode failed".to_string()).is_timeout());
    }

    #[test]
    fn test_shutdown_errors_are_cancellation() {
        assert!(RelayError::Disposed.is_cancellation());
        assert!(RelayError::Superseded.is_cancellation());
        assert!(!RelayError::InitTimeout(Duration::from_secs(1)).is_cancellation());
    }

    #[test]
    fn test_proxy_error_maps_to_500_with_detail() {
        let response = RelayError::Proxy("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_state_message() {
        let err = RelayError::InvalidState {
            expected: SessionState::Ready,
            actual: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "player is idle, expected ready");
    }
}
