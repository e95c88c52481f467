use thiserror::Error;

/// Raised by an [`crate::sink::EventSink`] once the underlying connection is
/// gone. Callers must treat this as a cancellation signal, not an
/// application error — see spec §4.B / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event stream closed")]
pub struct StreamClosed;

/// Errors surfaced by the Launch Session (§4.E / §7).
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to create user {username}: {detail}")]
    CreateUser { username: String, detail: String },

    #[error("failed to start server for {username}: {detail}")]
    StartServer { username: String, detail: String },

    #[error("image {image} for user {username} took too long to launch")]
    Timeout { username: String, image: String },

    #[error("hub request failed: {0}")]
    Hub(#[from] anyhow::Error),
}

/// Errors that end a request before it reaches the launch stage (§7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no provider found for prefix {0}")]
    ProviderUnknown(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
