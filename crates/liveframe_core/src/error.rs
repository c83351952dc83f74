//! Error taxonomy for the liveframe engine.
//!
//! Every variant here is scoped to a single request or event. No error
//! condition terminates a channel or deletes session state; only an explicit
//! disconnect or the staleness sweep removes state.

use thiserror::Error;

/// Errors surfaced by the event pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum LiveframeError {
    /// No session record exists for the resolved identity. Non-fatal: the
    /// client is notified and the pipeline stops, the channel stays open.
    #[error("session not found, please reload the page")]
    SessionNotFound,

    /// The external page handler failed. Non-fatal: the client is notified
    /// with the message and the session survives.
    #[error("handler failed: {0}")]
    Handler(String),

    /// No handler is registered for the requested page.
    #[error("no handler registered for page '{0}'")]
    UnknownPage(String),

    /// The render target is missing. Fatal to the single request or event
    /// only, surfaced as an HTTP or channel error.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template source could not be read or rendered.
    #[error("template render failed for '{page}': {message}")]
    Render { page: String, message: String },
}

impl LiveframeError {
    /// Wrap an arbitrary handler failure.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        LiveframeError::Handler(err.to_string())
    }
}
