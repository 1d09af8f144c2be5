//! The error taxonomy (§7): sentinel kinds consumed throughout the crate.
//!
//! No provider-specific exception type ever leaks past a [`crate::provider::Generator`]
//! boundary — every failure mode a caller can observe is one of these
//! variants.

use thiserror::Error;

/// Sentinel failure kinds shared by every component.
///
/// [`Error::MaxTokens`], [`Error::Refusal`], and [`Error::PauseTurn`] are
/// non-fatal: callers receive both this error and the partial
/// [`Message`](crate::schema::Message) it describes, so they can decide
/// whether to continue (§7 propagation policy).
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied value out of range, missing required field, or
    /// conflicting options.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Model/tool/batch id absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Selected client lacks the requested capability.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Operation invalid in current state (e.g. batch not ended).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected provider response or transport failure.
    #[error("internal server error: {0}")]
    InternalServerError(String),

    /// Completion was truncated by the output token budget. The partial
    /// message is still valid and is returned alongside this error.
    #[error("completion truncated by max_tokens")]
    MaxTokens,

    /// Provider refused to answer (safety/block).
    #[error("provider refused the request")]
    Refusal,

    /// Provider deferred the turn (Anthropic `pause_turn`).
    #[error("provider paused the turn")]
    PauseTurn,

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// `true` for the three non-fatal sentinels that are returned alongside
    /// a still-valid partial message rather than in place of one.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, Error::MaxTokens | Error::Refusal | Error::PauseTurn)
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Error::InternalServerError(msg.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::InternalServerError(format!("transport error: {e}"))
        } else {
            Error::InternalServerError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InternalServerError(format!("json error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps a provider's native stop-reason string to the stable result enum and
/// its accompanying sentinel, per the table in §4.3 step 6 / §6.
pub fn map_stop_reason(reason: &str) -> (crate::schema::GenerationResult, Option<Error>) {
    use crate::schema::GenerationResult as R;
    match reason {
        "stop" | "end_turn" | "stop_sequence" => (R::Stop, None),
        "max_tokens" | "length" => (R::MaxTokens, Some(Error::MaxTokens)),
        "tool_use" | "function_call" | "tool_calls" => (R::ToolCall, None),
        "safety" | "refusal" | "blocklist" | "prohibited" | "content_filter" => {
            (R::Blocked, Some(Error::Refusal))
        }
        "pause_turn" => (R::Stop, Some(Error::PauseTurn)),
        _ => (R::Other, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_map_matches_stable_contract() {
        assert!(matches!(
            map_stop_reason("end_turn"),
            (crate::schema::GenerationResult::Stop, None)
        ));
        assert!(matches!(
            map_stop_reason("max_tokens"),
            (crate::schema::GenerationResult::MaxTokens, Some(Error::MaxTokens))
        ));
        assert!(matches!(
            map_stop_reason("tool_use"),
            (crate::schema::GenerationResult::ToolCall, None)
        ));
        assert!(matches!(
            map_stop_reason("safety"),
            (crate::schema::GenerationResult::Blocked, Some(Error::Refusal))
        ));
        assert!(matches!(
            map_stop_reason("pause_turn"),
            (crate::schema::GenerationResult::Stop, Some(Error::PauseTurn))
        ));
        assert!(matches!(
            map_stop_reason("something_else"),
            (crate::schema::GenerationResult::Other, None)
        ));
    }

    #[test]
    fn non_fatal_classification() {
        assert!(Error::MaxTokens.is_non_fatal());
        assert!(Error::Refusal.is_non_fatal());
        assert!(Error::PauseTurn.is_non_fatal());
        assert!(!Error::Cancelled.is_non_fatal());
        assert!(!Error::BadParameter("x".into()).is_non_fatal());
    }
}
