// Error types shared by the resolver and the playback session
// Anything that might carry the API key goes through redact() before it leaves

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller handed us something outside the contract (empty URI, bad volume)
    #[error("validation error: {0}")]
    Validation(String),

    /// Structured API said we're out of quota / rate limited
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("media engine error: {0}")]
    MediaEngine(String),

    #[error("playback session is gone")]
    SessionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn media_engine(msg: impl Into<String>) -> Self {
        Self::MediaEngine(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Transport errors are built from reqwest messages, which embed the full
    /// request URL (key included), so they get scrubbed on the way in
    pub fn transport(msg: impl AsRef<str>) -> Self {
        Self::Transport(redact(msg.as_ref()))
    }

    /// Same error with the given secret masked out of its message
    pub fn redacted(self, secret: Option<&str>) -> Self {
        let scrub = |s: String| redact_secret(&s, secret);
        match self {
            Self::Validation(m) => Self::Validation(scrub(m)),
            Self::QuotaExceeded(m) => Self::QuotaExceeded(scrub(m)),
            Self::Transport(m) => Self::Transport(scrub(m)),
            Self::Parse(m) => Self::Parse(scrub(m)),
            Self::MediaEngine(m) => Self::MediaEngine(scrub(m)),
            other => other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

static KEY_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((?:api[_-]?)?key=)[^&\s]+").expect("static regex")
});

/// Masks `key=...` query parameters anywhere in the text
pub fn redact(text: &str) -> String {
    KEY_PARAM.replace_all(text, "${1}[REDACTED]").into_owned()
}

/// redact() plus masking of a known secret wherever it shows up verbatim
pub fn redact_secret(text: &str, secret: Option<&str>) -> String {
    let text = redact(text);
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "[REDACTED]"),
        _ => text,
    }
}
