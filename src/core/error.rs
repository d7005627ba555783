use std::time::Duration;
use thiserror::Error;

/// Failures of the browsing-context capability (scraping::dom).
#[derive(Debug, Error)]
pub enum DomError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("query `{selector}` failed: {reason}")]
    Query { selector: String, reason: String },

    #[error("element is detached or stale")]
    Detached,

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("input dispatch failed: {0}")]
    Input(String),

    #[error("no artifact within {0:?}")]
    ArtifactTimeout(Duration),

    #[error("artifact transfer failed: {0}")]
    Artifact(String),

    #[error("browser session closed")]
    SessionClosed,
}

/// Failures of the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint at {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Job configuration rejected before the engine starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("source list URL `{0}` is not a valid http(s) URL")]
    SourceUrl(String),

    #[error("{field}: minimum {min} exceeds maximum {max}")]
    InvertedRange { field: &'static str, min: u64, max: u64 },

    #[error("start page must be at least 1")]
    StartPage,

    #[error("resume and reset are mutually exclusive")]
    ResumeAndReset,

    #[error("fuzzy match threshold must be within (0, 1], got {0}")]
    FuzzyThreshold(f64),

    #[error("selector profile: {0}")]
    Profile(String),
}

/// How the per-item loop reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Known interstitial: reload the view and retry the item.
    TransientObstruction,
    /// The tab left the list view: navigate back and restore the cursor.
    ContextLoss,
    /// Bounded retry with constant backoff, then a failure record.
    TimeoutOrNotFound,
    /// Recorded immediately, never retried.
    PermanentItem,
    /// Logged; the item is still marked processed.
    Unclassified,
    /// Propagated to the orchestrator.
    Fatal,
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("obstructed by interstitial: {0}")]
    Obstruction(String),

    #[error("left the list view (now at {url})")]
    ContextLost { url: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    ActionUnavailable(String),

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("run stopped")]
    Stopped,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("artifact write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dom(#[from] DomError),
}

impl AutomationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Obstruction(_) => ErrorClass::TransientObstruction,
            Self::ContextLost { .. } => ErrorClass::ContextLoss,
            Self::Timeout(_) | Self::NotFound(_) => ErrorClass::TimeoutOrNotFound,
            Self::Dom(DomError::ArtifactTimeout(_)) => ErrorClass::TimeoutOrNotFound,
            Self::ActionUnavailable(_) => ErrorClass::PermanentItem,
            Self::RecoveryFailed(_) | Self::Stopped | Self::Checkpoint(_) => ErrorClass::Fatal,
            Self::Dom(DomError::SessionClosed) => ErrorClass::Fatal,
            Self::Io(_) | Self::Dom(_) => ErrorClass::Unclassified,
        }
    }
}
