//! Error and warning taxonomy for the ingestion pipeline.
//!
//! Fatal conditions are typed errors; recoverable conditions are
//! [`ParseWarning`]s that travel alongside a successful result.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported archive format (expected zip or tar.gz)")]
    UnsupportedFormat,
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("archive contains no transcript (.txt) member")]
    NoTranscript,
    #[error("archive member escapes the extraction directory: {0}")]
    UnsafePath(String),
    #[error("archive exceeds safety bound: {0}")]
    LimitExceeded(String),
    #[error("archive extraction timed out after {0}s")]
    Timeout(u64),
    #[error("failed to prepare extraction directory: {0}")]
    WorkDir(#[source] std::io::Error),
    #[error("failed to extract archive member: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("transcript is empty")]
    Empty,
    #[error("transcript contains no recognizable messages ({lines} lines scanned)")]
    NoMessages { lines: usize },
    #[error("failed to read transcript {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid transcript pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Whether a failed service call may succeed if repeated unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{provider} request failed ({kind:?}{}): {message}", .status.map(|s| format!(", HTTP {s}")).unwrap_or_default())]
pub struct ServiceError {
    pub provider: String,
    pub kind: ServiceErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ServiceError {
    pub fn retryable(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ServiceErrorKind::Retryable,
            status,
            message: message.into(),
        }
    }

    pub fn non_retryable(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ServiceErrorKind::NonRetryable,
            status,
            message: message.into(),
        }
    }

    /// Classify an HTTP failure status.
    pub fn from_status(provider: &str, status: u16, message: impl Into<String>) -> Self {
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::retryable(provider, Some(status), message)
        } else {
            Self::non_retryable(provider, Some(status), message)
        }
    }

    /// Classify a transport failure that produced no HTTP status.
    pub fn from_transport(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::retryable(provider, None, err.to_string())
        } else {
            Self::non_retryable(provider, None, err.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ServiceErrorKind::Retryable
    }
}

/// Failure to turn one attachment into a transmittable still image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("attachment was not found in the archive")]
    Missing,
    #[error("unsupported media kind")]
    Unsupported,
    #[error("failed to read media: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("{0} is required for video frames but was not found")]
    ToolMissing(String),
    #[error("frame extraction failed: {0}")]
    Frame(String),
    #[error("could not fit image under {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("media stage failed: {0}")]
    Media(String),
    #[error("run was cancelled")]
    Cancelled,
    #[error("pipeline worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Non-fatal condition reported alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    #[error("line {line}: unrecognized line skipped: {excerpt:?}")]
    UnrecognizedLine { line: usize, excerpt: String },
    #[error("line {line}: attachment marker for {filename} outside any message")]
    OrphanAttachment { line: usize, filename: String },
    #[error("line {line}: timestamp earlier than previous message, clamped")]
    OutOfOrderTimestamp { line: usize },
    #[error("no timestamp format fit the opening lines cleanly; falling back to {format}")]
    FormatFallback { format: String },
    #[error("several transcript candidates in archive; using {chosen} (also found: {others:?})")]
    AmbiguousTranscript { chosen: String, others: Vec<String> },
    #[error("transcript is not valid {encoding}; invalid bytes were replaced")]
    LossyDecoding { encoding: String },
    #[error("attachment {filename} not found in archive")]
    UnresolvedAttachment { filename: String },
    #[error("attachment {filename} could not be decoded: {reason}")]
    UndecodableMedia { filename: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ServiceError::from_status("gemini", 429, "slow down").is_retryable());
        assert!(ServiceError::from_status("gemini", 503, "unavailable").is_retryable());
        assert!(ServiceError::from_status("gemini", 408, "timeout").is_retryable());
        assert!(!ServiceError::from_status("gemini", 400, "bad request").is_retryable());
        assert!(!ServiceError::from_status("gemini", 403, "forbidden").is_retryable());
    }

    #[test]
    fn test_service_error_display_includes_status() {
        let err = ServiceError::from_status("openai", 500, "boom");
        let text = err.to_string();
        assert!(text.contains("HTTP 500"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_warning_display() {
        let warning = ParseWarning::UnresolvedAttachment {
            filename: "IMG-1.jpg".to_string(),
        };
        assert_eq!(warning.to_string(), "attachment IMG-1.jpg not found in archive");
    }
}
