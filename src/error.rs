//! Error types for ryt-resolve

use std::fmt;
use thiserror::Error;

/// Which of the two obfuscation-reversal functions an error concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Signature cipher
    Signature,
    /// Throttling ("n") parameter transform
    NParam,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Signature => write!(f, "signature"),
            FunctionKind::NParam => write!(f, "n-param"),
        }
    }
}

/// Stage of the sandbox at which an evaluation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStage {
    /// The extracted source did not compile
    Compile,
    /// The compiled function threw or returned an unusable value
    Invoke,
}

impl fmt::Display for EvalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalStage::Compile => write!(f, "compile"),
            EvalStage::Invoke => write!(f, "invoke"),
        }
    }
}

/// Why a player version was memoized as unavailable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The player script could not be downloaded
    ScriptFetch(String),
    /// A cipher function could not be located in the script
    Extraction(String),
    /// A located function failed to compile in the sandbox
    Evaluation(String),
}

impl UnavailableReason {
    /// A fetch failure may succeed later; a structural failure will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnavailableReason::ScriptFetch(_))
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::ScriptFetch(msg) => write!(f, "player script fetch failed: {}", msg),
            UnavailableReason::Extraction(msg) => write!(f, "cipher not found in script: {}", msg),
            UnavailableReason::Evaluation(msg) => write!(f, "cipher failed to compile: {}", msg),
        }
    }
}

/// Main error type for resolution and manifest synthesis
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Format {0} is not supported")]
    FormatNotFound(u32),

    #[error("Could not locate {function} function for player {version} (tried: {attempted})")]
    ExtractionFailed {
        version: String,
        function: FunctionKind,
        attempted: String,
    },

    #[error("{function} function failed to {stage}: {cause} [source: {snippet}]")]
    CipherEvaluation {
        function: FunctionKind,
        stage: EvalStage,
        cause: String,
        snippet: String,
    },

    #[error("Cipher unavailable for player {version}: {reason}")]
    Unavailable {
        version: String,
        reason: UnavailableReason,
    },

    #[error("Could not fetch player script for {version}: {reason}")]
    ScriptFetch { version: String, reason: String },

    #[error("Incomplete metadata for format {itag}: missing {missing}")]
    IncompleteMetadata { itag: u32, missing: &'static str },

    #[error("Segment probe failed for {url}: {reason}")]
    ProbeFailed { url: String, reason: String },

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("HTTP request failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Manifest writing error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl ResolveError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Timeout(_)
            | ResolveError::Fetch { .. }
            | ResolveError::ScriptFetch { .. }
            | ResolveError::ProbeFailed { .. } => true,
            ResolveError::Unavailable { reason, .. } => reason.is_retryable(),
            _ => false,
        }
    }

    /// Reason to memoize for a player version, if this failure is structural to it
    pub(crate) fn unavailable_reason(&self) -> Option<UnavailableReason> {
        match self {
            ResolveError::ScriptFetch { reason, .. } => {
                Some(UnavailableReason::ScriptFetch(reason.clone()))
            }
            ResolveError::ExtractionFailed { .. } => {
                Some(UnavailableReason::Extraction(self.to_string()))
            }
            ResolveError::CipherEvaluation { .. } => {
                Some(UnavailableReason::Evaluation(self.to_string()))
            }
            _ => None,
        }
    }
}

impl From<url::ParseError> for ResolveError {
    fn from(err: url::ParseError) -> Self {
        ResolveError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Manifest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResolveError::Timeout("player script".into()).is_retryable());
        assert!(ResolveError::ScriptFetch {
            version: "abc".into(),
            reason: "503".into()
        }
        .is_retryable());
        assert!(!ResolveError::ExtractionFailed {
            version: "abc".into(),
            function: FunctionKind::Signature,
            attempted: "x".into(),
        }
        .is_retryable());
        assert!(!ResolveError::FormatNotFound(999).is_retryable());
    }

    #[test]
    fn test_unavailable_retryable_follows_reason() {
        let fetch = ResolveError::Unavailable {
            version: "v".into(),
            reason: UnavailableReason::ScriptFetch("reset".into()),
        };
        let extraction = ResolveError::Unavailable {
            version: "v".into(),
            reason: UnavailableReason::Extraction("none".into()),
        };
        assert!(fetch.is_retryable());
        assert!(!extraction.is_retryable());
    }

    #[test]
    fn test_timeout_is_not_memoized() {
        assert!(ResolveError::Timeout("probe".into())
            .unavailable_reason()
            .is_none());
        assert!(matches!(
            ResolveError::ScriptFetch {
                version: "v".into(),
                reason: "x".into()
            }
            .unavailable_reason(),
            Some(UnavailableReason::ScriptFetch(_))
        ));
    }

    #[test]
    fn test_error_display_mentions_function() {
        let err = ResolveError::CipherEvaluation {
            function: FunctionKind::NParam,
            stage: EvalStage::Invoke,
            cause: "TypeError".into(),
            snippet: "Ab=function(a){...".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("n-param"));
        assert!(msg.contains("invoke"));
    }
}
