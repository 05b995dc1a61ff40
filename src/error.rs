use std::sync::Arc;
use thiserror::Error;

/// Structured classification of an engine run that finished with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The engine rejected the argument list (unknown filter, bad option value).
    InvalidArguments,
    /// The input could not be demuxed or decoded.
    UnsupportedInput,
    /// The engine exited cleanly but produced no output bytes.
    EmptyOutput,
    /// The engine process could not be started or died without an exit code.
    Crashed,
    NonZeroExit(i32),
}

impl FailureKind {
    /// Classify a failed run from its exit code and diagnostic text.
    pub fn classify(code: Option<i32>, diagnostic: &str) -> Self {
        const BAD_ARGS: [&str; 5] = [
            "No such filter",
            "Invalid argument",
            "Unrecognized option",
            "Error parsing",
            "Option not found",
        ];
        const BAD_INPUT: [&str; 3] = [
            "Invalid data found when processing input",
            "moov atom not found",
            "could not find codec parameters",
        ];

        if BAD_ARGS.iter().any(|needle| diagnostic.contains(needle)) {
            return FailureKind::InvalidArguments;
        }
        if BAD_INPUT.iter().any(|needle| diagnostic.contains(needle)) {
            return FailureKind::UnsupportedInput;
        }
        match code {
            Some(code) => FailureKind::NonZeroExit(code),
            None => FailureKind::Crashed,
        }
    }

    fn describe(&self) -> String {
        match self {
            FailureKind::InvalidArguments => "the encoder rejected the requested settings".to_string(),
            FailureKind::UnsupportedInput => "the file could not be read as media".to_string(),
            FailureKind::EmptyOutput => "the encoder produced an empty file".to_string(),
            FailureKind::Crashed => "the encoder stopped unexpectedly".to_string(),
            FailureKind::NonZeroExit(code) => format!("the encoder exited with code {}", code),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    // -- Engine --
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine is busy with another job")]
    EngineBusy,

    #[error("encode failed: {kind}")]
    EncodeFailed { kind: FailureKind, detail: String },

    // -- Validation --
    #[error("invalid crop region: {0}")]
    InvalidRegion(String),

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("asset dimensions are not known yet")]
    AssetNotReady,

    #[error("invalid transform: {0}")]
    InvalidSpec(String),

    // -- Resources --
    #[error("unknown or revoked handle: {0}")]
    UnknownHandle(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A job failure still referenced by the job's state channel.
    #[error(transparent)]
    Shared(Arc<TransformError>),
}

impl TransformError {
    /// One sentence suitable for showing to the person who clicked "process".
    pub fn user_message(&self) -> String {
        match self {
            TransformError::EngineUnavailable(_) => {
                "The video engine could not be loaded. Check your connection and try again.".to_string()
            }
            TransformError::EngineBusy => {
                "Another file is still being processed. Wait for it to finish or cancel it.".to_string()
            }
            TransformError::EncodeFailed { kind, .. } => {
                let mut text = kind.to_string();
                if let Some(first) = text.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                format!("Processing failed: {}.", text)
            }
            TransformError::InvalidRegion(_) => "Select a larger crop area and try again.".to_string(),
            TransformError::InvalidRange(_) => {
                "The selected start and end times are outside the video.".to_string()
            }
            TransformError::AssetNotReady => "The file is still loading. Try again in a moment.".to_string(),
            TransformError::InvalidSpec(reason) => format!("These settings cannot be applied: {}.", reason),
            TransformError::UnknownHandle(_) => "That file is no longer available.".to_string(),
            TransformError::Io(e) => format!("The file could not be read or written: {}.", e),
            TransformError::Config(e) => format!("The configuration could not be loaded: {}.", e),
            TransformError::Shared(inner) => inner.user_message(),
        }
    }

    /// Validation errors are raised before any engine interaction.
    pub fn is_validation(&self) -> bool {
        if let TransformError::Shared(inner) = self {
            return inner.is_validation();
        }
        matches!(
            self,
            TransformError::InvalidRegion(_)
                | TransformError::InvalidRange(_)
                | TransformError::AssetNotReady
                | TransformError::InvalidSpec(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_diagnostic_over_exit_code() {
        let kind = FailureKind::classify(Some(1), "[AVFilterGraph] No such filter: 'crpo'");
        assert_eq!(kind, FailureKind::InvalidArguments);

        let kind = FailureKind::classify(Some(1), "input.mp4: Invalid data found when processing input");
        assert_eq!(kind, FailureKind::UnsupportedInput);
    }

    #[test]
    fn classify_falls_back_to_exit_status() {
        assert_eq!(FailureKind::classify(Some(69), "Conversion failed!"), FailureKind::NonZeroExit(69));
        assert_eq!(FailureKind::classify(None, ""), FailureKind::Crashed);
    }

    #[test]
    fn encode_failure_message_hides_engine_log() {
        let err = TransformError::EncodeFailed {
            kind: FailureKind::EmptyOutput,
            detail: "frame=    0 fps=0.0 q=0.0 Lsize=0kB".to_string(),
        };
        let message = err.user_message();
        assert_eq!(message, "Processing failed: The encoder produced an empty file.");
        assert!(!message.contains("Lsize"));
    }

    #[test]
    fn shared_error_keeps_its_own_message() {
        let io = Arc::new(TransformError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
        let shared = TransformError::Shared(Arc::clone(&io));
        assert_eq!(shared.user_message(), io.user_message());
        assert!(shared.user_message().contains("could not be read or written"));
        assert_eq!(shared.to_string(), io.to_string());
    }

    #[test]
    fn validation_kinds() {
        assert!(TransformError::AssetNotReady.is_validation());
        assert!(TransformError::InvalidRange("x".into()).is_validation());
        assert!(!TransformError::EngineBusy.is_validation());
    }
}
