use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while processing a single input file
///
/// Every variant is fatal to the current file; nothing is retried. The
/// benchmark sweep is the only caller that tolerates failures, and it does so
/// by logging the tag and moving on to the next configuration.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Input is missing, not a regular file, a symlink, or not a video
    #[error("invalid input '{}': {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    /// Resolved output path already exists; outputs are never overwritten
    #[error("output file already exists: '{}'", .0.display())]
    OutputExists(PathBuf),

    /// Input already carries the requested codec and replace was requested
    #[error("input is already encoded with the target codec: '{}'", .0.display())]
    AlreadyEncoded(PathBuf),

    /// The external encoder failed; the partial output has been removed
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Output duration drifted too far from the input duration
    #[error("duration mismatch: input is {input_secs}s, output is {output_secs}s")]
    DurationMismatch { input_secs: i64, output_secs: i64 },

    /// Invocation arguments did not make sense together
    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EncodeError {
    /// Short stable tag used as the diagnostic prefix on stderr
    pub fn tag(&self) -> &'static str {
        match self {
            EncodeError::InvalidInput { .. } => "InvalidInput",
            EncodeError::OutputExists(_) => "OutputExists",
            EncodeError::AlreadyEncoded(_) => "AlreadyEncoded",
            EncodeError::ConversionFailed(_) => "ConversionFailed",
            EncodeError::DurationMismatch { .. } => "DurationMismatch",
            EncodeError::ArgumentError(_) => "ArgumentError",
            EncodeError::Io(_) => "IoError",
        }
    }

    pub fn invalid_input(path: &std::path::Path, reason: impl Into<String>) -> Self {
        EncodeError::InvalidInput {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        let err = EncodeError::invalid_input(std::path::Path::new("/tmp/x.mkv"), "missing");
        assert_eq!(err.tag(), "InvalidInput");
        assert_eq!(EncodeError::OutputExists(PathBuf::from("a")).tag(), "OutputExists");
        assert_eq!(
            EncodeError::DurationMismatch { input_secs: 10, output_secs: 14 }.tag(),
            "DurationMismatch"
        );
    }

    #[test]
    fn test_messages_carry_paths() {
        let err = EncodeError::invalid_input(std::path::Path::new("/media/a.mkv"), "is a symlink");
        let msg = format!("{}", err);
        assert!(msg.contains("/media/a.mkv"));
        assert!(msg.contains("is a symlink"));
    }
}
