//! Typed errors for input the user can get wrong.
//!
//! Internal plumbing uses `anyhow`; these enums exist for callers that need
//! to tell a rejected input apart from an I/O failure.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::{MAX_THUMB_WIDTH, MIN_THUMB_WIDTH};

/// Rejected user input. Nothing is mutated when one of these is returned.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("not a number: {0:?}")]
    NotANumber(String),

    #[error("end ({end}s) must be greater than start ({start}s)")]
    EmptyRange { start: f64, end: f64 },

    #[error("thumbnail width {0} must be between {MIN_THUMB_WIDTH} and {MAX_THUMB_WIDTH}")]
    WidthOutOfRange(i64),

    #[error("slideshow duration must be greater than zero, got {0}")]
    NonPositiveDuration(f64),

    #[error("slideshow duration of {0} seconds is too long")]
    DurationTooLong(f64),

    #[error("no media selected")]
    NoSelection,
}

/// Failure to remove a media file from disk.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("deletion of {0:?} was not confirmed")]
    NotConfirmed(PathBuf),

    #[error("failed to delete {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse a user-entered number of seconds.
pub(crate) fn parse_seconds(input: &str) -> Result<f64, ValidationError> {
    let trimmed = input.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ValidationError::NotANumber(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds(" 12.5 "), Ok(12.5));
        assert_eq!(
            parse_seconds("abc"),
            Err(ValidationError::NotANumber("abc".to_string()))
        );
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("inf").is_err());
    }

    #[test]
    fn test_messages() {
        let err = ValidationError::WidthOutOfRange(5000);
        assert_eq!(
            err.to_string(),
            "thumbnail width 5000 must be between 20 and 1000"
        );
    }
}
