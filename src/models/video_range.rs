use serde::{Deserialize, Serialize};

use crate::error::{parse_seconds, ValidationError};

/// User-defined playback window of a video, in seconds.
///
/// `end > start` always holds for values built through [`VideoRange::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoRange {
    pub start: f64,
    pub end: f64,
}

impl VideoRange {
    pub fn new(start: f64, end: f64) -> Result<Self, ValidationError> {
        if !start.is_finite() || !end.is_finite() || end <= start {
            return Err(ValidationError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from the start/end text fields of the control panel.
    pub fn parse(start: &str, end: &str) -> Result<Self, ValidationError> {
        let start = parse_seconds(start)?;
        let end = parse_seconds(end)?;
        Self::new(start, end)
    }

    /// Length of the window in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Ranges loaded from disk may predate validation.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_range() {
        assert!(VideoRange::new(10.0, 20.0).is_ok());
        assert_eq!(
            VideoRange::new(20.0, 20.0),
            Err(ValidationError::EmptyRange { start: 20.0, end: 20.0 })
        );
        assert!(VideoRange::new(5.0, 1.0).is_err());
        assert!(VideoRange::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_parse() {
        let range = VideoRange::parse("1.5", " 4 ").unwrap();
        assert_eq!(range.start, 1.5);
        assert_eq!(range.end, 4.0);
        assert_eq!(range.duration(), 2.5);

        assert!(matches!(
            VideoRange::parse("x", "4"),
            Err(ValidationError::NotANumber(_))
        ));
    }

    #[test]
    fn test_json_shape() {
        let range = VideoRange::new(10.0, 20.0).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":10.0,"end":20.0}"#);
    }
}
