use std::path::PathBuf;

/// Result alias that carries the custom [`SurfaceError`] type.
pub type Result<T> = std::result::Result<T, SurfaceError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// Free-form failure that does not warrant its own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON configuration.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A zone or step-size file line that could not be understood. The file
    /// that produced it is abandoned; loading carries on with the next one.
    #[error("trouble in {}, around line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// A zone the surface cannot run without (the `Home` zone).
    #[error("{surface} needs a {zone} zone to operate")]
    MissingZone { surface: String, zone: String },
}

impl SurfaceError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

impl From<&str> for SurfaceError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SurfaceError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_name_file_and_line() {
        let err = SurfaceError::parse("Zones/Home.zon", 12, "bad number `1.2.3`");
        let text = err.to_string();
        assert!(text.contains("Home.zon"));
        assert!(text.contains("line 12"));
        assert!(text.contains("1.2.3"));
    }

    #[test]
    fn parse_errors_keep_the_path_without_a_cause() {
        use std::error::Error as _;

        let err = SurfaceError::parse("Zones/Track.zon", 3, "missing ZoneEnd");
        assert!(err.source().is_none());
        match err {
            SurfaceError::Parse { path, line, .. } => {
                assert_eq!(path, PathBuf::from("Zones/Track.zon"));
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_zone_mentions_surface() {
        let err = SurfaceError::MissingZone {
            surface: "XTouch".into(),
            zone: "Home".into(),
        };
        assert_eq!(err.to_string(), "XTouch needs a Home zone to operate");
    }
}
