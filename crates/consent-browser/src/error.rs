use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    LaunchError(String),

    #[error("browser process died: {0}")]
    Crashed(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("script evaluation failed: {0}")]
    ScriptError(String),

    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("session pool is closed")]
    PoolClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    /// Whether the session behind this error is unusable.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_) | Self::LaunchError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::NavigationError("net::ERR_NAME_NOT_RESOLVED".to_string());
        assert_eq!(
            err.to_string(),
            "navigation failed: net::ERR_NAME_NOT_RESOLVED"
        );
    }

    #[test]
    fn test_crash_classification() {
        assert!(BrowserError::Crashed("websocket closed".into()).is_crash());
        assert!(BrowserError::LaunchError("no chrome".into()).is_crash());
        assert!(!BrowserError::Timeout("30s".into()).is_crash());
        assert!(!BrowserError::NavigationError("aborted".into()).is_crash());
    }
}
