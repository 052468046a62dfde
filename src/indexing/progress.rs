//! Progress reporting types.
//!
//! Callbacks must be cheap and non-blocking; the pipeline fires each one
//! once and never retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::FileProcessingResult;

/// One progress notification.
///
/// `total == 0` marks a setup/phase message whose text is in `info`; any
/// other total is a progress-bar update where `current` files out of `total`
/// have completed and `info` carries formatted throughput metrics.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub file_path: Option<PathBuf>,
    pub info: String,
}

impl ProgressEvent {
    pub fn setup(info: impl Into<String>) -> Self {
        Self {
            current: 0,
            total: 0,
            file_path: None,
            info: info.into(),
        }
    }

    pub fn file(current: usize, total: usize, file_path: PathBuf, info: impl Into<String>) -> Self {
        Self {
            current,
            total,
            file_path: Some(file_path),
            info: info.into(),
        }
    }

    pub fn is_setup(&self) -> bool {
        self.total == 0
    }
}

/// Observer for pipeline progress.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Hook fired by the file manager exactly once per finished file lifecycle.
pub type CompletionHook = Arc<dyn Fn(&Path, &FileProcessingResult) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_sentinel() {
        let event = ProgressEvent::setup("Starting indexing");
        assert!(event.is_setup());
        assert_eq!(event.current, 0);
        assert!(event.file_path.is_none());

        let event = ProgressEvent::file(3, 10, PathBuf::from("a.rs"), "3.1 files/s");
        assert!(!event.is_setup());
        assert_eq!(event.current, 3);
    }
}
