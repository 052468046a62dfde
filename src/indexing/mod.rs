mod driver;
mod files;
mod progress;
mod slots;
mod stats;
mod throttle;
mod types;
mod vectors;

pub use driver::{IndexReport, IndexingPipeline, PipelineOptions};
pub use files::{FileChunkingManager, FileManagerOptions};
pub use progress::{CompletionHook, ProgressCallback, ProgressEvent};
pub use slots::{FileData, FileStatus, SlotGuard, SlotId, SlotTracker};
pub use stats::RateWindow;
pub use throttle::{ThrottleDetector, ThrottlingStatus};
pub use types::{
    BatchAccessError, BatchResult, BatchTask, FileMetadata, FileProcessingResult, ProcessError,
};
pub use vectors::{VectorCalculationManager, VectorStats};
