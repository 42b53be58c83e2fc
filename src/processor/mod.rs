//! Processor System
//!
//! Pluggable business processors that turn a changed item into a work-queue
//! submission, and the registry that picks one for each change event.
//!
//! # Example Usage
//!
//! ```no_run
//! use subsync::processor::{ProcessorRegistry, QueueSubmissionProcessor};
//!
//! let mut registry = ProcessorRegistry::new();
//! registry.register(QueueSubmissionProcessor::descriptor()).unwrap();
//!
//! let resolution = registry.resolve("uipath:QueueA", "sites/a/lists/b", None);
//! assert!(resolution.is_some());
//! ```

pub mod error;
pub mod traits;
pub mod registry;
pub mod queue_submission;

pub use error::{ProcessorError, ProcessorResult};
pub use traits::{ProcessOutcome, Processor, ProcessorContext};
pub use registry::{MatchStage, ProcessorDescriptor, ProcessorRegistry, Resolution};
pub use queue_submission::{QueueSubmissionProcessor, QUEUE_PROCESSOR_NAME};

/// Registry holding only the built-in queue processor
///
/// Callers with business processors should register theirs first and the
/// catch-all last.
pub fn default_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    // A fresh registry cannot already hold this name
    let _ = registry.register(QueueSubmissionProcessor::descriptor());
    registry
}
