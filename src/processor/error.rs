//! Processor Error Types

use thiserror::Error;

/// Result type for processor steps
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Errors raised by the individual processor steps
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    /// Item failed business validation
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Item could not be turned into a work record
    #[error("Transform failed: {message}")]
    Transform { message: String },

    /// Work queue refused or failed the submission
    #[error("Submission failed: {message}")]
    Submission { message: String },

    /// Processor already registered under this name
    #[error("Processor already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Descriptor configuration is invalid
    #[error("Invalid processor descriptor: {message}")]
    InvalidDescriptor { message: String },
}

impl ProcessorError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn transform<S: Into<String>>(message: S) -> Self {
        Self::Transform { message: message.into() }
    }

    pub fn submission<S: Into<String>>(message: S) -> Self {
        Self::Submission { message: message.into() }
    }

    pub fn already_registered<S: Into<String>>(name: S) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    pub fn invalid_descriptor<S: Into<String>>(message: S) -> Self {
        Self::InvalidDescriptor { message: message.into() }
    }
}

impl From<regex::Error> for ProcessorError {
    fn from(err: regex::Error) -> Self {
        ProcessorError::invalid_descriptor(format!("bad path pattern: {}", err))
    }
}
