use std::io;
use std::path::PathBuf;

use crate::engine::EngineError;

const DOCUMENT_READ_HINT: &str = "check that the PDF file is not corrupted";
const ENGINE_HINT: &str = "check the tesseract installation and the language data";

/// The error type returned by every conversion entry point.
#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to read document: {message} ({hint})")]
    DocumentRead { message: String, hint: &'static str },

    #[error("OCR failed: {message} ({hint})")]
    Engine { message: String, hint: &'static str },

    #[error("Permission denied writing {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Failed to save {}: {message}", path.display())]
    Save { path: PathBuf, message: String },

    #[error("Failed to remove password: {0}")]
    PasswordRemoval(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConversionError::Cancelled)
    }

    pub fn document_read(message: impl ToString) -> Self {
        ConversionError::DocumentRead {
            message: message.to_string(),
            hint: DOCUMENT_READ_HINT,
        }
    }

    pub fn engine(message: impl ToString) -> Self {
        ConversionError::Engine {
            message: message.to_string(),
            hint: ENGINE_HINT,
        }
    }

    /// Classifies an output write failure.
    pub fn from_write(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        let path = path.into();
        if err.kind() == io::ErrorKind::PermissionDenied {
            ConversionError::PermissionDenied { path }
        } else {
            ConversionError::Save {
                path,
                message: err.to_string(),
            }
        }
    }
}

impl From<EngineError> for ConversionError {
    fn from(err: EngineError) -> Self {
        ConversionError::engine(err)
    }
}
