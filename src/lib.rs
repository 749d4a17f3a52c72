//! # kaidoku - searchable PDFs from scanned documents
//!
//! kaidoku turns image-only PDFs (or loose page images) into searchable PDFs by
//! laying an invisible OCR text layer over every page, and extracts the same
//! text as plain UTF-8.
//!
//! ## Features
//!
//! - **Adaptive OCR**: several page-segmentation modes per image, early exit on
//!   a confident result, preprocessing only for pages that need it
//! - **Parallel**: pages are recognized in worker processes, results come back
//!   in page order
//! - **Bounded memory**: documents are processed in chunks the size of the pool
//! - **Cancellable**: a shared token stops work before anything is written
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kaidoku::{CancelToken, DocumentAssembler, Settings};
//! use std::path::Path;
//!
//! let settings = Settings::from_env();
//! let assembler = DocumentAssembler::from_settings(&settings, None)?;
//!
//! assembler.create_searchable_pdf(
//!     Path::new("scan.pdf"),
//!     Path::new("scan.searchable.pdf"),
//!     &CancelToken::new(),
//!     None,
//! )?;
//! # Ok::<(), kaidoku::ConversionError>(())
//! ```

// Core modules
pub mod adaptive;
pub mod assembler;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fonts;
pub mod frame;
pub mod pdf;
pub mod preprocess;
pub mod progress;
pub mod reconstruct;
pub mod sanitize;
pub mod types;

// Public API exports
pub use crate::adaptive::AdaptiveOcrEngine;
pub use crate::assembler::DocumentAssembler;
pub use crate::cancel::CancelToken;
pub use crate::config::{DispatchSettings, FontSettings, OcrSettings, Settings};
pub use crate::dispatch::pool::{PoolLauncher, ProcessLauncher};
pub use crate::dispatch::ParallelDispatcher;
pub use crate::engine::{EngineError, Recognizer, TesseractCli};
pub use crate::error::{ConversionError, Result};
pub use crate::fonts::FontLocator;
pub use crate::pdf::{PdfBackend, PdfiumBackend};
pub use crate::progress::Progress;
pub use crate::reconstruct::reconstruct_text;
pub use crate::sanitize::sanitize;
pub use crate::types::{AdaptiveOcrResult, PageOutcome, PagePayload, WordBox, WorkerMode};
