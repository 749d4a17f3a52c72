//! Runtime settings and the fixed constants of the OCR pipeline.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize;

/// Best-candidate score at which remaining configurations are skipped.
pub const EARLY_STOP_CONFIDENCE: f64 = 90.0;
/// Words below this confidence are left out of the invisible text layer.
pub const RENDER_CONFIDENCE_THRESHOLD: f64 = 50.0;
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 65.0;
pub const UPSCALE_FACTOR: f64 = 1.5;
pub const BINARIZE_THRESHOLD: u8 = 180;
pub const PDF_RENDER_DPI: f32 = 300.0;
pub const POINTS_PER_INCH: f32 = 72.0;
/// Invisible glyph size relative to the word box height.
pub const FONT_SIZE_FACTOR: f32 = 0.8;

const DEFAULT_BASE_CONFIG: &str = "--oem 1";
const DEFAULT_PSM_CANDIDATES: [u32; 2] = [6, 11];
const DEFAULT_LANGUAGE: &str = "jpn";

/// Settings shared by the adaptive engine in the main process and in every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrSettings {
    pub acceptance_threshold: f64,
    pub psm_candidates: Vec<u32>,
    /// Already sanitized base configuration.
    pub base_config: String,
    pub language: String,
    pub tesseract_cmd: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            psm_candidates: DEFAULT_PSM_CANDIDATES.to_vec(),
            base_config: sanitize(DEFAULT_BASE_CONFIG),
            language: DEFAULT_LANGUAGE.to_string(),
            tesseract_cmd: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub workers: usize,
    pub parallel: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FontSettings {
    pub font_path: Option<PathBuf>,
    /// Searched before the platform font directories.
    pub font_dirs: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub ocr: OcrSettings,
    pub dispatch: DispatchSettings,
    pub fonts: FontSettings,
    pub pdfium_library_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok();
        let path = |name: &str| {
            env::var_os(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        Settings {
            ocr: OcrSettings {
                acceptance_threshold: parse_acceptance_threshold(
                    var("OCR_CONFIDENCE_THRESHOLD").as_deref(),
                ),
                psm_candidates: parse_psm_candidates(var("OCR_PSM_CANDIDATES").as_deref()),
                base_config: sanitize(
                    var("OCR_TESSERACT_CONFIG")
                        .as_deref()
                        .unwrap_or(DEFAULT_BASE_CONFIG),
                ),
                language: var("OCR_LANGUAGE")
                    .map(|lang| lang.trim().to_string())
                    .filter(|lang| !lang.is_empty())
                    .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                tesseract_cmd: path("TESSERACT_CMD").or_else(|| path("TESSERACT_PATH")),
            },
            dispatch: DispatchSettings {
                workers: parse_workers(var("KAIDOKU_OCR_WORKERS").as_deref()),
                parallel: var("KAIDOKU_PARALLEL").as_deref() != Some("0"),
            },
            fonts: FontSettings {
                font_path: path("OCR_JPN_FONT"),
                font_dirs: ["OCR_JPN_FONT_DIR", "OCR_FONT_DIR"]
                    .iter()
                    .filter_map(|name| path(name))
                    .collect(),
            },
            pdfium_library_path: path("PDFIUM_LIBRARY_PATH"),
        }
    }
}

/// Clamps to `[0, 100]`; anything unparsable falls back to the default.
pub fn parse_acceptance_threshold(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .map(normalize_acceptance_threshold)
        .unwrap_or(DEFAULT_ACCEPTANCE_THRESHOLD)
}

/// Clamps to `[0, 100]`; non-finite values fall back to the default.
pub fn normalize_acceptance_threshold(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        DEFAULT_ACCEPTANCE_THRESHOLD
    }
}

/// Comma separated page-segmentation modes; non-numeric entries are ignored.
pub fn parse_psm_candidates(raw: Option<&str>) -> Vec<u32> {
    match raw {
        None => DEFAULT_PSM_CANDIDATES.to_vec(),
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|psm| !psm.is_empty() && psm.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|psm| psm.parse().ok())
            .collect(),
    }
}

pub fn parse_workers(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .map(|n| n.max(1) as usize)
        .unwrap_or_else(default_workers)
}

pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(1)
}
