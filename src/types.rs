use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One row of the recognizer's word table.
///
/// Confidence follows the Tesseract convention: `-1` marks a structural row
/// (page, block, paragraph, line) with no text; words carry `0..=100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub text: String,
    pub confidence: f64,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
}

impl WordBox {
    pub fn new(text: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
        Self {
            text: text.into(),
            confidence,
            left: bbox[0],
            top: bbox[1],
            width: bbox[2],
            height: bbox[3],
            block_num: 0,
            par_num: 0,
            line_num: 0,
            word_num: 0,
        }
    }

    /// Builder-style setter for the block/paragraph/line/word position.
    pub fn at(mut self, block_num: u32, par_num: u32, line_num: u32, word_num: u32) -> Self {
        self.block_num = block_num;
        self.par_num = par_num;
        self.line_num = line_num;
        self.word_num = word_num;
        self
    }

    /// `true` when the engine actually detected text at this position.
    pub fn has_confidence(&self) -> bool {
        self.confidence >= 0.0
    }
}

/// Outcome of the adaptive engine for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveOcrResult {
    pub frame: Vec<WordBox>,
    /// Mean of the non-negative confidences in `frame`, `0.0` when there are none.
    pub average_confidence: f64,
    /// Image the winning frame was computed from. Only populated for results
    /// produced in-process; results returned by worker processes leave it empty.
    #[serde(skip)]
    pub image: Option<DynamicImage>,
    pub used_preprocessing: bool,
}

impl AdaptiveOcrResult {
    pub fn empty() -> Self {
        Self {
            frame: Vec::new(),
            average_confidence: 0.0,
            image: None,
            used_preprocessing: false,
        }
    }
}

/// Selects what a worker hands back for each image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Word table filtered at the render threshold, for searchable PDFs.
    WordTable,
    /// Reconstructed plain text, for extraction.
    Text,
}

/// Per-image payload, tagged so it survives the process boundary unambiguously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PagePayload {
    Words(Vec<WordBox>),
    Text(String),
}

impl PagePayload {
    pub fn words(&self) -> &[WordBox] {
        match self {
            PagePayload::Words(words) => words,
            PagePayload::Text(_) => &[],
        }
    }

    pub fn text(&self) -> &str {
        match self {
            PagePayload::Text(text) => text,
            PagePayload::Words(_) => "",
        }
    }
}

/// What the dispatcher returns for each input image, in input order.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub result: AdaptiveOcrResult,
    pub payload: PagePayload,
}

/// Serializable form of a [`PageOutcome`] exchanged with worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub result: AdaptiveOcrResult,
    pub payload: PagePayload,
}

impl From<WorkerRecord> for PageOutcome {
    fn from(record: WorkerRecord) -> Self {
        Self {
            result: record.result,
            payload: record.payload,
        }
    }
}

impl From<PageOutcome> for WorkerRecord {
    fn from(outcome: PageOutcome) -> Self {
        let mut result = outcome.result;
        result.image = None;
        Self {
            result,
            payload: outcome.payload,
        }
    }
}
