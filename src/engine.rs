use std::env;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::{DynamicImage, ImageFormat};

use crate::config::OcrSettings;
use crate::types::WordBox;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Failed to run tesseract at {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Tesseract exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Malformed TSV output: {0}")]
    Tsv(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::ImageError(err.to_string())
    }
}

/// The recognition capability the pipeline is built around.
///
/// Implementations must be usable from any thread; each call is independent.
pub trait Recognizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Word table for `image` under one configuration string.
    fn recognize(&self, image: &DynamicImage, config: &str) -> Result<Vec<WordBox>, EngineError>;
}

/// Runs the `tesseract` executable, streaming a PNG on stdin and reading TSV from stdout.
#[derive(Clone, Debug)]
pub struct TesseractCli {
    command: PathBuf,
    language: String,
}

impl TesseractCli {
    pub fn new(command: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }

    /// Resolves the executable location, falling back to a bare `tesseract`
    /// that is looked up on `PATH` when spawned.
    pub fn discover(settings: &OcrSettings) -> Self {
        let command = locate_tesseract(settings.tesseract_cmd.as_deref())
            .unwrap_or_else(|| PathBuf::from(executable_name()));
        tracing::debug!("Using tesseract at {}", command.display());
        Self::new(command, settings.language.clone())
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

impl Recognizer for TesseractCli {
    fn is_available(&self) -> bool {
        answers_version(&self.command)
    }

    fn recognize(&self, image: &DynamicImage, config: &str) -> Result<Vec<WordBox>, EngineError> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = Command::new(&self.command)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .args(config.split_whitespace())
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: self.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(&png)?;
                    stdin.flush()?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            output.and_then(|output| written.map(|_| output))
        })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_tsv(&String::from_utf8_lossy(&output.stdout))
    }
}

struct TsvColumns {
    block_num: usize,
    par_num: usize,
    line_num: usize,
    word_num: usize,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    conf: usize,
    text: Option<usize>,
}

impl TsvColumns {
    fn from_header(header: &str) -> Result<Self, EngineError> {
        let names: Vec<&str> = header.split('\t').map(str::trim).collect();
        let find = |name: &str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| EngineError::Tsv(format!("missing column `{}`", name)))
        };
        Ok(Self {
            block_num: find("block_num")?,
            par_num: find("par_num")?,
            line_num: find("line_num")?,
            word_num: find("word_num")?,
            left: find("left")?,
            top: find("top")?,
            width: find("width")?,
            height: find("height")?,
            conf: find("conf")?,
            text: names.iter().position(|n| *n == "text"),
        })
    }

    fn parse_row(&self, line: &str) -> Option<WordBox> {
        let fields: Vec<&str> = line.split('\t').collect();
        let int = |idx: usize| fields.get(idx)?.trim().parse::<u32>().ok();
        let float = |idx: usize| fields.get(idx)?.trim().parse::<f64>().ok();

        Some(WordBox {
            text: self
                .text
                .and_then(|idx| fields.get(idx))
                .map(|text| text.to_string())
                .unwrap_or_default(),
            // Unparsable confidences count as "no text here".
            confidence: float(self.conf).filter(|c| c.is_finite()).unwrap_or(-1.0),
            left: float(self.left)?,
            top: float(self.top)?,
            width: float(self.width)?,
            height: float(self.height)?,
            block_num: int(self.block_num)?,
            par_num: int(self.par_num)?,
            line_num: int(self.line_num)?,
            word_num: int(self.word_num)?,
        })
    }
}

/// Parses `tesseract ... tsv` output into a word table, preserving row order.
pub fn parse_tsv(tsv: &str) -> Result<Vec<WordBox>, EngineError> {
    let mut lines = tsv.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = TsvColumns::from_header(header)?;

    Ok(lines.filter_map(|line| columns.parse_row(line)).collect())
}

fn executable_name() -> &'static str {
    if cfg!(windows) {
        "tesseract.exe"
    } else {
        "tesseract"
    }
}

fn answers_version(command: &Path) -> bool {
    Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn candidate_locations(explicit: Option<&Path>) -> Vec<PathBuf> {
    let exe = executable_name();
    let mut candidates: Vec<PathBuf> = Vec::new();

    candidates.extend(explicit.map(Path::to_path_buf));
    for name in ["TESSERACT_CMD", "TESSERACT_PATH"] {
        if let Some(value) = env::var_os(name).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(value));
        }
    }

    if let Some(path) = env::var_os("PATH") {
        candidates.extend(env::split_paths(&path).map(|dir| dir.join(exe)));
    }

    if cfg!(windows) {
        candidates.push(PathBuf::from(r"C:\Program Files\Tesseract-OCR\tesseract.exe"));
        candidates.push(PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe"));
    }

    // Copies bundled next to the running executable.
    if let Some(root) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        for sub_dir in ["", "Tesseract-OCR", "tesseract", "tesseract-ocr", "bin"] {
            candidates.push(root.join(sub_dir).join(exe));
        }
    }

    candidates
}

/// First candidate that exists and answers `--version`.
pub fn locate_tesseract(explicit: Option<&Path>) -> Option<PathBuf> {
    candidate_locations(explicit)
        .into_iter()
        .find(|candidate| candidate.is_file() && answers_version(candidate))
}
