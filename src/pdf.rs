//! PDF rasterization and composition.
//!
//! The assembler only talks to the [`PdfBackend`] traits; [`PdfiumBackend`]
//! is the production implementation on top of `pdfium-render`.

use std::fs;
use std::os::raw::{c_int, c_ulong, c_void};
use std::path::{Path, PathBuf};

use image::DynamicImage;
use pdfium_render::prelude::*;

use crate::config::{FONT_SIZE_FACTOR, POINTS_PER_INCH};
use crate::frame::extract_coordinates;
use crate::types::WordBox;

#[derive(thiserror::Error, Debug)]
pub enum PdfError {
    #[error("Failed to initialize PDFium: {0}")]
    Bind(String),

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("PDF is password protected")]
    PasswordRequired,

    #[error("Incorrect PDF password")]
    InvalidPassword,

    #[error("Failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("Failed to load font {}: {message}", path.display())]
    Font { path: PathBuf, message: String },

    #[error("Failed to compose page: {0}")]
    Compose(String),

    #[error("Failed to serialize PDF: {0}")]
    Save(String),
}

/// One output page: the raster image filling the page plus its recognized words.
pub struct ComposedPage<'a> {
    pub width_pt: f32,
    pub height_pt: f32,
    pub image: &'a DynamicImage,
    pub words: &'a [WordBox],
    /// Points per image pixel.
    pub scale: f32,
}

/// An invisible text run in PDF user space (origin bottom-left).
#[derive(Clone, Debug, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub baseline_y: f32,
    pub font_size: f32,
}

/// Places each word with its baseline at the bottom of its box.
pub fn layout_words(page: &ComposedPage<'_>) -> Vec<TextRun> {
    page.words
        .iter()
        .filter_map(|word| {
            let text = word.text.trim();
            if text.is_empty() {
                return None;
            }
            let (left, top, height) = extract_coordinates(word)?;
            let font_size = FONT_SIZE_FACTOR * height as f32 * page.scale;
            if font_size <= 0.0 || !font_size.is_finite() {
                return None;
            }
            Some(TextRun {
                text: text.to_string(),
                x: left as f32 * page.scale,
                baseline_y: page.height_pt - (top + height) as f32 * page.scale,
                font_size,
            })
        })
        .collect()
}

pub trait PdfBackend {
    /// Opens an existing document, authenticating with `password` if given.
    fn open<'a>(&'a self, path: &Path, password: Option<&'a str>) -> Result<Box<dyn SourceDocument + 'a>, PdfError>;

    /// Starts an empty document whose text runs use the font at `font`.
    fn create<'a>(&'a self, font: &Path) -> Result<Box<dyn OutputDocument + 'a>, PdfError>;

    /// True for any document with a security handler, including ones that
    /// open without a password but carry an owner password.
    fn is_encrypted(&self, path: &Path) -> Result<bool, PdfError>;
}

pub trait SourceDocument {
    fn page_count(&self) -> usize;

    /// `(width, height)` in points.
    fn page_size(&self, index: usize) -> Result<(f32, f32), PdfError>;

    fn rasterize(&self, index: usize, dpi: f32) -> Result<DynamicImage, PdfError>;

    /// The whole document re-serialized without its security handler.
    fn to_unencrypted_bytes(&self) -> Result<Vec<u8>, PdfError>;
}

pub trait OutputDocument {
    /// Appends a page and returns how many words could not be inserted.
    fn add_page(&mut self, page: &ComposedPage<'_>) -> Result<usize, PdfError>;

    fn to_bytes(&self) -> Result<Vec<u8>, PdfError>;
}

pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    /// Binds to the PDFium shared library, trying `library_dir` first, then the
    /// working directory, common install prefixes and finally the system loader.
    pub fn bind(library_dir: Option<&Path>) -> Result<Self, PdfError> {
        let mut dirs: Vec<PathBuf> = library_dir.map(Path::to_path_buf).into_iter().collect();
        dirs.extend(["./", "/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"].iter().map(PathBuf::from));

        let bound = dirs.iter().find_map(|dir| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)).ok()
        });
        let bindings = match bound {
            Some(bindings) => bindings,
            None => Pdfium::bind_to_system_library()
                .map_err(|e| PdfError::Bind(format!("could not find the PDFium library: {}", e)))?,
        };

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

fn is_password_error(err: &PdfiumError) -> bool {
    matches!(
        err,
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError)
    )
}

impl PdfBackend for PdfiumBackend {
    fn open<'a>(&'a self, path: &Path, password: Option<&'a str>) -> Result<Box<dyn SourceDocument + 'a>, PdfError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| match (is_password_error(&e), password) {
                (true, None) => PdfError::PasswordRequired,
                (true, Some(_)) => PdfError::InvalidPassword,
                (false, _) => PdfError::Load(e.to_string()),
            })?;
        Ok(Box::new(PdfiumSource {
            pdfium: &self.pdfium,
            document,
            path: path.to_path_buf(),
            password,
        }))
    }

    fn create<'a>(&'a self, font_path: &Path) -> Result<Box<dyn OutputDocument + 'a>, PdfError> {
        let mut document = self
            .pdfium
            .create_new_pdf()
            .map_err(|e| PdfError::Compose(e.to_string()))?;
        let font = document
            .fonts_mut()
            .load_true_type_from_file(font_path, true)
            .map_err(|e| PdfError::Font {
                path: font_path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Box::new(PdfiumOutput { document, font }))
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool, PdfError> {
        match self.pdfium.load_pdf_from_file(path, None) {
            // Unknown handler revisions (AES-256 and later) are encrypted too.
            Ok(document) => Ok(!matches!(
                document.permissions().security_handler_revision(),
                Ok(PdfSecurityHandlerRevision::Unprotected)
            )),
            Err(e) if is_password_error(&e) => Ok(true),
            Err(e) => Err(PdfError::Load(e.to_string())),
        }
    }
}

struct PdfiumSource<'a> {
    pdfium: &'a Pdfium,
    document: PdfDocument<'a>,
    path: PathBuf,
    password: Option<&'a str>,
}

impl PdfiumSource<'_> {
    fn page(&self, index: usize) -> Result<PdfPage<'_>, PdfError> {
        let render_error = |message: String| PdfError::Render {
            page: index + 1,
            message,
        };
        let page_index = PdfPageIndex::try_from(index).map_err(|e| render_error(e.to_string()))?;
        self.document
            .pages()
            .get(page_index)
            .map_err(|e| render_error(e.to_string()))
    }
}

impl SourceDocument for PdfiumSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32), PdfError> {
        let page = self.page(index)?;
        Ok((page.width().value, page.height().value))
    }

    fn rasterize(&self, index: usize, dpi: f32) -> Result<DynamicImage, PdfError> {
        let page = self.page(index)?;
        let scale = dpi / POINTS_PER_INCH;
        let width = ((page.width().value * scale).round() as i32).max(1);
        let height = ((page.height().value * scale).round() as i32).max(1);

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(width)
                    .set_target_height(height)
                    .render_form_data(true)
                    .render_annotations(true),
            )
            .map_err(|e| PdfError::Render {
                page: index + 1,
                message: e.to_string(),
            })?;

        Ok(bitmap.as_image())
    }

    fn to_unencrypted_bytes(&self) -> Result<Vec<u8>, PdfError> {
        save_without_security(self.pdfium, &self.path, self.password)
    }
}

/// `FPDF_REMOVE_SECURITY` from `fpdf_save.h`.
const FPDF_REMOVE_SECURITY: FPDF_DWORD = 3;

/// An `FPDF_FILEWRITE` collecting everything PDFium writes into memory.
#[repr(C)]
struct ByteSink {
    file_write: FPDF_FILEWRITE,
    bytes: Vec<u8>,
}

unsafe extern "C" fn write_block(this: *mut FPDF_FILEWRITE, data: *const c_void, size: c_ulong) -> c_int {
    // SAFETY: `this` points at the first field of the `ByteSink` handed to
    // `FPDF_SaveAsCopy`, and PDFium guarantees `size` readable bytes at `data`.
    let sink = &mut *this.cast::<ByteSink>();
    sink.bytes
        .extend_from_slice(std::slice::from_raw_parts(data.cast::<u8>(), size as usize));
    1
}

/// Re-saves the complete document (metadata, outline, forms included) with
/// its encryption dictionary dropped.
///
/// pdfium-render's own save path always keeps the security handler, so this
/// goes through the raw bindings on a second handle to the same file.
fn save_without_security(pdfium: &Pdfium, path: &Path, password: Option<&str>) -> Result<Vec<u8>, PdfError> {
    let data = fs::read(path).map_err(|e| PdfError::Save(e.to_string()))?;
    let bindings = pdfium.bindings();

    let handle = bindings.FPDF_LoadMemDocument64(&data, password);
    if handle.is_null() {
        return Err(PdfError::Save(format!(
            "PDFium could not reopen the document (error {})",
            bindings.FPDF_GetLastError()
        )));
    }

    let mut sink = ByteSink {
        file_write: FPDF_FILEWRITE {
            version: 1,
            WriteBlock: Some(write_block),
        },
        bytes: Vec::new(),
    };
    let saved = bindings.FPDF_SaveAsCopy(
        handle,
        (&mut sink as *mut ByteSink).cast::<FPDF_FILEWRITE>(),
        FPDF_REMOVE_SECURITY,
    );
    bindings.FPDF_CloseDocument(handle);

    if bindings.is_true(saved) {
        Ok(sink.bytes)
    } else {
        Err(PdfError::Save("PDFium failed to write the document".to_string()))
    }
}

struct PdfiumOutput<'a> {
    document: PdfDocument<'a>,
    font: PdfFontToken,
}

impl<'a> PdfiumOutput<'a> {
    fn text_object(&self, run: &TextRun) -> Result<PdfPageTextObject<'a>, PdfiumError> {
        let mut object =
            PdfPageTextObject::new(&self.document, &run.text, self.font, PdfPoints::new(run.font_size))?;
        object.set_render_mode(PdfPageTextRenderMode::Invisible)?;
        object.translate(PdfPoints::new(run.x), PdfPoints::new(run.baseline_y))?;
        Ok(object)
    }
}

impl OutputDocument for PdfiumOutput<'_> {
    fn add_page(&mut self, page: &ComposedPage<'_>) -> Result<usize, PdfError> {
        let width = PdfPoints::new(page.width_pt);
        let height = PdfPoints::new(page.height_pt);

        let mut pdf_page = self
            .document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(width, height))
            .map_err(|e| PdfError::Compose(e.to_string()))?;

        pdf_page
            .objects_mut()
            .create_image_object(PdfPoints::ZERO, PdfPoints::ZERO, page.image, Some(width), Some(height))
            .map_err(|e| PdfError::Compose(e.to_string()))?;

        // A word that cannot be inserted is dropped; the page still goes out.
        let mut skipped = 0;
        for run in layout_words(page) {
            let inserted = self
                .text_object(&run)
                .and_then(|object| pdf_page.objects_mut().add_text_object(object).map(|_| ()));
            if let Err(e) = inserted {
                tracing::debug!("skipping word {:?}: {}", run.text, e);
                skipped += 1;
            }
        }

        if skipped > 0 {
            tracing::warn!("{} words could not be added to the text layer", skipped);
        }
        Ok(skipped)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PdfError> {
        self.document
            .save_to_bytes()
            .map_err(|e| PdfError::Save(e.to_string()))
    }
}
