//! Document-level entry points.
//!
//! Pages are handled in chunks the size of the worker pool: a chunk is
//! rasterized, recognized, written into the output document and dropped
//! before the next one starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

use crate::cancel::CancelToken;
use crate::config::{Settings, PDF_RENDER_DPI, POINTS_PER_INCH};
use crate::dispatch::pool::PoolLauncher;
use crate::dispatch::ParallelDispatcher;
use crate::engine::{Recognizer, TesseractCli};
use crate::error::{ConversionError, Result};
use crate::fonts::FontLocator;
use crate::pdf::{ComposedPage, OutputDocument, PdfBackend, PdfError, PdfiumBackend, SourceDocument};
use crate::preprocess::{fit_to_canvas, load_oriented};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::types::WorkerMode;

pub struct DocumentAssembler<B: PdfBackend> {
    backend: B,
    dispatcher: ParallelDispatcher,
    fonts: FontLocator,
}

impl DocumentAssembler<PdfiumBackend> {
    /// Production wiring: PDFium, the tesseract executable and, if given, a worker pool.
    pub fn from_settings(settings: &Settings, launcher: Option<Box<dyn PoolLauncher>>) -> Result<Self> {
        let backend = PdfiumBackend::bind(settings.pdfium_library_path.as_deref())
            .map_err(|e| ConversionError::Configuration(e.to_string()))?;
        let recognizer: Arc<dyn Recognizer> = Arc::new(TesseractCli::discover(&settings.ocr));

        let mut dispatcher = ParallelDispatcher::new(recognizer, &settings.ocr, &settings.dispatch);
        if let Some(launcher) = launcher {
            dispatcher = dispatcher.with_launcher(launcher);
        }

        Ok(Self::new(backend, dispatcher, FontLocator::new(settings.fonts.clone())))
    }
}

impl<B: PdfBackend> DocumentAssembler<B> {
    pub fn new(backend: B, dispatcher: ParallelDispatcher, fonts: FontLocator) -> Self {
        Self {
            backend,
            dispatcher,
            fonts,
        }
    }

    pub fn dispatcher(&self) -> &ParallelDispatcher {
        &self.dispatcher
    }

    /// Rewrites an image-only PDF with an invisible text layer on every page.
    pub fn create_searchable_pdf(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        self.ensure_recognizer()?;
        ensure_input(input)?;
        prepare_output_path(output)?;
        let font = self.fonts.locate()?;

        let source = self.backend.open(input, None).map_err(ConversionError::document_read)?;
        let mut target = self.create_output(&font)?;
        let mut reporter = ProgressReporter::new(progress);

        let total = source.page_count();
        if total == 0 {
            reporter.notice("document has no pages, nothing to recognize");
        }
        reporter.start(total);

        let mut done = 0;
        for start in (0..total).step_by(self.chunk_size()) {
            let end = (start + self.chunk_size()).min(total);

            let mut images = Vec::with_capacity(end - start);
            let mut sizes = Vec::with_capacity(end - start);
            for index in start..end {
                cancel.check()?;
                sizes.push(source.page_size(index).map_err(ConversionError::document_read)?);
                images.push(rasterize(source.as_ref(), index)?);
            }

            let outcomes = self.dispatcher.run(&images, WorkerMode::WordTable, cancel, &mut |completed, _| {
                reporter.advance(done + completed)
            })?;
            done += images.len();

            for (offset, ((outcome, image), (width_pt, height_pt))) in
                outcomes.iter().zip(&images).zip(sizes).enumerate()
            {
                cancel.check()?;
                let page = ComposedPage {
                    width_pt,
                    height_pt,
                    image,
                    words: outcome.payload.words(),
                    scale: width_pt / image.width().max(1) as f32,
                };
                add_page(target.as_mut(), &page, start + offset)?;
            }
        }

        cancel.check()?;
        save(target.as_ref(), output)
    }

    /// Builds a searchable PDF with one page per image, all pages sharing one canvas size.
    pub fn create_searchable_pdf_from_images(
        &self,
        images: &[PathBuf],
        output: &Path,
        cancel: &CancelToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        self.ensure_recognizer()?;
        if images.is_empty() {
            return Err(ConversionError::Input("select at least one input image".to_string()));
        }
        for path in images {
            if !path.exists() {
                return Err(ConversionError::Input(format!("input image not found: {}", path.display())));
            }
        }
        let is_pdf = output
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(ConversionError::Input("the output file must have a .pdf extension".to_string()));
        }
        prepare_output_path(output)?;
        let font = self.fonts.locate()?;

        let (canvas_width, canvas_height) = determine_canvas_size(images)?;
        let scale = POINTS_PER_INCH / PDF_RENDER_DPI;
        let width_pt = canvas_width as f32 * scale;
        let height_pt = canvas_height as f32 * scale;

        let mut target = self.create_output(&font)?;
        let mut reporter = ProgressReporter::new(progress);
        let total = images.len();
        reporter.start(total);

        let mut done = 0;
        for chunk in images.chunks(self.chunk_size()) {
            let mut prepared = Vec::with_capacity(chunk.len());
            for path in chunk {
                cancel.check()?;
                let image = open_image(path)?;
                prepared.push(DynamicImage::ImageRgb8(fit_to_canvas(&image, canvas_width, canvas_height)));
            }

            let outcomes = self.dispatcher.run(&prepared, WorkerMode::WordTable, cancel, &mut |completed, _| {
                reporter.advance(done + completed)
            })?;

            for (offset, (outcome, image)) in outcomes.iter().zip(&prepared).enumerate() {
                cancel.check()?;
                let page = ComposedPage {
                    width_pt,
                    height_pt,
                    image,
                    words: outcome.payload.words(),
                    scale,
                };
                add_page(target.as_mut(), &page, done + offset)?;
            }
            done += prepared.len();
        }

        cancel.check()?;
        save(target.as_ref(), output)
    }

    /// Plain text of every page, each preceded by a `--- page N ---` header.
    pub fn extract_text_from_image_pdf(
        &self,
        input: &Path,
        cancel: &CancelToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String> {
        self.ensure_recognizer()?;
        ensure_input(input)?;

        let source = self.backend.open(input, None).map_err(ConversionError::document_read)?;
        let mut reporter = ProgressReporter::new(progress);

        let total = source.page_count();
        if total == 0 {
            reporter.notice("document has no pages, nothing to recognize");
            return Ok("\n".to_string());
        }
        reporter.start(total);

        let mut blocks = Vec::with_capacity(total);
        for start in (0..total).step_by(self.chunk_size()) {
            let end = (start + self.chunk_size()).min(total);

            let mut images = Vec::with_capacity(end - start);
            for index in start..end {
                cancel.check()?;
                images.push(rasterize(source.as_ref(), index)?);
            }

            let done = blocks.len();
            let outcomes = self.dispatcher.run(&images, WorkerMode::Text, cancel, &mut |completed, _| {
                reporter.advance(done + completed)
            })?;

            for outcome in outcomes {
                let page_number = blocks.len() + 1;
                blocks.push(format!("--- page {} ---\n{}\n", page_number, outcome.payload.text().trim()));
            }
        }

        cancel.check()?;
        Ok(format!("{}\n", blocks.join("\n").trim()))
    }

    /// [`extract_text_from_image_pdf`](Self::extract_text_from_image_pdf) written to `output` as UTF-8.
    pub fn extract_text_to_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        let text = self.extract_text_from_image_pdf(input, cancel, progress)?;
        prepare_output_path(output)?;

        cancel.check()?;
        fs::write(output, text).map_err(|e| ConversionError::from_write(output, &e))
    }

    /// Saves a decrypted copy of a password-protected PDF.
    pub fn remove_pdf_password(&self, input: &Path, output: &Path, password: &str) -> Result<()> {
        ensure_input(input)?;
        if resolve(input) == resolve(output) {
            return Err(ConversionError::Input(
                "the output must not overwrite the input; choose another location".to_string(),
            ));
        }

        let encrypted = self
            .backend
            .is_encrypted(input)
            .map_err(|e| ConversionError::PasswordRemoval(e.to_string()))?;
        if !encrypted {
            return Err(ConversionError::PasswordRemoval(
                "the PDF is not password protected".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(ConversionError::PasswordRemoval("enter the password".to_string()));
        }

        let document = self.backend.open(input, Some(password)).map_err(|e| match e {
            PdfError::InvalidPassword => ConversionError::PasswordRemoval("incorrect password".to_string()),
            other => ConversionError::PasswordRemoval(other.to_string()),
        })?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ConversionError::PasswordRemoval(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let bytes = document
            .to_unencrypted_bytes()
            .map_err(|e| ConversionError::PasswordRemoval(format!("failed to save the PDF: {}", e)))?;
        fs::write(output, bytes)
            .map_err(|e| ConversionError::PasswordRemoval(format!("failed to save the PDF: {}", e)))
    }

    fn chunk_size(&self) -> usize {
        self.dispatcher.workers().max(1)
    }

    fn ensure_recognizer(&self) -> Result<()> {
        if self.dispatcher.recognizer().is_available() {
            Ok(())
        } else {
            Err(ConversionError::Configuration(
                "tesseract was not found; install it or set TESSERACT_CMD".to_string(),
            ))
        }
    }

    fn create_output(&self, font: &Path) -> Result<Box<dyn OutputDocument + '_>> {
        self.backend.create(font).map_err(|e| match e {
            PdfError::Font { .. } => ConversionError::Configuration(e.to_string()),
            other => ConversionError::Unexpected(other.to_string()),
        })
    }
}

fn ensure_input(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::Input(format!("input file not found: {}", path.display())))
    }
}

/// Creates missing parent directories and rejects directory targets.
pub fn prepare_output_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| ConversionError::from_write(parent, &e))?;
        }
    }
    if path.is_dir() {
        return Err(ConversionError::Input(format!(
            "output path is a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Largest width and largest height over all images, after EXIF orientation.
pub fn determine_canvas_size(paths: &[PathBuf]) -> Result<(u32, u32)> {
    let (width, height) = paths.iter().try_fold((0u32, 0u32), |(w, h), path| {
        let image = open_image(path)?;
        Ok::<_, ConversionError>((w.max(image.width()), h.max(image.height())))
    })?;

    if width == 0 || height == 0 {
        return Err(ConversionError::Input("could not determine a valid image size".to_string()));
    }
    Ok((width, height))
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    load_oriented(path).map_err(|e| {
        ConversionError::Input(format!(
            "cannot read image {} ({}); use JPEG, PNG, TIFF or BMP files",
            path.display(),
            e
        ))
    })
}

fn rasterize(source: &dyn SourceDocument, index: usize) -> Result<DynamicImage> {
    source
        .rasterize(index, PDF_RENDER_DPI)
        .map_err(ConversionError::document_read)
}

fn add_page(target: &mut dyn OutputDocument, page: &ComposedPage<'_>, index: usize) -> Result<()> {
    target
        .add_page(page)
        .map(|_skipped| ())
        .map_err(|e| ConversionError::Unexpected(format!("page {}: {}", index + 1, e)))
}

fn save(target: &dyn OutputDocument, output: &Path) -> Result<()> {
    let bytes = target.to_bytes().map_err(|e| ConversionError::Save {
        path: output.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(output, bytes).map_err(|e| ConversionError::from_write(output, &e))?;
    tracing::info!("wrote {}", output.display());
    Ok(())
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}
