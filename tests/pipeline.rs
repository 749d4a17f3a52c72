//! End-to-end conversions against in-memory stand-ins for PDFium and tesseract.
//!
//! The fake backend reads a tiny text format instead of real PDFs:
//!
//! ```text
//! FAKEPDF
//! password=secret        (optional, needed to open)
//! owner=secret           (optional, permissions only; opens without one)
//! Page 1|Page 2|Page 3   (page labels, absent or empty for no pages)
//! ```
//!
//! Each label is rasterized as ASCII bytes in the first pixel row so the fake
//! recognizer can read it back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use kaidoku::pdf::{ComposedPage, OutputDocument, PdfBackend, PdfError, SourceDocument};
use kaidoku::{
    CancelToken, ConversionError, DispatchSettings, DocumentAssembler, EngineError, FontLocator,
    FontSettings, OcrSettings, ParallelDispatcher, Progress, Recognizer, WordBox,
};
use tempfile::TempDir;

const LABEL_HEIGHT: u32 = 4;

struct FakeDoc {
    password: Option<String>,
    owner: Option<String>,
    pages: Vec<String>,
}

impl FakeDoc {
    fn is_encrypted(&self) -> bool {
        self.password.is_some() || self.owner.is_some()
    }

    fn accepts(&self, given: &str) -> bool {
        self.password.as_deref() == Some(given) || self.owner.as_deref() == Some(given)
    }
}

fn parse_fake(path: &Path) -> Result<FakeDoc, PdfError> {
    let content = fs::read_to_string(path).map_err(|e| PdfError::Load(e.to_string()))?;
    let mut lines = content.lines();
    if lines.next() != Some("FAKEPDF") {
        return Err(PdfError::Load("not a PDF".to_string()));
    }
    let mut password = None;
    let mut owner = None;
    let mut pages = Vec::new();
    for line in lines {
        if let Some(pw) = line.strip_prefix("password=") {
            password = Some(pw.to_string());
        } else if let Some(pw) = line.strip_prefix("owner=") {
            owner = Some(pw.to_string());
        } else if !line.is_empty() {
            pages = line.split('|').map(str::to_string).collect();
        }
    }
    Ok(FakeDoc { password, owner, pages })
}

fn render_label(label: &str) -> DynamicImage {
    let width = (label.len() as u32).max(1) + 1;
    let mut img = RgbImage::from_pixel(width, LABEL_HEIGHT, Rgb([255, 255, 255]));
    for (x, byte) in label.bytes().enumerate() {
        img.put_pixel(x as u32, 0, Rgb([byte, 0, 0]));
    }
    img.put_pixel(label.len() as u32, 0, Rgb([0, 0, 0]));
    DynamicImage::ImageRgb8(img)
}

fn read_label(image: &DynamicImage) -> Option<String> {
    let rgb = image.to_rgb8();
    let bytes: Vec<u8> = (0..rgb.width())
        .map(|x| rgb.get_pixel(x, 0))
        .take_while(|px| px[0] != 0)
        .map(|px| px[0])
        .collect();
    let all_zero_tail = rgb.width() as usize > bytes.len() && rgb.get_pixel(bytes.len() as u32, 0)[0] == 0;
    let printable = bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ');
    (all_zero_tail && printable && !bytes.is_empty())
        .then(|| String::from_utf8(bytes).ok())
        .flatten()
}

#[derive(Debug, Clone, PartialEq)]
struct WrittenPage {
    width_pt: f32,
    height_pt: f32,
    words: Vec<String>,
}

struct FakeBackend;

struct FakeSource {
    doc: FakeDoc,
}

struct FakeOutput {
    pages: Vec<WrittenPage>,
}

impl PdfBackend for FakeBackend {
    fn open<'a>(&'a self, path: &Path, password: Option<&'a str>) -> Result<Box<dyn SourceDocument + 'a>, PdfError> {
        let doc = parse_fake(path)?;
        match password {
            None if doc.password.is_some() => return Err(PdfError::PasswordRequired),
            Some(given) if doc.is_encrypted() && !doc.accepts(given) => return Err(PdfError::InvalidPassword),
            _ => {}
        }
        Ok(Box::new(FakeSource { doc }))
    }

    fn create<'a>(&'a self, font: &Path) -> Result<Box<dyn OutputDocument + 'a>, PdfError> {
        if !font.is_file() {
            return Err(PdfError::Font {
                path: font.to_path_buf(),
                message: "missing".to_string(),
            });
        }
        Ok(Box::new(FakeOutput { pages: Vec::new() }))
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool, PdfError> {
        Ok(parse_fake(path)?.is_encrypted())
    }
}

impl SourceDocument for FakeSource {
    fn page_count(&self) -> usize {
        self.doc.pages.len()
    }

    fn page_size(&self, _index: usize) -> Result<(f32, f32), PdfError> {
        Ok((595.0, 842.0))
    }

    fn rasterize(&self, index: usize, _dpi: f32) -> Result<DynamicImage, PdfError> {
        self.doc
            .pages
            .get(index)
            .map(|label| render_label(label))
            .ok_or(PdfError::Render {
                page: index + 1,
                message: "out of range".to_string(),
            })
    }

    fn to_unencrypted_bytes(&self) -> Result<Vec<u8>, PdfError> {
        Ok(format!("FAKEPDF\n{}\n", self.doc.pages.join("|")).into_bytes())
    }
}

impl OutputDocument for FakeOutput {
    fn add_page(&mut self, page: &ComposedPage<'_>) -> Result<usize, PdfError> {
        self.pages.push(WrittenPage {
            width_pt: page.width_pt,
            height_pt: page.height_pt,
            words: page.words.iter().map(|w| w.text.clone()).collect(),
        });
        Ok(0)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PdfError> {
        let mut out = format!("FAKEOUT {}\n", self.pages.len());
        for page in &self.pages {
            out.push_str(&format!("{}x{} {}\n", page.width_pt, page.height_pt, page.words.join(",")));
        }
        Ok(out.into_bytes())
    }
}

/// Reads labels back as one word per space-separated token, confidence 95.
struct LabelReader {
    available: bool,
    calls: AtomicUsize,
}

impl LabelReader {
    fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Recognizer for LabelReader {
    fn is_available(&self) -> bool {
        self.available
    }

    fn recognize(&self, image: &DynamicImage, _config: &str) -> Result<Vec<WordBox>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let label = read_label(image).unwrap_or_else(|| "image".to_string());
        Ok(label
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| {
                WordBox::new(word, 95.0, [i as f64 * 10.0, 0.0, 8.0, 4.0]).at(1, 1, 1, i as u32 + 1)
            })
            .collect())
    }
}

struct Fixture {
    dir: TempDir,
    font: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("NotoSansCJK-Regular.ttc");
        fs::write(&font, b"font").unwrap();
        Self { dir, font }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn fake_pdf(&self, name: &str, password: Option<&str>, pages: &[&str]) -> PathBuf {
        let path = self.path(name);
        let mut content = String::from("FAKEPDF\n");
        if let Some(pw) = password {
            content.push_str(&format!("password={}\n", pw));
        }
        content.push_str(&pages.join("|"));
        content.push('\n');
        fs::write(&path, content).unwrap();
        path
    }

    fn assembler(&self, recognizer: Arc<LabelReader>, workers: usize) -> DocumentAssembler<FakeBackend> {
        let dispatcher = ParallelDispatcher::new(
            recognizer,
            &OcrSettings::default(),
            &DispatchSettings {
                workers,
                parallel: false,
            },
        );
        let fonts = FontLocator::new(FontSettings {
            font_path: Some(self.font.clone()),
            font_dirs: vec![],
        });
        DocumentAssembler::new(FakeBackend, dispatcher, fonts)
    }
}

#[test]
fn test_extracts_pages_in_order_across_chunks() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("three.pdf", None, &["Page 1", "Page 2", "Page 3"]);
    let assembler = fx.assembler(LabelReader::new(true), 2);

    let text = assembler
        .extract_text_from_image_pdf(&input, &CancelToken::new(), None)
        .unwrap();

    assert_eq!(
        text,
        "--- page 1 ---\nPage 1\n\n--- page 2 ---\nPage 2\n\n--- page 3 ---\nPage 3\n"
    );
}

#[test]
fn test_searchable_pdf_keeps_page_geometry_and_words() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("scan.pdf", None, &["Page 1", "Page 2", "Page 3"]);
    let output = fx.path("nested/dir/out.pdf");
    let assembler = fx.assembler(LabelReader::new(true), 2);

    let mut events = Vec::new();
    let mut record = |event: &Progress| events.push(event.clone());
    assembler
        .create_searchable_pdf(&input, &output, &CancelToken::new(), Some(&mut record))
        .unwrap();

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(
        written,
        "FAKEOUT 3\n595x842 Page,1\n595x842 Page,2\n595x842 Page,3\n"
    );

    let completed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Progress::Advanced { completed, total: 3, .. } => Some(*completed),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![1, 2, 3]);
}

#[test]
fn test_empty_document() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("empty.pdf", None, &[]);
    let output = fx.path("empty.out.pdf");
    let assembler = fx.assembler(LabelReader::new(true), 2);

    let mut notices = Vec::new();
    let mut record = |event: &Progress| notices.push(event.to_string());
    assembler
        .create_searchable_pdf(&input, &output, &CancelToken::new(), Some(&mut record))
        .unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "FAKEOUT 0\n");
    assert_eq!(notices.len(), 1);

    let text = assembler
        .extract_text_from_image_pdf(&input, &CancelToken::new(), None)
        .unwrap();
    assert_eq!(text, "\n");
}

#[test]
fn test_cancelled_conversions_write_nothing() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("scan.pdf", None, &["Page 1", "Page 2"]);
    let empty = fx.fake_pdf("empty.pdf", None, &[]);
    let image = fx.path("page.png");
    RgbImage::new(10, 10).save(&image).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let assembler = fx.assembler(LabelReader::new(true), 2);

    let pdf_out = fx.path("out.pdf");
    let err = assembler.create_searchable_pdf(&input, &pdf_out, &cancel, None).unwrap_err();
    assert!(err.is_cancelled());
    let err = assembler.create_searchable_pdf(&empty, &pdf_out, &cancel, None).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!pdf_out.exists());

    let img_out = fx.path("images.pdf");
    let err = assembler
        .create_searchable_pdf_from_images(&[image], &img_out, &cancel, None)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!img_out.exists());

    let txt_out = fx.path("out.txt");
    let err = assembler.extract_text_to_file(&input, &txt_out, &cancel, None).unwrap_err();
    assert!(err.is_cancelled());
    let err = assembler.extract_text_to_file(&empty, &txt_out, &cancel, None).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!txt_out.exists());
}

#[test]
fn test_cancellation_during_ocr_prevents_text_write() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("scan.pdf", None, &["Page 1"]);
    let output = fx.path("out.txt");
    let assembler = fx.assembler(LabelReader::new(true), 4);

    let cancel = CancelToken::new();
    let mut cancel_on_progress = |_: &Progress| cancel.cancel();
    let err = assembler
        .extract_text_to_file(&input, &output, &cancel, Some(&mut cancel_on_progress))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!output.exists());
}

#[test]
fn test_extract_text_to_file_writes_utf8() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("scan.pdf", None, &["Page 1", "Page 2"]);
    let output = fx.path("text/out.txt");
    let assembler = fx.assembler(LabelReader::new(true), 1);

    assembler
        .extract_text_to_file(&input, &output, &CancelToken::new(), None)
        .unwrap();
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "--- page 1 ---\nPage 1\n\n--- page 2 ---\nPage 2\n"
    );
}

#[test]
fn test_images_share_the_largest_canvas() {
    let fx = Fixture::new();
    let paths: Vec<PathBuf> = [(100, 200), (300, 150), (250, 400)]
        .iter()
        .enumerate()
        .map(|(i, &(w, h))| {
            let path = fx.path(&format!("img{}.png", i));
            RgbImage::from_pixel(w, h, Rgb([20, 20, 20])).save(&path).unwrap();
            path
        })
        .collect();
    let output = fx.path("album.pdf");
    let assembler = fx.assembler(LabelReader::new(true), 2);

    assembler
        .create_searchable_pdf_from_images(&paths, &output, &CancelToken::new(), None)
        .unwrap();

    // 300x400 px at 300 dpi is 72x96 pt.
    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, "FAKEOUT 3\n72x96 image\n72x96 image\n72x96 image\n");
}

#[test]
fn test_image_input_validation() {
    let fx = Fixture::new();
    let image = fx.path("page.png");
    RgbImage::new(4, 4).save(&image).unwrap();
    let assembler = fx.assembler(LabelReader::new(true), 2);
    let cancel = CancelToken::new();

    let err = assembler
        .create_searchable_pdf_from_images(&[], &fx.path("out.pdf"), &cancel, None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Input(_)));

    let err = assembler
        .create_searchable_pdf_from_images(&[fx.path("missing.png")], &fx.path("out.pdf"), &cancel, None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Input(_)));

    let err = assembler
        .create_searchable_pdf_from_images(&[image], &fx.path("out.png"), &cancel, None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Input(_)));
}

#[test]
fn test_missing_recognizer_is_a_configuration_error() {
    let fx = Fixture::new();
    let input = fx.fake_pdf("scan.pdf", None, &["Page 1"]);
    let output = fx.path("out.pdf");
    let recognizer = LabelReader::new(false);
    let assembler = fx.assembler(recognizer.clone(), 2);

    let err = assembler
        .create_searchable_pdf(&input, &output, &CancelToken::new(), None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Configuration(_)));
    assert!(!output.exists());
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_input_and_unreadable_pdf() {
    let fx = Fixture::new();
    let assembler = fx.assembler(LabelReader::new(true), 2);
    let cancel = CancelToken::new();

    let err = assembler
        .create_searchable_pdf(&fx.path("nope.pdf"), &fx.path("out.pdf"), &cancel, None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Input(_)));

    let garbage = fx.path("garbage.pdf");
    fs::write(&garbage, b"hello").unwrap();
    let err = assembler
        .extract_text_from_image_pdf(&garbage, &cancel, None)
        .unwrap_err();
    assert!(matches!(err, ConversionError::DocumentRead { .. }));
}

#[test]
fn test_password_removal() {
    let fx = Fixture::new();
    let locked = fx.fake_pdf("locked.pdf", Some("secret"), &["Page 1", "Page 2"]);
    let plain = fx.fake_pdf("plain.pdf", None, &["Page 1"]);
    let output = fx.path("unlocked/out.pdf");
    let assembler = fx.assembler(LabelReader::new(true), 2);

    let err = assembler.remove_pdf_password(&locked, &locked, "secret").unwrap_err();
    assert!(matches!(err, ConversionError::Input(_)));

    let err = assembler.remove_pdf_password(&plain, &output, "secret").unwrap_err();
    assert!(matches!(err, ConversionError::PasswordRemoval(_)));

    let err = assembler.remove_pdf_password(&locked, &output, "").unwrap_err();
    assert!(matches!(err, ConversionError::PasswordRemoval(_)));

    let err = assembler.remove_pdf_password(&locked, &output, "wrong").unwrap_err();
    assert!(err.to_string().contains("incorrect password"));
    assert!(!output.exists());

    assembler.remove_pdf_password(&locked, &output, "secret").unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "FAKEPDF\nPage 1|Page 2\n");

    // The unlocked copy opens without a password.
    let text = assembler
        .extract_text_from_image_pdf(&output, &CancelToken::new(), None)
        .unwrap();
    assert!(text.contains("--- page 2 ---\nPage 2"));
}

#[test]
fn test_password_removal_for_permissions_only_pdf() {
    let fx = Fixture::new();
    let restricted = fx.path("restricted.pdf");
    fs::write(&restricted, "FAKEPDF\nowner=boss\nPage 1\n").unwrap();
    let output = fx.path("restricted.unlocked.pdf");
    let assembler = fx.assembler(LabelReader::new(true), 2);

    // Opens without a password, yet still counts as protected.
    let text = assembler
        .extract_text_from_image_pdf(&restricted, &CancelToken::new(), None)
        .unwrap();
    assert_eq!(text, "--- page 1 ---\nPage 1\n");

    let err = assembler.remove_pdf_password(&restricted, &output, "guess").unwrap_err();
    assert!(err.to_string().contains("incorrect password"));
    assert!(!output.exists());

    assembler.remove_pdf_password(&restricted, &output, "boss").unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "FAKEPDF\nPage 1\n");
    let err = assembler.remove_pdf_password(&output, &fx.path("again.pdf"), "boss").unwrap_err();
    assert!(matches!(err, ConversionError::PasswordRemoval(_)));
}
