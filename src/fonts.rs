//! Discovery of a CJK-capable font for the invisible text layer.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use walkdir::WalkDir;

use crate::config::FontSettings;
use crate::error::{ConversionError, Result};

const KNOWN_FONT_FILES: &[&str] = &[
    "NotoSansCJK-Regular.ttc",
    "NotoSansCJKjp-Regular.otf",
    "NotoSerifCJK-Regular.ttc",
    "SourceHanSansJP-Regular.otf",
    "SourceHanSerifJP-Regular.otf",
    "ipaexg.ttf",
    "ipaexm.ttf",
    "ipag.ttf",
    "ipam.ttf",
    "YuGothR.ttc",
    "YuMincho.ttc",
];

/// `(file name fragment, extension)` pairs tried recursively, in order.
const FONT_PATTERNS: &[(&str, &str)] = &[
    ("NotoSansCJK", "ttc"),
    ("NotoSansCJK", "otf"),
    ("NotoSerifCJK", "ttc"),
    ("NotoSerifCJK", "otf"),
    ("SourceHanSans", "otf"),
    ("SourceHanSerif", "otf"),
    ("ipaex", "ttf"),
    ("ipaex", "otf"),
    ("ipag", "ttf"),
    ("ipag", "ttc"),
    ("ipam", "ttf"),
    ("ipam", "ttc"),
    ("YuGoth", "ttc"),
    ("YuMincho", "ttc"),
];

/// Finds a font file once per run and hands out the same path afterwards.
#[derive(Debug, Default)]
pub struct FontLocator {
    settings: FontSettings,
    cached: OnceCell<PathBuf>,
}

impl FontLocator {
    pub fn new(settings: FontSettings) -> Self {
        Self {
            settings,
            cached: OnceCell::new(),
        }
    }

    pub fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = self.cached.get() {
            if path.is_file() {
                return Ok(path.clone());
            }
            // The cached file disappeared mid-run; search again without caching.
            return self.search();
        }
        let path = self.search()?;
        tracing::debug!("Using font {}", path.display());
        Ok(self.cached.get_or_init(|| path).clone())
    }

    fn search(&self) -> Result<PathBuf> {
        if let Some(path) = self.settings.font_path.as_deref().map(expand_home) {
            if path.is_file() {
                return Ok(path);
            }
            tracing::warn!("Configured font {} does not exist, searching", path.display());
        }

        let directories = self.directories();

        for dir in &directories {
            for name in KNOWN_FONT_FILES {
                let path = dir.join(name);
                if path.is_file() {
                    return Ok(path);
                }
            }
        }

        for dir in directories.iter().filter(|dir| dir.is_dir()) {
            for (fragment, extension) in FONT_PATTERNS {
                if let Some(path) = find_matching(dir, fragment, extension) {
                    return Ok(path);
                }
            }
        }

        Err(ConversionError::Configuration(
            "no Japanese-capable font found; install Noto Sans CJK (or IPAex) or point OCR_JPN_FONT at a font file"
                .to_string(),
        ))
    }

    /// Search directories, configured ones first, without duplicates.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .settings
            .font_dirs
            .iter()
            .map(|dir| expand_home(dir))
            .filter(|dir| dir.is_dir())
            .collect();

        if let Some(home) = home_dir() {
            dirs.push(home.join(".fonts"));
            dirs.push(home.join(".local/share/fonts"));
        }
        dirs.extend(
            [
                "/usr/share/fonts",
                "/usr/local/share/fonts",
                "/Library/Fonts",
                "/System/Library/Fonts",
                "/System/Library/Fonts/Supplemental",
                "/Library/Application Support/Microsoft/Fonts",
            ]
            .iter()
            .map(PathBuf::from),
        );

        if let Some(exe_dir) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
            dirs.push(exe_dir.join("fonts"));
            dirs.push(exe_dir);
        }

        if cfg!(windows) {
            let windir = env::var_os("WINDIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("C:/Windows"));
            dirs.push(windir.join("Fonts"));
        }

        let mut seen = HashSet::new();
        dirs.into_iter()
            .map(|dir| dir.canonicalize().unwrap_or(dir))
            .filter(|dir| seen.insert(dir.clone()))
            .collect()
    }
}

fn find_matching(dir: &Path, fragment: &str, extension: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let name_matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.contains(fragment));
            name_matches && path.extension().and_then(|ext| ext.to_str()) == Some(extension)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
