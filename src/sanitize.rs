//! Whitelisting of externally supplied Tesseract options.
//!
//! The sanitized string is split on whitespace and handed to the engine as
//! process arguments, so every token that survives must be a known flag or a
//! plain value.

use std::collections::HashSet;

const SHELL_META_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '<', '>', '!', '\\', '"', '\'', '\n', '\r',
];

const ALLOWED_FLAGS: &[&str] = &["--oem", "--psm", "--dpi", "-l", "--tessdata-dir"];

fn has_shell_meta(token: &str) -> bool {
    token.contains(SHELL_META_CHARS)
}

/// Keeps whitelisted flags (and their plain values) in their original order.
pub fn sanitize(raw: &str) -> String {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(tokens.len());

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if has_shell_meta(token) {
            i += 1;
            continue;
        }
        if ALLOWED_FLAGS.contains(&token) {
            kept.push(token);
            if let Some(value) = tokens.get(i + 1) {
                if !value.starts_with('-') {
                    if !has_shell_meta(value) {
                        kept.push(value);
                    }
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }

    kept.join(" ")
}

/// Ordered, deduplicated configuration strings tried for every image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfiguration {
    candidates: Vec<String>,
}

impl EngineConfiguration {
    /// One candidate per page-segmentation mode, each prefixed with the
    /// sanitized base configuration. An empty mode list falls back to PSM 6.
    pub fn build(base_config: &str, psm_candidates: &[u32]) -> Self {
        let base = sanitize(base_config);
        let psms: &[u32] = if psm_candidates.is_empty() {
            &[6]
        } else {
            psm_candidates
        };

        let mut seen = HashSet::new();
        let candidates = psms
            .iter()
            .map(|psm| format!("{} --psm {}", base, psm).trim().to_string())
            .filter(|config| seen.insert(config.clone()))
            .collect();

        Self { candidates }
    }

    pub fn from_candidates(candidates: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        Self {
            candidates: candidates
                .into_iter()
                .filter(|config| seen.insert(config.clone()))
                .collect(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
