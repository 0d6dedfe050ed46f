//! Source-code annotation reader.
//!
//! Scans source files for `TODO`, `FIXME`, `HACK`, `XXX`, and `NOTE`
//! markers and turns each one into an item whose type is the lower-cased
//! marker.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::models::{ContextItem, SourceKind};
use crate::scan::scan_files;
use crate::traits::SourceReader;

/// Files larger than this are skipped.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

fn annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(TODO|FIXME|HACK|XXX|NOTE)\b(?:\([^)]*\))?:?\s*(.*)$")
            .expect("annotation regex is valid")
    })
}

pub struct CodeAnnotationReader {
    dirs: Vec<PathBuf>,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
}

impl CodeAnnotationReader {
    pub fn new(dirs: Vec<PathBuf>, include_globs: Vec<String>, exclude_globs: Vec<String>) -> Self {
        Self {
            dirs,
            include_globs,
            exclude_globs,
        }
    }
}

impl SourceReader for CodeAnnotationReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Code
    }

    fn read(&self, root: &Path, limit: usize) -> Vec<ContextItem> {
        let files = match scan_files(root, &self.dirs, &self.include_globs, &self.exclude_globs) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "code scan failed");
                return Vec::new();
            }
        };

        let mut items = Vec::new();
        'files: for file in files {
            let too_big = std::fs::metadata(&file.path)
                .map(|m| m.len() > MAX_FILE_BYTES)
                .unwrap_or(true);
            if too_big {
                continue;
            }
            let Ok(body) = std::fs::read_to_string(&file.path) else {
                continue;
            };

            for (idx, line) in body.lines().enumerate() {
                if items.len() >= limit {
                    break 'files;
                }
                if let Some(item) = annotation_item(line, &file.display, idx + 1) {
                    items.push(item);
                }
            }
        }
        items
    }
}

fn annotation_item(line: &str, shown: &str, lineno: usize) -> Option<ContextItem> {
    let caps = annotation_regex().captures(line)?;
    let marker = caps.get(1)?.as_str();
    let text = caps
        .get(2)
        .map(|m| strip_comment_tail(m.as_str()))
        .unwrap_or_default();
    let content = if text.is_empty() {
        line.trim().to_string()
    } else {
        text
    };

    Some(
        ContextItem::new(
            SourceKind::Code,
            marker.to_lowercase(),
            format!("{marker} {shown}:{lineno}"),
            content,
        )
        .with_path(shown),
    )
}

fn strip_comment_tail(text: &str) -> String {
    text.trim()
        .trim_end_matches("*/")
        .trim_end_matches("-->")
        .trim()
        .to_string()
}
