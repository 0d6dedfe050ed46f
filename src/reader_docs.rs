//! Reference-document reader.
//!
//! Every file under the configured document directories that matches the
//! include globs becomes one item. The title is the first Markdown `# `
//! heading, falling back to the file name; the body is truncated to a fixed
//! number of characters to bound corpus size.

use std::path::{Path, PathBuf};

use crate::models::{ContextItem, SourceKind};
use crate::scan::{first_heading, scan_files, truncate_chars};
use crate::traits::SourceReader;

pub struct DocumentReader {
    dirs: Vec<PathBuf>,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    char_limit: usize,
}

impl DocumentReader {
    pub fn new(
        dirs: Vec<PathBuf>,
        include_globs: Vec<String>,
        exclude_globs: Vec<String>,
        char_limit: usize,
    ) -> Self {
        Self {
            dirs,
            include_globs,
            exclude_globs,
            char_limit,
        }
    }
}

impl SourceReader for DocumentReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Document
    }

    fn read(&self, root: &Path, limit: usize) -> Vec<ContextItem> {
        let files = match scan_files(root, &self.dirs, &self.include_globs, &self.exclude_globs) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "document scan failed");
                return Vec::new();
            }
        };

        let mut items = Vec::new();
        for file in files {
            if items.len() >= limit {
                break;
            }
            let body = match std::fs::read_to_string(&file.path) {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(path = %file.display, error = %e, "skipping unreadable document");
                    continue;
                }
            };

            let title = first_heading(&body).unwrap_or_else(|| {
                file.path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.display.clone())
            });

            items.push(
                ContextItem::new(
                    SourceKind::Document,
                    "doc",
                    title,
                    truncate_chars(&body, self.char_limit),
                )
                .with_path(file.display),
            );
        }
        items
    }
}
