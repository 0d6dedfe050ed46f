//! Memory-note reader: one item per Markdown or text note in the memory
//! directory (`.ctxd/memory` by default).

use std::path::{Path, PathBuf};

use crate::models::{ContextItem, SourceKind};
use crate::scan::{first_heading, scan_files, truncate_chars};
use crate::traits::SourceReader;

const NOTE_CHAR_LIMIT: usize = 2000;

pub struct MemoryReader {
    dir: PathBuf,
}

impl MemoryReader {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl SourceReader for MemoryReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    fn read(&self, root: &Path, limit: usize) -> Vec<ContextItem> {
        let include = ["**/*.md".to_string(), "**/*.txt".to_string()];
        let files = scan_files(root, std::slice::from_ref(&self.dir), &include, &[])
            .unwrap_or_default();

        files
            .into_iter()
            .filter_map(|file| {
                let body = std::fs::read_to_string(&file.path).ok()?;
                let title = first_heading(&body).unwrap_or_else(|| {
                    file.path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default()
                });
                Some(
                    ContextItem::new(
                        SourceKind::Memory,
                        "note",
                        title,
                        truncate_chars(body.trim(), NOTE_CHAR_LIMIT),
                    )
                    .with_path(file.display),
                )
            })
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_notes() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".ctxd/memory");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("conventions.md"), "Prefer small PRs.").unwrap();

        let items = MemoryReader::new(PathBuf::from(".ctxd/memory")).read(tmp.path(), 10);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "conventions");
        assert_eq!(items[0].item_type, "note");
        assert_eq!(items[0].source, SourceKind::Memory);
    }
}
