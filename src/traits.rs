//! The source reader seam.
//!
//! A [`SourceReader`] turns some corner of the project's filesystem into
//! [`ContextItem`]s. Readers are deliberately simple: given the project root
//! and a cap, return at most `limit` items, and return an empty list (never
//! an error) when their directories do not exist.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  ReaderSet                   │
//! │  ┌──────┐ ┌──────────┐ ┌──────┐ ┌────────┐   │
//! │  │ log  │ │ document │ │ code │ │ memory │   │
//! │  └──────┘ └──────────┘ └──────┘ └────────┘   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!              context::aggregate() → ranking
//! ```
//!
//! # Example
//!
//! ```rust
//! use context_daemon::models::{ContextItem, SourceKind};
//! use context_daemon::traits::SourceReader;
//! use std::path::Path;
//!
//! struct Fixed;
//!
//! impl SourceReader for Fixed {
//!     fn kind(&self) -> SourceKind { SourceKind::Memory }
//!     fn read(&self, _root: &Path, limit: usize) -> Vec<ContextItem> {
//!         vec![ContextItem::new(SourceKind::Memory, "note", "pinned", "remember this")]
//!             .into_iter()
//!             .take(limit)
//!             .collect()
//!     }
//! }
//! ```

use std::path::Path;

use crate::config::SourcesConfig;
use crate::models::{ContextItem, SourceKind};
use crate::reader_code::CodeAnnotationReader;
use crate::reader_docs::DocumentReader;
use crate::reader_log::LogReader;
use crate::reader_memory::MemoryReader;

/// Produces context items for one [`SourceKind`].
pub trait SourceReader: Send + Sync {
    /// The kind every returned item is tagged with.
    fn kind(&self) -> SourceKind;

    /// Reads at most `limit` items for the project at `root`.
    ///
    /// Missing directories yield an empty list.
    fn read(&self, root: &Path, limit: usize) -> Vec<ContextItem>;
}

/// An ordered collection of readers, each paired with its item cap.
///
/// Order matters: it is the corpus order, which decides ties in ranking
/// and the order of results in browse mode.
pub struct ReaderSet {
    readers: Vec<(Box<dyn SourceReader>, usize)>,
}

impl ReaderSet {
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    /// The built-in readers in their fixed order: log, document, code, memory.
    pub fn from_config(sources: &SourcesConfig) -> Self {
        let mut set = Self::new();
        set.register(
            Box::new(LogReader::new(sources.log_dirs.clone())),
            sources.max_log_items,
        );
        set.register(
            Box::new(DocumentReader::new(
                sources.doc_dirs.clone(),
                sources.doc_globs.clone(),
                sources.exclude_globs.clone(),
                sources.doc_char_limit,
            )),
            sources.max_doc_items,
        );
        set.register(
            Box::new(CodeAnnotationReader::new(
                sources.code_dirs.clone(),
                sources.code_globs.clone(),
                sources.exclude_globs.clone(),
            )),
            sources.max_code_items,
        );
        set.register(
            Box::new(MemoryReader::new(sources.memory_dir.clone())),
            sources.max_memory_items,
        );
        set
    }

    /// Appends a reader; it runs after every reader registered before it.
    pub fn register(&mut self, reader: Box<dyn SourceReader>, limit: usize) {
        self.readers.push((reader, limit));
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&dyn SourceReader, usize)> {
        self.readers.iter().map(|(r, limit)| (r.as_ref(), *limit))
    }
}

impl Default for ReaderSet {
    fn default() -> Self {
        Self::new()
    }
}
