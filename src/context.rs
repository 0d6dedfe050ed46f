//! Context aggregation: run every reader, build one corpus, optionally rank.
//!
//! This is the single entry point that the HTTP gateway and the one-shot
//! `ctxd search` command delegate to. It holds no state; each call re-reads
//! the filesystem.

use std::path::Path;

use crate::models::{ContextItem, SourcePresence, UnifiedContext};
use crate::ranking;
use crate::traits::ReaderSet;

/// Inputs for one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    /// Search query; blank or absent means browse mode.
    pub query: Option<String>,
    /// Caller-supplied task label, echoed back in the envelope.
    pub task_type: Option<String>,
    /// Truncate the final list to this many items.
    pub max_items: Option<usize>,
}

impl ContextRequest {
    pub fn browse() -> Self {
        Self::default()
    }

    pub fn search(query: impl Into<String>, max_items: usize) -> Self {
        Self {
            query: Some(query.into()),
            task_type: None,
            max_items: Some(max_items),
        }
    }

    fn effective_query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }
}

/// Calls every reader in order and concatenates their output.
///
/// Each item is tagged with the kind of the reader that produced it.
pub fn gather(root: &Path, readers: &ReaderSet) -> Vec<ContextItem> {
    let mut corpus = Vec::new();
    for (reader, limit) in readers.iter() {
        let kind = reader.kind();
        let mut items = reader.read(root, limit);
        items.truncate(limit);
        tracing::debug!(source = %kind, count = items.len(), "source read");
        for mut item in items {
            item.source = kind;
            corpus.push(item);
        }
    }
    corpus
}

/// Builds the [`UnifiedContext`] for `request`.
///
/// Source presence reflects the raw corpus, before ranking filters anything,
/// so callers can tell an empty source from a query that matched nothing.
pub fn aggregate(root: &Path, readers: &ReaderSet, request: &ContextRequest) -> UnifiedContext {
    let corpus = gather(root, readers);
    let sources = SourcePresence::from_items(&corpus);

    let mut items = match request.effective_query() {
        Some(query) => ranking::rank(corpus, query),
        None => corpus,
    };

    if let Some(max) = request.max_items {
        items.truncate(max);
    }

    UnifiedContext {
        items,
        sources,
        query: request.query.clone(),
        task_type: request.task_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::models::SourceKind;
    use crate::traits::SourceReader;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixed(SourceKind, Vec<(&'static str, &'static str)>);

    impl SourceReader for Fixed {
        fn kind(&self) -> SourceKind {
            self.0
        }
        fn read(&self, _root: &Path, _limit: usize) -> Vec<ContextItem> {
            // Ignores the limit on purpose; the aggregator must still cap.
            self.1
                .iter()
                .map(|(t, c)| ContextItem::new(SourceKind::Memory, "x", *t, *c))
                .collect()
        }
    }

    fn fixture() -> ReaderSet {
        let mut set = ReaderSet::new();
        set.register(
            Box::new(Fixed(SourceKind::Log, vec![("log one", "deploy failed"), ("log two", "fine")])),
            10,
        );
        set.register(Box::new(Fixed(SourceKind::Document, vec![])), 10);
        set.register(
            Box::new(Fixed(SourceKind::Code, vec![("TODO a", "deploy retry"), ("TODO b", "other"), ("TODO c", "more")])),
            2,
        );
        set
    }

    #[test]
    fn browse_concatenates_in_reader_order() {
        let tmp = TempDir::new().unwrap();
        let ctx = aggregate(tmp.path(), &fixture(), &ContextRequest::browse());
        let titles: Vec<_> = ctx.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["log one", "log two", "TODO a", "TODO b"]);
        assert!(ctx.items.iter().all(|i| i.relevance.is_none()));
        assert_eq!(ctx.items[0].source, SourceKind::Log);
        assert_eq!(ctx.items[2].source, SourceKind::Code);
    }

    #[test]
    fn presence_reflects_raw_corpus() {
        let tmp = TempDir::new().unwrap();
        let ctx = aggregate(tmp.path(), &fixture(), &ContextRequest::search("nothingmatches", 20));
        assert!(ctx.items.is_empty());
        assert!(ctx.sources.log);
        assert!(ctx.sources.code);
        assert!(!ctx.sources.document);
    }

    #[test]
    fn query_ranks_and_truncates() {
        let tmp = TempDir::new().unwrap();
        let ctx = aggregate(tmp.path(), &fixture(), &ContextRequest::search("deploy", 1));
        assert_eq!(ctx.items.len(), 1);
        assert!(ctx.items[0].relevance.unwrap() > 0.0);
        assert_eq!(ctx.query.as_deref(), Some("deploy"));
    }

    #[test]
    fn blank_query_is_browse_mode() {
        let tmp = TempDir::new().unwrap();
        let request = ContextRequest {
            query: Some("  ".into()),
            task_type: Some("debug".into()),
            max_items: None,
        };
        let ctx = aggregate(tmp.path(), &fixture(), &request);
        assert_eq!(ctx.items.len(), 4);
        assert_eq!(ctx.task_type.as_deref(), Some("debug"));
    }

    #[test]
    fn default_readers_respect_log_cap() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir_all(&logs).unwrap();
        let body: String = (0..1000)
            .map(|i| format!("{{\"timestamp\":\"2026-01-01T00:00:00Z\",\"title\":\"entry {i}\"}}\n"))
            .collect();
        fs::write(logs.join("big.jsonl"), body).unwrap();

        let sources = SourcesConfig {
            log_dirs: vec![PathBuf::from("logs")],
            max_log_items: 20,
            ..SourcesConfig::default()
        };
        let ctx = aggregate(tmp.path(), &ReaderSet::from_config(&sources), &ContextRequest::browse());
        let logs = ctx.items.iter().filter(|i| i.source == SourceKind::Log).count();
        assert_eq!(logs, 20);
        assert_eq!(ctx.items.len(), 20);
    }
}
