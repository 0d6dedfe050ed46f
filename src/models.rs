//! Core data models used throughout the context daemon.
//!
//! These types describe the items that flow from the source readers through
//! the aggregator and ranker into the HTTP response envelope. None of them
//! are persisted: every request builds them from scratch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a [`ContextItem`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Timestamped work-log entries.
    Log,
    /// Reference documents (Markdown, plain text).
    Document,
    /// Annotations found in source code (`TODO`, `FIXME`, ...).
    Code,
    /// Free-form memory notes kept in the state directory.
    Memory,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Log => "log",
            SourceKind::Document => "document",
            SourceKind::Code => "code",
            SourceKind::Memory => "memory",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discoverable fact about the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: SourceKind,
    /// Free-form subtype (`"entry"`, `"doc"`, `"todo"`, `"note"`, ...).
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub content: String,
    /// Originating file, for provenance only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// ISO-8601 timestamp; only log items carry one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<String>,
    /// Score assigned by the ranker for the current request. `None` in browse mode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevance: Option<f64>,
}

impl ContextItem {
    pub fn new(
        source: SourceKind,
        item_type: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source,
            item_type: item_type.into(),
            title: title.into(),
            content: content.into(),
            path: None,
            timestamp: None,
            relevance: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Which source kinds contributed at least one item to a corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePresence {
    pub log: bool,
    pub document: bool,
    pub code: bool,
    pub memory: bool,
}

impl SourcePresence {
    /// Marks every kind that appears in `items`.
    pub fn from_items(items: &[ContextItem]) -> Self {
        let mut presence = Self::default();
        for item in items {
            presence.mark(item.source);
        }
        presence
    }

    pub fn mark(&mut self, kind: SourceKind) {
        match kind {
            SourceKind::Log => self.log = true,
            SourceKind::Document => self.document = true,
            SourceKind::Code => self.code = true,
            SourceKind::Memory => self.memory = true,
        }
    }
}

/// The response envelope for one context request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedContext {
    pub items: Vec<ContextItem>,
    pub sources: SourcePresence,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_without_unset_fields() {
        let item = ContextItem::new(SourceKind::Document, "doc", "Readme", "hello");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["source"], "document");
        assert_eq!(json["type"], "doc");
        assert!(json.get("relevance").is_none());
        assert!(json.get("timestamp").is_none());
        assert!(json.get("path").is_none());
    }

    #[test]
    fn presence_tracks_kinds() {
        let items = vec![
            ContextItem::new(SourceKind::Log, "entry", "a", "b"),
            ContextItem::new(SourceKind::Code, "todo", "c", "d"),
        ];
        let presence = SourcePresence::from_items(&items);
        assert!(presence.log);
        assert!(presence.code);
        assert!(!presence.document);
        assert!(!presence.memory);
    }

    #[test]
    fn envelope_uses_camel_case() {
        let ctx = UnifiedContext {
            items: vec![],
            sources: SourcePresence::default(),
            query: None,
            task_type: Some("review".into()),
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["taskType"], "review");
        assert!(json.get("query").is_none());
    }
}
