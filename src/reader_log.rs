//! Work-log reader.
//!
//! Two on-disk shapes are understood, both found anywhere under the
//! configured log directories:
//!
//! - **JSON Lines** (`*.jsonl`): one entry per line,
//!   `{"timestamp": "...", "title": "...", "content": "..."}`. `message` is
//!   accepted in place of `content`, and `type` overrides the item type.
//! - **Markdown** (`*.md`): entries start at `## <timestamp> <title>`
//!   headings and run until the next `## ` heading.
//!
//! Entries come back newest first; entries without a parseable timestamp
//! sort after all timestamped ones.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{ContextItem, SourceKind};
use crate::ranking::parse_timestamp;
use crate::scan::{display_path, resolve_dir, truncate_chars};
use crate::traits::SourceReader;

const UNTITLED_PREVIEW_CHARS: usize = 80;

pub struct LogReader {
    dirs: Vec<PathBuf>,
}

impl LogReader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl SourceReader for LogReader {
    fn kind(&self) -> SourceKind {
        SourceKind::Log
    }

    fn read(&self, root: &Path, limit: usize) -> Vec<ContextItem> {
        let mut entries = Vec::new();

        for dir in &self.dirs {
            let base = resolve_dir(root, dir);
            if !base.is_dir() {
                continue;
            }

            let mut files: Vec<(PathBuf, LogFormat)> = WalkDir::new(&base)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| LogFormat::of(e.path()).map(|format| (e.into_path(), format)))
                .collect();
            files.sort();

            for (file, format) in files {
                let body = match std::fs::read_to_string(&file) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::debug!(path = %file.display(), error = %e, "skipping unreadable log file");
                        continue;
                    }
                };
                let shown = display_path(root, &file);
                match format {
                    LogFormat::Jsonl => entries.extend(parse_jsonl(&body, &shown)),
                    LogFormat::Markdown => entries.extend(parse_markdown(&body, &shown)),
                }
            }
        }

        // Newest first; stable so equal stamps keep file order.
        entries.sort_by(|a, b| {
            let ta = a.timestamp.as_deref().and_then(parse_timestamp);
            let tb = b.timestamp.as_deref().and_then(parse_timestamp);
            tb.cmp(&ta)
        });
        entries.truncate(limit);
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LogFormat {
    Jsonl,
    Markdown,
}

impl LogFormat {
    /// Decided from the extension alone, so other files are never read.
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") => Some(LogFormat::Jsonl),
            Some("md") => Some(LogFormat::Markdown),
            _ => None,
        }
    }
}

fn parse_jsonl(body: &str, shown: &str) -> Vec<ContextItem> {
    let mut items = Vec::new();
    for (lineno, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: LogLine = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(path = shown, line = lineno + 1, error = %e, "skipping malformed log line");
                continue;
            }
        };

        let content = entry.content.or(entry.message).unwrap_or_default();
        let title = entry
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| truncate_chars(content.trim(), UNTITLED_PREVIEW_CHARS));
        let mut item = ContextItem::new(
            SourceKind::Log,
            entry.kind.unwrap_or_else(|| "entry".to_string()),
            title,
            content,
        )
        .with_path(shown);
        if let Some(ts) = entry.timestamp {
            item = item.with_timestamp(ts);
        }
        items.push(item);
    }
    items
}

fn parse_markdown(body: &str, shown: &str) -> Vec<ContextItem> {
    let mut items = Vec::new();
    let mut current: Option<MarkdownEntry> = None;

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some(done) = current.take() {
                items.push(done.into_item(shown));
            }
            let (timestamp, title) = split_heading(heading.trim());
            current = Some(MarkdownEntry {
                timestamp,
                title,
                lines: Vec::new(),
            });
        } else if let Some(entry) = current.as_mut() {
            entry.lines.push(line);
        }
    }
    if let Some(done) = current {
        items.push(done.into_item(shown));
    }
    items
}

struct MarkdownEntry<'a> {
    timestamp: Option<String>,
    title: String,
    lines: Vec<&'a str>,
}

impl MarkdownEntry<'_> {
    fn into_item(self, shown: &str) -> ContextItem {
        let content = self.lines.join("\n").trim().to_string();
        let item = ContextItem::new(SourceKind::Log, "entry", self.title, content).with_path(shown);
        match self.timestamp {
            Some(ts) => item.with_timestamp(ts),
            None => item,
        }
    }
}

/// Splits `"2026-10-17T09:00:00Z Fixed deploy"` into timestamp and title.
/// Also accepts a date and a time separated by a space.
fn split_heading(heading: &str) -> (Option<String>, String) {
    let words: Vec<&str> = heading.split_whitespace().collect();

    if words.len() >= 2 {
        let pair = format!("{} {}", words[0], words[1]);
        if parse_timestamp(&pair).is_some() && words[1].contains(':') {
            return (Some(pair), clean_title(&words[2..].join(" ")));
        }
    }
    if let Some(first) = words.first() {
        if parse_timestamp(first).is_some() {
            return (Some(first.to_string()), clean_title(&words[1..].join(" ")));
        }
    }
    (None, clean_title(heading))
}

fn clean_title(raw: &str) -> String {
    raw.trim_start_matches(|c: char| c == '-' || c == '|' || c == ':' || c.is_whitespace())
        .trim()
        .to_string()
}
