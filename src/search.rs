//! One-shot local search (`ctxd search`).
//!
//! Runs the same aggregation and ranking the daemon does, in-process, and
//! prints the ranked list. No daemon, token, or port is involved.

use anyhow::Result;
use std::fmt::Write;
use std::path::Path;

use crate::config::Config;
use crate::context::{self, ContextRequest};
use crate::models::ContextItem;
use crate::scan::truncate_chars;
use crate::traits::ReaderSet;

/// Characters of content shown per result.
const EXCERPT_CHARS: usize = 160;

pub fn run_search(root: &Path, config: &Config, query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let readers = ReaderSet::from_config(&config.sources);
    let ctx = context::aggregate(root, &readers, &ContextRequest::search(query, limit));
    tracing::debug!(query, results = ctx.items.len(), "local search finished");
    print!("{}", format_results(&ctx.items));
    Ok(())
}

/// Renders ranked items the way `ctxd search` prints them.
pub fn format_results(items: &[ContextItem]) -> String {
    if items.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{:.2}] {} / {}",
            i + 1,
            item.relevance.unwrap_or(0.0),
            item.source,
            item.title
        );
        if let Some(path) = &item.path {
            let _ = writeln!(out, "    path: {path}");
        }
        if let Some(ts) = &item.timestamp {
            let _ = writeln!(out, "    time: {ts}");
        }
        let excerpt = truncate_chars(item.content.replace('\n', " ").trim(), EXCERPT_CHARS);
        if !excerpt.is_empty() {
            let _ = writeln!(out, "    excerpt: \"{excerpt}\"");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn empty_results() {
        assert_eq!(format_results(&[]), "No results.\n");
    }

    #[test]
    fn formats_rank_score_and_excerpt() {
        let mut item = ContextItem::new(SourceKind::Document, "doc", "Deploy guide", "line one\nline two")
            .with_path("docs/deploy.md");
        item.relevance = Some(2.5);
        let out = format_results(&[item]);
        assert!(out.starts_with("1. [2.50] document / Deploy guide\n"));
        assert!(out.contains("    path: docs/deploy.md\n"));
        assert!(out.contains("excerpt: \"line one line two\""));
    }
}
