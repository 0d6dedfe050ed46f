//! TF-IDF relevance ranking with title and recency boosts.
//!
//! The ranker is a pure function of the corpus, the query, and the current
//! time. Nothing is cached: the IDF table is rebuilt for every call.
//!
//! # Scoring Algorithm
//!
//! 1. Tokenize: lower-case, turn every non-alphanumeric run into a space,
//!    split on whitespace, drop tokens of two characters or fewer.
//! 2. `tf(t, d) = count(t in d) / tokens(d)` where `d` is title + content.
//! 3. `idf(t) = ln((N + 1) / (df(t) + 1)) + 1`, with `df` counting documents
//!    that contain `t` at least once. Query terms missing from the table use
//!    `idf = 1`.
//! 4. `score(d) = Σ_q tf(q, d) × idf(q)` over the query tokens.
//! 5. ×1.5 for every query token that also occurs in the tokenized title.
//! 6. ×1.3 for log items whose timestamp is less than 7 days old.
//! 7. Drop scores ≤ 0 and stable-sort descending, so ties keep corpus order.
//!
//! An empty query skips all of this and returns the corpus untouched
//! ("browse" mode).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{ContextItem, SourceKind};

pub const TITLE_BOOST: f64 = 1.5;
pub const RECENCY_BOOST: f64 = 1.3;
pub const RECENCY_WINDOW_DAYS: i64 = 7;

/// Splits text into lower-cased alphanumeric tokens longer than two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Ranks `items` against `query` using the current time for recency.
pub fn rank(items: Vec<ContextItem>, query: &str) -> Vec<ContextItem> {
    rank_at(items, query, Utc::now())
}

/// Ranks `items` against `query` as of `now`.
///
/// Returns the corpus unchanged when the query is blank. Otherwise every
/// returned item has `relevance` set to a positive score.
pub fn rank_at(items: Vec<ContextItem>, query: &str, now: DateTime<Utc>) -> Vec<ContextItem> {
    if query.trim().is_empty() {
        return items;
    }

    let query_tokens = tokenize(query);
    let doc_tokens: Vec<Vec<String>> = items
        .iter()
        .map(|item| tokenize(&format!("{} {}", item.title, item.content)))
        .collect();
    let idf = inverse_document_frequency(&doc_tokens);

    let mut scored: Vec<ContextItem> = items
        .into_iter()
        .zip(doc_tokens.iter())
        .filter_map(|(mut item, tokens)| {
            let score = score_item(&item, tokens, &query_tokens, &idf, now);
            if score > 0.0 {
                item.relevance = Some(score);
                Some(item)
            } else {
                None
            }
        })
        .collect();

    // `sort_by` is stable: equal scores keep corpus order.
    scored.sort_by(|a, b| {
        let sa = a.relevance.unwrap_or(0.0);
        let sb = b.relevance.unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

fn inverse_document_frequency(docs: &[Vec<String>]) -> HashMap<String, f64> {
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for tokens in docs {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    let n = docs.len() as f64;
    doc_freq
        .into_iter()
        .map(|(term, df)| {
            let idf = ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0;
            (term.to_string(), idf)
        })
        .collect()
}

fn term_frequency(term: &str, tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let count = tokens.iter().filter(|t| t.as_str() == term).count();
    count as f64 / tokens.len() as f64
}

fn score_item(
    item: &ContextItem,
    tokens: &[String],
    query_tokens: &[String],
    idf: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> f64 {
    let mut score: f64 = query_tokens
        .iter()
        .map(|term| term_frequency(term, tokens) * idf.get(term).copied().unwrap_or(1.0))
        .sum();

    let title_tokens: HashSet<String> = tokenize(&item.title).into_iter().collect();
    for term in query_tokens {
        if title_tokens.contains(term) {
            score *= TITLE_BOOST;
        }
    }

    if item.source == SourceKind::Log && is_recent(item.timestamp.as_deref(), now) {
        score *= RECENCY_BOOST;
    }

    score
}

fn is_recent(timestamp: Option<&str>, now: DateTime<Utc>) -> bool {
    match timestamp.and_then(parse_timestamp) {
        Some(ts) => now.signed_duration_since(ts) < Duration::days(RECENCY_WINDOW_DAYS),
        None => false,
    }
}

/// Parses RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC), or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
