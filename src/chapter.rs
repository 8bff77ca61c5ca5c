use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::client::ContentApi;
use crate::db::{self, VerseRow};
use crate::error::FetchError;
use crate::payload::Fragment;

// ASCII digits only: labels are compared as digit strings by `numeric_cmp`.
static LEADING_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]+)").unwrap());

/// Result of fetching one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// Chapter processed. Carries the book abbreviation when the payload had one.
    /// `Parsed(None)` also covers a chapter that yielded no verses.
    Parsed(Option<String>),
    /// HTTP 404: the book has no such chapter.
    NotFound,
    /// Any other HTTP error status.
    ServerError(u16),
    /// Network failure, timeout or undecodable body.
    Transient(String),
}

impl From<FetchError> for ChapterOutcome {
    fn from(e: FetchError) -> Self {
        if e.is_not_found() {
            return Self::NotFound;
        }
        match e {
            FetchError::Status { code, .. } => Self::ServerError(code),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Merge fragments sharing a leading verse number, ordered numerically.
/// Each row's label is the leading integer run, its text the joined fragments.
///
/// Fragments with an empty number or text, or whose number does not start
/// with a digit, are dropped. Within a group texts keep encounter order.
pub fn group_fragments(fragments: &[Fragment]) -> Vec<VerseRow> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&str>)> = Vec::new();

    for f in fragments {
        let number = f.number.as_deref().unwrap_or("").trim();
        let text = f.text.as_deref().unwrap_or("").trim();
        if number.is_empty() || text.is_empty() {
            continue;
        }
        let Some(m) = LEADING_INT_RE.captures(number).and_then(|c| c.get(1)) else {
            continue;
        };
        let label = m.as_str();
        match index.get(label) {
            Some(&i) => groups[i].1.push(text),
            None => {
                index.insert(label.to_string(), groups.len());
                groups.push((label.to_string(), vec![text]));
            }
        }
    }

    groups.sort_by(|(a, _), (b, _)| numeric_cmp(a, b));
    groups
        .into_iter()
        .map(|(label, texts)| VerseRow {
            label,
            text: texts.join(" "),
        })
        .collect()
}

/// Compare two digit strings by numeric value without overflow.
fn numeric_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Fetch, aggregate and store one chapter of a book.
///
/// Fetch and decode failures are reported through the outcome, never as
/// `Err`; `Err` means the database write failed.
pub async fn process_chapter(
    api: &ContentApi,
    conn: &Connection,
    book_id: i64,
    slug: &str,
    number: u32,
) -> Result<ChapterOutcome> {
    let payload = match api.fetch_chapter(slug, number).await {
        Ok(p) => p,
        Err(e) => return Ok(e.into()),
    };
    let (fragments, abbreviation) = payload.into_parts();

    let verses = group_fragments(&fragments);
    if verses.is_empty() {
        debug!("Chapter {} of {} has no verses", number, slug);
        return Ok(ChapterOutcome::Parsed(None));
    }

    let chapter_id = db::upsert_chapter(conn, book_id, number)?;
    let inserted = db::insert_verses(conn, chapter_id, &verses)?;
    info!(
        "  Chapter {}: {} verses ({} new)",
        number,
        verses.len(),
        inserted
    );

    Ok(ChapterOutcome::Parsed(abbreviation))
}
