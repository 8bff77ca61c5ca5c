use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::Connection;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::client::{AbbreviationApi, BookPath};
use crate::db::{self, StoredBook};
use crate::payload::SecondaryBook;
use crate::throttle::Throttle;

static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());

/// URL-safe identifier: closest ASCII form, lower-case, spaces to hyphens,
/// everything outside `[a-z0-9-]` removed. `None` gives an empty slug.
pub fn slugify(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let ascii: String = value.nfkd().filter(char::is_ascii).collect();
    let hyphenated = ascii.to_lowercase().replace(' ', "-");
    NON_SLUG_RE.replace_all(&hyphenated, "").into_owned()
}

/// Path of a secondary-catalog book; the group falls back to the book slug.
pub fn book_path(book: &SecondaryBook) -> BookPath {
    let slug = slugify(book.name.as_deref());
    let group = match book.parent.as_deref() {
        Some(parent) if !parent.is_empty() => slugify(Some(parent)),
        _ => slug.clone(),
    };
    BookPath {
        testament: slugify(book.testament.as_deref()),
        group,
        book: slug,
    }
}

/// Pairs secondary-catalog entries with stored books.
pub trait BookMatcher {
    fn pair<'a>(
        &self,
        catalog: &'a [SecondaryBook],
        stored: &'a [StoredBook],
    ) -> Vec<(&'a SecondaryBook, &'a StoredBook)>;
}

/// Pair by index. Both lists must share the same canonical order.
pub struct PositionalMatcher;

impl BookMatcher for PositionalMatcher {
    fn pair<'a>(
        &self,
        catalog: &'a [SecondaryBook],
        stored: &'a [StoredBook],
    ) -> Vec<(&'a SecondaryBook, &'a StoredBook)> {
        if catalog.len() != stored.len() {
            warn!(
                "Abbreviation catalog has {} books but database has {}; pairing the first {}",
                catalog.len(),
                stored.len(),
                catalog.len().min(stored.len())
            );
        }
        catalog.iter().zip(stored.iter()).collect()
    }
}

/// Pair by slugified name and report what stays unmatched.
pub struct NameMatcher;

impl BookMatcher for NameMatcher {
    fn pair<'a>(
        &self,
        catalog: &'a [SecondaryBook],
        stored: &'a [StoredBook],
    ) -> Vec<(&'a SecondaryBook, &'a StoredBook)> {
        let mut by_slug: HashMap<String, &StoredBook> = HashMap::new();
        for book in stored {
            let key = slugify(Some(&book.name));
            if key.is_empty() {
                warn!("Stored book '{}' has no usable name to match on", book.name);
            } else if let Some(first) = by_slug.get(&key) {
                warn!(
                    "Stored books '{}' and '{}' share slug '{}'; only the first can be matched",
                    first.name, book.name, key
                );
            } else {
                by_slug.insert(key, book);
            }
        }

        let mut pairs = Vec::new();
        for entry in catalog {
            let key = slugify(entry.name.as_deref());
            let found = if key.is_empty() { None } else { by_slug.remove(&key) };
            match found {
                Some(book) => pairs.push((entry, book)),
                None => warn!("No stored book matches '{}'", entry.name.as_deref().unwrap_or("")),
            }
        }
        for book in by_slug.values() {
            warn!("Stored book '{}' has no catalog entry", book.name);
        }
        pairs.sort_by_key(|(_, book)| book.id);
        pairs
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichReport {
    pub paired: usize,
    pub updated: usize,
    pub missing: usize,
    pub failed: usize,
}

impl EnrichReport {
    pub fn print(&self) {
        println!(
            "Abbreviations: {} books paired, {} updated, {} without abbreviation, {} failed.",
            self.paired, self.updated, self.missing, self.failed,
        );
    }
}

pub struct Enricher<'a> {
    pub api: &'a AbbreviationApi,
    pub conn: &'a Connection,
    pub throttle: Throttle,
    pub matcher: &'a dyn BookMatcher,
}

impl Enricher<'_> {
    /// Overwrite stored abbreviations with those of the abbreviation API.
    ///
    /// Runs in a single transaction committed at the end. A catalog fetch
    /// failure aborts the pass; per-book failures are logged and skipped.
    pub async fn run(&self) -> Result<EnrichReport> {
        info!("Fetching abbreviation catalog");
        let catalog = self
            .api
            .fetch_catalog()
            .await
            .context("Failed to fetch abbreviation catalog")?;
        info!("Abbreviation catalog lists {} books", catalog.len());

        let tx = self.conn.unchecked_transaction()?;
        let stored = db::fetch_books(&tx)?;
        let pairs = self.matcher.pair(&catalog, &stored);

        let mut report = EnrichReport {
            paired: pairs.len(),
            ..Default::default()
        };

        for (i, (entry, book)) in pairs.into_iter().enumerate() {
            if i > 0 {
                self.throttle.pause().await;
            }
            let label = entry.name.as_deref().unwrap_or("");
            info!("Book '{}' (id {}) <- '{}'", book.name, book.id, label);

            match self.api.fetch_abbreviation(&book_path(entry)).await {
                Ok(Some(abbr)) if !abbr.is_empty() => {
                    match book.abbreviation.as_deref() {
                        Some(prev) if prev != abbr => info!("  Abbreviation '{}' (was '{}')", abbr, prev),
                        _ => info!("  Abbreviation '{}'", abbr),
                    }
                    db::set_book_abbreviation(&tx, book.id, &abbr)?;
                    report.updated += 1;
                }
                Ok(_) => {
                    info!("  No abbreviation returned for '{}'", label);
                    report.missing += 1;
                }
                Err(e) => {
                    warn!("  Failed to fetch abbreviation for '{}': {}", label, e);
                    report.failed += 1;
                }
            }
        }

        tx.commit()?;
        info!("Abbreviation pass finished");
        Ok(report)
    }
}
