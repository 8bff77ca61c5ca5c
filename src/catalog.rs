use anyhow::{Context, Result};
use tracing::info;

use crate::client::ContentApi;
use crate::payload::CatalogEntry;

const UNKNOWN_TESTAMENT: &str = "Unknown";

/// A catalog entry with every field the import needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSpec {
    pub name: String,
    pub slug: String,
    pub chapter_count: u32,
    pub testament: String,
}

impl BookSpec {
    /// None when name, slug or a positive chapter count is missing.
    pub fn from_entry(entry: &CatalogEntry) -> Option<Self> {
        let name = entry.name.as_deref().filter(|s| !s.is_empty())?;
        let slug = entry.slug.as_deref().filter(|s| !s.is_empty())?;
        let chapter_count = entry.chapter_count.filter(|&n| n > 0)?;
        let raw = entry.meta.testament.as_deref().unwrap_or(UNKNOWN_TESTAMENT);
        Some(Self {
            name: name.to_string(),
            slug: slug.to_string(),
            chapter_count,
            testament: normalize_testament(raw),
        })
    }
}

/// Map a raw testament label to its canonical display name.
///
/// "antigo" and "novo" (any case) map to the Old/New Testament; anything
/// else is capitalized: first letter upper-case, the rest lower-case.
pub fn normalize_testament(raw: &str) -> String {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "antigo" => "Old Testament".to_string(),
        "novo" => "New Testament".to_string(),
        _ => {
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Fetch the ordered book catalog. Any failure here ends the import.
pub async fn fetch_catalog(api: &ContentApi) -> Result<Vec<CatalogEntry>> {
    info!("Fetching book catalog");
    let entries = api
        .fetch_books()
        .await
        .context("Failed to fetch book catalog")?;
    info!("Catalog lists {} books", entries.len());
    Ok(entries)
}
