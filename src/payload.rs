//! Wire shapes of both remote APIs.
//!
//! Both services are loose about types (numbers arrive as strings or
//! integers, fields go missing), so every field is optional and coerced
//! leniently. Validation happens where the values are used.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ── Content API ──

/// One entry of the content API `/books` listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    /// Display name. The API publishes it under `chapter`.
    #[serde(rename = "chapter", default, deserialize_with = "text_only")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text_only")]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "count")]
    pub chapter_count: Option<u32>,
    #[serde(default)]
    pub meta: CatalogMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogMeta {
    #[serde(default, deserialize_with = "text_only")]
    pub testament: Option<String>,
}

/// A raw verse fragment before grouping, as found in the bare-list shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fragment {
    #[serde(default, deserialize_with = "string_or_number")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub text: Option<String>,
}

/// Fragment of the wrapped shape, numbered under `value`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Versicle {
    #[serde(rename = "value", default, deserialize_with = "string_or_number")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub text: Option<String>,
}

impl From<Versicle> for Fragment {
    fn from(v: Versicle) -> Self {
        Self {
            number: v.number,
            text: v.text,
        }
    }
}

/// `/chapter/{slug}_{n}` answers either with a bare fragment list or with
/// an object wrapping the list next to the book abbreviation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChapterPayload {
    Fragments(Vec<Fragment>),
    Wrapped {
        #[serde(default)]
        versicles: Vec<Versicle>,
        #[serde(rename = "bookChildrenAbbreviation", default, deserialize_with = "text_only")]
        abbreviation: Option<String>,
    },
}

impl ChapterPayload {
    pub fn into_parts(self) -> (Vec<Fragment>, Option<String>) {
        match self {
            Self::Fragments(fragments) => (fragments, None),
            Self::Wrapped {
                versicles,
                abbreviation,
            } => (versicles.into_iter().map(Fragment::from).collect(), abbreviation),
        }
    }
}

// ── Abbreviation API ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecondaryBook {
    #[serde(default, deserialize_with = "integer")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "text_only")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text_only")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "text_only")]
    pub testament: Option<String>,
}

/// The `/books` listing is keyed by book; a plain list is accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecondaryCatalog {
    Keyed(HashMap<String, SecondaryBook>),
    Listed(Vec<SecondaryBook>),
}

impl SecondaryCatalog {
    /// Entries in canonical order (ascending id; entries without id last).
    /// Ties keep list order, or key order for the keyed shape.
    pub fn into_sorted(self) -> Vec<SecondaryBook> {
        let mut books: Vec<SecondaryBook> = match self {
            Self::Keyed(map) => {
                let mut keyed: Vec<(String, SecondaryBook)> = map.into_iter().collect();
                keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
                keyed.into_iter().map(|(_, book)| book).collect()
            }
            Self::Listed(list) => list,
        };
        books.sort_by_key(|b| b.id.unwrap_or(i64::MAX));
        books
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecondaryChapter {
    #[serde(rename = "bookChildrenAbbreviation", default, deserialize_with = "text_only")]
    pub abbreviation: Option<String>,
}

// ── Lenient field decoders ──

fn text_only<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
