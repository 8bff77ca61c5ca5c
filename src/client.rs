use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;
use crate::payload::{CatalogEntry, ChapterPayload, SecondaryBook, SecondaryCatalog, SecondaryChapter};

/// GET `url` and decode the JSON body. Non-2xx statuses are errors.
async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    debug!("GET {}", url);
    let response = http.get(url).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            code: status.as_u16(),
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Client for the content API (book catalog and chapter text).
pub struct ContentApi {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ContentApi {
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub async fn fetch_books(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        let url = format!("{}/books", self.base_url);
        get_json(&self.http, &url, self.timeout).await
    }

    pub async fn fetch_chapter(&self, slug: &str, number: u32) -> Result<ChapterPayload, FetchError> {
        let url = format!("{}/chapter/{}_{}", self.base_url, slug, number);
        get_json(&self.http, &url, self.timeout).await
    }
}

/// Client for the abbreviation API.
pub struct AbbreviationApi {
    http: reqwest::Client,
    base_url: String,
    bible: String,
    catalog_timeout: Duration,
    chapter_timeout: Duration,
}

/// Three-level path of a book on the abbreviation API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookPath {
    pub testament: String,
    pub group: String,
    pub book: String,
}

impl AbbreviationApi {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        bible: &str,
        catalog_timeout: Duration,
        chapter_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bible: bible.to_string(),
            catalog_timeout,
            chapter_timeout,
        }
    }

    /// Catalog entries in canonical (id) order.
    pub async fn fetch_catalog(&self) -> Result<Vec<SecondaryBook>, FetchError> {
        let url = format!("{}/books", self.base_url);
        let catalog: SecondaryCatalog = get_json(&self.http, &url, self.catalog_timeout).await?;
        Ok(catalog.into_sorted())
    }

    pub async fn fetch_abbreviation(&self, path: &BookPath) -> Result<Option<String>, FetchError> {
        let url = format!(
            "{}/bibles/{}/testaments/{}/books/{}/children/{}/chapters/1",
            self.base_url, self.bible, path.testament, path.group, path.book
        );
        let chapter: SecondaryChapter = get_json(&self.http, &url, self.chapter_timeout).await?;
        Ok(chapter.abbreviation)
    }
}
