use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime settings: defaults, then `bible.toml` (optional), then `BIBLE_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub primary_base_url: String,
    pub secondary_base_url: String,
    pub secondary_bible: String,
    pub primary_timeout_secs: u64,
    pub secondary_catalog_timeout_secs: u64,
    pub secondary_chapter_timeout_secs: u64,
    pub chapter_delay_ms: u64,
    pub enrich_delay_ms: u64,
    pub matcher: MatcherKind,
    pub stop_on_transient: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    Positional,
    Name,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .set_default("db_path", "bible.db")?
            .set_default("primary_base_url", "https://biblia.parresia.com/wp-json/bible/v2")?
            .set_default("secondary_base_url", "https://biblia.paulus.com.br/api/v1")?
            .set_default("secondary_bible", "biblia-pastoral")?
            .set_default("primary_timeout_secs", 15)?
            .set_default("secondary_catalog_timeout_secs", 20)?
            .set_default("secondary_chapter_timeout_secs", 10)?
            .set_default("chapter_delay_ms", 200)?
            .set_default("enrich_delay_ms", 250)?
            .set_default("matcher", "positional")?
            .set_default("stop_on_transient", true)?
            .add_source(File::with_name("bible").required(false))
            .add_source(Environment::with_prefix("BIBLE").try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs(self.primary_timeout_secs)
    }

    pub fn secondary_catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.secondary_catalog_timeout_secs)
    }

    pub fn secondary_chapter_timeout(&self) -> Duration {
        Duration::from_secs(self.secondary_chapter_timeout_secs)
    }

    pub fn chapter_delay(&self) -> Duration {
        Duration::from_millis(self.chapter_delay_ms)
    }

    pub fn enrich_delay(&self) -> Duration {
        Duration::from_millis(self.enrich_delay_ms)
    }
}
