mod catalog;
mod chapter;
mod client;
mod db;
mod enrich;
mod error;
mod import;
mod payload;
mod settings;
mod throttle;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::client::{AbbreviationApi, ContentApi};
use crate::enrich::{BookMatcher, Enricher, NameMatcher, PositionalMatcher};
use crate::import::{ChapterPolicy, Importer};
use crate::settings::{MatcherKind, Settings};
use crate::throttle::Throttle;

#[derive(Parser)]
#[command(name = "bible_import", about = "Scripture importer: content API to SQLite, plus abbreviation enrichment")]
struct Cli {
    /// SQLite database path (overrides BIBLE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import books, then enrich abbreviations (default)
    Run,
    /// Import books, chapters and verses from the content API
    Import,
    /// Overwrite book abbreviations from the abbreviation API
    Enrich,
    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(path) = cli.db {
        settings.db_path = path;
    }

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    println!("Database: {:?}", settings.db_path);

    let http = reqwest::Client::new();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let imported = run_import(&settings, &conn, &http).await;
            // Enrichment only reads what the import committed; it runs either way.
            let enriched = run_enrich(&settings, &conn, &http).await;
            imported.and(enriched)
        }
        Commands::Import => run_import(&settings, &conn, &http).await,
        Commands::Enrich => run_enrich(&settings, &conn, &http).await,
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Testaments: {}", s.testaments);
            println!("Books:      {}", s.books);
            println!("Chapters:   {}", s.chapters);
            println!("Verses:     {}", s.verses);
            println!("No abbrev:  {}", s.missing_abbreviation);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_import(settings: &Settings, conn: &Connection, http: &reqwest::Client) -> Result<()> {
    let api = ContentApi::new(http.clone(), &settings.primary_base_url, settings.primary_timeout());
    let entries = match catalog::fetch_catalog(&api).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Cannot import without a catalog: {:#}", e);
            return Err(e);
        }
    };

    let importer = Importer {
        api: &api,
        conn,
        throttle: Throttle::new(settings.chapter_delay()),
        policy: ChapterPolicy {
            stop_on_transient: settings.stop_on_transient,
        },
    };
    let report = importer.run(&entries).await;
    match &report {
        Ok(r) => r.print(),
        Err(e) => tracing::error!("Import aborted: {:#}", e),
    }
    report.map(|_| ())
}

async fn run_enrich(settings: &Settings, conn: &Connection, http: &reqwest::Client) -> Result<()> {
    let api = AbbreviationApi::new(
        http.clone(),
        &settings.secondary_base_url,
        &settings.secondary_bible,
        settings.secondary_catalog_timeout(),
        settings.secondary_chapter_timeout(),
    );
    let matcher: &dyn BookMatcher = match settings.matcher {
        MatcherKind::Positional => &PositionalMatcher,
        MatcherKind::Name => &NameMatcher,
    };

    let enricher = Enricher {
        api: &api,
        conn,
        throttle: Throttle::new(settings.enrich_delay()),
        matcher,
    };
    let report = enricher.run().await;
    match &report {
        Ok(r) => r.print(),
        Err(e) => tracing::error!("Enrichment aborted: {:#}", e),
    }
    report.map(|_| ())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
