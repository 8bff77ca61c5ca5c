use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::catalog::BookSpec;
use crate::chapter::{self, ChapterOutcome};
use crate::client::ContentApi;
use crate::db;
use crate::payload::CatalogEntry;
use crate::throttle::Throttle;

/// What to do with a chapter that failed for reasons other than a missing page.
#[derive(Debug, Clone, Copy)]
pub struct ChapterPolicy {
    pub stop_on_transient: bool,
}

impl ChapterPolicy {
    /// Whether the chapter loop of the current book ends after `outcome`.
    fn ends_book(&self, outcome: &ChapterOutcome) -> bool {
        match outcome {
            ChapterOutcome::Parsed(_) => false,
            ChapterOutcome::NotFound | ChapterOutcome::ServerError(_) => true,
            ChapterOutcome::Transient(_) => self.stop_on_transient,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub books_seen: usize,
    pub books_imported: usize,
    pub books_skipped: usize,
    pub books_invalid: usize,
    pub chapters: usize,
}

impl ImportReport {
    pub fn print(&self) {
        println!(
            "Books: {} in catalog, {} imported, {} already populated, {} invalid. Chapters fetched: {}.",
            self.books_seen, self.books_imported, self.books_skipped, self.books_invalid, self.chapters,
        );
    }
}

pub struct Importer<'a> {
    pub api: &'a ContentApi,
    pub conn: &'a Connection,
    pub throttle: Throttle,
    pub policy: ChapterPolicy,
}

impl Importer<'_> {
    /// Import every catalog entry in order, one transaction per book.
    ///
    /// A database error aborts the remaining catalog; books committed
    /// before it stay committed, the open book is rolled back.
    pub async fn run(&self, catalog: &[CatalogEntry]) -> Result<ImportReport> {
        let mut report = ImportReport {
            books_seen: catalog.len(),
            ..Default::default()
        };

        let pb = ProgressBar::new(catalog.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );

        for (i, entry) in catalog.iter().enumerate() {
            pb.inc(1);
            let Some(book) = BookSpec::from_entry(entry) else {
                warn!("Incomplete catalog entry at position {}, skipping: {:?}", i + 1, entry);
                report.books_invalid += 1;
                continue;
            };
            pb.set_message(book.name.clone());
            info!("Book {}/{}: {}", i + 1, catalog.len(), book.name);

            match self.import_book(&book).await? {
                Some(chapters) => {
                    report.books_imported += 1;
                    report.chapters += chapters;
                }
                None => report.books_skipped += 1,
            }
        }

        pb.finish_and_clear();
        Ok(report)
    }

    /// Returns the number of chapters fetched, or None if the book was already populated.
    async fn import_book(&self, book: &BookSpec) -> Result<Option<usize>> {
        let tx = self.conn.unchecked_transaction()?;

        let testament_id = db::upsert_testament(&tx, &book.testament)?;
        let book_id = db::upsert_book(&tx, &book.name, testament_id)?;

        if db::book_has_verses(&tx, book_id)? {
            info!("  Already populated, skipping");
            tx.commit()?;
            return Ok(None);
        }

        let mut abbreviation_saved = false;
        let mut fetched = 0;
        for number in 1..=book.chapter_count {
            if number > 1 {
                self.throttle.pause().await;
            }
            let outcome = chapter::process_chapter(self.api, &tx, book_id, &book.slug, number).await?;
            fetched += 1;

            match &outcome {
                ChapterOutcome::Parsed(Some(abbr)) if !abbreviation_saved && !abbr.is_empty() => {
                    db::set_book_abbreviation(&tx, book_id, abbr)?;
                    abbreviation_saved = true;
                }
                ChapterOutcome::Parsed(_) => {}
                ChapterOutcome::NotFound => {
                    info!("  Chapter {} not found, end of book", number);
                }
                ChapterOutcome::ServerError(code) => {
                    warn!("  Chapter {} failed with HTTP {}", number, code);
                }
                ChapterOutcome::Transient(e) => {
                    warn!("  Chapter {} could not be fetched: {}", number, e);
                }
            }

            if self.policy.ends_book(&outcome) {
                info!("  Stopping '{}' after chapter {}", book.name, number);
                break;
            }
        }

        tx.commit()?;
        info!("  Saved '{}'", book.name);
        Ok(Some(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::catalog;

    async fn mount(server: &MockServer, route: &str, body: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(body)
            .mount(server)
            .await;
    }

    fn verses_of(conn: &Connection, book: &str, chapter: u32) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare(
                "SELECT v.label, v.text FROM verse v
                 JOIN chapter c ON c.id = v.chapter_id
                 JOIN book b ON b.id = c.book_id
                 WHERE b.name = ?1 AND c.number = ?2
                 ORDER BY v.id",
            )
            .unwrap();
        let rows = stmt
            .query_map(rusqlite::params![book, chapter], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    async fn genesis_server() -> MockServer {
        let server = MockServer::start().await;
        mount(
            &server,
            "/books",
            ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "chapter": "Genesis", "slug": "gen", "chapter_count": 2, "meta": { "testament": "antigo" } }
            ])),
        )
        .await;
        mount(
            &server,
            "/chapter/gen_1",
            ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "number": "1", "text": "In" },
                { "number": "1", "text": "the beginning" },
                { "number": "2", "text": "God created" }
            ])),
        )
        .await;
        mount(&server, "/chapter/gen_2", ResponseTemplate::new(404)).await;
        server
    }

    const STRICT: ChapterPolicy = ChapterPolicy { stop_on_transient: true };

    fn importer<'a>(api: &'a ContentApi, conn: &'a Connection) -> Importer<'a> {
        Importer {
            api,
            conn,
            throttle: Throttle::disabled(),
            policy: STRICT,
        }
    }

    #[tokio::test]
    async fn imports_until_end_of_book() {
        let server = genesis_server().await;
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let conn = db::open_in_memory().unwrap();

        let entries = catalog::fetch_catalog(&api).await.unwrap();
        let report = importer(&api, &conn).run(&entries).await.unwrap();

        assert_eq!(report.books_imported, 1);
        assert_eq!(report.chapters, 2);
        assert_eq!(
            verses_of(&conn, "Genesis", 1),
            vec![
                ("1".to_string(), "In the beginning".to_string()),
                ("2".to_string(), "God created".to_string()),
            ]
        );
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.testaments, 1);
        assert_eq!(stats.chapters, 1);
        assert_eq!(stats.verses, 2);
    }

    #[tokio::test]
    async fn populated_book_is_not_refetched() {
        let server = genesis_server().await;
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let conn = db::open_in_memory().unwrap();
        let entries = catalog::fetch_catalog(&api).await.unwrap();

        importer(&api, &conn).run(&entries).await.unwrap();
        let before = server.received_requests().await.unwrap().len();

        let report = importer(&api, &conn).run(&entries).await.unwrap();
        let after = server.received_requests().await.unwrap().len();

        assert_eq!(report.books_skipped, 1);
        assert_eq!(report.books_imported, 0);
        assert_eq!(before, after);
        assert_eq!(db::get_stats(&conn).unwrap().verses, 2);
    }

    #[tokio::test]
    async fn first_abbreviation_wins() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/chapter/ex_1",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bookChildrenAbbreviation": "Ex",
                "versicles": [{ "value": "1", "text": "These are the names" }]
            })),
        )
        .await;
        mount(
            &server,
            "/chapter/ex_2",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bookChildrenAbbreviation": "Exo",
                "versicles": [{ "value": "1", "text": "And there went a man" }]
            })),
        )
        .await;
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let conn = db::open_in_memory().unwrap();
        let entries: Vec<CatalogEntry> = serde_json::from_value(serde_json::json!([
            { "chapter": "Exodus", "slug": "ex", "chapter_count": 2, "meta": { "testament": "antigo" } }
        ]))
        .unwrap();

        let report = importer(&api, &conn).run(&entries).await.unwrap();
        assert_eq!(report.chapters, 2);
        let books = db::fetch_books(&conn).unwrap();
        assert_eq!(books[0].abbreviation.as_deref(), Some("Ex"));
    }

    #[tokio::test]
    async fn invalid_entries_skipped_and_rest_imported() {
        let server = genesis_server().await;
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let conn = db::open_in_memory().unwrap();
        let entries: Vec<CatalogEntry> = serde_json::from_value(serde_json::json!([
            { "slug": "nameless", "chapter_count": 3 },
            { "chapter": "Genesis", "slug": "gen", "chapter_count": 2, "meta": { "testament": "antigo" } }
        ]))
        .unwrap();

        let report = importer(&api, &conn).run(&entries).await.unwrap();
        assert_eq!(report.books_invalid, 1);
        assert_eq!(report.books_imported, 1);
    }

    #[tokio::test]
    async fn transient_failure_can_be_skipped() {
        let server = MockServer::start().await;
        mount(&server, "/chapter/ps_1", ResponseTemplate::new(200).set_body_string("garbled")).await;
        mount(
            &server,
            "/chapter/ps_2",
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{ "number": "1", "text": "Blessed is the man" }])),
        )
        .await;
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let entries: Vec<CatalogEntry> = serde_json::from_value(serde_json::json!([
            { "chapter": "Psalms", "slug": "ps", "chapter_count": 2, "meta": { "testament": "antigo" } }
        ]))
        .unwrap();

        let strict = db::open_in_memory().unwrap();
        importer(&api, &strict).run(&entries).await.unwrap();
        assert_eq!(db::get_stats(&strict).unwrap().verses, 0);

        let lenient = db::open_in_memory().unwrap();
        let imp = Importer {
            policy: ChapterPolicy { stop_on_transient: false },
            ..importer(&api, &lenient)
        };
        imp.run(&entries).await.unwrap();
        assert_eq!(db::get_stats(&lenient).unwrap().verses, 1);
    }

    #[tokio::test]
    async fn write_failure_rolls_back_open_book_and_stops() {
        let server = MockServer::start().await;
        for slug in ["a", "b", "c"] {
            mount(
                &server,
                &format!("/chapter/{}_1", slug),
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "number": "1", "text": slug }])),
            )
            .await;
        }
        let api = ContentApi::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(5));
        let conn = db::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_b BEFORE INSERT ON verse
             WHEN (SELECT b.name FROM chapter c JOIN book b ON b.id = c.book_id
                   WHERE c.id = NEW.chapter_id) = 'B'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();
        let entries: Vec<CatalogEntry> = serde_json::from_value(serde_json::json!([
            { "chapter": "A", "slug": "a", "chapter_count": 1, "meta": { "testament": "antigo" } },
            { "chapter": "B", "slug": "b", "chapter_count": 1, "meta": { "testament": "novo" } },
            { "chapter": "C", "slug": "c", "chapter_count": 1, "meta": { "testament": "novo" } }
        ]))
        .unwrap();

        assert!(importer(&api, &conn).run(&entries).await.is_err());

        assert_eq!(verses_of(&conn, "A", 1), vec![("1".to_string(), "a".to_string())]);
        let names: Vec<String> = db::fetch_books(&conn).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["A"]);
        let stats = db::get_stats(&conn).unwrap();
        assert_eq!(stats.testaments, 1);
        assert_eq!(stats.chapters, 1);

        let requested: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert!(requested.contains(&"/chapter/b_1".to_string()));
        assert!(!requested.contains(&"/chapter/c_1".to_string()));
    }

    #[test]
    fn policy_decisions() {
        let strict = STRICT;
        let lenient = ChapterPolicy { stop_on_transient: false };
        assert!(!strict.ends_book(&ChapterOutcome::Parsed(None)));
        assert!(strict.ends_book(&ChapterOutcome::NotFound));
        assert!(strict.ends_book(&ChapterOutcome::ServerError(500)));
        assert!(strict.ends_book(&ChapterOutcome::Transient("timeout".into())));
        assert!(!lenient.ends_book(&ChapterOutcome::Transient("timeout".into())));
        assert!(lenient.ends_book(&ChapterOutcome::NotFound));
    }
}
