use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS testament (
            id    INTEGER PRIMARY KEY,
            name  TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS book (
            id            INTEGER PRIMARY KEY,
            name          TEXT NOT NULL UNIQUE,
            abbreviation  TEXT,
            testament_id  INTEGER NOT NULL REFERENCES testament(id)
        );
        CREATE INDEX IF NOT EXISTS idx_book_testament ON book(testament_id);

        CREATE TABLE IF NOT EXISTS chapter (
            id       INTEGER PRIMARY KEY,
            number   INTEGER NOT NULL,
            book_id  INTEGER NOT NULL REFERENCES book(id),
            UNIQUE(number, book_id)
        );
        CREATE INDEX IF NOT EXISTS idx_chapter_book ON chapter(book_id);

        CREATE TABLE IF NOT EXISTS verse (
            id          INTEGER PRIMARY KEY,
            label       TEXT NOT NULL,
            text        TEXT NOT NULL,
            chapter_id  INTEGER NOT NULL REFERENCES chapter(id),
            UNIQUE(label, chapter_id)
        );
        CREATE INDEX IF NOT EXISTS idx_verse_chapter ON verse(chapter_id);
        ",
    )?;
    Ok(())
}

// ── Import ──

/// Insert the testament if new and return its id.
pub fn upsert_testament(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO testament (name) VALUES (?1)",
        rusqlite::params![name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM testament WHERE name = ?1",
        rusqlite::params![name],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// Insert the book if new and return its id. An existing book keeps its testament.
pub fn upsert_book(conn: &Connection, name: &str, testament_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO book (name, testament_id) VALUES (?1, ?2)",
        rusqlite::params![name, testament_id],
    )?;
    let id = conn.query_row(
        "SELECT id FROM book WHERE name = ?1",
        rusqlite::params![name],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// A book counts as populated once any verse exists under any of its chapters.
pub fn book_has_verses(conn: &Connection, book_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM verse v
             INNER JOIN chapter c ON v.chapter_id = c.id
             WHERE c.book_id = ?1
             LIMIT 1",
            rusqlite::params![book_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn set_book_abbreviation(conn: &Connection, book_id: i64, abbreviation: &str) -> Result<()> {
    conn.execute(
        "UPDATE book SET abbreviation = ?1 WHERE id = ?2",
        rusqlite::params![abbreviation, book_id],
    )?;
    Ok(())
}

pub fn upsert_chapter(conn: &Connection, book_id: i64, number: u32) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO chapter (number, book_id) VALUES (?1, ?2)",
        rusqlite::params![number, book_id],
    )?;
    let id = conn.query_row(
        "SELECT id FROM chapter WHERE number = ?1 AND book_id = ?2",
        rusqlite::params![number, book_id],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// A consolidated verse ready to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseRow {
    pub label: String,
    pub text: String,
}

/// Bulk insert; rows already present for (label, chapter) are left untouched.
pub fn insert_verses(conn: &Connection, chapter_id: i64, verses: &[VerseRow]) -> Result<usize> {
    let mut count = 0;
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO verse (label, text, chapter_id) VALUES (?1, ?2, ?3)",
    )?;
    for v in verses {
        count += stmt.execute(rusqlite::params![v.label, v.text, chapter_id])?;
    }
    Ok(count)
}

// ── Enrichment ──

#[derive(Debug, Clone)]
pub struct StoredBook {
    pub id: i64,
    pub name: String,
    pub abbreviation: Option<String>,
}

pub fn fetch_books(conn: &Connection) -> Result<Vec<StoredBook>> {
    let mut stmt = conn.prepare("SELECT id, name, abbreviation FROM book ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredBook {
                id: row.get(0)?,
                name: row.get(1)?,
                abbreviation: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub testaments: usize,
    pub books: usize,
    pub chapters: usize,
    pub verses: usize,
    pub missing_abbreviation: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let testaments: usize = conn.query_row("SELECT COUNT(*) FROM testament", [], |r| r.get(0))?;
    let books: usize = conn.query_row("SELECT COUNT(*) FROM book", [], |r| r.get(0))?;
    let chapters: usize = conn.query_row("SELECT COUNT(*) FROM chapter", [], |r| r.get(0))?;
    let verses: usize = conn.query_row("SELECT COUNT(*) FROM verse", [], |r| r.get(0))?;
    let missing_abbreviation: usize = conn.query_row(
        "SELECT COUNT(*) FROM book WHERE abbreviation IS NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        testaments,
        books,
        chapters,
        verses,
        missing_abbreviation,
    })
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}
