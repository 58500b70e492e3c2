use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

use crate::models::ArtworkLink;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().with_context(|| "Failed to open in-memory database")?;

        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS artwork_links (
                hash TEXT PRIMARY KEY,
                link TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
            )
            .with_context(|| "Failed to initialize database schema")?;

        Ok(())
    }

    fn row_to_link(row: &Row) -> rusqlite::Result<ArtworkLink> {
        Ok(ArtworkLink {
            hash: row.get(0)?,
            link: row.get(1)?,
            created_at: row
                .get::<_, String>(2)?
                .parse::<DateTime<Utc>>()
                .unwrap_or_default(),
        })
    }

    pub fn get_artwork_link(&self, hash: &str) -> Result<Option<ArtworkLink>> {
        self.conn
            .query_row(
                "SELECT hash, link, created_at FROM artwork_links WHERE hash = ?1",
                [hash],
                Self::row_to_link,
            )
            .optional()
            .with_context(|| "Failed to read artwork cache")
    }

    /// Later inserts for the same hash replace the earlier link.
    pub fn insert_artwork_link(&self, link: &ArtworkLink) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO artwork_links (hash, link, created_at)
                 VALUES (?1, ?2, ?3)",
                params![link.hash, link.link, link.created_at.to_rfc3339()],
            )
            .with_context(|| "Failed to insert artwork link")?;
        Ok(())
    }

    pub fn artwork_link_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM artwork_links", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear_artwork_links(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM artwork_links", [])
            .with_context(|| "Failed to clear artwork cache")?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artwork_link_crud() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_artwork_link("a;b;c").unwrap().is_none());

        let link = ArtworkLink::new(
            "a;b;c".to_string(),
            "https://imgcache.qq.com/music/photo/album_300/1/300_albumpic_1_0.jpg".to_string(),
        );
        db.insert_artwork_link(&link).unwrap();

        let cached = db.get_artwork_link("a;b;c").unwrap().unwrap();
        assert_eq!(cached.link, link.link);
        assert_eq!(db.artwork_link_count().unwrap(), 1);

        assert_eq!(db.clear_artwork_links().unwrap(), 1);
        assert_eq!(db.artwork_link_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_replaces_existing_hash() {
        let db = Database::open_in_memory().unwrap();
        db.insert_artwork_link(&ArtworkLink::new("k".to_string(), "old".to_string()))
            .unwrap();
        db.insert_artwork_link(&ArtworkLink::new("k".to_string(), "new".to_string()))
            .unwrap();

        assert_eq!(db.get_artwork_link("k").unwrap().unwrap().link, "new");
        assert_eq!(db.artwork_link_count().unwrap(), 1);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_artwork_link(&ArtworkLink::new("x".to_string(), "y".to_string()))
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_artwork_link("x").unwrap().unwrap().link, "y");
    }
}
