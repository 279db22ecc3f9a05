//! SQL DDL for the card record store.
//!
//! Defines the `cards`, `links` and `schema_meta` tables. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization. Tables added after v1 live
//! in [`super::migrations`].

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Card records. Tags and decks are JSON arrays; embedding is little-endian f32.
CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT,
    source TEXT,
    type TEXT NOT NULL DEFAULT 'text' CHECK(type IN ('text','image','audio','video','link')),
    tags TEXT NOT NULL DEFAULT '[]',
    decks TEXT NOT NULL DEFAULT '[]',
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    summary TEXT,
    illustration TEXT,
    embedding BLOB,
    search_text TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_cards_created ON cards(created_at);

-- Directed, typed edges between cards
CREATE TABLE IF NOT EXISTS links (
    id TEXT PRIMARY KEY,
    from_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
    type TEXT NOT NULL DEFAULT 'related',
    annotation TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_id);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"cards".to_string()));
        assert!(tables.contains(&"links".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn card_type_is_checked() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO cards (id, title, type, created_at) VALUES ('1', 't', 'podcast', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
