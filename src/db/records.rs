//! Record-store contract and its SQLite implementation.
//!
//! The store persists every card and link mutation incrementally through
//! [`RecordStore`]; at startup the whole graph is loaded back. Row-level
//! functions take a `&Connection` and are synchronous; [`SqliteRecordStore`]
//! runs them on the blocking pool behind a shared connection.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::cards::types::{Card, CardType, Link, UsageStats};

/// Narrow persistence contract consumed by the card store. Every mutation is
/// independently fallible; the store reports failures as events.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_card(&self, card: &Card) -> Result<()>;
    async fn delete_card(&self, id: &str) -> Result<()>;
    /// All cards in the order they were first saved.
    async fn load_cards(&self) -> Result<Vec<Card>>;

    async fn save_link(&self, link: &Link) -> Result<()>;
    async fn delete_link(&self, id: &str) -> Result<()>;
    async fn load_links(&self) -> Result<Vec<Link>>;

    /// Usage persistence is optional; stores without it lose usage on restart.
    async fn save_usage(&self, _card_id: &str, _usage: &UsageStats) -> Result<()> {
        Ok(())
    }

    async fn load_usage(&self) -> Result<Vec<(String, UsageStats)>> {
        Ok(Vec::new())
    }
}

/// Insert or update a card row. An update keeps the row's position.
pub fn upsert_card(conn: &Connection, card: &Card) -> Result<()> {
    let tags = serde_json::to_string(&card.tags)?;
    let decks = serde_json::to_string(&card.decks)?;
    let embedding = card.embedding.as_deref().map(embedding_to_bytes);
    conn.execute(
        "INSERT INTO cards (id, title, content, source, type, tags, decks, description, \
         created_at, summary, illustration, embedding, search_text) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT(id) DO UPDATE SET \
         title = excluded.title, content = excluded.content, source = excluded.source, \
         type = excluded.type, tags = excluded.tags, decks = excluded.decks, \
         description = excluded.description, created_at = excluded.created_at, \
         summary = excluded.summary, illustration = excluded.illustration, \
         embedding = excluded.embedding, search_text = excluded.search_text",
        params![
            card.id,
            card.title,
            card.content,
            card.source,
            card.card_type.as_str(),
            tags,
            decks,
            card.description,
            card.created_at.to_rfc3339(),
            card.summary,
            card.illustration,
            embedding,
            card.search_text,
        ],
    )?;
    Ok(())
}

pub fn delete_card(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM cards WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn get_card(conn: &Connection, id: &str) -> Result<Option<Card>> {
    let row = conn
        .query_row(
            &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
            params![id],
            CardRow::from_row,
        )
        .optional()?;
    row.map(CardRow::into_card).transpose()
}

pub fn load_cards(conn: &Connection) -> Result<Vec<Card>> {
    let mut stmt = conn.prepare(&format!("SELECT {CARD_COLUMNS} FROM cards ORDER BY rowid"))?;
    let rows = stmt
        .query_map([], CardRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(CardRow::into_card).collect()
}

pub fn upsert_link(conn: &Connection, link: &Link) -> Result<()> {
    conn.execute(
        "INSERT INTO links (id, from_id, to_id, type, annotation) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(id) DO UPDATE SET from_id = excluded.from_id, to_id = excluded.to_id, \
         type = excluded.type, annotation = excluded.annotation",
        params![link.id, link.from, link.to, link.link_type, link.annotation],
    )?;
    Ok(())
}

pub fn delete_link(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM links WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn load_links(conn: &Connection) -> Result<Vec<Link>> {
    let mut stmt =
        conn.prepare("SELECT id, from_id, to_id, type, annotation FROM links ORDER BY rowid")?;
    let links = stmt
        .query_map([], |row| {
            Ok(Link {
                id: row.get(0)?,
                from: row.get(1)?,
                to: row.get(2)?,
                link_type: row.get(3)?,
                annotation: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn upsert_usage(conn: &Connection, card_id: &str, usage: &UsageStats) -> Result<()> {
    conn.execute(
        "INSERT INTO card_usage (card_id, count, last_opened) VALUES (?1, ?2, ?3) \
         ON CONFLICT(card_id) DO UPDATE SET count = excluded.count, last_opened = excluded.last_opened",
        params![
            card_id,
            usage.count,
            usage.last_opened.map(|t| t.to_rfc3339())
        ],
    )?;
    Ok(())
}

pub fn load_usage(conn: &Connection) -> Result<Vec<(String, UsageStats)>> {
    let mut stmt = conn.prepare("SELECT card_id, count, last_opened FROM card_usage")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(id, count, last_opened)| {
            let last_opened = last_opened.as_deref().map(parse_timestamp).transpose()?;
            Ok((id, UsageStats { count, last_opened }))
        })
        .collect()
}

const CARD_COLUMNS: &str = "id, title, content, source, type, tags, decks, description, \
                            created_at, summary, illustration, embedding, search_text";

/// Raw column values; conversion to [`Card`] can fail on malformed data.
struct CardRow {
    id: String,
    title: String,
    content: Option<String>,
    source: Option<String>,
    card_type: String,
    tags: String,
    decks: String,
    description: String,
    created_at: String,
    summary: Option<String>,
    illustration: Option<String>,
    embedding: Option<Vec<u8>>,
    search_text: String,
}

impl CardRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            source: row.get(3)?,
            card_type: row.get(4)?,
            tags: row.get(5)?,
            decks: row.get(6)?,
            description: row.get(7)?,
            created_at: row.get(8)?,
            summary: row.get(9)?,
            illustration: row.get(10)?,
            embedding: row.get(11)?,
            search_text: row.get(12)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags)
            .with_context(|| format!("bad tags for card {}", self.id))?;
        let decks: BTreeSet<String> = serde_json::from_str(&self.decks)
            .with_context(|| format!("bad decks for card {}", self.id))?;
        let card_type: CardType = self
            .card_type
            .parse()
            .map_err(|e: String| anyhow!("card {}: {e}", self.id))?;
        let embedding = self.embedding.as_deref().map(bytes_to_embedding).transpose()?;
        Ok(Card {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            title: self.title,
            content: self.content,
            source: self.source,
            card_type,
            tags,
            decks,
            description: self.description,
            summary: self.summary,
            illustration: self.illustration,
            embedding,
            search_text: self.search_text,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp: {raw}"))?
        .with_timezone(&Utc))
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    anyhow::ensure!(
        bytes.len() % 4 == 0,
        "embedding blob length {} is not a multiple of 4",
        bytes.len()
    );
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// SQLite-backed [`RecordStore`]. The connection is shared behind a mutex and
/// every call runs on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(super::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(super::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            f(&conn)
        })
        .await
        .context("db task failed")?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save_card(&self, card: &Card) -> Result<()> {
        let card = card.clone();
        self.with_conn(move |conn| upsert_card(conn, &card)).await
    }

    async fn delete_card(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| delete_card(conn, &id)).await
    }

    async fn load_cards(&self) -> Result<Vec<Card>> {
        self.with_conn(load_cards).await
    }

    async fn save_link(&self, link: &Link) -> Result<()> {
        let link = link.clone();
        self.with_conn(move |conn| upsert_link(conn, &link)).await
    }

    async fn delete_link(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| delete_link(conn, &id)).await
    }

    async fn load_links(&self) -> Result<Vec<Link>> {
        self.with_conn(load_links).await
    }

    async fn save_usage(&self, card_id: &str, usage: &UsageStats) -> Result<()> {
        let card_id = card_id.to_string();
        let usage = *usage;
        self.with_conn(move |conn| upsert_usage(conn, &card_id, &usage))
            .await
    }

    async fn load_usage(&self) -> Result<Vec<(String, UsageStats)>> {
        self.with_conn(load_usage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn card(id: &str, title: &str) -> Card {
        let mut card = Card {
            id: id.into(),
            title: title.into(),
            content: Some("body".into()),
            source: None,
            card_type: CardType::Text,
            tags: ["rust".to_string()].into_iter().collect(),
            decks: ["inbox".to_string()].into_iter().collect(),
            description: "desc".into(),
            created_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            summary: None,
            illustration: None,
            embedding: Some(vec![0.5, -1.25, 3.0]),
            search_text: String::new(),
        };
        card.refresh_search_text();
        card
    }

    #[test]
    fn card_rows_preserve_every_field() {
        let conn = open_memory_database().unwrap();
        let original = card("1", "Title");
        upsert_card(&conn, &original).unwrap();

        let loaded = get_card(&conn, "1").unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(get_card(&conn, "2").unwrap().is_none());
    }

    #[test]
    fn upsert_keeps_load_order() {
        let conn = open_memory_database().unwrap();
        upsert_card(&conn, &card("b", "first")).unwrap();
        upsert_card(&conn, &card("a", "second")).unwrap();
        upsert_card(&conn, &card("b", "first, edited")).unwrap();

        let ids: Vec<String> = load_cards(&conn).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn deleting_a_card_cascades_links_and_usage() {
        let conn = open_memory_database().unwrap();
        upsert_card(&conn, &card("1", "a")).unwrap();
        upsert_card(&conn, &card("2", "b")).unwrap();
        upsert_link(
            &conn,
            &Link {
                id: "1".into(),
                from: "1".into(),
                to: "2".into(),
                link_type: "related".into(),
                annotation: String::new(),
            },
        )
        .unwrap();
        upsert_usage(
            &conn,
            "1",
            &UsageStats {
                count: 2,
                last_opened: Some(Utc::now()),
            },
        )
        .unwrap();

        delete_card(&conn, "1").unwrap();
        assert!(load_links(&conn).unwrap().is_empty());
        assert!(load_usage(&conn).unwrap().is_empty());
    }

    #[test]
    fn corrupt_embedding_blob_is_rejected() {
        assert!(bytes_to_embedding(&[0, 1, 2]).is_err());
        assert_eq!(
            bytes_to_embedding(&embedding_to_bytes(&[1.5, -2.0])).unwrap(),
            vec![1.5, -2.0]
        );
    }
}
