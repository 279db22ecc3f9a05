mod helpers;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use cardbox::cards::{Card, CardInput, CardPatch, CardStore, ErrorKind, Link, StoreEvent};
use cardbox::db::{RecordStore, SqliteRecordStore};
use helpers::{drain, plain_config};

async fn open(path: &std::path::Path) -> CardStore {
    let records = SqliteRecordStore::open(path).unwrap();
    CardStore::builder(plain_config())
        .record_store(Arc::new(records))
        .open()
        .await
        .unwrap()
}

#[tokio::test]
async fn graph_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cards.db");

    let (a, b) = {
        let store = open(&path).await;
        let a = store
            .create_card(
                CardInput::new("Graphs")
                    .content("vertices")
                    .tags(["math"])
                    .decks(["reading"])
                    .embedding(vec![0.25, -1.0]),
            )
            .await
            .unwrap();
        let b = store.create_card(CardInput::new("Pasta")).await.unwrap();
        let c = store.create_card(CardInput::new("Gone")).await.unwrap();
        store.create_link(&a.id, &b.id, Some("cites"), Some("p. 4")).await.unwrap();
        store.create_link(&c.id, &a.id, None, None).await.unwrap();
        store.record_card_usage(&b.id).await;
        store.remove_card(&c.id).await;
        store
            .update_card(
                &b.id,
                CardPatch {
                    description: Some("weeknight".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (a, b)
    };

    let store = open(&path).await;
    let cards = store.list_cards().await;
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].id, a.id);
    assert_eq!(cards[0].embedding, Some(vec![0.25, -1.0]));
    assert_eq!(cards[1].description, "weeknight");

    assert_eq!(store.deck_cards("reading").await.len(), 1);
    assert_eq!(store.search_by_tag("math").await[0].id, a.id);
    let links = store.list_links().await;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].annotation, "p. 4");
    assert_eq!(store.usage(&b.id).await.unwrap().count, 1);
    assert!(store.get_deck("unseen").await.unwrap().cards.contains(&a.id));
}

#[tokio::test]
async fn snapshot_load_rewrites_the_record_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cards.db");

    {
        let store = open(&path).await;
        store.create_card(CardInput::new("replaced")).await.unwrap();
        let json = serde_json::json!({
            "cards": [
                {"id": "7", "title": "imported", "created_at": "2024-01-01T00:00:00Z"}
            ]
        });
        store.load_json(&json.to_string()).await.unwrap();
    }

    let titles: Vec<String> = open(&path)
        .await
        .list_cards()
        .await
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles, vec!["imported".to_string()]);
}

/// Accepts links and usage but refuses every card write.
struct BrokenCards;

#[async_trait]
impl RecordStore for BrokenCards {
    async fn save_card(&self, _card: &Card) -> Result<()> {
        bail!("disk full")
    }
    async fn delete_card(&self, _id: &str) -> Result<()> {
        bail!("disk full")
    }
    async fn load_cards(&self) -> Result<Vec<Card>> {
        Ok(Vec::new())
    }
    async fn save_link(&self, _link: &Link) -> Result<()> {
        Ok(())
    }
    async fn delete_link(&self, _id: &str) -> Result<()> {
        Ok(())
    }
    async fn load_links(&self) -> Result<Vec<Link>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn persistence_failures_become_error_events() {
    let store = CardStore::builder(plain_config())
        .record_store(Arc::new(BrokenCards))
        .open()
        .await
        .unwrap();
    let mut rx = store.subscribe();

    let card = store.create_card(CardInput::new("volatile")).await.unwrap();
    assert!(store.get_card(&card.id).await.is_some());

    let events = drain(&mut rx);
    let created = events
        .iter()
        .position(|e| e.event_type() == "card.created")
        .unwrap();
    let failure = events
        .iter()
        .position(|e| {
            matches!(
                e,
                StoreEvent::Error {
                    kind: ErrorKind::Persistence,
                    card_id: Some(id),
                    message,
                } if *id == card.id && message.contains("disk full")
            )
        })
        .unwrap();
    assert!(created < failure);
}
