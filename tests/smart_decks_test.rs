mod helpers;

use cardbox::cards::{CardInput, CardPatch, StoreEvent};
use chrono::{Duration, Utc};
use helpers::{drain, plain_store};

#[tokio::test]
async fn frequent_holds_the_five_most_used_cards() {
    let store = plain_store();
    let mut ids = Vec::new();
    for i in 0..7 {
        ids.push(store.create_card(CardInput::new(format!("c{i}"))).await.unwrap().id);
    }
    for _ in 0..3 {
        store.record_card_usage(&ids[5]).await;
    }
    store.record_card_usage(&ids[6]).await;

    let frequent = store.get_deck("frequent").await.unwrap().cards;
    assert_eq!(frequent.len(), 5);
    assert!(frequent.contains(&ids[5]));
    assert!(frequent.contains(&ids[6]));
    // Ties among unused cards keep insertion order.
    for id in &ids[..3] {
        assert!(frequent.contains(id), "{id} missing from frequent");
    }
    assert!(!frequent.contains(&ids[3]));
    assert!(store.get_card(&ids[5]).await.unwrap().decks.contains("frequent"));
}

#[tokio::test]
async fn usage_moves_cards_between_unseen_and_stale() {
    let store = plain_store();
    let fresh = store.create_card(CardInput::new("fresh")).await.unwrap();
    let old = store.create_card(CardInput::new("old")).await.unwrap();

    store.record_card_usage(&fresh.id).await;
    store
        .record_card_usage_at(&old.id, Utc::now() - Duration::days(45))
        .await;

    let unseen = store.get_deck("unseen").await.unwrap().cards;
    assert!(unseen.is_empty());
    let stale = store.get_deck("stale").await.unwrap().cards;
    assert!(stale.contains(&old.id));
    assert!(!stale.contains(&fresh.id));
}

#[tokio::test]
async fn old_cards_are_not_recent() {
    let store = plain_store();
    let old = store
        .create_card(CardInput::new("old").created_at(Utc::now() - Duration::days(10)))
        .await
        .unwrap();
    let new = store.create_card(CardInput::new("new")).await.unwrap();

    let recent = store.get_deck("recent").await.unwrap().cards;
    assert!(recent.contains(&new.id));
    assert!(!recent.contains(&old.id));
    assert!(!old.decks.contains("recent"));
}

#[tokio::test]
async fn tag_deck_exists_only_while_three_cards_share_the_tag() {
    let store = plain_store();
    let mut ids = Vec::new();
    for i in 0..2 {
        ids.push(
            store
                .create_card(CardInput::new(format!("c{i}")).tags(["x"]))
                .await
                .unwrap()
                .id,
        );
    }
    assert!(store.get_deck("tag:x").await.is_none());

    let mut rx = store.subscribe();
    let third = store
        .create_card(CardInput::new("c2").tags(["X"]))
        .await
        .unwrap();
    let deck = store.get_deck("tag:x").await.unwrap();
    assert_eq!(deck.cards.len(), 3);
    assert!(third.decks.contains("tag:x"));
    assert!(drain(&mut rx).contains(&StoreEvent::DeckUpdated {
        name: "tag:x".into()
    }));

    store
        .update_card(
            &ids[0],
            CardPatch {
                tags: Some(vec!["y".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(store.get_deck("tag:x").await.is_none());
    assert!(drain(&mut rx).contains(&StoreEvent::DeckRemoved {
        name: "tag:x".into()
    }));
    for id in &ids[1..] {
        assert!(!store.get_card(id).await.unwrap().decks.contains("tag:x"));
    }
}

#[tokio::test]
async fn unchanged_refresh_publishes_nothing() {
    let store = plain_store();
    store.create_card(CardInput::new("a")).await.unwrap();
    let mut rx = store.subscribe();

    store.refresh_smart_decks().await;
    assert!(drain(&mut rx).is_empty());
}
