mod helpers;

use cardbox::cards::CardInput;
use cardbox::ai::AiCapabilities;
use cardbox::config::EnrichMode;
use cardbox::CardStore;
use helpers::{enriching_config, plain_store, semantic_store, FailingEmbedder, TopicEmbedder};
use std::sync::Arc;

async fn seed(store: &CardStore) -> (String, String, String) {
    let graph = store
        .create_card(CardInput::new("Dijkstra").content("Notes on graph algorithms"))
        .await
        .unwrap();
    let pasta = store
        .create_card(CardInput::new("Dinner").content("Tomato basil pasta recipe"))
        .await
        .unwrap();
    let music = store
        .create_card(CardInput::new("Practice").content("Guitar chord melody drills"))
        .await
        .unwrap();
    (graph.id, pasta.id, music.id)
}

#[tokio::test]
async fn semantic_search_ranks_the_closest_card_first() {
    let store = semantic_store();
    let (graph, _, _) = seed(&store).await;
    assert!(store.get_card(&graph).await.unwrap().embedding.is_some());

    let hits = store.search_by_semantic("graph algorithms", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].card.id, graph);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn semantic_search_respects_limit() {
    let store = semantic_store();
    for i in 0..4 {
        store
            .create_card(CardInput::new(format!("graph {i}")).content("graph vertex edge"))
            .await
            .unwrap();
    }
    let hits = store.search_by_semantic("graph", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(store.search_by_semantic("graph", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn semantic_search_falls_back_to_text_without_embeddings() {
    let store = plain_store();
    let (graph, _, _) = seed(&store).await;

    let hits = store.search_by_semantic("graph", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].card.id, graph);
}

#[tokio::test]
async fn semantic_search_falls_back_when_the_query_cannot_be_embedded() {
    let store = CardStore::builder(enriching_config(EnrichMode::Inline))
        .ai(AiCapabilities::none().with_embedder(Arc::new(FailingEmbedder)))
        .build();
    let card = store
        .create_card(CardInput::new("Pasta").content("basil").embedding(TopicEmbedder::vector("pasta")))
        .await
        .unwrap();

    let hits = store.search_by_semantic("basil", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].card.id, card.id);
}

#[tokio::test]
async fn text_search_finds_fuzzy_and_substring_matches() {
    let store = plain_store();
    let (graph, pasta, _) = seed(&store).await;

    let hits = store.search_by_text("algorithms", 10).await.unwrap();
    assert_eq!(hits[0].card.id, graph);

    // One edit away from "recipe".
    let hits = store.search_by_text("recipy", 10).await.unwrap();
    assert!(hits.iter().any(|h| h.card.id == pasta));

    // Substring of "tomato".
    let hits = store.search_by_text("omat", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].card.id, pasta);

    assert!(store.search_by_text("", 10).await.unwrap().is_empty());
    assert!(store.search_by_text("zzzz", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn text_search_tracks_updates_and_removals() {
    let store = plain_store();
    let (graph, pasta, _) = seed(&store).await;

    store.remove_card(&graph).await;
    assert!(store.search_by_text("algorithms", 10).await.unwrap().is_empty());

    store
        .update_card(
            &pasta,
            cardbox::cards::CardPatch {
                content: Some("Risotto with mushrooms".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(store.search_by_text("tomato", 10).await.unwrap().is_empty());
    assert_eq!(store.search_by_text("risotto", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tag_search_returns_cards_in_insertion_order() {
    let store = plain_store();
    let a = store
        .create_card(CardInput::new("a").tags(["rust"]))
        .await
        .unwrap();
    store.create_card(CardInput::new("b").tags(["go"])).await.unwrap();
    let c = store
        .create_card(CardInput::new("c").tags(["Rust", "wasm"]))
        .await
        .unwrap();

    let ids: Vec<String> = store
        .search_by_tag("RUST")
        .await
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![a.id, c.id]);
    assert!(store.search_by_tag("python").await.is_empty());
}
