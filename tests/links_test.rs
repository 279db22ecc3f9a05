mod helpers;

use cardbox::cards::{CardInput, StoreEvent};
use cardbox::StoreError;
use helpers::{drain, plain_store};

async fn three_cards(store: &cardbox::CardStore) -> (String, String, String) {
    let mut ids = Vec::new();
    for title in ["alpha", "beta", "gamma"] {
        ids.push(store.create_card(CardInput::new(title)).await.unwrap().id);
    }
    (ids[0].clone(), ids[1].clone(), ids[2].clone())
}

#[tokio::test]
async fn invalid_links_are_rejected_without_side_effects() {
    let store = plain_store();
    let (a, b, _) = three_cards(&store).await;
    let mut rx = store.subscribe();

    assert!(matches!(
        store.create_link(&a, "404", None, None).await,
        Err(StoreError::MissingEndpoint(ref id)) if id == "404"
    ));
    assert!(matches!(
        store.create_link(&a, &a, None, None).await,
        Err(StoreError::SelfLink(_))
    ));

    store.create_link(&a, &b, Some("Cites"), None).await.unwrap();
    drain(&mut rx);
    let err = store
        .create_link(&a, &b, Some(" cites "), Some("again"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateLink { .. }));
    assert!(err.is_validation());

    assert_eq!(store.list_links().await.len(), 1);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn links_are_directed_and_typed() {
    let store = plain_store();
    let (a, b, c) = three_cards(&store).await;

    let ab = store.create_link(&a, &b, None, Some("see also")).await.unwrap();
    assert_eq!(ab.link_type, "related");
    assert_eq!(ab.annotation, "see also");
    store.create_link(&b, &a, None, None).await.unwrap();
    store.create_link(&a, &b, Some("extends"), None).await.unwrap();
    store.create_link(&c, &a, None, None).await.unwrap();

    assert_eq!(store.links_of(&a).await.len(), 4);
    assert_eq!(store.links_of(&c).await.len(), 1);

    let neighbors: Vec<String> = store.neighbors(&a).await.into_iter().map(|c| c.id).collect();
    assert_eq!(neighbors, vec![b.clone(), c.clone()]);
    assert_eq!(store.get_link(&ab.id).await, Some(ab));
}

#[tokio::test]
async fn update_changes_type_and_annotation() {
    let store = plain_store();
    let (a, b, _) = three_cards(&store).await;
    let link = store.create_link(&a, &b, None, None).await.unwrap();
    let mut rx = store.subscribe();

    let updated = store
        .update_link(&link.id, Some("Contradicts"), Some("  disagree on scope "))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.link_type, "contradicts");
    assert_eq!(updated.annotation, "disagree on scope");
    assert_eq!(store.get_link(&link.id).await.unwrap(), updated);

    let annotated = store
        .update_link(&link.id, None, Some("scope only"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(annotated.link_type, "contradicts");

    assert!(store.update_link("404", None, None).await.unwrap().is_none());
    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            StoreEvent::LinkUpdated {
                link_id: link.id.clone()
            },
            StoreEvent::LinkUpdated {
                link_id: link.id.clone()
            },
        ]
    );
}

#[tokio::test]
async fn removed_links_leave_the_adjacency_index() {
    let store = plain_store();
    let (a, b, _) = three_cards(&store).await;
    let link = store.create_link(&a, &b, None, None).await.unwrap();

    assert!(store.remove_link(&link.id).await);
    assert!(!store.remove_link(&link.id).await);
    assert!(store.links_of(&a).await.is_empty());
    assert!(store.neighbors(&b).await.is_empty());

    // The triple is free again once the old link is gone.
    let again = store.create_link(&a, &b, None, None).await.unwrap();
    assert_ne!(again.id, link.id);
}
