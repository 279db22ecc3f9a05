//! Typed, annotated edges between cards.
//!
//! Invariants: both endpoints exist, no self-loops, and no two links share the
//! same `(from, to, type)` triple. Violations reject the operation before any
//! state changes.

use crate::cards::state::{ChangeSet, State};
use crate::cards::types::{id_order_key, normalize_link_type, Card, Link};
use crate::error::{Result, StoreError};

impl State {
    pub fn create_link(
        &mut self,
        from: &str,
        to: &str,
        link_type: Option<&str>,
        annotation: Option<&str>,
        cs: &mut ChangeSet,
    ) -> Result<Link> {
        for end in [from, to] {
            if !self.cards.contains_key(end) {
                return Err(StoreError::MissingEndpoint(end.to_string()));
            }
        }
        if from == to {
            return Err(StoreError::SelfLink(from.to_string()));
        }
        let link_type = normalize_link_type(link_type);
        if self.find_link(from, to, &link_type).is_some() {
            return Err(StoreError::DuplicateLink {
                from: from.to_string(),
                to: to.to_string(),
                link_type,
            });
        }

        let link = Link {
            id: self.allocate_link_id(),
            from: from.to_string(),
            to: to.to_string(),
            link_type,
            annotation: annotation.map(|a| a.trim().to_string()).unwrap_or_default(),
        };
        self.indexes.insert_link(&link);
        self.links.insert(link.id.clone(), link.clone());
        cs.link_created(&link.id);

        tracing::info!(
            link_id = %link.id,
            from = %link.from,
            to = %link.to,
            link_type = %link.link_type,
            "link created"
        );
        Ok(link)
    }

    /// Change a link's type and/or annotation. `None` for an unknown id.
    pub fn update_link(
        &mut self,
        id: &str,
        link_type: Option<&str>,
        annotation: Option<&str>,
        cs: &mut ChangeSet,
    ) -> Result<Option<Link>> {
        let Some(current) = self.links.get(id) else {
            return Ok(None);
        };
        let new_type = match link_type {
            Some(raw) => normalize_link_type(Some(raw)),
            None => current.link_type.clone(),
        };
        if new_type != current.link_type {
            if let Some(clash) = self.find_link(&current.from, &current.to, &new_type) {
                return Err(StoreError::DuplicateLink {
                    from: clash.from.clone(),
                    to: clash.to.clone(),
                    link_type: new_type,
                });
            }
        }

        let Some(link) = self.links.get_mut(id) else {
            return Ok(None);
        };
        link.link_type = new_type;
        if let Some(annotation) = annotation {
            link.annotation = annotation.trim().to_string();
        }
        let updated = link.clone();
        cs.link_updated(id);
        tracing::info!(link_id = %id, link_type = %updated.link_type, "link updated");
        Ok(Some(updated))
    }

    pub fn remove_link(&mut self, id: &str, cs: &mut ChangeSet) -> bool {
        let Some(link) = self.links.remove(id) else {
            return false;
        };
        self.indexes.remove_link(&link);
        cs.link_removed(id);
        tracing::info!(link_id = %id, "link removed");
        true
    }

    pub fn link(&self, id: &str) -> Option<&Link> {
        self.links.get(id)
    }

    /// Every link touching `card_id`, in id order.
    pub fn links_of(&self, card_id: &str) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .indexes
            .adjacency
            .links_of(card_id)
            .iter()
            .filter_map(|id| self.links.get(id).cloned())
            .collect();
        links.sort_by(|a, b| id_order_key(&a.id).cmp(&id_order_key(&b.id)));
        links
    }

    /// Distinct cards at the other end of `card_id`'s links.
    pub fn neighbors(&self, card_id: &str) -> Vec<Card> {
        let mut seen = std::collections::HashSet::new();
        self.links_of(card_id)
            .iter()
            .filter_map(|link| link.other_end(card_id))
            .filter(|other| seen.insert(other.to_string()))
            .filter_map(|other| self.cards.get(other).cloned())
            .collect()
    }

    pub fn list_links(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self.links.values().cloned().collect();
        links.sort_by(|a, b| id_order_key(&a.id).cmp(&id_order_key(&b.id)));
        links
    }

    pub(crate) fn find_link(&self, from: &str, to: &str, link_type: &str) -> Option<&Link> {
        self.indexes
            .adjacency
            .links_of(from)
            .iter()
            .filter_map(|id| self.links.get(id))
            .find(|l| l.from == from && l.to == to && l.link_type == link_type)
    }
}
