//! Cheap local enrichment that runs inline on every create/update.

use crate::cards::types::Card;

/// Maximum number of tags derived from a card's text.
pub const MAX_DERIVED_TAGS: usize = 3;
/// Words must be longer than this to become a derived tag.
pub const MIN_TAG_WORD_LEN: usize = 3;
/// Derived descriptions are truncated to this many characters.
pub const DESCRIPTION_LEN: usize = 100;
/// Upper bound for the fallback summary.
pub const FALLBACK_SUMMARY_LEN: usize = 200;

/// Up to three distinct lowercase words longer than three characters, longest
/// first. Words of equal length keep their order of appearance.
pub fn derive_tags(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() <= MIN_TAG_WORD_LEN {
            continue;
        }
        let word = word.to_lowercase();
        if !words.contains(&word) {
            words.push(word);
        }
    }
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    words.truncate(MAX_DERIVED_TAGS);
    words
}

pub fn derive_description(text: &str) -> String {
    truncate_chars(text.trim(), DESCRIPTION_LEN).to_string()
}

/// Fill in tags and description when the card has none. Returns whether
/// anything changed.
pub fn apply(card: &mut Card) -> bool {
    fill(card, true, true)
}

/// Like [`apply`], restricted to the fields the caller leaves to the
/// heuristics. An update that sets tags explicitly (even to nothing) passes
/// `tags = false` so the user's choice stands.
pub fn fill(card: &mut Card, tags: bool, description: bool) -> bool {
    let basis = card.text_basis().to_string();
    let mut changed = false;
    if tags && card.tags.is_empty() {
        let tags = derive_tags(&basis);
        if !tags.is_empty() {
            card.tags.extend(tags);
            changed = true;
        }
    }
    if description && card.description.trim().is_empty() {
        let description = derive_description(&basis);
        if !description.is_empty() {
            card.description = description;
            changed = true;
        }
    }
    if changed {
        card.refresh_search_text();
    }
    changed
}

/// First sentence of the card's text basis, bounded in length. Used when no
/// summarizer capability is configured.
pub fn fallback_summary(card: &Card) -> String {
    let basis = card.text_basis().trim();
    let sentence_end = basis
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(basis.len());
    truncate_chars(&basis[..sentence_end], FALLBACK_SUMMARY_LEN).to_string()
}

/// Prefix of `text` holding at most `max` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
