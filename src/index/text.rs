//! Fuzzy full-text index over card title, content, description and tags.
//!
//! Backed by an in-RAM Tantivy index that is rebuilt wholesale whenever the card
//! collection changes. Mutations only mark the index dirty; the rebuild happens
//! on the next query so a burst of mutations costs a single rebuild.

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::cards::types::Card;

/// Per-thread arena size Tantivy requires at minimum.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// Query terms shorter than this are not expanded fuzzily.
const MIN_FUZZY_TERM_LEN: usize = 3;

#[derive(Clone, Copy)]
struct TextFields {
    id: Field,
    title: Field,
    content: Field,
    description: Field,
    tags: Field,
}

impl TextFields {
    fn searchable(&self) -> [Field; 4] {
        [self.title, self.content, self.description, self.tags]
    }
}

struct BuiltIndex {
    index: Index,
    reader: IndexReader,
}

pub struct TextIndex {
    schema: Schema,
    fields: TextFields,
    built: Option<BuiltIndex>,
    dirty: bool,
}

impl std::fmt::Debug for TextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextIndex")
            .field("built", &self.built.is_some())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Default for TextIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TextIndex {
    pub fn new() -> Self {
        let mut builder = Schema::builder();
        let fields = TextFields {
            id: builder.add_text_field("id", STRING | STORED),
            title: builder.add_text_field("title", TEXT),
            content: builder.add_text_field("content", TEXT),
            description: builder.add_text_field("description", TEXT),
            tags: builder.add_text_field("tags", TEXT),
        };
        Self {
            schema: builder.build(),
            fields,
            built: None,
            dirty: true,
        }
    }

    /// Flag the index for a wholesale rebuild before the next query.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild from `cards` if anything changed since the last build.
    pub fn ensure_fresh<'a>(
        &mut self,
        cards: impl IntoIterator<Item = &'a Card>,
    ) -> tantivy::Result<()> {
        if self.dirty {
            self.rebuild(cards)?;
        }
        Ok(())
    }

    /// Replace the whole index with one built from `cards`.
    pub fn rebuild<'a>(&mut self, cards: impl IntoIterator<Item = &'a Card>) -> tantivy::Result<()> {
        let index = Index::create_in_ram(self.schema.clone());
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let f = self.fields;
        let mut count = 0usize;
        for card in cards {
            let tags = card.tags.iter().cloned().collect::<Vec<_>>().join(" ");
            writer.add_document(doc!(
                f.id => card.id.as_str(),
                f.title => card.title.as_str(),
                f.content => card.content.as_deref().unwrap_or(""),
                f.description => card.description.as_str(),
                f.tags => tags,
            ))?;
            count += 1;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        self.built = Some(BuiltIndex { index, reader });
        self.dirty = false;
        tracing::debug!(cards = count, "text index rebuilt");
        Ok(())
    }

    /// Ranked `(card_id, score)` pairs for `query`. Combines a lenient parse of
    /// the query with prefix-fuzzy (edit distance 1) expansions of each term.
    pub fn search(&self, query: &str, limit: usize) -> tantivy::Result<Vec<(String, f32)>> {
        let Some(built) = &self.built else {
            return Ok(Vec::new());
        };
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fields;

        let mut parser = QueryParser::for_index(&built.index, f.searchable().to_vec());
        parser.set_field_boost(f.title, 2.0);
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Should, parsed)];
        for term in query.split_whitespace() {
            let term = term.to_lowercase();
            if term.chars().count() < MIN_FUZZY_TERM_LEN {
                continue;
            }
            for field in f.searchable() {
                let fuzzy =
                    FuzzyTermQuery::new_prefix(Term::from_field_text(field, &term), 1, true);
                clauses.push((Occur::Should, Box::new(fuzzy)));
            }
        }
        let combined = BooleanQuery::new(clauses);

        let searcher = built.reader.searcher();
        let top_docs = searcher.search(&combined, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(f.id).and_then(|v| v.as_str()) {
                hits.push((id.to_string(), score));
            }
        }
        Ok(hits)
    }
}
