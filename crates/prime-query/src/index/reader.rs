use std::path::Path;

use serde::Serialize;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Index, ReloadPolicy, Term};
use tracing::debug;

use super::schema::MemorySchema;
use crate::error::QueryError;

const SNIPPET_CHARS: usize = 160;

/// One retrieval hit: where the note lives, how well it matched and the text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
    pub snippet: String,
    pub category: String,
}

/// Searches the memory index.
pub struct MemorySearcher {
    schema: MemorySchema,
    index: Index,
}

impl MemorySearcher {
    /// Open an existing index for reading.
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        let schema = MemorySchema::new();
        let index = Index::open_in_dir(path)?;
        Ok(Self { schema, index })
    }

    /// Free-text search over content and category. With `tags`, only notes
    /// carrying at least one of them match.
    pub fn search(
        &self,
        query_str: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let searcher = reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.schema.content, self.schema.category]);
        let (text_query, errors) = query_parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            debug!(query = query_str, errors = errors.len(), "Lenient query parse");
        }

        let query: Box<dyn Query> = if tags.is_empty() {
            text_query
        } else {
            let tag_clauses: Vec<(Occur, Box<dyn Query>)> = tags
                .iter()
                .map(|tag| {
                    let term = Term::from_field_text(self.schema.tags, &tag.to_lowercase());
                    let q: Box<dyn Query> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, q)
                })
                .collect();
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, text_query),
                (Occur::Must, Box::new(BooleanQuery::new(tag_clauses))),
            ]))
        };

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: tantivy::TantivyDocument = searcher.doc(doc_address)?;
            let text = |field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let content = text(self.schema.content);
            hits.push(SearchHit {
                path: text(self.schema.path),
                score,
                snippet: content.chars().take(SNIPPET_CHARS).collect(),
                category: text(self.schema.category),
            });
        }

        Ok(hits)
    }
}
