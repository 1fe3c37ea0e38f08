//! Keyword index using Tantivy (BM25)
//!
//! The keyword leg of hybrid search. In-RAM by default; pass a path for
//! an mmap-backed index. BM25 scores are normalized by the top score so
//! they combine linearly with vector scores.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};
use uuid::Uuid;

use sentinel_core::KnowledgeEntity;

use crate::KnowledgeError;

/// Keyword index over entity title, content and tags.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    title_field: Field,
    content_field: Field,
    tags_field: Field,
}

impl KeywordIndex {
    /// In-RAM index when `index_path` is `None`.
    pub fn new(index_path: Option<&str>) -> Result<Self, KnowledgeError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("entity_text")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let title_field = schema_builder.add_text_field("title", text_options.clone());
        let content_field = schema_builder.add_text_field("content", text_options.clone());
        let tags_field = schema_builder.add_text_field("tags", text_options);
        let schema = schema_builder.build();

        let index = match index_path {
            Some(path) => {
                let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                    .map_err(|e| KnowledgeError::Index(e.to_string()))?;
                Index::open_or_create(dir, schema)
                    .map_err(|e| KnowledgeError::Index(e.to_string()))?
            }
            None => Index::create_in_ram(schema),
        };

        let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build();
        index.tokenizers().register("entity_text", tokenizer);

        let reader = index
            .reader()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            title_field,
            content_field,
            tags_field,
        })
    }

    /// Insert or replace one entity's searchable text.
    pub fn upsert(&self, entity: &KnowledgeEntity) -> Result<(), KnowledgeError> {
        let mut writer = self.writer.lock();
        let id = entity.entity_id.to_string();
        writer.delete_term(Term::from_field_text(self.id_field, &id));
        writer
            .add_document(tantivy::doc!(
                self.id_field => id,
                self.title_field => entity.title.clone(),
                self.content_field => entity.content.clone(),
                self.tags_field => entity.tags.join(" "),
            ))
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        writer
            .commit()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        drop(writer);
        self.reader
            .reload()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, entity_id: Uuid) -> Result<(), KnowledgeError> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id_field, &entity_id.to_string()));
        writer
            .commit()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        drop(writer);
        self.reader
            .reload()
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search, scores normalized into [0, 1] by the top score.
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<(Uuid, f64)>, KnowledgeError> {
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(
            &self.index,
            vec![self.title_field, self.content_field, self.tags_field],
        );
        // Lenient parse: entity content is arbitrary user text, not a
        // query language.
        let (query, _errors) = parser.parse_query_lenient(text);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KnowledgeError::Index(e.to_string()))?;

        let mut results: Vec<(Uuid, f64)> = Vec::with_capacity(top_docs.len());
        let mut best: HashMap<Uuid, f64> = HashMap::new();
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| KnowledgeError::Index(e.to_string()))?;
            let Some(OwnedValue::Str(id)) = doc.get_first(self.id_field) else {
                continue;
            };
            let Ok(entity_id) = Uuid::parse_str(id) else {
                continue;
            };
            let score = score as f64;
            let entry = best.entry(entity_id).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }

        let max_score = best.values().cloned().fold(0.0f64, f64::max);
        if max_score > 0.0 {
            for (entity_id, score) in best {
                results.push((entity_id, score / max_score));
            }
        }
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{KnowledgeDomain, KnowledgeType};

    fn entity(title: &str, content: &str, tags: &[&str]) -> KnowledgeEntity {
        KnowledgeEntity::new(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Fact,
            title,
            content,
        )
        .with_tags(tags.iter().copied())
    }

    #[test]
    fn test_keyword_search_ranks_matches() {
        let index = KeywordIndex::new(None).unwrap();
        let strong = entity(
            "OFAC sanctions update",
            "New OFAC sanctions list update for screening",
            &["sanctions", "ofac"],
        );
        let weak = entity(
            "Vendor onboarding",
            "Vendor onboarding checklist mentions sanctions once",
            &["procurement"],
        );
        index.upsert(&strong).unwrap();
        index.upsert(&weak).unwrap();

        let results = index.search("OFAC sanctions", 10).unwrap();
        assert_eq!(results[0].0, strong.entity_id);
        assert_eq!(results[0].1, 1.0);
        assert!(results.len() >= 1);
    }

    #[test]
    fn test_upsert_replaces_document() {
        let index = KeywordIndex::new(None).unwrap();
        let mut doc = entity("AML thresholds", "transaction thresholds", &[]);
        index.upsert(&doc).unwrap();

        doc.content = "completely different subject".to_string();
        index.upsert(&doc).unwrap();

        let results = index.search("thresholds", 10).unwrap();
        // Title still matches; the document exists exactly once.
        assert!(results.len() <= 1);
    }

    #[test]
    fn test_remove_deletes_document() {
        let index = KeywordIndex::new(None).unwrap();
        let doc = entity("KYC rules", "customer due diligence", &[]);
        index.upsert(&doc).unwrap();
        index.remove(doc.entity_id).unwrap();
        assert!(index.search("diligence", 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_is_empty() {
        let index = KeywordIndex::new(None).unwrap();
        assert!(index.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        let doc = entity(
            "Sanctions list",
            "OFAC screening requirements for counterparties",
            &["sanctions"],
        );

        {
            let index = KeywordIndex::new(Some(&path)).unwrap();
            index.upsert(&doc).unwrap();
            let results = index.search("screening", 10).unwrap();
            assert_eq!(results[0].0, doc.entity_id);
            // Writer lock releases on drop so the directory can reopen.
        }

        let reopened = KeywordIndex::new(Some(&path)).unwrap();
        let results = reopened.search("screening", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, doc.entity_id);
    }
}
