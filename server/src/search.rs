//! `tantivy`-backed `Search` adapter. Access filtering is
//! collection-scoped here: the search endpoint only asks this index for
//! hits within the collections a caller already passed a `read` access
//! check for, then re-fetches those ids through the CRUD engine (which
//! re-applies the full per-row access predicate) before returning them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use headway_core::{Error, Result, SearchDocument, SearchHit, SearchQuery, SearchResults};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema as TantivySchema, TextFieldIndexing, TextOptions, Value as _, STORED, STRING};
use tantivy::{doc, Index, IndexWriter, Term};
use tokio::sync::Mutex;

struct Fields {
    collection: Field,
    record_id: Field,
    locale: Field,
    title: Field,
    content: Field,
    metadata: Field,
}

pub struct TantivySearch {
    index: Index,
    fields: Fields,
    writer: Mutex<IndexWriter>,
}

fn build_schema() -> (TantivySchema, Fields) {
    let mut builder = TantivySchema::builder();
    let text_indexed = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("default")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    let collection = builder.add_text_field("collection", STRING | STORED);
    let record_id = builder.add_text_field("record_id", STRING | STORED);
    let locale = builder.add_text_field("locale", STRING | STORED);
    let title = builder.add_text_field("title", text_indexed.clone());
    let content = builder.add_text_field("content", text_indexed);
    let metadata = builder.add_text_field("metadata", STORED);
    let schema = builder.build();
    (
        schema,
        Fields {
            collection,
            record_id,
            locale,
            title,
            content,
            metadata,
        },
    )
}

impl TantivySearch {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Internal(e.to_string()))?;
        let (schema, fields) = build_schema();
        let directory = MmapDirectory::open(dir).map_err(|e| Error::Internal(e.to_string()))?;
        let index = Index::open_or_create(directory, schema).map_err(|e| Error::Internal(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            index,
            fields,
            writer: Mutex::new(writer),
        })
    }

    fn doc_term(&self, collection: &str, record_id: &str, locale: &str) -> Vec<Term> {
        vec![
            Term::from_field_text(self.fields.collection, collection),
            Term::from_field_text(self.fields.record_id, record_id),
            Term::from_field_text(self.fields.locale, locale),
        ]
    }
}

#[async_trait]
impl headway_core::Search for TantivySearch {
    async fn index(&self, doc: SearchDocument) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let terms = self.doc_term(&doc.collection, &doc.record_id, &doc.locale);
        for term in &terms {
            writer.delete_term(term.clone());
        }
        writer
            .add_document(doc!(
                self.fields.collection => doc.collection,
                self.fields.record_id => doc.record_id,
                self.fields.locale => doc.locale,
                self.fields.title => doc.title,
                self.fields.content => doc.content,
                self.fields.metadata => doc.metadata.map(|m| m.to_string()).unwrap_or_default(),
            ))
            .map_err(|e| Error::Internal(e.to_string()))?;
        writer.commit().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    async fn delete_record(&self, collection: &str, record_id: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.delete_term(Term::from_field_text(self.fields.collection, collection));
        writer.delete_term(Term::from_field_text(self.fields.record_id, record_id));
        writer.commit().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, query: SearchQuery) -> Result<SearchResults> {
        let reader = self
            .index
            .reader()
            .map_err(|e| Error::Internal(e.to_string()))?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        let text_query = query_parser
            .parse_query(&query.query)
            .map_err(|e| Error::BadRequest(format!("invalid search query: {e}")))?;

        let mut clauses: Vec<(Occur, Box<dyn tantivy::query::Query>)> = vec![(Occur::Must, text_query)];

        if let Some(collections) = &query.collections {
            let collection_clauses = collections
                .iter()
                .map(|c| {
                    let term = Term::from_field_text(self.fields.collection, c);
                    (
                        Occur::Should,
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn tantivy::query::Query>,
                    )
                })
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(collection_clauses))));
        }

        if let Some(locale) = &query.locale {
            let term = Term::from_field_text(self.fields.locale, locale);
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }

        let bool_query = BooleanQuery::new(clauses);
        let limit = query.limit.unwrap_or(20).max(1);
        let offset = query.offset.unwrap_or(0);

        let top_docs = searcher
            .search(&bool_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut hits = Vec::new();
        for (score, addr) in top_docs.into_iter().skip(offset) {
            let retrieved = searcher
                .doc::<tantivy::TantivyDocument>(addr)
                .map_err(|e| Error::Internal(e.to_string()))?;
            let collection = field_text(&retrieved, self.fields.collection);
            let record_id = field_text(&retrieved, self.fields.record_id);
            let title = field_text(&retrieved, self.fields.title);
            hits.push(SearchHit {
                collection,
                record_id,
                score,
                indexed_title: title,
                highlights: None,
            });
        }

        Ok(SearchResults {
            total: hits.len(),
            hits,
            facets: None,
        })
    }

    async fn reindex_collection(&self, collection: &str, docs: Vec<SearchDocument>) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            writer.delete_term(Term::from_field_text(self.fields.collection, collection));
            writer.commit().map_err(|e| Error::Internal(e.to_string()))?;
        }
        for doc in docs {
            self.index(doc).await?;
        }
        Ok(())
    }
}

fn field_text(doc: &tantivy::TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub fn shared(dir: &Path) -> Result<Arc<TantivySearch>> {
    Ok(Arc::new(TantivySearch::open_or_create(dir)?))
}
