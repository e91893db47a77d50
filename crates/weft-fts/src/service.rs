//! High-level search entry point.
//!
//! [`SearchService`] validates queries against the model type's field
//! specification, runs them on the routed backend, then re-hydrates the
//! hits into host objects through an [`ObjectLookup`]. Hydration keeps
//! the backend's ranking order and silently drops hits whose object no
//! longer exists (the index may lag deletes).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use weft_core::{DocumentId, Error, FieldName, ModelType, Result, SpecRegistry};
use weft_query::{PlainTextOperator, QueryNode, validate};

use crate::backend::{BoundBackend, FacetCount, Ordering, Pagination, SearchBackend};

/// Fetches host objects for a set of document ids. Ids with no backing
/// object are simply left out of the response.
#[async_trait]
pub trait ObjectLookup<T>: Send + Sync {
    async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<(DocumentId, T)>>;
}

/// One hydrated search result.
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub id: DocumentId,
    pub score: f32,
    pub object: T,
}

/// Validating, hydrating facade over the configured backends.
pub struct SearchService<T> {
    registry: Arc<SpecRegistry>,
    backends: Vec<BoundBackend>,
    lookup: Arc<dyn ObjectLookup<T>>,
}

impl<T: Send> SearchService<T> {
    pub fn new(
        registry: Arc<SpecRegistry>,
        backends: Vec<BoundBackend>,
        lookup: Arc<dyn ObjectLookup<T>>,
    ) -> Self {
        Self {
            registry,
            backends,
            lookup,
        }
    }

    fn backend_for(&self, model_type: &ModelType) -> Result<&Arc<dyn SearchBackend>> {
        self.backends
            .iter()
            .find(|bound| bound.handles(model_type))
            .map(|bound| &bound.backend)
            .ok_or_else(|| {
                Error::operation(format!("no backend indexes model type '{model_type}'"))
            })
    }

    /// Run a structured query.
    pub async fn search(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        page: Pagination,
        order: &Ordering,
    ) -> Result<Vec<SearchResult<T>>> {
        let spec = self.registry.get(model_type)?;
        validate(query, &spec)?;
        let backend = self.backend_for(model_type)?;
        let hits = backend.search(model_type, query, page, order).await?;
        self.hydrate(hits).await
    }

    /// Run a free-text query. Blank input matches nothing.
    pub async fn search_plain(
        &self,
        model_type: &ModelType,
        text: &str,
        operator: PlainTextOperator,
        page: Pagination,
    ) -> Result<Vec<SearchResult<T>>> {
        let Some(query) = QueryNode::plain_text(text, operator) else {
            return Ok(Vec::new());
        };
        self.search(model_type, &query, page, &Ordering::Relevance)
            .await
    }

    /// Prefix completion against the model type's autocomplete field.
    pub async fn autocomplete(&self, model_type: &ModelType, prefix: &str) -> Result<Vec<T>> {
        let spec = self.registry.get(model_type)?;
        let field = spec.autocomplete_field().ok_or_else(|| {
            Error::invalid_query(format!(
                "model type '{model_type}' has no autocomplete field"
            ))
        })?;
        let backend = self.backend_for(model_type)?;
        let ids = backend
            .autocomplete(model_type, prefix, &field.name)
            .await?;
        let fetched = self.lookup.fetch(&ids).await?;
        let mut by_id: HashMap<DocumentId, T> = fetched.into_iter().collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// Break a query's result set down by the distinct values of a
    /// filterable field.
    pub async fn facet(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        field: &str,
    ) -> Result<Vec<FacetCount>> {
        let spec = self.registry.get(model_type)?;
        validate(query, &spec)?;
        let name = FieldName::new(field)
            .map_err(|_| Error::invalid_query(format!("malformed field name '{field}'")))?;
        let backend = self.backend_for(model_type)?;
        backend.facet(model_type, query, &name).await
    }

    async fn hydrate(&self, hits: Vec<crate::backend::SearchHit>) -> Result<Vec<SearchResult<T>>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DocumentId> = hits.iter().map(|hit| hit.id.clone()).collect();
        let fetched = self.lookup.fetch(&ids).await?;
        let mut by_id: HashMap<DocumentId, T> = fetched.into_iter().collect();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match by_id.remove(&hit.id) {
                Some(object) => results.push(SearchResult {
                    id: hit.id,
                    score: hit.score,
                    object,
                }),
                // The index can briefly reference objects deleted since
                // the last update.
                None => log::debug!("dropping hit '{}': object no longer exists", hit.id),
            }
        }
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WriteTarget;
    use crate::document::{Document, FieldValue};
    use crate::sqlite::SqliteBackend;
    use weft_core::{FieldSpec, SearchableField};
    use weft_query::{FilterOperator, FilterValue};

    struct MapLookup {
        objects: HashMap<DocumentId, String>,
    }

    #[async_trait]
    impl ObjectLookup<String> for MapLookup {
        async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<(DocumentId, String)>> {
            Ok(ids
                .iter()
                .filter_map(|id| {
                    self.objects
                        .get(id)
                        .map(|title| (id.clone(), title.clone()))
                })
                .collect())
        }
    }

    fn registry() -> Arc<SpecRegistry> {
        let registry = SpecRegistry::new();
        let spec = FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title"))
            .field(SearchableField::autocomplete("suggest"))
            .field(SearchableField::keyword("topic"))
            .build()
            .unwrap();
        registry.register(spec).unwrap();
        Arc::new(registry)
    }

    fn page_id(pk: &str) -> DocumentId {
        DocumentId::new(ModelType::new("page").unwrap(), pk)
    }

    fn page_doc(pk: &str, title: &str) -> Document {
        let topic = title
            .rsplit(' ')
            .next()
            .unwrap_or(title)
            .to_lowercase();
        Document::new(page_id(pk))
            .with_value("title", FieldValue::Text(title.to_lowercase()))
            .with_value("suggest", FieldValue::Text(title.to_lowercase()))
            .with_value("topic", FieldValue::Keyword(topic))
    }

    async fn service(titles: &[(&str, &str)]) -> (SearchService<String>, Arc<SqliteBackend>) {
        let registry = registry();
        let page = ModelType::new("page").unwrap();
        let backend = Arc::new(
            SqliteBackend::connect("local", "sqlite::memory:", Arc::clone(&registry))
                .await
                .unwrap(),
        );
        let generation = backend.create_generation(&page).await.unwrap();
        let docs: Vec<Document> = titles.iter().map(|(pk, t)| page_doc(pk, t)).collect();
        backend
            .add_documents(&WriteTarget::Generation(generation.clone()), &docs)
            .await
            .unwrap();
        backend.promote(&generation).await.unwrap();

        let lookup = MapLookup {
            objects: titles
                .iter()
                .map(|(pk, t)| (page_id(pk), t.to_string()))
                .collect(),
        };
        let service = SearchService::new(
            registry,
            vec![BoundBackend {
                backend: backend.clone(),
                model_types: vec![],
            }],
            Arc::new(lookup),
        );
        (service, backend)
    }

    #[tokio::test]
    async fn test_search_hydrates_objects() {
        let (service, _backend) =
            service(&[("1", "Red Fox"), ("2", "Grey Wolf")]).await;
        let page = ModelType::new("page").unwrap();
        let results = service
            .search_plain(&page, "fox", PlainTextOperator::Or, Pagination::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object, "Red Fox");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_blank_plain_text_matches_nothing() {
        let (service, _backend) = service(&[("1", "Red Fox")]).await;
        let page = ModelType::new("page").unwrap();
        let results = service
            .search_plain(&page, "   ", PlainTextOperator::Or, Pagination::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_stale_hits_are_dropped() {
        let (service, _backend) =
            service(&[("1", "Red Fox"), ("2", "Fox Den")]).await;
        let page = ModelType::new("page").unwrap();

        // Index knows both documents, the lookup only has "1"; build a
        // fresh service whose lookup lost "2".
        let lookup = MapLookup {
            objects: [(page_id("1"), "Red Fox".to_string())].into_iter().collect(),
        };
        let stale = SearchService::new(
            registry(),
            service.backends.clone(),
            Arc::new(lookup),
        );
        let results = stale
            .search_plain(&page, "fox", PlainTextOperator::Or, Pagination::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.pk, "1");
    }

    #[tokio::test]
    async fn test_invalid_query_rejected_before_backend() {
        let (service, _backend) = service(&[("1", "Red Fox")]).await;
        let page = ModelType::new("page").unwrap();
        let query = QueryNode::filter(
            "missing",
            FilterOperator::Exact,
            FilterValue::Keyword("x".into()),
        );
        let err = service
            .search(&page, &query, Pagination::default(), &Ordering::Relevance)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_facet_breaks_down_result_set() {
        let (service, _backend) = service(&[
            ("1", "Red Fox"),
            ("2", "Rusty Fox"),
            ("3", "Grey Wolf"),
        ])
        .await;
        let page = ModelType::new("page").unwrap();

        let counts = service
            .facet(&page, &QueryNode::term("fox"), "topic")
            .await
            .unwrap();
        assert_eq!(
            counts,
            vec![FacetCount { value: Some("fox".to_string()), count: 2 }]
        );

        // Full-text fields cannot be faceted.
        let err = service
            .facet(&page, &QueryNode::match_all(), "title")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_autocomplete_returns_objects() {
        let (service, _backend) =
            service(&[("1", "Foxglove"), ("2", "Wolf")]).await;
        let page = ModelType::new("page").unwrap();
        let objects = service.autocomplete(&page, "fox").await.unwrap();
        assert_eq!(objects, vec!["Foxglove".to_string()]);
    }
}
