//! Backend interface and factory.
//!
//! Every search engine integration implements [`SearchBackend`]. The
//! trait is generation-aware: rebuilds write into a fresh generation and
//! promote it atomically, while incremental updates address whichever
//! generation is currently live through [`WriteTarget::Live`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weft_core::{DocumentId, Error, FieldName, ModelType, Result, SpecRegistry};
use weft_query::QueryNode;

use crate::config::{BackendConfig, EngineConfig};
use crate::document::Document;
use crate::remote::RemoteBackend;
use crate::sqlite::SqliteBackend;

/// One physical index generation for one model type.
///
/// A generation is created hidden, filled by a rebuild, then promoted to
/// live in a single atomic step. At most one generation per model type is
/// live at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexGeneration {
    pub model_type: ModelType,
    pub gen_id: u64,
    /// Name of the backend that owns this generation.
    pub backend: String,
}

impl fmt::Display for IndexGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.backend, self.model_type, self.gen_id)
    }
}

/// Where a write lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// The currently live generation for a model type. Writes against a
    /// model type with no live generation are an error.
    Live(ModelType),
    /// A specific (usually hidden, in-flight) generation.
    Generation(IndexGeneration),
}

impl WriteTarget {
    pub fn model_type(&self) -> &ModelType {
        match self {
            WriteTarget::Live(mt) => mt,
            WriteTarget::Generation(generation) => &generation.model_type,
        }
    }
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocumentId,
    pub score: f32,
}

/// One bucket of a facet: a distinct filterable-field value and how many
/// members of the result set carry it. `value` is `None` for members
/// with no value stored for the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: Option<String>,
    pub count: u64,
}

/// Result window. Backends apply this after ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 10,
        }
    }
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    /// Best score first. The default.
    Relevance,
    /// Order by a filterable field's raw value.
    Field { name: FieldName, descending: bool },
}

impl Default for Ordering {
    fn default() -> Self {
        Ordering::Relevance
    }
}

/// A search engine integration.
///
/// All methods take `&self`; implementations are internally synchronized
/// and callable concurrently.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short, stable backend name used in routing and errors.
    fn name(&self) -> &str;

    /// Whether documents must be text-normalized before writes. Engines
    /// with their own analysis pipeline return false.
    fn requires_normalized_text(&self) -> bool {
        false
    }

    /// Create a fresh, hidden generation for a model type.
    async fn create_generation(&self, model_type: &ModelType) -> Result<IndexGeneration>;

    /// Add or replace documents. Re-adding an id overwrites the previous
    /// document under that id.
    async fn add_documents(&self, target: &WriteTarget, docs: &[Document]) -> Result<()>;

    /// Delete one document. Deleting an id that is not present is a no-op.
    async fn delete_document(&self, target: &WriteTarget, id: &DocumentId) -> Result<()>;

    /// Atomically make `generation` the live generation for its model
    /// type, replacing the previous live generation (which remains on
    /// disk until retired).
    async fn promote(&self, generation: &IndexGeneration) -> Result<()>;

    /// Drop a non-live generation and all its storage. Retiring the live
    /// generation or an unknown generation is an error.
    async fn retire(&self, generation: &IndexGeneration) -> Result<()>;

    /// The currently live generation for a model type, if any.
    async fn live_generation(&self, model_type: &ModelType) -> Result<Option<IndexGeneration>>;

    /// Run a query against the live generation. A model type with no
    /// live generation yields no hits.
    async fn search(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        page: Pagination,
        order: &Ordering,
    ) -> Result<Vec<SearchHit>>;

    /// Prefix completion against one autocomplete field of the live
    /// generation.
    async fn autocomplete(
        &self,
        model_type: &ModelType,
        prefix: &str,
        field: &FieldName,
    ) -> Result<Vec<DocumentId>>;

    /// Count the query's result set per distinct value of a filterable
    /// field, most frequent value first.
    async fn facet(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        field: &FieldName,
    ) -> Result<Vec<FacetCount>>;
}

/// Instantiate a backend from configuration.
pub async fn create_backend(
    config: &BackendConfig,
    registry: Arc<SpecRegistry>,
) -> Result<Arc<dyn SearchBackend>> {
    match &config.engine {
        EngineConfig::Sqlite { database_url } => {
            let backend =
                SqliteBackend::connect(&config.name, database_url, registry).await?;
            Ok(Arc::new(backend))
        }
        EngineConfig::Remote {
            base_url,
            username,
            password,
            index_prefix,
            max_retries,
            timeout_secs,
        } => {
            let backend = RemoteBackend::new(
                &config.name,
                base_url,
                username.as_deref(),
                password.as_deref(),
                index_prefix,
                *max_retries,
                *timeout_secs,
                registry,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

/// A backend paired with the model types routed to it.
#[derive(Clone)]
pub struct BoundBackend {
    pub backend: Arc<dyn SearchBackend>,
    pub model_types: Vec<ModelType>,
}

impl BoundBackend {
    pub fn handles(&self, model_type: &ModelType) -> bool {
        self.model_types.is_empty() || self.model_types.contains(model_type)
    }
}

/// Build all configured backends.
pub async fn create_backends(
    configs: &[BackendConfig],
    registry: Arc<SpecRegistry>,
) -> Result<Vec<BoundBackend>> {
    if configs.is_empty() {
        return Err(Error::operation("no search backends configured"));
    }
    let mut backends = Vec::with_capacity(configs.len());
    for config in configs {
        let backend = create_backend(config, Arc::clone(&registry)).await?;
        let mut model_types = Vec::with_capacity(config.model_types.len());
        for name in &config.model_types {
            model_types.push(ModelType::new(name)?);
        }
        backends.push(BoundBackend {
            backend,
            model_types,
        });
    }
    Ok(backends)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_display() {
        let generation = IndexGeneration {
            model_type: ModelType::new("page").unwrap(),
            gen_id: 3,
            backend: "primary".to_string(),
        };
        assert_eq!(generation.to_string(), "primary/page#3");
    }

    #[test]
    fn test_pagination_default() {
        let page = Pagination::default();
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, 10);
    }

    struct NullBackend;

    #[async_trait]
    impl SearchBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
        async fn create_generation(&self, _: &ModelType) -> Result<IndexGeneration> {
            Err(Error::operation("null"))
        }
        async fn add_documents(&self, _: &WriteTarget, _: &[Document]) -> Result<()> {
            Ok(())
        }
        async fn delete_document(&self, _: &WriteTarget, _: &DocumentId) -> Result<()> {
            Ok(())
        }
        async fn promote(&self, _: &IndexGeneration) -> Result<()> {
            Ok(())
        }
        async fn retire(&self, _: &IndexGeneration) -> Result<()> {
            Ok(())
        }
        async fn live_generation(&self, _: &ModelType) -> Result<Option<IndexGeneration>> {
            Ok(None)
        }
        async fn search(
            &self,
            _: &ModelType,
            _: &QueryNode,
            _: Pagination,
            _: &Ordering,
        ) -> Result<Vec<SearchHit>> {
            Ok(vec![])
        }
        async fn autocomplete(
            &self,
            _: &ModelType,
            _: &str,
            _: &FieldName,
        ) -> Result<Vec<DocumentId>> {
            Ok(vec![])
        }
        async fn facet(
            &self,
            _: &ModelType,
            _: &QueryNode,
            _: &FieldName,
        ) -> Result<Vec<FacetCount>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_backend_defaults() {
        let backend = NullBackend;
        assert!(!backend.requires_normalized_text());
        let page = ModelType::new("page").unwrap();
        let live = tokio_test::block_on(backend.live_generation(&page)).unwrap();
        assert!(live.is_none());
    }

    #[test]
    fn test_bound_backend_routing() {
        let page = ModelType::new("page").unwrap();
        let event = ModelType::new("event").unwrap();

        // An empty routing list handles every model type.
        let all = BoundBackend {
            backend: Arc::new(NullBackend),
            model_types: vec![],
        };
        assert!(all.handles(&page));
        assert!(all.handles(&event));

        let only_page = BoundBackend {
            backend: Arc::new(NullBackend),
            model_types: vec![page.clone()],
        };
        assert!(only_page.handles(&page));
        assert!(!only_page.handles(&event));
    }
}
