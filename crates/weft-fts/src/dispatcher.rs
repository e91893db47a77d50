//! Incremental update fan-out.
//!
//! Object saves and deletes are dispatched to every backend that indexes
//! the object's model type. Backends are updated concurrently and fail
//! independently: one backend being down never blocks the others, the
//! failure is reported per backend instead.
//!
//! While a rebuild is filling a hidden generation, updates are written
//! twice, to the live generation and to the in-flight one, so the new
//! index is already current when it is promoted.

use std::sync::Arc;

use futures::future::join_all;
use weft_core::{DocumentId, Error, ModelType, Result, SpecRegistry};

use crate::backend::{BoundBackend, SearchBackend, WriteTarget};
use crate::mapper::{DocumentMapper, Indexable};
use crate::rebuilder::InflightRegistry;

/// Result of one fan-out, one outcome per targeted backend.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub backend: String,
    pub result: Result<()>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Routes incremental updates to the configured backends.
pub struct UpdateDispatcher {
    registry: Arc<SpecRegistry>,
    backends: Vec<BoundBackend>,
    inflight: Arc<InflightRegistry>,
}

impl UpdateDispatcher {
    pub fn new(
        registry: Arc<SpecRegistry>,
        backends: Vec<BoundBackend>,
        inflight: Arc<InflightRegistry>,
    ) -> Self {
        Self {
            registry,
            backends,
            inflight,
        }
    }

    /// Add or update one object everywhere its model type is indexed.
    pub async fn upsert(
        &self,
        model_type: &ModelType,
        object: &dyn Indexable,
    ) -> Result<DispatchReport> {
        let mapper = DocumentMapper::new(self.registry.get(model_type)?);
        let targets = self.targets(model_type);
        if targets.is_empty() {
            log::warn!("no backend indexes model type '{model_type}'");
        }

        let tasks = targets.iter().map(|backend| {
            let mapper = mapper.clone();
            async move {
                let result = self.upsert_one(backend, model_type, object, &mapper).await;
                if let Err(e) = &result {
                    log::error!(
                        "upsert of '{model_type}:{}' failed on backend '{}': {e}",
                        object.pk(),
                        backend.name()
                    );
                }
                DispatchOutcome {
                    backend: backend.name().to_string(),
                    result,
                }
            }
        });
        Ok(DispatchReport {
            outcomes: join_all(tasks).await,
        })
    }

    /// Delete one document everywhere its model type is indexed.
    pub async fn delete(&self, id: &DocumentId) -> DispatchReport {
        let targets = self.targets(&id.model_type);
        let tasks = targets.iter().map(|backend| async move {
            let result = self.delete_one(backend, id).await;
            if let Err(e) = &result {
                log::error!("delete of '{id}' failed on backend '{}': {e}", backend.name());
            }
            DispatchOutcome {
                backend: backend.name().to_string(),
                result,
            }
        });
        DispatchReport {
            outcomes: join_all(tasks).await,
        }
    }

    fn targets(&self, model_type: &ModelType) -> Vec<Arc<dyn SearchBackend>> {
        self.backends
            .iter()
            .filter(|bound| bound.handles(model_type))
            .map(|bound| Arc::clone(&bound.backend))
            .collect()
    }

    async fn upsert_one(
        &self,
        backend: &Arc<dyn SearchBackend>,
        model_type: &ModelType,
        object: &dyn Indexable,
        mapper: &DocumentMapper,
    ) -> Result<()> {
        let doc = mapper.map(object, backend.requires_normalized_text())?;
        let live = backend.live_generation(model_type).await?;
        let inflight = self.inflight.get(backend.name(), model_type);
        if live.is_none() && inflight.is_none() {
            return Err(Error::operation(format!(
                "no generation of '{model_type}' to write on backend '{}'",
                backend.name()
            )));
        }
        if let Some(live) = live {
            backend
                .add_documents(
                    &WriteTarget::Generation(live),
                    std::slice::from_ref(&doc),
                )
                .await?;
        }
        if let Some(inflight) = inflight {
            backend
                .add_documents(
                    &WriteTarget::Generation(inflight),
                    std::slice::from_ref(&doc),
                )
                .await?;
        }
        Ok(())
    }

    async fn delete_one(&self, backend: &Arc<dyn SearchBackend>, id: &DocumentId) -> Result<()> {
        let live = backend.live_generation(&id.model_type).await?;
        let inflight = self.inflight.get(backend.name(), &id.model_type);
        if let Some(live) = live {
            backend
                .delete_document(&WriteTarget::Generation(live), id)
                .await?;
        }
        if let Some(inflight) = inflight {
            backend
                .delete_document(&WriteTarget::Generation(inflight), id)
                .await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
