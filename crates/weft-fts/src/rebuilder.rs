//! Full index rebuilds.
//!
//! A rebuild streams objects from a [`DocumentSource`] into a fresh
//! hidden generation, then promotes it. Readers keep hitting the old
//! generation until the promote lands, so a rebuild never exposes a
//! partially filled index. Objects that fail to map are skipped and
//! counted; a failed batch write aborts the rebuild and retires the
//! half-filled generation.
//!
//! While a rebuild is running, its hidden generation is registered in an
//! [`InflightRegistry`] so incremental updates can be double-written to
//! both the live and the in-flight generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use weft_core::{Error, ModelType, Result, SpecRegistry};

use crate::backend::{IndexGeneration, SearchBackend, WriteTarget};
use crate::mapper::{DocumentMapper, Indexable};

/// Cooperative cancellation handle, checked at batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Streams the objects of one model type in batches. An empty batch
/// ends the stream.
#[async_trait]
pub trait DocumentSource: Send {
    async fn next_batch(&mut self, size: usize) -> Result<Vec<Arc<dyn Indexable>>>;
}

/// A [`DocumentSource`] over a pre-collected object list.
pub struct InMemorySource {
    objects: Vec<Arc<dyn Indexable>>,
    cursor: usize,
}

impl InMemorySource {
    pub fn new(objects: Vec<Arc<dyn Indexable>>) -> Self {
        Self { objects, cursor: 0 }
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn next_batch(&mut self, size: usize) -> Result<Vec<Arc<dyn Indexable>>> {
        let end = (self.cursor + size).min(self.objects.len());
        let batch = self.objects[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(batch)
    }
}

/// In-flight hidden generations, keyed by backend name and model type.
///
/// Shared between the rebuilder (which registers and clears entries)
/// and the update dispatcher (which double-writes to them).
#[derive(Default)]
pub struct InflightRegistry {
    entries: Mutex<HashMap<(String, ModelType), Option<IndexGeneration>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, ModelType), Option<IndexGeneration>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the (backend, model type) slot before the new generation
    /// exists. At most one rebuild per slot may run.
    fn reserve(&self, backend: &str, model_type: &ModelType) -> Result<()> {
        let mut entries = self.entries();
        let key = (backend.to_string(), model_type.clone());
        if entries.contains_key(&key) {
            return Err(Error::rebuild_in_progress(model_type.as_str(), backend));
        }
        entries.insert(key, None);
        Ok(())
    }

    fn set(&self, backend: &str, generation: IndexGeneration) {
        let key = (backend.to_string(), generation.model_type.clone());
        self.entries().insert(key, Some(generation));
    }

    fn release(&self, backend: &str, model_type: &ModelType) {
        self.entries()
            .remove(&(backend.to_string(), model_type.clone()));
    }

    /// The hidden generation currently being filled, if any.
    pub fn get(&self, backend: &str, model_type: &ModelType) -> Option<IndexGeneration> {
        self.entries()
            .get(&(backend.to_string(), model_type.clone()))
            .cloned()
            .flatten()
    }
}

/// Rebuild tuning knobs.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Objects pulled from the source per batch.
    pub batch_size: usize,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Outcome of one completed rebuild.
#[derive(Debug, Clone)]
pub struct RebuildStats {
    pub generation: IndexGeneration,
    pub documents_indexed: usize,
    pub objects_skipped: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

/// Drives atomic full rebuilds against one backend.
pub struct Rebuilder {
    backend: Arc<dyn SearchBackend>,
    registry: Arc<SpecRegistry>,
    inflight: Arc<InflightRegistry>,
}

impl Rebuilder {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        registry: Arc<SpecRegistry>,
        inflight: Arc<InflightRegistry>,
    ) -> Self {
        Self {
            backend,
            registry,
            inflight,
        }
    }

    /// Rebuild one model type's index from scratch.
    ///
    /// On success the new generation is live and the previous one has
    /// been retired (a failed retire is logged and left behind). On
    /// failure before promotion the half-filled generation is retired;
    /// a failed promotion leaves the filled generation in place for
    /// inspection.
    pub async fn rebuild(
        &self,
        model_type: &ModelType,
        source: &mut dyn DocumentSource,
        options: &RebuildOptions,
        cancel: &CancelFlag,
    ) -> Result<RebuildStats> {
        self.inflight.reserve(self.backend.name(), model_type)?;
        let result = self.run(model_type, source, options, cancel).await;
        self.inflight.release(self.backend.name(), model_type);
        result
    }

    async fn run(
        &self,
        model_type: &ModelType,
        source: &mut dyn DocumentSource,
        options: &RebuildOptions,
        cancel: &CancelFlag,
    ) -> Result<RebuildStats> {
        let started = Instant::now();
        let spec = self.registry.get(model_type)?;
        let mapper = DocumentMapper::new(spec);
        let normalize = self.backend.requires_normalized_text();

        let previous = self.backend.live_generation(model_type).await?;
        let generation = self.backend.create_generation(model_type).await?;
        self.inflight.set(self.backend.name(), generation.clone());
        log::info!(
            "rebuilding '{model_type}' on backend '{}' into {generation}",
            self.backend.name()
        );

        let mut stats = RebuildStats {
            generation: generation.clone(),
            documents_indexed: 0,
            objects_skipped: 0,
            batches: 0,
            elapsed: Duration::ZERO,
        };
        if let Err(e) = self
            .fill(&generation, &mapper, normalize, source, options, cancel, &mut stats)
            .await
        {
            if let Err(retire_err) = self.backend.retire(&generation).await {
                log::warn!("failed to retire aborted generation {generation}: {retire_err}");
            }
            return Err(e);
        }

        if let Err(e) = self.backend.promote(&generation).await {
            // Keep the filled generation; a later rebuild will replace it.
            log::error!("failed to promote {generation}: {e}");
            return Err(e);
        }

        if let Some(previous) = previous {
            if let Err(e) = self.backend.retire(&previous).await {
                log::warn!("failed to retire replaced generation {previous}: {e}");
            }
        }

        stats.elapsed = started.elapsed();
        log::info!(
            "rebuilt '{model_type}': {} documents in {} batches, {} skipped, {:?}",
            stats.documents_indexed,
            stats.batches,
            stats.objects_skipped,
            stats.elapsed
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fill(
        &self,
        generation: &IndexGeneration,
        mapper: &DocumentMapper,
        normalize: bool,
        source: &mut dyn DocumentSource,
        options: &RebuildOptions,
        cancel: &CancelFlag,
        stats: &mut RebuildStats,
    ) -> Result<()> {
        let target = WriteTarget::Generation(generation.clone());
        loop {
            if cancel.is_cancelled() {
                log::info!("rebuild of {generation} cancelled");
                return Err(Error::Cancelled);
            }
            let batch = source.next_batch(options.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }
            let mut docs = Vec::with_capacity(batch.len());
            for object in &batch {
                match mapper.map(object.as_ref(), normalize) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => {
                        stats.objects_skipped += 1;
                        log::warn!("skipping object during rebuild of {generation}: {e}");
                    }
                }
            }
            self.backend.add_documents(&target, &docs).await?;
            stats.documents_indexed += docs.len();
            stats.batches += 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
