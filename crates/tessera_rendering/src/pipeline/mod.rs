//! Render pipeline orchestration.
//!
//! Runs the per-frame stages over a [`Scene`]: archetype discovery, batch
//! allocation, GPU upload, then culling and draw command generation for
//! each view.

mod frame;
mod stats;

pub use frame::FrameUpdate;
pub use stats::RenderStats;

use crate::archetype::{GraphicsArchetypeRegistry, PropertyCatalog};
use crate::batch::{BatchManager, GpuBuffer};
use crate::config::RenderConfig;
use crate::culling::{CullingEngine, CullingRequest};
use crate::draw::{DrawCommandOutput, DrawCommandPipeline, DrawInputs};
use crate::error::{RenderError, RenderResult};
use crate::scene::Scene;
use crate::upload::{GpuUploader, UploadSources};
use tessera_core::{ThreadLocalAllocator, WorkerPool};

/// The instanced rendering pipeline.
///
/// Call [`update`](Self::update) once per frame after the scene changed,
/// then [`cull`](Self::cull) once per view.
///
/// # Example
///
/// ```rust,ignore
/// let mut pipeline = InstancedRenderPipeline::new(config, catalog, Box::new(buffer))?;
/// let update = pipeline.update(&scene);
/// if let Some(handle) = update.rebind() {
///     backend.rebind(handle);
/// }
/// let output = pipeline.cull(&scene, &CullingRequest::camera(view_projection))?;
/// backend.submit(output);
/// ```
#[derive(Debug)]
pub struct InstancedRenderPipeline {
    config: RenderConfig,
    pool: WorkerPool,
    arenas: ThreadLocalAllocator,
    registry: GraphicsArchetypeRegistry,
    batches: BatchManager,
    culling: CullingEngine,
    draws: DrawCommandPipeline,
    uploader: GpuUploader,
    stats: RenderStats,
}

impl InstancedRenderPipeline {
    /// Creates a pipeline writing into `buffer`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, a catalog built for another batch
    /// budget, a worker pool that cannot start, or a buffer that cannot
    /// reach its initial size.
    pub fn new(
        config: RenderConfig,
        catalog: PropertyCatalog,
        buffer: Box<dyn GpuBuffer>,
    ) -> RenderResult<Self> {
        config.validate()?;
        if catalog.batch_byte_budget() != config.batch_byte_budget {
            return Err(RenderError::InvalidConfig(format!(
                "catalog batch budget {} differs from config batch budget {}",
                catalog.batch_byte_budget(),
                config.batch_byte_budget
            )));
        }

        let pool = WorkerPool::new(config.worker_count)?;
        let workers = pool.worker_count();
        let arenas = ThreadLocalAllocator::new(workers, config.arena_capacity);
        let batches = BatchManager::new(&config, buffer)?;
        let draws = DrawCommandPipeline::new(&config, workers);
        let uploader = GpuUploader::new(&config);

        tracing::info!(
            workers,
            properties = catalog.properties().len(),
            buffer_size = batches.buffer().size(),
            "instanced render pipeline created"
        );
        Ok(Self {
            config,
            pool,
            arenas,
            registry: GraphicsArchetypeRegistry::new(catalog),
            batches,
            culling: CullingEngine::new(),
            draws,
            uploader,
            stats: RenderStats::default(),
        })
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Returns the archetype registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &GraphicsArchetypeRegistry {
        &self.registry
    }

    /// Returns the batch manager.
    #[inline]
    #[must_use]
    pub const fn batches(&self) -> &BatchManager {
        &self.batches
    }

    /// Returns the culling engine, holding the last request's items.
    #[inline]
    #[must_use]
    pub const fn culling(&self) -> &CullingEngine {
        &self.culling
    }

    /// Returns the output of the last cull.
    #[inline]
    #[must_use]
    pub const fn output(&self) -> &DrawCommandOutput {
        self.draws.output()
    }

    /// Returns the counters of the last update and cull.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Starts a frame and brings the GPU side up to date with the scene.
    ///
    /// Objects of archetypes first seen this frame render from the next
    /// update on.
    #[tracing::instrument(skip_all, name = "frame_update")]
    pub fn update(&mut self, scene: &Scene) -> FrameUpdate {
        self.arenas.rewind();

        let registry_update = self.registry.update(scene.world());
        let reconcile = self.batches.reconcile(&mut self.registry);

        let Self {
            pool,
            arenas,
            registry,
            batches,
            uploader,
            ..
        } = self;
        pool.install(|| batches.refresh_bounds(registry, scene.world_bounds()));

        let sources = UploadSources {
            transforms: scene.transforms(),
            overrides: scene.overrides(),
        };
        let upload = pool.install(|| uploader.upload(batches, registry, &sources, arenas.primary().bump()));

        let update = FrameUpdate {
            frame_index: self.arenas.frame_index(),
            registry: registry_update,
            reconcile,
            upload,
        };
        self.record_update(&update);
        update
    }

    /// Culls one view and generates its draw commands.
    ///
    /// # Errors
    ///
    /// Fails if the request is malformed.
    #[tracing::instrument(skip_all, name = "frame_cull")]
    pub fn cull(&mut self, scene: &Scene, request: &CullingRequest) -> RenderResult<&DrawCommandOutput> {
        let Self {
            pool,
            arenas,
            registry,
            batches,
            culling,
            draws,
            ..
        } = self;

        pool.install(|| {
            culling
                .cull(request, batches, registry, scene.world_bounds(), arenas)
                .map(|items| items.len())
        })?;

        let inputs = DrawInputs {
            batches,
            registry,
            render_meshes: scene.render_meshes(),
            transforms: scene.transforms(),
            filters: scene.filters().entries(),
        };
        let items = culling.items();
        pool.install(|| {
            draws.generate(items, &inputs, arenas.primary().bump());
        });

        self.stats.culling = self.culling.stats();
        self.stats.draw = self.draws.stats();
        self.stats.arena_bytes = self.arenas.allocated_bytes();
        Ok(self.draws.output())
    }

    fn record_update(&mut self, update: &FrameUpdate) {
        let to_u32 = |value: usize| u32::try_from(value).unwrap_or(u32::MAX);
        self.stats.frame_index = update.frame_index;
        self.stats.archetypes = to_u32(self.registry.archetypes().len());
        self.stats.pending_archetypes = to_u32(self.registry.pending_count());
        self.stats.batches = to_u32(self.batches.batch_count());
        self.stats.buffer_size = self.batches.buffer().size();
        self.stats.heap_used = self.batches.heap().used_space();
        self.stats.rebinds = self.batches.rebind_count();
        self.stats.arena_bytes = self.arenas.allocated_bytes();
        self.stats.reconcile = update.reconcile;
        self.stats.upload = update.upload;

        tracing::debug!(
            frame = update.frame_index,
            archetypes = self.stats.archetypes,
            batches = self.stats.batches,
            uploaded = update.upload.batches,
            "frame updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::HostBuffer;

    fn config() -> RenderConfig {
        RenderConfig {
            worker_count: 2,
            ..RenderConfig::default()
        }
    }

    #[test]
    fn test_pipeline_creation() {
        let config = config();
        let catalog = PropertyCatalog::new(config.batch_byte_budget);
        let buffer = Box::new(HostBuffer::new(config.initial_buffer_size));
        let pipeline = InstancedRenderPipeline::new(config, catalog, buffer).expect("pipeline");
        assert_eq!(pipeline.stats().batches, 0);
        assert!(pipeline.output().commands.is_empty());
    }

    #[test]
    fn test_rejects_mismatched_catalog() {
        let config = config();
        let catalog = PropertyCatalog::new(config.batch_byte_budget / 2);
        let buffer = Box::new(HostBuffer::new(config.initial_buffer_size));
        let result = InstancedRenderPipeline::new(config, catalog, buffer);
        assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
    }
}
