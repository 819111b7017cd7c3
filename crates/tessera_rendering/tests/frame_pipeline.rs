//! Whole-frame runs of the instanced pipeline over small scenes.

use glam::{Mat4, Vec3};
use tessera_rendering::culling::CullingSplit;
use tessera_rendering::{
    Aabb, CullingRequest, DrawFlags, HostBuffer, InstancedRenderPipeline, PropertyCatalog,
    PropertyFormat, PropertyId, RenderConfig, RenderMesh, Scene,
};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Objects per 64 KiB batch without overrides: two 48-byte matrices each.
const OBJECTS_PER_BATCH: usize = 682;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config(initial: u64, max: u64) -> RenderConfig {
    RenderConfig {
        batch_byte_budget: 64 * KIB,
        initial_buffer_size: initial,
        max_buffer_size: max,
        worker_count: 2,
        ..RenderConfig::default()
    }
}

fn opaque() -> RenderMesh {
    RenderMesh {
        material: 1,
        mesh: 1,
        ..RenderMesh::default()
    }
}

fn small_box() -> Aabb {
    Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(0.25))
}

/// Camera at the origin looking down -Z, seeing x in [left, right].
fn ortho(left: f32, right: f32) -> Mat4 {
    Mat4::orthographic_rh(left, right, -5.0, 5.0, 0.1, 100.0)
}

fn spawn_row(scene: &mut Scene, xs: impl IntoIterator<Item = i32>, mesh: RenderMesh) {
    for x in xs {
        let id = scene.spawn_renderable(mesh, small_box()).expect("spawn");
        #[allow(clippy::cast_precision_loss)]
        let position = Vec3::new(x as f32, 0.0, -20.0);
        assert!(scene.set_transform(id, Mat4::from_translation(position)));
    }
}

fn pipeline(config: RenderConfig, catalog: PropertyCatalog, buffer: HostBuffer) -> InstancedRenderPipeline {
    InstancedRenderPipeline::new(config, catalog, Box::new(buffer)).expect("pipeline")
}

#[test]
fn test_distinct_property_sets_become_distinct_archetypes() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let mut catalog = PropertyCatalog::new(config.batch_byte_budget);
    let p1 = catalog.register("_BaseColor", 10, PropertyFormat::Float4).expect("p1");
    let p2 = catalog.register("_Emission", 11, PropertyFormat::Float).expect("p2");

    let mut scene = Scene::new(64, &catalog);
    let mut spawned = Vec::new();
    for round in 0..5 {
        let a = scene.spawn_renderable(opaque(), small_box()).expect("spawn");
        assert!(scene.set_override(a, p1, &[round; 16]));

        let b = scene.spawn_renderable(opaque(), small_box()).expect("spawn");
        assert!(scene.set_override(b, p1, &[round; 16]));
        assert!(scene.set_override(b, p2, &[round; 4]));

        let c = scene.spawn_renderable(opaque(), small_box()).expect("spawn");
        spawned.extend([a, b, c]);
    }

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    let first = pipeline.update(&scene);
    assert_eq!(first.registry.discovered, 3);
    assert_eq!(first.reconcile.created, 0);

    let second = pipeline.update(&scene);
    assert_eq!(second.registry.committed, 3);
    assert_eq!(second.reconcile.created, 3);

    let registry = pipeline.registry();
    assert_eq!(registry.archetypes().len(), 3);
    let mut seen = std::collections::HashSet::new();
    for archetype in registry.archetypes() {
        assert_eq!(archetype.object_count(), 5);
        for &id in archetype.objects() {
            assert!(seen.insert(id), "{id:?} is in two archetypes");
        }
    }
    assert_eq!(seen.len(), spawned.len());

    let property_counts: Vec<usize> = {
        let mut counts: Vec<usize> = registry
            .archetypes()
            .iter()
            .map(|archetype| archetype.properties().len())
            .collect();
        counts.sort_unstable();
        counts
    };
    assert_eq!(property_counts, vec![2, 3, 4]);
    assert!(registry
        .archetypes()
        .iter()
        .all(|archetype| archetype.property_offset(PropertyId::OBJECT_TO_WORLD) == Some(0)));
}

#[test]
fn test_upload_writes_matrices_and_overrides() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let mut catalog = PropertyCatalog::new(config.batch_byte_budget);
    let color = catalog.register("_BaseColor", 10, PropertyFormat::Float4).expect("color");

    let mut scene = Scene::new(8, &catalog);
    let id = scene.spawn_renderable(opaque(), small_box()).expect("spawn");
    assert!(scene.set_transform(id, Mat4::from_translation(Vec3::new(3.0, 4.0, 5.0))));
    assert!(scene.set_override(id, color, bytemuck::bytes_of(&[1.0f32, 2.0, 3.0, 4.0])));

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let reader = buffer.reader();
    let mut pipeline = pipeline(config, catalog, buffer);
    pipeline.update(&scene);
    pipeline.update(&scene);

    let registry = pipeline.registry();
    let location = registry.location(id).expect("located");
    let archetype = registry.archetype(location.archetype).expect("archetype");
    let batch = pipeline
        .batches()
        .batch(archetype.batches()[0])
        .expect("batch");
    let floats_at = |property: PropertyId, len: usize| -> Vec<f32> {
        let offset = batch.block.begin + u64::from(archetype.property_offset(property).expect("offset"));
        let bytes = reader.read(offset, len * 4).expect("in bounds");
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    };

    assert_eq!(&floats_at(PropertyId::OBJECT_TO_WORLD, 12)[9..], &[3.0, 4.0, 5.0]);
    let inverse = floats_at(PropertyId::WORLD_TO_OBJECT, 12);
    for (got, want) in inverse[9..].iter().zip([-3.0f32, -4.0, -5.0]) {
        assert!((got - want).abs() < 1e-5, "inverse translation {got} != {want}");
    }
    assert_eq!(floats_at(color, 4), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(reader.read(0, 64), Some(vec![0; 64]));
}

#[test]
fn test_growth_to_five_mib_rebinds_once() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);

    // 75 batches end just under 4.7 MiB.
    let mut scene = Scene::new(60_000, &catalog);
    spawn_row(&mut scene, (0..OBJECTS_PER_BATCH * 75).map(|_| 0), opaque());

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    let handle = pipeline.batches().handle();

    pipeline.update(&scene);
    let update = pipeline.update(&scene);
    assert_eq!(update.reconcile.created, 75);

    let growth = update.reconcile.growth.expect("buffer grew");
    assert_eq!(growth.old_size, MIB);
    assert_eq!(growth.new_size, 8 * MIB);
    // 1 -> 2 -> 4 MiB still misses the high-water mark, 8 MiB holds it.
    assert_eq!(growth.doublings, 3);
    assert!(pipeline.batches().heap().one_past_highest_used_address() > 4 * MIB);

    let rebind = update.rebind().expect("rebind");
    assert_ne!(rebind, handle);
    assert_eq!(pipeline.batches().rebind_count(), 1);

    let steady = pipeline.update(&scene);
    assert!(steady.rebind().is_none());
    assert!(steady.reconcile.growth.is_none());
    assert_eq!(pipeline.batches().rebind_count(), 1);
    assert!(pipeline.stats().all_batches_resident());
}

#[test]
fn test_camera_frame_draws_visible_objects() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);
    let mut scene = Scene::new(256, &catalog);
    spawn_row(&mut scene, -50..=50, opaque());
    let transparent = RenderMesh {
        material: 9,
        mesh: 1,
        flags: DrawFlags::HAS_SORTING_POSITION,
        ..RenderMesh::default()
    };
    spawn_row(&mut scene, [-2, 0, 2], transparent);

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    let first = pipeline.update(&scene);
    assert!(first.upload.header_written);
    let second = pipeline.update(&scene);
    assert_eq!(second.upload.batches, 1);
    assert!(!second.upload.header_written);

    let request = CullingRequest::camera(ortho(-10.5, 10.5));
    let output = pipeline.cull(&scene, &request).expect("cull").clone();
    output.validate().expect("consistent output");

    assert_eq!(output.visible_instances.len(), 21 + 3);
    assert_eq!(output.commands.len(), 1 + 3);
    assert_eq!(output.ranges.len(), 1);
    assert_eq!(output.ranges[0].instance_count, 24);
    assert_eq!(output.ranges[0].command_count, 4);

    // Plain bin first, then one command per sorted instance.
    assert_eq!(output.commands[0].visible_count, 21);
    assert_eq!(output.commands[0].material, 1);
    let mut sorted_x: Vec<f32> = output.sorting_positions.iter().map(|p| p.x).collect();
    sorted_x.sort_by(f32::total_cmp);
    assert_eq!(sorted_x, vec![-2.0, 0.0, 2.0]);

    let registry = pipeline.registry();
    for command in &output.commands {
        let batch = pipeline.batches().batch(command.batch_id).expect("batch");
        let objects = registry
            .archetype(batch.archetype)
            .expect("archetype")
            .batch_objects(batch.slot as usize);
        let start = command.visible_offset as usize;
        let indices = &output.visible_instances[start..start + command.visible_count as usize];
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
        for &index in indices {
            let center = scene.world_bounds().get(objects[index as usize]).expect("bounds").center();
            assert!(center.x.abs() <= 10.0, "object at {center} should be culled");
        }
    }

    let stats = pipeline.stats();
    assert_eq!(stats.culling.visible_objects, 24);
    assert_eq!(stats.draw.commands, 4);
}

#[test]
fn test_chunk_bounds_skip_and_mark_whole_chunks() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);
    let mut scene = Scene::new(512, &catalog);
    // Three 128-object chunks in one batch: far left, in view, far right.
    spawn_row(&mut scene, (0..128).map(|_| -100), opaque());
    spawn_row(&mut scene, (0..128).map(|i| i % 11 - 5), opaque());
    spawn_row(&mut scene, (0..128).map(|_| 100), opaque());

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    pipeline.update(&scene);
    pipeline.update(&scene);
    assert_eq!(pipeline.batches().batch_count(), 1);

    let request = CullingRequest::camera(ortho(-10.5, 10.5));
    let output = pipeline.cull(&scene, &request).expect("cull");
    output.validate().expect("consistent output");

    let expected: Vec<u32> = (128..256).collect();
    assert_eq!(output.visible_instances, expected);
    assert_eq!(output.commands.len(), 1);
    assert_eq!(output.commands[0].visible_count, 128);

    let culling = pipeline.stats().culling;
    assert_eq!(culling.batches_partial, 1);
    assert_eq!(culling.chunks_tested, 3);
    assert!(culling.objects_tested <= 128);
    assert_eq!(culling.visible_objects, 128);
}

#[test]
fn test_shadow_splits_bin_by_split_mask() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);
    let mut scene = Scene::new(256, &catalog);
    spawn_row(&mut scene, -50..=50, opaque());

    let buffer = HostBuffer::new(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    pipeline.update(&scene);
    pipeline.update(&scene);

    let request = CullingRequest::shadow(
        vec![
            CullingSplit::from_view_projection(&ortho(-10.5, 10.5)),
            CullingSplit::from_view_projection(&ortho(-0.5, 30.5)),
        ],
        Vec3::NEG_Z,
        0.0,
    );
    let output = pipeline.cull(&scene, &request).expect("cull");

    let mut by_mask: Vec<(u8, u32)> = output
        .commands
        .iter()
        .map(|command| (command.split_mask, command.visible_count))
        .collect();
    by_mask.sort_unstable();
    assert_eq!(by_mask, vec![(0b01, 10), (0b10, 20), (0b11, 11)]);
    assert_eq!(output.ranges.len(), 1);
    assert_eq!(output.ranges[0].instance_count, 41);
}

#[test]
fn test_failed_growth_skips_non_resident_batches() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);
    let mut scene = Scene::new(16_000, &catalog);
    spawn_row(&mut scene, (0..OBJECTS_PER_BATCH * 20).map(|_| 0), opaque());

    // The backend refuses to grow past its first size.
    let buffer = HostBuffer::new(config.initial_buffer_size).with_resize_limit(config.initial_buffer_size);
    let mut pipeline = pipeline(config, catalog, buffer);
    pipeline.update(&scene);
    let update = pipeline.update(&scene);

    assert!(update.reconcile.growth.is_none());
    assert!(update.rebind().is_none());
    assert_eq!(update.upload.batches, 15);
    assert_eq!(update.upload.skipped_non_resident, 5);
    assert!(!pipeline.stats().all_batches_resident());

    let output = pipeline.cull(&scene, &CullingRequest::camera(ortho(-10.5, 10.5))).expect("cull");
    assert_eq!(output.visible_instances.len(), 15 * OBJECTS_PER_BATCH);
}

#[test]
fn test_invalid_split_count_is_an_error() {
    init_tracing();
    let config = config(MIB, 8 * MIB);
    let catalog = PropertyCatalog::new(config.batch_byte_budget);
    let scene = Scene::new(4, &catalog);
    let mut pipeline = pipeline(config, catalog, HostBuffer::new(MIB));

    let request = CullingRequest::shadow(Vec::new(), Vec3::NEG_Z, 0.0);
    assert!(pipeline.cull(&scene, &request).is_err());
}
