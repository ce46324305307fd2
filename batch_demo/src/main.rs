//! Headless batching demo
//!
//! Runs a few frames of a small scene through the instance batcher on the
//! headless device and logs what each frame would draw.
//!
//! Usage: `batch_demo [config.toml|config.ron]`

use instance_batcher::config::LIGHTMAP_TEXTURE_BINDING;
use instance_batcher::prelude::*;
use nalgebra::{Matrix4, Vector3};

// Scene constants
const FRAMES: usize = 4;
const ASTEROIDS_PER_FRAME: [u32; FRAMES] = [20, 45, 45, 1100];
const SHIPS_PER_FRAME: u32 = 6;
const SHADOW_CASCADES: u32 = 2;

/// Per-instance payload: model matrix plus tint
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct InstanceData {
    model_matrix: [[f32; 4]; 4],
    tint: [f32; 4],
}

impl InstanceData {
    fn new(position: Vector3<f32>, scale: f32, tint: [f32; 4]) -> Self {
        let model = Matrix4::new_translation(&position) * Matrix4::new_scaling(scale);
        Self {
            model_matrix: model.into(),
            tint,
        }
    }
}

fn instance_attributes() -> Vec<Attribute> {
    vec![
        Attribute::new("a_matrix_row0", Format::Rgba32F),
        Attribute::new("a_matrix_row1", Format::Rgba32F),
        Attribute::new("a_matrix_row2", Format::Rgba32F),
        Attribute::new("a_matrix_row3", Format::Rgba32F),
        Attribute::new("a_tint", Format::Rgba32F),
    ]
}

fn create_geometry(
    device: &mut HeadlessDevice,
    vertex_count: u64,
    index_count: u64,
) -> Result<GeometrySource, DeviceError> {
    let positions = device.create_buffer(&BufferInfo {
        usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
        memory: MemoryFlags::DEVICE,
        size: vertex_count * 12,
        stride: 12,
    })?;
    let indices = device.create_buffer(&BufferInfo {
        usage: BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
        memory: MemoryFlags::DEVICE,
        size: index_count * 4,
        stride: 4,
    })?;

    Ok(GeometrySource {
        vertex_buffers: vec![positions],
        attributes: vec![Attribute::new("a_position", Format::Rgb32F)],
        index_buffer: Some(indices),
    })
}

fn load_config() -> Result<BatchingConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading batching config from {}", path);
            BatchingConfig::load_from_file(&path)
        }
        None => Ok(BatchingConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let mut registry = BatchRegistry::with_config(config)?;
    let mut device = HeadlessDevice::new();
    let mut recorder = HeadlessRecorder::new();

    let forward = device.create_pass("forward");
    let shadow = device.create_pass("shadow");
    let forward_shader = device.create_shader("instanced_forward");
    let shadow_shader = device.create_shader("instanced_shadow");
    let lightmap = device.create_texture("baked_lightmap");

    let asteroid_geometry = create_geometry(&mut device, 642, 3840)?;
    let asteroid = SubmissionDesc::new(asteroid_geometry, device.create_descriptor_set())
        .with_shader(forward_shader);
    let ship_geometry = create_geometry(&mut device, 1208, 6144)?;
    let ship = SubmissionDesc::new(ship_geometry, device.create_descriptor_set())
        .with_shader(forward_shader)
        .with_texture(LIGHTMAP_TEXTURE_BINDING, lightmap);

    let mut block = AttributeBlock::new(instance_attributes());

    for (frame, &asteroids) in ASTEROIDS_PER_FRAME.iter().enumerate() {
        for i in 0..asteroids {
            let angle = i as f32 * 0.37;
            block.write_pod(&InstanceData::new(
                Vector3::new(angle.cos() * 40.0, angle.sin() * 40.0, 0.0),
                1.0 + (i % 3) as f32,
                [0.6, 0.55, 0.5, 1.0],
            ));

            registry
                .get(forward, PRIMARY_KEY)
                .merge(&mut device, &asteroid, &block, 0, None)?;
            for cascade in 0..SHADOW_CASCADES {
                registry
                    .get(shadow, cascade)
                    .merge(&mut device, &asteroid, &block, 0, Some(shadow_shader))?;
            }
        }

        for i in 0..SHIPS_PER_FRAME {
            block.write_pod(&InstanceData::new(
                Vector3::new(i as f32 * 5.0, -10.0, 0.0),
                2.0,
                [0.2, 0.8, 1.0, 1.0],
            ));
            let outcome = registry
                .get(forward, PRIMARY_KEY)
                .merge(&mut device, &ship, &block, 0, None)?;
            if let MergeOutcome::Skipped(reason) = outcome {
                log::warn!("Ship {} skipped: {:?}", i, reason);
            }
        }

        let updates = registry.upload_all(&mut recorder);
        device.submit(&mut recorder)?;

        for (pass, key, batch) in registry.iter_mut() {
            let stats = batch.stats();
            let draws: Vec<_> = batch.draws().map(|d| d.instance_count).collect();
            log::info!(
                "Frame {}: pass {} key {} -> {} draws {:?}, {} / {} slots, {} bytes",
                frame,
                device.pass_name(pass).unwrap_or("?"),
                key,
                draws.len(),
                draws,
                stats.instances,
                stats.capacity,
                stats.bytes_reserved
            );
        }
        log::info!(
            "Frame {}: {} buffer updates, {} bytes allocated on device",
            frame,
            updates,
            device.allocated_bytes()
        );

        registry.clear_all();
    }

    registry.destroy_all(&mut device);
    log::info!(
        "Shutdown: {} buffers and {} input assemblers still live",
        device.live_buffers(),
        device.live_input_assemblers()
    );

    Ok(())
}
