//! Software frame loop example
//!
//! Demonstrates:
//! - Loading memory configuration (optional JSON path argument)
//! - A front buffer outside every pool
//! - Per-frame scratch surfaces recycled through the registry
//! - SIMD-aligned scratch lanes
//!
//! Run with: RUST_LOG=debug cargo run -p void_gfx_memory --example frame_loop

use void_gfx_memory::{Color, GraphicsMemory, MemoryConfig};

const FRAMES: u32 = 120;
const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn main() -> void_gfx_memory::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => MemoryConfig::load(path)?,
        None => MemoryConfig::default(),
    };

    let mut memory = GraphicsMemory::new(config)?;
    let mut front = memory.front_buffer(WIDTH, HEIGHT)?;
    log::info!("SIMD capability: {}", memory.simd_capability());

    for frame in 0..FRAMES {
        // Blur-sized and glyph-sized scratch targets
        let mut blur = memory.acquire_surface(WIDTH / 2, HEIGHT / 2)?;
        let mut glyphs = memory.acquire_surface(32, 32)?;

        let shade = (frame % 256) as u8;
        memory.clear(&mut blur, Color::rgba(shade, 0, 255 - shade, 255))?;
        memory.clear(&mut glyphs, Color::TRANSPARENT)?;

        let lanes = memory.simd_alloc((WIDTH * 4) as usize)?;
        memory.simd_f32_mut(&lanes)?.fill(shade as f32 / 255.0);

        // Copy the first scratch row into the front buffer
        let row: Vec<u32> = memory.pixels_mut(&mut blur)?[..(WIDTH / 2) as usize].to_vec();
        front.pixels_mut()?[..row.len()].copy_from_slice(&row);

        memory.simd_release(lanes)?;
        memory.release_surface(glyphs)?;
        memory.release_surface(blur)?;
    }

    for pool in memory.registry().iter() {
        let stats = pool.stats();
        log::info!(
            "Pool {}x{}: {} hits, {} misses ({:.1}% reuse)",
            pool.width(),
            pool.height(),
            stats.hits,
            stats.misses,
            stats.hit_rate() * 100.0
        );
    }

    front.destroy();
    memory.shutdown();
    Ok(())
}
