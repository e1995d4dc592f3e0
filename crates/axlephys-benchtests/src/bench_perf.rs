//! Step-latency benchmark over a lattice of spring pairs.

use std::time::Instant;

use anyhow::Result;

use axlephys_threads::WorkerPool;
use axlephys_world::constraints::SpringParams;
use axlephys_world::{
    static_body, vec3, BodyDesc, MassProps, SleepConfig, WorldBuilder, WorldCapacity,
};

/// Simple percentile over raw samples.
fn pct(mut xs: Vec<f32>, p: f32) -> f32 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    let k = ((xs.len() as f32 - 1.0) * p).round() as usize;
    xs[k]
}

pub fn run(threads: usize, ticks: usize, pairs: usize) -> Result<()> {
    let pool = WorkerPool::global();
    pool.change_thread_count(threads.max(1))?;

    let mut world = WorldBuilder::new()
        .with_capacity(WorldCapacity {
            body_count: pairs * 2 + 16,
            small_constraint_count: pairs + 16,
            ..Default::default()
        })
        .with_sleep_config(SleepConfig { velocity_threshold: 0.01, time_until_sleep: 1.0e9 })
        .build();

    for i in 0..pairs {
        let col = (i % 16) as f32;
        let row = (i / 16) as f32;
        let anchor = world.add_body(static_body(vec3(col * 2.0, 6.0, row * 2.0)))?;
        let bob = world.add_body(BodyDesc {
            position: vec3(col * 2.0 + 0.8, 6.0, row * 2.0),
            velocity: vec3(0.0, 0.5 * ((i % 5) as f32 - 2.0), 0.0),
            mass: MassProps::unit(),
            ..Default::default()
        })?;
        world.add_spring(
            anchor,
            bob,
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            1.0,
            SpringParams::default(),
        )?;
    }

    let multi_thread = threads > 1;
    let mut step_ms: Vec<f32> = Vec::with_capacity(ticks);
    for _ in 0..ticks {
        let t0 = Instant::now();
        world.step(1.0 / 120.0, multi_thread)?;
        step_ms.push(t0.elapsed().as_secs_f64() as f32 * 1000.0);
    }

    let mean: f32 = step_ms.iter().sum::<f32>() / step_ms.len() as f32;
    println!("--- perf ({ticks} ticks, {pairs} pairs, {threads} threads) ---");
    println!(
        "step latency (ms): mean={mean:.3}  p50={:.3}  p95={:.3}  p99={:.3}",
        pct(step_ms.clone(), 0.50),
        pct(step_ms.clone(), 0.95),
        pct(step_ms, 0.99),
    );
    println!("final hash = {:02x?}", &world.state_hash()[..8]);
    Ok(())
}
