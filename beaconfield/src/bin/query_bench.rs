use beaconfield::{Beacon, Field, FieldConfig, NeighborQueryConfig, Vec2};
use std::time::Instant;

fn build_field(beacons: usize) -> Field {
    let mut f = Field::default();
    // Jittered grid so cells hold uneven populations
    let side = (beacons as f64).sqrt().ceil() as usize;
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    for k in 0..beacons {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let jx = ((seed >> 33) % 20) as f32 - 10.0;
        let jy = ((seed >> 13) % 20) as f32 - 10.0;
        let (i, j) = (k % side, k / side);
        f.add_beacon(Beacon::new(k as u32, i as f32 * 40.0 + jx, j as f32 * 40.0 + jy));
    }
    f
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() { return 0.0; }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len()-1)]
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut beacons = 10_000usize;
    let mut queries = 10_000usize;
    let mut radius = 150.0f32;
    let mut assert_ms: Option<f64> = None;
    for a in &args[1..] {
        if let Some(val)=a.strip_prefix("--beacons=") { if let Ok(v)=val.parse() { beacons=v; } }
        else if let Some(val)=a.strip_prefix("--queries=") { if let Ok(v)=val.parse() { queries=v; } }
        else if let Some(val)=a.strip_prefix("--radius=") { if let Ok(v)=val.parse() { radius=v; } }
        else if let Some(val)=a.strip_prefix("--assert-ms=") { if let Ok(v)=val.parse() { assert_ms=Some(v); } }
    }

    let mut f = build_field(beacons);
    let q = NeighborQueryConfig { radius, ..FieldConfig::default().neighbors };
    let extent = (beacons as f64).sqrt().ceil() as f32 * 40.0;

    let mut times_ms: Vec<f64> = Vec::with_capacity(queries);
    let start_all = Instant::now();
    let mut found = 0usize;
    for k in 0..queries {
        // coprime strides walk the whole extent without repeating early
        let x = (k * 7919 % 1000) as f32 / 1000.0 * extent;
        let y = (k * 104729 % 1000) as f32 / 1000.0 * extent;
        let t0 = Instant::now();
        found += f.find_neighbors(Vec2::new(x, y), Some(&q)).len();
        times_ms.push(t0.elapsed().as_secs_f64() * 1000.0);
    }
    let dur_all = start_all.elapsed().as_secs_f64() * 1000.0;
    times_ms.sort_by(|a, b| a.total_cmp(b));
    let med = percentile(&times_ms, 0.5);
    let p90 = percentile(&times_ms, 0.9);
    let p99 = percentile(&times_ms, 0.99);
    let m = f.index_metrics();
    println!(
        "beacons={} queries={} radius={} found={} cell_size={} cells={} total_ms={:.3} median_ms={:.4} p90_ms={:.4} p99_ms={:.4}",
        beacons, queries, radius, found, m.cell_size, m.cell_count, dur_all, med, p90, p99
    );
    if let Some(th) = assert_ms { if med > th { eprintln!("FAIL: median {:.4} ms > threshold {:.3} ms", med, th); std::process::exit(1); } }
}
