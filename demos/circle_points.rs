// demos/circle_points.rs — Sample a circle with the parallel Taylor series.
//
//   cargo run --example circle_points                 # 360 points, r=200 around (400, 300)
//   cargo run --example circle_points -- 720 150 8    # samples, radius, workers
//
// Prints one `x y` pair per line.

use std::error::Error;

use heteroconv::series;
use heteroconv::{HostParallel, ParallelConfig};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let samples: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(360);
    let radius: f64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200.0);
    let workers: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);

    let pool = HostParallel::new(ParallelConfig { workers })?;
    eprintln!("[circle_points] {samples} samples, r={radius}, {} workers", pool.workers());

    for (x, y) in series::circle_points(&pool, (400, 300), radius, samples) {
        println!("{x} {y}");
    }
    Ok(())
}
