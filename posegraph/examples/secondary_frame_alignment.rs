//! Recover the pose of an external tracker's coordinate frame
//!
//! A circular keyframe trajectory is chained by noisy odometry and every
//! keyframe is also observed by a tracker living in its own frame. The graph
//! first solves with the tracker frame's translation frozen, then frees it and
//! solves again.
//!
//! ```text
//! RUST_LOG=info cargo run --example secondary_frame_alignment -- --keyframes 60 --background
//! ```

use clap::Parser;
use posegraph::simulation::{Scenario, ScenarioConfig};
use posegraph::{Pose, PoseGraph, PoseGraphConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Secondary frame alignment demo
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of keyframes on the trajectory
    #[arg(long, default_value_t = 24)]
    keyframes: usize,

    /// Scale applied to every simulated noise level
    #[arg(long, default_value_t = 1.0)]
    noise: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Solve on the background worker instead of the main thread
    #[arg(long)]
    background: bool,
}

fn frame_error(estimate: &Pose<f64>, truth: &Pose<f64>) -> (f64, f64) {
    let diff = Pose::between(truth, estimate);
    (diff.rotation.angle().to_degrees(), diff.translation.norm())
}

fn run_solve(graph: &PoseGraph, background: bool) -> Result<(), Box<dyn std::error::Error>> {
    if background {
        if !graph.start() {
            return Err("a solve is already running".into());
        }
        graph.wait();
        let summary = graph.last_summary().ok_or("background solve produced no summary")?;
        info!("{summary}");
    } else {
        let summary = graph.solve()?;
        info!("{summary}");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = ScenarioConfig {
        n_keyframes: args.keyframes,
        seed: args.seed,
        ..ScenarioConfig::default()
    }
    .with_noise_scale(args.noise);
    let scenario = Scenario::generate(&config);

    let graph = PoseGraph::with_config(PoseGraphConfig::default());
    let ids = scenario.populate(&graph)?;
    info!(
        keyframes = graph.keyframe_count(),
        edges = graph.edge_count(),
        "graph populated"
    );

    let initial = graph.secondary_frame(ids.tracker_frame)?;
    let (rot, trans) = frame_error(&initial, &scenario.tracker_frame);
    info!(rotation_deg = rot, translation_m = trans, "initial tracker frame error");

    run_solve(&graph, args.background)?;
    let frozen = graph.secondary_frame(ids.tracker_frame)?;
    let (rot, trans) = frame_error(&frozen, &scenario.tracker_frame);
    info!(rotation_deg = rot, translation_m = trans, "tracker frame error, translation frozen");

    graph.set_secondary_frame_free(ids.tracker_frame)?;
    run_solve(&graph, args.background)?;
    let free = graph.secondary_frame(ids.tracker_frame)?;
    let (rot, trans) = frame_error(&free, &scenario.tracker_frame);
    info!(rotation_deg = rot, translation_m = trans, "tracker frame error, fully free");

    let drift = ids
        .keyframes
        .iter()
        .zip(&scenario.ground_truth)
        .map(|(&k, truth)| {
            graph
                .keyframe(k)
                .map(|pose| Pose::between(truth, &pose).translation.norm())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let worst = drift.iter().cloned().fold(0.0, f64::max);
    info!(worst_keyframe_error_m = worst, "done");

    Ok(())
}
