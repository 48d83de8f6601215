use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mono_slam::io::{write_trajectory_csv, ImageSequence};
use mono_slam::{CameraModel, SlamConfig, SlamSystem};

/// Run monocular visual odometry over an image sequence.
#[derive(Debug, Parser)]
#[command(name = "mono-slam", version, about)]
struct Args {
    /// EuRoC sequence root (containing cam0/ or mav0/cam0/) or a directory of images.
    #[arg(long)]
    sequence: PathBuf,

    /// YAML configuration; defaults are used for missing keys.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Focal length x in pixels. Overrides the sequence intrinsics.
    #[arg(long, requires_all = ["fy", "cx", "cy"])]
    fx: Option<f64>,
    #[arg(long)]
    fy: Option<f64>,
    #[arg(long)]
    cx: Option<f64>,
    #[arg(long)]
    cy: Option<f64>,

    /// Map file to load before processing.
    #[arg(long)]
    load_map: Option<PathBuf>,

    /// Where to save the map after processing.
    #[arg(long)]
    save_map: Option<PathBuf>,

    /// Write a top-down PNG of the final map.
    #[arg(long)]
    map_png: Option<PathBuf>,

    /// Export the trajectory as CSV.
    #[arg(long)]
    trajectory_csv: Option<PathBuf>,

    /// Map image size as WIDTHxHEIGHT.
    #[arg(long, default_value = "800x800", value_parser = parse_canvas)]
    canvas: (u32, u32),

    /// Map image pixels per world unit.
    #[arg(long, default_value_t = 20.0)]
    scale: f64,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,
}

fn parse_canvas(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {}", e))?;
    Ok((w, h))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SlamConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SlamConfig::default(),
    };

    let sequence = ImageSequence::open(&args.sequence)?;
    if sequence.is_empty() {
        bail!("No images found in {}", args.sequence.display());
    }

    let camera = match (args.fx, args.fy, args.cx, args.cy) {
        (Some(fx), Some(fy), Some(cx), Some(cy)) => CameraModel::new(fx, fy, cx, cy),
        _ => match sequence.camera {
            Some(camera) => camera,
            None => bail!("The sequence has no intrinsics; pass --fx --fy --cx --cy"),
        },
    };

    let mut slam = SlamSystem::new(camera, config)?;
    if let Some(path) = &args.load_map {
        slam.load_map(path)
            .with_context(|| format!("Failed to load map {}", path.display()))?;
        info!(points = slam.map().num_map_points(), "starting from saved map");
    }

    let total = args.max_frames.map_or(sequence.len(), |n| n.min(sequence.len()));
    info!(frames = total, "processing sequence {}", args.sequence.display());

    let start = Instant::now();
    let mut tracked = 0usize;
    for i in 0..total {
        let image = match sequence.load_gray(i) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping frame {}: {:#}", i, e);
                continue;
            }
        };
        let result = slam.process_frame(&image);
        if result.motion_estimated {
            tracked += 1;
        }

        if i % 100 == 0 {
            let p = slam.current_position();
            info!(
                "Frame {}/{}: {} features, {} inliers, {} map points, state={}, pos=[{:.2}, {:.2}, {:.2}]",
                i,
                total,
                result.num_features,
                result.num_inliers,
                result.num_map_points,
                result.state,
                p.x,
                p.y,
                p.z
            );
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Done: {} frames in {:.1}s ({:.1} fps), motion estimated for {}, {} map points",
        total,
        elapsed,
        total as f64 / elapsed.max(1e-9),
        tracked,
        slam.map().num_map_points()
    );

    if let Some(path) = &args.save_map {
        slam.save_map(path)
            .with_context(|| format!("Failed to save map {}", path.display()))?;
    }
    if let Some(path) = &args.trajectory_csv {
        write_trajectory_csv(slam.trajectory(), path)?;
        info!("trajectory written to {}", path.display());
    }
    if let Some(path) = &args.map_png {
        slam.visualize_map(args.canvas, args.scale)
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("map image written to {}", path.display());
    }

    Ok(())
}
