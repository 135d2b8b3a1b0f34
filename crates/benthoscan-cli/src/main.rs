//! benthoscan CLI — benthic organism detection over survey images.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;

use benthoscan::{
    ColorHistogram, DetectConfig, ImageDetections, ImagePipeline, ImageScale, RadiusBand, Session,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "benthoscan")]
#[command(about = "Detect disk/ellipse-shaped benthic organisms in habitat survey images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect organisms in one image or a directory of images.
    Detect(CliDetectArgs),

    /// Print the header of a color histogram file.
    HistInfo {
        /// Path to the histogram file.
        #[arg(long)]
        hist: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct CliDetectArgs {
    /// Input image file or directory of images.
    #[arg(long)]
    input: PathBuf,

    /// Path of the cumulative detection CSV.
    #[arg(long)]
    out_csv: PathBuf,

    /// Directory for per-image result JSON files (optional).
    #[arg(long)]
    out_json: Option<PathBuf>,

    /// Classifier system model file (JSON).
    #[arg(long)]
    classifiers: PathBuf,

    /// Per-class color histogram files, in classifier class order.
    #[arg(long, required = true)]
    class_hist: Vec<PathBuf>,

    /// Environment (background) color histogram file.
    #[arg(long)]
    env_hist: PathBuf,

    /// Minimum organism radius in working-frame pixels.
    #[arg(long, default_value = "12.0")]
    min_radius: f32,

    /// Maximum organism radius in working-frame pixels.
    #[arg(long, default_value = "60.0")]
    max_radius: f32,

    /// Ground sample distance in meters per pixel.
    #[arg(long, default_value = "0.002")]
    meters_per_px: f32,

    /// Resize factor the working images were scaled by; output geometry is
    /// divided by this value.
    #[arg(long, default_value = "1.0")]
    resize_factor: f32,

    /// Worker threads (0 = rayon default).
    #[arg(long, default_value = "0")]
    workers: usize,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect(args) => run_detect(&args),
        Commands::HistInfo { hist } => run_hist_info(&hist),
    }
}

// ── hist-info ──────────────────────────────────────────────────────────

fn run_hist_info(path: &Path) -> CliResult<()> {
    let hist = ColorHistogram::load(path)?;
    let bins = hist.bins();
    let start = hist.range_start();
    let end = hist.range_end();
    let sum: f32 = hist.values().iter().sum();
    let occupied = hist.values().iter().filter(|v| **v > 0.0).count();

    println!("benthoscan color histogram: {}", path.display());
    println!("  bins:        {} x {} x {}", bins[0], bins[1], bins[2]);
    println!(
        "  ranges:      [{}, {}] [{}, {}] [{}, {}]",
        start[0], end[0], start[1], end[1], start[2], end[2]
    );
    println!("  total mass:  {sum:.4}");
    println!(
        "  occupancy:   {} / {} bins",
        occupied,
        bins[0] * bins[1] * bins[2]
    );

    Ok(())
}

// ── detect ─────────────────────────────────────────────────────────────

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn collect_images(input: &Path) -> CliResult<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut images: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    if images.is_empty() {
        return Err(format!("no images found under {}", input.display()).into());
    }
    Ok(images)
}

fn run_detect(args: &CliDetectArgs) -> CliResult<()> {
    let images = collect_images(&args.input)?;
    tracing::info!("{} images queued from {}", images.len(), args.input.display());

    if let Some(dir) = &args.out_json {
        std::fs::create_dir_all(dir)?;
    }

    let class_paths: Vec<&Path> = args.class_hist.iter().map(PathBuf::as_path).collect();
    let config = DetectConfig::from_radius_band(RadiusBand::new(args.min_radius, args.max_radius));
    let session = Session::open(
        &args.classifiers,
        &class_paths,
        &args.env_hist,
        &args.out_csv,
        config,
    )?;

    let scale = ImageScale {
        meters_per_px: args.meters_per_px,
        resize_factor: args.resize_factor,
        band: RadiusBand::new(args.min_radius, args.max_radius),
    };

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()?;
    }

    // Each rayon worker owns a pipeline: the color model and density tracker
    // drift with the images that worker happens to process.
    let n_failed: usize = images
        .par_iter()
        .map_init(
            || {
                ImagePipeline::new(
                    session.classifiers.clone(),
                    session.seed_model.clone(),
                    session.config.clone(),
                )
            },
            |pipeline, path| {
                if session.exit_requested() {
                    return 0usize;
                }
                match process_one(pipeline, path, &session, scale, args.out_json.as_deref()) {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::error!("{}: {}", path.display(), e);
                        1
                    }
                }
            },
        )
        .sum();

    if n_failed > 0 {
        tracing::warn!("{} of {} images failed", n_failed, images.len());
    }
    tracing::info!("detection list written to {}", args.out_csv.display());
    Ok(())
}

fn process_one(
    pipeline: &mut ImagePipeline,
    path: &Path,
    session: &Session,
    scale: ImageScale,
    json_dir: Option<&Path>,
) -> CliResult<()> {
    let image_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let image = image::open(path)
        .map_err(|e| -> CliError { format!("failed to open {}: {}", path.display(), e).into() })?
        .to_rgb8();

    let result: ImageDetections = pipeline.process(&image_name, &image, scale);
    tracing::info!("{}: {} detections", image_name, result.detections.len());

    session
        .output
        .append_image(&image_name, &result.detections, scale.resize_factor)?;

    if let Some(dir) = json_dir {
        let json_path = dir.join(format!("{image_name}.json"));
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&json_path, json)?;
    }
    Ok(())
}
