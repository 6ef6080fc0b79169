use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use handtrack_core::pipeline::config::StageConfig;
use handtrack_core::pipeline::detection_stage::DetectionStage;
use handtrack_core::shared::constants::{DEFAULT_PROFILE, IMAGE_EXTENSIONS};
use handtrack_core::shared::frame::{Frame, FrameGeometry};

/// Hand gesture detection over an image or a directory of frames.
///
/// Prints one JSON detection event per line to stdout.
#[derive(Parser)]
#[command(name = "handtrack")]
struct Cli {
    /// Input image file or directory of frames (sorted by file name).
    input: PathBuf,

    /// Cascade profile describing the gesture to detect.
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: PathBuf,

    /// Emit events only, leave frames unmarked.
    #[arg(long)]
    no_display: bool,

    /// Directory to write processed frames into.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let inputs = collect_frames(&cli.input)?;

    let config = StageConfig {
        profile: cli.profile,
        display: !cli.no_display,
    };
    let (events, receiver) = crossbeam_channel::unbounded();
    let mut stage = DetectionStage::new(config, events);

    if let Some(dir) = &cli.output {
        fs::create_dir_all(dir)?;
    }

    let total = inputs.len();
    let mut negotiated: Option<FrameGeometry> = None;
    for (index, path) in inputs.iter().enumerate() {
        eprint!("\rProcessing frame {}/{total}", index + 1);

        let image = image::open(path)?.to_rgb8();
        let (width, height) = image.dimensions();
        let geometry = FrameGeometry::new(width, height);
        if negotiated != Some(geometry) {
            stage.negotiate(geometry)?;
            negotiated = Some(geometry);
        }

        let mut frame = Frame::new(image.into_raw(), width, height);
        stage.process_frame(&mut frame)?;

        for event in receiver.try_iter() {
            println!("{}", serde_json::to_string(&event)?);
        }

        if let Some(dir) = &cli.output {
            save_frame(&frame, dir, path)?;
        }
    }
    eprintln!();

    if let Some(dir) = &cli.output {
        log::info!("Processed frames written to {}", dir.display());
    }
    Ok(())
}

fn collect_frames(input: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if input.is_dir() {
        let mut frames: Vec<PathBuf> = fs::read_dir(input)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_image(path))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(format!("No image frames found in {}", input.display()).into());
        }
        return Ok(frames);
    }
    Err(format!("Input not found: {}", input.display()).into())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn save_frame(frame: &Frame, dir: &Path, source: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let name = source
        .file_name()
        .ok_or_else(|| format!("Input has no file name: {}", source.display()))?;
    let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .ok_or("Frame buffer does not match its geometry")?;
    image.save(dir.join(name))?;
    Ok(())
}
