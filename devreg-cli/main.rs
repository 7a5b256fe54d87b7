use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use devreg_cli::{draw_matches, load_depth, load_gray, CliError, CliResult, RegistrationReport, RegistrationRequest};
use devreg_core::init_thread_pool;
use devreg_estimator::{
    DeviceEstimator, DeviceFrame, DeviceImageFrame, EstimatorConfig, FixedCameraFrame, RegistrationError, UpdateOutcome,
};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "devreg", about = "Register an AR device frame against a fixed depth camera")]
struct Cli {
    /// JSON request with intrinsics, poses and timestamps
    #[arg(long)]
    request: PathBuf,

    /// Fixed camera colour or grayscale image
    #[arg(long)]
    fixed: PathBuf,

    /// Fixed camera 16-bit depth PNG, aligned with --fixed
    #[arg(long)]
    depth: PathBuf,

    /// Device image; when absent the request must carry device features
    #[arg(long)]
    device: Option<PathBuf>,

    /// Estimator configuration (.json or .toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the fixed image with matched keypoints circled
    #[arg(long)]
    draw: Option<PathBuf>,

    /// Worker threads for feature extraction
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();

    let level = Level::from_str(&cli.log_level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = try_main(&cli) {
        error!(error = %e, "registration failed");
        process::exit(1);
    }
}

fn try_main(cli: &Cli) -> CliResult<()> {
    if let Some(n) = cli.threads {
        init_thread_pool(n)?;
    }

    let config = match &cli.config {
        Some(path) => EstimatorConfig::load(path)?,
        None => EstimatorConfig::default(),
    };
    info!("{}", config.summary());

    let request = RegistrationRequest::load(&cli.request)?;
    let setup = request.fixed_setup()?;
    let fixed = FixedCameraFrame::new(
        load_gray(&cli.fixed)?,
        load_depth(&cli.depth, request.depth_scale)?,
        request.fixed_timestamp(),
    )?;

    let mut estimator = DeviceEstimator::new(&request.device_id, config, Arc::new(setup))?;

    let device: Result<DeviceFrame, RegistrationError> = match &cli.device {
        Some(path) => DeviceFrame::from_image(
            DeviceImageFrame {
                image: load_gray(path)?,
                intrinsics: request.device_intrinsics,
                pose: request.device_pose()?,
                timestamp: request.device_timestamp(),
            },
            estimator.extractor(),
        ),
        None => request
            .device_feature_frame()
            .ok_or(CliError::MissingDevice)?
            .map_err(Into::into),
    };

    let outcome = match &device {
        Ok(device) => estimator.update(device, &fixed, request.now()),
        Err(e) => UpdateOutcome::Dropped(e.clone()),
    };

    let report = RegistrationReport::from_outcome(&request.device_id, &outcome);
    println!("{}", report.to_json()?);

    if let (Some(path), Ok(device)) = (&cli.draw, &device) {
        let matched = draw_matches(
            &fixed,
            device,
            estimator.extractor(),
            estimator.config().matching_threshold,
            path,
        )?;
        info!(matched, path = %path.display(), "wrote match overlay");
    }

    Ok(())
}
