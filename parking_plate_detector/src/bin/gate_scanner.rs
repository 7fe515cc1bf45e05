use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parking_plate_detector::config::Config;
use parking_plate_detector::config::PreviewMode;
use parking_plate_detector::metrics;
use parking_plate_detector::plate_detection::bounding_box_render::OperatorPreview;
use parking_plate_detector::plate_detection::object_detector::ObjectDetector;
use parking_plate_detector::plate_detection::plate_validator::PlateGrammar;
use parking_plate_detector::plate_detection::preview::HeadlessPreview;
use parking_plate_detector::plate_detection::preview::WindowPreview;
use parking_plate_detector::plate_detection::record_sink::RestRecordSink;
use parking_plate_detector::plate_detection::roi_preprocessor::RoiPreprocessor;
use parking_plate_detector::plate_detection::rtp_sink::RtpPreview;
use parking_plate_detector::plate_detection::tesseract_ocr::TesseractReader;
use parking_plate_detector::plate_detection::video_reader::VideoReader;
use parking_plate_detector::session::SessionController;
use parking_plate_detector::session::SessionState;
use tracing::debug;
use tracing::error;
use tracing::info;

/// Watches the gate camera until one valid plate is read and logged as entered.
#[derive(Debug, Parser)]
#[command(name = "gate_scanner", version)]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Camera index or video file, overriding `[camera]`.
    #[arg(long)]
    source: Option<String>,

    /// Run without any preview surface.
    #[arg(long)]
    headless: bool,
}

fn make_preview(config: &Config) -> anyhow::Result<Box<dyn OperatorPreview>> {
    let preview: Box<dyn OperatorPreview> = match config.preview.mode {
        PreviewMode::Window => Box::new(WindowPreview::new(config.preview.match_hold_ms)),
        PreviewMode::Rtp => Box::new(
            RtpPreview::new(&config.preview, config.camera.fps)
                .context("cannot start rtp preview")?,
        ),
        PreviewMode::Headless => Box::new(HeadlessPreview),
    };
    Ok(preview)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("cannot load config from {}", args.config.display()))?;
    if let Some(source) = &args.source {
        config.camera.set_source(source);
    }
    if args.headless {
        config.preview.mode = PreviewMode::Headless;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = %config.camera.input(),
        model = %config.detector.model.display(),
        store = %config.store.url,
        preview = ?config.preview.mode,
        "starting gate scanner"
    );

    let sink = RestRecordSink::new(&config.store).context("cannot create record store client")?;
    info!(endpoint = sink.endpoint(), "record store client ready");
    let detector =
        ObjectDetector::plate_detector(&config.detector).context("cannot load plate detector")?;
    let recognizer = TesseractReader::new(&config.ocr).context("cannot start tesseract")?;
    let grammar = PlateGrammar::new(&config.plate.pattern).context("invalid plate pattern")?;
    let source = VideoReader::new(&config.camera).context("cannot open video source")?;
    let preview = make_preview(&config)?;

    let mut controller = SessionController::new(source, detector, recognizer, sink, preview)
        .with_preprocessor(RoiPreprocessor::new(config.preprocess.scale))
        .with_grammar(grammar)
        .with_confidence(config.detector.confidence);

    let report = controller.run();
    match &report.state {
        SessionState::Matched(found) => match &found.persistence {
            Ok(()) => info!(plate = %found.record.license_plate, "plate entered"),
            Err(e) => error!(
                plate = %found.record.license_plate,
                error = %e,
                "plate read but not recorded, enter it manually"
            ),
        },
        SessionState::Stopped(reason) => info!(?reason, "session stopped without a plate"),
        SessionState::Scanning => {}
    }
    info!(
        frames = report.frames_read,
        regions = report.regions_evaluated,
        "session finished"
    );
    debug!(metrics = %metrics::render(), "session metrics");

    Ok(())
}
