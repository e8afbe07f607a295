use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
#[cfg(feature = "video")]
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use footfall::detection::DetectionLog;
use footfall::stream::{BlankFrames, JsonLinesSink};
use footfall::{Config, FootfallRecord, FrameSink, FrameSource, Pipeline, RunSummary};

#[derive(Parser)]
#[command(
    name = "footfall",
    about = "Count people crossing a line from per-frame detections",
    version
)]
struct Args {
    /// Path to configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detector output, one JSON object per frame
    #[arg(short, long)]
    detections: PathBuf,

    /// Write one JSON report per frame to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Leave frames without tracks out of the per-frame output
    #[arg(long)]
    skip_empty: bool,

    /// Write the footfall record to this file as well as stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Override min_hits from the config
    #[arg(long)]
    min_hits: Option<u32>,

    /// Override max_age from the config
    #[arg(long)]
    max_age: Option<u32>,

    /// Override the counting line
    #[arg(long, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true)]
    line: Option<Vec<f32>>,

    /// Input video; frames are decoded alongside the detection log
    #[cfg(feature = "video")]
    #[arg(long)]
    video: Option<PathBuf>,

    /// Write an annotated copy of the input video here (.mp4)
    #[cfg(feature = "video")]
    #[arg(long, requires = "video")]
    annotated: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(min_hits) = args.min_hits {
        config.min_hits = min_hits;
    }
    if let Some(max_age) = args.max_age {
        config.max_age = max_age;
    }
    if let Some(line) = &args.line {
        config.line = [[line[0], line[1]], [line[2], line[3]]];
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn frame_output(args: &Args) -> Result<Option<JsonLinesSink<BufWriter<File>>>> {
    let Some(path) = &args.output else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create output file {}", path.display()))?;
    Ok(Some(
        JsonLinesSink::new(BufWriter::new(file)).skip_empty(args.skip_empty),
    ))
}

fn run<S, K>(
    config: &Config,
    source: S,
    log: DetectionLog,
    sink: K,
    max_frames: Option<u64>,
) -> Result<RunSummary>
where
    S: FrameSource,
    K: FrameSink<S::Frame>,
{
    let mut pipeline = Pipeline::new(config, source, log, sink)?;
    if let Some(limit) = max_frames {
        pipeline = pipeline.with_frame_limit(limit);
    }
    match pipeline.run() {
        Ok(summary) => Ok(summary),
        Err(err) => {
            let frame = err.frame();
            let err = anyhow::Error::from(err);
            error!(
                "stopped at frame {:?} with partial count {}: {:#}",
                frame,
                pipeline.count(),
                err
            );
            Err(err.context("counting run failed"))
        }
    }
}

#[cfg(feature = "video")]
fn run_video(args: &Args, config: &Config, log: DetectionLog, video: &Path) -> Result<RunSummary> {
    use footfall::stream::ThreadedSource;
    use footfall::visualization::{AnnotatedVideoSink, VideoSource};

    let line = config.counting_line()?;
    let source = ThreadedSource::spawn(VideoSource::open(video)?, config.reader_queue)?;
    let annotated = args
        .annotated
        .as_ref()
        .map(|path| AnnotatedVideoSink::new(path, line, config.output.clone()));
    run(config, source, log, (frame_output(args)?, annotated), args.max_frames)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("footfall=info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let log = DetectionLog::from_file(&args.detections)?;
    info!(
        "loaded detections for {} frames from {}",
        log.frame_count(),
        args.detections.display()
    );

    #[cfg(feature = "video")]
    let summary = match &args.video {
        Some(video) => run_video(&args, &config, log, video)?,
        None => {
            let source = BlankFrames::new(log.frame_count());
            run(&config, source, log, frame_output(&args)?, args.max_frames)?
        }
    };
    #[cfg(not(feature = "video"))]
    let summary = {
        let source = BlankFrames::new(log.frame_count());
        run(&config, source, log, frame_output(&args)?, args.max_frames)?
    };

    let record = FootfallRecord::now(summary.count);
    let json = record.to_json()?;
    println!("{}", json);
    if let Some(path) = &args.report {
        fs::write(path, &json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }
    Ok(())
}
