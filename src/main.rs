//! Course Video Uploadr - resumable chunked video uploads
//!
//! Uploads one video file to a course and prints the resulting video id.
//! Ctrl-C aborts the upload and releases the server session.

use anyhow::Context;
use clap::Parser;
use course_video_uploadr::api::HttpVideoStreamingApi;
use course_video_uploadr::auth::provider_from_config;
use course_video_uploadr::config::Config;
use course_video_uploadr::logging::init_logging;
use course_video_uploadr::metrics;
use course_video_uploadr::upload::{
    FileSource, TracingObserver, UploadMetadata, UploadSettings, VideoUploadClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Course Video Uploadr - chunked, resumable video uploads
#[derive(Parser, Debug)]
#[command(name = "course-video-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL, overrides the configuration file
    #[arg(long)]
    base_url: Option<String>,

    /// Video file to upload
    #[arg(short, long)]
    file: PathBuf,

    /// Course the video belongs to
    #[arg(long)]
    course_id: String,

    /// Video title
    #[arg(long)]
    title: Option<String>,

    /// Extra metadata forwarded to the server (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print Prometheus metrics when done
    #[arg(long)]
    print_metrics: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match (&args.config, &args.base_url) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        (None, Some(base_url)) => Config::for_base_url(base_url.clone()),
        (None, None) => anyhow::bail!("either --config or --base-url is required"),
    };

    if let Some(base_url) = &args.base_url {
        config.api.base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config.logging, args.log_level.as_deref())?;
    info!("Starting course-video-uploadr v{}", course_video_uploadr::VERSION);

    let token = provider_from_config(&config.auth)?;
    let api = HttpVideoStreamingApi::from_config(&config.api, token)?;
    let mut client = VideoUploadClient::new(Arc::new(api), UploadSettings::from_config(&config.upload))
        .with_observer(Arc::new(TracingObserver));

    let source = FileSource::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let mut metadata = UploadMetadata::for_course(args.course_id.clone());
    if let Some(title) = &args.title {
        metadata = metadata.with_title(title.clone());
    }
    for (key, value) in &args.meta {
        metadata = metadata.with_field(key.clone(), value.clone());
    }

    let finished = tokio::select! {
        result = client.upload_file(Arc::new(source), metadata) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let outcome = match finished {
        Some(Ok(result)) => {
            println!("video_id: {}", result.video_id);
            println!("status: {}", result.status);
            if let Some(job) = &result.processing_job_id {
                println!("processing_job_id: {}", job);
            }
            Ok(())
        }
        Some(Err(e)) => {
            error!(reason = %e.reason(), error = %e, "Upload failed");
            eprintln!("{}", e.user_message());
            Err(anyhow::Error::new(e))
        }
        None => {
            warn!("Interrupted, aborting upload");
            let aborted = client.abort().await;
            info!(outcome = ?aborted, "Upload aborted");
            Err(anyhow::anyhow!("upload interrupted"))
        }
    };

    if args.print_metrics {
        print!("{}", metrics::render()?);
    }

    outcome
}
