use std::path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use processing::{ChannelCallback, Completion, InboundRequest, TransformError, Transformer, RESULT_EXTENSION};
use services::{config, CommandExtractor, ExtractionConfig, ValidationMode};

const DEFAULT_BASE_URL: &str = "http://localhost/transform";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Transforms documents into RDF, writing one Turtle file per document.
///
#[derive(Parser, Debug)]
struct Args {
    #[arg(
        short = 'i',
        long,
        required = true,
        num_args = 1..,
        value_parser = parse_file_path
    )]
    input: Vec<path::PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_parser = parse_directory_path
    )]
    output: path::PathBuf,

    /// Media type of all input documents.
    #[arg(short = 'm', long)]
    media_type: String,

    /// Location of the documents, used to derive their URIs.
    #[arg(short = 'l', long)]
    content_location: Option<String>,

    /// URL the document URIs are derived from without a content location.
    #[arg(short = 'b', long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// TOML file with extraction settings.
    #[arg(
        short = 'c',
        long,
        value_parser = parse_file_path
    )]
    config: Option<path::PathBuf>,

    /// Validation mode, overriding the one in the extraction settings.
    #[arg(long)]
    mode: Option<ValidationMode>,

    #[arg(short = 'x', long)]
    core_pool_size: Option<usize>,

    #[arg(short = 'y', long)]
    max_pool_size: Option<usize>,

    #[arg(short = 'z', long)]
    keep_alive_secs: Option<u64>,
}

fn parse_path(path_str: &str) -> Result<path::PathBuf, String> {
    let input_path = path::PathBuf::from(path_str.to_string());
    if input_path.exists() {
        Ok(input_path)
    } else {
        Err(format!("Path {} not found", path_str))
    }
}

fn parse_file_path(path_str: &str) -> Result<path::PathBuf, String> {
    let path = parse_path(path_str)?;
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("path {} is not a file", path_str))
    }
}

fn parse_directory_path(path_str: &str) -> Result<path::PathBuf, String> {
    let path = parse_path(path_str)?;
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("path {} is not a directory", path_str))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(config().get_parsed_or("LOG_LEVEL", log::Level::Info))?;
    let args = Args::parse();

    let mut transformer = build_transformer(&args)?;
    let (callback, mut completions) = ChannelCallback::new();
    transformer.start(Arc::new(callback))?;

    let mut pending = 0;
    let mut failed = 0;
    for input in &args.input {
        let request = request_for(input, &args);
        loop {
            let file = tokio::fs::File::open(input).await?;
            match transformer.transform_async(&request, file).await {
                Ok(()) => {
                    pending += 1;
                    break;
                }
                // All workers are busy, so make room by waiting for one to finish
                Err(TransformError::Rejected) if pending > 0 => {
                    if !write_next(&mut completions, &args.output).await? {
                        failed += 1;
                    }
                    pending -= 1;
                }
                // Workers already reported, but haven't returned to the pool yet
                Err(TransformError::Rejected) => tokio::time::sleep(RETRY_DELAY).await,
                Err(err) => {
                    error!("Unable to transform {}: {}", input.display(), err);
                    failed += 1;
                    break;
                }
            }
        }
    }

    for _ in 0..pending {
        if !write_next(&mut completions, &args.output).await? {
            failed += 1;
        }
    }

    transformer.close();
    if !transformer.await_termination(SHUTDOWN_TIMEOUT) {
        warn!("Workers still running after {:?}", SHUTDOWN_TIMEOUT);
    }

    if failed > 0 {
        bail!("{} of {} documents failed", failed, args.input.len());
    }
    Ok(())
}

fn build_transformer(args: &Args) -> anyhow::Result<Transformer> {
    let mut extraction = match &args.config {
        Some(path) => ExtractionConfig::from_file(path)?,
        None => ExtractionConfig::default(),
    };
    if let Some(mode) = args.mode {
        extraction = extraction.with_validation_mode(mode);
    }

    let mut transformer = Transformer::from_config(Arc::new(CommandExtractor::from_config()), extraction);
    if let Some(size) = args.core_pool_size {
        transformer.set_core_pool_size(size)?;
    }
    if let Some(size) = args.max_pool_size {
        transformer.set_max_pool_size(size)?;
    }
    if let Some(secs) = args.keep_alive_secs {
        transformer.set_keep_alive(Duration::from_secs(secs))?;
    }
    Ok(transformer)
}

fn request_for(input: &path::Path, args: &Args) -> InboundRequest {
    let id = input.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| input.display().to_string());

    let request = InboundRequest::new(id, args.media_type.as_str(), args.base_url.as_str());
    match &args.content_location {
        Some(location) => request.with_content_location(location.as_str()),
        None => request,
    }
}

/// Waits for the next completion and writes its result to `output_dir`.
///
/// Returns whether the transformation succeeded.
///
async fn write_next(completions: &mut UnboundedReceiver<Completion>, output_dir: &path::Path) -> anyhow::Result<bool> {
    let Some(completion) = completions.recv().await else {
        bail!("transformer stopped reporting completions");
    };

    match completion.outcome {
        Ok(entity) => {
            let output_path = output_dir.join(format!("{}.{}", completion.id, RESULT_EXTENSION));
            entity.copy_to(&output_path)?;
            info!("{} -> {}", completion.id, output_path.display());
            Ok(true)
        }
        Err(err) => {
            error!("Unable to transform {}: {}", completion.id, err);
            Ok(false)
        }
    }
}
