//! One-shot line detection
//!
//! Runs the detection pipeline on local image files against the configured
//! inference sidecars and prints one JSON result per file. Optionally saves
//! the enhanced sign region of each located vehicle for inspection.

use anyhow::Context;
use brt_arrivals::infra::{AppContext, Config};
use brt_arrivals::services::{Frame, SignExtractor};
use bytes::Bytes;
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brt-detect", about = "Identify the BRT line in vehicle photos")]
struct Args {
    /// Image files to process
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Write each enhanced sign region as PNG into this directory
    #[arg(long)]
    dump_regions: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let ctx = AppContext::from_config(config, None)?;

    if let Some(dir) = &args.dump_regions {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    for path in &args.images {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

        let file = path.display().to_string();
        let frame = match Frame::decode(Bytes::from(bytes)).await {
            Ok(frame) => frame,
            Err(e) => {
                println!("{}", json!({ "file": file, "status": "error", "error": e.to_string() }));
                continue;
            }
        };

        let result = match ctx.pipeline.identify_frame(&frame).await {
            Some(line) => json!({
                "file": file,
                "status": "detected",
                "line_code": line.line_code,
                "line_name": line.line_name,
            }),
            None => json!({ "file": file, "status": "not_found" }),
        };
        println!("{}", result);

        if let Some(dir) = &args.dump_regions {
            dump_regions(&ctx, path, &frame, dir).await?;
        }
    }

    Ok(())
}

async fn dump_regions(
    ctx: &AppContext,
    path: &Path,
    frame: &Frame,
    dir: &Path,
) -> anyhow::Result<()> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");

    let detections = ctx.pipeline.locate(frame).await.unwrap_or_default();
    let extractor = SignExtractor::new();
    for (rank, detection) in detections.iter().enumerate() {
        if let Some(region) = extractor.extract(frame.image(), &detection.bounding_box) {
            let out = dir.join(format!("{}_sign_{}.png", stem, rank));
            std::fs::write(&out, region.to_png()?)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            eprintln!("wrote {}", out.display());
        }
    }
    Ok(())
}
