//! memlink CLI entrypoint.
//!
//! ```bash
//! memlink plan --src 640x480 --dst 300x300 --preprocess "resize=keep-aspect" --json
//! memlink bench --width 1920 --height 1080 --format nv12 --frames 200
//! memlink bench --width 640 --height 480 --format bgra --frames 50 --device-config device.json --json
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use memlink_core::geometry::{GeometryPlan, Rect, Size, plan_geometry};
use memlink_core::host::host_frame;
use memlink_core::{AccessMode, MemError, PreprocessConfig, Result};
use memlink_runtime::{AsyncMapper, MapWorker, WorkerConfig};
use memlink_texture::{
    ConvertTarget, DeviceConfig, SoftwareDriver, TextureContext, TextureDevice, TextureFormat,
};

#[derive(Parser, Debug)]
#[command(
    name = "memlink",
    version,
    about = "Cross-domain memory mapping tooling",
    arg_required_else_help = true,
    after_help = "Examples:\n  memlink plan --src 640x480 --dst 300x300 --preprocess resize=keep-aspect\n  memlink bench --width 1920 --height 1080 --format nv12 --frames 200 --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the scale/crop/pad plan for one conversion.
    Plan(PlanArgs),
    /// Round-trip frames through a software texture device and report pool behavior.
    Bench(BenchArgs),
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    /// Source size, WxH.
    #[arg(long = "src", value_parser = parse_size)]
    src: Size,

    /// Destination size, WxH.
    #[arg(long = "dst", value_parser = parse_size)]
    dst: Size,

    /// Region of interest in the source, X,Y,W,H.
    #[arg(long = "roi", value_parser = parse_rect)]
    roi: Option<Rect>,

    /// Preprocess options, e.g. "resize=keep-aspect;crop=center".
    #[arg(long = "preprocess", default_value = "")]
    preprocess: String,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct BenchArgs {
    #[arg(long = "width", default_value_t = 1920)]
    width: usize,

    #[arg(long = "height", default_value_t = 1080)]
    height: usize,

    /// nv12, bgra, rgba, bgrx or gray8.
    #[arg(long = "format", default_value = "nv12")]
    format: TextureFormat,

    #[arg(long = "frames", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    frames: u32,

    /// Overrides `staging_capacity` from the device config.
    #[arg(long = "staging-capacity")]
    staging_capacity: Option<usize>,

    /// Device configuration JSON.
    #[arg(long = "device-config")]
    device_config: Option<PathBuf>,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

const JSON_SCHEMA_VERSION: u32 = 1;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Plan(args) if args.json => Some("plan"),
        Commands::Bench(args) if args.json => Some("bench"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Plan(args) => run_plan(args),
        Commands::Bench(args) => build_runtime().and_then(|rt| rt.block_on(run_bench(args))),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err.to_string()));
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| MemError::InvalidArgument(format!("tokio runtime: {e}")))
}

// ─── Argument parsing ───────────────────────────────────────────────────────

fn parse_size(s: &str) -> std::result::Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let width = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let height = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    Ok(Size::new(width, height))
}

fn parse_rect(s: &str) -> std::result::Result<Rect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| format!("expected X,Y,W,H integers, got '{s}'"))?;
    match values.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected X,Y,W,H, got '{s}'")),
    }
}

fn parse_preprocess(s: &str) -> Result<PreprocessConfig> {
    if s.trim().is_empty() {
        Ok(PreprocessConfig::default())
    } else {
        s.parse()
    }
}

// ─── plan ───────────────────────────────────────────────────────────────────

fn run_plan(args: PlanArgs) -> Result<()> {
    let config = parse_preprocess(&args.preprocess)?;
    let plan = plan_geometry(&config, args.src, args.roi, args.dst, None)?;
    if args.json {
        println!("{}", plan_json(&plan));
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn plan_json(plan: &GeometryPlan) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "plan",
        "ok": true,
        "plan": plan,
    })
    .to_string()
}

fn print_plan(plan: &GeometryPlan) {
    let r = |rect: &Rect| format!("{}x{}+{}+{}", rect.width, rect.height, rect.x, rect.y);
    let t = &plan.transform;
    println!("src_rect   {}", r(&plan.src_rect));
    println!("dst_rect   {}", r(&plan.dst_rect));
    println!("fill       {:?}", plan.fill);
    println!("scale      {:.6} x {:.6}", t.resize_scale_x, t.resize_scale_y);
    println!("crop       {},{}", t.crop_x, t.crop_y);
    println!("padding    {},{}", t.padding_x, t.padding_y);
}

// ─── bench ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BenchReport {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    format: TextureFormat,
    width: usize,
    height: usize,
    frames: u32,
    elapsed_ms: u64,
    fps: f64,
    staging: StagingReport,
    processors: usize,
    reentrancy_violations: usize,
}

#[derive(Debug, Serialize)]
struct StagingReport {
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    hit_rate_pct: f64,
}

fn load_device_config(args: &BenchArgs) -> Result<DeviceConfig> {
    let mut config = match &args.device_config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                MemError::InvalidArgument(format!("device config {}: {e}", path.display()))
            })?;
            DeviceConfig::from_json_str(&text)?
        }
        None => DeviceConfig::default(),
    };
    if let Some(capacity) = args.staging_capacity {
        config.staging_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

async fn run_bench(args: BenchArgs) -> Result<()> {
    let config = load_device_config(&args)?;
    let driver = Arc::new(SoftwareDriver::for_config(&config));
    let device = TextureDevice::new(driver.clone(), config)?;
    let tex = TextureContext::new(device);
    let worker = MapWorker::new(WorkerConfig::default());

    let source = host_frame(args.format.image_format(), args.width, args.height)?;
    let on_device = worker
        .map_frame(source, Some(tex.as_context()), AccessMode::Read)
        .await?;

    // Texture blits cannot target NV12.
    let out_format = match args.format {
        TextureFormat::Nv12 => TextureFormat::Bgra,
        other => other,
    };
    let target = ConvertTarget::new(
        (args.width / 2).max(1),
        (args.height / 2).max(1),
        out_format,
    );
    let preprocess: PreprocessConfig = "resize=ignore-aspect".parse()?;

    let start = Instant::now();
    for _ in 0..args.frames {
        let (tex, src, preprocess) = (Arc::clone(&tex), Arc::clone(&on_device), preprocess.clone());
        let converted = worker
            .run("convert", move || {
                tex.convert(&src, None, target, &preprocess, None)
                    .map(|(frame, _)| frame)
            })
            .await?;
        let host = worker.map_frame(converted, None, AccessMode::Read).await?;
        drop(host);
    }
    let elapsed = start.elapsed();
    worker.shutdown();

    let device = tex.device();
    device.report_pool_stats();
    let stats = device.staging_pool().stats();
    let report = BenchReport {
        schema_version: JSON_SCHEMA_VERSION,
        command: "bench",
        ok: true,
        format: args.format,
        width: args.width,
        height: args.height,
        frames: args.frames,
        elapsed_ms: elapsed.as_millis() as u64,
        fps: args.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        staging: StagingReport {
            capacity: device.staging_pool().capacity(),
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            evictions: stats.evictions.load(Ordering::Relaxed),
            hit_rate_pct: stats.hit_rate(),
        },
        processors: device.processors().len(),
        reentrancy_violations: driver.reentrancy_violations(),
    };

    if args.json {
        let line = serde_json::to_string(&report)
            .map_err(|e| MemError::InvalidArgument(format!("report JSON: {e}")))?;
        println!("{line}");
    } else {
        println!(
            "{} {}x{}: {} frames in {} ms ({:.1} fps)",
            report.format, report.width, report.height, report.frames, report.elapsed_ms, report.fps
        );
        println!(
            "staging: capacity {} hits {} misses {} evictions {} hit rate {:.1}%",
            report.staging.capacity,
            report.staging.hits,
            report.staging.misses,
            report.staging.evictions,
            report.staging.hit_rate_pct
        );
        println!("processors: {}", report.processors);
    }
    Ok(())
}

fn command_error_json(command: &str, error: &str) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": error,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_and_rects() {
        assert_eq!(parse_size("640x480"), Ok(Size::new(640, 480)));
        assert_eq!(parse_size("32X16"), Ok(Size::new(32, 16)));
        assert!(parse_size("640").is_err());
        assert_eq!(parse_rect("1, 2, 3, 4"), Ok(Rect::new(1, 2, 3, 4)));
        assert!(parse_rect("1,2,3").is_err());
    }

    #[test]
    fn empty_preprocess_is_default() {
        assert_eq!(parse_preprocess(" ").expect("config"), PreprocessConfig::default());
        assert!(parse_preprocess("resize=sideways").is_err());
    }

    #[test]
    fn error_json_has_schema_version() {
        let value: serde_json::Value =
            serde_json::from_str(&command_error_json("plan", "bad \"roi\"")).expect("json");
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "bad \"roi\"");
    }
}
