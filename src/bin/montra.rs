use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use montra::{
    AssetStore, CancelToken, CompositionSpec, ExportConfig, ExportOrchestrator, OfflineDriver,
    OutputFormat, RealtimeDriver, RenderDriver,
};

#[derive(Parser, Debug)]
#[command(name = "montra", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a composition JSON without rendering.
    Validate(ValidateArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
    /// Render the full composition (requires `ffmpeg` on PATH).
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Input composition JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input composition JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input composition JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output directory for the rendered file.
    #[arg(long, default_value = "rendered")]
    out_dir: PathBuf,

    /// Driver to use.
    #[arg(long, value_enum, default_value_t = DriverChoice::Offline)]
    driver: DriverChoice,

    /// Container/codec for the offline driver.
    #[arg(long, value_enum, default_value_t = FormatChoice::Mp4)]
    format: FormatChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DriverChoice {
    Offline,
    Realtime,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Mp4,
    Webm,
}

impl From<FormatChoice> for OutputFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Mp4 => OutputFormat::H264Mp4,
            FormatChoice::Webm => OutputFormat::Vp9WebM,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Validate(args) => cmd_validate(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
    }
}

fn read_spec_json(path: &Path) -> anyhow::Result<CompositionSpec> {
    let f = File::open(path).with_context(|| format!("open composition '{}'", path.display()))?;
    let r = BufReader::new(f);
    let spec: CompositionSpec =
        serde_json::from_reader(r).with_context(|| "parse composition JSON")?;
    Ok(spec)
}

fn asset_root(in_path: &Path) -> PathBuf {
    in_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let spec = read_spec_json(&args.in_path)?;
    spec.validate()?;
    println!(
        "ok: {} items, {} frames at {} fps ({} ms)",
        spec.items.len(),
        spec.total_frames(),
        spec.fps,
        spec.total_duration_ms()
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let spec = read_spec_json(&args.in_path)?;
    spec.validate()?;

    let assets = AssetStore::new(asset_root(&args.in_path));
    let t_ms = spec.frame_timestamp_ms(args.frame);
    let frame = montra::render_frame(&spec, t_ms, &assets)?;

    let mut opaque = Vec::new();
    montra::raster::flatten_opaque(&frame, [0, 0, 0], &mut opaque);
    let img = image::RgbaImage::from_raw(frame.width, frame.height, opaque)
        .context("frame buffer does not match canvas dimensions")?;
    img.save(&args.out)
        .with_context(|| format!("write PNG '{}'", args.out.display()))?;

    println!("wrote {} ({}x{})", args.out.display(), frame.width, frame.height);
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let spec = read_spec_json(&args.in_path)?;

    let root = asset_root(&args.in_path);
    let orch = ExportOrchestrator::new(ExportConfig {
        asset_root: root,
        staging_dir: args.out_dir.join(".staging"),
    });

    let driver: Box<dyn RenderDriver> = match args.driver {
        DriverChoice::Offline => Box::new(OfflineDriver::new(&args.out_dir, args.format.into())),
        DriverChoice::Realtime => Box::new(RealtimeDriver::new(&args.out_dir)),
    };

    let response = orch.export_response(&spec, driver.as_ref(), &CancelToken::new(), &mut |p| {
        tracing::info!(percent = p, "render progress");
    });

    if response.success {
        match response.video_url {
            Some(url) => println!("done: {url}"),
            None => println!("done: in-memory capture"),
        }
        Ok(())
    } else {
        anyhow::bail!(
            "render failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
