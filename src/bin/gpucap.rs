use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use gpucap::{
    CaptureConfig, CaptureSession, Fps, FrameNumber, Recorder, RecordingConfig, WgpuDevice,
};

#[derive(Parser, Debug)]
#[command(name = "gpucap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a generated animation from a headless GPU device.
    Record(RecordArgs),
    /// Capture one frame through the blocking path and save it as a PNG.
    Screenshot(ScreenshotArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Output GIF path.
    #[arg(long)]
    out: PathBuf,

    /// Optional MP4 path (requires `ffmpeg` on PATH).
    #[arg(long)]
    video: Option<PathBuf>,

    /// Number of frames to render.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// GIF quality, 0..=100.
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// Capture pipeline configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the GIF after a successful MP4 transcode.
    #[arg(long, default_value_t = false)]
    keep_intermediate: bool,

    /// Render as fast as possible instead of pacing frames at `--fps`.
    #[arg(long, default_value_t = false)]
    unpaced: bool,
}

#[derive(Parser, Debug)]
struct ScreenshotArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Fill color as `RRGGBB` hex.
    #[arg(long, default_value = "3366cc")]
    color: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
        Command::Screenshot(args) => cmd_screenshot(args),
    }
}

fn load_capture_config(path: Option<&Path>) -> anyhow::Result<CaptureConfig> {
    let Some(path) = path else {
        return Ok(CaptureConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read capture config '{}'", path.display()))?;
    Ok(CaptureConfig::from_json_str(&json)?)
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let capture_cfg = load_capture_config(args.config.as_deref())?;
    let fps = Fps::integer(args.fps)?;
    let mut rec_cfg = RecordingConfig::new(&args.out, fps)
        .with_quality(args.quality)
        .with_keep_intermediate(args.keep_intermediate);
    if let Some(video) = &args.video {
        rec_cfg = rec_cfg.with_video_path(video);
    }

    let device = WgpuDevice::headless()?;
    let target = device.create_render_target(args.width, args.height);
    let mut recorder = Recorder::new(device, capture_cfg)?;
    recorder.start(rec_cfg)?;

    let frame_time = Duration::from_millis(fps.frame_duration_ms());
    for i in 0..args.frames {
        let started = Instant::now();
        let t = i as f64 / args.frames.max(1) as f64;
        recorder
            .capture()
            .device()
            .clear_texture(&target, hue_color(t));
        recorder.capture_frame(&target, args.width, args.height)?;
        recorder.tick();

        if !args.unpaced
            && let Some(rest) = frame_time.checked_sub(started.elapsed())
        {
            std::thread::sleep(rest);
        }
    }

    let summary = recorder.stop()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    for path in [&summary.output.animation_path, &summary.output.video_path]
        .into_iter()
        .flatten()
    {
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_screenshot(args: ScreenshotArgs) -> anyhow::Result<()> {
    let color = parse_hex_color(&args.color)?;
    let device = WgpuDevice::headless()?;
    let target = device.create_render_target(args.width, args.height);
    device.clear_texture(&target, color);

    let mut session = CaptureSession::new(device, CaptureConfig::default())?;
    let frame = session.capture_still(&target, args.width, args.height, FrameNumber(0))?;
    frame.save_png(&args.out)?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn hue_color(t: f64) -> wgpu::Color {
    let h = (t.fract() * 6.0).max(0.0);
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    wgpu::Color { r, g, b, a: 1.0 }
}

fn parse_hex_color(s: &str) -> anyhow::Result<wgpu::Color> {
    let hex = s.trim_start_matches('#');
    anyhow::ensure!(hex.len() == 6, "color must be RRGGBB hex, got '{s}'");
    let v = u32::from_str_radix(hex, 16).with_context(|| format!("invalid hex color '{s}'"))?;
    let channel = |shift: u32| f64::from((v >> shift) & 0xff) / 255.0;
    Ok(wgpu::Color {
        r: channel(16),
        g: channel(8),
        b: channel(0),
        a: 1.0,
    })
}
