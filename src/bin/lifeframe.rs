use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use lifeframe::{CoordinatorConfig, Device, FrameCoordinator, OffscreenSurface};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lifeframe", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the frame loop for a number of frames.
    Run(RunArgs),
    /// Validate a configuration file and print the effective settings.
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Coordinator configuration JSON. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to submit.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Simulated seconds between frames.
    #[arg(long, default_value_t = 1.0 / 60.0)]
    frame_time: f32,

    /// Device to run on.
    #[arg(long, value_enum, default_value_t = BackendChoice::Headless)]
    backend: BackendChoice,

    /// Print the final grid as text.
    #[arg(long)]
    print_grid: bool,
}

#[derive(Parser, Debug)]
struct CheckConfigArgs {
    /// Coordinator configuration JSON.
    #[arg(long)]
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Headless,
    #[cfg(feature = "gpu")]
    Gpu,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::CheckConfig(args) => cmd_check_config(args),
    }
}

fn read_config(path: Option<&Path>) -> anyhow::Result<CoordinatorConfig> {
    match path {
        Some(p) => CoordinatorConfig::load(p)
            .with_context(|| format!("load configuration '{}'", p.display())),
        None => Ok(CoordinatorConfig::default()),
    }
}

fn cmd_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let config = read_config(Some(&args.config))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!(
        "ok: {}x{} grid, {} frames in flight, {} byte arenas (minimum {})",
        config.grid_width,
        config.grid_height,
        config.frames_in_flight,
        config.arena_capacity_bytes,
        CoordinatorConfig::min_arena_capacity()
    );
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = read_config(args.config.as_deref())?;
    match args.backend {
        BackendChoice::Headless => drive(lifeframe::HeadlessDevice::new(), config, &args),
        #[cfg(feature = "gpu")]
        BackendChoice::Gpu => {
            let device = lifeframe::WgpuDevice::new().context("initialize gpu device")?;
            drive(device, config, &args)
        }
    }
}

fn drive<D: Device>(
    device: D,
    config: CoordinatorConfig,
    args: &RunArgs,
) -> anyhow::Result<()> {
    let (width, height) = config.surface_size();
    let format = config.color_format;
    let mut surface = OffscreenSurface::new(&device, width, height, format, 3)
        .context("create offscreen surface")?;
    let mut coordinator =
        FrameCoordinator::new(device, config.clone()).context("set up frame coordinator")?;

    let started = Instant::now();
    for i in 0..args.frames {
        let elapsed = i as f32 * args.frame_time;
        coordinator
            .render_to(&mut surface, elapsed)
            .with_context(|| format!("frame {}", i + 1))?;
    }
    coordinator.wait_idle().context("wait for device")?;
    let wall = started.elapsed();

    let stats = coordinator.stats();
    println!(
        "frames: {} submitted, {} completed, {} pacing waits, {:.2} ms/frame",
        stats.frames_submitted,
        stats.frames_completed,
        stats.pacing_waits,
        wall.as_secs_f64() * 1000.0 / args.frames.max(1) as f64
    );

    if coordinator.stepper().is_some() {
        let grid = coordinator.read_grid().context("read back grid")?;
        let live = grid.iter().filter(|&&c| c != 0).count();
        println!("live cells after {} generations: {live}", stats.frames_submitted);
        if args.print_grid {
            for row in grid.chunks(config.grid_width as usize) {
                let line: String = row
                    .iter()
                    .map(|&c| if c != 0 { '#' } else { '.' })
                    .collect();
                println!("{line}");
            }
        }
    }

    // The device is idle, so the targets can go before the coordinator.
    surface.release(coordinator.device());
    coordinator.shutdown().context("shut down frame coordinator")?;
    Ok(())
}
