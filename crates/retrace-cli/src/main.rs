use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand, ValueEnum};

use retrace_engine::context::Context;
use retrace_engine::device::types::{PixelFormat, PixelType};
use retrace_engine::device::{Device, GpuDevice, GpuInit, SoftDevice, SoftDeviceOptions};
use retrace_engine::exec::{ExecutorExt, ReadPixelsParams};
use retrace_engine::logging::{LoggingConfig, filter_for_verbosity, init_logging};
use retrace_engine::record::{CommandLog, replay};

#[derive(Parser, Debug)]
#[command(name = "retrace", about = "Replay and inspect GPU command logs")]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Execute a log against a fresh device and drive every readback
    Replay {
        log: PathBuf,

        #[arg(long, value_enum, default_value_t = Backend::Soft)]
        backend: Backend,

        /// Default framebuffer width
        #[arg(long, value_name = "PIXELS", default_value_t = 256)]
        width: u32,

        /// Default framebuffer height
        #[arg(long, value_name = "PIXELS", default_value_t = 256)]
        height: u32,

        /// Write the final default framebuffer to this PNG file
        #[arg(long, value_name = "PATH")]
        png: Option<PathBuf>,

        /// Request timestamp queries from the GPU adapter
        #[arg(long)]
        timers: bool,
    },
    /// Validate a log and print per-operation counts
    Inspect { log: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    /// Deterministic CPU rasterizer
    Soft,
    /// Headless wgpu device
    Gpu,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LoggingConfig {
        env_filter: (args.verbose > 0).then(|| filter_for_verbosity(args.verbose).to_string()),
        ..Default::default()
    });

    match args.command {
        Cmd::Replay {
            log,
            backend,
            width,
            height,
            png,
            timers,
        } => {
            let commands = load(&log)?;
            match backend {
                Backend::Soft => {
                    let device = SoftDevice::new(SoftDeviceOptions {
                        width,
                        height,
                        ..Default::default()
                    });
                    run(Context::new(device), &commands, png.as_deref())
                }
                Backend::Gpu => {
                    let device = pollster::block_on(GpuDevice::new(GpuInit {
                        width,
                        height,
                        timer_query: timers,
                        ..Default::default()
                    }))
                    .context("initialize wgpu device")?;
                    run(Context::new(device), &commands, png.as_deref())
                }
            }
        }
        Cmd::Inspect { log } => inspect(&load(&log)?),
    }
}

fn load(path: &Path) -> anyhow::Result<CommandLog> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    CommandLog::read_from(BufReader::new(file))
        .with_context(|| format!("parse command log {}", path.display()))
}

fn run<D: Device>(mut ctx: Context<D>, log: &CommandLog, png: Option<&Path>) -> anyhow::Result<()> {
    log::info!("replaying {} commands on {}", log.len(), ctx.device().describe());
    let outcome = replay(log, &mut ctx)?;

    for (i, read) in outcome.reads.iter().enumerate() {
        let pixels = pollster::block_on(read.wait()).with_context(|| format!("readback {i}"))?;
        println!(
            "read {i}: {}x{} {:?}/{:?} {} bytes",
            pixels.width,
            pixels.height,
            pixels.format,
            pixels.ty,
            pixels.data.len()
        );
    }
    for (i, timer) in outcome.timers.iter().enumerate() {
        let elapsed = pollster::block_on(timer.wait()).with_context(|| format!("timer {i}"))?;
        println!("timer {i}: {elapsed:?}");
    }
    for status in &outcome.statuses {
        println!("status: {status} (0x{:04x})", status.code());
    }

    if let Some(path) = png {
        let read = ctx.read_pixels(ReadPixelsParams {
            format: PixelFormat::Rgba,
            ty: PixelType::Uint8,
            ..Default::default()
        })?;
        let pixels = pollster::block_on(read.wait()).context("final readback")?;
        if pixels.data.len() != pixels.expected_len() {
            bail!(
                "readback returned {} bytes, expected {}",
                pixels.data.len(),
                pixels.expected_len()
            );
        }
        let top_down: Vec<u8> = pixels.rows_top_down().flatten().copied().collect();
        image::save_buffer(
            path,
            &top_down,
            pixels.width,
            pixels.height,
            image::ColorType::Rgba8,
        )
        .with_context(|| format!("write {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    ctx.dispose();
    Ok(())
}

fn inspect(log: &CommandLog) -> anyhow::Result<()> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for command in log {
        *counts.entry(command.name()).or_default() += 1;
    }
    println!("{} commands", log.len());
    for (name, n) in counts {
        println!("  {name:<20} {n}");
    }
    Ok(())
}
