use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use cloudconfig::MissedSeekPolicy;
use pointcloud::{GpuMemoryMode, GpuPowerPreference};

use crate::bootstrap::parse_surface_size;

#[derive(Parser, Debug)]
#[command(
    name = "cloudcast",
    author,
    version,
    about = "Reconstruct colored point clouds from composite RGB-D video"
)]
pub struct Cli {
    /// Configuration file; defaults to `cloudcast.toml` in the config directory.
    #[arg(long, global = true, env = "CLOUDCAST_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the source and reconstruct a live cloud every tick.
    Live(LiveArgs),
    /// Seek through the source and aggregate one cloud from many frames.
    Capture(CaptureArgs),
    /// Inspect or create the configuration file.
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Directory of composite frames (png/jpg/bmp, sorted by name). A synthetic
    /// orbit is rendered when omitted.
    #[arg(long, value_name = "DIR")]
    pub frames: Option<PathBuf>,

    /// Playback rate used to map time onto frames.
    #[arg(long, value_name = "FPS", default_value_t = 30.0)]
    pub fps: f64,

    /// Composite frame size of the synthetic source.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size, default_value = "640x360")]
    pub frame_size: (u32, u32),

    /// Length of the synthetic source in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    pub duration: f64,

    /// Polls a synthetic seek takes to complete.
    #[arg(long, value_name = "POLLS", default_value_t = 2)]
    pub seek_latency: u32,
}

#[derive(Args, Debug, Clone)]
pub struct GpuArgs {
    /// Adapter power preference: `low` or `high`.
    #[arg(long, value_name = "PREF", value_parser = parse_power_preference, default_value = "high")]
    pub gpu_power: GpuPowerPreference,

    /// Device memory hint: `balanced` or `performance`.
    #[arg(long, value_name = "MODE", value_parser = parse_memory_mode, default_value = "balanced")]
    pub gpu_memory: GpuMemoryMode,

    /// Accept a software adapter when no hardware adapter is found.
    #[arg(long)]
    pub allow_software: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReconstructArgs {
    /// Fraction of depth texels turned into points (0-1).
    #[arg(long, value_name = "FRACTION")]
    pub quality: Option<f32>,

    /// World-space size of each rendered point.
    #[arg(long, value_name = "SIZE")]
    pub point_size: Option<f32>,

    /// Size of the offscreen view used for still exports.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size, default_value = "1280x720")]
    pub view_size: (u32, u32),

    /// Export the rendered view to this PNG path.
    #[arg(long, value_name = "PATH")]
    pub still: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LiveArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub gpu: GpuArgs,
    #[command(flatten)]
    pub reconstruct: ReconstructArgs,

    /// Number of ticks to run before exiting.
    #[arg(long, value_name = "COUNT", default_value_t = 60)]
    pub ticks: u32,

    /// Read back the point buffer each tick and log debug marker positions.
    #[arg(long)]
    pub diagnostics: bool,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub gpu: GpuArgs,
    #[command(flatten)]
    pub reconstruct: ReconstructArgs,

    /// Number of evenly spaced timestamps to sample.
    #[arg(long, value_name = "COUNT")]
    pub samples: Option<u32>,

    /// Maximum seek error, in seconds, for a pose to be recorded.
    #[arg(long, value_name = "SECONDS")]
    pub tolerance: Option<f64>,

    /// Handling of seeks outside the tolerance: `drop` or `keep-points`.
    #[arg(long, value_name = "POLICY", value_parser = parse_missed_seek)]
    pub missed_seek: Option<MissedSeekPolicy>,

    /// Write the capture report as JSON.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Write the aggregated cloud as an ASCII PLY file.
    #[arg(long, value_name = "PATH")]
    pub ply: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print resolved config and output directories.
    Where,
    /// Print the effective configuration as TOML.
    Show,
    /// Write the default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_power_preference(value: &str) -> Result<GpuPowerPreference, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" | "low-power" => Ok(GpuPowerPreference::Low),
        "high" | "high-performance" => Ok(GpuPowerPreference::High),
        other => Err(format!("unknown power preference '{other}'; expected low or high")),
    }
}

pub fn parse_memory_mode(value: &str) -> Result<GpuMemoryMode, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "balanced" => Ok(GpuMemoryMode::Balanced),
        "performance" => Ok(GpuMemoryMode::Performance),
        other => Err(format!(
            "unknown memory mode '{other}'; expected balanced or performance"
        )),
    }
}

pub fn parse_missed_seek(value: &str) -> Result<MissedSeekPolicy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "drop" => Ok(MissedSeekPolicy::Drop),
        "keep-points" | "keep" => Ok(MissedSeekPolicy::KeepPoints),
        other => Err(format!(
            "unknown missed-seek policy '{other}'; expected drop or keep-points"
        )),
    }
}
