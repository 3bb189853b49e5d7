use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ascii_filter::charset::CharsetPreset;
use ascii_filter::config::{parse_block_size, ConfigOverrides, FilterConfig, ResolvedConfig};
use ascii_filter::decoding::{check_extension, probe};
use ascii_filter::encoding::{FfmpegMode, FfmpegTools};
use ascii_filter::error_codes::{envelope_for, exit_code_for};
use ascii_filter::filter_job::{build_filter_plan, run_filter_job};
use ascii_filter::still::run_still;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("ASCII_FILTER_GIT_HASH"),
    ")"
);

#[derive(Debug, Parser)]
#[command(name = "ascii-filter")]
#[command(version = VERSION)]
#[command(about = "Re-render videos as colorized ASCII art")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ConversionArgs {
    /// YAML file with default settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_parser = parse_preset, conflicts_with = "ramp")]
    preset: Option<CharsetPreset>,
    /// Custom darkest-to-brightest symbol ramp.
    #[arg(long)]
    ramp: Option<String>,
    /// Pixels sampled per symbol, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_block_size)]
    block: Option<(u32, u32)>,
    /// Draw every symbol in white.
    #[arg(long)]
    no_color: bool,
    /// TrueType/OpenType font used to draw symbols.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Glyph pixel height; defaults to the block height.
    #[arg(long)]
    font_size: Option<f32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Filter a video file.
    Render {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        conversion: ConversionArgs,
        #[arg(long)]
        max_frames: Option<u64>,
        /// Drop the source audio track.
        #[arg(long)]
        no_audio: bool,
        /// Output video bit rate in bits per second.
        #[arg(long)]
        bitrate: Option<u64>,
        #[arg(long, value_enum)]
        ffmpeg: Option<FfmpegMode>,
        /// Print the resolved plan without running it.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print stream information for a video file.
    Probe {
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = FfmpegMode::Auto)]
        ffmpeg: FfmpegMode,
        #[arg(long)]
        json: bool,
    },
    /// Convert a single image.
    Still {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        conversion: ConversionArgs,
        /// Also write the symbol grid as plain text.
        #[arg(long)]
        text: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Self::Render { json, .. } | Self::Probe { json, .. } | Self::Still { json, .. } => *json,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let json = cli.command.wants_json();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::from(exit_code_for(&error) as u8)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Render {
            input,
            output,
            conversion,
            max_frames,
            no_audio,
            bitrate,
            ffmpeg,
            dry_run,
            json,
        } => {
            let overrides = ConfigOverrides {
                max_frames,
                no_audio,
                bitrate,
                ffmpeg,
                ..conversion.overrides()
            };
            let config = resolve_config(conversion.config.as_deref(), &overrides)?;
            run_render(&input, &output, &config, dry_run, json)
        }
        Commands::Probe {
            input,
            ffmpeg,
            json,
        } => run_probe(&input, ffmpeg, json),
        Commands::Still {
            input,
            output,
            conversion,
            text,
            json,
        } => {
            let config = resolve_config(conversion.config.as_deref(), &conversion.overrides())?;
            let summary = run_still(&input, &output, text.as_deref(), &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Wrote {} ({}x{} px, {} cols x {} rows)",
                    summary.output.display(),
                    summary.width,
                    summary.height,
                    summary.cols,
                    summary.rows
                );
            }
            Ok(())
        }
    }
}

impl ConversionArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            preset: self.preset,
            ramp: self.ramp.clone(),
            block: self.block,
            no_color: self.no_color,
            font: self.font.clone(),
            font_size: self.font_size,
            ..ConfigOverrides::default()
        }
    }
}

fn parse_preset(raw: &str) -> Result<CharsetPreset> {
    raw.parse()
}

fn resolve_config(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let mut config = match config_path {
        Some(path) => FilterConfig::load(path)?,
        None => FilterConfig::default(),
    };
    config.apply(overrides);
    config.resolve()
}

fn run_render(
    input: &Path,
    output: &Path,
    config: &ResolvedConfig,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let plan = build_filter_plan(input, output, config)?;
    if dry_run {
        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            println!("Input:   {}", plan.input.display());
            println!("Output:  {}", plan.output.display());
            println!("Charset: {} ({} symbols)", plan.charset, plan.ramp.chars().count());
            println!("Block:   {}x{}", plan.block_width, plan.block_height);
            println!("Color:   {}", if plan.color { "on" } else { "off" });
            println!("Audio:   {}", if plan.audio { "passthrough" } else { "dropped" });
            match plan.max_frames {
                Some(max) => println!("Frames:  first {max}"),
                None => println!("Frames:  all"),
            }
            println!("Font:    {} @ {}px", plan.font_path.display(), plan.font_size);
            println!("Encoder: {} (ffmpeg={})", plan.encoder, plan.ffmpeg_mode);
        }
        return Ok(());
    }

    let summary = run_filter_job(&plan, config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Wrote {} ({} frames, {} dropped, {} audio packets)",
            plan.output.display(),
            summary.frames_encoded,
            summary.frames_dropped,
            summary.audio_packets_forwarded
        );
        if let Some(error) = summary.finalize_error.as_deref() {
            println!("Warning: output may be incomplete: {error}");
        }
    }
    Ok(())
}

fn run_probe(input: &Path, mode: FfmpegMode, json: bool) -> Result<()> {
    check_extension(input)?;
    let tools = FfmpegTools::resolve(mode)?;
    let metadata = probe(&tools, input)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }
    println!(
        "OK: {} ({}x{}, {:.3} fps, {})",
        input.display(),
        metadata.width,
        metadata.height,
        metadata.fps(),
        metadata.pixel_format.as_deref().unwrap_or("unknown pixel format")
    );
    match (metadata.duration_seconds, metadata.estimated_total_frames()) {
        (Some(duration), Some(frames)) => println!("Duration: {duration:.2}s (~{frames} frames)"),
        _ => println!("Duration: unknown"),
    }
    if let Some(bit_rate) = metadata.bit_rate {
        println!("Bit rate: {bit_rate} b/s");
    }
    println!("Audio: {}", if metadata.has_audio { "yes" } else { "no" });
    Ok(())
}
