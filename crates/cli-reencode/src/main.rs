use std::path::{Path, PathBuf};
use std::process::ExitCode;
use anyhow::Context;
use clap::Parser;
use engine::{bench, fsops, EncodeConfig, EncodeError, EncodeOutcome, EncodeRequest};
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};

/// Presets understood by the x264/x265 encoders
const PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

/// Re-encode one video file with ffmpeg, with policy checks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video file
    input: PathBuf,

    /// Explicit output file path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory derived outputs and benchmark artifacts land in
    #[arg(long, default_value = ".")]
    outdir: PathBuf,

    /// Target video codec
    #[arg(long)]
    codec: Option<String>,

    /// Target audio codec
    #[arg(long)]
    acodec: Option<String>,

    /// CRF value, 0-51
    #[arg(long)]
    crf: Option<u8>,

    /// Encoder preset
    #[arg(long)]
    preset: Option<String>,

    /// Re-encode even if the input already carries the target codec
    #[arg(long)]
    force: bool,

    /// Replace the input file with the validated output
    #[arg(long, conflicts_with_all = ["replacelink", "benchmark", "benchmark_now"])]
    replace: bool,

    /// Replace the input file with a symlink to the output
    #[arg(long, conflicts_with_all = ["benchmark", "benchmark_now"])]
    replacelink: bool,

    /// With --replacelink, delete the original instead of backing it up
    #[arg(long)]
    nobackup: bool,

    /// Print probe information for the input file and exit
    #[arg(long)]
    probe: bool,

    /// Run the benchmark sweep over the fixed preset/CRF configurations
    #[arg(long, conflicts_with = "benchmark_now")]
    benchmark: bool,

    /// Run a single benchmark sample with the current settings
    #[arg(long)]
    benchmark_now: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let tag = e
                .downcast_ref::<EncodeError>()
                .map(EncodeError::tag)
                .unwrap_or("Error");
            error!("[{}] {:#}", tag, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cfg = EncodeConfig::load_config(args.config.as_deref())
        .context("failed to load configuration")?;
    validate_args(&args)?;

    if args.probe {
        return print_probe(&cfg, &args.input).await;
    }

    let req = build_request(&cfg, &args);

    if args.benchmark {
        // member failures are tolerated; a finished sweep is a success
        bench::run_sweep(&cfg, &req).await?;
        return Ok(());
    }

    let outcome = engine::evaluate(&cfg, &req).await?;
    match outcome {
        EncodeOutcome::SkippedAlreadyEncoded => {
            info!("nothing to do");
        }
        EncodeOutcome::CopiedAlreadyEncoded { output } => {
            info!("✅ copied to '{}'", output.display());
        }
        EncodeOutcome::Transcoded {
            output,
            elapsed,
            output_bytes,
        } => {
            info!(
                "✅ transcoded to '{}' in {}s ({})",
                output.display(),
                elapsed.as_secs(),
                format_size(output_bytes, DECIMAL)
            );
        }
        EncodeOutcome::BenchmarkSample {
            tag,
            elapsed_secs,
            percent_of_base,
        } => {
            info!(
                "benchmark {}: {}s, {:.1}% of base",
                tag, elapsed_secs, percent_of_base
            );
        }
    }
    Ok(())
}

fn validate_args(args: &Args) -> Result<(), EncodeError> {
    if let Some(crf) = args.crf {
        if crf > 51 {
            return Err(EncodeError::ArgumentError(format!(
                "CRF must be in 0-51, got {}",
                crf
            )));
        }
    }
    if let Some(preset) = &args.preset {
        if !PRESETS.contains(&preset.as_str()) {
            return Err(EncodeError::ArgumentError(format!(
                "unknown preset '{}', expected one of {}",
                preset,
                PRESETS.join(", ")
            )));
        }
    }
    if args.nobackup && !args.replacelink {
        warn!("--nobackup has no effect without --replacelink");
    }
    Ok(())
}

fn build_request(cfg: &EncodeConfig, args: &Args) -> EncodeRequest {
    let mut req = EncodeRequest::from_config(cfg, args.input.clone());
    req.output = args.output.clone();
    req.outdir = args.outdir.clone();
    if let Some(codec) = &args.codec {
        req.video_codec = codec.clone();
    }
    if let Some(acodec) = &args.acodec {
        req.audio_codec = acodec.clone();
    }
    if let Some(crf) = args.crf {
        req.crf = crf;
    }
    if let Some(preset) = &args.preset {
        req.preset = preset.clone();
    }
    req.force = args.force;
    req.replace = args.replace;
    req.replace_with_link = args.replacelink;
    req.no_backup = args.nobackup;
    req.benchmark_now = args.benchmark_now;
    req
}

/// Render a duration as `min:sec` with two-decimal seconds, e.g. `6:05.20`
fn format_duration(duration_secs: f64) -> String {
    let mins = (duration_secs / 60.0) as u64;
    format!("{}:{:05.2}", mins, duration_secs % 60.0)
}

/// Print one summary line for the input: size, codec, duration, path
async fn print_probe(cfg: &EncodeConfig, input: &Path) -> anyhow::Result<()> {
    let probe = engine::probe_file(cfg, input).await?;
    let size = fsops::file_size(input)?;
    println!(
        "{}, {}, {}, {}",
        format_size(size, DECIMAL),
        probe.video_codec,
        format_duration(probe.duration_secs),
        input.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_keeps_two_decimal_seconds() {
        assert_eq!(format_duration(372.25), "6:12.25");
        assert_eq!(format_duration(365.2), "6:05.20");
        assert_eq!(format_duration(600.0), "10:00.00");
        assert_eq!(format_duration(3.5), "0:03.50");
    }
}
