//! External encoder invocation
//!
//! Builds ffmpeg argument lists and runs them via tokio subprocesses. The
//! policy engine owns the partial-output cleanup guard; this module only
//! reports success or failure.

use std::path::Path;
use std::time::{Duration, Instant};
use log::{debug, info};
use tokio::process::Command;
use crate::codec::StreamAction;
use crate::config::EncodeConfig;
use crate::error::EncodeError;

/// Base flags for every ffmpeg invocation: never overwrite, never read
/// stdin, keep the output quiet
const FFMPEG_BASE_ARGS: &[&str] = &["-n", "-nostdin", "-hide_banner", "-loglevel", "error"];

/// A time-limited slice of the input, used by benchmark mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start_secs: u64,
    pub duration_secs: u64,
}

impl SampleWindow {
    /// A window of `window_secs` centered in a file of `total_secs`, or None
    /// when the file is short enough to use whole
    pub fn centered(total_secs: f64, window_secs: u64) -> Option<Self> {
        if total_secs > window_secs as f64 {
            let start = ((total_secs - window_secs as f64) / 2.0) as u64;
            Some(SampleWindow {
                start_secs: start,
                duration_secs: window_secs,
            })
        } else {
            None
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.push("-ss".to_string());
        args.push(self.start_secs.to_string());
        args.push("-t".to_string());
        args.push(self.duration_secs.to_string());
    }
}

/// One fully resolved encoder invocation
#[derive(Debug)]
pub struct EncodeJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub audio: &'a StreamAction,
    pub video: &'a StreamAction,
    pub crf: u8,
    pub preset: &'a str,
    pub window: Option<SampleWindow>,
}

/// Build the full ffmpeg argument list for an encode job
///
/// The sample window precedes `-i` so ffmpeg seeks the input rather than
/// decoding up to the window. CRF and preset only apply when the video
/// stream is actually re-encoded.
pub fn build_encode_args(job: &EncodeJob<'_>) -> Vec<String> {
    let mut args: Vec<String> = FFMPEG_BASE_ARGS.iter().map(|s| s.to_string()).collect();

    if let Some(window) = job.window {
        window.push_args(&mut args);
    }

    args.push("-i".to_string());
    args.push(job.input.display().to_string());

    args.push("-c:a".to_string());
    args.push(job.audio.codec_arg().to_string());

    args.push("-c:v".to_string());
    args.push(job.video.codec_arg().to_string());

    if !job.video.is_copy() {
        args.push("-crf".to_string());
        args.push(job.crf.to_string());
        args.push("-preset".to_string());
        args.push(job.preset.to_string());
    }

    args.push(job.output.display().to_string());
    args
}

/// Build the argument list for a pure stream copy (no re-encode)
pub fn build_stream_copy_args(
    input: &Path,
    output: &Path,
    window: Option<SampleWindow>,
) -> Vec<String> {
    let job = EncodeJob {
        input,
        output,
        audio: &StreamAction::Copy,
        video: &StreamAction::Copy,
        crf: 0,
        preset: "",
        window,
    };
    build_encode_args(&job)
}

/// Run ffmpeg with the given arguments, returning the wall-clock elapsed
/// time on success
pub async fn run_ffmpeg(cfg: &EncodeConfig, args: &[String]) -> Result<Duration, EncodeError> {
    info!("{} {}", cfg.ffmpeg_bin.display(), args.join(" "));

    let started = Instant::now();
    let output = Command::new(&cfg.ffmpeg_bin)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            EncodeError::ConversionFailed(format!(
                "failed to execute '{}': {}",
                cfg.ffmpeg_bin.display(),
                e
            ))
        })?;
    let elapsed = started.elapsed();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EncodeError::ConversionFailed(format!(
            "ffmpeg exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    debug!("ffmpeg finished in {:.1}s", elapsed.as_secs_f64());
    Ok(elapsed)
}
