//! Benchmark modes
//!
//! Benchmark-now encodes a fixed sample window of the input and appends one
//! row to the report file. The sweep runs benchmark-now over a fixed list
//! of (preset, CRF) pairs in process, tolerating individual failures so a
//! partial report still comes out.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::codec::{audio_action, StreamAction, VideoTarget};
use crate::config::EncodeConfig;
use crate::error::EncodeError;
use crate::ffmpeg::{build_encode_args, build_stream_copy_args, run_ffmpeg, EncodeJob, SampleWindow};
use crate::ffprobe::MediaProbe;
use crate::fsops::{classify, file_size, CleanupGuard, PathKind, TempDir};
use crate::policy::evaluate;
use crate::request::{BenchmarkReport, BenchmarkRow, EncodeOutcome, EncodeRequest};

/// The (preset, CRF) pairs every sweep covers, in order
pub const SWEEP_CONFIGS: &[(&str, u8)] = &[
    ("medium", 23),
    ("medium", 30),
    ("fast", 18),
    ("fast", 23),
    ("fast", 30),
];

/// Append-only report file, one row per finished benchmark sample
pub const REPORT_FILE_NAME: &str = "report";

/// Fixed name of the cached stream-copy reference sample
pub fn base_sample_path(outdir: &Path, container_ext: &str) -> PathBuf {
    outdir.join(format!("sample.{}", container_ext))
}

/// Encode a sample window of the input and append one report row
///
/// The reference sample (a stream copy of the same window) is created on
/// first use and reused by later invocations; the encode itself goes into a
/// fresh temporary directory so repeated runs never collide. Returns
/// immediately after reporting, never proceeding to replacement.
pub async fn benchmark_now(
    cfg: &EncodeConfig,
    req: &EncodeRequest,
    probe: &MediaProbe,
) -> Result<EncodeOutcome, EncodeError> {
    let window = SampleWindow::centered(probe.duration_secs, cfg.bench_window_secs);

    let base = base_sample_path(&req.outdir, &cfg.container_ext);
    if classify(&base) == PathKind::Missing {
        info!("creating benchmark base sample '{}'", base.display());
        let args = build_stream_copy_args(&req.input, &base, window);
        let mut guard = CleanupGuard::arm(&base);
        run_ffmpeg(cfg, &args).await?;
        guard.disarm();
    }

    let temp = TempDir::create()?;
    let output = temp
        .path()
        .join(format!("{}-{}.{}", req.preset, req.crf, cfg.container_ext));

    let audio = audio_action(&req.audio_codec, probe.audio_codec.as_deref());
    let target = VideoTarget::parse(&req.video_codec);
    let video = StreamAction::Encode(target.encoder_name().to_string());

    let mut guard = CleanupGuard::arm(&output);
    let elapsed = run_ffmpeg(
        cfg,
        &build_encode_args(&EncodeJob {
            input: &req.input,
            output: &output,
            audio: &audio,
            video: &video,
            crf: req.crf,
            preset: &req.preset,
            window,
        }),
    )
    .await?;
    guard.disarm();

    let percent_of_base = 100.0 * file_size(&output)? as f64 / file_size(&base)? as f64;
    let row = BenchmarkRow {
        tag: req.config_tag(),
        elapsed_secs: elapsed.as_secs(),
        percent_of_base,
    };
    append_report_row(&req.outdir, &row)?;
    info!("{}", row.format_line());

    Ok(EncodeOutcome::BenchmarkSample {
        tag: row.tag,
        elapsed_secs: row.elapsed_secs,
        percent_of_base: row.percent_of_base,
    })
}

/// Append one row to the report file, creating it if needed
pub fn append_report_row(outdir: &Path, row: &BenchmarkRow) -> Result<PathBuf, EncodeError> {
    let path = outdir.join(REPORT_FILE_NAME);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", row.format_line())?;
    Ok(path)
}

/// Run the full benchmark sweep in process
///
/// Member failures are logged and tolerated; the collected rows are printed
/// at the end. Produces no transcode of its own.
pub async fn run_sweep(
    cfg: &EncodeConfig,
    req: &EncodeRequest,
) -> Result<BenchmarkReport, EncodeError> {
    info!(
        "benchmark sweep over {} configurations of '{}'",
        SWEEP_CONFIGS.len(),
        req.input.display()
    );

    let mut report = BenchmarkReport::default();
    for (preset, crf) in SWEEP_CONFIGS {
        let mut member = req.clone();
        member.preset = preset.to_string();
        member.crf = *crf;
        member.benchmark_now = true;
        member.force = true;
        member.replace = false;
        member.replace_with_link = false;

        match evaluate(cfg, &member).await {
            Ok(EncodeOutcome::BenchmarkSample {
                tag,
                elapsed_secs,
                percent_of_base,
            }) => report.push(BenchmarkRow {
                tag,
                elapsed_secs,
                percent_of_base,
            }),
            Ok(other) => warn!("unexpected benchmark outcome: {:?}", other),
            Err(e) => warn!(
                "[{}] benchmark member {}-{} failed: {}",
                e.tag(),
                preset,
                crf,
                e
            ),
        }
    }

    if report.is_empty() {
        warn!("sweep produced no report rows");
    }
    for row in &report.rows {
        info!("{}", row.format_line());
    }
    Ok(report)
}
