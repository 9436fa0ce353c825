use std::path::PathBuf;
use std::time::Duration;
use crate::config::EncodeConfig;

/// One re-encode request, built once from configuration plus CLI arguments
/// and consumed by [`crate::policy::evaluate`]
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Input media file
    pub input: PathBuf,
    /// Explicit output path; derived from the input when absent
    pub output: Option<PathBuf>,
    /// Directory derived outputs (and benchmark artifacts) land in
    pub outdir: PathBuf,
    /// Target video codec name
    pub video_codec: String,
    /// Target audio codec name
    pub audio_codec: String,
    /// CRF quality value
    pub crf: u8,
    /// Encoder preset
    pub preset: String,
    /// Re-encode even if the input already carries the target codec
    pub force: bool,
    /// Overwrite the input with the validated output
    pub replace: bool,
    /// Back up the input and leave a relative symlink to the output behind
    pub replace_with_link: bool,
    /// Delete the original instead of backing it up when replacing with a link
    pub no_backup: bool,
    /// Encode only a sample window and append a benchmark report row
    pub benchmark_now: bool,
}

impl EncodeRequest {
    /// Build a request for one input with all knobs at their configured
    /// defaults
    pub fn from_config(cfg: &EncodeConfig, input: PathBuf) -> Self {
        EncodeRequest {
            input,
            output: None,
            outdir: PathBuf::from("."),
            video_codec: cfg.video_codec.clone(),
            audio_codec: cfg.audio_codec.clone(),
            crf: cfg.crf,
            preset: cfg.preset.clone(),
            force: false,
            replace: false,
            replace_with_link: false,
            no_backup: false,
            benchmark_now: false,
        }
    }

    /// Tag identifying this request's encoder configuration in benchmark
    /// reports
    pub fn config_tag(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.video_codec, self.audio_codec, self.preset, self.crf
        )
    }
}

/// Result of processing one request
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    /// Input already carries the target codec and nothing was produced
    SkippedAlreadyEncoded,
    /// Input already carries the target codec; copied byte-for-byte instead
    CopiedAlreadyEncoded { output: PathBuf },
    /// A real transcode ran to completion
    Transcoded {
        output: PathBuf,
        elapsed: Duration,
        output_bytes: u64,
    },
    /// One benchmark sample finished and its report row was appended
    BenchmarkSample {
        tag: String,
        elapsed_secs: u64,
        percent_of_base: f64,
    },
}

/// One row of a benchmark report
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRow {
    pub tag: String,
    pub elapsed_secs: u64,
    pub percent_of_base: f64,
}

impl BenchmarkRow {
    /// Render the append-only report line: `{tag}:\t{secs}s\t{pct}%`
    pub fn format_line(&self) -> String {
        format!(
            "{}:\t{}s\t{:.1}%",
            self.tag, self.elapsed_secs, self.percent_of_base
        )
    }
}

/// Ordered, append-only collection of benchmark rows
#[derive(Debug, Clone, Default)]
pub struct BenchmarkReport {
    pub rows: Vec<BenchmarkRow>,
}

impl BenchmarkReport {
    pub fn push(&mut self, row: BenchmarkRow) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
