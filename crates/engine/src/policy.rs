//! Re-encode policy engine
//!
//! Given one request, decides whether to skip, copy, or transcode the input,
//! runs the chosen action through the external encoder, validates the
//! result, and optionally replaces the original. One request in, one
//! outcome (or one error) out.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use humansize::{format_size, DECIMAL};
use log::{info, warn};
use crate::bench;
use crate::cache::BadEncodingCache;
use crate::codec::{audio_action, StreamAction, VideoTarget};
use crate::config::EncodeConfig;
use crate::error::EncodeError;
use crate::ffmpeg::{build_encode_args, run_ffmpeg, EncodeJob};
use crate::ffprobe::{probe_file, MediaProbe};
use crate::fsops::{self, classify, CleanupGuard, PathKind, TempDir};
use crate::request::{EncodeOutcome, EncodeRequest};

/// Evaluate one request and produce exactly one outcome
///
/// Preconditions fail fast with no side effects beyond diagnostics. The
/// input and resolved output paths are echoed once per invocation before
/// any other diagnostic about them.
pub async fn evaluate(
    cfg: &EncodeConfig,
    req: &EncodeRequest,
) -> Result<EncodeOutcome, EncodeError> {
    check_flag_combination(req)?;

    info!("input  = '{}'", req.input.display());
    ensure_regular_file(&req.input)?;
    if in_backup_dir(&req.input, &cfg.backup_dir_name) {
        return Err(EncodeError::invalid_input(
            &req.input,
            format!("inside the '{}' backup directory", cfg.backup_dir_name),
        ));
    }

    // classification doubles as the not-a-video gate
    let probe = probe_file(cfg, &req.input).await?;

    if req.benchmark_now {
        return bench::benchmark_now(cfg, req, &probe).await;
    }

    let (resolved, rewritten) = resolve_output(req, &cfg.container_ext)?;
    info!("output = '{}'", resolved.display());
    if rewritten {
        warn!("output will be converted into {}", cfg.container_ext);
    }

    // a failed replace attempt must never pollute the input's directory
    let (work_output, _temp_dir) = if req.replace {
        let temp = TempDir::create()?;
        let name = resolved.file_name().ok_or_else(|| {
            EncodeError::ArgumentError("output path has no file name".to_string())
        })?;
        (temp.path().join(name), Some(temp))
    } else {
        (resolved.clone(), None)
    };

    if classify(&work_output) != PathKind::Missing {
        return Err(EncodeError::OutputExists(work_output));
    }

    let audio = audio_action(&req.audio_codec, probe.audio_codec.as_deref());
    let target = VideoTarget::parse(&req.video_codec);

    // one handle per invocation so the input is hashed at most once
    let mut cache = cfg
        .cache_path
        .as_ref()
        .map(|path| BadEncodingCache::open(path, &req.input));

    let outcome = if is_already_encoded(req.force, &target, &probe, &audio) {
        warn!(
            "input is already encoded as {}/{}",
            probe.video_codec, req.audio_codec
        );
        if req.replace {
            return Err(EncodeError::AlreadyEncoded(req.input.clone()));
        }
        fsops::copy_file(&req.input, &work_output)?;
        EncodeOutcome::CopiedAlreadyEncoded {
            output: work_output.clone(),
        }
    } else if let Some(prev_bytes) = check_cache(req, cache.as_mut())? {
        let input_bytes = fsops::file_size(&req.input)?;
        warn!(
            "input is in the bad-encoding cache (would grow {} -> {})",
            format_size(input_bytes, DECIMAL),
            format_size(prev_bytes, DECIMAL)
        );
        if req.replace {
            return Ok(EncodeOutcome::SkippedAlreadyEncoded);
        }
        fsops::copy_file(&req.input, &work_output)?;
        EncodeOutcome::CopiedAlreadyEncoded {
            output: work_output.clone(),
        }
    } else {
        let video = StreamAction::Encode(target.encoder_name().to_string());
        let mut guard = CleanupGuard::arm(&work_output);
        let args = build_encode_args(&EncodeJob {
            input: &req.input,
            output: &work_output,
            audio: &audio,
            video: &video,
            crf: req.crf,
            preset: &req.preset,
            window: None,
        });
        // guard drops on error and removes the partial output
        let elapsed = run_ffmpeg(cfg, &args).await?;
        guard.disarm();

        let output_bytes = fsops::file_size(&work_output)?;
        let input_bytes = fsops::file_size(&req.input)?;
        report_size_ratio(req, input_bytes, output_bytes, cache.as_mut())?;

        EncodeOutcome::Transcoded {
            output: work_output.clone(),
            elapsed,
            output_bytes,
        }
    };

    if req.replace_with_link {
        if req.no_backup {
            info!("removing original '{}'", req.input.display());
            std::fs::remove_file(&req.input)?;
        } else {
            fsops::backup_original(&req.input, &cfg.backup_dir_name)?;
        }
        fsops::relative_symlink(&work_output, &req.input)?;
        return Ok(outcome);
    }

    if req.replace {
        // only a real transcode reaches this point
        let in_probe = probe_file(cfg, &req.input).await?;
        let out_probe = probe_file(cfg, &work_output).await?;
        let input_secs = in_probe.duration_secs.round() as i64;
        let output_secs = out_probe.duration_secs.round() as i64;
        if duration_drift_secs(in_probe.duration_secs, out_probe.duration_secs)
            > cfg.duration_tolerance_secs
        {
            return Err(EncodeError::DurationMismatch {
                input_secs,
                output_secs,
            });
        }

        info!("replacing '{}' in place", req.input.display());
        std::fs::copy(&work_output, &req.input)?;
        return Ok(match outcome {
            EncodeOutcome::Transcoded {
                elapsed,
                output_bytes,
                ..
            } => EncodeOutcome::Transcoded {
                output: req.input.clone(),
                elapsed,
                output_bytes,
            },
            other => other,
        });
    }

    Ok(outcome)
}

/// Resolve the output path and note whether its extension was rewritten
///
/// With no explicit output the path is derived from the input's base name
/// inside the output directory; either way a non-target extension is
/// rewritten to the target container extension.
pub fn resolve_output(
    req: &EncodeRequest,
    container_ext: &str,
) -> Result<(PathBuf, bool), EncodeError> {
    let mut out = match &req.output {
        Some(path) => path.clone(),
        None => {
            let name = req.input.file_name().ok_or_else(|| {
                EncodeError::invalid_input(&req.input, "input path has no file name")
            })?;
            req.outdir.join(name)
        }
    };

    let rewritten = !out
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(container_ext))
        .unwrap_or(false);
    if rewritten {
        out.set_extension(container_ext);
    }
    Ok((out, rewritten))
}

/// The input already satisfies the request when both streams could be pure
/// copies: the video codec is in the target family and the audio needs no
/// re-encode. `force` (and benchmark mode, which never calls this) disables
/// the short-circuit.
pub fn is_already_encoded(
    force: bool,
    target: &VideoTarget,
    probe: &MediaProbe,
    audio: &StreamAction,
) -> bool {
    !force && audio.is_copy() && target.matches_source(&probe.video_codec)
}

/// Absolute input/output duration difference in whole seconds
pub fn duration_drift_secs(input_secs: f64, output_secs: f64) -> i64 {
    (input_secs.round() as i64 - output_secs.round() as i64).abs()
}

fn check_flag_combination(req: &EncodeRequest) -> Result<(), EncodeError> {
    if req.replace && req.replace_with_link {
        return Err(EncodeError::ArgumentError(
            "replace and replace-with-link are mutually exclusive".to_string(),
        ));
    }
    if req.benchmark_now && (req.replace || req.replace_with_link) {
        return Err(EncodeError::ArgumentError(
            "benchmark mode cannot replace the input".to_string(),
        ));
    }
    Ok(())
}

fn ensure_regular_file(input: &Path) -> Result<(), EncodeError> {
    match classify(input) {
        PathKind::RegularFile => Ok(()),
        PathKind::Missing => Err(EncodeError::invalid_input(input, "no such file")),
        PathKind::SymbolicLink => Err(EncodeError::invalid_input(input, "refusing symlink input")),
        PathKind::Directory => Err(EncodeError::invalid_input(input, "is a directory")),
        PathKind::Other => Err(EncodeError::invalid_input(input, "not a regular file")),
    }
}

/// Whether the input lives under a backup directory from a previous run
fn in_backup_dir(input: &Path, backup_dir_name: &str) -> bool {
    input
        .components()
        .any(|c| c.as_os_str() == OsStr::new(backup_dir_name))
}

fn check_cache(
    req: &EncodeRequest,
    cache: Option<&mut BadEncodingCache>,
) -> Result<Option<u64>, EncodeError> {
    if req.force {
        return Ok(None);
    }
    match cache {
        Some(cache) => cache.check(req.crf, &req.preset),
        None => Ok(None),
    }
}

fn report_size_ratio(
    req: &EncodeRequest,
    input_bytes: u64,
    output_bytes: u64,
    cache: Option<&mut BadEncodingCache>,
) -> Result<(), EncodeError> {
    let percent = 100.0 * output_bytes as f64 / input_bytes as f64;
    info!(
        "output is {:.1}% of the original size ({} -> {})",
        percent,
        format_size(input_bytes, DECIMAL),
        format_size(output_bytes, DECIMAL)
    );
    if output_bytes >= input_bytes {
        warn!("re-encoding increased the file size");
        if !req.force {
            if let Some(cache) = cache {
                cache.record(req.crf, &req.preset, output_bytes)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(video: &str, audio: Option<&str>) -> MediaProbe {
        MediaProbe {
            video_codec: video.to_string(),
            audio_codec: audio.map(|s| s.to_string()),
            height: 1080,
            duration_secs: 600.0,
        }
    }

    fn request(input: &str) -> EncodeRequest {
        EncodeRequest::from_config(&EncodeConfig::default(), PathBuf::from(input))
    }

    #[test]
    fn test_resolve_output_rewrites_extension() {
        let req = request("clip.mov");
        let (out, rewritten) = resolve_output(&req, "mp4").unwrap();
        assert!(rewritten);
        assert_eq!(out.file_name().unwrap(), "clip.mp4");
    }

    #[test]
    fn test_resolve_output_keeps_target_extension() {
        let req = request("clip.mp4");
        let (out, rewritten) = resolve_output(&req, "mp4").unwrap();
        assert!(!rewritten);
        assert_eq!(out.file_name().unwrap(), "clip.mp4");
    }

    #[test]
    fn test_resolve_output_explicit_path_wins() {
        let mut req = request("clip.mkv");
        req.output = Some(PathBuf::from("/out/renamed.mp4"));
        let (out, rewritten) = resolve_output(&req, "mp4").unwrap();
        assert!(!rewritten);
        assert_eq!(out, PathBuf::from("/out/renamed.mp4"));
    }

    #[test]
    fn test_resolve_output_lands_in_outdir() {
        let mut req = request("/media/shows/clip.mkv");
        req.outdir = PathBuf::from("/scratch");
        let (out, rewritten) = resolve_output(&req, "mp4").unwrap();
        assert!(rewritten);
        assert_eq!(out, PathBuf::from("/scratch/clip.mp4"));
    }

    #[test]
    fn test_already_encoded_requires_both_streams() {
        let hevc = VideoTarget::Hevc;
        assert!(is_already_encoded(
            false,
            &hevc,
            &probe("hevc", Some("aac")),
            &StreamAction::Copy
        ));
        // non-target audio still forces a transcode
        assert!(!is_already_encoded(
            false,
            &hevc,
            &probe("hevc", Some("mp3")),
            &StreamAction::Encode("aac".to_string())
        ));
        // non-target video codec
        assert!(!is_already_encoded(
            false,
            &hevc,
            &probe("h264", Some("aac")),
            &StreamAction::Copy
        ));
        // force disables the short-circuit entirely
        assert!(!is_already_encoded(
            true,
            &hevc,
            &probe("hevc", Some("aac")),
            &StreamAction::Copy
        ));
    }

    #[test]
    fn test_duration_drift() {
        assert_eq!(duration_drift_secs(600.0, 600.4), 0);
        assert_eq!(duration_drift_secs(600.0, 598.0), 2);
        assert_eq!(duration_drift_secs(598.0, 600.9), 3);
        assert_eq!(duration_drift_secs(10.0, 70.0), 60);
    }

    #[test]
    fn test_in_backup_dir() {
        assert!(in_backup_dir(
            Path::new("/media/reencoding_backups/a.mkv"),
            "reencoding_backups"
        ));
        assert!(!in_backup_dir(Path::new("/media/a.mkv"), "reencoding_backups"));
    }

    #[tokio::test]
    async fn test_missing_input_is_invalid() {
        let cfg = EncodeConfig::default();
        let req = request("/nonexistent/clip.mkv");
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[tokio::test]
    async fn test_directory_input_is_invalid() {
        let cfg = EncodeConfig::default();
        let dir = TempDir::create().unwrap();
        let req = request(dir.path().to_str().unwrap());
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_input_is_refused() {
        let cfg = EncodeConfig::default();
        let dir = TempDir::create().unwrap();
        let file = dir.path().join("real.mkv");
        std::fs::write(&file, b"x").unwrap();
        let link = dir.path().join("link.mkv");
        std::os::unix::fs::symlink(&file, &link).unwrap();

        let req = request(link.to_str().unwrap());
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
        assert!(format!("{}", err).contains("symlink"));
    }

    #[tokio::test]
    async fn test_input_inside_backup_dir_is_refused() {
        let cfg = EncodeConfig::default();
        let dir = TempDir::create().unwrap();
        let backups = dir.path().join("reencoding_backups");
        std::fs::create_dir(&backups).unwrap();
        let file = backups.join("old.mkv");
        std::fs::write(&file, b"x").unwrap();

        let req = request(file.to_str().unwrap());
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[tokio::test]
    async fn test_conflicting_replace_flags() {
        let cfg = EncodeConfig::default();
        let mut req = request("clip.mkv");
        req.replace = true;
        req.replace_with_link = true;
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "ArgumentError");
    }

    #[tokio::test]
    async fn test_benchmark_cannot_replace() {
        let cfg = EncodeConfig::default();
        let mut req = request("clip.mkv");
        req.benchmark_now = true;
        req.replace = true;
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "ArgumentError");
    }

    // The tests below drive evaluate end to end against stub ffprobe/ffmpeg
    // executables (shell scripts with fixed output) instead of the real
    // tools.

    #[cfg(unix)]
    fn stub_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn stub_config(dir: &Path, ffprobe_body: &str, ffmpeg_body: &str) -> EncodeConfig {
        let mut cfg = EncodeConfig::default();
        cfg.ffprobe_bin = stub_tool(dir, "ffprobe", ffprobe_body);
        cfg.ffmpeg_bin = stub_tool(dir, "ffmpeg", ffmpeg_body);
        cfg
    }

    #[cfg(unix)]
    const FFPROBE_HEVC_AAC: &str = r#"echo '{"streams":[{"codec_type":"video","codec_name":"hevc","height":1080},{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"600.0"}}'"#;

    #[cfg(unix)]
    const FFPROBE_H264_AAC: &str = r#"echo '{"streams":[{"codec_type":"video","codec_name":"h264","height":1080},{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"600.0"}}'"#;

    // reports 600s for the .mkv input and 590s for the .mp4 encode result
    #[cfg(unix)]
    const FFPROBE_DRIFTING: &str = r#"case "$*" in
*.mp4) d=590.0 ;;
*) d=600.0 ;;
esac
echo '{"streams":[{"codec_type":"video","codec_name":"h264","height":1080},{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"'"$d"'"}}'"#;

    #[cfg(unix)]
    const FFMPEG_NEVER_RUNS: &str = "exit 1";

    // writes a token file to the output path (ffmpeg's last argument)
    #[cfg(unix)]
    const FFMPEG_WRITES_OUTPUT: &str = "for a in \"$@\"; do out=\"$a\"; done\nprintf encoded > \"$out\"";

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replace_refuses_already_encoded_input() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, b"original bytes").unwrap();
        let cfg = stub_config(dir.path(), FFPROBE_HEVC_AAC, FFMPEG_NEVER_RUNS);

        let mut req = request(input.to_str().unwrap());
        req.outdir = dir.path().to_path_buf();
        req.replace = true;
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "AlreadyEncoded");
        assert_eq!(std::fs::read(&input).unwrap(), b"original bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_already_encoded_input_is_copied_byte_for_byte() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, b"original bytes").unwrap();
        let cfg = stub_config(dir.path(), FFPROBE_HEVC_AAC, FFMPEG_NEVER_RUNS);

        let mut req = request(input.to_str().unwrap());
        req.outdir = dir.path().to_path_buf();
        match evaluate(&cfg, &req).await.unwrap() {
            EncodeOutcome::CopiedAlreadyEncoded { output } => {
                assert_eq!(std::fs::read(&output).unwrap(), b"original bytes");
            }
            other => panic!("expected a copy, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_output_is_never_overwritten() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, b"h264 content").unwrap();
        let existing = dir.path().join("clip.mp4");
        std::fs::write(&existing, b"do not touch").unwrap();
        let cfg = stub_config(dir.path(), FFPROBE_H264_AAC, FFMPEG_NEVER_RUNS);

        let mut req = request(input.to_str().unwrap());
        req.outdir = dir.path().to_path_buf();
        let err = evaluate(&cfg, &req).await.unwrap_err();
        assert_eq!(err.tag(), "OutputExists");
        assert_eq!(std::fs::read(&existing).unwrap(), b"do not touch");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replace_rejects_drifted_duration() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, b"original bytes").unwrap();
        let cfg = stub_config(dir.path(), FFPROBE_DRIFTING, FFMPEG_WRITES_OUTPUT);

        let mut req = request(input.to_str().unwrap());
        req.outdir = dir.path().to_path_buf();
        req.replace = true;
        let err = evaluate(&cfg, &req).await.unwrap_err();
        match err {
            EncodeError::DurationMismatch {
                input_secs,
                output_secs,
            } => {
                assert_eq!(input_secs, 600);
                assert_eq!(output_secs, 590);
            }
            other => panic!("expected DurationMismatch, got {:?}", other),
        }
        // the drifted result must never reach the input
        assert_eq!(std::fs::read(&input).unwrap(), b"original bytes");
    }
}
