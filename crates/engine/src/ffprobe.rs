use std::path::Path;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;
use crate::config::EncodeConfig;
use crate::error::EncodeError;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub height: Option<i64>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// Read-only facts about one media file, reduced from the raw ffprobe JSON
///
/// Recomputed on demand; never cached across files.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub height: i64,
    pub duration_secs: f64,
}

impl MediaProbe {
    /// Reduce raw ffprobe output to the facts the policy engine needs
    ///
    /// Classification rules: exactly one video stream, at most one audio
    /// stream, and a parseable container duration. Anything else is not a
    /// video file as far as the engine is concerned.
    pub fn from_ffprobe(data: &FfprobeOutput, path: &Path) -> Result<Self, EncodeError> {
        let video_streams: Vec<&FfprobeStream> = data
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some("video"))
            .collect();
        let audio_streams: Vec<&FfprobeStream> = data
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some("audio"))
            .collect();

        if video_streams.len() != 1 {
            return Err(EncodeError::invalid_input(
                path,
                format!("not a video file ({} video streams)", video_streams.len()),
            ));
        }
        if audio_streams.len() > 1 {
            return Err(EncodeError::invalid_input(
                path,
                format!("more than one audio stream ({})", audio_streams.len()),
            ));
        }

        let video = video_streams[0];
        let video_codec = video
            .codec_name
            .clone()
            .ok_or_else(|| EncodeError::invalid_input(path, "video stream has no codec name"))?;

        let audio_codec = match audio_streams.first() {
            Some(stream) => Some(stream.codec_name.clone().ok_or_else(|| {
                EncodeError::invalid_input(path, "audio stream has no codec name")
            })?),
            None => None,
        };

        let duration_secs = data
            .format
            .as_ref()
            .and_then(|f| f.duration.as_ref())
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| EncodeError::invalid_input(path, "no parseable container duration"))?;

        Ok(MediaProbe {
            video_codec,
            audio_codec,
            height: video.height.unwrap_or(0),
            duration_secs,
        })
    }
}

/// Run ffprobe against a file and parse the JSON output
pub async fn probe_file(cfg: &EncodeConfig, path: &Path) -> Result<MediaProbe, EncodeError> {
    debug!("probing {}", path.display());

    let output = Command::new(&cfg.ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            EncodeError::invalid_input(
                path,
                format!("failed to execute '{}': {}", cfg.ffprobe_bin.display(), e),
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EncodeError::invalid_input(
            path,
            format!(
                "ffprobe failed (exit code {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        ));
    }

    let json_str = String::from_utf8(output.stdout)
        .map_err(|_| EncodeError::invalid_input(path, "ffprobe output is not valid UTF-8"))?;

    let data: FfprobeOutput = serde_json::from_str(&json_str)
        .map_err(|e| EncodeError::invalid_input(path, format!("bad ffprobe JSON: {}", e)))?;

    MediaProbe::from_ffprobe(&data, path)
}
