use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::EncodeError;

/// Configuration for the re-encode policy engine
///
/// Loaded once per invocation and combined with CLI arguments into an
/// [`crate::request::EncodeRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Default target video codec
    pub video_codec: String,
    /// Default target audio codec
    pub audio_codec: String,
    /// Default CRF quality value (0-51)
    pub crf: u8,
    /// Default encoder preset
    pub preset: String,
    /// Target container extension for resolved output paths
    pub container_ext: String,
    /// Name of the backup directory created next to replaced inputs
    pub backup_dir_name: String,
    /// Maximum tolerated |input - output| duration drift, in whole seconds
    pub duration_tolerance_secs: i64,
    /// Length of the benchmark sample window, in seconds
    pub bench_window_secs: u64,
    /// Bad-encoding cache file; None disables the cache
    pub cache_path: Option<PathBuf>,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            video_codec: "libx265".to_string(),
            audio_codec: "aac".to_string(),
            crf: 23,
            preset: "fast".to_string(),
            container_ext: "mp4".to_string(),
            backup_dir_name: "reencoding_backups".to_string(),
            duration_tolerance_secs: 2,
            bench_window_secs: 60,
            cache_path: None,
        }
    }
}

impl EncodeConfig {
    /// Load configuration from a file, or return defaults if path is None
    /// or the file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self, EncodeError> {
        let mut config = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content).map_err(|e| {
                        EncodeError::ArgumentError(format!(
                            "failed to parse TOML config '{}': {}",
                            config_path.display(),
                            e
                        ))
                    })?;
                } else {
                    config = serde_json::from_str(&content).map_err(|e| {
                        EncodeError::ArgumentError(format!(
                            "failed to parse JSON config '{}': {}",
                            config_path.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        Ok(config)
    }
}
