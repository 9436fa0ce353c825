//! Codec families and stream actions
//!
//! The original matching rule treated any probed codec name containing
//! "hevc" or "264" as a family match. That substring heuristic can over- or
//! under-match, so the accepted source names are an explicit enumerated
//! mapping here. Widening a family means adding a name to its list, with a
//! test.

use std::fmt;

/// Accepted source codec names per family, as reported by ffprobe
const HEVC_SOURCES: &[&str] = &["hevc"];
const H264_SOURCES: &[&str] = &["h264"];

/// Requested target video codec, resolved to a known family where possible
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoTarget {
    /// HEVC / H.265 family, encoded with libx265
    Hevc,
    /// AVC / H.264 family, encoded with libx264
    H264,
    /// Unrecognized encoder name, passed through verbatim; never
    /// short-circuits because no source codec is known to match it
    Other(String),
}

impl VideoTarget {
    /// Resolve a requested codec name to a family
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "libx265" | "hevc" | "x265" | "h265" => VideoTarget::Hevc,
            "libx264" | "h264" | "x264" | "avc" => VideoTarget::H264,
            _ => VideoTarget::Other(name.to_string()),
        }
    }

    /// The ffmpeg encoder name used when this target is encoded
    pub fn encoder_name(&self) -> &str {
        match self {
            VideoTarget::Hevc => "libx265",
            VideoTarget::H264 => "libx264",
            VideoTarget::Other(name) => name,
        }
    }

    /// Source codec names that already satisfy this target
    pub fn accepted_sources(&self) -> &[&str] {
        match self {
            VideoTarget::Hevc => HEVC_SOURCES,
            VideoTarget::H264 => H264_SOURCES,
            VideoTarget::Other(_) => &[],
        }
    }

    /// Whether a probed source codec already matches this target's family
    pub fn matches_source(&self, source_codec: &str) -> bool {
        self.accepted_sources()
            .contains(&source_codec.to_lowercase().as_str())
    }
}

impl fmt::Display for VideoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoder_name())
    }
}

/// What to do with one stream of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// Pass the stream through untouched
    Copy,
    /// Re-encode with the named ffmpeg encoder
    Encode(String),
}

impl StreamAction {
    /// The value handed to ffmpeg's -c:a / -c:v flag
    pub fn codec_arg(&self) -> &str {
        match self {
            StreamAction::Copy => "copy",
            StreamAction::Encode(name) => name,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, StreamAction::Copy)
    }
}

/// Decide the audio action: stream copy when the input already carries the
/// target audio codec, or has no audio stream at all
pub fn audio_action(target: &str, existing: Option<&str>) -> StreamAction {
    match existing {
        None => StreamAction::Copy,
        Some(codec) if codec.eq_ignore_ascii_case(target) => StreamAction::Copy,
        Some(_) => StreamAction::Encode(target.to_string()),
    }
}
