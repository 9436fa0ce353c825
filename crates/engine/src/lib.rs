pub mod bench;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod ffprobe;
pub mod fsops;
pub mod policy;
pub mod request;

pub use config::EncodeConfig;
pub use error::EncodeError;
pub use ffprobe::{probe_file, MediaProbe};
pub use policy::evaluate;
pub use request::{BenchmarkReport, BenchmarkRow, EncodeOutcome, EncodeRequest};
