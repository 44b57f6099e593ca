use std::path::PathBuf;
use thiserror::Error;

/// Failures callers may want to match on. Everything else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum BeatreelError {
    #[error("no peaks detected in {0}")]
    NoPeaks(PathBuf),
    #[error("no media files found in {images} or {videos}")]
    NoMedia { images: PathBuf, videos: PathBuf },
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("search API error: {0}")]
    Api(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
