use crate::beats::{MAX_DECLARED_BPM, MIN_DECLARED_BPM};
use crate::error::BeatreelError;
use crate::schedule::CutWeights;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const API_KEY_ENV: &str = "SerpAPI";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "serpapi_key")]
    pub api_key: String,
    pub download: DownloadConfig,
    pub slideshow: SlideshowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub folder: PathBuf,
    pub pages: u32,
    pub max_filename_length: usize,
    pub max_workers: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("images"),
            pages: 1,
            max_filename_length: 50,
            max_workers: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatSource {
    /// Cut on detected onsets.
    #[default]
    Onsets,
    /// Cut on an even grid derived from the BPM.
    Tempo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideshowConfig {
    pub image_dir: PathBuf,
    pub video_dir: PathBuf,
    pub audio_path: PathBuf,
    pub output: PathBuf,
    pub banner_on: bool,
    pub banner_img: PathBuf,
    pub zoom_effect: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Known tempo; estimated from the track when absent.
    pub bpm: Option<f64>,
    pub beat_source: BeatSource,
    pub cut_weights: CutWeights,
    pub roll_flashes: usize,
    pub roll_flash_secs: f64,
    pub sample_rate: u32,
    pub seed: Option<u64>,
    pub work_dir: PathBuf,
    pub plan_out: Option<PathBuf>,
    pub dry_run: bool,
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("thumbnails"),
            video_dir: PathBuf::from("videos"),
            audio_path: PathBuf::from("audio/track.mp3"),
            output: PathBuf::from("output/slideshow.mp4"),
            banner_on: true,
            banner_img: PathBuf::from("banner/banner.jpeg"),
            zoom_effect: true,
            width: 1280,
            height: 720,
            fps: 24,
            bpm: None,
            beat_source: BeatSource::Onsets,
            cut_weights: CutWeights::default(),
            roll_flashes: 4,
            roll_flash_secs: 0.08,
            sample_rate: 22_050,
            seed: None,
            work_dir: PathBuf::from("clips"),
            plan_out: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Reads `path` if it exists, otherwise starts from defaults. The API key
    /// falls back to the `SerpAPI` environment variable (`.env` is honored).
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if fs::metadata(path).await.is_ok() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            Config::default()
        };

        if config.api_key.is_empty() {
            let _ = dotenvy::dotenv();
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BeatreelError> {
        let invalid = |msg: &str| -> Result<(), BeatreelError> {
            Err(BeatreelError::InvalidConfig(msg.to_string()))
        };

        let d = &self.download;
        if d.pages == 0 {
            return invalid("download.pages must be a positive integer");
        }
        if d.max_workers == 0 {
            return invalid("download.max_workers must be positive");
        }
        if d.max_filename_length == 0 {
            return invalid("download.max_filename_length must be positive");
        }

        let s = &self.slideshow;
        if s.fps == 0 {
            return invalid("slideshow.fps must be positive");
        }
        if s.width == 0 || s.height == 0 || s.width % 2 != 0 || s.height % 2 != 0 {
            return invalid("slideshow resolution must be positive and even");
        }
        if let Some(bpm) = s.bpm {
            if !(MIN_DECLARED_BPM..=MAX_DECLARED_BPM).contains(&bpm) {
                return invalid("slideshow.bpm must be between 1 and 1000");
            }
        }
        if s.sample_rate == 0 {
            return invalid("slideshow.sample_rate must be positive");
        }
        if !(s.roll_flash_secs.is_finite() && s.roll_flash_secs > 0.0) {
            return invalid("slideshow.roll_flash_secs must be positive");
        }
        if !s.cut_weights.is_valid() {
            return invalid("slideshow.cut_weights must be non-negative with a positive sum");
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, BeatreelError> {
        if self.api_key.is_empty() {
            return Err(BeatreelError::InvalidConfig(format!(
                "missing SerpAPI key (set serpapi_key in config.json or {} in .env)",
                API_KEY_ENV
            )));
        }
        Ok(&self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"serpapi_key":"abc","slideshow":{"bpm":109,"beat_source":"tempo"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.api_key, "abc");
        assert_eq!(cfg.slideshow.bpm, Some(109.0));
        assert_eq!(cfg.slideshow.beat_source, BeatSource::Tempo);
        assert_eq!(cfg.slideshow.fps, 24);
        assert_eq!(cfg.download.max_workers, 5);
        assert_eq!(cfg.download.max_filename_length, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_odd_resolution_and_zero_pages() {
        let mut cfg = Config::default();
        cfg.slideshow.width = 1279;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.download.pages = 0;
        assert!(matches!(cfg.validate(), Err(BeatreelError::InvalidConfig(_))));
    }

    #[test]
    fn declared_bpm_must_be_in_range() {
        for bad in [0.0, -90.0, 0.5, 1000.5, 6.0e7, 1.0e15, f64::NAN, f64::INFINITY] {
            let mut cfg = Config::default();
            cfg.slideshow.bpm = Some(bad);
            assert!(
                matches!(cfg.validate(), Err(BeatreelError::InvalidConfig(_))),
                "bpm {bad} accepted"
            );
        }
        for good in [1.0, 109.0, 1000.0] {
            let mut cfg = Config::default();
            cfg.slideshow.bpm = Some(good);
            assert!(cfg.validate().is_ok(), "bpm {good} rejected");
        }
    }

    #[test]
    fn missing_key_is_reported() {
        let cfg = Config::default();
        assert!(cfg.require_api_key().is_err());
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"serpapi_key":"k","download":{"pages":3}}"#).unwrap();
        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.download.pages, 3);
        assert_eq!(cfg.require_api_key().unwrap(), "k");
    }
}
