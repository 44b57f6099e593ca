use crate::config::Config;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

const REQUIRED_DIRS: &[&str] = &["images", "thumbnails", "videos", "audio", "banner", "output"];

pub async fn ensure_directories() -> Result<()> {
    for dir in REQUIRED_DIRS {
        create_if_missing(Path::new(dir)).await?;
    }
    Ok(())
}

/// Creates the folders a loaded config points at, which may differ from the defaults.
pub async fn ensure_config_directories(cfg: &Config) -> Result<()> {
    let mut dirs: Vec<PathBuf> = vec![
        cfg.download.folder.clone(),
        cfg.slideshow.image_dir.clone(),
        cfg.slideshow.video_dir.clone(),
    ];
    if let Some(parent) = cfg.slideshow.output.parent() {
        dirs.push(parent.to_path_buf());
    }
    for dir in dirs {
        if dir.as_os_str().is_empty() {
            continue;
        }
        create_if_missing(&dir).await?;
    }
    Ok(())
}

async fn create_if_missing(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        tracing::info!("Created directory: {}", dir.display());
    }
    Ok(())
}

pub use crate::ffmpeg::check_ffmpeg;
