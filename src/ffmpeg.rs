use crate::error::BeatreelError;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;

const STDERR_TAIL: usize = 600;

pub(crate) async fn run_cmd(args: &[String]) -> Result<()> {
    let Some((program, rest)) = args.split_first() else {
        return Ok(());
    };

    let output = Command::new(program)
        .args(rest)
        .output()
        .await
        .with_context(|| format!("Command execution failed: {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(STDERR_TAIL)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(BeatreelError::Ffmpeg(format!(
            "{:?} exited with {}: {}",
            rest,
            output.status,
            tail.trim()
        ))
        .into());
    }

    Ok(())
}

/// Common prefix of every ffmpeg invocation.
pub(crate) fn ffmpeg_base() -> Vec<String> {
    ["ffmpeg", "-y", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub async fn check_ffmpeg() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(BeatreelError::Ffmpeg(format!("ffprobe failed on {}", path.display())).into());
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("Invalid duration for {}", path.display()))
}

fn parse_duration(text: &str) -> Result<f64> {
    let duration = text.trim().parse::<f64>().unwrap_or(-1.0);
    if !duration.is_finite() || duration <= 0.1 {
        anyhow::bail!("Invalid duration {:?}", text.trim());
    }
    Ok(duration)
}

/// Decodes any audio ffmpeg understands into a mono 16-bit WAV at `sample_rate`.
pub async fn ffmpeg_extract_mono_wav(input: &Path, sample_rate: u32, out_wav: &Path) -> Result<()> {
    let mut args = ffmpeg_base();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        out_wav.display().to_string(),
    ]);
    run_cmd(&args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert!((parse_duration("183.472000\n").unwrap() - 183.472).abs() < 1e-9);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("0.05").is_err());
    }

    #[tokio::test]
    async fn failing_command_is_an_ffmpeg_error() {
        let args = vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_cmd(&args).await.unwrap_err();
        let err = err.downcast::<BeatreelError>().unwrap();
        assert!(matches!(err, BeatreelError::Ffmpeg(ref m) if m.contains("boom")));
    }

    #[tokio::test]
    async fn empty_command_is_a_noop() {
        assert!(run_cmd(&[]).await.is_ok());
    }
}
