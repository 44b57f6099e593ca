use crate::ffmpeg;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;

pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Mono PCM in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decodes `path` through ffmpeg into a scratch WAV and reads it back.
    /// WAV input is read directly.
    pub async fn load(path: &Path, sample_rate: u32) -> Result<Self> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            let direct = path.to_path_buf();
            match tokio::task::spawn_blocking(move || Self::read_wav(&direct)).await? {
                Ok(track) => return Ok(track),
                Err(err) => tracing::debug!("direct wav read failed, using ffmpeg: {:#}", err),
            }
        }

        let scratch = tempfile::Builder::new()
            .prefix("beatreel-audio")
            .suffix(".wav")
            .tempfile()
            .context("create scratch wav")?;
        let wav_path = scratch.path().to_path_buf();

        ffmpeg::ffmpeg_extract_mono_wav(path, sample_rate, &wav_path)
            .await
            .with_context(|| format!("Error loading audio file: {}", path.display()))?;

        let track = tokio::task::spawn_blocking(move || Self::read_wav(&wav_path)).await??;
        drop(scratch);
        Ok(track)
    }

    pub fn read_wav(path: &Path) -> Result<Self> {
        let mut reader = WavReader::open(path)
            .with_context(|| format!("Failed to open wav {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    #[test]
    fn reads_stereo_int_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(&path, spec).unwrap();
        for _ in 0..4000 {
            w.write_sample(16384i16).unwrap();
            w.write_sample(0i16).unwrap();
        }
        w.finalize().unwrap();

        let track = AudioTrack::read_wav(&path).unwrap();
        assert_eq!(track.sample_rate, 8000);
        assert_eq!(track.samples.len(), 4000);
        assert!((track.duration() - 0.5).abs() < 1e-9);
        assert!((track.samples[0] - 0.25).abs() < 1e-4);
    }
}
