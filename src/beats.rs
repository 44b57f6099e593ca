//! Tempo estimation and onset detection on a decoded mono track.
//!
//! The onset envelope is a half-wave-rectified log-energy flux of a
//! pre-emphasized signal, sampled every `HOP_LENGTH` samples. Peaks are
//! picked with a local-max / local-mean-plus-delta rule on the envelope
//! normalized to [0, 1]. The delta is tuned once against the number of beats
//! the tempo predicts for the track length.

use crate::audio::{AudioTrack, DEFAULT_SAMPLE_RATE};
use crate::config::BeatSource;
use crate::logi;
use serde::{Deserialize, Serialize};

pub const HOP_LENGTH: usize = 512;
pub const DEFAULT_DELTA: f64 = 0.22;
pub const DELTA_TOO_MANY: f64 = 0.3;
pub const DELTA_TOO_FEW: f64 = 0.15;
pub const BEAT_TOLERANCE: f64 = 0.25;

/// Range accepted for a tempo given by the user.
pub const MIN_DECLARED_BPM: f64 = 1.0;
pub const MAX_DECLARED_BPM: f64 = 1000.0;
/// Grid steps shorter than one analysis hop cannot be told apart.
pub const MIN_GRID_STEP_SECS: f64 = HOP_LENGTH as f64 / DEFAULT_SAMPLE_RATE as f64;

const PRE_EMPHASIS: f32 = 0.97;
const ENERGY_FLOOR: f64 = 1e-10;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
const PRIOR_BPM: f64 = 120.0;
const FALLBACK_BPM: f64 = 120.0;

/// Onset envelope, one value per hop.
pub fn onset_strength(samples: &[f32], hop: usize) -> Vec<f64> {
    if samples.is_empty() || hop == 0 {
        return Vec::new();
    }

    let mut emphasized = Vec::with_capacity(samples.len());
    let mut prev = 0.0f32;
    for &s in samples {
        emphasized.push((s - PRE_EMPHASIS * prev) as f64);
        prev = s;
    }

    let frames = samples.len().div_ceil(hop);
    let mut log_energy = Vec::with_capacity(frames);
    for i in 0..frames {
        // Window of two hops centered on the frame position.
        let center = i * hop;
        let lo = center.saturating_sub(hop);
        let hi = (center + hop).min(emphasized.len());
        let window = &emphasized[lo..hi];
        let energy = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|v| v * v).sum::<f64>() / window.len() as f64
        };
        log_energy.push(10.0 * (energy + ENERGY_FLOOR).log10());
    }

    let mut env = vec![0.0; frames];
    for i in 1..frames {
        env[i] = (log_energy[i] - log_energy[i - 1]).max(0.0);
    }
    env
}

/// Window sizes in frames for [`peak_pick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPick {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    pub delta: f64,
    pub wait: usize,
}

impl PeakPick {
    /// 30 ms look-back for the max, 100 ms either side for the mean, no wait.
    pub fn for_rate(sample_rate: u32, hop: usize, delta: f64) -> Self {
        let frames = |secs: f64| (secs * sample_rate as f64 / hop as f64).floor() as usize;
        Self {
            pre_max: frames(0.03),
            post_max: 1,
            pre_avg: frames(0.10),
            post_avg: frames(0.10) + 1,
            delta,
            wait: 0,
        }
    }
}

/// Indices of onset frames in `env`.
pub fn peak_pick(env: &[f64], params: &PeakPick) -> Vec<usize> {
    if env.is_empty() {
        return Vec::new();
    }

    let min = env.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = env.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range.is_finite() && range > 0.0) {
        return Vec::new();
    }
    let norm: Vec<f64> = env.iter().map(|v| (v - min) / range).collect();

    let n = norm.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;
    for i in 0..n {
        let max_lo = i.saturating_sub(params.pre_max);
        let max_hi = (i + params.post_max.max(1)).min(n);
        let local_max = norm[max_lo..max_hi]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if norm[i] < local_max {
            continue;
        }

        let avg_lo = i.saturating_sub(params.pre_avg);
        let avg_hi = (i + params.post_avg.max(1)).min(n);
        let window = &norm[avg_lo..avg_hi];
        let local_mean = window.iter().sum::<f64>() / window.len() as f64;
        if norm[i] < local_mean + params.delta {
            continue;
        }

        if let Some(prev) = last {
            if i - prev <= params.wait {
                continue;
            }
        }
        peaks.push(i);
        last = Some(i);
    }
    peaks
}

pub fn frames_to_time(frames: &[usize], sample_rate: u32, hop: usize) -> Vec<f64> {
    frames
        .iter()
        .map(|&f| (f * hop) as f64 / sample_rate as f64)
        .collect()
}

/// Tempo from the autocorrelation of the onset envelope, weighted toward 120 BPM.
pub fn estimate_bpm(env: &[f64], sample_rate: u32, hop: usize) -> f64 {
    let frame_rate = sample_rate as f64 / hop as f64;
    let lag_for = |bpm: f64| 60.0 * frame_rate / bpm;
    let min_lag = lag_for(MAX_BPM).floor().max(1.0) as usize;
    let max_lag = lag_for(MIN_BPM).ceil() as usize;
    if env.len() <= max_lag + 1 {
        return FALLBACK_BPM;
    }

    // Spread each onset over neighbouring frames so beats that straddle a
    // frame boundary still line up at a single lag.
    let smoothed = smooth(env);
    let mean = smoothed.iter().sum::<f64>() / smoothed.len() as f64;
    let centered: Vec<f64> = smoothed.iter().map(|v| v - mean).collect();
    let energy: f64 = centered.iter().map(|v| v * v).sum();
    if energy <= 0.0 {
        return FALLBACK_BPM;
    }

    let score = |lag: usize| -> f64 {
        if lag == 0 || lag >= centered.len() {
            return 0.0;
        }
        let ac: f64 = centered[..centered.len() - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum();
        let bpm = 60.0 * frame_rate / lag as f64;
        let prior = (-0.5 * (bpm / PRIOR_BPM).log2().powi(2)).exp();
        (ac / energy) * prior
    };

    let scores: Vec<(usize, f64)> = (min_lag..=max_lag).map(|lag| (lag, score(lag))).collect();
    let Some(&(best_lag, best)) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return FALLBACK_BPM;
    };
    if best <= 0.0 {
        return FALLBACK_BPM;
    }

    // Parabolic refinement between neighbouring lags.
    let left = score(best_lag - 1);
    let right = score(best_lag + 1);
    let denom = left - 2.0 * best + right;
    let offset = if denom.abs() > f64::EPSILON {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    60.0 * frame_rate / (best_lag as f64 + offset)
}

fn smooth(env: &[f64]) -> Vec<f64> {
    const KERNEL: [f64; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];
    let n = env.len() as isize;
    (0..n)
        .map(|i| {
            KERNEL
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + k as isize - 2;
                    (0..n).contains(&j).then(|| w * env[j as usize])
                })
                .sum::<f64>()
                / 9.0
        })
        .collect()
}

pub fn expected_beat_count(bpm: f64, duration: f64) -> f64 {
    (bpm / 60.0) * duration
}

/// Raise delta when far too many onsets were found, lower it when far too few.
pub fn tune_delta(detected: usize, expected_beats: f64) -> f64 {
    let detected = detected as f64;
    if detected > expected_beats * (1.0 + BEAT_TOLERANCE) {
        DELTA_TOO_MANY
    } else if detected < expected_beats * (1.0 - BEAT_TOLERANCE) {
        DELTA_TOO_FEW
    } else {
        DEFAULT_DELTA
    }
}

/// Evenly spaced beat times starting at `offset`, strictly below `duration`.
/// Empty when the step would be shorter than one hop.
pub fn tempo_grid(bpm: f64, duration: f64, offset: f64) -> Vec<f64> {
    if !(bpm.is_finite() && bpm > 0.0) || !(duration.is_finite() && duration > 0.0) {
        return Vec::new();
    }
    let step = 60.0 / bpm;
    if step < MIN_GRID_STEP_SECS {
        return Vec::new();
    }
    let offset = offset.max(0.0);
    let mut out = Vec::new();
    let mut i = 0usize;
    loop {
        let t = offset + i as f64 * step;
        if t >= duration {
            break;
        }
        out.push(t);
        i += 1;
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatAnalysis {
    pub bpm: f64,
    pub delta: f64,
    pub duration: f64,
    pub onsets: Vec<f64>,
}

impl BeatAnalysis {
    /// Cut times for `source`. The tempo grid is anchored on the first onset.
    pub fn timestamps(&self, source: BeatSource) -> Vec<f64> {
        match source {
            BeatSource::Onsets => self.onsets.clone(),
            BeatSource::Tempo => {
                let offset = self.onsets.first().copied().unwrap_or(0.0);
                tempo_grid(self.bpm, self.duration, offset)
            }
        }
    }
}

pub fn detect_peaks(track: &AudioTrack, input_bpm: Option<f64>) -> BeatAnalysis {
    let sr = track.sample_rate;
    let env = onset_strength(&track.samples, HOP_LENGTH);

    let bpm = match input_bpm {
        Some(bpm) => bpm,
        None => estimate_bpm(&env, sr, HOP_LENGTH),
    };
    let duration = track.duration();
    let expected = expected_beat_count(bpm, duration);
    logi(format!("Using BPM: {:.2}, Expected Beats: {:.1}", bpm, expected));

    let first = peak_pick(&env, &PeakPick::for_rate(sr, HOP_LENGTH, DEFAULT_DELTA));
    let delta = tune_delta(first.len(), expected);
    logi(format!("Tuned delta: {} ({} onsets at {})", delta, first.len(), DEFAULT_DELTA));

    let frames = if (delta - DEFAULT_DELTA).abs() < f64::EPSILON {
        first
    } else {
        peak_pick(&env, &PeakPick::for_rate(sr, HOP_LENGTH, delta))
    };

    BeatAnalysis {
        bpm,
        delta,
        duration,
        onsets: frames_to_time(&frames, sr, HOP_LENGTH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;

    /// Silence with short decaying 1 kHz bursts at `times`.
    fn clicks(times: &[f64], duration: f64) -> Vec<f32> {
        let len = (duration * SR as f64) as usize;
        let mut out = vec![0.0f32; len];
        let burst = (0.03 * SR as f64) as usize;
        for &t in times {
            let start = (t * SR as f64) as usize;
            for k in 0..burst {
                if start + k >= len {
                    break;
                }
                let phase = 2.0 * std::f64::consts::PI * 1000.0 * k as f64 / SR as f64;
                let decay = (-(k as f64) / (0.008 * SR as f64)).exp();
                out[start + k] = (0.8 * phase.sin() * decay) as f32;
            }
        }
        out
    }

    #[test]
    fn delta_tuning_policy() {
        assert_eq!(tune_delta(200, 100.0), DELTA_TOO_MANY);
        assert_eq!(tune_delta(50, 100.0), DELTA_TOO_FEW);
        assert_eq!(tune_delta(100, 100.0), DEFAULT_DELTA);
        assert_eq!(tune_delta(125, 100.0), DEFAULT_DELTA);
        assert_eq!(tune_delta(75, 100.0), DEFAULT_DELTA);
    }

    #[test]
    fn expected_beats_scale_with_duration() {
        assert!((expected_beat_count(120.0, 30.0) - 60.0).abs() < 1e-9);
        assert!((expected_beat_count(109.0, 60.0) - 109.0).abs() < 1e-9);
    }

    #[test]
    fn tempo_grid_is_even_and_bounded() {
        let grid = tempo_grid(120.0, 2.2, 0.1);
        assert_eq!(grid.len(), 5);
        assert!((grid[1] - 0.6).abs() < 1e-9);
        assert!(grid.iter().all(|&t| t < 2.2));
        assert!(tempo_grid(0.0, 10.0, 0.0).is_empty());
    }

    #[test]
    fn tempo_grid_refuses_sub_hop_steps() {
        assert!(tempo_grid(6.0e7, 10.0, 0.0).is_empty());
        assert!(tempo_grid(1.0e15, 180.0, 0.0).is_empty());
        assert_eq!(tempo_grid(MAX_DECLARED_BPM, 1.0, 0.0).len(), 17);
    }

    #[test]
    fn peak_pick_ignores_flat_envelopes() {
        let p = PeakPick::for_rate(SR, HOP_LENGTH, DEFAULT_DELTA);
        assert!(peak_pick(&[0.0; 100], &p).is_empty());
        assert!(peak_pick(&[], &p).is_empty());
    }

    #[test]
    fn peak_pick_respects_wait() {
        let mut env = vec![0.0; 40];
        env[10] = 1.0;
        env[13] = 0.9;
        env[30] = 1.0;
        let mut p = PeakPick {
            pre_max: 1,
            post_max: 1,
            pre_avg: 2,
            post_avg: 3,
            delta: 0.1,
            wait: 0,
        };
        assert_eq!(peak_pick(&env, &p), vec![10, 13, 30]);
        p.wait = 5;
        assert_eq!(peak_pick(&env, &p), vec![10, 30]);
    }

    #[test]
    fn finds_clicks_near_their_times() {
        let times = [0.5, 1.3, 2.0, 3.1, 4.25];
        let track = AudioTrack::new(clicks(&times, 5.0), SR);
        let analysis = detect_peaks(&track, Some(60.0));
        assert_eq!(analysis.onsets.len(), times.len(), "{:?}", analysis.onsets);
        let hop_secs = HOP_LENGTH as f64 / SR as f64;
        for (found, want) in analysis.onsets.iter().zip(times) {
            assert!((found - want).abs() <= 2.0 * hop_secs, "{found} vs {want}");
        }
        assert!(analysis.onsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn estimates_tempo_of_a_click_track() {
        let times: Vec<f64> = (0..24).map(|i| 0.25 + i as f64 * 0.5).collect();
        let track = AudioTrack::new(clicks(&times, 12.5), SR);
        let env = onset_strength(&track.samples, HOP_LENGTH);
        let bpm = estimate_bpm(&env, SR, HOP_LENGTH);
        assert!((bpm - 120.0).abs() < 8.0, "bpm = {bpm}");
    }

    #[test]
    fn silence_falls_back() {
        let track = AudioTrack::new(vec![0.0; SR as usize * 3], SR);
        let analysis = detect_peaks(&track, None);
        assert_eq!(analysis.bpm, FALLBACK_BPM);
        assert!(analysis.onsets.is_empty());
    }

    #[test]
    fn timestamps_by_source() {
        let analysis = BeatAnalysis {
            bpm: 60.0,
            delta: DEFAULT_DELTA,
            duration: 4.0,
            onsets: vec![0.5, 0.9, 3.0],
        };
        assert_eq!(analysis.timestamps(BeatSource::Onsets), vec![0.5, 0.9, 3.0]);
        assert_eq!(analysis.timestamps(BeatSource::Tempo), vec![0.5, 1.5, 2.5, 3.5]);
    }
}
