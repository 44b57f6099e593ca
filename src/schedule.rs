use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "bmp", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

/// Shortest shot a split or roll may leave behind.
pub const MIN_SHOT_SECS: f64 = 0.2;
const BEATS_PER_BAR: f64 = 4.0;
const BARS_PER_BLOCK: f64 = 8.0;
const ZOOM_SPEED: f64 = 0.5;
const STAMP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Partitions `[0, duration)` at the given cut times.
///
/// Stamps outside the track, non-finite stamps and duplicates are dropped.
/// The first kept stamp is moved to 0 so nothing before it goes uncovered,
/// which keeps the segment count at or below the stamp count.
pub fn segments(timestamps: &[f64], duration: f64) -> Vec<Segment> {
    if !(duration.is_finite() && duration > 0.0) {
        return Vec::new();
    }

    let mut stamps: Vec<f64> = timestamps
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t >= 0.0 && *t < duration)
        .collect();
    stamps.sort_by(|a, b| a.total_cmp(b));
    stamps.dedup_by(|a, b| (*a - *b).abs() < STAMP_EPSILON);

    let Some(first) = stamps.first_mut() else {
        return Vec::new();
    };
    *first = 0.0;

    stamps
        .iter()
        .enumerate()
        .map(|(i, &start)| Segment {
            start,
            end: stamps.get(i + 1).copied().unwrap_or(duration),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(OsStr::to_str)?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
}

fn list_kind(dir: &Path, kind: MediaKind) -> Result<Vec<MediaFile>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if MediaKind::from_path(entry.path()) == Some(kind) {
            out.push(MediaFile {
                path: entry.into_path(),
                kind,
            });
        }
    }
    Ok(out)
}

/// Images from `image_dir` and videos from `video_dir`, sorted by path.
pub fn collect_media(image_dir: &Path, video_dir: &Path) -> Result<Vec<MediaFile>> {
    let mut files = list_kind(image_dir, MediaKind::Image)?;
    files.extend(list_kind(video_dir, MediaKind::Video)?);
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutStyle {
    /// One shot for one segment.
    Single,
    /// One shot spanning this segment and the next.
    Merge,
    /// Two shots, each half the segment.
    Split,
    /// A burst of very short flashes, then one shot for the rest.
    Roll,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutWeights {
    pub single: f64,
    pub merge: f64,
    pub split: f64,
    pub roll: f64,
}

impl Default for CutWeights {
    fn default() -> Self {
        Self {
            single: 70.0,
            merge: 12.0,
            split: 12.0,
            roll: 6.0,
        }
    }
}

impl CutWeights {
    pub fn only_single() -> Self {
        Self {
            single: 1.0,
            merge: 0.0,
            split: 0.0,
            roll: 0.0,
        }
    }

    fn as_array(&self) -> [f64; 4] {
        [self.single, self.merge, self.split, self.roll]
    }

    pub fn is_valid(&self) -> bool {
        let w = self.as_array();
        w.iter().all(|v| v.is_finite() && *v >= 0.0) && w.iter().sum::<f64>() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomMode {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    #[default]
    None,
    Zoom { mode: ZoomMode, speed: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub source: PathBuf,
    pub kind: MediaKind,
    pub start: f64,
    pub duration: f64,
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub start: f64,
    pub end: f64,
    pub style: CutStyle,
    pub shots: Vec<Shot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub duration: f64,
    pub bpm: f64,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotSpan {
    pub slot: usize,
    pub shot: usize,
    pub start_frame: u64,
    pub frames: u64,
}

impl Timeline {
    pub fn shots(&self) -> impl Iterator<Item = &Shot> {
        self.slots.iter().flat_map(|slot| slot.shots.iter())
    }

    pub fn shot_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.shots.len()).sum()
    }

    /// Frame ranges per shot. Boundaries are rounded on the absolute clock so
    /// the counts add up to `round(duration * fps)`. Zero-frame shots are left out.
    pub fn frame_spans(&self, fps: u32) -> Vec<ShotSpan> {
        let fps = fps as f64;
        let total = (self.duration * fps).round() as u64;
        let mut spans = Vec::new();
        let mut shots = self
            .slots
            .iter()
            .enumerate()
            .flat_map(|(si, slot)| {
                slot.shots
                    .iter()
                    .enumerate()
                    .map(move |(hi, shot)| (si, hi, shot))
            })
            .peekable();

        while let Some((slot, shot_idx, shot)) = shots.next() {
            let start_frame = ((shot.start * fps).round() as u64).min(total);
            let end_frame = match shots.peek() {
                Some((_, _, next)) => ((next.start * fps).round() as u64).min(total),
                None => total,
            };
            if end_frame > start_frame {
                spans.push(ShotSpan {
                    slot,
                    shot: shot_idx,
                    start_frame,
                    frames: end_frame - start_frame,
                });
            }
        }
        spans
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub weights: CutWeights,
    pub zoom: bool,
    pub bpm: f64,
    pub roll_flashes: usize,
    pub roll_flash_secs: f64,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            weights: CutWeights::default(),
            zoom: true,
            bpm: 120.0,
            roll_flashes: 4,
            roll_flash_secs: 0.08,
        }
    }
}

pub struct Scheduler<R: Rng> {
    options: ScheduleOptions,
    rng: R,
    chooser: Option<WeightedIndex<f64>>,
}

impl<R: Rng> Scheduler<R> {
    pub fn new(options: ScheduleOptions, rng: R) -> Self {
        let chooser = WeightedIndex::new(options.weights.as_array()).ok();
        Self {
            options,
            rng,
            chooser,
        }
    }

    fn draw_style(&mut self) -> CutStyle {
        let Some(chooser) = &self.chooser else {
            return CutStyle::Single;
        };
        match chooser.sample(&mut self.rng) {
            1 => CutStyle::Merge,
            2 => CutStyle::Split,
            3 => CutStyle::Roll,
            _ => CutStyle::Single,
        }
    }

    /// Seconds in one 8-bar block at the scheduled tempo.
    fn block_secs(&self) -> f64 {
        BARS_PER_BLOCK * BEATS_PER_BAR * 60.0 / self.options.bpm
    }

    fn effect_for(&mut self, kind: MediaKind, start: f64, duration: f64) -> Effect {
        if !self.options.zoom || kind != MediaKind::Image || duration < MIN_SHOT_SECS {
            return Effect::None;
        }
        let block = self.block_secs();
        if !(block.is_finite() && block > 0.0) {
            return Effect::None;
        }
        // Zoom on every other 8-bar block.
        if (start / block).floor() as i64 % 2 != 0 {
            return Effect::None;
        }
        let mode = if self.rng.gen_bool(0.5) {
            ZoomMode::In
        } else {
            ZoomMode::Out
        };
        Effect::Zoom {
            mode,
            speed: ZOOM_SPEED,
        }
    }

    fn shot(
        &mut self,
        files: &[MediaFile],
        cursor: &mut usize,
        start: f64,
        duration: f64,
        allow_effect: bool,
    ) -> Shot {
        let file = &files[*cursor % files.len()];
        *cursor += 1;
        let effect = if allow_effect {
            self.effect_for(file.kind, start, duration)
        } else {
            Effect::None
        };
        Shot {
            source: file.path.clone(),
            kind: file.kind,
            start,
            duration,
            effect,
        }
    }

    /// Assigns shuffled files, cycling, to the segments and applies the cut policy.
    pub fn schedule(&mut self, segs: &[Segment], files: &[MediaFile]) -> Timeline {
        let duration = segs.last().map(|s| s.end).unwrap_or(0.0);
        let mut timeline = Timeline {
            duration,
            bpm: self.options.bpm,
            slots: Vec::with_capacity(segs.len()),
        };
        if files.is_empty() || segs.is_empty() {
            return timeline;
        }

        let mut files = files.to_vec();
        files.shuffle(&mut self.rng);
        let mut cursor = 0usize;

        let mut i = 0;
        while i < segs.len() {
            let seg = segs[i];
            let drawn = self.draw_style();
            let style = self.resolve_style(drawn, segs, i);
            let slot = match style {
                CutStyle::Merge => {
                    let end = segs[i + 1].end;
                    let shot = self.shot(&files, &mut cursor, seg.start, end - seg.start, true);
                    i += 2;
                    Slot {
                        start: seg.start,
                        end,
                        style,
                        shots: vec![shot],
                    }
                }
                CutStyle::Split => {
                    let half = seg.duration() / 2.0;
                    let mid = seg.start + half;
                    let first = self.shot(&files, &mut cursor, seg.start, half, true);
                    let second = self.shot(&files, &mut cursor, mid, seg.end - mid, true);
                    i += 1;
                    Slot {
                        start: seg.start,
                        end: seg.end,
                        style,
                        shots: vec![first, second],
                    }
                }
                CutStyle::Roll => {
                    let flashes = self.roll_flashes_for(seg.duration());
                    let flash = self.options.roll_flash_secs;
                    let mut shots = Vec::with_capacity(flashes + 1);
                    for k in 0..flashes {
                        let start = seg.start + k as f64 * flash;
                        shots.push(self.shot(&files, &mut cursor, start, flash, false));
                    }
                    let rest_start = seg.start + flashes as f64 * flash;
                    let rest = seg.end - rest_start;
                    shots.push(self.shot(&files, &mut cursor, rest_start, rest, true));
                    i += 1;
                    Slot {
                        start: seg.start,
                        end: seg.end,
                        style,
                        shots,
                    }
                }
                CutStyle::Single => {
                    let shot = self.shot(&files, &mut cursor, seg.start, seg.duration(), true);
                    i += 1;
                    Slot {
                        start: seg.start,
                        end: seg.end,
                        style,
                        shots: vec![shot],
                    }
                }
            };
            timeline.slots.push(slot);
        }

        timeline
    }

    /// Flashes that fit in a segment while leaving a minimum shot after them.
    fn roll_flashes_for(&self, seg_duration: f64) -> usize {
        let flash = self.options.roll_flash_secs;
        if !(flash > 0.0) {
            return 0;
        }
        let room = ((seg_duration - MIN_SHOT_SECS) / flash).floor();
        if room < 0.0 {
            return 0;
        }
        (room as usize).min(self.options.roll_flashes)
    }

    fn resolve_style(&self, drawn: CutStyle, segs: &[Segment], i: usize) -> CutStyle {
        let seg = segs[i];
        match drawn {
            CutStyle::Merge if i + 1 < segs.len() => CutStyle::Merge,
            CutStyle::Split if seg.duration() >= 2.0 * MIN_SHOT_SECS => CutStyle::Split,
            CutStyle::Roll if self.roll_flashes_for(seg.duration()) >= 2 => CutStyle::Roll,
            _ => CutStyle::Single,
        }
    }
}
