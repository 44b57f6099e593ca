use crate::audio::AudioTrack;
use crate::beats::{self, BeatAnalysis};
use crate::config::{BeatSource, SlideshowConfig};
use crate::error::BeatreelError;
use crate::ffmpeg;
use crate::render::{self, RenderOptions};
use crate::schedule::{self, ScheduleOptions, Scheduler, Timeline};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct SlideshowPlan {
    pub analysis: BeatAnalysis,
    pub timeline: Timeline,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SlideshowSummary {
    pub plan: SlideshowPlan,
    pub shots_rendered: usize,
    pub shots_filled: usize,
    /// `None` for a dry run.
    pub output: Option<PathBuf>,
}

/// Beat analysis and scheduling, no rendering.
pub async fn plan_slideshow(cfg: &SlideshowConfig) -> Result<SlideshowPlan> {
    logi(format!("Loading audio: {}", cfg.audio_path.display()));
    let track = AudioTrack::load(&cfg.audio_path, cfg.sample_rate).await?;
    let duration = track.duration();
    logok(format!("Audio loaded: {:.2}s at {} Hz", duration, track.sample_rate));

    logi("Detecting peaks in the audio...");
    let analysis = tokio::task::spawn_blocking({
        let bpm = cfg.bpm;
        move || beats::detect_peaks(&track, bpm)
    })
    .await
    .context("peak detection task failed")?;

    let stamps = analysis.timestamps(cfg.beat_source);
    let segs = schedule::segments(&stamps, analysis.duration);
    if segs.is_empty() {
        return Err(BeatreelError::NoPeaks(cfg.audio_path.clone()).into());
    }
    let source = match cfg.beat_source {
        BeatSource::Onsets => "onsets",
        BeatSource::Tempo => "tempo grid",
    };
    logok(format!(
        "{} onsets detected; cutting on {} ({} segments)",
        analysis.onsets.len(),
        source,
        segs.len()
    ));

    logi("Collecting clips...");
    let files = schedule::collect_media(&cfg.image_dir, &cfg.video_dir)?;
    if files.is_empty() {
        return Err(BeatreelError::NoMedia {
            images: cfg.image_dir.clone(),
            videos: cfg.video_dir.clone(),
        }
        .into());
    }

    let seed = cfg.seed.unwrap_or_else(now_seed);
    let options = ScheduleOptions {
        weights: cfg.cut_weights,
        zoom: cfg.zoom_effect,
        bpm: analysis.bpm,
        roll_flashes: cfg.roll_flashes,
        roll_flash_secs: cfg.roll_flash_secs,
    };
    let timeline = Scheduler::new(options, StdRng::seed_from_u64(seed)).schedule(&segs, &files);
    logok(format!(
        "Scheduled {} slots / {} shots from {} files (seed {})",
        timeline.slots.len(),
        timeline.shot_count(),
        files.len(),
        seed
    ));

    Ok(SlideshowPlan {
        analysis,
        timeline,
        seed,
    })
}

pub async fn write_plan(plan: &SlideshowPlan, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let json = serde_json::to_string_pretty(&serde_json::json!({
        "seed": plan.seed,
        "analysis": plan.analysis,
        "timeline": plan.timeline,
    }))?;
    fs::write(path, json)
        .await
        .with_context(|| format!("write plan {}", path.display()))?;
    Ok(())
}

fn banner_for(cfg: &SlideshowConfig) -> Option<&Path> {
    if !cfg.banner_on {
        return None;
    }
    if cfg.banner_img.is_file() {
        Some(cfg.banner_img.as_path())
    } else {
        logw(format!("Banner not found at {}; rendering without it", cfg.banner_img.display()));
        None
    }
}

pub async fn run_slideshow(cfg: &SlideshowConfig) -> Result<SlideshowSummary> {
    let plan = plan_slideshow(cfg).await?;

    if let Some(plan_out) = &cfg.plan_out {
        write_plan(&plan, plan_out).await?;
        logok(format!("Wrote plan: {}", plan_out.display()));
    }

    if cfg.dry_run {
        logi("Dry run: skipping render.");
        return Ok(SlideshowSummary {
            plan,
            shots_rendered: 0,
            shots_filled: 0,
            output: None,
        });
    }

    fs::create_dir_all(&cfg.work_dir)
        .await
        .with_context(|| format!("Failed to create dir {}", cfg.work_dir.display()))?;
    let work = tempfile::Builder::new()
        .prefix("render-")
        .tempdir_in(&cfg.work_dir)
        .context("create render dir")?;

    let opts = RenderOptions {
        width: cfg.width,
        height: cfg.height,
        fps: cfg.fps,
    };

    let spans = plan.timeline.frame_spans(cfg.fps);
    let mut names = Vec::with_capacity(spans.len());
    let mut rendered = 0usize;
    let mut filled = 0usize;

    logi(format!("Rendering {} shots...", spans.len()));
    for (idx, span) in spans.iter().enumerate() {
        let shot = &plan.timeline.slots[span.slot].shots[span.shot];
        let name = format!("shot_{:05}.mp4", idx + 1);
        let out = work.path().join(&name);

        match render::render_shot(shot, span.frames, &opts, &out).await {
            Ok(()) => rendered += 1,
            Err(err) => {
                logw(format!("{:#}; filling {} frames with black", err, span.frames));
                render::render_black(span.frames, &opts, &out).await?;
                filled += 1;
            }
        }
        names.push(name);
    }

    if rendered == 0 {
        anyhow::bail!(
            "No clips to process. Please check {} and {}.",
            cfg.image_dir.display(),
            cfg.video_dir.display()
        );
    }
    logok(format!("Shots rendered: {} ({} filled)", rendered, filled));

    let list = work.path().join("concat_list.txt");
    render::write_concat_list(&list, &names).await?;
    let joined = work.path().join("joined.mp4");
    logi("Compositing final video...");
    if !render::concat_shots(&list, &joined).await? {
        return Err(BeatreelError::Ffmpeg("concat produced no output".to_string()).into());
    }

    let banner = banner_for(cfg);
    logi(format!("Muxing audio -> {}", cfg.output.display()));
    let duration = plan.timeline.duration;
    if !render::finalize(&joined, &cfg.audio_path, banner, duration, &opts, &cfg.output).await? {
        return Err(BeatreelError::Ffmpeg(format!("no output at {}", cfg.output.display())).into());
    }

    match ffmpeg::ffprobe_duration_seconds(&cfg.output).await {
        Ok(d) => logok(format!("Wrote {} ({:.2}s)", cfg.output.display(), d)),
        Err(err) => logw(format!(
            "Wrote {} but could not probe it: {:#}",
            cfg.output.display(),
            err
        )),
    }

    Ok(SlideshowSummary {
        plan,
        shots_rendered: rendered,
        shots_filled: filled,
        output: Some(cfg.output.clone()),
    })
}
