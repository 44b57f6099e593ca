//! ffmpeg command lines for shots, concatenation and the final mux.

use crate::ffmpeg::{ffmpeg_base, run_cmd};
use crate::schedule::{Effect, MediaKind, Shot, ZoomMode};
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Banner height as a fraction of the output height.
const BANNER_HEIGHT_RATIO: f64 = 0.2;
const ZOOM_RATE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

fn encode_tail(frames: u64, out: &Path) -> Vec<String> {
    vec![
        "-frames:v".to_string(),
        frames.to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        out.display().to_string(),
    ]
}

/// Zoom expression for `zoompan`: linear from 1 to `1 + 0.1 * speed`, or back.
fn zoom_expr(mode: ZoomMode, speed: f64, frames: u64) -> String {
    let factor = ZOOM_RATE * speed;
    let frames = frames.max(1);
    match mode {
        ZoomMode::In => format!("1+{factor:.4}*on/{frames}"),
        ZoomMode::Out => format!("1+{factor:.4}*(1-on/{frames})"),
    }
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"))
}

pub fn image_shot_args(
    src: &Path,
    frames: u64,
    effect: Effect,
    opts: &RenderOptions,
    out: &Path,
) -> Vec<String> {
    let RenderOptions { width, height, fps } = *opts;
    let mut args = ffmpeg_base();

    let filter = match effect {
        Effect::Zoom { mode, speed } => {
            args.extend(["-i".to_string(), src.display().to_string()]);
            format!(
                "scale={width}:{height},setsar=1,\
                 zoompan=z='{}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':\
                 d={frames}:s={width}x{height}:fps={fps},format=yuv420p",
                zoom_expr(mode, speed, frames)
            )
        }
        // `-loop` and `-framerate` only exist on the image2 demuxer; gif has its own.
        Effect::None if is_gif(src) => {
            args.extend([
                "-stream_loop".to_string(),
                "-1".to_string(),
                "-i".to_string(),
                src.display().to_string(),
            ]);
            format!("scale={width}:{height},setsar=1,fps={fps},format=yuv420p")
        }
        Effect::None => {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-i".to_string(),
                src.display().to_string(),
            ]);
            format!("scale={width}:{height},setsar=1,format=yuv420p")
        }
    };

    args.extend(["-vf".to_string(), filter, "-r".to_string(), fps.to_string()]);
    args.extend(encode_tail(frames, out));
    args
}

/// The head of the video, held on its last frame if it is shorter than the shot.
pub fn video_shot_args(src: &Path, frames: u64, opts: &RenderOptions, out: &Path) -> Vec<String> {
    let RenderOptions { width, height, fps } = *opts;
    let secs = frames as f64 / fps as f64;
    let mut args = ffmpeg_base();
    args.extend([
        "-t".to_string(),
        format!("{secs:.3}"),
        "-i".to_string(),
        src.display().to_string(),
        "-vf".to_string(),
        format!(
            "scale={width}:{height},setsar=1,fps={fps},\
             tpad=stop_mode=clone:stop_duration={secs:.3},format=yuv420p"
        ),
    ]);
    args.extend(encode_tail(frames, out));
    args
}

pub fn shot_args(shot: &Shot, frames: u64, opts: &RenderOptions, out: &Path) -> Vec<String> {
    match shot.kind {
        MediaKind::Image => image_shot_args(&shot.source, frames, shot.effect, opts, out),
        MediaKind::Video => video_shot_args(&shot.source, frames, opts, out),
    }
}

pub async fn render_shot(shot: &Shot, frames: u64, opts: &RenderOptions, out: &Path) -> Result<()> {
    run_cmd(&shot_args(shot, frames, opts, out))
        .await
        .with_context(|| format!("Error processing file {}", shot.source.display()))
}

/// Plain black frames, used in place of a shot whose source could not be decoded.
pub fn black_args(frames: u64, opts: &RenderOptions, out: &Path) -> Vec<String> {
    let RenderOptions { width, height, fps } = *opts;
    let mut args = ffmpeg_base();
    args.extend([
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("color=c=black:s={width}x{height}:r={fps}"),
        "-vf".to_string(),
        "format=yuv420p".to_string(),
    ]);
    args.extend(encode_tail(frames, out));
    args
}

pub async fn render_black(frames: u64, opts: &RenderOptions, out: &Path) -> Result<()> {
    run_cmd(&black_args(frames, opts, out)).await
}

/// One `file '<name>'` line per entry, quoting per the concat demuxer rules.
pub fn concat_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', r"'\''")))
        .collect()
}

pub async fn write_concat_list(path: &Path, names: &[String]) -> Result<()> {
    let mut listf = fs::File::create(path)
        .await
        .with_context(|| format!("create concat list {}", path.display()))?;
    listf.write_all(concat_list(names).as_bytes()).await?;
    listf.flush().await?;
    Ok(())
}

pub fn concat_args(list_txt: &Path, out: &Path) -> Vec<String> {
    let mut args = ffmpeg_base();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        out.display().to_string(),
    ]);
    args
}

pub async fn concat_shots(list_txt: &Path, out: &Path) -> Result<bool> {
    run_cmd(&concat_args(list_txt, out)).await?;
    Ok(out.exists())
}

pub fn banner_height(height: u32) -> u32 {
    (((height as f64) * BANNER_HEIGHT_RATIO) as u32 & !1).max(2)
}

/// Overlays the optional banner bottom-center, muxes the audio, cuts at `duration`.
pub fn finalize_args(
    video: &Path,
    audio: &Path,
    banner: Option<&Path>,
    duration: f64,
    opts: &RenderOptions,
    out: &Path,
) -> Vec<String> {
    let mut args = ffmpeg_base();
    args.extend([
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
    ]);

    match banner {
        Some(banner) => {
            let bh = banner_height(opts.height);
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-i".to_string(),
                banner.display().to_string(),
                "-filter_complex".to_string(),
                format!(
                    "[2:v]scale={}:{bh},setsar=1[b];\
                     [0:v][b]overlay=(W-w)/2:H-h:shortest=1,format=yuv420p[v]",
                    opts.width
                ),
                "-map".to_string(),
                "[v]".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-crf".to_string(),
                "22".to_string(),
                "-r".to_string(),
                opts.fps.to_string(),
            ]);
        }
        None => {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
            ]);
        }
    }

    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-t".to_string(),
        format!("{duration:.3}"),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out.display().to_string(),
    ]);
    args
}

pub async fn finalize(
    video: &Path,
    audio: &Path,
    banner: Option<&Path>,
    duration: f64,
    opts: &RenderOptions,
    out: &Path,
) -> Result<bool> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
    }
    run_cmd(&finalize_args(video, audio, banner, duration, opts, out)).await?;
    Ok(out.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const OPTS: RenderOptions = RenderOptions {
        width: 1280,
        height: 720,
        fps: 24,
    };

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let i = args.iter().position(|a| a == flag).unwrap();
        &args[i + 1]
    }

    #[test]
    fn still_image_loops_for_exact_frames() {
        let args = image_shot_args(Path::new("a.jpg"), 37, Effect::None, &OPTS, Path::new("s.mp4"));
        assert_eq!(args[0], "ffmpeg");
        assert_eq!(value_after(&args, "-loop"), "1");
        assert_eq!(value_after(&args, "-frames:v"), "37");
        assert_eq!(value_after(&args, "-vf"), "scale=1280:720,setsar=1,format=yuv420p");
        assert_eq!(args.last().unwrap(), "s.mp4");
    }

    #[test]
    fn gif_still_loops_the_stream_instead() {
        let src = Path::new("thumbnails/a.GIF");
        let args = image_shot_args(src, 24, Effect::None, &OPTS, Path::new("s.mp4"));
        assert!(!args.iter().any(|a| a == "-loop" || a == "-framerate"));
        assert_eq!(value_after(&args, "-stream_loop"), "-1");
        assert_eq!(value_after(&args, "-i"), "thumbnails/a.GIF");
        assert_eq!(value_after(&args, "-vf"), "scale=1280:720,setsar=1,fps=24,format=yuv420p");
        assert_eq!(value_after(&args, "-frames:v"), "24");
    }

    #[test]
    fn zoom_uses_zoompan_over_the_shot() {
        let effect = Effect::Zoom {
            mode: ZoomMode::Out,
            speed: 0.5,
        };
        let args = image_shot_args(Path::new("a.jpg"), 48, effect, &OPTS, Path::new("s.mp4"));
        let vf = value_after(&args, "-vf");
        assert!(vf.contains("zoompan=z='1+0.0500*(1-on/48)'"), "{vf}");
        assert!(vf.contains("d=48:s=1280x720:fps=24"));
        assert!(!args.iter().any(|a| a == "-loop"));
    }

    #[test]
    fn video_is_trimmed_and_padded() {
        let args = video_shot_args(Path::new("v.mp4"), 36, &OPTS, Path::new("s.mp4"));
        assert_eq!(value_after(&args, "-t"), "1.500");
        assert!(value_after(&args, "-vf").contains("tpad=stop_mode=clone:stop_duration=1.500"));
    }

    #[test]
    fn black_filler_matches_output_format() {
        let args = black_args(12, &OPTS, Path::new("gap.mp4"));
        assert_eq!(value_after(&args, "-i"), "color=c=black:s=1280x720:r=24");
        assert_eq!(value_after(&args, "-frames:v"), "12");
    }

    #[test]
    fn concat_list_escapes_quotes() {
        let list = concat_list(&["shot_0001.mp4".to_string(), "it's.mp4".to_string()]);
        assert_eq!(list, "file 'shot_0001.mp4'\nfile 'it'\\''s.mp4'\n");
    }

    #[test]
    fn banner_is_a_fifth_of_the_height() {
        assert_eq!(banner_height(720), 144);
        assert_eq!(banner_height(1080), 216);
        assert_eq!(banner_height(1), 2);
    }

    #[test]
    fn finalize_with_and_without_banner() {
        let out = PathBuf::from("out.mp4");
        let (video, audio) = (Path::new("v.mp4"), Path::new("a.mp3"));
        let plain = finalize_args(video, audio, None, 12.3456, &OPTS, &out);
        assert_eq!(value_after(&plain, "-c:v"), "copy");
        assert_eq!(value_after(&plain, "-t"), "12.346");

        let banner_img = Some(Path::new("b.jpeg"));
        let banner = finalize_args(video, audio, banner_img, 5.0, &OPTS, &out);
        let fc = value_after(&banner, "-filter_complex");
        assert!(fc.starts_with("[2:v]scale=1280:144"));
        assert!(fc.contains("overlay=(W-w)/2:H-h"));
        assert_eq!(value_after(&banner, "-map"), "[v]");
    }
}
