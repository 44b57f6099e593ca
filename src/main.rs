use anyhow::{Result, bail};
use raylib::prelude::*;
use std::path::PathBuf;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicI32, Ordering},
};

use beatreel::config::Config;
use beatreel::download::{DownloadOptions, ImageDownloader};
use beatreel::init;
use beatreel::platform;
use beatreel::search::{ImageSearcher, SerpApiClient};
use beatreel::set_log_hook;
use beatreel::slideshow::run_slideshow;

const CONFIG_PATH: &str = "config.json";
const LOG_MAX_LINES: usize = 300;
const LOG_LINE_MAX: usize = 600;
const FIELD_MAX: usize = 200;

const COLOR_BG: Color = Color::new(25, 25, 25, 255);
const COLOR_BTN: Color = Color::new(40, 90, 170, 255);
const COLOR_BTN_HOVER: Color = Color::new(70, 120, 200, 255);
const COLOR_BTN_DISABLED: Color = Color::new(60, 60, 60, 255);
const COLOR_FIELD: Color = Color::new(35, 35, 35, 255);
const COLOR_FIELD_FOCUS: Color = Color::new(90, 140, 220, 255);
const COLOR_LOG_BG: Color = Color::new(18, 18, 18, 255);
const COLOR_LOG_TEXT: Color = Color::new(210, 210, 210, 255);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Query,
    Pages,
    Folder,
}

#[derive(Clone)]
enum Job {
    Download {
        query: String,
        pages: u32,
        folder: PathBuf,
    },
    Slideshow,
}

struct AppState {
    running: Arc<AtomicBool>,
    last_rc: Arc<AtomicI32>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    status: Arc<Mutex<String>>,
}

fn push_log_line(buffer: &Arc<Mutex<Vec<String>>>, line: &str) {
    let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
    if guard.len() >= LOG_MAX_LINES {
        let excess = guard.len() + 1 - LOG_MAX_LINES;
        guard.drain(0..excess);
    }
    let text: String = line.chars().take(LOG_LINE_MAX).collect();
    guard.push(text);
}

fn set_status(status: &Arc<Mutex<String>>, text: impl Into<String>) {
    *status.lock().unwrap_or_else(|e| e.into_inner()) = text.into();
}

/// Checks the form the way the download dialog always has, before any work starts.
fn validate_download(query: &str, pages: &str, folder: &str) -> Result<Job, &'static str> {
    let query = query.trim();
    if query.is_empty() {
        return Err("Please enter a search query.");
    }
    let pages = match pages.trim().parse::<u32>() {
        Ok(p) if p > 0 => p,
        _ => return Err("Number of pages must be a positive integer."),
    };
    let folder = folder.trim();
    if folder.is_empty() {
        return Err("Please select a download folder.");
    }
    Ok(Job::Download {
        query: query.to_string(),
        pages,
        folder: PathBuf::from(folder),
    })
}

async fn download_job(query: &str, pages: u32, folder: PathBuf) -> Result<(i32, String)> {
    let cfg = Config::load(CONFIG_PATH).await?;
    let key = match cfg.require_api_key() {
        Ok(key) => key,
        Err(_) => bail!("SerpAPI key not found in .env file."),
    };
    let searcher = ImageSearcher::new(SerpApiClient::new(key)?);
    let results = searcher.search_pages(query, pages).await;
    if results.is_empty() {
        return Ok((1, "No images found.".to_string()));
    }

    let downloader = ImageDownloader::new(DownloadOptions {
        folder,
        max_filename_length: cfg.download.max_filename_length,
        max_workers: cfg.download.max_workers,
    })
    .await?;
    let report = downloader.download_images(results).await;
    let code = if report.downloaded() > 0 { 0 } else { 1 };
    Ok((code, format!("Successfully downloaded {} images", report.downloaded())))
}

async fn slideshow_job() -> Result<(i32, String)> {
    let cfg = Config::load(CONFIG_PATH).await?;
    init::ensure_config_directories(&cfg).await?;
    if !init::check_ffmpeg().await {
        bail!("FFmpeg not found in PATH. Please install FFmpeg.");
    }
    let summary = run_slideshow(&cfg.slideshow).await?;
    let msg = match summary.output {
        Some(path) => format!("Slideshow written to {}", path.display()),
        None => format!("Planned {} shots", summary.plan.timeline.shot_count()),
    };
    Ok((0, msg))
}

fn draw_button(
    d: &mut RaylibDrawHandle,
    rect: Rectangle,
    label: &str,
    enabled: bool,
    font_size: f32,
) -> bool {
    let mouse = d.get_mouse_position();
    let hot = rect.check_collision_point_rec(mouse);

    let bg = if !enabled {
        COLOR_BTN_DISABLED
    } else if hot {
        COLOR_BTN_HOVER
    } else {
        COLOR_BTN
    };

    d.draw_rectangle_rounded(rect, 0.25, 10, bg);
    d.draw_rectangle_rounded_lines(rect, 0.25, 10, Color::new(20, 20, 20, 255));

    let ts = d.measure_text(label, font_size as i32);
    let pos_x = rect.x + (rect.width - ts as f32) * 0.5;
    let pos_y = rect.y + (rect.height - font_size) * 0.5;
    d.draw_text(label, pos_x as i32, pos_y as i32, font_size as i32, Color::RAYWHITE);

    enabled && hot && d.is_mouse_button_released(MouseButton::MOUSE_BUTTON_LEFT)
}

/// Draws a single-line input; returns true when clicked.
fn draw_text_field(
    d: &mut RaylibDrawHandle,
    rect: Rectangle,
    label: &str,
    text: &str,
    focused: bool,
) -> bool {
    let label_color = Color::new(180, 180, 180, 255);
    d.draw_text(label, rect.x as i32, rect.y as i32 - 18, 16, label_color);
    d.draw_rectangle_rec(rect, COLOR_FIELD);
    let border = if focused {
        COLOR_FIELD_FOCUS
    } else {
        Color::new(60, 60, 60, 255)
    };
    d.draw_rectangle_lines_ex(rect, 2.0, border);

    // Keep the tail visible when the text is wider than the box.
    let font = 16;
    let mut shown = text;
    while !shown.is_empty() && d.measure_text(shown, font) as f32 > rect.width - 16.0 {
        let mut chars = shown.chars();
        chars.next();
        shown = chars.as_str();
    }
    let caret = if focused { "_" } else { "" };
    d.draw_text(
        &format!("{shown}{caret}"),
        rect.x as i32 + 8,
        (rect.y + (rect.height - font as f32) * 0.5) as i32,
        font,
        Color::RAYWHITE,
    );

    let hot = rect.check_collision_point_rec(d.get_mouse_position());
    hot && d.is_mouse_button_pressed(MouseButton::MOUSE_BUTTON_LEFT)
}

fn edit_text(d: &mut RaylibDrawHandle, text: &mut String) {
    while let Some(c) = d.get_char_pressed() {
        if !c.is_control() && text.chars().count() < FIELD_MAX {
            text.push(c);
        }
    }
    if d.is_key_pressed(KeyboardKey::KEY_BACKSPACE) {
        text.pop();
    }
}

fn draw_log_panel(d: &mut RaylibDrawHandle, rect: Rectangle, lines: &[String]) {
    d.draw_rectangle_rec(rect, COLOR_LOG_BG);
    d.draw_rectangle_lines_ex(rect, 2.0, Color::new(40, 40, 40, 255));

    let font_size = 14;
    let pad = 8.0;
    let line_h = 16.0;
    let max_lines = ((rect.height - 2.0 * pad) / line_h).floor().max(1.0) as usize;
    let start = lines.len().saturating_sub(max_lines);

    let mut y = rect.y + pad;
    for line in lines.iter().skip(start) {
        d.draw_text(line, (rect.x + pad) as i32, y as i32, font_size, COLOR_LOG_TEXT);
        y += line_h;
    }
}

fn start_job_thread(state: &AppState, job: Job) {
    if state.running.swap(true, Ordering::SeqCst) {
        return;
    }
    state.last_rc.store(0, Ordering::SeqCst);

    let running = Arc::clone(&state.running);
    let last_rc = Arc::clone(&state.last_rc);
    let log_buffer = Arc::clone(&state.log_buffer);
    let status = Arc::clone(&state.status);

    std::thread::spawn(move || {
        let hook_buffer = Arc::clone(&log_buffer);
        set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            push_log_line(&hook_buffer, line);
        }))));

        let outcome = tokio::runtime::Runtime::new()
            .map_err(anyhow::Error::from)
            .and_then(|rt| {
                rt.block_on(async {
                    match job {
                        Job::Download {
                            query,
                            pages,
                            folder,
                        } => download_job(&query, pages, folder).await,
                        Job::Slideshow => slideshow_job().await,
                    }
                })
            });

        match outcome {
            Ok((code, msg)) => {
                push_log_line(&log_buffer, &msg);
                set_status(&status, msg);
                last_rc.store(code, Ordering::SeqCst);
            }
            Err(err) => {
                push_log_line(&log_buffer, &format!("[ERROR] {:#}", err));
                set_status(&status, format!("Error: {}", err));
                last_rc.store(1, Ordering::SeqCst);
            }
        }

        set_log_hook(None);
        running.store(false, Ordering::SeqCst);
    });
}

fn snapshot_logs(buffer: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn clear_logs(buffer: &Arc<Mutex<Vec<String>>>) {
    buffer.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let rt = tokio::runtime::Runtime::new()?;
    let cfg = rt.block_on(async {
        if let Err(e) = init::ensure_directories().await {
            eprintln!("[ERROR] Failed to create directories: {}", e);
        }
        if !init::check_ffmpeg().await {
            eprintln!("[WARNING] FFmpeg not found in PATH. Please install FFmpeg.");
        }
        Config::load(CONFIG_PATH).await
    });
    drop(rt);
    let cfg = cfg.unwrap_or_else(|e| {
        eprintln!("[WARNING] {:#}; using defaults", e);
        Config::default()
    });

    let (mut rl, thread) = raylib::init()
        .size(920, 600)
        .resizable()
        .title("Beatreel")
        .build();
    rl.set_target_fps(60);

    let state = AppState {
        running: Arc::new(AtomicBool::new(false)),
        last_rc: Arc::new(AtomicI32::new(0)),
        log_buffer: Arc::new(Mutex::new(Vec::with_capacity(LOG_MAX_LINES))),
        status: Arc::new(Mutex::new("Ready".to_string())),
    };

    let mut query = String::new();
    let mut pages = cfg.download.pages.to_string();
    let mut folder = cfg.download.folder.display().to_string();
    let mut focus = Some(Field::Query);

    while !rl.window_should_close() {
        let mut d = rl.begin_drawing(&thread);
        d.clear_background(COLOR_BG);

        d.draw_text("Image Search", 30, 16, 24, Color::RAYWHITE);

        let fields = [
            (Field::Query, "Search query", Rectangle::new(30.0, 70.0, 260.0, 32.0)),
            (Field::Pages, "Pages", Rectangle::new(30.0, 130.0, 260.0, 32.0)),
            (Field::Folder, "Download folder", Rectangle::new(30.0, 190.0, 260.0, 32.0)),
        ];
        for (field, label, rect) in fields {
            let text = match field {
                Field::Query => &query,
                Field::Pages => &pages,
                Field::Folder => &folder,
            };
            if draw_text_field(&mut d, rect, label, text, focus == Some(field)) {
                focus = Some(field);
            }
        }
        match focus {
            Some(Field::Query) => edit_text(&mut d, &mut query),
            Some(Field::Pages) => edit_text(&mut d, &mut pages),
            Some(Field::Folder) => edit_text(&mut d, &mut folder),
            None => {}
        }
        if d.is_key_pressed(KeyboardKey::KEY_TAB) {
            focus = match focus {
                Some(Field::Query) => Some(Field::Pages),
                Some(Field::Pages) => Some(Field::Folder),
                _ => Some(Field::Query),
            };
        }

        let idle = !state.running.load(Ordering::SeqCst);

        if draw_button(
            &mut d,
            Rectangle::new(30.0, 240.0, 260.0, 44.0),
            "Download Images",
            idle,
            18.0,
        ) {
            match validate_download(&query, &pages, &folder) {
                Ok(job) => {
                    clear_logs(&state.log_buffer);
                    set_status(&state.status, "Downloading...");
                    start_job_thread(&state, job);
                }
                Err(msg) => set_status(&state.status, msg),
            }
        }

        if draw_button(
            &mut d,
            Rectangle::new(30.0, 295.0, 260.0, 44.0),
            "Make Slideshow",
            idle,
            18.0,
        ) {
            clear_logs(&state.log_buffer);
            set_status(&state.status, "Building slideshow...");
            start_job_thread(&state, Job::Slideshow);
        }

        d.draw_text("Folders", 30, 358, 20, Color::RAYWHITE);
        let output_dir = cfg
            .slideshow
            .output
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        let opens = [
            ("Open Download Folder", PathBuf::from(folder.trim())),
            ("Open Clips Folder", cfg.slideshow.image_dir.clone()),
            ("Open Output Folder", output_dir),
        ];
        for (i, (label, path)) in opens.into_iter().enumerate() {
            let rect = Rectangle::new(30.0, 390.0 + 50.0 * i as f32, 260.0, 40.0);
            if draw_button(&mut d, rect, label, true, 16.0) {
                if let Err(e) = platform::open_folder(&path) {
                    set_status(&state.status, format!("Cannot open {}: {}", path.display(), e));
                }
            }
        }

        let status = state.status.lock().unwrap_or_else(|e| e.into_inner()).clone();
        d.draw_text(&status, 30, 548, 16, Color::new(220, 220, 220, 255));
        let rc_line = format!(
            "{}   (last exit code: {})",
            if idle { "IDLE" } else { "RUNNING" },
            state.last_rc.load(Ordering::SeqCst)
        );
        d.draw_text(&rc_line, 30, 570, 14, Color::new(150, 150, 150, 255));

        d.draw_text("Log", 320, 16, 24, Color::RAYWHITE);
        let lines = snapshot_logs(&state.log_buffer);
        draw_log_panel(&mut d, Rectangle::new(320.0, 56.0, 570.0, 520.0), &lines);
    }

    Ok(())
}
