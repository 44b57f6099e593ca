use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod audio;
pub mod beats;
pub mod config;
pub mod download;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod platform;
pub mod render;
pub mod schedule;
pub mod search;
pub mod slideshow;

pub use error::BeatreelError;

pub type LogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<LogHook>>> = Lazy::new(|| Mutex::new(None));

/// Installs (or clears) the process-wide hook that receives every formatted log line.
pub fn set_log_hook(hook: Option<LogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

fn forward_to_hook(tag: &str, message: &str) {
    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::info!("{}", message);
    forward_to_hook("INFO", message);
}

pub(crate) fn logok(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::info!(status = "ok", "{}", message);
    forward_to_hook("OK", message);
}

pub(crate) fn logw(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::warn!("{}", message);
    forward_to_hook("WARN", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_receives_tagged_lines() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }))));

        logw("hook-check disk full");
        set_log_hook(None);
        logi("hook-check after clear");

        let lines = seen.lock().unwrap();
        assert!(lines.iter().any(|l| l == "[WARN] hook-check disk full"));
        assert!(!lines.iter().any(|l| l.contains("after clear")));
    }
}
