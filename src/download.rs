use crate::search::ImageResult;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
    "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15"
);

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub folder: PathBuf,
    pub max_filename_length: usize,
    pub max_workers: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("images"),
            max_filename_length: 50,
            max_workers: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Downloaded {
        filename: String,
        path: PathBuf,
        bytes: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl DownloadOutcome {
    pub fn message(&self) -> String {
        match self {
            DownloadOutcome::Downloaded { filename, .. } => format!("Downloaded: {filename}"),
            DownloadOutcome::Skipped { reason } => reason.clone(),
            DownloadOutcome::Failed { filename, error } => format!("Failed: {filename}: {error}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Completion order, one entry per input.
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadReport {
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Downloaded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

fn invalid_chars_regex() -> Result<&'static Regex> {
    static INVALID_RE: OnceCell<Regex> = OnceCell::new();
    INVALID_RE.get_or_try_init(|| {
        Regex::new(r#"[<>:"/\\|?*]"#).context("failed to compile filename regex")
    })
}

/// Removes characters that are not allowed in file names on common platforms.
pub fn sanitize_filename(name: &str) -> Result<String> {
    Ok(invalid_chars_regex()?.replace_all(name, "").into_owned())
}

/// Last path segment of `url`, sanitized and cut to `max_len` characters.
pub fn filename_for_url(url: &str, max_len: usize) -> Result<String> {
    let last = url.rsplit('/').next().unwrap_or_default();
    Ok(sanitize_filename(last)?.chars().take(max_len).collect())
}

fn filename_for(image: &ImageResult, max_len: usize) -> Result<String> {
    let name = filename_for_url(&image.url, max_len)?;
    if !name.is_empty() {
        return Ok(name);
    }
    let fallback = if image.position > 0 {
        format!("image_{}", image.position)
    } else {
        "image".to_string()
    };
    Ok(fallback.chars().take(max_len).collect())
}

/// Returns `name`, or `stem_<tag>.ext` when a file of this batch already took it.
fn claim_name(name: String, tag: u64, max_len: usize, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let path = Path::new(&name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(&name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let mut n = 0u64;
    loop {
        let suffix = if n == 0 {
            format!("_{tag}{ext}")
        } else {
            format!("_{tag}_{n}{ext}")
        };
        let keep = max_len.saturating_sub(suffix.chars().count()).max(1);
        let candidate: String = stem.chars().take(keep).chain(suffix.chars()).collect();
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Clone)]
pub struct ImageDownloader {
    client: Client,
    options: DownloadOptions,
}

impl ImageDownloader {
    pub async fn new(options: DownloadOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("failed to build reqwest client")?;
        Self::with_client(client, options).await
    }

    pub async fn with_client(client: Client, options: DownloadOptions) -> Result<Self> {
        if !options.folder.exists() {
            fs::create_dir_all(&options.folder)
                .await
                .with_context(|| format!("Failed to create dir {}", options.folder.display()))?;
        }
        Ok(Self { client, options })
    }

    pub fn folder(&self) -> &Path {
        &self.options.folder
    }

    pub async fn download_image(&self, image: &ImageResult) -> DownloadOutcome {
        if !image.is_valid() {
            return Self::skipped();
        }
        match filename_for(image, self.options.max_filename_length) {
            Ok(filename) => self.download_as(image, filename).await,
            Err(err) => DownloadOutcome::Failed {
                filename: String::new(),
                error: format!("{:#}", err),
            },
        }
    }

    fn skipped() -> DownloadOutcome {
        DownloadOutcome::Skipped {
            reason: "No valid image URL".to_string(),
        }
    }

    async fn download_as(&self, image: &ImageResult, filename: String) -> DownloadOutcome {
        let path = self.options.folder.join(&filename);
        match self.fetch_to(&image.url, &path).await {
            Ok(bytes) => DownloadOutcome::Downloaded {
                filename,
                path,
                bytes,
            },
            Err(err) => DownloadOutcome::Failed {
                filename,
                error: format!("{:#}", err),
            },
        }
    }

    async fn fetch_to(&self, url: &str, path: &Path) -> Result<usize> {
        let resp = self.client.get(url).send().await.context("request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {}", status.as_u16());
        }
        let bytes = resp.bytes().await.context("response read failed")?;
        fs::write(path, &bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(bytes.len())
    }

    /// Downloads everything with at most `max_workers` requests in flight.
    pub async fn download_images(&self, images: Vec<ImageResult>) -> DownloadReport {
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut handles = JoinSet::new();
        let total = images.len();

        let mut report = DownloadReport::default();
        let max_len = self.options.max_filename_length;
        let mut taken = HashSet::new();

        for (idx, image) in images.into_iter().enumerate() {
            if !image.is_valid() {
                let outcome = Self::skipped();
                logw(outcome.message());
                report.outcomes.push(outcome);
                continue;
            }
            // Results sharing a last URL segment would overwrite each other.
            let filename = match filename_for(&image, max_len) {
                Ok(name) => {
                    let tag = if image.position > 0 {
                        image.position
                    } else {
                        idx as u64 + 1
                    };
                    claim_name(name, tag, max_len, &mut taken)
                }
                Err(err) => {
                    let outcome = DownloadOutcome::Failed {
                        filename: String::new(),
                        error: format!("{:#}", err),
                    };
                    logw(outcome.message());
                    report.outcomes.push(outcome);
                    continue;
                }
            };

            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                this.download_as(&image, filename).await
            });
        }

        while let Some(joined) = handles.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => DownloadOutcome::Failed {
                    filename: String::new(),
                    error: format!("download task panicked: {err}"),
                },
            };
            match &outcome {
                DownloadOutcome::Downloaded { .. } => logok(outcome.message()),
                _ => logw(outcome.message()),
            }
            report.outcomes.push(outcome);
        }

        logi(format!(
            "Download complete: {}/{} downloaded, {} failed, {} skipped",
            report.downloaded(),
            total,
            report.failed(),
            report.skipped()
        ));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reserved_characters() {
        assert_eq!(sanitize_filename(r#"a<b>c:d"e/f\g|h?i*j.png"#).unwrap(), "abcdefghij.png");
        assert_eq!(sanitize_filename("plain-name_1.jpg").unwrap(), "plain-name_1.jpg");
    }

    #[test]
    fn takes_last_segment_and_truncates() {
        assert_eq!(filename_for_url("https://x.test/a/b/snow.jpg", 50).unwrap(), "snow.jpg");
        assert_eq!(
            filename_for_url("https://x.test/img.php?id=4&size=*big*", 50).unwrap(),
            "img.phpid=4&size=big"
        );
        let long = format!("https://x.test/{}.jpg", "n".repeat(80));
        assert_eq!(filename_for_url(&long, 50).unwrap().chars().count(), 50);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let name = filename_for_url("https://x.test/雪の夜の写真.jpg", 3).unwrap();
        assert_eq!(name, "雪の夜");
    }

    #[test]
    fn empty_segment_falls_back_to_position() {
        let image = ImageResult {
            url: "https://x.test/gallery/".to_string(),
            position: 12,
            ..Default::default()
        };
        assert_eq!(filename_for(&image, 50).unwrap(), "image_12");
    }

    #[test]
    fn repeated_names_get_a_position_suffix() {
        let mut taken = HashSet::new();
        assert_eq!(claim_name("snow.jpg".into(), 1, 50, &mut taken), "snow.jpg");
        assert_eq!(claim_name("snow.jpg".into(), 4, 50, &mut taken), "snow_4.jpg");
        assert_eq!(claim_name("snow.jpg".into(), 4, 50, &mut taken), "snow_4_1.jpg");
        assert_eq!(claim_name("noext".into(), 2, 50, &mut taken), "noext");
        assert_eq!(claim_name("noext".into(), 9, 50, &mut taken), "noext_9");

        let long = "a".repeat(50) + ".png";
        let long: String = long.chars().take(50).collect();
        claim_name(long.clone(), 1, 50, &mut taken);
        let again = claim_name(long, 17, 50, &mut taken);
        assert!(again.chars().count() <= 50, "{again}");
        assert!(again.ends_with("_17"));
    }

    #[test]
    fn report_counts() {
        let report = DownloadReport {
            outcomes: vec![
                DownloadOutcome::Skipped {
                    reason: "No valid image URL".into(),
                },
                DownloadOutcome::Failed {
                    filename: "a".into(),
                    error: "HTTP 404".into(),
                },
                DownloadOutcome::Downloaded {
                    filename: "b".into(),
                    path: "b".into(),
                    bytes: 3,
                },
            ],
        };
        assert_eq!(report.downloaded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.outcomes[1].message(), "Failed: a: HTTP 404");
    }
}
