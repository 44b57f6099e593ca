use beatreel::download::{DownloadOptions, DownloadOutcome, ImageDownloader};
use beatreel::search::ImageResult;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: AtomicUsize,
}

/// Minimal HTTP/1.1 responder: `/missing*` is a 404, anything else echoes its path.
async fn spawn_image_server() -> (SocketAddr, Arc<Counters>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counters = Arc::new(Counters {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        requests: AtomicUsize::new(0),
    });

    let shared = Arc::clone(&counters);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let counters = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                counters.requests.fetch_add(1, Ordering::SeqCst);
                let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                counters.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
                counters.in_flight.fetch_sub(1, Ordering::SeqCst);

                let (status, body) = if path.starts_with("/missing") {
                    ("404 Not Found", "nope".to_string())
                } else {
                    ("200 OK", format!("image-bytes:{path}"))
                };
                let resp = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\n\
                     Content-Type: image/jpeg\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(resp.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, counters)
}

/// Loopback requests must not go through any proxy configured in the environment.
async fn downloader(options: DownloadOptions) -> ImageDownloader {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    ImageDownloader::with_client(client, options).await.unwrap()
}

fn image(url: String, position: u64) -> ImageResult {
    ImageResult {
        url,
        position,
        ..Default::default()
    }
}

#[tokio::test]
async fn downloads_valid_urls_and_skips_empty_ones() {
    let (addr, counters) = spawn_image_server().await;
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("images");

    let downloader = downloader(DownloadOptions {
        folder: folder.clone(),
        max_filename_length: 50,
        max_workers: 2,
    })
    .await;
    assert!(folder.is_dir());

    let mut inputs: Vec<ImageResult> = (0..6)
        .map(|i| image(format!("http://{addr}/pics/night_{i}.jpg"), i + 1))
        .collect();
    inputs.push(image(String::new(), 7));
    inputs.push(image(format!("http://{addr}/missing/gone.png"), 8));

    let report = downloader.download_images(inputs).await;

    assert_eq!(report.outcomes.len(), 8);
    assert_eq!(report.downloaded(), 6);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 1);
    // The empty URL never reached the server.
    assert_eq!(counters.requests.load(Ordering::SeqCst), 7);
    assert!(counters.peak.load(Ordering::SeqCst) <= 2);

    let written = std::fs::read_to_string(folder.join("night_3.jpg")).unwrap();
    assert_eq!(written, "image-bytes:/pics/night_3.jpg");
    assert!(!folder.join("gone.png").exists());

    let files = std::fs::read_dir(&folder).unwrap().count();
    assert!(files <= 8);
    assert_eq!(files, 6);
}

#[tokio::test]
async fn failure_reports_http_status() {
    let (addr, _) = spawn_image_server().await;
    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(DownloadOptions {
        folder: dir.path().to_path_buf(),
        ..Default::default()
    })
    .await;

    let outcome = downloader
        .download_image(&image(format!("http://{addr}/missing/x.jpg"), 1))
        .await;
    match outcome {
        DownloadOutcome::Failed { filename, error } => {
            assert_eq!(filename, "x.jpg");
            assert!(error.contains("404"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn shared_last_segment_keeps_both_files() {
    let (addr, _) = spawn_image_server().await;
    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(DownloadOptions {
        folder: dir.path().to_path_buf(),
        ..Default::default()
    })
    .await;

    let report = downloader
        .download_images(vec![
            image(format!("http://{addr}/a/dup.jpg"), 1),
            image(format!("http://{addr}/b/dup.jpg"), 2),
        ])
        .await;

    assert_eq!(report.downloaded(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    let first = std::fs::read_to_string(dir.path().join("dup.jpg")).unwrap();
    let second = std::fs::read_to_string(dir.path().join("dup_2.jpg")).unwrap();
    assert_eq!(first, "image-bytes:/a/dup.jpg");
    assert_eq!(second, "image-bytes:/b/dup.jpg");
}
