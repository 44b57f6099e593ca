use anyhow::{Result, bail};
use beatreel::config::{BeatSource, Config};
use beatreel::download::{DownloadOptions, ImageDownloader};
use beatreel::init;
use beatreel::search::{ImageSearcher, SerpApiClient};
use beatreel::slideshow::run_slideshow;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "beatreel-cli",
    version,
    about = "Image search downloads and beat-synced slideshows"
)]
struct Cli {
    /// Path to config.json
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print search results as JSON lines
    Search {
        query: String,
        #[arg(short, long)]
        pages: Option<u32>,
    },
    /// Search and download the result images
    Download {
        query: String,
        #[arg(short, long)]
        pages: Option<u32>,
        #[arg(short, long)]
        folder: Option<PathBuf>,
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Build a slideshow cut to the beats of an audio track
    Slideshow {
        #[arg(short, long)]
        audio: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Known tempo; estimated when omitted
        #[arg(long)]
        bpm: Option<f64>,
        #[arg(long, value_enum)]
        cut_on: Option<CutOn>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        no_banner: bool,
        #[arg(long)]
        no_zoom: bool,
        /// Write the scheduled timeline as JSON
        #[arg(long)]
        plan_out: Option<PathBuf>,
        /// Plan only, do not render
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CutOn {
    Onsets,
    Tempo,
}

impl From<CutOn> for BeatSource {
    fn from(value: CutOn) -> Self {
        match value {
            CutOn::Onsets => BeatSource::Onsets,
            CutOn::Tempo => BeatSource::Tempo,
        }
    }
}

fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Query cannot be empty");
    }
    Ok(())
}

fn validate_pages(pages: u32) -> Result<()> {
    if pages == 0 {
        bail!("Pages must be a positive integer");
    }
    Ok(())
}

async fn search_cmd(cfg: &Config, query: &str, pages: u32) -> Result<i32> {
    validate_query(query)?;
    validate_pages(pages)?;
    let searcher = ImageSearcher::new(SerpApiClient::new(cfg.require_api_key()?)?);
    let results = searcher.search_pages(query, pages).await;
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }
    Ok(if results.is_empty() { 1 } else { 0 })
}

async fn download_cmd(
    cfg: &Config,
    query: &str,
    pages: u32,
    folder: PathBuf,
    workers: usize,
) -> Result<i32> {
    validate_query(query)?;
    validate_pages(pages)?;
    if folder.as_os_str().is_empty() {
        bail!("Download folder cannot be empty");
    }
    if workers == 0 {
        bail!("Workers must be a positive integer");
    }

    let searcher = ImageSearcher::new(SerpApiClient::new(cfg.require_api_key()?)?);
    let results = searcher.search_pages(query, pages).await;
    if results.is_empty() {
        println!("No images found.");
        return Ok(1);
    }

    let downloader = ImageDownloader::new(DownloadOptions {
        folder,
        max_filename_length: cfg.download.max_filename_length,
        max_workers: workers,
    })
    .await?;
    let report = downloader.download_images(results).await;
    println!(
        "Download complete! Successfully downloaded {} images.",
        report.downloaded()
    );
    Ok(if report.downloaded() > 0 { 0 } else { 1 })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    init::ensure_directories().await?;
    let mut cfg = Config::load(&cli.config).await?;

    let code = match cli.command {
        Commands::Search { query, pages } => {
            let pages = pages.unwrap_or(cfg.download.pages);
            search_cmd(&cfg, &query, pages).await?
        }
        Commands::Download {
            query,
            pages,
            folder,
            workers,
        } => {
            let pages = pages.unwrap_or(cfg.download.pages);
            let folder = folder.unwrap_or_else(|| cfg.download.folder.clone());
            let workers = workers.unwrap_or(cfg.download.max_workers);
            download_cmd(&cfg, &query, pages, folder, workers).await?
        }
        Commands::Slideshow {
            audio,
            output,
            bpm,
            cut_on,
            seed,
            no_banner,
            no_zoom,
            plan_out,
            dry_run,
        } => {
            let s = &mut cfg.slideshow;
            if let Some(audio) = audio {
                s.audio_path = audio;
            }
            if let Some(output) = output {
                s.output = output;
            }
            if bpm.is_some() {
                s.bpm = bpm;
            }
            if let Some(cut_on) = cut_on {
                s.beat_source = cut_on.into();
            }
            if seed.is_some() {
                s.seed = seed;
            }
            if plan_out.is_some() {
                s.plan_out = plan_out;
            }
            s.banner_on &= !no_banner;
            s.zoom_effect &= !no_zoom;
            s.dry_run |= dry_run;
            cfg.validate()?;

            init::ensure_config_directories(&cfg).await?;
            if !cfg.slideshow.dry_run && !init::check_ffmpeg().await {
                bail!("FFmpeg not found in PATH. Please install FFmpeg.");
            }
            let summary = run_slideshow(&cfg.slideshow).await?;
            match summary.output {
                Some(path) => println!("Wrote {}", path.display()),
                None => println!(
                    "Planned {} shots over {:.2}s",
                    summary.plan.timeline.shot_count(),
                    summary.plan.timeline.duration
                ),
            }
            0
        }
    };

    std::process::exit(code);
}
