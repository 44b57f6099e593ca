//! Image search: typed records, the paging searcher and the SerpAPI backend.

mod result;
pub mod serpapi;

pub use result::ImageResult;
pub use serpapi::SerpApiClient;

use crate::{logi, logw};
use anyhow::Result;
use async_trait::async_trait;

/// A paged image-search backend.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_page(&self, query: &str, page: u32) -> Result<Vec<ImageResult>>;
}

pub struct ImageSearcher<S: ImageSource> {
    source: S,
}

impl<S: ImageSource> ImageSearcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// One page. Failures are logged and read as an empty page.
    pub async fn search(&self, query: &str, page: u32) -> Vec<ImageResult> {
        match self.source.fetch_page(query, page).await {
            Ok(results) => results,
            Err(err) => {
                logw(format!("Error fetching page {}: {:#}", page, err));
                Vec::new()
            }
        }
    }

    /// Pages `0..max_pages`, stopping at the first empty one.
    pub async fn search_pages(&self, query: &str, max_pages: u32) -> Vec<ImageResult> {
        let mut all = Vec::new();
        for page in 0..max_pages {
            logi(format!("Fetching page {}...", page));
            let images = self.search(query, page).await;
            if images.is_empty() {
                break;
            }
            all.extend(images);
        }
        all
    }
}
