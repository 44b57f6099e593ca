use super::{ImageResult, ImageSource};
use crate::error::BeatreelError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub const SERPAPI_BASE: &str = "https://serpapi.com";
const ENGINE: &str = "google_images";

pub struct SerpApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl SerpApiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self::with_client(client, api_key))
    }

    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: SERPAPI_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ImageSource for SerpApiClient {
    async fn fetch_page(&self, query: &str, page: u32) -> Result<Vec<ImageResult>> {
        let url = format!("{}/search.json", self.base_url);
        let page = page.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("engine", ENGINE),
                ("ijn", page.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("SerpAPI request failed")?;

        let status = resp.status();
        let raw = resp.text().await.context("SerpAPI response read failed")?;
        if !status.is_success() {
            // The body usually carries an {"error": ...} explaining the status.
            if let Err(err) = parse_images_response(&raw) {
                return Err(err.into());
            }
            return Err(BeatreelError::Api(format!("HTTP {}", status.as_u16())).into());
        }

        Ok(parse_images_response(&raw)?)
    }
}

/// Extracts `images_results`; an absent array is an empty page, an `error` field is a failure.
pub fn parse_images_response(raw: &str) -> Result<Vec<ImageResult>, BeatreelError> {
    let root: Value = serde_json::from_str(raw)
        .map_err(|e| BeatreelError::Api(format!("invalid JSON: {e}")))?;

    if let Some(msg) = root.get("error").and_then(Value::as_str) {
        return Err(BeatreelError::Api(msg.to_string()));
    }

    Ok(root
        .get("images_results")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(ImageResult::from_value).collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_in_order() {
        let raw = r#"{
            "search_metadata": {"status": "Success"},
            "images_results": [
                {"position": 1, "original": "https://a.test/1.png", "title": "one"},
                {"position": 2, "title": "no original"}
            ]
        }"#;
        let results = parse_images_response(raw).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://a.test/1.png");
        assert!(!results[1].is_valid());
    }

    #[test]
    fn absent_array_is_empty_page() {
        assert!(parse_images_response(r#"{"search_metadata":{}}"#).unwrap().is_empty());
    }

    #[test]
    fn error_field_is_surfaced() {
        let err = parse_images_response(r#"{"error":"Invalid API key."}"#).unwrap_err();
        assert!(matches!(err, BeatreelError::Api(ref m) if m == "Invalid API key."));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = SerpApiClient::with_client(Client::new(), "k").with_base_url("http://127.0.0.1:1/");
        assert_eq!(c.base_url, "http://127.0.0.1:1");
    }
}
