use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the API's `images_results` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub url: String,
    pub title: String,
    pub source: String,
    pub thumbnail: String,
    pub position: u64,
}

impl ImageResult {
    pub fn from_value(data: &Value) -> Self {
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            url: text("original"),
            title: text("title"),
            source: text("source"),
            thumbnail: text("thumbnail"),
            position: data.get("position").and_then(Value::as_u64).unwrap_or(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.url.is_empty()
    }
}
