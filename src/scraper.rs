use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::RawRecord;

/// SerpAPI returns Google Maps results in pages of 20.
const SERPAPI_PAGE_SIZE: usize = 20;
/// Website bodies past this size are truncated before extraction.
pub const MAX_PAGE_BYTES: usize = 512 * 1024;

/// Search collaborator producing raw business records.
#[async_trait]
pub trait LeadSource: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawRecord>, AppError>;
}

/// Fetches a lead's website for the second extraction pass.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct MapsSearchResponse {
    #[serde(default)]
    local_results: Vec<MapsLocalResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MapsLocalResult {
    title: Option<String>,
    address: Option<String>,
    phone: Option<String>,
    website: Option<String>,
    place_id: Option<String>,
    #[serde(rename = "type")]
    category: Option<String>,
    rating: Option<f64>,
    reviews: Option<u64>,
    description: Option<String>,
    snippet: Option<String>,
}

impl MapsLocalResult {
    fn into_record(self) -> Option<RawRecord> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let raw_snippet = [self.description, self.snippet]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");
        let source_url = self
            .place_id
            .as_ref()
            .map(|id| format!("https://www.google.com/maps/place/?q=place_id:{}", id));

        Some(RawRecord {
            title,
            address: self.address,
            phone: self.phone,
            website: self.website,
            raw_snippet,
            source_url,
            place_id: self.place_id,
            category: self.category,
            rating: self.rating,
            reviews: self.reviews,
        })
    }
}

/// Google Maps search through SerpAPI.
#[derive(Clone)]
pub struct SerpApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::Configuration(format!("Failed to create SerpAPI client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(&config.serpapi_base_url, &config.serpapi_key, config.http_timeout())
    }

    async fn fetch_page(&self, query: &str, start: usize) -> Result<Vec<RawRecord>, AppError> {
        let url = format!("{}/search.json", self.base_url);
        let start = start.to_string();
        tracing::info!("Searching Google Maps via SerpAPI: '{}' (start={})", query, start);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("engine", "google_maps"),
                ("type", "search"),
                ("q", query),
                ("start", start.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::from_status("SerpAPI", status, &error_text));
        }

        let body: MapsSearchResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse SerpAPI response: {}", e))
        })?;

        if let Some(error) = body.error {
            // "no results" is reported as an error string with a 200 status
            if error.to_lowercase().contains("hasn't returned any results") {
                return Ok(Vec::new());
            }
            return Err(AppError::ExternalApiError(format!("SerpAPI error: {}", error)));
        }

        Ok(body
            .local_results
            .into_iter()
            .filter_map(MapsLocalResult::into_record)
            .collect())
    }
}

#[async_trait]
impl LeadSource for SerpApiClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawRecord>, AppError> {
        let mut records = Vec::new();
        let mut start = 0;

        while records.len() < max_results {
            let page = self.fetch_page(query, start).await?;
            let page_len = page.len();
            records.extend(page);

            if page_len < SERPAPI_PAGE_SIZE {
                break;
            }
            start += SERPAPI_PAGE_SIZE;
        }

        records.truncate(max_results);
        tracing::info!("SerpAPI returned {} records for '{}'", records.len(), query);
        Ok(records)
    }
}

/// Plain GET fetcher with a byte cap.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; LeadgenBot/1.0)")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| {
                AppError::Configuration(format!("Failed to create page fetcher: {}", e))
            })?;

        Ok(Self {
            client,
            max_bytes: MAX_PAGE_BYTES,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };
        let parsed = url::Url::parse(&url)
            .map_err(|e| AppError::BadRequest(format!("Invalid website URL {}: {}", url, e)))?;

        let mut response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::from_status("Website", status, ""));
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_bytes - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
