use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{OccurrenceKey, SpeciesName, TaxonKey};
use crate::error::OccError;
use crate::query::OccurrenceFilters;

pub const DEFAULT_BASE_URL: &str = "https://api.gbif.org/v1";

/// Largest page the occurrence search endpoint serves.
pub const SEARCH_PAGE_SIZE: usize = 300;

/// One page of occurrence search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccurrencePage {
    pub keys: Vec<OccurrenceKey>,
    pub end_of_records: bool,
}

/// Remote biodiversity API. Status failures come back as
/// [`OccError::GbifStatus`], unreadable bodies as [`OccError::GbifDecode`];
/// [`OccError::GbifHttp`] means the request could not be completed at all.
pub trait GbifClient: Send + Sync {
    /// Backbone lookup; `Ok(None)` when the name has no usable match.
    fn match_species(&self, name: &SpeciesName) -> Result<Option<TaxonKey>, OccError>;
    fn search_occurrences(
        &self,
        taxon_key: TaxonKey,
        filters: &OccurrenceFilters,
        offset: usize,
        limit: usize,
    ) -> Result<OccurrencePage, OccError>;
    fn fetch_occurrence(&self, key: OccurrenceKey) -> Result<Value, OccError>;
}

#[derive(Clone)]
pub struct GbifHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesMatch {
    usage_key: Option<u64>,
    match_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    end_of_records: bool,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    key: Option<u64>,
}

impl GbifHttpClient {
    pub fn new() -> Result<Self, OccError> {
        let base_url = std::env::var("GBIF_API_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, OccError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gbif-occ/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| OccError::GbifHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| OccError::GbifHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, OccError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GBIF request failed".to_string());
        Err(OccError::GbifStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, OccError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, delay_ms = delay, "retrying GBIF request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(error = %err, attempt, delay_ms = delay, "retrying GBIF request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(OccError::GbifHttp(err.to_string()));
                }
            }
        }
    }

    fn get_json<T, F>(&self, make_req: F) -> Result<T, OccError>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let response = self.send_with_retries(make_req)?;
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| OccError::GbifDecode(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| OccError::GbifDecode(err.to_string()))
    }
}

impl GbifClient for GbifHttpClient {
    fn match_species(&self, name: &SpeciesName) -> Result<Option<TaxonKey>, OccError> {
        let url = format!("{}/species/match", self.base_url);
        debug!(species = %name, "species match request");
        let matched: SpeciesMatch = self.get_json(|| {
            self.client
                .get(&url)
                .query(&[("name", name.as_str()), ("strict", "true")])
        })?;
        Ok(usable_match(&matched).map(TaxonKey::new))
    }

    fn search_occurrences(
        &self,
        taxon_key: TaxonKey,
        filters: &OccurrenceFilters,
        offset: usize,
        limit: usize,
    ) -> Result<OccurrencePage, OccError> {
        let url = format!("{}/occurrence/search", self.base_url);
        let params = filters.query_params();
        debug!(%taxon_key, offset, limit, "occurrence search request");
        let page: SearchResponse = self.get_json(|| {
            self.client
                .get(&url)
                .query(&[("taxonKey", taxon_key.get())])
                .query(&params)
                .query(&[("offset", offset), ("limit", limit)])
        })?;
        Ok(OccurrencePage {
            keys: page
                .results
                .iter()
                .filter_map(|hit| hit.key)
                .map(OccurrenceKey::new)
                .collect(),
            end_of_records: page.end_of_records,
        })
    }

    fn fetch_occurrence(&self, key: OccurrenceKey) -> Result<Value, OccError> {
        let url = format!("{}/occurrence/{}", self.base_url, key);
        self.get_json(|| self.client.get(&url))
    }
}

fn usable_match(matched: &SpeciesMatch) -> Option<u64> {
    if matched.match_type.as_deref() == Some("NONE") {
        return None;
    }
    matched.usage_key
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
