//! Azure AI Search client implementing hybrid (keyword + vector) retrieval.
//!
//! Configuration priority: ~/.config/medroute/secret.json > environment variables

use crate::config::{load_secret_config, required};
use crate::http::error_message;
use async_trait::async_trait;
use medroute_core::capability::{Retriever, SearchHit};
use medroute_core::error::{MedrouteError, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "2024-07-01";
const DEFAULT_VECTOR_FIELD: &str = "vector";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_ENDPOINT: &str = "AZURE_SEARCH_ENDPOINT";
pub const ENV_API_KEY: &str = "AZURE_SEARCH_API_KEY";
pub const ENV_API_VERSION: &str = "AZURE_SEARCH_API_VERSION";
pub const ENV_VECTOR_FIELD: &str = "AZURE_SEARCH_VECTOR_FIELD";

/// Hybrid search over Azure AI Search indexes.
///
/// The vector part uses the index's integrated vectorizer (a `text` vector
/// query), so no embedding call is made client-side.
#[derive(Clone)]
pub struct AzureSearchRetriever {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    vector_field: String,
    timeout: Duration,
}

impl AzureSearchRetriever {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Loads configuration from ~/.config/medroute/secret.json or environment variables
    /// (`AZURE_SEARCH_ENDPOINT`, `AZURE_SEARCH_API_KEY`, optional
    /// `AZURE_SEARCH_API_VERSION` and `AZURE_SEARCH_VECTOR_FIELD`).
    pub fn try_from_env() -> std::result::Result<Self, String> {
        let vector_field = env::var(ENV_VECTOR_FIELD).ok();
        if let Some(search) = load_secret_config().ok().and_then(|s| s.azure_search) {
            let mut retriever = Self::new(search.endpoint, search.api_key);
            if let Some(version) = search.api_version {
                retriever.api_version = version;
            }
            if let Some(field) = vector_field {
                retriever.vector_field = field;
            }
            return Ok(retriever);
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a client from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, String> {
        let mut retriever = Self::new(
            required(&lookup, ENV_ENDPOINT)?,
            required(&lookup, ENV_API_KEY)?,
        );
        if let Some(version) = lookup(ENV_API_VERSION) {
            retriever.api_version = version;
        }
        if let Some(field) = lookup(ENV_VECTOR_FIELD).filter(|f| !f.trim().is_empty()) {
            retriever.vector_field = field;
        }
        Ok(retriever)
    }

    pub fn with_vector_field(mut self, field: impl Into<String>) -> Self {
        self.vector_field = field.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn search_url(&self, index: &str) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint.trim_end_matches('/'),
            index,
            self.api_version
        )
    }

    fn build_request<'a>(&'a self, query: &'a str, top_k: usize) -> SearchRequest<'a> {
        SearchRequest {
            search: query,
            top: top_k,
            vector_queries: vec![VectorQuery {
                kind: "text",
                text: query,
                fields: &self.vector_field,
                k: top_k,
            }],
        }
    }
}

#[async_trait]
impl Retriever for AzureSearchRetriever {
    async fn search(&self, index: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(self.search_url(index))
            .timeout(self.timeout)
            .header("api-key", &self.api_key)
            .json(&self.build_request(query, top_k))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    MedrouteError::timeout("search", self.timeout)
                } else {
                    MedrouteError::retrieval(format!("search request failed: {err}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MedrouteError::retrieval(error_message(status, &body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| MedrouteError::retrieval(format!("Failed to parse search response: {err}")))?;

        let hits = parse_hits(&body, &self.vector_field);
        tracing::debug!(index, hits = hits.len(), "Search completed");
        Ok(hits)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    search: &'a str,
    top: usize,
    vector_queries: Vec<VectorQuery<'a>>,
}

#[derive(Serialize)]
struct VectorQuery<'a> {
    kind: &'static str,
    text: &'a str,
    fields: &'a str,
    k: usize,
}

/// Flattens `value[]` documents into string fields.
///
/// `@search.*` annotations and the vector field are dropped; numbers and
/// booleans are stringified; nulls are skipped.
fn parse_hits(body: &Value, vector_field: &str) -> Vec<SearchHit> {
    let Some(docs) = body.get("value").and_then(Value::as_array) else {
        return Vec::new();
    };

    docs.iter()
        .filter_map(Value::as_object)
        .map(|doc| {
            let score = doc
                .get("@search.score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let document: HashMap<String, String> = doc
                .iter()
                .filter(|(name, _)| !name.starts_with('@') && name.as_str() != vector_field)
                .filter_map(|(name, value)| {
                    let text = match value {
                        Value::Null => return None,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some((name.clone(), text))
                })
                .collect();
            SearchHit { document, score }
        })
        .collect()
}
