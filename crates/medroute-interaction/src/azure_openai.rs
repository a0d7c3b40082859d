//! Azure OpenAI clients: chat completions and embeddings.
//!
//! Configuration priority: ~/.config/medroute/secret.json > environment variables

use crate::config::{load_secret_config, required};
use crate::http::{map_http_error, map_request_error, parse_retry_after};
use async_trait::async_trait;
use medroute_core::capability::{
    ChatMessage, Embedder, GenerationConfig, GenerationError, Generator,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "2024-06-01";
const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(15);

pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const ENV_CHAT_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const ENV_EMBEDDING_DEPLOYMENT: &str = "AZURE_OPENAI_EMBEDDING_DEPLOYMENT";

/// Connection settings shared by both clients.
#[derive(Debug, Clone)]
struct Connection {
    endpoint: String,
    api_key: String,
    api_version: String,
    deployment: String,
}

impl Connection {
    fn url(&self, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            operation,
            self.api_version
        )
    }

    /// secret.json first, then `lookup` (environment variables in production).
    fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        deployment_var: &str,
        from_secret: impl Fn(&crate::config::AzureOpenAiSecret) -> Option<String>,
    ) -> Result<Self, String> {
        if let Some(openai) = load_secret_config().ok().and_then(|s| s.azure_openai) {
            if let Some(deployment) = from_secret(&openai) {
                return Ok(Self {
                    endpoint: openai.endpoint,
                    api_key: openai.api_key,
                    api_version: openai
                        .api_version
                        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                    deployment,
                });
            }
        }
        Self::from_lookup(lookup, deployment_var)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, deployment_var: &str) -> Result<Self, String> {
        Ok(Self {
            endpoint: required(&lookup, ENV_ENDPOINT)?,
            api_key: required(&lookup, ENV_API_KEY)?,
            api_version: lookup(ENV_API_VERSION).unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            deployment: required(&lookup, deployment_var)?,
        })
    }
}

/// Chat-completions client implementing [`Generator`].
#[derive(Clone)]
pub struct AzureOpenAiChat {
    client: Client,
    connection: Connection,
    timeout: Duration,
}

impl AzureOpenAiChat {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            connection: Connection {
                endpoint: endpoint.into(),
                api_key: api_key.into(),
                api_version: DEFAULT_API_VERSION.to_string(),
                deployment: deployment.into(),
            },
            timeout: DEFAULT_CHAT_TIMEOUT,
        }
    }

    /// Loads configuration from ~/.config/medroute/secret.json or environment variables
    /// (`AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_DEPLOYMENT`,
    /// optional `AZURE_OPENAI_API_VERSION`).
    pub fn try_from_env() -> Result<Self, String> {
        let connection = Connection::resolve(
            |name| env::var(name).ok(),
            ENV_CHAT_DEPLOYMENT,
            |secret| secret.chat_deployment.clone(),
        )?;
        Ok(Self::from_connection(connection))
    }

    /// Builds a client from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        Ok(Self::from_connection(Connection::from_lookup(
            lookup,
            ENV_CHAT_DEPLOYMENT,
        )?))
    }

    fn from_connection(connection: Connection) -> Self {
        Self {
            client: Client::new(),
            connection,
            timeout: DEFAULT_CHAT_TIMEOUT,
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.connection.api_version = api_version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn completions_url(&self) -> String {
        self.connection.url("chat/completions")
    }

    async fn send_request(&self, body: &ChatCompletionRequest<'_>) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.completions_url())
            .timeout(self.timeout)
            .header("api-key", &self.connection.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| map_request_error(err, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            GenerationError::Unavailable(format!("Failed to parse chat completion: {err}"))
        })?;

        extract_text_response(parsed)
    }
}

#[async_trait]
impl Generator for AzureOpenAiChat {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: GenerationConfig,
    ) -> Result<String, GenerationError> {
        let body = ChatCompletionRequest {
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };
        tracing::debug!(
            deployment = %self.connection.deployment,
            messages = messages.len(),
            max_tokens = config.max_tokens,
            "Sending chat completion"
        );
        self.send_request(&body).await
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_text_response(response: ChatCompletionResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| {
            GenerationError::Unavailable("chat completion returned no message content".into())
        })
}

/// Embeddings client implementing [`Embedder`].
///
/// Failures are logged and reported as `None`.
#[derive(Clone)]
pub struct AzureOpenAiEmbedder {
    client: Client,
    connection: Connection,
    timeout: Duration,
}

impl AzureOpenAiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            connection: Connection {
                endpoint: endpoint.into(),
                api_key: api_key.into(),
                api_version: DEFAULT_API_VERSION.to_string(),
                deployment: deployment.into(),
            },
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    /// Same sources as [`AzureOpenAiChat::try_from_env`], using
    /// `AZURE_OPENAI_EMBEDDING_DEPLOYMENT` for the deployment.
    pub fn try_from_env() -> Result<Self, String> {
        let connection = Connection::resolve(
            |name| env::var(name).ok(),
            ENV_EMBEDDING_DEPLOYMENT,
            |secret| secret.embedding_deployment.clone(),
        )?;
        Ok(Self {
            client: Client::new(),
            connection,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn embeddings_url(&self) -> String {
        self.connection.url("embeddings")
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        let response = self
            .client
            .post(self.embeddings_url())
            .timeout(self.timeout)
            .header("api-key", &self.connection.api_key)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(|err| map_request_error(err, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|err| {
            GenerationError::Unavailable(format!("Failed to parse embedding response: {err}"))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GenerationError::Unavailable("embedding response had no data".into()))
    }
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.request_embedding(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(deployment = %self.connection.deployment, "Embedding failed: {}", e);
                None
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
