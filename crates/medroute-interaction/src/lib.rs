//! HTTP clients for the generation, retrieval and embedding capabilities.

pub mod azure_openai;
pub mod azure_search;
pub mod config;
mod http;

pub use azure_openai::{AzureOpenAiChat, AzureOpenAiEmbedder};
pub use azure_search::AzureSearchRetriever;
