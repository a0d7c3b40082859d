//! Credential loading for the HTTP clients.
//!
//! Supports reading secrets from `~/.config/medroute/secret.json`, with
//! environment variables as the fallback.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `secret.json`; each service section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub azure_openai: Option<AzureOpenAiSecret>,
    #[serde(default)]
    pub azure_search: Option<AzureSearchSecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureOpenAiSecret {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub chat_deployment: Option<String>,
    #[serde(default)]
    pub embedding_deployment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureSearchSecret {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Loads ~/.config/medroute/secret.json
pub fn load_secret_config() -> Result<SecretConfig, String> {
    load_secret_config_from(&secrets_path()?)
}

pub fn load_secret_config_from(path: &Path) -> Result<SecretConfig, String> {
    if !path.exists() {
        return Err(format!(
            "No secrets file at {}",
            path.display()
        ));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Could not read secrets file {}: {}",
            path.display(),
            e
        )
    })?;

    serde_json::from_str(&content).map_err(|e| {
        format!(
            "Secrets file {} is not valid JSON: {}",
            path.display(),
            e
        )
    })
}

/// `~/.config/medroute/secret.json`
fn secrets_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "no home directory for secret.json".to_string())?;
    Ok(home.join(".config").join("medroute").join("secret.json"))
}

/// Reads a required variable through `lookup`, rejecting blank values.
pub(crate) fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<String, String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{} not found in secret.json or environment variables", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_secret_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            r#"{"azure_openai": {"endpoint": "https://oai.example", "api_key": "k", "chat_deployment": "gpt-4o"}}"#,
        )
        .unwrap();

        let config = load_secret_config_from(&path).unwrap();
        let openai = config.azure_openai.unwrap();
        assert_eq!(openai.chat_deployment.as_deref(), Some("gpt-4o"));
        assert!(openai.api_version.is_none());
        assert!(config.azure_search.is_none());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_secret_config_from(&dir.path().join("secret.json")).unwrap_err();
        assert!(err.starts_with("No secrets file"));
    }

    #[test]
    fn test_required_rejects_blank() {
        let lookup = |name: &str| match name {
            "SET" => Some("value".to_string()),
            "BLANK" => Some("  ".to_string()),
            _ => None,
        };
        assert_eq!(required(&lookup, "SET").unwrap(), "value");
        assert!(required(&lookup, "BLANK").is_err());
        assert!(required(&lookup, "MISSING").is_err());
    }
}
