use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::info;

use crate::error::InvoiceError;
use crate::tables::TableIdMode;

pub const DEFAULT_CONFIG_PATH: &str = ".config/invoice_chat.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "document_intelligence")]
    pub analysis: AnalysisConfig,
    pub llm: LlmSection,
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_version: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model_id: "prebuilt-invoice".to_string(),
            api_version: "2024-11-30".to_string(),
            poll_interval_ms: 1000,
            max_polls: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Azure OpenAI deployment.
    #[default]
    Azure,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    Remote,
    /// Local Ollama server through its OpenAI-compatible API.
    Ollama,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub azure: AzureOpenAiConfig,
    pub remote: EndpointConfig,
    pub ollama: EndpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl Default for AzureOpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: "gpt-35-turbo".to_string(),
            api_version: "2024-02-01".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub id_mode: TableIdMode,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InvoiceError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, InvoiceError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file if it exists (defaults otherwise), then apply environment overrides.
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, InvoiceError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            info!(path = %path.display(), "Loading config");
            Self::load(path)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        cfg.apply_env_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AZURE_DOC_ENDPOINT") {
            self.analysis.endpoint = v;
        }
        if let Some(v) = lookup("AZURE_OPENAI_ENDPOINT") {
            self.llm.azure.endpoint = v;
        }
        if let Some(v) = lookup("AZURE_OPENAI_DEPLOYMENT") {
            self.llm.azure.deployment = v;
        }
    }
}

/// Read a credential from the environment.
pub fn credential(var: &'static str) -> Result<String, InvoiceError> {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(InvoiceError::MissingCredential(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.analysis.model_id, "prebuilt-invoice");
        assert_eq!(cfg.analysis.max_polls, 120);
        assert_eq!(cfg.llm.backend, LlmBackend::Azure);
        assert_eq!(cfg.llm.azure.deployment, "gpt-35-turbo");
        assert_eq!(cfg.tables.id_mode, TableIdMode::Namespaced);
    }

    #[test]
    fn parses_sections() {
        let cfg = Config::parse(
            r#"
            [document_intelligence]
            endpoint = "https://docs.example.com"
            poll_interval_ms = 250

            [llm]
            backend = "ollama"

            [llm.ollama]
            base_url = "http://localhost:11434/v1"
            model = "qwen3:8b"

            [tables]
            id_mode = "legacy"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analysis.endpoint, "https://docs.example.com");
        assert_eq!(cfg.analysis.poll_interval_ms, 250);
        assert_eq!(cfg.analysis.api_version, "2024-11-30");
        assert_eq!(cfg.llm.backend, LlmBackend::Ollama);
        assert_eq!(cfg.llm.ollama.model, "qwen3:8b");
        assert_eq!(cfg.tables.id_mode, TableIdMode::Legacy);
    }

    #[test]
    fn env_overrides_endpoints() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|key| match key {
            "AZURE_DOC_ENDPOINT" => Some("https://di.example.com".to_string()),
            "AZURE_OPENAI_DEPLOYMENT" => Some("gpt-4o".to_string()),
            _ => None,
        });
        assert_eq!(cfg.analysis.endpoint, "https://di.example.com");
        assert_eq!(cfg.llm.azure.deployment, "gpt-4o");
        assert!(cfg.llm.azure.endpoint.is_empty());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Config::parse("[llm]\nbackend = \"carrier-pigeon\"").is_err());
    }
}
