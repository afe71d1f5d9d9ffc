use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PlanoraError, Result};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RagConfig {
    pub embedding_model: Option<String>,
    pub chunk_size: Option<usize>,
    pub top_k: Option<usize>,
    /// Fixes the index dimension up front. Left empty, the first upload decides it.
    pub dimension: Option<usize>,
}

impl RagConfig {
    pub fn embedding_model(&self) -> &str {
        self.embedding_model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(DEFAULT_EMBEDDING_MODEL)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)
    }

    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(DEFAULT_TOP_K).max(1)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Browser origins allowed to call the API with credentials.
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub rag: Option<RagConfig>,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    pub sqlite_path: Option<String>,
}

impl Config {
    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            openai: Some(OpenAiConfig {
                api_key: None,
                model: Some(DEFAULT_CHAT_MODEL.to_string()),
                base_url: None,
            }),
            rag: Some(RagConfig {
                embedding_model: Some(DEFAULT_EMBEDDING_MODEL.to_string()),
                chunk_size: Some(DEFAULT_CHUNK_SIZE),
                top_k: Some(DEFAULT_TOP_K),
                dimension: None,
            }),
            server: Some(ServerConfig {
                host: Some("127.0.0.1".to_string()),
                port: Some(8000),
                cors_origins: Some(vec![DEFAULT_CORS_ORIGIN.to_string()]),
            }),
            sqlite_path: Some(db_path.to_string()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            PlanoraError::Config(format!(
                "failed to read config {}: {e}",
                path.to_string_lossy()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| PlanoraError::Config(e.to_string()))
    }

    /// Fills credentials that the file left out from the process environment.
    pub fn resolve_env(mut self) -> Self {
        let openai = self.openai.get_or_insert_with(OpenAiConfig::default);
        if openai.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                if !key.trim().is_empty() {
                    openai.api_key = Some(key.trim().to_string());
                }
            }
        }
        if openai.base_url.is_none() {
            if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
                if !url.trim().is_empty() {
                    openai.base_url = Some(url.trim().to_string());
                }
            }
        }
        self
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.server
            .as_ref()
            .and_then(|server| server.cors_origins.clone())
            .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()])
    }

    pub fn rag(&self) -> RagConfig {
        self.rag.clone().unwrap_or_default()
    }

    pub fn openai_api_key(&self) -> Result<String> {
        self.openai
            .as_ref()
            .and_then(|openai| openai.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                PlanoraError::Config(
                    "missing OpenAI api key (set openai.api_key or OPENAI_API_KEY)".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn convention_defaults_use_mini_model_and_500_char_chunks() {
        let config = Config::convention_defaults(":memory:");
        let openai = config.openai.as_ref().expect("openai section");
        assert_eq!(openai.model.as_deref(), Some("gpt-4o-mini"));
        let rag = config.rag();
        assert_eq!(rag.chunk_size(), 500);
        assert_eq!(rag.top_k(), 3);
        assert_eq!(rag.embedding_model(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.sqlite_path.as_deref(), Some(":memory:"));
    }

    #[test]
    fn partial_json_falls_back_to_rag_defaults() {
        let config: Config = serde_json::from_value(json!({
            "openai": {"api_key": "key", "model": null, "base_url": null},
            "sqlite_path": null
        }))
        .unwrap();
        let rag = config.rag();
        assert_eq!(rag.chunk_size(), 500);
        assert_eq!(rag.top_k(), 3);
        assert_eq!(config.openai_api_key().unwrap(), "key");
        assert_eq!(config.cors_origins(), vec!["http://localhost:5173".to_string()]);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config: Config = serde_json::from_value(json!({
            "openai": {"api_key": "  ", "model": null, "base_url": null},
            "sqlite_path": null
        }))
        .unwrap();
        let err = config.openai_api_key().unwrap_err();
        assert!(matches!(err, PlanoraError::Config(_)));
    }

    #[test]
    fn defaults_written_to_disk_load_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let config = Config::convention_defaults("planora.db");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sqlite_path.as_deref(), Some("planora.db"));
        assert_eq!(
            loaded.server.and_then(|server| server.port),
            Some(8000)
        );
    }

    #[test]
    fn server_section_can_replace_cors_origins() {
        let config: Config = serde_json::from_value(json!({
            "openai": null,
            "server": {"host": "0.0.0.0", "port": 9000, "cors_origins": ["https://planora.app"]},
            "sqlite_path": null
        }))
        .unwrap();
        assert_eq!(config.cors_origins(), vec!["https://planora.app".to_string()]);
    }
}
