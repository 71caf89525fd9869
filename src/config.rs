use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// How many recent matching turns ground a new prompt.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Cap on concatenated retrieved context, in characters.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_limit() -> i64 {
    5
}
fn default_max_context_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Chat provider: `openai`, `ollama`, or `echo`.
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if config.retrieval.max_context_chars == 0 {
        anyhow::bail!("retrieval.max_context_chars must be > 0");
    }

    // Validate model
    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }
    match config.model.provider.as_str() {
        "openai" | "ollama" => {
            if config.model.model.is_none() {
                anyhow::bail!(
                    "model.model must be specified when provider is '{}'",
                    config.model.provider
                );
            }
        }
        "echo" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be openai, ollama, or echo.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rchat.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let (_tmp, path) = write_config(
            r#"
            [db]
            path = "./data/rchat.sqlite"

            [model]
            provider = "echo"

            [server]
            bind = "127.0.0.1:7343"
            "#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.limit, 5);
        assert_eq!(config.retrieval.max_context_chars, 4000);
        assert_eq!(config.model.timeout_secs, 30);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let (_tmp, path) = write_config(
            r#"
            [db]
            path = "./data/rchat.sqlite"

            [model]
            provider = "gemini"

            [server]
            bind = "127.0.0.1:7343"
            "#,
        );
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("Unknown model provider"), "got: {}", err);
    }

    #[test]
    fn test_openai_requires_model_name() {
        let (_tmp, path) = write_config(
            r#"
            [db]
            path = "./data/rchat.sqlite"

            [model]
            provider = "openai"

            [server]
            bind = "127.0.0.1:7343"
            "#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let (_tmp, path) = write_config(
            r#"
            [db]
            path = "./data/rchat.sqlite"

            [retrieval]
            limit = 0

            [model]
            provider = "echo"

            [server]
            bind = "127.0.0.1:7343"
            "#,
        );
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("retrieval.limit"), "got: {}", err);
    }
}
