//! Chat model provider abstraction and implementations.
//!
//! Defines the [`ChatModel`] trait and concrete providers:
//! - **[`OpenAiChat`]** — calls the OpenAI chat completions API.
//! - **[`OllamaChat`]** — calls a local Ollama instance's `/api/chat` endpoint.
//! - **[`EchoChat`]** — replies with the prompt unchanged; development and test stub.
//!
//! A handle owns the accumulated conversation and sends it with every
//! request. Failed calls leave the conversation unchanged and are never
//! retried — the session layer converts failures into visible replies.
//! Remote providers apply the configured request timeout.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;

/// One turn of the conversation as sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

/// A live conversation with an external chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one prompt within the ongoing conversation and return the reply.
    async fn send(&mut self, prompt: &str) -> Result<String>;

    /// Provider or model identifier, for display.
    fn name(&self) -> &str;
}

/// Instantiate the provider selected in config. Conversations start empty.
///
/// # Errors
///
/// - `openai`: the API key environment variable is not set, or no model
///   name is configured.
/// - unknown provider names.
pub fn create_model(config: &ModelConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        "echo" => Ok(Box::new(EchoChat::default())),
        other => bail!(
            "Unknown model provider: '{}'. Must be openai, ollama, or echo.",
            other
        ),
    }
}

// ============ OpenAI provider ============

/// Conversation handle backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiChat {
    model: String,
    api_key: String,
    client: reqwest::Client,
    turns: Vec<ChatTurn>,
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("model.model required for openai provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            api_key,
            client,
            turns: Vec::new(),
        })
    }

    async fn call(&self, body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_reply(&json)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        self.turns.push(ChatTurn::user(prompt));
        let body = serde_json::json!({
            "model": self.model,
            "messages": self.turns,
        });

        match self.call(&body).await {
            Ok(reply) => {
                self.turns.push(ChatTurn::assistant(&reply));
                Ok(reply)
            }
            Err(e) => {
                // Failed calls leave the conversation unchanged
                self.turns.pop();
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_openai_reply(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

// ============ Ollama provider ============

/// Conversation handle backed by a local Ollama instance.
pub struct OllamaChat {
    model: String,
    url: String,
    client: reqwest::Client,
    turns: Vec<ChatTurn>,
}

impl OllamaChat {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("model.model required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url,
            client,
            turns: Vec::new(),
        })
    }

    async fn call(&self, body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_reply(&json)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        self.turns.push(ChatTurn::user(prompt));
        let body = serde_json::json!({
            "model": self.model,
            "messages": self.turns,
            "stream": false,
        });

        match self.call(&body).await {
            Ok(reply) => {
                self.turns.push(ChatTurn::assistant(&reply));
                Ok(reply)
            }
            Err(e) => {
                self.turns.pop();
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Extract `message.content` from an Ollama `/api/chat` response.
fn parse_ollama_reply(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing message.content"))
}

// ============ Echo provider ============

/// Replies with the prompt unchanged. Used in tests and as a development
/// stand-in when no hosted model is available. Keeps no conversation
/// state — the reply depends only on the prompt.
#[derive(Default)]
pub struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    async fn send(&mut self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn echo_config() -> ModelConfig {
        ModelConfig {
            provider: "echo".to_string(),
            model: None,
            url: None,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_create_model_unknown_provider() {
        let mut config = echo_config();
        config.provider = "gemini".to_string();
        assert!(create_model(&config).is_err());
    }

    #[tokio::test]
    async fn test_echo_returns_prompt() {
        let mut model = create_model(&echo_config()).unwrap();
        assert_eq!(model.send("hello there").await.unwrap(), "hello there");
        assert_eq!(model.name(), "echo");
    }

    #[test]
    fn test_parse_openai_reply() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        });
        assert_eq!(parse_openai_reply(&json).unwrap(), "hi");

        let bad = serde_json::json!({"choices": []});
        assert!(parse_openai_reply(&bad).is_err());
    }

    #[test]
    fn test_parse_ollama_reply() {
        let json = serde_json::json!({
            "message": {"role": "assistant", "content": "hi"}
        });
        assert_eq!(parse_ollama_reply(&json).unwrap(), "hi");
        assert!(parse_ollama_reply(&serde_json::json!({})).is_err());
    }
}
