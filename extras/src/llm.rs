//! Chat model backends.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const COHERE_API_KEY: &str = "COHERE_API_KEY";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_COHERE_MODEL: &str = "command-r";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A language model that continues a conversation.
#[async_trait(?Send)]
pub trait ChatModel {
    /// Returns the model's reply to `messages`.
    async fn chat(&self, messages: &[Message]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    #[value(name = "openai")]
    OpenAi,
    Cohere,
}

/// Which model to use and how to reach it.
#[derive(Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &"***REDACTED***")
            .field("model", &self.model)
            .finish()
    }
}

impl LlmConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let model = match provider {
            Provider::OpenAi => DEFAULT_OPENAI_MODEL,
            Provider::Cohere => DEFAULT_COHERE_MODEL,
        };
        Self {
            provider,
            api_key: api_key.into(),
            model: model.to_string(),
        }
    }

    /// Reads the provider's API key from the environment and picks its
    /// default model.
    pub fn from_env(provider: Provider) -> Result<Self> {
        let var = match provider {
            Provider::OpenAi => OPENAI_API_KEY,
            Provider::Cohere => COHERE_API_KEY,
        };
        let api_key = std::env::var(var).with_context(|| format!("{var} env variable not set"))?;
        Ok(Self::new(provider, api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn chat_model(&self) -> Box<dyn ChatModel> {
        match self.provider {
            Provider::OpenAi => Box::new(OpenAiChat::new(&self.api_key, &self.model)),
            Provider::Cohere => Box::new(CohereChat::new(&self.api_key, &self.model)),
        }
    }
}

#[derive(Debug)]
pub struct OpenAiChat {
    key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiChat {
    pub fn new(key: &str, model: &str) -> Self {
        Self {
            key: key.to_string(),
            model: model.to_string(),
            base_url: "https://api.openai.com".to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait(?Send)]
impl ChatModel for OpenAiChat {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let mut resp: Value = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.key)
            .json(&json!({
                "model": self.model,
                "temperature": 0.0,
                "messages": messages,
            }))
            .send()
            .await
            .context("failed to send api request to OpenAi for chat completion")?
            .json()
            .await?;

        if resp.get("error").is_some() {
            bail!("OpenAi chat request failed: {}", resp["error"]);
        }

        match resp["choices"][0]["message"]["content"].take() {
            Value::String(content) => Ok(content),
            other => bail!("OpenAi chat response has no content: {other}"),
        }
    }
}

#[derive(Debug)]
pub struct CohereChat {
    key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl CohereChat {
    pub fn new(key: &str, model: &str) -> Self {
        Self {
            key: key.to_string(),
            model: model.to_string(),
            base_url: "https://api.cohere.com".to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Splits a conversation into Cohere's preamble, history and final message.
fn cohere_request(model: &str, messages: &[Message]) -> Result<Value> {
    let Some((last, earlier)) = messages.split_last() else {
        bail!("cannot chat without messages");
    };
    let preamble: Vec<&str> = earlier
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let history: Vec<Value> = earlier
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = if m.role == Role::User { "USER" } else { "CHATBOT" };
            json!({"role": role, "message": m.content})
        })
        .collect();

    let mut request = json!({
        "model": model,
        "temperature": 0.0,
        "message": last.content,
        "chat_history": history,
    });
    if !preamble.is_empty() {
        request["preamble"] = json!(preamble.join("\n\n"));
    }
    Ok(request)
}

#[async_trait(?Send)]
impl ChatModel for CohereChat {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/chat", self.base_url))
            .bearer_auth(&self.key)
            .json(&cohere_request(&self.model, messages)?)
            .send()
            .await
            .context("failed to send api request to Cohere for chat")?;

        let status = response.status();
        let mut resp: Value = response.json().await?;
        if !status.is_success() {
            bail!("Cohere chat request failed ({status}): {}", resp["message"]);
        }

        match resp["text"].take() {
            Value::String(text) => Ok(text),
            other => bail!("Cohere chat response has no text: {other}"),
        }
    }
}
