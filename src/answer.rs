//! Turning retrieved context into an answer.
//!
//! | Config Value | Assembler |
//! |-------------|-----------|
//! | `"openai"` | [`OpenAIChat`]: chat completions grounded in the context |
//! | `"echo"` | [`EchoAssembler`]: returns the context itself (offline use) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Produces the final natural-language answer for a question.
#[async_trait]
pub trait AnswerAssembler: Send + Sync {
    fn name(&self) -> &str;

    async fn answer(&self, question: &str, context: &str) -> Result<String>;
}

/// Who answers are about, and what to fall back on.
#[derive(Debug, Clone, Default)]
pub struct PromptProfile {
    pub subject: Option<String>,
    /// General facts for questions the retrieved context does not cover.
    pub facts: Option<String>,
}

impl PromptProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            subject: config.profile.subject.clone(),
            facts: config.profile.fallback_context.clone(),
        }
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("the profile owner")
    }
}

/// System prompt grounding the model in `context`.
pub fn system_prompt(profile: &PromptProfile, context: &str) -> String {
    let subject = profile.subject();
    let mut prompt = format!(
        "You are a helpful assistant for {subject}. Answer questions about {subject} based on the following information:\n\n{context}\n\n"
    );
    if let Some(facts) = profile.facts.as_deref().filter(|f| !f.trim().is_empty()) {
        prompt.push_str(
            "If the information to answer the question is not in the context provided, use this general information:\n",
        );
        prompt.push_str(facts.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "Keep answers concise, professional, and accurate. If you don't know the answer to a question, \
         say you don't have that specific information about {subject} rather than making something up."
    ));
    prompt
}

/// Build the assembler named by `[answer].provider`.
pub fn create_assembler(config: &Config) -> Result<Arc<dyn AnswerAssembler>> {
    match config.answer.provider.as_str() {
        "echo" => Ok(Arc::new(EchoAssembler)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown answer provider: {}", other),
    }
}

pub struct EchoAssembler;

#[async_trait]
impl AnswerAssembler for EchoAssembler {
    fn name(&self) -> &str {
        "echo"
    }

    async fn answer(&self, _question: &str, context: &str) -> Result<String> {
        Ok(context.to_string())
    }
}

/// OpenAI `POST /chat/completions`. Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    max_tokens: u32,
    endpoint: String,
    api_key: String,
    profile: PromptProfile,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &Config, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.answer.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.answer.model.clone(),
            temperature: config.answer.temperature,
            max_tokens: config.answer.max_tokens,
            endpoint: format!(
                "{}/chat/completions",
                config.answer.base_url.trim_end_matches('/')
            ),
            api_key,
            profile: PromptProfile::from_config(config),
            client,
        })
    }
}

#[async_trait]
impl AnswerAssembler for OpenAIChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, question: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt(&self.profile, context) },
                { "role": "user", "content": question },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}
