//! Hosted text-generation backend (OpenAI-style completions endpoint).

use anyhow::{bail, Context};
use async_trait::async_trait;
use banter_core::ConfigStore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stop: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

/// Reads model settings from the config store on every call, so a reload
/// applies to the next request.
pub struct CompletionsClient {
    client: Client,
    config: Arc<ConfigStore>,
}

impl CompletionsClient {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Generator for CompletionsClient {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let config = self.config.get();
        let settings = &config.generation;
        let api_key = match &settings.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => env::var("OPENAI_API_KEY")
                .context("no generation.api_key in config and OPENAI_API_KEY not set")?,
        };

        let body = CompletionRequest {
            model: &settings.model,
            prompt,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: ["\n"],
        };
        debug!(model = %settings.model, chars = prompt.len(), "requesting completion");

        let response = self
            .client
            .post(&settings.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("completions request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("completions request failed ({status}): {text}");
        }

        let parsed: CompletionResponse = response.json().await.context("parse completion")?;
        reply_text(parsed)
    }
}

fn reply_text(response: CompletionResponse) -> anyhow::Result<String> {
    let Some(choice) = response.choices.into_iter().next() else {
        bail!("completion had no choices");
    };
    Ok(choice.text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_choice_trimmed() {
        let raw = r#"{"choices":[{"text":"  hi there \n"},{"text":"other"}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply_text(parsed).unwrap(), "hi there");
    }

    #[test]
    fn no_choices_is_an_error() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(reply_text(parsed).is_err());
    }

    #[test]
    fn request_body_shape() {
        let body = CompletionRequest {
            model: "m",
            prompt: "p",
            temperature: 0.5,
            max_tokens: 64,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: ["\n"],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stop"][0], "\n");
        assert_eq!(value["max_tokens"], 64);
        assert_eq!(value["model"], "m");
    }
}
