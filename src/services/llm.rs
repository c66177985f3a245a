use crate::config::LlmConfig;
use crate::models::{LanguageHint, TitleRequest};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;

/// Optional helper consulted by the parser, the language detector and the
/// title formatter. Every operation answers `None` when it has nothing useful
/// to say, including on transport failure.
pub trait Assistant: Send + Sync {
    fn classify_language(&self, sample: &str)
    -> impl Future<Output = Option<LanguageHint>> + Send;

    /// Proposes one regular expression matching chapter heading lines.
    fn detect_heading_pattern(&self, sample: &str) -> impl Future<Output = Option<String>> + Send;

    /// Returns one title per entry, in order.
    fn format_titles(
        &self,
        entries: &[TitleRequest],
        language: &str,
    ) -> impl Future<Output = Option<Vec<String>>> + Send;
}

/// An assistant that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl Assistant for Offline {
    async fn classify_language(&self, _sample: &str) -> Option<LanguageHint> {
        None
    }

    async fn detect_heading_pattern(&self, _sample: &str) -> Option<String> {
        None
    }

    async fn format_titles(&self, _entries: &[TitleRequest], _language: &str) -> Option<Vec<String>> {
        None
    }
}

/// Endpoint defaults for a named provider. All speak the OpenAI chat
/// completions dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    pub requires_key: bool,
}

pub const PROVIDERS: &[ProviderProfile] = &[
    ProviderProfile {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        model: "deepseek-chat",
        requires_key: true,
    },
    ProviderProfile {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        model: "grok-2-latest",
        requires_key: true,
    },
    ProviderProfile {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        model: "llama2",
        requires_key: false,
    },
];

pub fn provider_profile(name: &str) -> Option<&'static ProviderProfile> {
    PROVIDERS
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

pub struct LLMClient {
    client: reqwest::Client,
    provider: &'static str,
    api_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl LLMClient {
    /// Builds the client for the configured provider. Returns `None` when the
    /// provider is unknown or `"none"`, or when a required key is missing.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        let Some(profile) = provider_profile(&config.provider) else {
            if !config.provider.eq_ignore_ascii_case("none") {
                tracing::warn!(provider = %config.provider, "unknown LLM provider, running offline");
            }
            return Ok(None);
        };

        let api_url = config
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| profile.base_url.to_string());
        let model = config
            .model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| profile.model.to_string());

        if profile.requires_key && config.api_key.trim().is_empty() {
            tracing::info!(provider = profile.name, "no API key configured, running offline");
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Some(LLMClient {
            client,
            provider: profile.name,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            model,
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                delay: Duration::from_secs(config.retry.delay_secs),
            },
        }))
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
        let mut request_builder = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt}
                ],
                "temperature": 0.1,
                "response_format": {"type": "json_object"}
            }));

        if !self.api_key.is_empty() {
            request_builder =
                request_builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request_builder.send().await?.error_for_status()?;
        let completion: Value = response.json().await?;

        let content = completion["choices"][0]["message"]["content"]
            .as_str()
            .context("completion has no message content")?;
        let payload = serde_json::from_str(strip_code_fence(content))
            .context("completion content is not JSON")?;
        Ok(payload)
    }

    /// Sends one prompt, retrying with a fixed delay. `None` once the attempt
    /// budget is spent.
    async fn request_json(&self, system_prompt: &str, user_prompt: &str) -> Option<Value> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.send_once(system_prompt, user_prompt).await {
                Ok(payload) => return Some(payload),
                Err(e) => {
                    tracing::warn!(
                        provider = self.provider,
                        attempt,
                        attempts,
                        "LLM request failed: {e:#}"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        None
    }
}

impl Assistant for LLMClient {
    async fn classify_language(&self, sample: &str) -> Option<LanguageHint> {
        let prompt = format!(
            "Identify the main language of the text below. Reply with JSON only: \
             {{\"language\": \"zh|en|mixed|unknown\", \"confidence\": 0-1}}\n\n{sample}"
        );
        let payload = self
            .request_json("You are a language classifier.", &prompt)
            .await?;
        language_from_payload(payload)
    }

    async fn detect_heading_pattern(&self, sample: &str) -> Option<String> {
        let prompt = format!(
            "The samples below come from one novel. Infer a single regular expression that \
             matches its chapter heading lines. Reply with JSON only: {{\"pattern\": \"^...$\"}}, \
             or {{\"pattern\": \"\"}} if there are no headings.\n\n{sample}"
        );
        let payload = self
            .request_json("You are a chapter heading detector.", &prompt)
            .await?;
        pattern_from_payload(payload)
    }

    async fn format_titles(&self, entries: &[TitleRequest], language: &str) -> Option<Vec<String>> {
        let items = serde_json::to_string(entries).ok()?;
        let prompt = format!(
            "Format one display title per input entry, keeping input order. Use fallback_title \
             when unsure. Reply with a JSON object whose key \"formatted\" holds the array of \
             strings.\nLanguage: {language}\nInput: {items}"
        );
        let payload = self
            .request_json("You are a chapter title formatter.", &prompt)
            .await?;
        titles_from_payload(payload)
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn language_from_payload(payload: Value) -> Option<LanguageHint> {
    let hint = match payload {
        Value::String(language) => LanguageHint {
            language,
            confidence: None,
        },
        Value::Object(_) => serde_json::from_value(payload).ok()?,
        _ => return None,
    };
    let language = hint.language.trim().to_lowercase();
    (!language.is_empty()).then_some(LanguageHint { language, ..hint })
}

fn pattern_from_payload(payload: Value) -> Option<String> {
    let pattern = match &payload {
        Value::String(pattern) => pattern.as_str(),
        Value::Object(map) => map.get("pattern")?.as_str()?,
        _ => return None,
    };
    let pattern = pattern.trim();
    (!pattern.is_empty()).then(|| pattern.to_string())
}

fn titles_from_payload(payload: Value) -> Option<Vec<String>> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("formatted")? {
            Value::Array(items) => items,
            _ => return None,
        },
        _ => return None,
    };
    // Any non-string entry invalidates the whole batch.
    items
        .into_iter()
        .map(|item| match item {
            Value::String(title) => Some(title.trim().to_string()),
            _ => None,
        })
        .collect()
}
