use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{create_generation_circuit_breaker, GenerationBreaker};
use crate::config::Config;
use crate::description_cache::{CachedDescription, DescriptionCache};
use crate::errors::AppError;
use crate::models::Lead;
use crate::scoring::LeadScorer;

/// Opaque text-completion service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client guarded by a circuit breaker.
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    breaker: GenerationBreaker,
}

impl LlmClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create LLM client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            breaker: create_generation_circuit_breaker(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            &config.llm_base_url,
            &config.llm_api_key,
            &config.llm_model,
            config.http_timeout(),
        )
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::from_status("LLM", status, &error_text));
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse LLM response: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::ExternalApiError("LLM returned an empty completion".into()))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError> {
        match self.breaker.call(self.complete(prompt, max_tokens)).await {
            Ok(text) => Ok(text),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("LLM circuit breaker open, rejecting generation call");
                Err(AppError::Transient("LLM circuit breaker open".to_string()))
            }
        }
    }
}

/// Splits an LLM reply into `(subject, body)`.
///
/// The first blank-line-separated block is the subject block when it starts with
/// `Subject:`. Otherwise the whole reply is the body and `fallback_subject` is used.
pub fn parse_subject_body(response: &str, fallback_subject: &str) -> (String, String) {
    let normalized = response.replace("\r\n", "\n");
    let trimmed = normalized.trim();

    let (first_block, rest) = match trimmed.split_once("\n\n") {
        Some((head, tail)) => (head, tail),
        None => (trimmed, ""),
    };

    let mut lines = first_block.lines();
    let subject = lines.next().and_then(|line| {
        let line = line.trim();
        let prefix = line.get(..8)?;
        prefix
            .eq_ignore_ascii_case("subject:")
            .then(|| line[8..].trim().to_string())
    });

    match subject {
        Some(subject) if !subject.is_empty() => {
            // Lines after the subject inside the first block still belong to the body.
            let remainder: Vec<&str> = lines.collect();
            let body = if remainder.is_empty() {
                rest.trim().to_string()
            } else if rest.trim().is_empty() {
                remainder.join("\n").trim().to_string()
            } else {
                format!("{}\n\n{}", remainder.join("\n").trim(), rest.trim())
            };
            (subject, body)
        }
        _ => (fallback_subject.to_string(), trimmed.to_string()),
    }
}

/// Produces company descriptions and scores, reading through the shared cache.
#[derive(Clone)]
pub struct DescriptionGenerator {
    generator: Arc<dyn TextGenerator>,
    cache: DescriptionCache,
    scorer: LeadScorer,
    max_tokens: u32,
}

impl DescriptionGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, cache: DescriptionCache, max_tokens: u32) -> Self {
        Self {
            generator,
            cache,
            scorer: LeadScorer::new(),
            max_tokens,
        }
    }

    fn prompt(company: &str, context: &str) -> String {
        format!(
            "Write a concise, factual 2-3 sentence business description of \"{}\". \
             Mention industry, size and any notable growth or recognition if known. \
             Do not invent contact details.\n\nKnown information:\n{}",
            company, context
        )
    }

    /// Returns `(description, score)` for a company. With `use_cache`, a cached entry
    /// short-circuits the generation call; fresh results are always written back.
    pub async fn describe(
        &self,
        company: &str,
        context: &str,
        use_cache: bool,
    ) -> Result<CachedDescription, AppError> {
        if use_cache {
            if let Some(hit) = self.cache.get(company).await {
                tracing::debug!("Description cache HIT for '{}'", company);
                return Ok(hit);
            }
        }

        tracing::debug!("Description cache MISS for '{}'", company);
        let description = self
            .generator
            .generate(&Self::prompt(company, context), self.max_tokens)
            .await?;
        let score = self
            .scorer
            .score(&format!("{}\n{}", context, description));

        Ok(self.cache.put(company, &description, score).await)
    }
}

/// Produces outreach copy for a lead.
#[derive(Clone)]
pub struct ContentGenerator {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
    sender_name: String,
}

impl ContentGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32, sender_name: &str) -> Self {
        Self {
            generator,
            max_tokens,
            sender_name: sender_name.to_string(),
        }
    }

    pub fn fallback_subject(lead: &Lead) -> String {
        format!("A quick idea for {}", lead.name)
    }

    fn lead_context(lead: &Lead) -> String {
        let mut context = format!("Company: {}", lead.name);
        if let Some(address) = &lead.address {
            context.push_str(&format!("\nLocation: {}", address));
        }
        if let Some(description) = &lead.description {
            context.push_str(&format!("\nAbout: {}", description));
        }
        if let Some(website) = &lead.website {
            context.push_str(&format!("\nWebsite: {}", website));
        }
        context
    }

    /// Email `(subject, body)` for the lead.
    pub async fn email(&self, lead: &Lead, pitch: &str) -> Result<(String, String), AppError> {
        let prompt = format!(
            "Write a short, personalised cold email from {} to the company below.\n\
             Start with a line \"Subject: ...\", then a blank line, then the body.\n\
             Offer: {}\n\n{}",
            self.sender_name,
            pitch,
            Self::lead_context(lead)
        );
        let reply = self.generator.generate(&prompt, self.max_tokens).await?;
        Ok(parse_subject_body(&reply, &Self::fallback_subject(lead)))
    }

    /// WhatsApp body for the lead. No subject line.
    pub async fn whatsapp(&self, lead: &Lead, pitch: &str) -> Result<String, AppError> {
        let prompt = format!(
            "Write a friendly WhatsApp message (max 3 sentences, no subject line) from {} \
             to the company below.\nOffer: {}\n\n{}",
            self.sender_name,
            pitch,
            Self::lead_context(lead)
        );
        let reply = self.generator.generate(&prompt, self.max_tokens).await?;
        let (_, body) = parse_subject_body(&reply, "");
        Ok(body)
    }
}
