//! Reply generation via an LLM backend.
//!
//! Supports:
//! - **OpenAI**: Direct API access via rig-core
//! - **Anthropic**: Direct API access via rig-core
//!
//! The composer treats generation as an opaque capability: it may be
//! unconfigured (no API key) or fail at request time, and both outcomes
//! fall back to the deterministic template.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Message};
use rig::message::AssistantContent;
use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::error::GenerateError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

/// Configuration for creating a reply generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_tokens: u64,
}

/// Everything the generator needs to draft one reply body.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub form_name: Option<String>,
    pub page_url: Option<String>,
    pub tone: String,
    pub max_sentences: usize,
    /// Business-wide guidance from settings.
    pub business_instructions: String,
    /// Matched section directive, if a section matched.
    pub section_instructions: Option<String>,
}

/// Opaque reply-generation capability.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Draft a reply body for the submission. Errors are expected and
    /// non-fatal; the caller falls back to a template.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError>;
}

/// Generator used when no API key is configured. Always reports
/// `Unconfigured`, which the composer treats as "use the template".
pub struct UnconfiguredGenerator;

#[async_trait]
impl ReplyGenerator for UnconfiguredGenerator {
    fn model_name(&self) -> &str {
        "none"
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<String, GenerateError> {
        Err(GenerateError::Unconfigured)
    }
}

/// Create a reply generator from configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn ReplyGenerator>, GenerateError> {
    match config.backend {
        LlmBackend::OpenAi => create_openai_generator(config),
        LlmBackend::Anthropic => create_anthropic_generator(config),
    }
}

fn create_openai_generator(config: &LlmConfig) -> Result<Arc<dyn ReplyGenerator>, GenerateError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            GenerateError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(model, "openai", &config.model, config.max_tokens)))
}

fn create_anthropic_generator(config: &LlmConfig) -> Result<Arc<dyn ReplyGenerator>, GenerateError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            GenerateError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(model, "anthropic", &config.model, config.max_tokens)))
}

/// Bridges a rig `CompletionModel` to the `ReplyGenerator` trait.
pub struct RigGenerator<M: CompletionModel> {
    model: M,
    provider: String,
    model_name: String,
    max_tokens: u64,
}

impl<M: CompletionModel> RigGenerator<M> {
    pub fn new(model: M, provider: &str, model_name: &str, max_tokens: u64) -> Self {
        Self {
            model,
            provider: provider.to_string(),
            model_name: model_name.to_string(),
            max_tokens,
        }
    }
}

#[async_trait]
impl<M: CompletionModel> ReplyGenerator for RigGenerator<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError> {
        let system = build_system_prompt(request);
        let user = build_user_prompt(request);

        let response = self
            .model
            .completion_request(Message::user(user))
            .preamble(system)
            .temperature(0.6)
            .max_tokens(self.max_tokens)
            .send()
            .await
            .map_err(|e| GenerateError::RequestFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GenerateError::EmptyResponse {
                provider: self.provider.clone(),
            });
        }
        Ok(trimmed.to_string())
    }
}

/// System prompt: front-desk persona plus tone, length, and directives.
fn build_system_prompt(request: &GenerateRequest) -> String {
    let mut lines = vec![
        "You are a front desk email replier for a small business.".to_string(),
        "Your goal is to reply to incoming website form submissions quickly and helpfully."
            .to_string(),
        format!("Tone: {}.", request.tone),
        format!("Limit yourself to {} sentences.", request.max_sentences),
        "Avoid em dashes. Keep it sounding human.".to_string(),
    ];
    if !request.business_instructions.is_empty() {
        lines.push(format!(
            "Business-specific guidance: {}",
            request.business_instructions
        ));
    }
    if let Some(directive) = request
        .section_instructions
        .as_ref()
        .filter(|d| !d.is_empty())
    {
        lines.push(format!("IMPORTANT domain rule to apply: {directive}"));
    }
    lines.join("\n")
}

/// User prompt: the submission fields and the output contract.
fn build_user_prompt(request: &GenerateRequest) -> String {
    let mut lines = vec![
        "Compose a brief reply email to the following sender based on their message. Respond as the business."
            .to_string(),
        format!("Name: {}", request.name),
        format!("Email: {}", request.email),
        format!("Subject: {}", request.subject),
        format!("Message: {}", request.message),
    ];
    if let Some(form_name) = request.form_name.as_ref().filter(|v| !v.is_empty()) {
        lines.push(format!("Form: {form_name}"));
    }
    if let Some(page_url) = request.page_url.as_ref().filter(|v| !v.is_empty()) {
        lines.push(format!("Page: {page_url}"));
    }
    lines.push(String::new());
    lines.push(
        "Return ONLY the email body text (no greeting like \"Subject:\" line, no markdown fences)."
            .to_string(),
    );
    lines.join("\n")
}
