//! LLM interaction: send document Markdown, get back the raw JSON envelope.
//!
//! This module is intentionally thin. Prompt wording lives in
//! [`crate::prompts`], reply cleanup in [`super::postprocess`], and
//! everything after decoding in [`super::validate`]. What stays here is the
//! call itself and provider selection.
//!
//! The call sits behind [`QuestionInference`] so pipelines can be exercised
//! with canned replies; [`ProviderInference`] is the production adapter over
//! an `edgequake_llm` provider.
//!
//! One call is made per document. A failed call fails that document with
//! [`ExtractError::LlmApiError`]; rerun it with `pdf2mcq reprocess`.

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::ExtractError;
use crate::pipeline::postprocess::{clean_document_markdown, parse_json_payload};
use crate::prompts::{build_extraction_prompt, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::fmt::Display;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Produces the model's raw text reply for an extraction prompt.
#[async_trait]
pub trait QuestionInference: Send + Sync {
    /// `document` is used only for error messages and logs.
    async fn complete(&self, document: &str, prompt: &str) -> Result<String, ExtractError>;
}

/// [`QuestionInference`] over an `edgequake_llm` provider.
pub struct ProviderInference {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderInference {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl QuestionInference for ProviderInference {
    async fn complete(&self, document: &str, prompt: &str) -> Result<String, ExtractError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompt),
        ];
        let options = self.options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| chat_error(document, e))?;
        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            document,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

fn chat_error(document: &str, err: impl Display) -> ExtractError {
    let message = err.to_string();
    warn!("{}: LLM call failed: {}", document, message);
    ExtractError::LlmApiError {
        document: document.to_string(),
        message,
    }
}

/// Ask the model for questions in `markdown` and decode its reply.
///
/// Returns the envelope exactly as the model produced it (after fence
/// stripping); nothing is validated here.
///
/// # Errors
/// - [`ExtractError::NoQuestions`] — the document has no text, no call is made
/// - [`ExtractError::LlmApiError`] — the call failed
/// - [`ExtractError::InvalidJson`] — the reply is not JSON
pub async fn extract_with_llm(
    inference: &dyn QuestionInference,
    document: &str,
    markdown: &str,
) -> Result<Value, ExtractError> {
    let content = clean_document_markdown(markdown);
    if content.trim().is_empty() {
        warn!("{}: parsed document has no text, skipping LLM call", document);
        return Err(ExtractError::NoQuestions {
            document: document.to_string(),
        });
    }

    info!("Sending {} chars of {} to the LLM", content.len(), document);
    let reply = inference
        .complete(document, &build_extraction_prompt(&content))
        .await?;
    debug!("{}: LLM replied with {} chars", document, reply.len());
    parse_json_payload(document, &reply)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`].
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
///    when both are non-empty.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with a fixed string and records the prompt it was given.
    struct CannedReply {
        reply: Result<String, String>,
        seen: Mutex<Vec<String>>,
    }

    impl CannedReply {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QuestionInference for CannedReply {
        async fn complete(&self, document: &str, prompt: &str) -> Result<String, ExtractError> {
            self.seen.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|message| ExtractError::LlmApiError {
                document: document.to_string(),
                message,
            })
        }
    }

    #[tokio::test]
    async fn fenced_reply_is_decoded() {
        let llm = CannedReply::ok("```json\n{\"questions\": [{\"question_text\": \"Q1\"}]}\n```");
        let v = extract_with_llm(&llm, "a.pdf", "Q1. What?\r\n(A) x").await.unwrap();
        assert_eq!(v["questions"][0]["question_text"], "Q1");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ends_with("Document content:\nQ1. What?\n(A) x"));
    }

    #[test]
    fn empty_document_skips_the_call() {
        let llm = CannedReply::ok("{}");
        let err = tokio_test::block_on(extract_with_llm(&llm, "blank.pdf", " \n\u{200B}\n"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoQuestions { .. }));
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn call_failure_propagates() {
        let llm = CannedReply {
            reply: Err("429 Too Many Requests".into()),
            seen: Mutex::new(Vec::new()),
        };
        let err = extract_with_llm(&llm, "a.pdf", "Q1").await.unwrap_err();
        assert!(matches!(err, ExtractError::LlmApiError { ref message, .. } if message.contains("429")));
    }

    #[test]
    fn chat_error_keeps_provider_message() {
        let err = chat_error("a.pdf", "503 Service Unavailable");
        match err {
            ExtractError::LlmApiError { document, message } => {
                assert_eq!(document, "a.pdf");
                assert_eq!(message, "503 Service Unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn prose_reply_is_invalid_json() {
        let llm = CannedReply::ok("Sorry, I cannot read this document.");
        let err = extract_with_llm(&llm, "a.pdf", "Q1").await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson { .. }));
    }
}
