//! Completion provider abstraction.
//!
//! A provider takes a fully built `CompletionRequestEnvelope` and returns a
//! lazy, single-use stream of `ResponseFragment`s.

pub mod credentials;
pub mod perplexity;

use crate::config::Config;
use crate::error::{ConfigError, Error, ProviderError};
use crate::ingest::{Attachment, AttachmentKind};
use crate::models::ModelSelection;
use crate::protocol::{
    ChatMessage, CompletionRequestEnvelope, ContentPart, ImageUrl, MessageContent, QueryRequest,
    ResponseFragment,
};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

const SYSTEM_PROMPT: &str = "Be precise and concise.";

/// Fragments of one streamed answer, in arrival order. Owned and consumed
/// once; the last item is either a fragment with `is_final` set or an error.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<ResponseFragment, ProviderError>> + Send>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Send the request and return the open response stream.
    async fn stream(
        &self,
        envelope: CompletionRequestEnvelope,
    ) -> Result<FragmentStream, ProviderError>;
}

/// Create the configured provider. Fails before any network traffic if the
/// provider is unknown or no API key can be found.
pub fn create_provider(config: &Config) -> Result<Box<dyn CompletionProvider>, Error> {
    match config.default_provider.trim().to_ascii_lowercase().as_str() {
        "perplexity" => {
            let api_key = credentials::resolve_api_key()?;
            let client = perplexity::PerplexityClient::new(&config.base_url, api_key)?;
            Ok(Box::new(client))
        }
        other => Err(ConfigError::UnsupportedProvider(other.to_string()).into()),
    }
}

/// Assemble the request for one query. The attachment is consumed: its
/// payload moves into the user message and nothing else keeps it.
pub fn build_envelope(
    request: &QueryRequest,
    attachment: Option<Attachment>,
    selection: ModelSelection,
    timeout_seconds: u64,
) -> CompletionRequestEnvelope {
    let prompt = match (&attachment, request.prompt.trim()) {
        (Some(attachment), "") => attachment.kind.fallback_prompt().to_string(),
        (_, prompt) => prompt.to_string(),
    };

    let content = match attachment {
        None => MessageContent::Text(prompt),
        Some(attachment) => {
            let name = attachment.display_name();
            match attachment.kind {
                AttachmentKind::Image => MessageContent::Parts(vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: attachment.payload,
                        },
                    },
                ]),
                AttachmentKind::Code => MessageContent::Text(format!(
                    "File content from {}:\n\n```\n{}\n```\n\n{}",
                    name,
                    attachment.payload.trim_end(),
                    prompt
                )),
                AttachmentKind::Text => MessageContent::Text(format!(
                    "File content from {}:\n\n{}\n\n{}",
                    name, attachment.payload, prompt
                )),
                AttachmentKind::Pdf => MessageContent::Text(format!(
                    "Content from {}:\n\n{}\n\n{}",
                    name, attachment.payload, prompt
                )),
            }
        }
    };

    CompletionRequestEnvelope {
        model: selection.model_id.to_string(),
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(content)],
        timeout_seconds,
    }
}
