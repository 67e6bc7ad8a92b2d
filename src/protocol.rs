//! Data passed between the stages of the query pipeline.
//!
//! The request side (`CompletionRequestEnvelope` and friends) serializes
//! directly into the chat-completions JSON body.

use crate::models::ModelFlag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Commands that bypass the query pipeline entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCommand {
    Update,
    Bored,
}

/// Everything the user asked for in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// The natural language query, possibly empty when a file is attached.
    pub prompt: String,
    /// File to ground the answer in.
    pub attachment_path: Option<PathBuf>,
    pub model_flag: ModelFlag,
    /// List cited sources under the answer.
    pub show_sources: bool,
    pub special_command: Option<SpecialCommand>,
}

/// Who is speaking in a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Message body: plain text, or text plus images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// All text carried by the message, images excluded.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One completion request, built fresh for each call.
#[derive(Debug, Serialize)]
pub struct CompletionRequestEnvelope {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Enforced by the client, not sent on the wire.
    #[serde(skip)]
    pub timeout_seconds: u64,
}

/// One piece of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFragment {
    pub text_delta: String,
    /// Set on the last fragment of the stream.
    pub is_final: bool,
    /// Source URLs the provider attached to this event (may be empty).
    pub sources: Vec<String>,
}

/// An inline `[n]` reference resolved to its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    /// 1-based, matches the marker in the answer text.
    pub index: usize,
    pub url: String,
}

/// The finished answer handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerResult {
    pub full_text: String,
    pub citations: Vec<Citation>,
    pub model_used: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = CompletionRequestEnvelope {
            model: "sonar".to_string(),
            messages: vec![
                ChatMessage::system("Be precise."),
                ChatMessage::user(MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "What is this?".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AAAA".to_string(),
                        },
                    },
                ])),
            ],
            timeout_seconds: 30,
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["model"], "sonar");
        assert!(json.get("timeout_seconds").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "Be precise.");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_message_text_skips_images() {
        let message = ChatMessage::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: "hello".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:".to_string(),
                },
            },
        ]));
        assert_eq!(message.text(), "hello");
    }
}
