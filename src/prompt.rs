//! Prompt assembly for the extraction call.
//!
//! Produces the chat message list sent to the completion API:
//!
//! 1. a fixed system instruction,
//! 2. the fixed extraction template (`prompts/extraction.md`),
//! 3. one user text block summarizing the mail id and attachments, with
//!    every text attachment inlined,
//! 4. one user message per image attachment (upload order), carrying the
//!    filename and a `data:` URL with the base64 payload.
//!
//! Nothing is truncated or deduplicated here. Oversized prompts fail at the
//! API and come back as an error result.

use serde::Serialize;
use std::fmt::Write;

use crate::classify::image_mime_type;
use crate::models::Attachment;

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant for email and document data extraction.";

/// Extraction instructions and output schema. Literal, never generated.
pub const PROMPT_TEMPLATE: &str = include_str!("prompts/extraction.md");

/// MIME type used when an image name has no recognized subtype.
const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// OpenAI-style message content: a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
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

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Plain text of a text-only message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(_) => None,
        }
    }
}

/// Assembles the full message list for one mail.
pub fn build_messages(mail_id: &str, attachments: &[Attachment]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(3 + attachments.len());
    messages.push(ChatMessage::system(SYSTEM_INSTRUCTION));
    messages.push(ChatMessage::user(PROMPT_TEMPLATE));
    messages.push(ChatMessage::user(mail_summary(mail_id, attachments)));
    messages.extend(
        attachments
            .iter()
            .filter(|a| a.is_image)
            .map(image_message),
    );
    messages
}

/// The per-mail text block: id, attachment listing, inlined text content.
pub fn mail_summary(mail_id: &str, attachments: &[Attachment]) -> String {
    let mut out = format!("Mail ID: {}\n\n", mail_id);
    if attachments.is_empty() {
        out.push_str("This email has no attachments.\n");
        return out;
    }

    // write! into a String cannot fail
    let _ = write!(
        out,
        "This email has {} attachment(s):\n\n",
        attachments.len()
    );
    for (i, a) in attachments.iter().enumerate() {
        let _ = writeln!(out, "Attachment {}: {}", i + 1, a.filename);
        if !a.is_image {
            let _ = write!(out, "Content: {}\n\n", a.content);
        }
    }
    out
}

fn image_message(a: &Attachment) -> ChatMessage {
    let mime = image_mime_type(&a.filename).unwrap_or(FALLBACK_IMAGE_MIME);
    ChatMessage {
        role: Role::User,
        content: MessageContent::Parts(vec![
            ContentPart::Text {
                text: format!("Attachment: {}", a.filename),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime, a.content),
                },
            },
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(name: &str, content: &str) -> Attachment {
        Attachment {
            filename: name.into(),
            content: content.into(),
            is_image: false,
        }
    }

    fn image(name: &str, b64: &str) -> Attachment {
        Attachment {
            filename: name.into(),
            content: b64.into(),
            is_image: true,
        }
    }

    #[test]
    fn no_attachments_gives_three_messages() {
        let msgs = build_messages("m1", &[]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].text(), Some(SYSTEM_INSTRUCTION));
        assert_eq!(msgs[1].text(), Some(PROMPT_TEMPLATE));
        assert_eq!(
            msgs[2].text(),
            Some("Mail ID: m1\n\nThis email has no attachments.\n")
        );
    }

    #[test]
    fn template_is_the_schema_literal() {
        assert!(PROMPT_TEMPLATE.contains("calendar_add_details"));
        assert!(PROMPT_TEMPLATE.contains("Never output text or explanation outside the JSON."));
    }

    #[test]
    fn text_attachments_inline_and_images_follow_in_order() {
        let atts = vec![
            text("a.txt", "alpha"),
            image("b.png", "QkI="),
            text("c.txt", "gamma"),
            image("d.JPG", "RA=="),
        ];
        let msgs = build_messages("m7", &atts);
        assert_eq!(msgs.len(), 5);

        let summary = msgs[2].text().unwrap();
        assert_eq!(
            summary,
            "Mail ID: m7\n\nThis email has 4 attachment(s):\n\n\
             Attachment 1: a.txt\nContent: alpha\n\n\
             Attachment 2: b.png\n\
             Attachment 3: c.txt\nContent: gamma\n\n\
             Attachment 4: d.JPG\n"
        );

        let v = serde_json::to_value(&msgs[3]).unwrap();
        assert_eq!(
            v,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "Attachment: b.png"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,QkI="}}
                ]
            })
        );
        let v = serde_json::to_value(&msgs[4]).unwrap();
        assert_eq!(
            v["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,RA=="
        );
    }

    #[test]
    fn text_message_serializes_as_plain_string() {
        let v = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(v, json!({"role": "system", "content": "hi"}));
    }
}
