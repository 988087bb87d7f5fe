// Copyright (C) 2025 Liveline contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chat webhook channel.
//!
//! Messages use the Slack incoming-webhook shape: a plain `text` fallback
//! plus optional `blocks`. The webhook URL is stored per liveblog.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::model::{Liveblog, Update, UpdateContent};

/// Chat delivery errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The webhook answered with a non-2xx status.
    #[error("Webhook responded with status {0}")]
    Status(u16),

    /// The request never completed.
    #[error("Webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Slack-compatible webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    /// Plain text rendering, always present.
    pub text: String,
    /// Rich layout blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Value>>,
}

/// Sends a message to a chat webhook.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Post `message` to `webhook_url`.
    async fn notify(&self, webhook_url: &str, message: &ChatMessage) -> Result<(), ChatError>;
}

/// [`ChatNotifier`] posting JSON over HTTP.
#[derive(Clone)]
pub struct HttpChatNotifier {
    client: reqwest::Client,
}

impl HttpChatNotifier {
    /// Build a notifier with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChatNotifier for HttpChatNotifier {
    async fn notify(&self, webhook_url: &str, message: &ChatMessage) -> Result<(), ChatError> {
        let response = self.client.post(webhook_url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Slack mrkdwn control characters.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a published update for the chat channel.
pub fn format_chat_message(liveblog: &Liveblog, update: &Update) -> ChatMessage {
    let heading = format!("*{}*", escape(&liveblog.title));

    match update.typed_content() {
        UpdateContent::Text { text } => ChatMessage {
            text: format!("{heading}\n{}", escape(&text)),
            blocks: None,
        },
        UpdateContent::Link {
            url,
            title,
            description,
        } => {
            let label = title.as_deref().unwrap_or(&url);
            let mut text = format!("{heading}\n<{}|{}>", url, escape(label));
            if let Some(description) = description.filter(|d| !d.is_empty()) {
                text.push('\n');
                text.push_str(&escape(&description));
            }
            ChatMessage { text, blocks: None }
        }
        UpdateContent::Image { url, caption, alt } => {
            let caption = caption.filter(|c| !c.is_empty());
            let text = match &caption {
                Some(caption) => format!("{heading}\n{}", escape(caption)),
                None => format!("{heading}\nNew image"),
            };
            let alt_text = alt
                .or_else(|| caption.clone())
                .unwrap_or_else(|| "image".to_string());
            let blocks = vec![
                json!({
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": text },
                }),
                json!({
                    "type": "image",
                    "image_url": url,
                    "alt_text": alt_text,
                }),
            ];
            ChatMessage {
                text,
                blocks: Some(blocks),
            }
        }
        UpdateContent::Other => ChatMessage {
            text: format!("{heading}\nNew update posted"),
            blocks: None,
        },
    }
}
