use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PayloadError;

/// What a push shows on the device. Built per dispatch; title and body are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    title: String,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    data: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Result<Self, PayloadError> {
        let title = title.into();
        let body = body.into();
        if title.trim().is_empty() {
            return Err(PayloadError::EmptyTitle);
        }
        if body.trim().is_empty() {
            return Err(PayloadError::EmptyBody);
        }
        Ok(Self {
            title,
            body,
            image_url: None,
            data: BTreeMap::new(),
        })
    }

    /// Blank URLs are dropped rather than sent as an empty image.
    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        let image_url = image_url.into();
        self.image_url = Some(image_url.trim().to_string()).filter(|u| !u.is_empty());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}

/// Result of one dispatch call.
///
/// `success_count + failure_count` always equals the number of tokens handed to the
/// gateway, and every entry of `invalid_tokens` is one of the failed tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub invalid_tokens: Vec<String>,
    pub skipped_without_token: usize,
    pub tokens_cleared: u64,
    /// Gateway message id, for single-token and topic sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl DispatchOutcome {
    /// Nothing was attempted.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.success_count + self.failure_count
    }
}
