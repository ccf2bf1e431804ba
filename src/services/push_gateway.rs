use async_trait::async_trait;
use tracing::info;

use crate::error::GatewayError;
use crate::models::NotificationPayload;

/// Error classification reported by the push gateway for a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushErrorCode {
    Unregistered,
    InvalidArgument,
    SenderIdMismatch,
    QuotaExceeded,
    Unavailable,
    Internal,
    ThirdPartyAuthError,
    Other(String),
}

impl PushErrorCode {
    /// Maps an FCM `errorCode` (or canonical status) string.
    pub fn from_fcm(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "UNREGISTERED" | "NOT_FOUND" => PushErrorCode::Unregistered,
            "INVALID_ARGUMENT" => PushErrorCode::InvalidArgument,
            "SENDER_ID_MISMATCH" | "PERMISSION_DENIED" => PushErrorCode::SenderIdMismatch,
            "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => PushErrorCode::QuotaExceeded,
            "UNAVAILABLE" => PushErrorCode::Unavailable,
            "INTERNAL" => PushErrorCode::Internal,
            "THIRD_PARTY_AUTH_ERROR" => PushErrorCode::ThirdPartyAuthError,
            other => PushErrorCode::Other(other.to_string()),
        }
    }

    /// The token itself is dead (unregistered or malformed); retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PushErrorCode::Unregistered | PushErrorCode::InvalidArgument
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            PushErrorCode::Unregistered => "UNREGISTERED",
            PushErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            PushErrorCode::SenderIdMismatch => "SENDER_ID_MISMATCH",
            PushErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            PushErrorCode::Unavailable => "UNAVAILABLE",
            PushErrorCode::Internal => "INTERNAL",
            PushErrorCode::ThirdPartyAuthError => "THIRD_PARTY_AUTH_ERROR",
            PushErrorCode::Other(code) => code,
        }
    }
}

/// Per-token response of a batch send. Position in the response list matches the
/// position of the token in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSendResult {
    pub token: String,
    pub success: bool,
    pub error_code: Option<PushErrorCode>,
    pub message_id: Option<String>,
}

impl TokenSendResult {
    pub fn delivered(token: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            token: token.into(),
            success: true,
            error_code: None,
            message_id,
        }
    }

    pub fn failed(token: impl Into<String>, error_code: PushErrorCode) -> Self {
        Self {
            token: token.into(),
            success: false,
            error_code: Some(error_code),
            message_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicAction {
    Subscribe,
    Unsubscribe,
}

impl TopicAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicAction::Subscribe => "subscribe",
            TopicAction::Unsubscribe => "unsubscribe",
        }
    }
}

/// Topic name without the `/topics/` prefix, if it is one FCM accepts.
pub fn normalize_topic(topic: &str) -> Option<&str> {
    let topic = topic.trim();
    let topic = topic.strip_prefix("/topics/").unwrap_or(topic);
    let valid = !topic.is_empty()
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.~%".contains(c));
    valid.then_some(topic)
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Sends `payload` to every token in one multicast call.
    ///
    /// `Err` means the call as a whole failed and nothing can be said about individual
    /// tokens.
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> Result<Vec<TokenSendResult>, GatewayError>;

    /// Sends `payload` to every device subscribed to `topic`. Returns the message id.
    async fn send_to_topic(
        &self,
        _topic: &str,
        _payload: &NotificationPayload,
    ) -> Result<Option<String>, GatewayError> {
        Err(GatewayError::Unsupported("topic messaging"))
    }

    /// Adds or removes tokens from a topic; one result per token, in input order.
    async fn update_topic_membership(
        &self,
        _topic: &str,
        _tokens: &[String],
        _action: TopicAction,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        Err(GatewayError::Unsupported("topic membership"))
    }
}

/// Stand-in used when push delivery is disabled: logs and reports every token delivered.
#[derive(Debug, Default, Clone)]
pub struct LoggingPushGateway;

#[async_trait]
impl PushGateway for LoggingPushGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        info!(
            tokens = tokens.len(),
            title = payload.title(),
            "Push delivery disabled, logging notification instead"
        );
        Ok(tokens
            .iter()
            .map(|t| TokenSendResult::delivered(t.clone(), None))
            .collect())
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> Result<Option<String>, GatewayError> {
        info!(
            topic,
            title = payload.title(),
            "Push delivery disabled, logging topic notification instead"
        );
        Ok(None)
    }

    async fn update_topic_membership(
        &self,
        topic: &str,
        tokens: &[String],
        action: TopicAction,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        info!(
            topic,
            tokens = tokens.len(),
            "Push delivery disabled, skipping topic {}",
            action.as_str()
        );
        Ok(tokens
            .iter()
            .map(|t| TokenSendResult::delivered(t.clone(), None))
            .collect())
    }
}

/// First characters of a token, safe for logs.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}…", prefix)
}
