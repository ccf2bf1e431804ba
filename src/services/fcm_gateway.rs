use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::models::NotificationPayload;
use crate::services::push_gateway::{
    redact_token, PushErrorCode, PushGateway, TokenSendResult, TopicAction,
};

// Topic membership goes through the instance-id API, which wants cloud-platform too.
const FCM_SCOPE: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/firebase.messaging";
const FCM_BASE_URL: &str = "https://fcm.googleapis.com";
const IID_BASE_URL: &str = "https://iid.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
// Refresh this long before Google says the access token expires.
const ACCESS_TOKEN_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a Firebase service-account JSON file that token minting needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read service account file {}: {}", path, e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            GatewayError::Config(format!("invalid service account file {}: {}", path, e))
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct CachedAccessToken {
    token: String,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    error: FcmErrorStatus,
}

#[derive(Debug, Deserialize)]
struct FcmErrorStatus {
    status: Option<String>,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FcmSendResponse {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IidBatchResponse {
    #[serde(default)]
    results: Vec<IidBatchResult>,
}

#[derive(Debug, Deserialize)]
struct IidBatchResult {
    error: Option<String>,
}

/// Firebase Cloud Messaging (HTTP v1) gateway.
///
/// HTTP v1 has no multicast endpoint, so a batch is one request per token, run with
/// bounded concurrency. `buffered` keeps the results in token order.
pub struct FcmPushGateway {
    client: reqwest::Client,
    project_id: String,
    base_url: String,
    iid_base_url: String,
    client_email: String,
    token_uri: String,
    encoding_key: EncodingKey,
    max_concurrency: usize,
    access_token: RwLock<Option<CachedAccessToken>>,
}

impl FcmPushGateway {
    pub fn new(
        project_id: impl Into<String>,
        key: ServiceAccountKey,
        request_timeout: Duration,
        max_concurrency: usize,
    ) -> Result<Self, GatewayError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| GatewayError::Config(format!("invalid service account key: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            project_id: project_id.into(),
            base_url: FCM_BASE_URL.to_string(),
            iid_base_url: IID_BASE_URL.to_string(),
            client_email: key.client_email,
            token_uri: key.token_uri,
            encoding_key,
            max_concurrency: max_concurrency.max(1),
            access_token: RwLock::new(None),
        })
    }

    /// Points the gateway at another host, e.g. a local emulator.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_iid_base_url(mut self, iid_base_url: impl Into<String>) -> Self {
        self.iid_base_url = iid_base_url.into();
        self
    }

    async fn post_message(&self, bearer: &str, message: &Value) -> reqwest::Result<(u16, String)> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url.trim_end_matches('/'),
            self.project_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(bearer)
            .json(message)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }

    async fn bearer_token(&self) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        if let Some(cached) = self.access_token.read().await.as_ref() {
            if cached.expires_at - ACCESS_TOKEN_MARGIN_SECS > now {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.access_token.write().await;
        // another task may have refreshed while we waited for the write lock
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at - ACCESS_TOKEN_MARGIN_SECS > now {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.mint_access_token().await?;
        *slot = Some(fresh.clone());
        Ok(fresh.token)
    }

    async fn mint_access_token(&self) -> Result<CachedAccessToken, GatewayError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: FCM_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Auth(format!("cannot sign assertion: {}", e)))?;

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let body: AccessTokenResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("unreadable token response: {}", e)))?;

        info!(
            expires_in = body.expires_in,
            "Obtained FCM access token for {}", self.client_email
        );

        Ok(CachedAccessToken {
            token: body.access_token,
            expires_at: now + body.expires_in,
        })
    }

    async fn send_one(&self, bearer: &str, token: String, message: Value) -> TokenSendResult {
        let (status, body) = match self.post_message(bearer, &message).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(token = %redact_token(&token), "FCM send failed before a response: {}", e);
                return TokenSendResult::failed(token, PushErrorCode::Unavailable);
            }
        };

        match classify_fcm_response(status, &body) {
            Ok(message_id) => {
                debug!(token = %redact_token(&token), "FCM accepted message");
                TokenSendResult::delivered(token, message_id)
            }
            Err(code) => {
                warn!(
                    token = %redact_token(&token),
                    status,
                    error_code = code.as_str(),
                    "FCM rejected message"
                );
                TokenSendResult::failed(token, code)
            }
        }
    }
}

#[async_trait]
impl PushGateway for FcmPushGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &NotificationPayload,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        let bearer = self.bearer_token().await?;
        let bearer = bearer.as_str();

        let results = stream::iter(tokens.iter().cloned())
            .map(|token| {
                let message = build_fcm_message(&token, payload);
                self.send_one(bearer, token, message)
            })
            .buffered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &NotificationPayload,
    ) -> Result<Option<String>, GatewayError> {
        let bearer = self.bearer_token().await?;
        let message = build_fcm_topic_message(topic, payload);
        let (status, body) = self.post_message(&bearer, &message).await?;

        match classify_fcm_response(status, &body) {
            Ok(message_id) => {
                info!(topic, "FCM accepted topic message");
                Ok(message_id)
            }
            Err(code) => {
                warn!(topic, status, error_code = code.as_str(), "FCM rejected topic message");
                Err(GatewayError::Rejected(code.as_str().to_string()))
            }
        }
    }

    async fn update_topic_membership(
        &self,
        topic: &str,
        tokens: &[String],
        action: TopicAction,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        let bearer = self.bearer_token().await?;
        let endpoint = match action {
            TopicAction::Subscribe => "batchAdd",
            TopicAction::Unsubscribe => "batchRemove",
        };
        let url = format!("{}/iid/v1:{}", self.iid_base_url.trim_end_matches('/'), endpoint);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&bearer)
            .header("access_token_auth", "true")
            .json(&json!({
                "to": format!("/topics/{}", topic),
                "registration_tokens": tokens,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let code = classify_fcm_response(status.as_u16(), &body)
                .err()
                .unwrap_or_else(|| PushErrorCode::Other(format!("HTTP_{}", status.as_u16())));
            return Err(GatewayError::Rejected(code.as_str().to_string()));
        }

        let body: IidBatchResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("unreadable topic response: {}", e)))?;
        if body.results.len() != tokens.len() {
            return Err(GatewayError::Misaligned {
                expected: tokens.len(),
                got: body.results.len(),
            });
        }

        debug!(topic, tokens = tokens.len(), "Topic {} answered", action.as_str());
        Ok(tokens
            .iter()
            .zip(body.results)
            .map(|(token, result)| match result.error {
                None => TokenSendResult::delivered(token.clone(), None),
                Some(code) => TokenSendResult::failed(token.clone(), PushErrorCode::from_fcm(&code)),
            })
            .collect())
    }
}

/// HTTP v1 request body for one device token.
pub fn build_fcm_message(token: &str, payload: &NotificationPayload) -> Value {
    build_message("token", token, payload)
}

pub fn build_fcm_topic_message(topic: &str, payload: &NotificationPayload) -> Value {
    build_message("topic", topic, payload)
}

fn build_message(target_key: &str, target: &str, payload: &NotificationPayload) -> Value {
    let mut notification = Map::new();
    notification.insert("title".to_string(), json!(payload.title()));
    notification.insert("body".to_string(), json!(payload.body()));
    if let Some(image_url) = payload.image_url() {
        notification.insert("image".to_string(), json!(image_url));
    }

    let mut message = Map::new();
    message.insert(target_key.to_string(), json!(target));
    message.insert("notification".to_string(), Value::Object(notification));
    if !payload.data().is_empty() {
        message.insert("data".to_string(), json!(payload.data()));
    }

    json!({ "message": message })
}

/// Success carries the FCM message name; failure carries the classified error.
///
/// The `errorCode` in the error details wins over the canonical status, which wins over
/// the bare HTTP status.
pub fn classify_fcm_response(status: u16, body: &str) -> Result<Option<String>, PushErrorCode> {
    if (200..300).contains(&status) {
        let name = serde_json::from_str::<FcmSendResponse>(body)
            .ok()
            .and_then(|r| r.name);
        return Ok(name);
    }

    if let Ok(parsed) = serde_json::from_str::<FcmErrorBody>(body) {
        if let Some(code) = parsed
            .error
            .details
            .iter()
            .find_map(|d| d.error_code.as_deref())
        {
            return Err(PushErrorCode::from_fcm(code));
        }
        if let Some(status) = parsed.error.status.as_deref() {
            return Err(PushErrorCode::from_fcm(status));
        }
    }

    Err(match status {
        400 => PushErrorCode::InvalidArgument,
        404 => PushErrorCode::Unregistered,
        429 => PushErrorCode::QuotaExceeded,
        500 => PushErrorCode::Internal,
        503 => PushErrorCode::Unavailable,
        other => PushErrorCode::Other(format!("HTTP_{}", other)),
    })
}
