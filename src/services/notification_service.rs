use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::models::{DispatchOutcome, NotificationPayload, UserLocationRow};
use crate::services::push_gateway::{
    normalize_topic, redact_token, PushGateway, TokenSendResult, TopicAction,
};
use crate::services::user_store::UserLocationStore;

pub const NO_TOKENS_MESSAGE: &str = "no valid delivery tokens";
pub const USER_WITHOUT_TOKEN_MESSAGE: &str = "User does not have a registered push token";
pub const USER_NOT_FOUND_MESSAGE: &str = "User not found";
pub const TOKEN_REQUIRED_MESSAGE: &str = "Push token is required";
pub const INVALID_TOPIC_MESSAGE: &str = "Topic is missing or not a valid topic name";

/// Best-effort multicast push to a set of users.
///
/// Every call is a single pass over its input: users without a token are skipped, the
/// remaining tokens go to the gateway in one batch, and tokens the gateway reports as
/// permanently invalid are cleared from the store. Nothing here returns an error; all
/// failure ends up in the [`DispatchOutcome`].
pub struct NotificationDispatcher {
    gateway: Arc<dyn PushGateway>,
    store: Arc<dyn UserLocationStore>,
    gateway_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        store: Arc<dyn UserLocationStore>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            gateway_timeout,
        }
    }

    pub async fn dispatch(
        &self,
        recipients: &[UserLocationRow],
        payload: &NotificationPayload,
    ) -> DispatchOutcome {
        let (tokens, skipped) = collect_tokens(recipients);

        if tokens.is_empty() {
            info!(
                recipients = recipients.len(),
                skipped, "No push tokens among recipients, nothing sent"
            );
            return DispatchOutcome {
                skipped_without_token: skipped,
                ..DispatchOutcome::rejected(NO_TOKENS_MESSAGE)
            };
        }

        self.send_tokens(tokens, skipped, payload).await
    }

    async fn send_tokens(
        &self,
        tokens: Vec<String>,
        skipped: usize,
        payload: &NotificationPayload,
    ) -> DispatchOutcome {
        let responses = match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.send_batch(&tokens, payload),
        )
        .await
        {
            Ok(Ok(responses)) if responses.len() == tokens.len() => responses,
            Ok(Ok(responses)) => {
                let err = GatewayError::Misaligned {
                    expected: tokens.len(),
                    got: responses.len(),
                };
                return transport_failure(&tokens, skipped, err);
            }
            Ok(Err(err)) => return transport_failure(&tokens, skipped, err),
            Err(_) => {
                return transport_failure(
                    &tokens,
                    skipped,
                    GatewayError::Timeout(self.gateway_timeout),
                )
            }
        };

        let mut outcome = tally(&tokens, &responses);
        outcome.skipped_without_token = skipped;

        if !outcome.invalid_tokens.is_empty() {
            match self.store.clear_tokens(&outcome.invalid_tokens).await {
                Ok(cleared) => {
                    info!(
                        invalid = outcome.invalid_tokens.len(),
                        cleared, "Removed invalid push tokens"
                    );
                    outcome.tokens_cleared = cleared;
                }
                Err(e) => {
                    warn!(
                        invalid = outcome.invalid_tokens.len(),
                        "Failed to clear invalid push tokens: {}", e
                    );
                }
            }
        }

        info!(
            success = outcome.success_count,
            failed = outcome.failure_count,
            skipped,
            "Push dispatch finished"
        );
        outcome
    }

    pub async fn dispatch_to_user_ids(
        &self,
        user_ids: &[String],
        payload: &NotificationPayload,
    ) -> DispatchOutcome {
        let users = match self.store.load_users_by_ids(user_ids).await {
            Ok(users) => users,
            Err(e) => {
                warn!("Failed to load notification recipients: {}", e);
                return DispatchOutcome::rejected(format!("Failed to load recipients: {}", e));
            }
        };
        self.dispatch(&users, payload).await
    }

    pub async fn dispatch_to_user(
        &self,
        user_id: &str,
        payload: &NotificationPayload,
    ) -> DispatchOutcome {
        let users = match self.store.load_users_by_ids(&[user_id.to_string()]).await {
            Ok(users) => users,
            Err(e) => {
                warn!(user_id, "Failed to load notification recipient: {}", e);
                return DispatchOutcome::rejected(format!("Failed to load recipient: {}", e));
            }
        };

        let Some(user) = users.into_iter().next() else {
            return DispatchOutcome::rejected(USER_NOT_FOUND_MESSAGE);
        };
        if user.push_token().is_none() {
            warn!(user_id, "No push token found for user");
            return DispatchOutcome {
                skipped_without_token: 1,
                ..DispatchOutcome::rejected(USER_WITHOUT_TOKEN_MESSAGE)
            };
        }
        self.dispatch(std::slice::from_ref(&user), payload).await
    }

    /// Sends to a token the caller already has, registered to a user or not. A token the
    /// gateway reports dead is still cleared from the store.
    pub async fn send_to_token(&self, token: &str, payload: &NotificationPayload) -> DispatchOutcome {
        let token = token.trim();
        if token.is_empty() {
            return DispatchOutcome::rejected(TOKEN_REQUIRED_MESSAGE);
        }
        self.send_tokens(vec![token.to_string()], 0, payload).await
    }

    pub async fn send_to_topic(&self, topic: &str, payload: &NotificationPayload) -> DispatchOutcome {
        let Some(topic) = normalize_topic(topic) else {
            return DispatchOutcome::rejected(INVALID_TOPIC_MESSAGE);
        };

        let sent = match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.send_to_topic(topic, payload),
        )
        .await
        {
            Ok(sent) => sent,
            Err(_) => Err(GatewayError::Timeout(self.gateway_timeout)),
        };

        match sent {
            Ok(message_id) => {
                info!(topic, "Topic notification sent");
                DispatchOutcome {
                    success: true,
                    message: "Notification sent successfully to topic".to_string(),
                    success_count: 1,
                    message_id,
                    ..Default::default()
                }
            }
            Err(err) => {
                warn!(topic, "Topic notification failed: {}", err);
                DispatchOutcome {
                    failure_count: 1,
                    ..DispatchOutcome::rejected(format!("Failed to send notification: {}", err))
                }
            }
        }
    }

    pub async fn subscribe_to_topic(&self, token: &str, topic: &str) -> DispatchOutcome {
        self.update_topic(token, topic, TopicAction::Subscribe).await
    }

    pub async fn unsubscribe_from_topic(&self, token: &str, topic: &str) -> DispatchOutcome {
        self.update_topic(token, topic, TopicAction::Unsubscribe).await
    }

    async fn update_topic(&self, token: &str, topic: &str, action: TopicAction) -> DispatchOutcome {
        let token = token.trim();
        if token.is_empty() {
            return DispatchOutcome::rejected(TOKEN_REQUIRED_MESSAGE);
        }
        let Some(topic) = normalize_topic(topic) else {
            return DispatchOutcome::rejected(INVALID_TOPIC_MESSAGE);
        };
        let (done, failed) = match action {
            TopicAction::Subscribe => ("Successfully subscribed to topic", "Failed to subscribe"),
            TopicAction::Unsubscribe => {
                ("Successfully unsubscribed from topic", "Failed to unsubscribe")
            }
        };

        let tokens = vec![token.to_string()];
        let answer = match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.update_topic_membership(topic, &tokens, action),
        )
        .await
        {
            Ok(answer) => answer,
            Err(_) => Err(GatewayError::Timeout(self.gateway_timeout)),
        };

        match answer {
            Ok(results) if results.iter().any(|r| r.success) => {
                info!(topic, token = %redact_token(token), "Topic {} done", action.as_str());
                DispatchOutcome {
                    success: true,
                    message: done.to_string(),
                    success_count: 1,
                    ..Default::default()
                }
            }
            Ok(results) => {
                let code = results
                    .first()
                    .and_then(|r| r.error_code.as_ref())
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                warn!(topic, token = %redact_token(token), error_code = %code, "Topic {} refused", action.as_str());
                DispatchOutcome {
                    failure_count: 1,
                    ..DispatchOutcome::rejected(format!("{} to topic: {}", failed, code))
                }
            }
            Err(err) => {
                warn!(topic, "Topic {} failed: {}", action.as_str(), err);
                DispatchOutcome {
                    failure_count: 1,
                    ..DispatchOutcome::rejected(format!("{}: {}", failed, err))
                }
            }
        }
    }
}

/// Usable tokens in first-seen order (duplicates dropped) and the number of users
/// skipped for having none.
fn collect_tokens(recipients: &[UserLocationRow]) -> (Vec<String>, usize) {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    let mut skipped = 0;
    for user in recipients {
        match user.push_token() {
            Some(token) => {
                if seen.insert(token) {
                    tokens.push(token.to_string());
                }
            }
            None => {
                debug!(user_id = %user.user_id, "Skipping user without push token");
                skipped += 1;
            }
        }
    }
    (tokens, skipped)
}

/// Walks the responses by index; `responses[i]` answers `tokens[i]`.
fn tally(tokens: &[String], responses: &[TokenSendResult]) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        success: true,
        ..Default::default()
    };

    for (token, response) in tokens.iter().zip(responses) {
        if response.success {
            outcome.success_count += 1;
            continue;
        }

        outcome.failure_count += 1;
        let permanent = response
            .error_code
            .as_ref()
            .map(|c| c.is_permanent())
            .unwrap_or(false);
        warn!(
            token = %redact_token(token),
            error_code = response.error_code.as_ref().map(|c| c.as_str()).unwrap_or("UNKNOWN"),
            permanent,
            "Push delivery failed"
        );
        if permanent {
            outcome.invalid_tokens.push(token.clone());
        }
    }

    outcome.message = format!(
        "Notifications sent. Success: {}, Failed: {}",
        outcome.success_count, outcome.failure_count
    );
    if let [only] = responses {
        outcome.message_id = only.message_id.clone();
    }
    outcome
}

/// The whole batch failed; no token is assumed delivered and none is marked invalid.
fn transport_failure(tokens: &[String], skipped: usize, err: GatewayError) -> DispatchOutcome {
    warn!(tokens = tokens.len(), "Push gateway call failed: {}", err);
    DispatchOutcome {
        success: false,
        message: format!("Failed to send notifications: {}", err),
        success_count: 0,
        failure_count: tokens.len(),
        invalid_tokens: Vec::new(),
        skipped_without_token: skipped,
        tokens_cleared: 0,
        message_id: None,
    }
}
