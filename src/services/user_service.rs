use tracing::info;

use crate::error::{AppError, AppResult};
use crate::services::push_gateway::redact_token;
use crate::services::user_store::UserLocationStore;

/// Stores (or replaces) the push token a device registered for `user_id`.
pub async fn register_push_token(
    store: &dyn UserLocationStore,
    user_id: &str,
    token: &str,
) -> AppResult<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Validation("push token is required".into()));
    }

    let updated = store.set_push_token(user_id, token).await?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("user {}", user_id)));
    }

    info!(user_id, token = %redact_token(token), "Push token registered");
    Ok(())
}
