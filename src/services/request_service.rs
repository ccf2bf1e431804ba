use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::help_request_repo;
use crate::error::{AppError, AppResult, PayloadError};
use crate::models::help_request::{STATUS_OPEN, URGENCY_DEFAULT, URGENCY_LEVELS};
use crate::models::{Coordinate, HelpRequestRow, NewHelpRequest, NotificationPayload};
use crate::services::notify_worker::{NearbyAlertJob, NotifyWorkerHandle};

pub const NEARBY_ALERT_TITLE: &str = "Your neighbor nearby needs help";
pub const NEARBY_ALERT_BODY: &str = "New Help Requested";

/// Stores a new help request and queues the nearby alert for it.
///
/// The alert runs on the notify worker; whatever happens there, the created request is
/// returned.
pub async fn create_help_request(
    pool: &SqlitePool,
    notifier: &NotifyWorkerHandle,
    owner_id: &str,
    input: NewHelpRequest,
    radius_miles: f64,
) -> AppResult<HelpRequestRow> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(AppError::Validation("owner id is required".into()));
    }
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".into()));
    }
    let origin = Coordinate::new(input.latitude, input.longitude)?;
    let urgency = normalize_urgency(input.urgency.as_deref())?;

    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    help_request_repo::insert_help_request(
        pool,
        help_request_repo::NewHelpRequestRecord {
            id: &id,
            user_id: owner_id,
            title,
            description: input.description.as_deref(),
            category: input.category.as_deref(),
            reward: input.reward,
            latitude: origin.latitude,
            longitude: origin.longitude,
            status: STATUS_OPEN,
            urgency: &urgency,
            created_at: &created_at,
        },
    )
    .await?;

    let request = help_request_repo::load_help_request(pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", id)))?;

    notifier.submit(NearbyAlertJob {
        request_id: request.id.clone(),
        requester_id: request.user_id.clone(),
        origin,
        radius_miles,
        payload: nearby_alert_payload(&request)?,
    });

    Ok(request)
}

pub async fn load_help_request(pool: &SqlitePool, request_id: &str) -> AppResult<HelpRequestRow> {
    help_request_repo::load_help_request(pool, request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", request_id)))
}

/// Job for an already stored request, e.g. to re-run the alert by hand.
pub fn nearby_alert_job(request: &HelpRequestRow, radius_miles: f64) -> AppResult<NearbyAlertJob> {
    Ok(NearbyAlertJob {
        request_id: request.id.clone(),
        requester_id: request.user_id.clone(),
        origin: request.coordinate()?,
        radius_miles,
        payload: nearby_alert_payload(request)?,
    })
}

pub fn nearby_alert_payload(request: &HelpRequestRow) -> Result<NotificationPayload, PayloadError> {
    Ok(NotificationPayload::new(NEARBY_ALERT_TITLE, NEARBY_ALERT_BODY)?
        .with_data("request_id", request.id.as_str())
        .with_data("type", "NEW_REQUEST"))
}

fn normalize_urgency(raw: Option<&str>) -> AppResult<String> {
    let urgency = raw
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| URGENCY_DEFAULT.to_string());
    if !URGENCY_LEVELS.contains(&urgency.as_str()) {
        return Err(AppError::Validation(format!(
            "urgency must be one of {:?}",
            URGENCY_LEVELS
        )));
    }
    Ok(urgency)
}
