use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ProximityError;
use crate::models::{Coordinate, DispatchOutcome, NotificationPayload};
use crate::services::notification_service::NotificationDispatcher;
use crate::services::proximity_service::ProximityFinder;

/// "Tell the neighbours about this request."
#[derive(Debug, Clone)]
pub struct NearbyAlertJob {
    pub request_id: String,
    pub requester_id: String,
    pub origin: Coordinate,
    pub radius_miles: f64,
    pub payload: NotificationPayload,
}

/// Proximity lookup followed by dispatch.
pub struct NearbyAlertPipeline {
    finder: ProximityFinder,
    dispatcher: NotificationDispatcher,
}

impl NearbyAlertPipeline {
    pub fn new(finder: ProximityFinder, dispatcher: NotificationDispatcher) -> Self {
        Self { finder, dispatcher }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub async fn run(&self, job: &NearbyAlertJob) -> Result<DispatchOutcome, ProximityError> {
        let recipients = self
            .finder
            .find_nearby(
                job.origin.latitude,
                job.origin.longitude,
                job.radius_miles,
                Some(&job.requester_id),
            )
            .await?;

        Ok(self.dispatcher.dispatch(&recipients, &job.payload).await)
    }
}

/// Sending side of the notify worker. Cheap to clone.
///
/// Delivery is at-most-once and best-effort: a job that does not fit in the queue is
/// dropped, and a job whose pipeline fails is logged and forgotten.
#[derive(Clone)]
pub struct NotifyWorkerHandle {
    tx: mpsc::Sender<NearbyAlertJob>,
}

impl NotifyWorkerHandle {
    /// Never waits. Returns whether the job was queued.
    pub fn submit(&self, job: NearbyAlertJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(
                    request_id = %job.request_id,
                    "Notify queue full, dropping nearby alert"
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(
                    request_id = %job.request_id,
                    "Notify worker stopped, dropping nearby alert"
                );
                false
            }
        }
    }
}

/// Starts the worker. It runs until every handle is dropped and the queue is drained.
pub fn spawn_notify_worker(
    pipeline: Arc<NearbyAlertPipeline>,
    capacity: usize,
) -> (NotifyWorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<NearbyAlertJob>(capacity.max(1));

    let worker = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match pipeline.run(&job).await {
                Ok(outcome) => info!(
                    request_id = %job.request_id,
                    success = outcome.success,
                    sent = outcome.success_count,
                    failed = outcome.failure_count,
                    invalid = outcome.invalid_tokens.len(),
                    "Nearby alert done: {}", outcome.message
                ),
                Err(e) => warn!(request_id = %job.request_id, "Nearby alert failed: {}", e),
            }
        }
        info!("Notify worker stopped");
    });

    (NotifyWorkerHandle { tx }, worker)
}
