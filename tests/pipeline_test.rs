use std::sync::Arc;

use helpnearby::config::AppConfig;
use helpnearby::context::AppContext;
use helpnearby::error::AppError;
use helpnearby::models::NewHelpRequest;
use helpnearby::services::notify_worker::spawn_notify_worker;
use helpnearby::services::push_gateway::PushGateway;
use helpnearby::services::{request_service, user_service};

mod test_utils;
use test_utils::{insert_user, setup_pool, stored_token, RecordingGateway};

async fn context(gateway: Arc<RecordingGateway>) -> AppContext {
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        _ => None,
    })
    .unwrap();
    let pool = setup_pool().await;
    let gateway: Arc<dyn PushGateway> = gateway;
    AppContext::with_parts(config, pool, gateway)
}

fn request_at(lat: f64, lon: f64) -> NewHelpRequest {
    NewHelpRequest {
        title: "Need a ladder".to_string(),
        description: Some("Gutter cleaning, two hours".to_string()),
        latitude: lat,
        longitude: lon,
        ..Default::default()
    }
}

#[tokio::test]
async fn created_request_alerts_neighbours_but_not_the_owner() {
    let gateway = Arc::new(RecordingGateway::new());
    let ctx = context(gateway.clone()).await;
    insert_user(&ctx.pool, "owner", 40.0, -74.0, Some("owner-token")).await;
    insert_user(&ctx.pool, "neighbour", 40.05, -74.0, Some("neighbour-token")).await;
    insert_user(&ctx.pool, "stranger", 41.0, -74.0, Some("stranger-token")).await;

    let (notifier, worker) = spawn_notify_worker(ctx.pipeline.clone(), 8);
    let request = request_service::create_help_request(
        &ctx.pool,
        &notifier,
        "owner",
        request_at(40.0, -74.0),
        ctx.config.nearby_radius_miles,
    )
    .await
    .unwrap();

    assert_eq!(request.user_id, "owner");
    assert_eq!(request.status, "OPEN");
    assert_eq!(request.urgency, "MEDIUM");
    assert_eq!(request.title, "Need a ladder");

    drop(notifier);
    worker.await.unwrap();

    assert_eq!(gateway.calls(), vec![vec!["neighbour-token"]]);
}

#[tokio::test]
async fn invalid_request_is_rejected_and_nothing_is_sent() {
    let gateway = Arc::new(RecordingGateway::new());
    let ctx = context(gateway.clone()).await;
    let (notifier, worker) = spawn_notify_worker(ctx.pipeline.clone(), 8);

    let mut blank_title = request_at(40.0, -74.0);
    blank_title.title = "   ".to_string();
    let err = request_service::create_help_request(&ctx.pool, &notifier, "owner", blank_title, 10.0)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = request_service::create_help_request(
        &ctx.pool,
        &notifier,
        "owner",
        request_at(95.0, -74.0),
        10.0,
    )
    .await
    .unwrap_err();
    assert!(err.is_validation());

    drop(notifier);
    worker.await.unwrap();
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn alert_payload_carries_request_id_and_type() {
    let gateway = Arc::new(RecordingGateway::new());
    let ctx = context(gateway).await;
    let (notifier, _worker) = spawn_notify_worker(ctx.pipeline.clone(), 8);

    let request = request_service::create_help_request(
        &ctx.pool,
        &notifier,
        "owner",
        request_at(52.37, 4.89),
        10.0,
    )
    .await
    .unwrap();

    let payload = request_service::nearby_alert_payload(&request).unwrap();
    assert_eq!(payload.title(), "Your neighbor nearby needs help");
    assert_eq!(payload.body(), "New Help Requested");
    assert_eq!(payload.data().get("request_id"), Some(&request.id));
    assert_eq!(payload.data().get("type").map(String::as_str), Some("NEW_REQUEST"));

    let loaded = request_service::load_help_request(&ctx.pool, &request.id)
        .await
        .unwrap();
    assert_eq!(loaded, request);
}

#[tokio::test]
async fn notify_nearby_can_be_rerun_for_a_stored_request() {
    let gateway = Arc::new(RecordingGateway::new());
    let ctx = context(gateway.clone()).await;
    insert_user(&ctx.pool, "neighbour", 40.01, -74.0, Some("neighbour-token")).await;
    let (notifier, worker) = spawn_notify_worker(ctx.pipeline.clone(), 8);
    let request = request_service::create_help_request(
        &ctx.pool,
        &notifier,
        "owner",
        request_at(40.0, -74.0),
        10.0,
    )
    .await
    .unwrap();
    drop(notifier);
    worker.await.unwrap();

    let job = request_service::nearby_alert_job(&request, 10.0).unwrap();
    let outcome = ctx.pipeline.run(&job).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(gateway.calls().len(), 2);
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let ctx = context(Arc::new(RecordingGateway::new())).await;
    let err = request_service::load_help_request(&ctx.pool, "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn registered_token_is_stored_for_known_users_only() {
    let ctx = context(Arc::new(RecordingGateway::new())).await;
    insert_user(&ctx.pool, "u1", 40.0, -74.0, None).await;

    user_service::register_push_token(ctx.store.as_ref(), "u1", "  fresh-token ")
        .await
        .unwrap();
    assert_eq!(stored_token(&ctx.pool, "u1").await.as_deref(), Some("fresh-token"));

    let err = user_service::register_push_token(ctx.store.as_ref(), "u1", "   ")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = user_service::register_push_token(ctx.store.as_ref(), "ghost", "token")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn submit_never_waits_on_a_full_or_stopped_worker() {
    let ctx = context(Arc::new(RecordingGateway::new())).await;
    let stored = {
        let (notifier, worker) = spawn_notify_worker(ctx.pipeline.clone(), 8);
        let request = request_service::create_help_request(
            &ctx.pool,
            &notifier,
            "owner",
            request_at(40.0, -74.0),
            10.0,
        )
        .await
        .unwrap();
        drop(notifier);
        worker.await.unwrap();
        request
    };
    let job = request_service::nearby_alert_job(&stored, 10.0).unwrap();

    // Single-threaded test runtime: the worker cannot drain before we yield.
    let (notifier, worker) = spawn_notify_worker(ctx.pipeline.clone(), 1);
    assert!(notifier.submit(job.clone()));
    assert!(!notifier.submit(job.clone()));

    worker.abort();
    let _ = worker.await;
    assert!(!notifier.submit(job));
}
