use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::config::{AppConfig, PushConfig};
use crate::database;
use crate::error::{AppError, AppResult};
use crate::services::fcm_gateway::{FcmPushGateway, ServiceAccountKey};
use crate::services::notification_service::NotificationDispatcher;
use crate::services::notify_worker::NearbyAlertPipeline;
use crate::services::proximity_service::ProximityFinder;
use crate::services::push_gateway::{LoggingPushGateway, PushGateway};
use crate::services::user_store::{CachedUserLocationStore, SqliteUserStore, UserLocationStore};

/// Everything a command needs, wired once from [`AppConfig`].
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub store: Arc<dyn UserLocationStore>,
    pub pipeline: Arc<NearbyAlertPipeline>,
}

impl AppContext {
    /// Connects, migrates and builds the store, gateway and pipeline.
    pub async fn init(config: AppConfig) -> AppResult<Self> {
        let pool = database::create_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        let gateway = build_gateway(&config.push)?;
        Ok(Self::with_parts(config, pool, gateway))
    }

    /// Same wiring with a caller supplied gateway.
    pub fn with_parts(config: AppConfig, pool: SqlitePool, gateway: Arc<dyn PushGateway>) -> Self {
        let sqlite = SqliteUserStore::new(pool.clone());
        let store: Arc<dyn UserLocationStore> = if config.location_cache_ttl.is_zero() {
            Arc::new(sqlite)
        } else {
            info!(
                ttl_secs = config.location_cache_ttl.as_secs(),
                "Bounding-box cache enabled"
            );
            Arc::new(CachedUserLocationStore::new(sqlite, config.location_cache_ttl))
        };

        let finder = ProximityFinder::new(store.clone());
        let dispatcher = NotificationDispatcher::new(gateway, store.clone(), config.push.timeout);
        let pipeline = Arc::new(NearbyAlertPipeline::new(finder, dispatcher));

        Self {
            config,
            pool,
            store,
            pipeline,
        }
    }
}

fn build_gateway(push: &PushConfig) -> AppResult<Arc<dyn PushGateway>> {
    if !push.enabled {
        info!("Push delivery disabled, notifications will be logged");
        return Ok(Arc::new(LoggingPushGateway));
    }

    let (Some(project_id), Some(key_path)) = (
        push.fcm_project_id.as_deref(),
        push.fcm_service_account_path.as_deref(),
    ) else {
        return Err(AppError::Config(
            "PUSH_ENABLED requires FCM_PROJECT_ID and FCM_SERVICE_ACCOUNT_PATH".into(),
        ));
    };

    let key = ServiceAccountKey::from_file(key_path)?;
    let gateway = FcmPushGateway::new(project_id, key, push.timeout, push.max_concurrency)?;
    info!(project_id, "FCM push gateway ready");
    Ok(Arc::new(gateway))
}
