use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::database::user_location_repo;
use crate::models::UserLocationRow;
use crate::services::geo::BoundingBox;

/// User locations and push tokens, as seen by the nearby-alert pipeline.
#[async_trait]
pub trait UserLocationStore: Send + Sync {
    async fn query_in_bounding_box(
        &self,
        bbox: &BoundingBox,
        exclude_user_id: Option<&str>,
    ) -> sqlx::Result<Vec<UserLocationRow>>;

    /// Clears every stored token contained in `tokens`. Idempotent.
    async fn clear_tokens(&self, tokens: &[String]) -> sqlx::Result<u64>;

    async fn load_users_by_ids(&self, user_ids: &[String]) -> sqlx::Result<Vec<UserLocationRow>>;

    async fn set_push_token(&self, user_id: &str, token: &str) -> sqlx::Result<u64>;
}

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserLocationStore for SqliteUserStore {
    async fn query_in_bounding_box(
        &self,
        bbox: &BoundingBox,
        exclude_user_id: Option<&str>,
    ) -> sqlx::Result<Vec<UserLocationRow>> {
        user_location_repo::load_users_in_bounding_box(&self.pool, bbox, exclude_user_id).await
    }

    async fn clear_tokens(&self, tokens: &[String]) -> sqlx::Result<u64> {
        user_location_repo::clear_push_tokens(&self.pool, tokens).await
    }

    async fn load_users_by_ids(&self, user_ids: &[String]) -> sqlx::Result<Vec<UserLocationRow>> {
        user_location_repo::load_users_by_ids(&self.pool, user_ids).await
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> sqlx::Result<u64> {
        user_location_repo::update_push_token(&self.pool, user_id, token).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BoxKey {
    bounds: [u64; 4],
    exclude_user_id: Option<String>,
}

impl BoxKey {
    fn new(bbox: &BoundingBox, exclude_user_id: Option<&str>) -> Self {
        Self {
            bounds: [
                bbox.lat_min.to_bits(),
                bbox.lat_max.to_bits(),
                bbox.lon_min.to_bits(),
                bbox.lon_max.to_bits(),
            ],
            exclude_user_id: exclude_user_id.map(str::to_string),
        }
    }
}

#[derive(Default)]
struct CacheState {
    // Bumped on every invalidation; a lookup that started under an older generation
    // must not store its rows.
    generation: u64,
    entries: HashMap<BoxKey, (Instant, Vec<UserLocationRow>)>,
}

/// Caches bounding-box lookups for `ttl`. Any token mutation through this store drops
/// the whole cache, and lookups that overlapped the mutation are not cached, so a
/// cleared token is never handed out again.
pub struct CachedUserLocationStore<S> {
    inner: S,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl<S: UserLocationStore> CachedUserLocationStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.entries.clear();
    }
}

#[async_trait]
impl<S: UserLocationStore> UserLocationStore for CachedUserLocationStore<S> {
    async fn query_in_bounding_box(
        &self,
        bbox: &BoundingBox,
        exclude_user_id: Option<&str>,
    ) -> sqlx::Result<Vec<UserLocationRow>> {
        let key = BoxKey::new(bbox, exclude_user_id);
        let generation = {
            let state = self.state.lock().await;
            if let Some((stored_at, rows)) = state.entries.get(&key) {
                if stored_at.elapsed() < self.ttl {
                    debug!("📍 Bounding box cache hit ({} users)", rows.len());
                    return Ok(rows.clone());
                }
            }
            state.generation
        };

        let rows = self.inner.query_in_bounding_box(bbox, exclude_user_id).await?;

        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("📍 Tokens changed during lookup, result not cached");
            return Ok(rows);
        }
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, (stored_at, _)| now.duration_since(*stored_at) < ttl);
        state.entries.insert(key, (now, rows.clone()));
        Ok(rows)
    }

    async fn clear_tokens(&self, tokens: &[String]) -> sqlx::Result<u64> {
        let updated = self.inner.clear_tokens(tokens).await;
        self.invalidate().await;
        updated
    }

    async fn load_users_by_ids(&self, user_ids: &[String]) -> sqlx::Result<Vec<UserLocationRow>> {
        self.inner.load_users_by_ids(user_ids).await
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> sqlx::Result<u64> {
        let updated = self.inner.set_push_token(user_id, token).await;
        self.invalidate().await;
        updated
    }
}

#[async_trait]
impl<S: UserLocationStore + ?Sized> UserLocationStore for Arc<S> {
    async fn query_in_bounding_box(
        &self,
        bbox: &BoundingBox,
        exclude_user_id: Option<&str>,
    ) -> sqlx::Result<Vec<UserLocationRow>> {
        (**self).query_in_bounding_box(bbox, exclude_user_id).await
    }

    async fn clear_tokens(&self, tokens: &[String]) -> sqlx::Result<u64> {
        (**self).clear_tokens(tokens).await
    }

    async fn load_users_by_ids(&self, user_ids: &[String]) -> sqlx::Result<Vec<UserLocationRow>> {
        (**self).load_users_by_ids(user_ids).await
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> sqlx::Result<u64> {
        (**self).set_push_token(user_id, token).await
    }
}
