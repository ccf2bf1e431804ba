#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use helpnearby::database;
use helpnearby::error::GatewayError;
use helpnearby::models::{NotificationPayload, UserLocationRow};
use helpnearby::services::geo::BoundingBox;
use helpnearby::services::push_gateway::{
    PushErrorCode, PushGateway, TokenSendResult, TopicAction,
};
use helpnearby::services::user_store::UserLocationStore;

pub async fn setup_pool() -> SqlitePool {
    let pool = database::create_pool("sqlite::memory:")
        .await
        .expect("in-memory pool");
    database::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn insert_user(pool: &SqlitePool, id: &str, lat: f64, lon: f64, token: Option<&str>) {
    sqlx::query("INSERT INTO users (id, name, latitude, longitude, fcm_token) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(format!("User {}", id))
        .bind(lat)
        .bind(lon)
        .bind(token)
        .execute(pool)
        .await
        .expect("insert user");
}

pub async fn stored_token(pool: &SqlitePool, id: &str) -> Option<String> {
    sqlx::query_scalar::<_, Option<String>>("SELECT fcm_token FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("user row")
}

pub fn user(id: &str, token: Option<&str>) -> UserLocationRow {
    UserLocationRow {
        user_id: id.to_string(),
        name: None,
        latitude: 40.0,
        longitude: -74.0,
        fcm_token: token.map(str::to_string),
        distance_miles: None,
    }
}

pub fn payload() -> NotificationPayload {
    NotificationPayload::new("Your neighbor nearby needs help", "New Help Requested")
        .expect("payload")
}

pub enum GatewayMode {
    Answer,
    Fail,
    Hang(Duration),
    DropLast,
}

/// Records every batch and answers per token: tokens listed in `failures` fail with
/// their code, the rest are delivered.
pub struct RecordingGateway {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub topic_calls: Mutex<Vec<String>>,
    pub membership_calls: Mutex<Vec<(String, Vec<String>, TopicAction)>>,
    failures: HashMap<String, PushErrorCode>,
    mode: GatewayMode,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::with_mode(GatewayMode::Answer)
    }

    pub fn with_mode(mode: GatewayMode) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            topic_calls: Mutex::new(Vec::new()),
            membership_calls: Mutex::new(Vec::new()),
            failures: HashMap::new(),
            mode,
        }
    }

    pub fn failing(mut self, token: &str, code: PushErrorCode) -> Self {
        self.failures.insert(token.to_string(), code);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn topic_calls(&self) -> Vec<String> {
        self.topic_calls.lock().unwrap().clone()
    }

    pub fn membership_calls(&self) -> Vec<(String, Vec<String>, TopicAction)> {
        self.membership_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        _payload: &NotificationPayload,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        self.calls.lock().unwrap().push(tokens.to_vec());

        match self.mode {
            GatewayMode::Fail => return Err(GatewayError::Transport("connection reset".into())),
            GatewayMode::Hang(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let mut results: Vec<TokenSendResult> = tokens
            .iter()
            .map(|t| match self.failures.get(t) {
                Some(code) => TokenSendResult::failed(t.clone(), code.clone()),
                None => TokenSendResult::delivered(t.clone(), Some(format!("msg-{}", t))),
            })
            .collect();
        if matches!(self.mode, GatewayMode::DropLast) {
            results.pop();
        }
        Ok(results)
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        _payload: &NotificationPayload,
    ) -> Result<Option<String>, GatewayError> {
        self.topic_calls.lock().unwrap().push(topic.to_string());
        match self.mode {
            GatewayMode::Fail => Err(GatewayError::Transport("connection reset".into())),
            GatewayMode::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            _ => Ok(Some(format!("projects/test/messages/{}", topic))),
        }
    }

    async fn update_topic_membership(
        &self,
        topic: &str,
        tokens: &[String],
        action: TopicAction,
    ) -> Result<Vec<TokenSendResult>, GatewayError> {
        self.membership_calls
            .lock()
            .unwrap()
            .push((topic.to_string(), tokens.to_vec(), action));
        if matches!(self.mode, GatewayMode::Fail) {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(tokens
            .iter()
            .map(|t| match self.failures.get(t) {
                Some(code) => TokenSendResult::failed(t.clone(), code.clone()),
                None => TokenSendResult::delivered(t.clone(), None),
            })
            .collect())
    }
}

/// In-memory store that records `clear_tokens` calls.
#[derive(Default)]
pub struct MemoryStore {
    pub users: Mutex<Vec<UserLocationRow>>,
    pub clear_calls: Mutex<Vec<Vec<String>>>,
    fail_clear: bool,
}

impl MemoryStore {
    pub fn with_users(users: Vec<UserLocationRow>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Default::default()
        }
    }

    /// `clear_tokens` records the call and then fails.
    pub fn failing_clear(mut self) -> Self {
        self.fail_clear = true;
        self
    }

    pub fn clear_calls(&self) -> Vec<Vec<String>> {
        self.clear_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserLocationStore for MemoryStore {
    async fn query_in_bounding_box(
        &self,
        bbox: &BoundingBox,
        exclude_user_id: Option<&str>,
    ) -> sqlx::Result<Vec<UserLocationRow>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| bbox.contains(u.latitude, u.longitude))
            .filter(|u| exclude_user_id != Some(u.user_id.as_str()))
            .cloned()
            .collect())
    }

    async fn clear_tokens(&self, tokens: &[String]) -> sqlx::Result<u64> {
        self.clear_calls.lock().unwrap().push(tokens.to_vec());
        if self.fail_clear {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let mut cleared = 0;
        for user in self.users.lock().unwrap().iter_mut() {
            if user.fcm_token.as_ref().is_some_and(|t| tokens.contains(t)) {
                user.fcm_token = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn load_users_by_ids(&self, user_ids: &[String]) -> sqlx::Result<Vec<UserLocationRow>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| user_ids.contains(&u.user_id))
            .cloned()
            .collect())
    }

    async fn set_push_token(&self, user_id: &str, token: &str) -> sqlx::Result<u64> {
        let mut updated = 0;
        for user in self.users.lock().unwrap().iter_mut() {
            if user.user_id == user_id {
                user.fcm_token = Some(token.to_string());
                updated += 1;
            }
        }
        Ok(updated)
    }
}
