use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::services::geo::NEARBY_RADIUS_MILES;

/// Push delivery settings. With `enabled = false` notifications are only logged.
#[derive(Clone, Debug)]
pub struct PushConfig {
    pub enabled: bool,
    pub fcm_project_id: Option<String>,
    pub fcm_service_account_path: Option<String>,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub nearby_radius_miles: f64,
    pub notify_queue_capacity: usize,
    /// Zero disables the bounding-box cache.
    pub location_cache_ttl: Duration,
    pub push: PushConfig,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL must be set".to_string()))?;

        let nearby_radius_miles = parse_or(&lookup, "NEARBY_RADIUS_MILES", NEARBY_RADIUS_MILES)?;
        if !nearby_radius_miles.is_finite() || nearby_radius_miles <= 0.0 {
            return Err(AppError::Config(format!(
                "NEARBY_RADIUS_MILES must be positive, got {}",
                nearby_radius_miles
            )));
        }

        let notify_queue_capacity: usize = parse_or(&lookup, "NOTIFY_QUEUE_CAPACITY", 256)?;
        if notify_queue_capacity == 0 {
            return Err(AppError::Config(
                "NOTIFY_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let location_cache_ttl =
            Duration::from_secs(parse_or(&lookup, "LOCATION_CACHE_TTL_SECS", 0)?);

        let push = PushConfig {
            enabled: parse_or(&lookup, "PUSH_ENABLED", false)?,
            fcm_project_id: lookup("FCM_PROJECT_ID").filter(|v| !v.trim().is_empty()),
            fcm_service_account_path: lookup("FCM_SERVICE_ACCOUNT_PATH")
                .filter(|v| !v.trim().is_empty()),
            timeout: Duration::from_secs(parse_or(&lookup, "FCM_TIMEOUT_SECS", 10)?),
            max_concurrency: parse_or::<usize, _>(&lookup, "FCM_MAX_CONCURRENCY", 32)?.max(1),
        };

        if push.timeout.is_zero() {
            return Err(AppError::Config(
                "FCM_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        if push.enabled
            && (push.fcm_project_id.is_none() || push.fcm_service_account_path.is_none())
        {
            return Err(AppError::Config(
                "PUSH_ENABLED=true requires FCM_PROJECT_ID and FCM_SERVICE_ACCOUNT_PATH"
                    .to_string(),
            ));
        }

        Ok(Self {
            database_url,
            nearby_radius_miles,
            notify_queue_capacity,
            location_cache_ttl,
            push,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppResult<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = config_from(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
        assert_eq!(config.nearby_radius_miles, 10.0);
        assert_eq!(config.notify_queue_capacity, 256);
        assert_eq!(config.location_cache_ttl, Duration::ZERO);
        assert!(!config.push.enabled);
        assert_eq!(config.push.timeout, Duration::from_secs(10));
        assert_eq!(config.push.max_concurrency, 32);
    }

    #[test]
    fn zero_gateway_timeout_is_rejected() {
        let err = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("FCM_TIMEOUT_SECS", "0")])
            .unwrap_err();
        assert!(err.to_string().contains("FCM_TIMEOUT_SECS"));

        let config = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("FCM_TIMEOUT_SECS", "3")])
            .unwrap();
        assert_eq!(config.push.timeout, Duration::from_secs(3));
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn push_enabled_requires_fcm_settings() {
        let err = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("PUSH_ENABLED", "true")])
            .unwrap_err();
        assert!(err.to_string().contains("FCM_PROJECT_ID"));

        let config = config_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PUSH_ENABLED", "true"),
            ("FCM_PROJECT_ID", "helpnearby-dev"),
            ("FCM_SERVICE_ACCOUNT_PATH", "/etc/helpnearby/fcm.json"),
        ])
        .unwrap();
        assert!(config.push.enabled);
    }

    #[test]
    fn radius_must_be_positive() {
        let err = config_from(&[("DATABASE_URL", "sqlite::memory:"), ("NEARBY_RADIUS_MILES", "0")])
            .unwrap_err();
        assert!(err.to_string().contains("NEARBY_RADIUS_MILES"));

        let err = config_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("NEARBY_RADIUS_MILES", "ten"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("invalid value"));
    }
}
