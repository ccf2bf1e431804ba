use std::time::Duration;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Rejected coordinates or radius. Raised before any lookup happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    #[error("radius {0} must be a positive number of miles")]
    Radius(f64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("notification title must not be empty")]
    EmptyTitle,

    #[error("notification body must not be empty")]
    EmptyBody,
}

#[derive(Error, Debug)]
pub enum ProximityError {
    #[error(transparent)]
    Invalid(#[from] GeoError),

    #[error("user location lookup failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// Failure of a whole gateway call. Per-token failures are not errors; they
/// travel inside the response list.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("push gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("push gateway transport error: {0}")]
    Transport(String),

    #[error("push gateway authentication failed: {0}")]
    Auth(String),

    #[error("push gateway returned {got} responses for {expected} tokens")]
    Misaligned { expected: usize, got: usize },

    #[error("push gateway configuration error: {0}")]
    Config(String),

    #[error("push gateway rejected the message: {0}")]
    Rejected(String),

    #[error("{0} is not supported by this push gateway")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Service-boundary error for the request workflow and the CLI.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: {0}")]
    Geo(#[from] GeoError),

    #[error("Validation error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Nearby lookup failed: {0}")]
    Proximity(#[from] ProximityError),

    #[error("Push gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::Geo(_) | AppError::Payload(_)
        )
    }
}
