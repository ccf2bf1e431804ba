use serde::{Deserialize, Serialize};

use crate::error::GeoError;
use crate::models::Coordinate;

pub const STATUS_OPEN: &str = "OPEN";
pub const URGENCY_DEFAULT: &str = "MEDIUM";
pub const URGENCY_LEVELS: [&str; 3] = ["LOW", "MEDIUM", "URGENT"];

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HelpRequestRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub reward: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: String, // OPEN|INPROGRESS|CLOSED
    pub urgency: String, // LOW|MEDIUM|URGENT
    pub created_at: String,
    pub updated_at: String,
}

impl HelpRequestRow {
    pub fn coordinate(&self) -> Result<Coordinate, GeoError> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Client input for a new help request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewHelpRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub reward: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub urgency: Option<String>,
}
