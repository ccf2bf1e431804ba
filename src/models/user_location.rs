use serde::Serialize;

// Row for proximity lookups and push fan-out (users + computed distance).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct UserLocationRow {
    pub user_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing)]
    pub fcm_token: Option<String>,
    #[sqlx(skip)]
    pub distance_miles: Option<f64>,
}

impl UserLocationRow {
    /// The stored push token, if it is usable. Blank tokens count as absent.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
