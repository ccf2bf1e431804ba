use sqlx::SqlitePool;

use crate::models::HelpRequestRow;

pub struct NewHelpRequestRecord<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub category: Option<&'a str>,
    pub reward: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: &'a str,
    pub urgency: &'a str,
    pub created_at: &'a str,
}

const SQL_INSERT_HELP_REQUEST: &str = r#"
INSERT INTO requests (
  id,
  user_id,
  title,
  description,
  category,
  reward,
  latitude,
  longitude,
  status,
  urgency,
  created_at,
  updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
"#;

pub async fn insert_help_request(
    pool: &SqlitePool,
    rec: NewHelpRequestRecord<'_>,
) -> sqlx::Result<()> {
    sqlx::query(SQL_INSERT_HELP_REQUEST)
        .bind(rec.id)
        .bind(rec.user_id)
        .bind(rec.title)
        .bind(rec.description)
        .bind(rec.category)
        .bind(rec.reward)
        .bind(rec.latitude)
        .bind(rec.longitude)
        .bind(rec.status)
        .bind(rec.urgency)
        .bind(rec.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub const SQL_LOAD_HELP_REQUEST: &str = r#"
SELECT
    id,
    user_id,
    title,
    description,
    category,
    reward,
    latitude,
    longitude,
    status,
    urgency,
    created_at,
    updated_at
FROM requests
WHERE id = ?1
LIMIT 1
"#;

pub async fn load_help_request(
    pool: &SqlitePool,
    request_id: &str,
) -> sqlx::Result<Option<HelpRequestRow>> {
    sqlx::query_as::<_, HelpRequestRow>(SQL_LOAD_HELP_REQUEST)
        .bind(request_id)
        .fetch_optional(pool)
        .await
}
