use sqlx::{sqlite::SqliteArguments, Arguments, SqlitePool};

use crate::models::UserLocationRow;
use crate::services::geo::BoundingBox;

// SQLite's default host-parameter limit is 999; stay well below it.
const MAX_BINDS_PER_STATEMENT: usize = 500;

pub const SQL_USER_LOCATION_BASE: &str = r#"
SELECT
    id AS user_id,
    name,
    latitude,
    longitude,
    fcm_token
FROM users
"#;

pub async fn load_users_in_bounding_box(
    pool: &SqlitePool,
    bbox: &BoundingBox,
    exclude_user_id: Option<&str>,
) -> sqlx::Result<Vec<UserLocationRow>> {
    let mut sql = String::from(SQL_USER_LOCATION_BASE);
    let mut args = SqliteArguments::default();

    sql.push_str(" WHERE latitude BETWEEN ? AND ?");
    args.add(bbox.lat_min);
    args.add(bbox.lat_max);

    if bbox.prunes_longitude() {
        sql.push_str(" AND longitude BETWEEN ? AND ?");
        args.add(bbox.lon_min);
        args.add(bbox.lon_max);
    }

    if let Some(user_id) = exclude_user_id {
        sql.push_str(" AND id != ?");
        args.add(user_id);
    }

    sqlx::query_as_with::<_, UserLocationRow, _>(&sql, args)
        .fetch_all(pool)
        .await
}

pub async fn load_users_by_ids(
    pool: &SqlitePool,
    user_ids: &[String],
) -> sqlx::Result<Vec<UserLocationRow>> {
    let mut rows = Vec::with_capacity(user_ids.len());
    for chunk in user_ids.chunks(MAX_BINDS_PER_STATEMENT) {
        let sql = format!(
            "{} WHERE id IN ({})",
            SQL_USER_LOCATION_BASE,
            placeholders(chunk.len())
        );
        let mut query = sqlx::query_as::<_, UserLocationRow>(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        rows.extend(query.fetch_all(pool).await?);
    }
    Ok(rows)
}

/// Nulls every stored token that appears in `tokens`. Already-cleared tokens simply
/// match nothing, so repeating the call is harmless.
pub async fn clear_push_tokens(pool: &SqlitePool, tokens: &[String]) -> sqlx::Result<u64> {
    if tokens.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for chunk in tokens.chunks(MAX_BINDS_PER_STATEMENT) {
        let sql = format!(
            "UPDATE users SET fcm_token = NULL WHERE fcm_token IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for token in chunk {
            query = query.bind(token);
        }
        updated += query.execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

const SQL_UPDATE_PUSH_TOKEN: &str = r#"
UPDATE users
SET fcm_token = ?
WHERE id = ?
"#;

pub async fn update_push_token(
    pool: &SqlitePool,
    user_id: &str,
    token: &str,
) -> sqlx::Result<u64> {
    let res = sqlx::query(SQL_UPDATE_PUSH_TOKEN)
        .bind(token)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
