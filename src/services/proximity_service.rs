use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::error::ProximityError;
use crate::models::{Coordinate, UserLocationRow};
use crate::services::geo::{self, BoundingBox};
use crate::services::user_store::UserLocationStore;

/// Finds the users whose last known location lies within a radius of a point.
///
/// Two phases: a bounding-box query against the store (cheap, index friendly), then the
/// exact great-circle distance for each candidate in memory.
#[derive(Clone)]
pub struct ProximityFinder {
    store: Arc<dyn UserLocationStore>,
}

impl ProximityFinder {
    pub fn new(store: Arc<dyn UserLocationStore>) -> Self {
        Self { store }
    }

    /// Users within `radius_miles` of the origin, nearest first, each with
    /// `distance_miles` set. `exclude_user_id` (the requester) is never returned; an
    /// empty id excludes nobody.
    pub async fn find_nearby(
        &self,
        origin_lat: f64,
        origin_lon: f64,
        radius_miles: f64,
        exclude_user_id: Option<&str>,
    ) -> Result<Vec<UserLocationRow>, ProximityError> {
        let origin = Coordinate::new(origin_lat, origin_lon)?;
        let radius_miles = geo::validate_radius(radius_miles)?;
        let exclude_user_id = exclude_user_id.filter(|id| !id.is_empty());

        let bbox = BoundingBox::around(origin, radius_miles);
        let candidates = self
            .store
            .query_in_bounding_box(&bbox, exclude_user_id)
            .await?;
        let candidate_count = candidates.len();

        let users = refine_to_radius(origin, radius_miles, exclude_user_id, candidates);

        info!(
            "📍 Nearby lookup ({:.4}, {:.4}) r={}mi: candidates={}, within_radius={}",
            origin.latitude,
            origin.longitude,
            radius_miles,
            candidate_count,
            users.len()
        );

        Ok(users)
    }
}

/// Exact-distance filter over bounding-box candidates. Also drops the excluded user and
/// duplicate ids in case the store returned them.
pub fn refine_to_radius(
    origin: Coordinate,
    radius_miles: f64,
    exclude_user_id: Option<&str>,
    candidates: Vec<UserLocationRow>,
) -> Vec<UserLocationRow> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();

    for mut user in candidates {
        if exclude_user_id == Some(user.user_id.as_str()) {
            continue;
        }
        let Ok(position) = Coordinate::new(user.latitude, user.longitude) else {
            continue;
        };
        let dist = geo::great_circle_miles(origin, position);
        if dist > radius_miles {
            continue;
        }
        if !seen.insert(user.user_id.clone()) {
            continue;
        }
        user.distance_miles = Some(dist);
        users.push(user);
    }

    users.sort_by(|a, b| {
        a.distance_miles
            .unwrap_or(f64::MAX)
            .partial_cmp(&b.distance_miles.unwrap_or(f64::MAX))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, lat: f64, lon: f64) -> UserLocationRow {
        UserLocationRow {
            user_id: id.to_string(),
            name: None,
            latitude: lat,
            longitude: lon,
            fcm_token: None,
            distance_miles: None,
        }
    }

    fn origin() -> Coordinate {
        Coordinate::new(40.0, -74.0).unwrap()
    }

    #[test]
    fn keeps_candidates_inside_radius_sorted_by_distance() {
        let users = refine_to_radius(
            origin(),
            10.0,
            None,
            vec![
                user("far", 40.2, -74.0),
                user("near", 40.05, -74.0),
                user("here", 40.0, -74.0),
            ],
        );
        let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["here", "near"]);
        assert!(users[0].distance_miles.unwrap() < 1e-3);
        assert!((users[1].distance_miles.unwrap() - 3.455).abs() < 0.01);
    }

    #[test]
    fn excluded_user_is_dropped_even_at_distance_zero() {
        let users = refine_to_radius(
            origin(),
            10.0,
            Some("requester"),
            vec![user("requester", 40.0, -74.0), user("neighbour", 40.0, -74.0)],
        );
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "neighbour");
    }

    #[test]
    fn duplicate_ids_and_corrupt_rows_are_dropped() {
        let users = refine_to_radius(
            origin(),
            10.0,
            None,
            vec![
                user("a", 40.0, -74.0),
                user("a", 40.01, -74.0),
                user("broken", f64::NAN, -74.0),
            ],
        );
        assert_eq!(users.len(), 1);
    }
}
