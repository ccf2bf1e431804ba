use crate::error::GeoError;
use crate::models::Coordinate;

pub const EARTH_RADIUS_MILES: f64 = 3959.0;
pub const MILES_PER_DEGREE_LATITUDE: f64 = 69.0;
/// Radius used when a new request alerts its neighbours.
pub const NEARBY_RADIUS_MILES: f64 = 10.0;

/// Axis-aligned lat/lon rectangle used to prune candidates before the exact distance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Box around `origin`. The longitude window is corrected with the cosine of the
    /// origin's latitude only.
    ///
    /// Falls back to the full longitude range when the window cannot be expressed as a
    /// single `[min, max]` interval: at the poles (the cosine goes to zero), when it is
    /// wider than the globe, or when it crosses the 180th meridian.
    pub fn around(origin: Coordinate, radius_miles: f64) -> Self {
        let lat_delta = radius_miles / MILES_PER_DEGREE_LATITUDE;
        let lon_delta =
            radius_miles / (MILES_PER_DEGREE_LATITUDE * origin.latitude.to_radians().cos());

        let lat_min = (origin.latitude - lat_delta).max(-90.0);
        let lat_max = (origin.latitude + lat_delta).min(90.0);

        let lon_min = origin.longitude - lon_delta;
        let lon_max = origin.longitude + lon_delta;
        let (lon_min, lon_max) =
            if lon_delta.is_finite() && lon_delta > 0.0 && lon_min >= -180.0 && lon_max <= 180.0 {
                (lon_min, lon_max)
            } else {
                (-180.0, 180.0)
            };

        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn prunes_longitude(&self) -> bool {
        self.lon_min > -180.0 || self.lon_max < 180.0
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&latitude)
            && (self.lon_min..=self.lon_max).contains(&longitude)
    }
}

pub fn validate_radius(radius_miles: f64) -> Result<f64, GeoError> {
    if radius_miles.is_finite() && radius_miles > 0.0 {
        Ok(radius_miles)
    } else {
        Err(GeoError::Radius(radius_miles))
    }
}

/// Spherical law of cosines term; mathematically in [-1, 1] but rounding can push it out.
pub fn acos_argument(from: Coordinate, to: Coordinate) -> f64 {
    let lat0 = from.latitude.to_radians();
    let lat1 = to.latitude.to_radians();
    let dlon = to.longitude.to_radians() - from.longitude.to_radians();
    lat0.cos() * lat1.cos() * dlon.cos() + lat0.sin() * lat1.sin()
}

pub fn miles_from_acos_argument(argument: f64) -> f64 {
    EARTH_RADIUS_MILES * argument.clamp(-1.0, 1.0).acos()
}

pub fn great_circle_miles(from: Coordinate, to: Coordinate) -> f64 {
    miles_from_acos_argument(acos_argument(from, to))
}
