// 🌍 Geo - distances, proximity lookup contract and match-key grid
//
// The store implements GeoIndex with a bounding-box prefilter on indexed
// lat/lon columns; distances here are exact haversine.

use crate::entities::Location;
use crate::error::Result;
use crate::similarity::{normalize_address, normalize_name};

pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Grid cell size for match keys, in degrees
pub const MATCH_CELL_DEG: f64 = 0.01;

const NAME_PREFIX_CHARS: usize = 4;

// ============================================================================
// GEO INDEX CONTRACT
// ============================================================================

pub trait GeoIndex {
    /// Business ids within `max_distance_m`, nearest first
    fn near(&self, latitude: f64, longitude: f64, max_distance_m: f64) -> Result<Vec<String>>;
}

// ============================================================================
// DISTANCE
// ============================================================================

/// Great-circle distance in meters
pub fn haversine_m(a: &Location, b: &Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Linear decay: 1.0 at 0 m, 0.0 at `max_radius_m` and beyond
pub fn proximity_score(a: &Location, b: &Location, max_radius_m: f64) -> f64 {
    if max_radius_m <= 0.0 {
        return 0.0;
    }
    (1.0 - haversine_m(a, b) / max_radius_m).clamp(0.0, 1.0)
}

/// (min_lat, max_lat, min_lon, max_lon) enclosing a circle
pub fn bounding_box(center: &Location, radius_m: f64) -> (f64, f64, f64, f64) {
    let dlat = (radius_m / EARTH_RADIUS_M).to_degrees();
    let cos_lat = center.latitude.to_radians().cos().abs();
    // Near the poles every longitude is in range
    let dlon = if cos_lat < 1e-6 {
        180.0
    } else {
        (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees().min(180.0)
    };

    (
        (center.latitude - dlat).max(-90.0),
        (center.latitude + dlat).min(90.0),
        (center.longitude - dlon).max(-180.0),
        (center.longitude + dlon).min(180.0),
    )
}

// ============================================================================
// MATCH KEYS
// ============================================================================

/// First characters of the normalized name, whitespace removed
pub fn name_prefix(name: &str) -> String {
    normalize_name(name)
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(NAME_PREFIX_CHARS)
        .collect()
}

/// Lock keys for the merge decision.
///
/// With a location: the candidate's grid cell and its 8 neighbours, each
/// combined with the normalized name prefix. Without one: the normalized
/// address combined with the name prefix. Returned sorted and deduplicated.
pub fn match_keys(name: &str, address: Option<&str>, location: Option<&Location>) -> Vec<String> {
    let prefix = name_prefix(name);

    let mut keys = match location {
        Some(loc) => {
            let row = (loc.latitude / MATCH_CELL_DEG).floor() as i64;
            let col = (loc.longitude / MATCH_CELL_DEG).floor() as i64;
            let mut keys = Vec::with_capacity(9);
            for dr in -1..=1 {
                for dc in -1..=1 {
                    keys.push(format!("cell:{}:{}:{}", row + dr, col + dc, prefix));
                }
            }
            keys
        }
        None => {
            let addr = address.map(normalize_address).unwrap_or_default();
            vec![format!("addr:{}:{}", addr, prefix)]
        }
    };

    keys.sort();
    keys.dedup();
    keys
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(lat: f64, lon: f64) -> Location {
        Location {
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // ~0.00027° latitude ≈ 30 m
        let a = loc(40.7128, -74.0060);
        let b = loc(40.71307, -74.0060);
        let d = haversine_m(&a, &b);
        assert!((d - 30.0).abs() < 1.0, "distance was {}", d);
        assert_eq!(haversine_m(&a, &a), 0.0);
    }

    #[test]
    fn test_proximity_decay() {
        let a = loc(40.7128, -74.0060);
        assert!((proximity_score(&a, &a, 500.0) - 1.0).abs() < 1e-9);

        let far = loc(40.7228, -74.0060); // ~1.1 km
        assert_eq!(proximity_score(&a, &far, 500.0), 0.0);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let center = loc(30.2672, -97.7431);
        let (min_lat, max_lat, min_lon, max_lon) = bounding_box(&center, 500.0);
        assert!(min_lat < center.latitude && center.latitude < max_lat);
        assert!(min_lon < center.longitude && center.longitude < max_lon);
        // 500 m of latitude is ~0.0045°
        assert!((max_lat - center.latitude - 0.0045).abs() < 0.0002);
    }

    #[test]
    fn test_match_keys_share_neighbourhood() {
        let a = match_keys("Joe's Pizza", None, Some(&loc(40.71280, -74.00600)));
        let b = match_keys("Joes Pizza", None, Some(&loc(40.71307, -74.00600)));

        assert_eq!(a.len(), 9);
        assert!(a.iter().any(|k| b.contains(k)));
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_match_keys_without_location() {
        let keys = match_keys("Cafe Luna", Some("12 Oak Street"), None);
        assert_eq!(keys, vec!["addr:12 oak st:cafe".to_string()]);
    }
}
