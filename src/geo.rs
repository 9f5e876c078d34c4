//! Great-circle (Haversine) distance on WGS-84 latitude/longitude.

use crate::domain::GeoPoint;

const EARTH_RADIUS_MILES: f64 = 3958.8;

pub fn haversine_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_MILES * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        let p = GeoPoint { lat: 40.7128, lon: -74.0060 };
        assert!(haversine_miles(p, p) < 1e-9);
    }

    #[test]
    fn known_distance_nyc_to_boston_is_roughly_190_miles() {
        let nyc = GeoPoint { lat: 40.7128, lon: -74.0060 };
        let boston = GeoPoint { lat: 42.3601, lon: -71.0589 };
        let d = haversine_miles(nyc, boston);
        assert!((d - 190.0).abs() < 15.0, "got {d}");
    }
}
