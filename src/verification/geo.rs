use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceCheck {
    pub distance_m: f64,
    pub allowed_m: f64,
    pub within: bool,
}

impl GeofenceCheck {
    pub fn rejection_message(&self) -> String {
        format!(
            "You are {}m away from the class location. Must be within {}m.",
            self.distance_m.round(),
            self.allowed_m.round()
        )
    }
}

impl Geofence {
    /// Distance from the centre, compared against `radius × tolerance`.
    pub fn check(&self, point: GeoPoint, tolerance: f64) -> GeofenceCheck {
        let distance_m = haversine_m(self.center, point);
        let allowed_m = self.radius_m * tolerance;
        GeofenceCheck {
            distance_m,
            allowed_m,
            within: distance_m <= allowed_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint { latitude, longitude }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let a = p(13.0827, 80.2707);
        assert!(haversine_m(a, a).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111km() {
        let d = haversine_m(p(0.0, 0.0), p(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {}", d);
    }

    #[test]
    fn tolerance_widens_fence() {
        let fence = Geofence { center: p(13.0, 80.0), radius_m: 50.0 };
        // ~55.6m north
        let point = p(13.0005, 80.0);
        let strict = fence.check(point, 1.0);
        let relaxed = fence.check(point, 1.2);
        assert!(!strict.within);
        assert!(relaxed.within);
        assert_eq!(relaxed.allowed_m, 60.0);
    }

    #[test]
    fn validates_coordinates() {
        assert!(p(45.0, 120.0).is_valid());
        assert!(!p(91.0, 0.0).is_valid());
        assert!(!p(f64::NAN, 0.0).is_valid());
    }
}
