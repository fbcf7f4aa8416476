/// Mean earth radius in kilometers (IUGG)
const EARTH_RADIUS_KM: f64 = 6371.0088;
const MILES_PER_KM: f64 = 0.621371192237334;
pub const EARTH_RADIUS_MILES: f64 = EARTH_RADIUS_KM * MILES_PER_KM;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub long: f64,
}

impl Coordinate {
    pub fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    /// Finite and inside -90..=90 / -180..=180
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.long.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.long)
    }
}

/// Great-circle distance in miles between two points using the haversine formula
pub fn haversine_miles(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = lat2 - lat1;
    let delta_long = (b.long - a.long).to_radians();

    let d = (delta_lat * 0.5).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_long * 0.5).sin().powi(2);

    2.0 * EARTH_RADIUS_MILES * d.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lyon_to_paris_matches_reference() {
        let lyon = Coordinate::new(45.7597, 4.8422);
        let paris = Coordinate::new(48.8567, 2.3508);

        let expected = 243.71250609539814;
        let miles = haversine_miles(lyon, paris);

        assert!(((miles - expected) / expected).abs() < 1e-6, "{miles}");
    }

    #[test]
    fn antipodes_are_half_the_circumference() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 180.0);

        let half = std::f64::consts::PI * EARTH_RADIUS_MILES;
        assert!((haversine_miles(a, b) - half).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinate::new(38.9, -77.0).is_valid());
        assert!(!Coordinate::new(90.1, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    fn coordinate() -> impl Strategy<Value = Coordinate> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, long)| Coordinate::new(lat, long))
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(a in coordinate(), b in coordinate()) {
            let ab = haversine_miles(a, b);
            let ba = haversine_miles(b, a);
            prop_assert!((ab - ba).abs() <= 1e-9 * ab.max(1.0), "{} != {}", ab, ba);
        }

        #[test]
        fn distance_to_self_is_zero(a in coordinate()) {
            prop_assert_eq!(haversine_miles(a, a), 0.0);
        }
    }
}
