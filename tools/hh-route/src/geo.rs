//! Fixed-point coordinates and distance helpers
//!
//! Coordinates are stored as signed microdegrees (E6), the same unit the
//! blocks delta-encode.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

const E6: f64 = 1_000_000.0;

/// A level-0 geocoordinate in microdegrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub lon: i32,
    pub lat: i32,
}

impl Coord {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self {
            lon: (lon * E6).round() as i32,
            lat: (lat * E6).round() as i32,
        }
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat as f64 / E6
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon as f64 / E6
    }

    /// Squared planar distance in microdegrees, the k-d tree metric.
    pub fn squared_distance(&self, other: &Coord) -> i64 {
        let dx = self.lon as i64 - other.lon as i64;
        let dy = self.lat as i64 - other.lat as i64;
        dx * dx + dy * dy
    }
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    Haversine::distance(p1, p2)
}

/// Length in meters of a polyline.
pub fn polyline_length(points: &[Coord]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(w[0].lat_deg(), w[0].lon_deg(), w[1].lat_deg(), w[1].lon_deg()))
        .sum()
}

pub fn is_valid_lat_lon(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}
