//! Plain road network input
//!
//! A network is a list of level-0 vertices with coordinates and a list of
//! weighted roads between them. Two-way roads stand for one arc in each
//! direction; the reverse arc gets the waypoints in reverse order.
//!
//! ```json
//! {
//!   "vertices": [{"lat": 52.52, "lon": 13.40}, {"lat": 52.53, "lon": 13.41}],
//!   "edges": [{"from": 0, "to": 1, "weight": 120, "oneway": false, "name": "Unter den Linden"}]
//! }
//! ```

use std::path::Path;

use hh_common::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::formats::block::EdgeSatellite;
use crate::geo::{is_valid_lat_lon, Coord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkVertex {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub from: u32,
    pub to: u32,
    pub weight: u32,
    #[serde(default)]
    pub oneway: bool,
    #[serde(flatten)]
    pub satellite: EdgeSatellite,
}

/// One directed arc of the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadArc {
    pub from: u32,
    pub to: u32,
    pub weight: u32,
    pub satellite: Option<Box<EdgeSatellite>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub vertices: Vec<NetworkVertex>,
    pub edges: Vec<NetworkEdge>,
}

/// Shape of a synthetic grid network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    pub seed: u64,
    /// Share of roads that are one-way
    pub oneway_ratio: f64,
    /// Share of grid roads left out, which leaves dead ends and chains behind
    pub drop_ratio: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 32,
            cols: 32,
            seed: 42,
            oneway_ratio: 0.1,
            drop_ratio: 0.2,
        }
    }
}

const GRID_ORIGIN_LAT: f64 = 52.40;
const GRID_ORIGIN_LON: f64 = 13.20;
const GRID_SPACING_DEG: f64 = 0.002;

impl RoadNetwork {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let network: Self = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display())))?;
        network.validate()?;
        Ok(network)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string(self)
            .map_err(|e| Error::InvalidInput(format!("network does not serialize: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() > u32::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "{} vertices do not fit 32-bit ids",
                self.vertices.len()
            )));
        }
        for (i, v) in self.vertices.iter().enumerate() {
            if !is_valid_lat_lon(v.lat, v.lon) {
                return Err(Error::InvalidInput(format!(
                    "vertex {i} has invalid coordinates ({}, {})",
                    v.lat, v.lon
                )));
            }
        }
        let n = self.vertices.len() as u64;
        for (i, e) in self.edges.iter().enumerate() {
            if e.from as u64 >= n || e.to as u64 >= n {
                return Err(Error::InvalidInput(format!(
                    "edge {i} ({} -> {}) references a vertex outside 0..{n}",
                    e.from, e.to
                )));
            }
            if e.weight == u32::MAX {
                return Err(Error::InvalidInput(format!("edge {i} has an infinite weight")));
            }
        }
        Ok(())
    }

    pub fn coords(&self) -> Vec<Coord> {
        self.vertices
            .iter()
            .map(|v| Coord::from_degrees(v.lat, v.lon))
            .collect()
    }

    /// Directed arcs, two per two-way road, self loops dropped.
    pub fn arcs(&self) -> Vec<RoadArc> {
        let mut arcs = Vec::with_capacity(self.edges.len() * 2);
        for e in self.edges.iter().filter(|e| e.from != e.to) {
            let satellite = (!e.satellite.is_empty()).then(|| Box::new(e.satellite.clone()));
            if !e.oneway {
                let reversed = satellite.as_ref().map(|s| {
                    let mut s = s.clone();
                    s.waypoints.reverse();
                    s
                });
                arcs.push(RoadArc {
                    from: e.to,
                    to: e.from,
                    weight: e.weight,
                    satellite: reversed,
                });
            }
            arcs.push(RoadArc {
                from: e.from,
                to: e.to,
                weight: e.weight,
                satellite,
            });
        }
        arcs
    }

    /// Seeded synthetic grid: `rows x cols` intersections, street names by
    /// row and column, random weights, some one-way and some missing roads.
    pub fn grid(spec: GridSpec) -> Self {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let index = |r: u32, c: u32| r * spec.cols + c;
        let mut network = RoadNetwork::default();
        for r in 0..spec.rows {
            for c in 0..spec.cols {
                network.vertices.push(NetworkVertex {
                    lat: GRID_ORIGIN_LAT + r as f64 * GRID_SPACING_DEG,
                    lon: GRID_ORIGIN_LON + c as f64 * GRID_SPACING_DEG,
                });
            }
        }

        let road = |rng: &mut StdRng, from: u32, to: u32, name: String| {
            if rng.random_bool(spec.drop_ratio.clamp(0.0, 1.0)) {
                return None;
            }
            let (from, to) = if rng.random_bool(0.5) { (from, to) } else { (to, from) };
            Some(NetworkEdge {
                from,
                to,
                weight: rng.random_range(20..400),
                oneway: rng.random_bool(spec.oneway_ratio.clamp(0.0, 1.0)),
                satellite: EdgeSatellite {
                    name: Some(name),
                    ..Default::default()
                },
            })
        };
        for r in 0..spec.rows {
            for c in 0..spec.cols {
                if c + 1 < spec.cols {
                    let e = road(&mut rng, index(r, c), index(r, c + 1), format!("Row {r}"));
                    network.edges.extend(e);
                }
                if r + 1 < spec.rows {
                    let e = road(&mut rng, index(r, c), index(r + 1, c), format!("Column {c}"));
                    network.edges.extend(e);
                }
            }
        }
        network
    }
}
