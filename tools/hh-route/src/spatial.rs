//! Static k-d tree over level-0 vertex coordinates
//!
//! The tree is implicit: `ind` is a permutation of the point arrays such
//! that for every range `[p, r]` the median `c = (p + r) / 2` splits it on
//! the range's axis (longitude at even depth, latitude at odd depth), with
//! every point left of `c` at most and every point right of `c` at least the
//! median's coordinate. Distances are planar squared distances in
//! microdegrees; ties go to the smaller vertex id.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::formats::BoundingBox;
use crate::geo::Coord;
use crate::graph::VertexId;

const PIVOT_SEED: u64 = 0x6b64_7472_6565;

#[derive(Debug, Clone)]
pub struct KdTree {
    coords: Vec<Coord>,
    ids: Vec<VertexId>,
    ind: Vec<u32>,
}

#[derive(Clone, Copy)]
struct Best {
    dist: i64,
    id: VertexId,
}

impl Best {
    fn beats(&self, dist: i64, id: VertexId) -> bool {
        (self.dist, self.id) <= (dist, id)
    }
}

fn axis(c: &Coord, dim: usize) -> i32 {
    if dim == 0 {
        c.lon
    } else {
        c.lat
    }
}

impl KdTree {
    pub fn new(points: Vec<(VertexId, Coord)>) -> Self {
        let (ids, coords): (Vec<_>, Vec<_>) = points.into_iter().unzip();
        let mut tree = Self {
            ind: (0..coords.len() as u32).collect(),
            coords,
            ids,
        };
        let mut rng = StdRng::seed_from_u64(PIVOT_SEED);
        if !tree.ind.is_empty() {
            tree.construct(0, tree.ind.len() - 1, 0, &mut rng);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.ind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ind.is_empty()
    }

    /// Indexed vertex ids, in insertion order.
    pub fn ids(&self) -> &[VertexId] {
        &self.ids
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        let first = self.coords.first()?;
        Some(self.coords.iter().fold(
            BoundingBox {
                min_lon: first.lon,
                min_lat: first.lat,
                max_lon: first.lon,
                max_lat: first.lat,
            },
            |b, c| BoundingBox {
                min_lon: b.min_lon.min(c.lon),
                min_lat: b.min_lat.min(c.lat),
                max_lon: b.max_lon.max(c.lon),
                max_lat: b.max_lat.max(c.lat),
            },
        ))
    }

    fn point(&self, i: usize) -> &Coord {
        &self.coords[self.ind[i] as usize]
    }

    fn construct(&mut self, p: usize, r: usize, dim: usize, rng: &mut StdRng) {
        if p >= r {
            return;
        }
        let c = (p + r) / 2;
        self.select(p, r, c, dim, rng);
        if c > p {
            self.construct(p, c - 1, 1 - dim, rng);
        }
        self.construct(c + 1, r, 1 - dim, rng);
    }

    /// Quickselect `k` into place within `[p, r]` on `dim`. Three-way
    /// partitioning keeps runs of equal coordinates from degrading it.
    fn select(&mut self, mut p: usize, mut r: usize, k: usize, dim: usize, rng: &mut StdRng) {
        while p < r {
            let pivot = axis(self.point(rng.random_range(p..=r)), dim);
            let (mut lt, mut i, mut gt) = (p, p, r + 1);
            while i < gt {
                let v = axis(self.point(i), dim);
                if v < pivot {
                    self.ind.swap(lt, i);
                    lt += 1;
                    i += 1;
                } else if v > pivot {
                    gt -= 1;
                    self.ind.swap(i, gt);
                } else {
                    i += 1;
                }
            }
            if k < lt {
                r = lt - 1;
            } else if k >= gt {
                p = gt;
            } else {
                return;
            }
        }
    }

    /// Closest vertex to `q`, or `None` for an empty tree.
    pub fn nearest(&self, q: Coord) -> Option<VertexId> {
        if self.ind.is_empty() {
            return None;
        }
        let mut best = None;
        self.nearest_in(&q, 0, self.ind.len() - 1, 0, &mut best);
        best.map(|b| b.id)
    }

    fn nearest_in(&self, q: &Coord, p: usize, r: usize, dim: usize, best: &mut Option<Best>) {
        let c = (p + r) / 2;
        let here = self.point(c);
        let dist = here.squared_distance(q);
        let id = self.ids[self.ind[c] as usize];
        if !best.is_some_and(|b| b.beats(dist, id)) {
            *best = Some(Best { dist, id });
        }

        let split = axis(here, dim);
        let query = axis(q, dim);
        let left = (c > p).then(|| (p, c - 1));
        let right = (c < r).then(|| (c + 1, r));
        let (near, far) = if query < split {
            (left, right)
        } else {
            (right, left)
        };

        if let Some((a, b)) = near {
            self.nearest_in(q, a, b, 1 - dim, best);
        }
        if let Some((a, b)) = far {
            let gap = (query as i64 - split as i64).pow(2);
            if best.map_or(true, |best| gap <= best.dist) {
                self.nearest_in(q, a, b, 1 - dim, best);
            }
        }
    }

    /// Vertices with `min <= coord <= max` on both axes, sorted by id.
    pub fn points_within_rectangle(&self, min: Coord, max: Coord) -> Vec<VertexId> {
        let mut out = Vec::new();
        if !self.ind.is_empty() {
            self.within(&min, &max, 0, self.ind.len() - 1, 0, &mut out);
        }
        out.sort_unstable();
        out
    }

    fn within(&self, min: &Coord, max: &Coord, p: usize, r: usize, dim: usize, out: &mut Vec<VertexId>) {
        let c = (p + r) / 2;
        let here = self.point(c);
        if (min.lon..=max.lon).contains(&here.lon) && (min.lat..=max.lat).contains(&here.lat) {
            out.push(self.ids[self.ind[c] as usize]);
        }
        let split = axis(here, dim);
        if c > p && axis(min, dim) <= split {
            self.within(min, max, p, c - 1, 1 - dim, out);
        }
        if c < r && axis(max, dim) >= split {
            self.within(min, max, c + 1, r, 1 - dim, out);
        }
    }
}
