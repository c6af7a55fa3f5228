use geo::{BooleanOps, InteriorPoint, LineString, MultiPolygon, Point, Polygon};
use nalgebra::Vector2;
use rayon::prelude::*;
use rstar::{primitives::GeomWithData, RTree};
use std::f64::consts::PI;

use crate::{
    error::{Error, Result},
    overlay::Cell,
};

/// Radius used to merge near-identical AP locations.
pub const CLUSTER_RADIUS: f64 = 2.0;

/// Vertices of a buffered circle.
pub const CIRCLE_SEGMENTS: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Circle {
    pub origin: Vector2<f64>,
    pub r: f64,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Intersection {
    Inside(Circle),
    Overlap,
    None,
}

impl Intersection {
    pub fn intersects(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Circle {
    pub fn new(x: f64, y: f64, r: f64) -> Circle {
        Circle { origin: Vector2::new(x, y), r }
    }

    pub fn around(p: Point<f64>, r: f64) -> Circle {
        Circle::new(p.x(), p.y(), r)
    }

    pub fn area(&self) -> f64 {
        PI * self.r * self.r
    }

    pub fn distance(&self, other: &Circle) -> f64 {
        self.origin.metric_distance(&other.origin)
    }

    /// Touching circles count as intersecting, matching polygon
    /// `intersects`.
    pub fn intersect(&self, other: &Circle) -> Intersection {
        let d = self.distance(other);
        if d > self.r + other.r {
            Intersection::None
        } else if d + other.r <= self.r {
            Intersection::Inside(*other)
        } else if d + self.r <= other.r {
            Intersection::Inside(*self)
        } else {
            Intersection::Overlap
        }
    }

    /// Polygonal approximation with `segments` vertices.
    pub fn to_polygon(&self, segments: usize) -> Polygon<f64> {
        let segments = segments.max(3);
        let mut ring: Vec<(f64, f64)> = (0..segments)
            .map(|k| {
                let theta = 2.0 * PI * k as f64 / segments as f64;
                (
                    self.origin.x + self.r * theta.cos(),
                    self.origin.y + self.r * theta.sin(),
                )
            })
            .collect();
        if let Some(first) = ring.first().copied() {
            ring.push(first);
        }
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Connected groups of mutually overlapping circles, singletons
    /// included. Each group lists indices in ascending order and groups are
    /// ordered by their smallest index.
    pub fn group(circles: &[Circle]) -> Vec<Vec<usize>> {
        let max_r = circles.iter().map(|c| c.r).fold(0.0, f64::max);
        let tree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
            circles
                .iter()
                .enumerate()
                .map(|(i, c)| GeomWithData::new([c.origin.x, c.origin.y], i))
                .collect(),
        );

        let mut parent: Vec<usize> = (0..circles.len()).collect();
        for (i, a) in circles.iter().enumerate() {
            let reach = a.r + max_r;
            for item in tree.locate_within_distance([a.origin.x, a.origin.y], reach * reach) {
                let j = item.data;
                if j > i && a.intersect(&circles[j]).intersects() {
                    union(&mut parent, i, j);
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot: Vec<Option<usize>> = vec![None; circles.len()];
        for i in 0..circles.len() {
            let root = find(&mut parent, i);
            match slot[root] {
                Some(g) => groups[g].push(i),
                None => {
                    slot[root] = Some(groups.len());
                    groups.push(vec![i]);
                }
            }
        }
        groups
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

/// Merges APs whose small buffers overlap and returns one representative
/// point per cluster.
pub fn cluster_points(points: &[Point<f64>], cluster_radius: f64) -> Vec<Point<f64>> {
    let circles: Vec<Circle> = points.iter().map(|p| Circle::around(*p, cluster_radius)).collect();
    let groups = Circle::group(&circles);

    groups
        .par_iter()
        .filter_map(|group| {
            if let [only] = group.as_slice() {
                return Some(points[*only]);
            }
            let merged = group.iter().fold(MultiPolygon::new(vec![]), |acc, i| {
                acc.union(&circles[*i].to_polygon(CIRCLE_SEGMENTS))
            });
            merged.interior_point()
        })
        .collect()
}

/// Buffers every AP cluster into a circular cell of `radius` metres.
pub fn buffer_points(points: &[Point<f64>], radius: f64) -> Result<Vec<Cell>> {
    if radius <= 0.0 || !radius.is_finite() {
        return Err(Error::Geometry(format!("buffer radius must be positive, got {}", radius)));
    }

    let centres = cluster_points(points, CLUSTER_RADIUS);
    Ok(centres
        .into_iter()
        .enumerate()
        .map(|(fid, p)| Cell::new(fid, Circle::around(p, radius).to_polygon(CIRCLE_SEGMENTS)))
        .collect())
}
