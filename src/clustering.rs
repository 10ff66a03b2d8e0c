use std::collections::{HashMap, VecDeque};

use crate::geometry::{distance_points, FgPoint};
use crate::Point2D;

/// One cluster of foreground points, condensed to a candidate touch.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub center: Point2D,
    pub count: usize,
    pub radius: f32,
    pub sensor_id: u32,
    pub t_ns: u64,
}

const UNVISITED: i32 = -2;
const NOISE: i32 = -1;

/// DBSCAN over a fixed-cell spatial grid. Cell size equals the
/// neighbourhood radius, so a 3x3 block of cells bounds every
/// neighbourhood query. Buffers are retained across frames to keep
/// per-frame allocation bounded.
pub struct ClusterEngine {
    eps: f32,
    min_pts: usize,
    max_radius: Option<f32>,
    labels: Vec<i32>,
    grid: HashMap<(i32, i32), Vec<u32>>,
    neighbours: Vec<u32>,
    queue: VecDeque<u32>,
}

impl ClusterEngine {
    pub fn new(eps: f32, min_pts: usize, max_radius: Option<f32>) -> Self {
        ClusterEngine {
            eps,
            min_pts: min_pts.max(1),
            max_radius,
            labels: Vec::new(),
            grid: HashMap::new(),
            neighbours: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Applies new clustering parameters; the grid is rebuilt every
    /// frame, so a changed radius takes effect on the next scan.
    pub fn update_params(&mut self, eps: f32, min_pts: usize, max_radius: Option<f32>) {
        self.eps = eps;
        self.min_pts = min_pts.max(1);
        self.max_radius = max_radius;
        self.grid.clear();
    }

    fn cell_of(&self, p: &Point2D) -> (i32, i32) {
        ((p.0 / self.eps).floor() as i32, (p.1 / self.eps).floor() as i32)
    }

    fn collect_neighbours(&mut self, points: &[FgPoint], idx: u32) {
        self.neighbours.clear();
        let p = points[idx as usize].pos;
        let (cx, cy) = self.cell_of(&p);
        let eps2 = self.eps * self.eps;
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(cell) = self.grid.get(&(cx + dx, cy + dy)) {
                    for &j in cell {
                        let q = points[j as usize].pos;
                        let ddx = q.0 - p.0;
                        let ddy = q.1 - p.1;
                        if ddx * ddx + ddy * ddy <= eps2 {
                            self.neighbours.push(j);
                        }
                    }
                }
            }
        }
    }

    /// Clusters `points` and appends one candidate per cluster to `out`.
    /// Noise points are discarded; clusters larger than `max_radius`
    /// (forearms, sleeves, objects laid on the surface) are dropped.
    pub fn cluster(&mut self, points: &[FgPoint], t_ns: u64, out: &mut Vec<Candidate>) {
        let n = points.len();
        if n == 0 {
            return;
        }

        self.labels.clear();
        self.labels.resize(n, UNVISITED);
        for cell in self.grid.values_mut() {
            cell.clear();
        }
        for (i, p) in points.iter().enumerate() {
            let cell = self.cell_of(&p.pos);
            self.grid.entry(cell).or_default().push(i as u32);
        }

        let mut next_cluster: i32 = 0;
        for i in 0..n as u32 {
            if self.labels[i as usize] != UNVISITED {
                continue;
            }
            self.collect_neighbours(points, i);
            if self.neighbours.len() < self.min_pts {
                self.labels[i as usize] = NOISE;
                continue;
            }
            let cluster = next_cluster;
            next_cluster += 1;
            self.labels[i as usize] = cluster;
            self.queue.clear();
            self.queue.extend(self.neighbours.iter().copied());

            while let Some(j) = self.queue.pop_front() {
                let label = self.labels[j as usize];
                if label == NOISE {
                    // Border point: claimed by the first cluster that
                    // reaches it, which is the lowest id by discovery
                    // order.
                    self.labels[j as usize] = cluster;
                    continue;
                }
                if label != UNVISITED {
                    continue;
                }
                self.labels[j as usize] = cluster;
                self.collect_neighbours(points, j);
                if self.neighbours.len() >= self.min_pts {
                    self.queue.extend(self.neighbours.iter().copied());
                }
            }
        }

        for cluster in 0..next_cluster {
            let mut sum = (0.0f32, 0.0f32);
            let mut count = 0usize;
            for (i, p) in points.iter().enumerate() {
                if self.labels[i] == cluster {
                    sum.0 += p.pos.0;
                    sum.1 += p.pos.1;
                    count += 1;
                }
            }
            let center = (sum.0 / count as f32, sum.1 / count as f32);
            let mut radius = 0.0f32;
            for (i, p) in points.iter().enumerate() {
                if self.labels[i] == cluster {
                    radius = radius.max(distance_points(&p.pos, &center));
                }
            }
            if let Some(max_radius) = self.max_radius {
                if radius > max_radius {
                    continue;
                }
            }
            out.push(Candidate {
                center,
                count,
                radius,
                sensor_id: points[0].sensor_id,
                t_ns,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f32, y: f32) -> FgPoint {
        FgPoint {
            pos: (x, y),
            sensor_id: 0,
            index: 0,
            range: 0.0,
        }
    }

    fn run(engine: &mut ClusterEngine, points: &[FgPoint]) -> Vec<Candidate> {
        let mut out = Vec::new();
        engine.cluster(points, 7, &mut out);
        out
    }

    #[test]
    fn a_tight_blob_forms_one_cluster() {
        let mut e = ClusterEngine::new(0.05, 3, None);
        let points = vec![
            pt(0.0, 0.0),
            pt(0.01, 0.0),
            pt(0.02, 0.01),
            pt(0.0, 0.02),
            pt(0.01, 0.01),
        ];
        let cands = run(&mut e, &points);
        assert_eq!(cands.len(), 1);
        let c = &cands[0];
        assert_eq!(c.count, 5);
        assert_eq!(c.t_ns, 7);
        assert!((c.center.0 - 0.008).abs() < 1e-5);
        assert!(c.radius < 0.05);
    }

    #[test]
    fn isolated_points_are_noise() {
        let mut e = ClusterEngine::new(0.05, 3, None);
        let points = vec![pt(0.0, 0.0), pt(1.0, 1.0), pt(-1.0, 0.5)];
        assert!(run(&mut e, &points).is_empty());
    }

    #[test]
    fn separated_blobs_form_separate_clusters() {
        let mut e = ClusterEngine::new(0.05, 3, None);
        let mut points = Vec::new();
        for i in 0..4 {
            points.push(pt(i as f32 * 0.01, 0.0));
        }
        for i in 0..4 {
            points.push(pt(1.0 + i as f32 * 0.01, 0.0));
        }
        let cands = run(&mut e, &points);
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].count, 4);
        assert_eq!(cands[1].count, 4);
    }

    #[test]
    fn oversized_clusters_are_dropped() {
        let mut e = ClusterEngine::new(0.2, 3, Some(0.1));
        // A chain long enough that the max centroid distance exceeds 0.1.
        let points: Vec<FgPoint> = (0..10).map(|i| pt(i as f32 * 0.1, 0.0)).collect();
        assert!(run(&mut e, &points).is_empty());
    }

    #[test]
    fn border_point_joins_the_first_discovered_cluster() {
        // Two vertical bars of cores with a lone point halfway between.
        // The midpoint sees exactly one core from each bar plus itself,
        // so it is a border point of both clusters; discovery order
        // hands it to the cluster with the lower id.
        let mut e = ClusterEngine::new(0.05, 4, None);
        let points = vec![
            pt(0.0, 0.0),
            pt(0.0, 0.01),
            pt(0.0, 0.02),
            pt(0.0, -0.01),
            pt(0.1, 0.0),
            pt(0.1, 0.01),
            pt(0.1, 0.02),
            pt(0.1, -0.01),
            pt(0.05, 0.0),
        ];
        let cands = run(&mut e, &points);
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].count, 5);
        assert_eq!(cands[1].count, 4);
    }

    #[test]
    fn buffers_survive_reuse_across_frames() {
        let mut e = ClusterEngine::new(0.05, 3, None);
        let blob = vec![pt(0.0, 0.0), pt(0.01, 0.0), pt(0.0, 0.01), pt(0.01, 0.01)];
        let first = run(&mut e, &blob);
        let second = run(&mut e, &blob);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].count, second[0].count);
    }
}
