use crate::config::SensorPose;
use crate::scan::ScanMeta;
use crate::Point2D;

/// A world-frame foreground point, attributed to the sensor and angular
/// sample it came from.
#[derive(Debug, Clone, Copy)]
pub struct FgPoint {
    pub pos: Point2D,
    pub sensor_id: u32,
    pub index: usize,
    pub range: f32,
}

/// Projects polar samples into the world frame under a fixed sensor pose.
/// Pure and allocation-free per sample; the trigonometry for the heading
/// is baked in at construction.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    origin: Point2D,
    cos_heading: f32,
    sin_heading: f32,
    mount_offset: f32,
    step: f32,
}

impl Projector {
    pub fn new(pose: &SensorPose, meta: &ScanMeta) -> Self {
        Projector {
            origin: (pose.x, pose.y),
            cos_heading: pose.heading.cos(),
            sin_heading: pose.heading.sin(),
            mount_offset: pose.mount_offset,
            step: meta.step_rad,
        }
    }

    /// World point for the sample at angular index `index` with range
    /// `range_m` (meters).
    #[inline]
    pub fn project(&self, index: usize, range_m: f32) -> Point2D {
        let angle = self.mount_offset + index as f32 * self.step;
        let lx = range_m * angle.cos();
        let ly = range_m * angle.sin();
        (
            self.origin.0 + lx * self.cos_heading - ly * self.sin_heading,
            self.origin.1 + lx * self.sin_heading + ly * self.cos_heading,
        )
    }
}

pub fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    ((x2 - x1).powf(2.0) + (y2 - y1).powf(2.0)).sqrt()
}

pub fn distance_points(a: &Point2D, b: &Point2D) -> f32 {
    distance(a.0, a.1, b.0, b.1)
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorPose;

    const EPS: f32 = 1e-5;

    fn meta() -> ScanMeta {
        ScanMeta {
            samples: 1081,
            step_rad: std::f32::consts::PI / 720.0, // 0.25 deg
        }
    }

    #[test]
    fn identity_pose_projects_along_step_angles() {
        let pose = SensorPose {
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            mount_offset: 0.0,
        };
        let p = Projector::new(&pose, &meta());
        let (x, y) = p.project(0, 2.0);
        assert!((x - 2.0).abs() < EPS);
        assert!(y.abs() < EPS);
        // 360 steps of 0.25 deg = 90 deg
        let (x, y) = p.project(360, 1.0);
        assert!(x.abs() < EPS);
        assert!((y - 1.0).abs() < EPS);
    }

    #[test]
    fn mount_offset_shifts_the_zeroth_beam() {
        let pose = SensorPose {
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            mount_offset: std::f32::consts::FRAC_PI_2,
        };
        let p = Projector::new(&pose, &meta());
        let (x, y) = p.project(0, 1.5);
        assert!(x.abs() < EPS);
        assert!((y - 1.5).abs() < EPS);
    }

    #[test]
    fn heading_rotates_and_origin_translates() {
        let pose = SensorPose {
            x: 1.0,
            y: 2.0,
            heading: std::f32::consts::PI,
            mount_offset: 0.0,
        };
        let p = Projector::new(&pose, &meta());
        let (x, y) = p.project(0, 1.0);
        assert!((x - 0.0).abs() < 1e-4);
        assert!((y - 2.0).abs() < 1e-4);
    }

    #[test]
    fn distance_helpers_agree() {
        assert!((distance(0.0, 0.0, 3.0, 4.0) - 5.0).abs() < EPS);
        assert!((distance_points(&(0.0, 0.0), &(3.0, 4.0)) - 5.0).abs() < EPS);
        assert!((lerp(1.0, 3.0, 0.5) - 2.0).abs() < EPS);
    }
}
