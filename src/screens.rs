use serde::{Deserialize, Serialize};

use crate::clustering::Candidate;
use crate::Point2D;

/// A logical screen surface: a w x h rectangle at `(x, y)` rotated by
/// `rotation` in the world frame, fed by the sensors listed in
/// `sensor_ids`. Positions on the screen are expressed normalized in
/// [0,1] on both axes.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRect {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Radians, counter-clockwise in the world frame.
    #[serde(default)]
    pub rotation: f32,
    pub sensor_ids: Vec<u32>,
}

impl ScreenRect {
    pub fn allows_sensor(&self, sensor_id: u32) -> bool {
        self.sensor_ids.contains(&sensor_id)
    }

    /// World point into the screen's local frame: translate by the
    /// origin, then rotate back by the screen's rotation.
    pub fn to_local(&self, p: Point2D) -> Point2D {
        let dx = p.0 - self.x;
        let dy = p.1 - self.y;
        let cos = self.rotation.cos();
        let sin = self.rotation.sin();
        (dx * cos + dy * sin, -dx * sin + dy * cos)
    }

    /// Normalized (u, v) if the world point lies on this screen.
    pub fn normalize(&self, p: Point2D) -> Option<(f32, f32)> {
        let (lx, ly) = self.to_local(p);
        if lx < 0.0 || lx > self.width || ly < 0.0 || ly > self.height {
            return None;
        }
        Some((lx / self.width, ly / self.height))
    }
}

/// A candidate that landed on a screen, in normalized coordinates.
#[derive(Debug, Clone, Copy)]
pub struct MappedCandidate {
    pub screen_id: u32,
    pub u: f32,
    pub v: f32,
    pub count: usize,
    pub sensor_id: u32,
    pub t_ns: u64,
}

/// Routes one sensor's candidates onto screens. Screens are filtered to
/// those that list the sensor and held in ascending id order, so the
/// smallest-id screen wins when rectangles overlap.
pub struct ScreenMapper {
    screens: Vec<ScreenRect>,
}

impl ScreenMapper {
    pub fn new(sensor_id: u32, screens: &[ScreenRect]) -> Self {
        let mut screens: Vec<ScreenRect> = screens
            .iter()
            .filter(|s| s.allows_sensor(sensor_id))
            .cloned()
            .collect();
        screens.sort_by_key(|s| s.id);
        ScreenMapper { screens }
    }

    /// Appends a mapped candidate for each input candidate that falls
    /// on some screen. A candidate maps to at most one screen.
    pub fn map(&self, candidates: &[Candidate], out: &mut Vec<MappedCandidate>) {
        for c in candidates {
            for screen in &self.screens {
                if let Some((u, v)) = screen.normalize(c.center) {
                    out.push(MappedCandidate {
                        screen_id: screen.id,
                        u,
                        v,
                        count: c.count,
                        sensor_id: c.sensor_id,
                        t_ns: c.t_ns,
                    });
                    break;
                }
            }
        }
    }
}
