use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::TrackingParams;
use crate::events::{TouchEvent, TouchEventKind};
use crate::geometry::lerp;
use crate::screens::MappedCandidate;

/// Process-global session id allocator. Ids are unique for the process
/// lifetime and never reused; every tracker draws from the same counter
/// under a single mutex (births are rare, contention is negligible).
#[derive(Debug)]
pub struct SessionIds {
    next: Mutex<u32>,
}

impl SessionIds {
    pub fn new() -> Self {
        SessionIds { next: Mutex::new(1) }
    }

    pub fn next_id(&self) -> u32 {
        let mut next = self.next.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }
}

impl Default for SessionIds {
    fn default() -> Self {
        SessionIds::new()
    }
}

/// One tracked touch. `(u, v)` stays inside [0,1]^2 for as long as the
/// touch is alive; a touch never changes screens.
#[derive(Debug, Clone, Copy)]
pub struct Touch {
    pub session_id: u32,
    pub screen_id: u32,
    pub u: f32,
    pub v: f32,
    pub du: f32,
    pub dv: f32,
    pub t_ns: u64,
    pub age: u32,
    pub missed: u32,
    pub confirmed: bool,
}

const FALLBACK_DT: f32 = 0.025; // seconds, nominal 40 Hz

/// Greedy matching with deletion is only acceptable up to this matrix
/// size; beyond it the dense minimum-cost solver takes over.
const GREEDY_LIMIT: usize = 12;

/// Sentinel cost for gated-out pairs in the dense solver.
const UNMATCHABLE: f64 = 1e6;

/// Per-screen tracker: stable id assignment, birth grace against
/// flicker, miss-based expiry, and EMA smoothing of position and
/// velocity.
pub struct TouchTracker {
    screen_id: u32,
    gate_radius: f32,
    merge_radius: f32,
    position_smoothing: f32,
    velocity_smoothing: f32,
    birth_grace: u32,
    death_threshold: u32,
    ids: Arc<SessionIds>,
    touches: Vec<Touch>,
    last_t_ns: u64,
    // Assignment scratch, reused across frames.
    pairs: Vec<(f32, usize, usize)>,
    cost: Vec<f64>,
    touch_matched: Vec<bool>,
    cand_matched: Vec<bool>,
    assignments: Vec<(usize, usize)>,
}

impl TouchTracker {
    pub fn new(screen_id: u32, params: &TrackingParams, ids: Arc<SessionIds>) -> Self {
        // Radii are configured as fractions of the screen diagonal; in
        // normalized coordinates the diagonal is sqrt(2).
        let diag = std::f32::consts::SQRT_2;
        TouchTracker {
            screen_id,
            gate_radius: params.gate_radius * diag,
            merge_radius: params.merge_radius * diag,
            position_smoothing: params.position_smoothing,
            velocity_smoothing: params.velocity_smoothing,
            birth_grace: params.birth_grace,
            death_threshold: params.death_threshold.max(1),
            ids,
            touches: Vec::new(),
            last_t_ns: 0,
            pairs: Vec::new(),
            cost: Vec::new(),
            touch_matched: Vec::new(),
            cand_matched: Vec::new(),
            assignments: Vec::new(),
        }
    }

    pub fn has_touches(&self) -> bool {
        !self.touches.is_empty()
    }

    /// Applies new tracking parameters at a frame boundary. Existing
    /// touches keep their state; only the thresholds move.
    pub fn update_params(&mut self, params: &TrackingParams) {
        let diag = std::f32::consts::SQRT_2;
        self.gate_radius = params.gate_radius * diag;
        self.merge_radius = params.merge_radius * diag;
        self.position_smoothing = params.position_smoothing;
        self.velocity_smoothing = params.velocity_smoothing;
        self.birth_grace = params.birth_grace;
        self.death_threshold = params.death_threshold.max(1);
    }

    /// Confirmed touches currently alive, for the emitter's alive list.
    pub fn alive(&self) -> impl Iterator<Item = &Touch> {
        self.touches.iter().filter(|t| t.confirmed)
    }

    /// Advances one frame. Candidates are this screen's fused set;
    /// timestamps are non-decreasing. Emitted events are appended to
    /// `events`.
    pub fn process(
        &mut self,
        t_ns: u64,
        candidates: &[MappedCandidate],
        events: &mut Vec<TouchEvent>,
    ) {
        let dt = if self.last_t_ns == 0 || t_ns <= self.last_t_ns {
            FALLBACK_DT
        } else {
            (t_ns - self.last_t_ns) as f32 / 1e9
        };
        self.last_t_ns = t_ns;

        self.touch_matched.clear();
        self.touch_matched.resize(self.touches.len(), false);
        self.cand_matched.clear();
        self.cand_matched.resize(candidates.len(), false);
        self.assignments.clear();

        if self.touches.len() <= GREEDY_LIMIT && candidates.len() <= GREEDY_LIMIT {
            // Gated cost pairs against predicted positions. Touch order
            // in the vector is ascending session id, so sorting by
            // (cost, touch index) breaks ties toward the lower id.
            self.pairs.clear();
            for (ti, touch) in self.touches.iter().enumerate() {
                let pu = touch.u + touch.du * dt;
                let pv = touch.v + touch.dv * dt;
                for (ci, cand) in candidates.iter().enumerate() {
                    let du = pu - cand.u;
                    let dv = pv - cand.v;
                    let cost = (du * du + dv * dv).sqrt();
                    if cost <= self.gate_radius {
                        self.pairs.push((cost, ti, ci));
                    }
                }
            }
            self.pairs.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            for pi in 0..self.pairs.len() {
                let (_, ti, ci) = self.pairs[pi];
                if !self.touch_matched[ti] && !self.cand_matched[ci] {
                    self.touch_matched[ti] = true;
                    self.cand_matched[ci] = true;
                    self.assignments.push((ti, ci));
                }
            }
        } else {
            self.assign_optimal(candidates, dt);
        }

        for ai in 0..self.assignments.len() {
            let (ti, ci) = self.assignments[ai];
            let touch = &mut self.touches[ti];
            let cand = &candidates[ci];
            let pu = touch.u + touch.du * dt;
            let pv = touch.v + touch.dv * dt;
            let new_u = lerp(pu, cand.u, self.position_smoothing).clamp(0.0, 1.0);
            let new_v = lerp(pv, cand.v, self.position_smoothing).clamp(0.0, 1.0);
            let inst_du = (new_u - touch.u) / dt;
            let inst_dv = (new_v - touch.v) / dt;
            touch.du = lerp(touch.du, inst_du, self.velocity_smoothing);
            touch.dv = lerp(touch.dv, inst_dv, self.velocity_smoothing);
            touch.u = new_u;
            touch.v = new_v;
            touch.t_ns = t_ns;
            touch.missed = 0;
            touch.age += 1;
            if !touch.confirmed && touch.age >= self.birth_grace {
                touch.confirmed = true;
                events.push(touch_event(TouchEventKind::Add, touch));
            } else if touch.confirmed {
                events.push(touch_event(TouchEventKind::Update, touch));
            }
        }

        // Expire the unmatched. Unconfirmed touches get no grace at
        // all: one missed frame and they vanish silently.
        let death_threshold = self.death_threshold;
        let touch_matched = std::mem::take(&mut self.touch_matched);
        let mut idx = 0;
        self.touches.retain_mut(|touch| {
            let was_matched = touch_matched[idx];
            idx += 1;
            if was_matched {
                return true;
            }
            touch.missed += 1;
            if !touch.confirmed {
                return touch.missed < 1;
            }
            if touch.missed >= death_threshold {
                events.push(touch_event(TouchEventKind::Remove, touch));
                debug!("touch {} expired on screen {}", touch.session_id, touch.screen_id);
                return false;
            }
            true
        });
        self.touch_matched = touch_matched;

        // Births, silent until they outlive the grace period.
        for (ci, cand) in candidates.iter().enumerate() {
            if !self.cand_matched[ci] {
                let touch = Touch {
                    session_id: self.ids.next_id(),
                    screen_id: self.screen_id,
                    u: cand.u.clamp(0.0, 1.0),
                    v: cand.v.clamp(0.0, 1.0),
                    du: 0.0,
                    dv: 0.0,
                    t_ns,
                    age: 0,
                    missed: 0,
                    confirmed: false,
                };
                debug!("touch {} born on screen {}", touch.session_id, touch.screen_id);
                self.touches.push(touch);
            }
        }

        self.enforce_spacing(events);
    }

    /// Crowded frames get a dense minimum-cost assignment; greedy
    /// matching with deletion can mis-pair touches once the matrix
    /// outgrows the small case. Gated-out pairs carry a sentinel cost
    /// and are dropped from the result.
    fn assign_optimal(&mut self, candidates: &[MappedCandidate], dt: f32) {
        let nt = self.touches.len();
        let nc = candidates.len();
        if nt == 0 || nc == 0 {
            return;
        }
        // The solver wants rows <= cols; transpose when touches are the
        // larger side.
        let touches_as_rows = nt <= nc;
        let (rows, cols) = if touches_as_rows { (nt, nc) } else { (nc, nt) };
        self.cost.clear();
        self.cost.resize(rows * cols, UNMATCHABLE);
        for (ti, touch) in self.touches.iter().enumerate() {
            let pu = touch.u + touch.du * dt;
            let pv = touch.v + touch.dv * dt;
            for (ci, cand) in candidates.iter().enumerate() {
                let du = pu - cand.u;
                let dv = pv - cand.v;
                let d = (du * du + dv * dv).sqrt();
                if d <= self.gate_radius {
                    let idx = if touches_as_rows {
                        ti * cols + ci
                    } else {
                        ci * cols + ti
                    };
                    self.cost[idx] = d as f64;
                }
            }
        }
        let matching = min_cost_assignment(&self.cost, rows, cols);
        for (row, col) in matching.into_iter().enumerate() {
            if self.cost[row * cols + col] >= UNMATCHABLE {
                continue;
            }
            let (ti, ci) = if touches_as_rows { (row, col) } else { (col, row) };
            self.touch_matched[ti] = true;
            self.cand_matched[ci] = true;
            self.assignments.push((ti, ci));
        }
    }

    /// Two confirmed touches may not sit within the merge radius of each
    /// other; when smoothing drives them together, the younger one (the
    /// higher session id) yields.
    fn enforce_spacing(&mut self, events: &mut Vec<TouchEvent>) {
        loop {
            let mut doomed: Option<usize> = None;
            'outer: for i in 0..self.touches.len() {
                for j in (i + 1)..self.touches.len() {
                    let a = &self.touches[i];
                    let b = &self.touches[j];
                    if !a.confirmed || !b.confirmed {
                        continue;
                    }
                    let du = a.u - b.u;
                    let dv = a.v - b.v;
                    if (du * du + dv * dv).sqrt() <= self.merge_radius {
                        doomed = Some(j);
                        break 'outer;
                    }
                }
            }
            match doomed {
                Some(j) => {
                    let touch = self.touches.remove(j);
                    events.push(touch_event(TouchEventKind::Remove, &touch));
                }
                None => return,
            }
        }
    }
}

/// Kuhn-Munkres minimum-cost assignment over a dense row-major
/// `rows` x `cols` matrix with `rows <= cols`. Returns the column
/// matched to each row.
fn min_cost_assignment(cost: &[f64], rows: usize, cols: usize) -> Vec<usize> {
    debug_assert!(rows <= cols);
    let mut u = vec![0.0f64; rows + 1];
    let mut v = vec![0.0f64; cols + 1];
    // matched[j] = 1-based row currently assigned to column j; 0 = free.
    let mut matched = vec![0usize; cols + 1];
    let mut way = vec![0usize; cols + 1];
    for i in 1..=rows {
        matched[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; cols + 1];
        let mut used = vec![false; cols + 1];
        loop {
            used[j0] = true;
            let i0 = matched[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=cols {
                if !used[j] {
                    let cur = cost[(i0 - 1) * cols + (j - 1)] - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=cols {
                if used[j] {
                    u[matched[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if matched[j0] == 0 {
                break;
            }
        }
        // Walk the augmenting path back, flipping assignments.
        loop {
            let j1 = way[j0];
            matched[j0] = matched[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }
    let mut result = vec![0usize; rows];
    for j in 1..=cols {
        if matched[j] > 0 {
            result[matched[j] - 1] = j - 1;
        }
    }
    result
}

fn touch_event(kind: TouchEventKind, touch: &Touch) -> TouchEvent {
    TouchEvent {
        kind,
        session_id: touch.session_id,
        screen_id: touch.screen_id,
        u: touch.u,
        v: touch.v,
        du: touch.du,
        dv: touch.dv,
        t_ns: touch.t_ns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingParams;

    const FRAME_NS: u64 = 25_000_000;

    fn tracker() -> TouchTracker {
        TouchTracker::new(0, &TrackingParams::default(), Arc::new(SessionIds::new()))
    }

    fn cand(u: f32, v: f32) -> MappedCandidate {
        MappedCandidate {
            screen_id: 0,
            u,
            v,
            count: 5,
            sensor_id: 1,
            t_ns: 0,
        }
    }

    fn step(t: &mut TouchTracker, frame: u64, cands: &[MappedCandidate]) -> Vec<TouchEvent> {
        let mut events = Vec::new();
        t.process(frame * FRAME_NS, cands, &mut events);
        events
    }

    #[test]
    fn static_touch_adds_then_updates_then_removes() {
        let mut t = tracker();
        let mut all = Vec::new();
        for frame in 1..=10 {
            all.extend(step(&mut t, frame, &[cand(0.5, 0.5)]));
        }
        // Two silent frames of grace, then ADD, then 7 UPDATEs.
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].kind, TouchEventKind::Add);
        assert!(all[1..].iter().all(|e| e.kind == TouchEventKind::Update));
        // Source stops: REMOVE arrives within death_threshold frames.
        let mut removes = Vec::new();
        for frame in 11..=14 {
            removes.extend(step(&mut t, frame, &[]));
        }
        assert_eq!(removes.len(), 1);
        assert_eq!(removes[0].kind, TouchEventKind::Remove);
        assert_eq!(removes[0].session_id, all[0].session_id);
        assert!(!t.has_touches());
    }

    #[test]
    fn single_frame_flicker_emits_nothing() {
        let mut t = tracker();
        let mut all = Vec::new();
        all.extend(step(&mut t, 1, &[cand(0.3, 0.3)]));
        for frame in 2..=6 {
            all.extend(step(&mut t, frame, &[]));
        }
        assert!(all.is_empty());
        assert!(!t.has_touches());
    }

    #[test]
    fn events_follow_add_update_remove_grammar() {
        let mut t = tracker();
        let mut all = Vec::new();
        for frame in 1..=5 {
            all.extend(step(&mut t, frame, &[cand(0.5, 0.5), cand(0.2, 0.8)]));
        }
        for frame in 6..=10 {
            all.extend(step(&mut t, frame, &[]));
        }
        use std::collections::HashMap;
        let mut seen: HashMap<u32, Vec<TouchEventKind>> = HashMap::new();
        for e in &all {
            seen.entry(e.session_id).or_default().push(e.kind);
        }
        assert_eq!(seen.len(), 2);
        for kinds in seen.values() {
            assert_eq!(kinds.first(), Some(&TouchEventKind::Add));
            assert_eq!(kinds.last(), Some(&TouchEventKind::Remove));
            assert!(kinds[1..kinds.len() - 1]
                .iter()
                .all(|k| *k == TouchEventKind::Update));
        }
    }

    #[test]
    fn session_ids_are_never_reused() {
        let ids = Arc::new(SessionIds::new());
        let mut t = TouchTracker::new(0, &TrackingParams::default(), ids.clone());
        for frame in 1..=3 {
            step(&mut t, frame, &[cand(0.5, 0.5)]);
        }
        let first: Vec<u32> = t.alive().map(|touch| touch.session_id).collect();
        for frame in 4..=7 {
            step(&mut t, frame, &[]);
        }
        for frame in 8..=10 {
            step(&mut t, frame, &[cand(0.5, 0.5)]);
        }
        let second: Vec<u32> = t.alive().map(|touch| touch.session_id).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0], second[0]);
        assert!(second[0] > first[0]);
    }

    #[test]
    fn moving_touch_keeps_its_id() {
        let mut t = tracker();
        let mut ids = std::collections::HashSet::new();
        for frame in 1..=12 {
            let u = 0.2 + frame as f32 * 0.02;
            for e in step(&mut t, frame, &[cand(u, 0.5)]) {
                ids.insert(e.session_id);
            }
        }
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn far_candidate_outside_gate_becomes_a_new_touch() {
        let mut t = tracker();
        for frame in 1..=3 {
            step(&mut t, frame, &[cand(0.1, 0.1)]);
        }
        // A jump far past the gate radius cannot be the same touch.
        step(&mut t, 4, &[cand(0.9, 0.9)]);
        assert_eq!(t.touches.len(), 2);
    }

    #[test]
    fn confirmed_touches_keep_their_distance() {
        let mut t = tracker();
        // Two touches far enough apart to confirm separately.
        for frame in 1..=3 {
            step(&mut t, frame, &[cand(0.40, 0.5), cand(0.60, 0.5)]);
        }
        assert_eq!(t.alive().count(), 2);
        // Drive them onto the same spot.
        let mut events = Vec::new();
        for frame in 4..=12 {
            events.extend(step(&mut t, frame, &[cand(0.5, 0.5), cand(0.5, 0.5)]));
        }
        let merge_radius = TrackingParams::default().merge_radius * std::f32::consts::SQRT_2;
        let alive: Vec<&Touch> = t.alive().collect();
        for i in 0..alive.len() {
            for j in (i + 1)..alive.len() {
                let du = alive[i].u - alive[j].u;
                let dv = alive[i].v - alive[j].v;
                assert!((du * du + dv * dv).sqrt() > merge_radius);
            }
        }
        assert!(events.iter().any(|e| e.kind == TouchEventKind::Remove));
    }

    #[test]
    fn dense_assignment_beats_greedy_pairing() {
        // Greedy takes the cheapest pair (r0, c0) first and forces r1
        // onto the expensive candidate; the optimal matching swaps them.
        let cost = vec![1.0, 2.0, 1.1, 10.0];
        assert_eq!(min_cost_assignment(&cost, 2, 2), vec![1, 0]);
    }

    #[test]
    fn dense_assignment_handles_rectangular_matrices() {
        let cost = vec![5.0, 4.0, 0.1, 0.2, 6.0, 7.0];
        assert_eq!(min_cost_assignment(&cost, 2, 3), vec![2, 0]);
    }

    #[test]
    fn crowded_frames_keep_ids_through_optimal_assignment() {
        let mut t = tracker();
        // 14 touches: past the greedy limit, so the dense solver runs.
        let grid: Vec<MappedCandidate> =
            (0..14).map(|i| cand(0.03 + i as f32 * 0.07, 0.5)).collect();
        for frame in 1..=3 {
            step(&mut t, frame, &grid);
        }
        let before: Vec<u32> = t.alive().map(|touch| touch.session_id).collect();
        assert_eq!(before.len(), 14);

        // Everything drifts one step; every touch must keep its id.
        let moved: Vec<MappedCandidate> =
            (0..14).map(|i| cand(0.04 + i as f32 * 0.07, 0.5)).collect();
        let events = step(&mut t, 4, &moved);
        assert_eq!(events.len(), 14);
        assert!(events.iter().all(|e| e.kind == TouchEventKind::Update));
        let after: Vec<u32> = t.alive().map(|touch| touch.session_id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn positions_stay_normalized() {
        let mut t = tracker();
        // Candidates at the very edge with motion pushing outwards.
        for frame in 1..=10 {
            step(&mut t, frame, &[cand(1.0, 1.0)]);
            for touch in t.alive() {
                assert!((0.0..=1.0).contains(&touch.u));
                assert!((0.0..=1.0).contains(&touch.v));
            }
        }
    }
}
