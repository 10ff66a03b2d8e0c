use crate::screens::MappedCandidate;

/// Deduplicates one screen's candidates across sensors: any pair closer
/// than `merge_radius` (normalized units) collapses into a single
/// candidate at the point-count-weighted centroid. Merging repeats until
/// no pair remains within the radius.
pub fn merge_candidates(candidates: &mut Vec<MappedCandidate>, merge_radius: f32) {
    loop {
        let mut merged_any = false;
        'outer: for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let a = candidates[i];
                let b = candidates[j];
                let du = a.u - b.u;
                let dv = a.v - b.v;
                if (du * du + dv * dv).sqrt() < merge_radius {
                    let wa = a.count.max(1) as f32;
                    let wb = b.count.max(1) as f32;
                    let w = wa + wb;
                    candidates[i] = MappedCandidate {
                        screen_id: a.screen_id,
                        u: (a.u * wa + b.u * wb) / w,
                        v: (a.v * wa + b.v * wb) / w,
                        count: a.count + b.count,
                        sensor_id: a.sensor_id,
                        t_ns: a.t_ns.max(b.t_ns),
                    };
                    candidates.swap_remove(j);
                    merged_any = true;
                    break 'outer;
                }
            }
        }
        if !merged_any {
            return;
        }
    }
}
