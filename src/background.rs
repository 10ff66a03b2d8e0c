use log::{debug, info};

use crate::errors::PipelineError;

/// Per-angle reference distances for one sensor. The reference is the
/// MINIMUM valid range observed during the learning window: the
/// background is the farthest fixed obstacle, and anything that enters
/// the scanning plane afterwards appears closer, never farther.
#[derive(Debug)]
pub struct BackgroundModel {
    reference: Vec<f32>,
    counts: Vec<u32>,
    frames_fed: usize,
    learning_frames: usize,
    threshold: f32,
    min_range: f32,
    max_range: f32,
    learning: bool,
}

impl BackgroundModel {
    pub fn new(
        samples: usize,
        learning_frames: usize,
        threshold: f32,
        min_range: f32,
        max_range: f32,
    ) -> Self {
        BackgroundModel {
            reference: vec![f32::INFINITY; samples],
            counts: vec![0; samples],
            frames_fed: 0,
            learning_frames: learning_frames.max(1),
            threshold,
            min_range,
            max_range,
            learning: true,
        }
    }

    pub fn samples(&self) -> usize {
        self.reference.len()
    }

    pub fn is_learning(&self) -> bool {
        self.learning
    }

    pub fn is_ready(&self) -> bool {
        !self.learning
    }

    pub fn learning_progress(&self) -> f32 {
        if !self.learning {
            return 1.0;
        }
        self.frames_fed as f32 / self.learning_frames as f32
    }

    /// Learned reference distances, for observers. Unpopulated angles
    /// hold infinity.
    pub fn reference(&self) -> &[f32] {
        &self.reference
    }

    /// Feeds one frame during learning. Returns Ok(true) when the
    /// window completes and the model freezes. If the window completes
    /// with fewer than half the angles populated, learning restarts
    /// from scratch and `InsufficientBackground` is returned.
    pub fn learn_frame(&mut self, ranges: &[f32]) -> Result<bool, PipelineError> {
        if !self.learning || ranges.len() != self.reference.len() {
            return Ok(false);
        }
        for (i, &s) in ranges.iter().enumerate() {
            if s > 0.0 {
                if s < self.reference[i] {
                    self.reference[i] = s;
                }
                self.counts[i] += 1;
            }
        }
        self.frames_fed += 1;
        if self.frames_fed < self.learning_frames {
            return Ok(false);
        }

        let covered = self.counts.iter().filter(|&&c| c > 0).count();
        let total = self.reference.len();
        if covered * 2 < total {
            debug!("background learning failed: {}/{} angles", covered, total);
            self.reset();
            return Err(PipelineError::InsufficientBackground { covered, total });
        }
        info!(
            "background learned over {} frames, {}/{} angles populated",
            self.learning_frames, covered, total
        );
        self.learning = false;
        Ok(true)
    }

    /// Applies new classification parameters; takes effect on the next
    /// frame, without disturbing the learned reference.
    pub fn update_params(&mut self, threshold: f32, min_range: f32, max_range: f32) {
        self.threshold = threshold;
        self.min_range = min_range;
        self.max_range = max_range;
    }

    /// Discards the model and re-enters learning.
    pub fn reset(&mut self) {
        self.reference.fill(f32::INFINITY);
        self.counts.fill(0);
        self.frames_fed = 0;
        self.learning = true;
    }

    /// Foreground classification against the frozen model. A sample is
    /// foreground iff it is a valid return inside the range gates and
    /// sits at least `threshold` closer than the reference (ties count
    /// as foreground). Pure: the same scan always yields the same mask.
    pub fn classify(&self, ranges: &[f32], mask: &mut Vec<bool>) {
        mask.clear();
        if self.learning || ranges.len() != self.reference.len() {
            mask.resize(ranges.len(), false);
            return;
        }
        mask.extend(ranges.iter().enumerate().map(|(i, &s)| {
            s > 0.0
                && s >= self.min_range
                && s <= self.max_range
                && self.counts[i] > 0
                && self.reference[i] - s >= self.threshold
        }));
    }
}
