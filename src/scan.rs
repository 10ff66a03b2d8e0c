use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::{ScannerKind, SensorConfig};
use crate::errors::PipelineError;
use crate::hokuyo::HokuyoScanner;

/// One complete revolution of range samples. Ranges are in meters;
/// `0.0` marks an invalid sample (no return or out of range).
#[derive(Debug, Clone)]
pub struct Scan {
    /// Monotonic timestamp, nanoseconds.
    pub t_ns: u64,
    pub ranges: Vec<f32>,
}

/// Fixed per-source properties: every scan from one source has exactly
/// `samples` entries spaced `step_rad` apart.
#[derive(Debug, Clone, Copy)]
pub struct ScanMeta {
    pub samples: usize,
    pub step_rad: f32,
}

pub trait Scanner: Send {
    fn meta(&self) -> ScanMeta;

    /// Blocks until the next scan or a timeout. Timestamps are
    /// guaranteed monotonic non-decreasing for the lifetime of the
    /// source.
    fn next_scan(&mut self) -> Result<Scan, PipelineError>;
}

/// On-disk script for the mock scanner. Ranges are in millimeters, the
/// hardware's native unit; conversion to meters happens at this boundary
/// like it does for the real scanner.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScanScript {
    #[serde(default = "default_step_deg")]
    pub angular_step_deg: f32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub frames_mm: Vec<Vec<f32>>,
}

fn default_step_deg() -> f32 {
    0.25
}

fn default_interval_ms() -> u64 {
    25
}

/// Shared pause flag for a mock scanner; while raised, `next_scan`
/// fails with `ScanTimeout`.
#[derive(Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn set_paused(&self, paused: bool) {
        self.0.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scripted scanner used by the test suite and for hardware-free bring-up.
/// Emits its frames in order at the scripted interval, then times out.
pub struct MockScanner {
    meta: ScanMeta,
    frames: Vec<Vec<f32>>,
    cursor: usize,
    interval: Duration,
    t_step_ns: u64,
    started: Instant,
    pause: PauseHandle,
}

impl MockScanner {
    /// Frames given in meters, ready to emit.
    pub fn from_frames(frames: Vec<Vec<f32>>, step_rad: f32, interval: Duration) -> Self {
        let samples = frames.first().map(Vec::len).unwrap_or(0);
        let t_step_ns = if interval.is_zero() {
            25_000_000
        } else {
            interval.as_nanos() as u64
        };
        MockScanner {
            meta: ScanMeta { samples, step_rad },
            frames,
            cursor: 0,
            interval,
            t_step_ns,
            started: Instant::now(),
            pause: PauseHandle::default(),
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read scan script \"{}\": {}", path, e))?;
        let script: ScanScript = serde_json::from_str(&text)
            .map_err(|e| anyhow!("failed to parse scan script \"{}\": {}", path, e))?;
        if script.frames_mm.is_empty() {
            return Err(anyhow!("scan script \"{}\" contains no frames", path));
        }
        let samples = script.frames_mm[0].len();
        if script.frames_mm.iter().any(|f| f.len() != samples) {
            return Err(anyhow!(
                "scan script \"{}\" has frames of differing lengths",
                path
            ));
        }
        info!(
            "Loaded scan script \"{}\": {} frames of {} samples",
            path,
            script.frames_mm.len(),
            samples
        );
        let frames = script
            .frames_mm
            .into_iter()
            .map(|f| f.into_iter().map(|mm| mm / 1000.0).collect())
            .collect();
        Ok(MockScanner::from_frames(
            frames,
            script.angular_step_deg.to_radians(),
            Duration::from_millis(script.interval_ms),
        ))
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }
}

impl Scanner for MockScanner {
    fn meta(&self) -> ScanMeta {
        self.meta
    }

    fn next_scan(&mut self) -> Result<Scan, PipelineError> {
        if self.pause.is_paused() {
            thread::sleep(self.interval.max(Duration::from_millis(1)));
            return Err(PipelineError::ScanTimeout);
        }
        if self.cursor >= self.frames.len() {
            // Script exhausted: behave like a stalled source.
            thread::sleep(self.interval.max(Duration::from_millis(1)));
            return Err(PipelineError::ScanTimeout);
        }
        if !self.interval.is_zero() {
            let due = self.interval * self.cursor as u32;
            let elapsed = self.started.elapsed();
            if due > elapsed {
                thread::sleep(due - elapsed);
            }
        }
        let scan = Scan {
            t_ns: self.cursor as u64 * self.t_step_ns,
            ranges: self.frames[self.cursor].clone(),
        };
        self.cursor += 1;
        Ok(scan)
    }
}

/// Opens the scanner named by a sensor's config. The returned source is
/// ready to deliver scans; hardware connect failures surface here.
pub fn open_scanner(sensor: &SensorConfig) -> Result<Box<dyn Scanner>> {
    match &sensor.scanner {
        ScannerKind::Mock { script } => {
            let scanner = MockScanner::from_file(script)?;
            Ok(Box::new(scanner))
        }
        ScannerKind::Hokuyo { host, port } => {
            let scanner = HokuyoScanner::connect(host, *port)
                .map_err(|e| anyhow!("failed to open scanner at {}:{}: {}", host, port, e))?;
            Ok(Box::new(scanner))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_emits_frames_in_order_with_monotonic_timestamps() {
        let frames = vec![vec![1.0; 8], vec![2.0; 8], vec![3.0; 8]];
        let mut s = MockScanner::from_frames(frames, 0.1, Duration::ZERO);
        let a = s.next_scan().unwrap();
        let b = s.next_scan().unwrap();
        let c = s.next_scan().unwrap();
        assert_eq!(a.ranges[0], 1.0);
        assert_eq!(b.ranges[0], 2.0);
        assert_eq!(c.ranges[0], 3.0);
        assert!(a.t_ns < b.t_ns && b.t_ns < c.t_ns);
        assert!(matches!(
            s.next_scan(),
            Err(PipelineError::ScanTimeout)
        ));
    }

    #[test]
    fn paused_mock_times_out() {
        let mut s = MockScanner::from_frames(vec![vec![1.0; 4]], 0.1, Duration::ZERO);
        let pause = s.pause_handle();
        pause.set_paused(true);
        assert!(matches!(s.next_scan(), Err(PipelineError::ScanTimeout)));
        pause.set_paused(false);
        assert!(s.next_scan().is_ok());
    }

    #[test]
    fn script_parses_and_converts_to_meters() {
        let json = r#"{
            "angularStepDeg": 0.5,
            "intervalMs": 0,
            "framesMm": [[1000.0, 2000.0], [1500.0, 0.0]]
        }"#;
        let dir = std::env::temp_dir().join("lidar-touch-scan-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("script.json");
        std::fs::write(&path, json).unwrap();
        let mut s = MockScanner::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(s.meta().samples, 2);
        let scan = s.next_scan().unwrap();
        assert_eq!(scan.ranges, vec![1.0, 2.0]);
        let scan = s.next_scan().unwrap();
        assert_eq!(scan.ranges, vec![1.5, 0.0]);
    }
}
