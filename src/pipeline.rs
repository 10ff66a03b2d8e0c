use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use crate::background::BackgroundModel;
use crate::clustering::{Candidate, ClusterEngine};
use crate::config::{AppConfig, SensorConfig, TrackingParams};
use crate::errors::PipelineError;
use crate::events::{EventBus, PipelineEvent, TouchEvent};
use crate::fusion::merge_candidates;
use crate::geometry::{FgPoint, Projector};
use crate::scan::{open_scanner, Scan, ScanMeta, Scanner};
use crate::screens::{MappedCandidate, ScreenMapper, ScreenRect};
use crate::tracker::{SessionIds, TouchTracker};
use crate::tuio::TuioEmitter;

/// Queue capacity between a sensor worker and a screen worker, in
/// frames. On overflow the oldest frame is dropped; freshness matters
/// more than completeness.
const QUEUE_CAPACITY: usize = 4;

/// How long fusion waits for stragglers once a frame has started.
const FRAME_WINDOW: Duration = Duration::from_millis(10);

/// Continuous scan timeouts beyond this mark the sensor stale.
const STALE_AFTER: Duration = Duration::from_secs(1);

/// One sensor's contribution to one screen for one scan. Sent even when
/// empty so the screen worker can close its frame window.
#[derive(Debug, Clone)]
struct SensorFrame {
    sensor_id: u32,
    t_ns: u64,
    candidates: Vec<MappedCandidate>,
}

/// Shared holder for the active config snapshot. Snapshots themselves
/// are immutable; replacing one swaps the `Arc`, and workers pick the
/// new snapshot up at their next frame boundary.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigHandle {
    fn new(config: Arc<AppConfig>) -> Self {
        ConfigHandle {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.inner.read().unwrap().clone()
    }

    fn replace(&self, config: Arc<AppConfig>) {
        *self.inner.write().unwrap() = config;
    }
}

/// Stages 4.1-4.5 for a single sensor, kept free of threading so the
/// test suite can drive scans through it synchronously.
pub struct SensorStage {
    sensor_id: u32,
    meta: ScanMeta,
    background: BackgroundModel,
    projector: Projector,
    engine: ClusterEngine,
    mapper: ScreenMapper,
    mask: Vec<bool>,
    fg: Vec<FgPoint>,
    candidates: Vec<Candidate>,
}

/// What a sensor produced for one scan.
pub enum StageOutput {
    /// Still learning the background; progress in [0, 1].
    Learning(f32),
    /// Background learning just finished.
    Learned,
    /// Learning window ended with too little coverage; restarted.
    LearningFailed(PipelineError),
    /// Normal operation: candidates mapped onto screens.
    Mapped(Vec<MappedCandidate>),
}

impl SensorStage {
    pub fn new(sensor: &SensorConfig, screens: &[ScreenRect], meta: &ScanMeta) -> Self {
        SensorStage {
            sensor_id: sensor.id,
            meta: *meta,
            background: BackgroundModel::new(
                meta.samples,
                sensor.learning_frames,
                sensor.foreground_threshold,
                sensor.min_range,
                sensor.max_range,
            ),
            projector: Projector::new(&sensor.pose, meta),
            engine: ClusterEngine::new(
                sensor.cluster_eps,
                sensor.cluster_min_pts,
                sensor.max_cluster_radius,
            ),
            mapper: ScreenMapper::new(sensor.id, screens),
            mask: Vec::new(),
            fg: Vec::new(),
            candidates: Vec::new(),
        }
    }

    pub fn is_learning(&self) -> bool {
        self.background.is_learning()
    }

    pub fn reset_background(&mut self) {
        self.background.reset();
    }

    /// Picks up a replaced config snapshot: thresholds, clustering
    /// parameters, pose and screen geometry all move at the next scan.
    pub fn sync_params(&mut self, sensor: &SensorConfig, screens: &[ScreenRect]) {
        self.background.update_params(
            sensor.foreground_threshold,
            sensor.min_range,
            sensor.max_range,
        );
        self.engine.update_params(
            sensor.cluster_eps,
            sensor.cluster_min_pts,
            sensor.max_cluster_radius,
        );
        self.projector = Projector::new(&sensor.pose, &self.meta);
        self.mapper = ScreenMapper::new(sensor.id, screens);
    }

    pub fn process(&mut self, scan: &Scan) -> StageOutput {
        if self.background.is_learning() {
            return match self.background.learn_frame(&scan.ranges) {
                Ok(true) => StageOutput::Learned,
                Ok(false) => StageOutput::Learning(self.background.learning_progress()),
                Err(e) => StageOutput::LearningFailed(e),
            };
        }

        self.background.classify(&scan.ranges, &mut self.mask);
        self.fg.clear();
        for (i, &range) in scan.ranges.iter().enumerate() {
            if self.mask[i] {
                self.fg.push(FgPoint {
                    pos: self.projector.project(i, range),
                    sensor_id: self.sensor_id,
                    index: i,
                    range,
                });
            }
        }

        self.candidates.clear();
        self.engine.cluster(&self.fg, scan.t_ns, &mut self.candidates);

        let mut mapped = Vec::with_capacity(self.candidates.len());
        self.mapper.map(&self.candidates, &mut mapped);
        StageOutput::Mapped(mapped)
    }
}

/// Stages 4.6-4.8 for a single screen: fusion, tracking, emission.
pub struct ScreenStage {
    screen_id: u32,
    merge_radius: f32,
    tracker: TouchTracker,
    last_t_ns: u64,
}

impl ScreenStage {
    pub fn new(screen_id: u32, params: &TrackingParams, ids: Arc<SessionIds>) -> Self {
        ScreenStage {
            screen_id,
            merge_radius: params.merge_radius * std::f32::consts::SQRT_2,
            tracker: TouchTracker::new(screen_id, params, ids),
            last_t_ns: 0,
        }
    }

    pub fn screen_id(&self) -> u32 {
        self.screen_id
    }

    pub fn has_touches(&self) -> bool {
        self.tracker.has_touches()
    }

    pub fn tracker(&self) -> &TouchTracker {
        &self.tracker
    }

    /// Picks up tunable parameters from a replaced config snapshot.
    pub fn sync_params(&mut self, params: &TrackingParams) {
        self.merge_radius = params.merge_radius * std::f32::consts::SQRT_2;
        self.tracker.update_params(params);
    }

    /// Runs one fused frame through the tracker. Timestamps are clamped
    /// to be non-decreasing regardless of sensor clock skew.
    pub fn process_frame(
        &mut self,
        t_ns: u64,
        mut candidates: Vec<MappedCandidate>,
        events: &mut Vec<TouchEvent>,
    ) {
        let t_ns = t_ns.max(self.last_t_ns);
        self.last_t_ns = t_ns;
        merge_candidates(&mut candidates, self.merge_radius);
        self.tracker.process(t_ns, &candidates, events);
    }
}

/// The running core: one worker per sensor, one per screen, and the
/// subscriber-facing event bus.
pub struct Pipeline {
    shutdown: Arc<AtomicBool>,
    events: Arc<EventBus>,
    config: ConfigHandle,
    dropped_frames: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Opens every configured scanner and starts the workers. Fails
    /// fast on invalid config or a scanner that cannot be opened.
    pub fn start(config: AppConfig) -> anyhow::Result<Pipeline> {
        config.validate()?;
        let mut scanners = Vec::with_capacity(config.sensors.len());
        for sensor in &config.sensors {
            scanners.push(open_scanner(sensor)?);
        }
        Self::start_with_scanners(config, scanners)
    }

    /// Starts the pipeline over externally supplied scan sources (the
    /// test suite injects mocks here). Scanners must be in the same
    /// order as `config.sensors`.
    pub fn start_with_scanners(
        config: AppConfig,
        scanners: Vec<Box<dyn Scanner>>,
    ) -> anyhow::Result<Pipeline> {
        config.validate()?;
        assert_eq!(config.sensors.len(), scanners.len());

        let config = Arc::new(config);
        let config_handle = ConfigHandle::new(config.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let events = Arc::new(EventBus::new());
        let dropped_frames = Arc::new(AtomicU64::new(0));
        let session_ids = Arc::new(SessionIds::new());
        let mut workers = Vec::new();

        // One bounded queue per screen; every sensor worker holds a
        // sender (and a receiver clone for the drop-oldest policy).
        let mut screen_channels: IndexMap<u32, (Sender<SensorFrame>, Receiver<SensorFrame>)> =
            IndexMap::new();
        for screen in &config.screens {
            screen_channels.insert(screen.id, bounded(QUEUE_CAPACITY));
        }

        for (sensor, scanner) in config.sensors.iter().zip(scanners) {
            let targets: Vec<(u32, Sender<SensorFrame>, Receiver<SensorFrame>)> = config
                .screens
                .iter()
                .filter(|s| s.allows_sensor(sensor.id))
                .map(|s| {
                    let (tx, rx) = &screen_channels[&s.id];
                    (s.id, tx.clone(), rx.clone())
                })
                .collect();
            let worker = SensorWorker {
                config: config_handle.clone(),
                sensor: sensor.clone(),
                scanner,
                targets,
                events: events.clone(),
                shutdown: shutdown.clone(),
                dropped_frames: dropped_frames.clone(),
            };
            let name = format!("sensor-{}", sensor.id);
            workers.push(
                thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.run())
                    .expect("failed to spawn sensor worker"),
            );
        }

        for screen in &config.screens {
            let (_, rx) = &screen_channels[&screen.id];
            let contributors: Vec<u32> = config
                .sensors
                .iter()
                .filter(|s| screen.allows_sensor(s.id))
                .map(|s| s.id)
                .collect();
            let emitter = TuioEmitter::new(
                &config.outputs,
                screen.id,
                Duration::from_millis(config.tracking.heartbeat_ms),
            )?;
            let worker = ScreenWorker {
                stage: ScreenStage::new(screen.id, &config.tracking, session_ids.clone()),
                config: config_handle.clone(),
                current_config: config.clone(),
                rx: rx.clone(),
                contributors,
                emitter,
                events: events.clone(),
                shutdown: shutdown.clone(),
                frame_interval: Duration::from_millis(config.tracking.frame_interval_ms.max(1)),
            };
            let name = format!("screen-{}", screen.id);
            workers.push(
                thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.run())
                    .expect("failed to spawn screen worker"),
            );
        }

        info!(
            "pipeline started: {} sensors, {} screens, {} outputs",
            config.sensors.len(),
            config.screens.len(),
            config.outputs.len()
        );
        Ok(Pipeline {
            shutdown,
            events,
            config: config_handle,
            dropped_frames,
            workers,
        })
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Replaces the active config snapshot; workers pick it up at their
    /// next frame boundary. Topology (sensors, screens, outputs) is
    /// fixed for the pipeline's lifetime, only parameters may move.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), PipelineError> {
        new_config.validate()?;
        let current = self.config.snapshot();
        let same_sensors = current.sensors.len() == new_config.sensors.len()
            && current
                .sensors
                .iter()
                .zip(&new_config.sensors)
                .all(|(a, b)| a.id == b.id);
        let same_screens = current.screens.len() == new_config.screens.len()
            && current
                .screens
                .iter()
                .zip(&new_config.screens)
                .all(|(a, b)| a.id == b.id);
        if !same_sensors || !same_screens {
            return Err(PipelineError::ConfigInvalid(
                "sensor/screen topology changes require a pipeline restart".into(),
            ));
        }
        self.config.replace(Arc::new(new_config));
        info!("config snapshot replaced");
        Ok(())
    }

    /// Frames discarded to the drop-oldest overflow policy so far.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Stops all workers. Screen workers emit one final empty-alive
    /// bundle per endpoint on the way out; joins everything.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("a pipeline worker panicked during shutdown");
            }
        }
        info!("pipeline stopped");
    }
}

struct SensorWorker {
    config: ConfigHandle,
    sensor: SensorConfig,
    scanner: Box<dyn Scanner>,
    targets: Vec<(u32, Sender<SensorFrame>, Receiver<SensorFrame>)>,
    events: Arc<EventBus>,
    shutdown: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,
}

impl SensorWorker {
    fn run(mut self) {
        let meta = self.scanner.meta();
        let mut current = self.config.snapshot();
        let mut stage = SensorStage::new(&self.sensor, &current.screens, &meta);
        let mut timeouts_since: Option<Instant> = None;
        let mut stale = false;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.scanner.next_scan() {
                Ok(scan) => {
                    timeouts_since = None;
                    if stale {
                        stale = false;
                        info!("sensor {} recovered", self.sensor.id);
                        self.events.publish(PipelineEvent::SensorStale {
                            sensor_id: self.sensor.id,
                            stale: false,
                        });
                    }
                    let snapshot = self.config.snapshot();
                    if !Arc::ptr_eq(&snapshot, &current) {
                        if let Some(sensor) =
                            snapshot.sensors.iter().find(|s| s.id == self.sensor.id)
                        {
                            stage.sync_params(sensor, &snapshot.screens);
                        }
                        current = snapshot;
                    }
                    self.handle_scan(&mut stage, &scan);
                }
                Err(PipelineError::ScanTimeout) => {
                    let since = *timeouts_since.get_or_insert_with(Instant::now);
                    if !stale && since.elapsed() >= STALE_AFTER {
                        stale = true;
                        warn!("sensor {} stale: no scans for 1s", self.sensor.id);
                        self.events.publish(PipelineEvent::SensorStale {
                            sensor_id: self.sensor.id,
                            stale: true,
                        });
                    }
                }
                Err(e) => {
                    error!("sensor {}: {}; reopening", self.sensor.id, e);
                    thread::sleep(Duration::from_secs(1));
                    if let Ok(scanner) = open_scanner(&self.sensor) {
                        self.scanner = scanner;
                        stage.reset_background();
                    }
                }
            }
        }
        debug!("sensor worker {} exiting", self.sensor.id);
    }

    fn handle_scan(&self, stage: &mut SensorStage, scan: &Scan) {
        match stage.process(scan) {
            StageOutput::Learning(_) => {}
            StageOutput::Learned => {
                self.events.publish(PipelineEvent::BackgroundLearned {
                    sensor_id: self.sensor.id,
                });
            }
            StageOutput::LearningFailed(e) => {
                warn!("sensor {}: {}; re-learning", self.sensor.id, e);
            }
            StageOutput::Mapped(mapped) => {
                for (screen_id, tx, rx) in &self.targets {
                    let frame = SensorFrame {
                        sensor_id: self.sensor.id,
                        t_ns: scan.t_ns,
                        candidates: mapped
                            .iter()
                            .filter(|m| m.screen_id == *screen_id)
                            .copied()
                            .collect(),
                    };
                    if let Err(TrySendError::Full(frame)) = tx.try_send(frame) {
                        // Drop the oldest queued frame to make room.
                        let _ = rx.try_recv();
                        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                        debug!("{}", PipelineError::QueueOverflow);
                        let _ = tx.try_send(frame);
                    }
                }
            }
        }
    }
}

struct ScreenWorker {
    stage: ScreenStage,
    config: ConfigHandle,
    current_config: Arc<AppConfig>,
    rx: Receiver<SensorFrame>,
    contributors: Vec<u32>,
    emitter: TuioEmitter,
    events: Arc<EventBus>,
    shutdown: Arc<AtomicBool>,
    frame_interval: Duration,
}

impl ScreenWorker {
    fn run(mut self) {
        let mut pending: IndexMap<u32, SensorFrame> = IndexMap::new();
        let mut window_deadline: Option<Instant> = None;
        let mut events: Vec<TouchEvent> = Vec::new();
        let mut last_frame_at = Instant::now();
        let mut last_t_ns: u64 = 0;

        while !self.shutdown.load(Ordering::SeqCst) {
            let timeout = match window_deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.frame_interval,
            };
            match self.rx.recv_timeout(timeout.max(Duration::from_millis(1))) {
                Ok(frame) => {
                    last_t_ns = last_t_ns.max(frame.t_ns);
                    // A newer frame from the same sensor replaces the
                    // buffered one.
                    pending.insert(frame.sensor_id, frame);
                    if window_deadline.is_none() {
                        window_deadline = Some(Instant::now() + FRAME_WINDOW);
                    }
                    let complete = self
                        .contributors
                        .iter()
                        .all(|id| pending.contains_key(id));
                    if complete {
                        self.close_frame(&mut pending, &mut events, last_t_ns);
                        window_deadline = None;
                        last_frame_at = Instant::now();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if window_deadline.is_some() && !pending.is_empty() {
                        // Deadline passed: missing sensors contribute
                        // nothing this frame.
                        self.close_frame(&mut pending, &mut events, last_t_ns);
                        window_deadline = None;
                        last_frame_at = Instant::now();
                    } else if self.stage.has_touches()
                        && last_frame_at.elapsed() >= self.frame_interval
                    {
                        // No input at all but live touches: coast so
                        // misses accumulate and deaths still happen.
                        last_t_ns += self.frame_interval.as_nanos() as u64;
                        self.close_frame(&mut pending, &mut events, last_t_ns);
                        last_frame_at = Instant::now();
                    } else {
                        let touches: Vec<&crate::tracker::Touch> =
                            self.stage.tracker().alive().collect();
                        self.emitter.emit_frame(&touches, false);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.emitter.emit_final();
        debug!("screen worker {} exiting", self.stage.screen_id());
    }

    fn close_frame(
        &mut self,
        pending: &mut IndexMap<u32, SensorFrame>,
        events: &mut Vec<TouchEvent>,
        t_ns: u64,
    ) {
        let snapshot = self.config.snapshot();
        if !Arc::ptr_eq(&snapshot, &self.current_config) {
            self.stage.sync_params(&snapshot.tracking);
            self.frame_interval =
                Duration::from_millis(snapshot.tracking.frame_interval_ms.max(1));
            self.current_config = snapshot;
        }

        let mut candidates: Vec<MappedCandidate> = Vec::new();
        for (_, frame) in pending.drain(..) {
            candidates.extend(frame.candidates);
        }
        events.clear();
        self.stage.process_frame(t_ns, candidates, events);
        let changed = !events.is_empty();
        for event in events.iter() {
            self.events.publish(PipelineEvent::Touch(*event));
        }
        let touches: Vec<&crate::tracker::Touch> = self.stage.tracker().alive().collect();
        self.emitter.emit_frame(&touches, changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::events::TouchEventKind;
    use crate::scan::MockScanner;

    /// A flat 3 m wall across all angles, with an optional intrusion at
    /// 1 m over a few contiguous beams.
    fn wall_frame(samples: usize, touch_at: Option<usize>) -> Vec<f32> {
        let mut frame = vec![3.0; samples];
        if let Some(center) = touch_at {
            for i in center.saturating_sub(2)..=(center + 2).min(samples - 1) {
                frame[i] = 1.0;
            }
        }
        frame
    }

    fn pipeline_config() -> AppConfig {
        // A 2x2 m screen centred on the sensor so a 1 m intrusion lands
        // inside it.
        AppConfig {
            sensors: vec![SensorConfig {
                pose: crate::config::SensorPose {
                    x: 0.0,
                    y: 0.0,
                    heading: 0.0,
                    mount_offset: 0.0,
                },
                learning_frames: 10,
                ..SensorConfig::default()
            }],
            screens: vec![ScreenRect {
                id: 0,
                name: "Screen 1".into(),
                x: -1.0,
                y: -1.0,
                width: 2.0,
                height: 2.0,
                rotation: 0.0,
                sensor_ids: vec![0],
            }],
            outputs: Vec::new(),
            tracking: TrackingParams::default(),
        }
    }

    #[test]
    fn end_to_end_touch_lifecycle_over_the_threaded_pipeline() {
        let config = pipeline_config();
        let samples = 64;
        let step = 0.005; // radians; keeps the intrusion beams tight
        let mut frames = Vec::new();
        for _ in 0..10 {
            frames.push(wall_frame(samples, None));
        }
        for _ in 0..15 {
            frames.push(wall_frame(samples, Some(32)));
        }
        for _ in 0..10 {
            frames.push(wall_frame(samples, None));
        }
        let scanner = MockScanner::from_frames(frames, step, Duration::from_millis(2));

        let pipeline =
            Pipeline::start_with_scanners(config, vec![Box::new(scanner)]).unwrap();
        let rx = pipeline.subscribe();

        let mut kinds = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(PipelineEvent::Touch(e)) => {
                    kinds.push(e.kind);
                    if e.kind == TouchEventKind::Remove {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        pipeline.shutdown();

        assert!(!kinds.is_empty(), "no touch events seen");
        assert_eq!(kinds[0], TouchEventKind::Add);
        assert_eq!(*kinds.last().unwrap(), TouchEventKind::Remove);
        assert!(kinds[1..kinds.len() - 1]
            .iter()
            .all(|k| *k == TouchEventKind::Update));
    }

    #[test]
    fn background_learned_event_is_published() {
        let config = pipeline_config();
        let frames = vec![wall_frame(64, None); 12];
        let scanner = MockScanner::from_frames(frames, 0.005, Duration::from_millis(5));
        let pipeline =
            Pipeline::start_with_scanners(config, vec![Box::new(scanner)]).unwrap();
        let rx = pipeline.subscribe();

        let mut learned = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !learned {
            if let Ok(PipelineEvent::BackgroundLearned { sensor_id }) =
                rx.recv_timeout(Duration::from_millis(100))
            {
                assert_eq!(sensor_id, 0);
                learned = true;
            }
        }
        pipeline.shutdown();
        assert!(learned);
    }

    #[test]
    fn config_updates_apply_but_topology_changes_are_refused() {
        let config = pipeline_config();
        let frames = vec![wall_frame(64, None); 50];
        let scanner = MockScanner::from_frames(frames, 0.005, Duration::from_millis(5));
        let pipeline =
            Pipeline::start_with_scanners(config.clone(), vec![Box::new(scanner)]).unwrap();

        let mut tuned = config.clone();
        tuned.tracking.merge_radius = 0.05;
        assert!(pipeline.update_config(tuned).is_ok());

        let mut grown = config;
        grown.sensors.push(SensorConfig {
            id: 9,
            ..SensorConfig::default()
        });
        assert!(matches!(
            pipeline.update_config(grown),
            Err(PipelineError::ConfigInvalid(_))
        ));
        pipeline.shutdown();
    }

    #[test]
    fn shutdown_terminates_promptly() {
        let config = pipeline_config();
        let frames = vec![wall_frame(64, None); 200];
        let scanner = MockScanner::from_frames(frames, 0.005, Duration::from_millis(5));
        let pipeline =
            Pipeline::start_with_scanners(config, vec![Box::new(scanner)]).unwrap();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        pipeline.shutdown();
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
