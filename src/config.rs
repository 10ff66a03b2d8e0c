use std::fs;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::screens::ScreenRect;

/// Closed set of scanner backends. The mock variant replays a scripted
/// scan file; the hardware variant speaks SCIP 2.0 to a Hokuyo UST unit.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ScannerKind {
    Mock { script: String },
    Hokuyo { host: String, port: u16 },
}

/// Where the sensor sits in the world and how it is mounted. Units are
/// meters and radians; `mount_offset` is the angle of the scan's first
/// beam in the sensor frame (-135 degrees on a UST-10LX).
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct SensorPose {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub mount_offset: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    pub id: u32,
    pub name: String,
    pub scanner: ScannerKind,
    pub pose: SensorPose,

    /// Frames of background learning before the sensor produces output.
    pub learning_frames: usize,

    /// How much closer than the learned background a return must be (in
    /// meters) to count as foreground.
    pub foreground_threshold: f32,

    // -------- CLUSTERING SETTINGS
    /// Neighbourhood radius in meters for density clustering.
    pub cluster_eps: f32,

    /// Min points (including the point itself) for a core point.
    pub cluster_min_pts: usize,

    /// Drop clusters whose bounding radius exceeds this (meters).
    pub max_cluster_radius: Option<f32>,

    /// Valid return gates in meters.
    pub min_range: f32,
    pub max_range: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            id: 0,
            name: String::from("Sensor 1"),
            scanner: ScannerKind::Mock {
                script: String::from("./scan-script.json"),
            },
            pose: SensorPose {
                x: 0.0,
                y: 0.0,
                heading: 0.0,
                mount_offset: -135.0_f32.to_radians(),
            },
            learning_frames: 30,
            foreground_threshold: 0.04,
            cluster_eps: 0.03,
            cluster_min_pts: 3,
            max_cluster_radius: Some(0.15),
            min_range: 0.02,
            max_range: 10.0,
        }
    }
}

/// One TUIO destination, subscribed to a single screen.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TuioOutput {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub screen_id: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Global tracking/fusion/emission parameters, shared by all screens.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct TrackingParams {
    /// How close two candidates or touches may get, as a fraction of
    /// the screen diagonal, before they merge.
    pub merge_radius: f32,

    /// Assignment gate between a predicted touch position and a
    /// candidate, as a fraction of the screen diagonal.
    pub gate_radius: f32,

    /// Blend factor from predicted toward measured position
    /// (1.0 is immediate, i.e. no smoothing; 0 is invalid).
    pub position_smoothing: f32,

    /// Exponential smoothing factor for velocity.
    pub velocity_smoothing: f32,

    /// Frames a touch must survive before it is announced.
    pub birth_grace: u32,

    /// Consecutive missed frames before a confirmed touch expires.
    pub death_threshold: u32,

    /// Liveness bundle cadence for silent frames, milliseconds.
    pub heartbeat_ms: u64,

    /// Nominal frame spacing, used when a screen has to coast without
    /// fresh scans.
    pub frame_interval_ms: u64,
}

impl Default for TrackingParams {
    fn default() -> Self {
        TrackingParams {
            merge_radius: 0.02,
            gate_radius: 0.08,
            position_smoothing: 0.5,
            velocity_smoothing: 0.3,
            birth_grace: 2,
            death_threshold: 3,
            heartbeat_ms: 1000,
            frame_interval_ms: 25,
        }
    }
}

/// The immutable configuration snapshot consumed by the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub sensors: Vec<SensorConfig>,
    pub screens: Vec<ScreenRect>,
    pub outputs: Vec<TuioOutput>,
    #[serde(default)]
    pub tracking: TrackingParams,
}

impl AppConfig {
    /// Full structural validation; the pipeline refuses to initialize
    /// on any failure here.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::ConfigInvalid(msg));

        if self.sensors.is_empty() {
            return fail("no sensors configured".into());
        }
        if self.screens.is_empty() {
            return fail("no screens configured".into());
        }
        for (i, s) in self.sensors.iter().enumerate() {
            if self.sensors[..i].iter().any(|o| o.id == s.id) {
                return fail(format!("duplicate sensor id {}", s.id));
            }
            if s.cluster_eps <= 0.0 {
                return fail(format!("sensor {}: clusterEps must be positive", s.id));
            }
            if s.cluster_min_pts == 0 {
                return fail(format!("sensor {}: clusterMinPts must be at least 1", s.id));
            }
            if s.foreground_threshold <= 0.0 {
                return fail(format!(
                    "sensor {}: foregroundThreshold must be positive",
                    s.id
                ));
            }
            if s.learning_frames == 0 {
                return fail(format!("sensor {}: learningFrames must be at least 1", s.id));
            }
            if s.min_range < 0.0 || s.max_range <= s.min_range {
                return fail(format!("sensor {}: invalid range gates", s.id));
            }
        }
        for (i, s) in self.screens.iter().enumerate() {
            if self.screens[..i].iter().any(|o| o.id == s.id) {
                return fail(format!("duplicate screen id {}", s.id));
            }
            if s.width <= 0.0 || s.height <= 0.0 {
                return fail(format!("screen {}: width/height must be positive", s.id));
            }
            for sensor_id in &s.sensor_ids {
                if !self.sensors.iter().any(|sn| sn.id == *sensor_id) {
                    return fail(format!(
                        "screen {} references unknown sensor {}",
                        s.id, sensor_id
                    ));
                }
            }
        }
        for o in &self.outputs {
            if !self.screens.iter().any(|s| s.id == o.screen_id) {
                return fail(format!(
                    "output \"{}\" references unknown screen {}",
                    o.name, o.screen_id
                ));
            }
        }
        let t = &self.tracking;
        if !(0.0..=1.0).contains(&t.position_smoothing) || t.position_smoothing == 0.0 {
            return fail("positionSmoothing must be in (0, 1]".into());
        }
        if !(0.0..=1.0).contains(&t.velocity_smoothing) || t.velocity_smoothing == 0.0 {
            return fail("velocitySmoothing must be in (0, 1]".into());
        }
        if t.merge_radius <= 0.0 || t.gate_radius <= 0.0 {
            return fail("mergeRadius and gateRadius must be positive".into());
        }
        if t.death_threshold == 0 {
            return fail("deathThreshold must be at least 1".into());
        }
        Ok(())
    }

    pub fn write_config_to_file(&self, config_file_path: &str) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, text)
            .map_err(|e| anyhow!("error writing config to {}: {}", config_file_path, e))?;
        info!("Wrote config to file: {:?}", config_file_path);
        Ok(())
    }
}

pub fn load_config_from_file(config_file_path: &str) -> Result<AppConfig> {
    match fs::read_to_string(config_file_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file not found, will create a blank one at {}",
                config_file_path
            );
            let config = AppConfig::default();
            config.write_config_to_file(config_file_path)?;
            Ok(config)
        }
        Err(e) => Err(anyhow!(
            "failed to load config from {}: {}",
            config_file_path,
            e
        )),
        Ok(s) => match serde_json::from_str::<AppConfig>(&s) {
            Ok(loaded_config) => {
                info!("Loaded config OK from \"{}\"", config_file_path);
                debug!("Config parsed data from file: {:?}", &loaded_config);
                Ok(loaded_config)
            }
            Err(e) => Err(anyhow!("failed to parse config data: {}", e)),
        },
    }
}
