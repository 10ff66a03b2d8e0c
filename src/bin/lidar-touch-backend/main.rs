mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use env_logger::Env;
use log::{debug, info, warn};

use lidar_touch::config::{load_config_from_file, ScannerKind};
use lidar_touch::events::PipelineEvent;
use lidar_touch::pipeline::Pipeline;

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize the logger from the environment
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    let mut config = load_config_from_file(&cli.config_path)?;

    if let Some(script) = &cli.mock_script {
        info!("Replacing all scanners with mock script \"{}\"", script);
        for sensor in &mut config.sensors {
            sensor.scanner = ScannerKind::Mock {
                script: script.clone(),
            };
        }
    }

    if cli.check_config {
        config.validate()?;
        info!("Config at \"{}\" is valid", cli.config_path);
        return Ok(());
    }

    let pipeline = Pipeline::start(config)?;
    let events = pipeline.subscribe();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install signal handler");
    }

    // Observers (GUI, recorders) subscribe the same way this loop does.
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(PipelineEvent::Touch(e)) => {
                debug!(
                    "{:?} session {} on screen {} at ({:.3}, {:.3})",
                    e.kind, e.session_id, e.screen_id, e.u, e.v
                );
            }
            Ok(PipelineEvent::SensorStale { sensor_id, stale }) => {
                if stale {
                    warn!("sensor {} went stale", sensor_id);
                } else {
                    info!("sensor {} recovered", sensor_id);
                }
            }
            Ok(PipelineEvent::BackgroundLearned { sensor_id }) => {
                info!("sensor {} finished background learning", sensor_id);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Interrupted; shutting down");
    pipeline.shutdown();
    Ok(())
}
