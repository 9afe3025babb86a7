//! `dronescript` - CLI for the dronescript framework
//!
//! This binary flies the target detection mission against the simulated drone
//! and inspects the mission log it leaves behind.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dronescript::cli::{Cli, Command, ConfigCommand, DetectionsCommand, FlyCommand};
use dronescript::mission::{record_outcome, FAILED_LABEL};
use dronescript::storage::export::write_detections;
use dronescript::{init_logging, Config, DetectionMission, Runner, SimulatedDrone, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config_path = cli.config;

    match cli.command {
        Command::Fly(fly_cmd) => handle_fly(load_config(config_path)?, &fly_cmd).await,
        Command::Status(status_cmd) => handle_status(&load_config(config_path)?, status_cmd.json),
        Command::Detections(detections_cmd) => {
            handle_detections(&load_config(config_path)?, detections_cmd)
        }
        Command::Config(config_cmd) => handle_config(config_path, config_cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

async fn handle_fly(mut config: Config, cmd: &FlyCommand) -> Result<()> {
    cmd.apply(&mut config);
    config.validate().context("invalid flight options")?;

    let storage = Storage::open(config.database_path()).context("failed to open mission log")?;
    let drone = Arc::new(
        SimulatedDrone::new(config.sim.clone(), config.connection.address.clone())
            .with_wifi(config.connection.use_wifi),
    );
    let mission_id = storage.begin_mission(drone.address(), config.flight.climb_mode)?;

    let runner = Runner::new(drone, &config);
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, landing");
            cancel.stop();
        }
    });

    let mission = DetectionMission::new(&config);
    let report = match runner.execute(mission.hooks()).await {
        Ok(report) => report,
        Err(e) => {
            let outcome = mission.outcome()?;
            record_outcome(
                &storage,
                mission_id,
                &outcome,
                FAILED_LABEL,
                &config.flight.target_file,
            )
            .context("failed to record mission outcome")?;
            if let Some(position) = outcome.firing_position.filter(|_| outcome.target_acquired) {
                println!("Firing position: {position}");
                println!("Saved to:        {}", config.flight.target_file.display());
            }
            return Err(e).context("flight failed");
        }
    };
    info!(
        outcome = %report.outcome,
        sensor_events = report.sensor_events,
        vision_events = report.vision_events,
        callback_errors = report.callback_errors,
        elapsed_ms = report.elapsed.as_millis(),
        "Flight finished"
    );

    let outcome = mission.outcome()?;
    record_outcome(
        &storage,
        mission_id,
        &outcome,
        outcome.label(),
        &config.flight.target_file,
    )
    .context("failed to record mission outcome")?;
    if config.storage.max_missions > 0 {
        storage.prune_keep_recent(config.storage.max_missions)?;
    }

    match outcome.firing_position {
        Some(position) if outcome.target_acquired => {
            println!("Firing position: {position}");
            println!("Saved to:        {}", config.flight.target_file.display());
        }
        _ if outcome.emergency => println!("Emergency, no target"),
        _ => println!("No target"),
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<()> {
    let storage = Storage::open(config.database_path()).context("failed to open mission log")?;
    let stats = storage.stats()?;
    let latest = storage.latest_detection()?;

    if json {
        let status = serde_json::json!({
            "drone": config.connection.address,
            "climb_mode": config.flight.climb_mode,
            "vision_enabled": config.vision.enabled,
            "database_path": storage.path(),
            "stats": stats,
            "latest_detection": latest,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("dronescript status");
        println!("------------------");
        println!("Drone:           {}", config.connection.address);
        println!("Climb mode:      {}", config.flight.climb_mode);
        println!("Vision:          {}", config.vision.enabled);
        println!("Database:        {}", storage.path().display());
        println!("Database size:   {} bytes", stats.db_size_bytes);
        println!();
        println!("Missions:        {}", stats.total_missions);
        println!("With target:     {}", stats.missions_with_target);
        println!("Detections:      {}", stats.total_detections);
        if let Some(last) = stats.last_mission {
            println!("Last mission:    {}", last.to_rfc3339());
        }
        if let Some(detection) = latest {
            println!("Last detection:  {}", detection.position);
        }
    }
    Ok(())
}

fn handle_detections(config: &Config, cmd: DetectionsCommand) -> Result<()> {
    let storage = Storage::open(config.database_path()).context("failed to open mission log")?;

    match cmd {
        DetectionsCommand::List { limit, json } => {
            let detections = storage.recent_detections(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detections)?);
            } else if detections.is_empty() {
                println!("No detections recorded.");
            } else {
                for detection in &detections {
                    println!(
                        "#{:<5} mission {:<5} {}  {}  area {}",
                        detection.id.unwrap_or_default(),
                        detection.mission_id,
                        detection.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        detection.position,
                        detection.bbox_area
                    );
                }
            }
        }
        DetectionsCommand::Export { out } => {
            let count = usize::try_from(storage.count_detections()?).unwrap_or(usize::MAX);
            let detections = storage.recent_detections(count)?;
            let written = match out {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let written = write_detections(BufWriter::new(file), &detections)?;
                    eprintln!("Exported {written} detections to {}", path.display());
                    written
                }
                None => write_detections(io::stdout().lock(), &detections)?,
            };
            info!(count = written, "Exported detections");
        }
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Connection]");
                println!("  Address:            {}", config.connection.address);
                println!("  WiFi:               {}", config.connection.use_wifi);
                println!();
                println!("[Flight]");
                println!("  Climb mode:         {}", config.flight.climb_mode);
                println!("  Max altitude (m):   {}", config.flight.max_altitude);
                println!("  Max distance (m):   {}", config.flight.max_distance);
                println!("  Target file:        {}", config.flight.target_file.display());
                println!();
                println!("[Monitors]");
                println!("  Sensor poll (ms):   {}", config.sensors.poll_ms);
                println!("  Vision enabled:     {}", config.vision.enabled);
                println!("  Vision poll (ms):   {}", config.vision.poll_ms);
                println!("  Area threshold:     {}", config.vision.area_threshold);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max missions:       {}", config.storage.max_missions);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
