//! Riffsync Player - headless host for tutorial workflows
//!
//! Loads a workflow payload (JSON), fetches its assets, plays it for a few
//! seconds and logs every event a widget would receive. Useful for checking
//! content and output devices without a UI.
//!
//! ## Usage
//!
//! ```text
//! riffsync-player [OPTIONS] [WORKFLOW.json]
//! ```
//!
//! - `--seconds N`: play for N seconds (default 8)
//! - `--tempo BPM`: override the workflow tempo after loading
//! - `--pitch N`: transpose by N semitones
//! - `--null`: render to the null backend instead of a device
//! - `--config PATH`: config file (default `<config_dir>/riffsync/config.yaml`)
//! - `--list-devices`: print output devices and exit
//!
//! Relative asset urls resolve against the workflow file's directory; http(s)
//! urls are fetched over the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use riffsync_core::assets::{FileFetcher, HttpFetcher, RoutingFetcher, WorkflowPayload};
use riffsync_core::audio::BackendKind;
use riffsync_core::config::{default_config_path, EngineConfig};
use riffsync_core::engine::{AudioSourceConfig, Engine};
use riffsync_core::sync::{EventType, SubscribeOptions, SyncBus, SyncEvent};

const DEFAULT_PLAY_SECONDS: u64 = 8;

#[derive(Debug, Default)]
struct Args {
    workflow: Option<PathBuf>,
    config: Option<PathBuf>,
    seconds: Option<u64>,
    tempo: Option<f64>,
    pitch: Option<f32>,
    null_output: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => args.seconds = Some(next_value(&mut iter, "--seconds")?),
            "--tempo" => args.tempo = Some(next_value(&mut iter, "--tempo")?),
            "--pitch" => args.pitch = Some(next_value(&mut iter, "--pitch")?),
            "--config" => args.config = Some(next_value(&mut iter, "--config")?),
            "--null" => args.null_output = true,
            "--list-devices" => args.list_devices = true,
            flag if flag.starts_with("--") => bail!("Unknown flag {}", flag),
            path => args.workflow = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

fn next_value<T>(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = iter
        .next()
        .with_context(|| format!("{} needs a value", flag))?;
    raw.parse()
        .with_context(|| format!("Invalid value for {}: {}", flag, raw))
}

#[cfg(feature = "cpal-backend")]
fn list_devices() -> Result<()> {
    let devices = riffsync_core::audio::list_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        println!(
            "{}  [{} ch, {:?} Hz]",
            device, device.max_channels, device.sample_rates
        );
    }
    Ok(())
}

#[cfg(not(feature = "cpal-backend"))]
fn list_devices() -> Result<()> {
    println!("Built without the cpal backend; only the null output is available");
    Ok(())
}

/// Stand-in for the UI widgets: log what each one would receive
fn attach_widget_log(bus: &SyncBus) {
    let log_event = |event: &SyncEvent| match serde_json::to_string(event) {
        Ok(json) => log::info!("[WIDGET] {}", json),
        Err(e) => log::warn!("[WIDGET] Unserializable {} event: {}", event.event_type(), e),
    };

    for event_type in EventType::ALL {
        if event_type == EventType::TimelineUpdate {
            continue;
        }
        bus.on(event_type, log_event);
    }

    // The playhead widget redraws at most a few times per second
    bus.subscribe_with(
        EventType::TimelineUpdate,
        Arc::new(|event: &SyncEvent| log::debug!("[WIDGET] playhead {:?}", event.payload)),
        SubscribeOptions::throttle_ms(250),
    );
}

fn load_payload(path: &Path) -> Result<WorkflowPayload> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow {:?}", path))?;
    WorkflowPayload::from_json(&json).with_context(|| format!("Invalid workflow JSON in {:?}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    if args.list_devices {
        return list_devices();
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::load_default(),
    };
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    if args.null_output {
        config.audio.backend = BackendKind::Null;
    }
    log::info!(
        "riffsync-player starting ({} output, config {:?})",
        config.audio.backend,
        config_path
    );

    let bus = SyncBus::new(config.bus.clone());
    attach_widget_log(&bus);

    let asset_timeout = Duration::from_millis(config.assets.asset_timeout_ms);
    let engine = Engine::new(config, bus.clone());

    // Sources are buffered until the output is up
    let payload = match &args.workflow {
        Some(path) => Some(load_payload(path)?),
        None => None,
    };
    if let Some(payload) = &payload {
        for (index, url) in payload.bass_notes().iter().enumerate() {
            let source = AudioSourceConfig::new(format!("bass-{}", index + 1)).with_asset(url.as_str());
            engine.register_audio_source(source)?;
        }
    }

    engine
        .initialize()
        .await
        .context("Audio output unavailable (try --null)")?;

    if let (Some(payload), Some(path)) = (&payload, &args.workflow) {
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let fetcher = RoutingFetcher::new(FileFetcher::new(root), HttpFetcher::new(asset_timeout));
        let summary = engine.load_workflow(payload, Arc::new(fetcher)).await?;
        for warning in &summary.warnings {
            log::warn!("[ENGINE] {}", warning);
        }
        if !summary.failed.is_empty() {
            log::warn!("[ENGINE] Playing without: {}", summary.failed.join(", "));
        }
    } else {
        log::info!("No workflow given; playing silence to exercise the output");
    }

    if let Some(tempo) = args.tempo {
        engine.set_tempo(tempo);
    }
    if let Some(pitch) = args.pitch {
        engine.set_pitch(pitch);
    }

    engine.play();
    let seconds = args.seconds.unwrap_or(DEFAULT_PLAY_SECONDS);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    log::info!("Played to {:.0} ms", engine.current_time_ms());
    engine.stop();

    let metrics = engine.performance_metrics();
    log::info!(
        "Bus: {} events, {:.3} ms average latency, {} dropped updates",
        metrics.total_events,
        metrics.average_latency_ms,
        metrics.dropped_updates
    );

    engine.dispose();
    Ok(())
}
