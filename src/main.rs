use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flight_live::community::CommunityDatabase;
use flight_live::config::{parse_args, Command, Config};
use flight_live::identify::Identifier;
use flight_live::logging::init as init_logging;
use flight_live::poller::{spawn_poller, OpenSkyClient, PollOutcome, Poller};
use flight_live::session::InterruptionSession;
use flight_live::state::{RenderableFlight, SharedState};
use flight_live::status::StatusReport;
use flight_live::update::{DatabaseUpdater, HttpDownloader};
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let (config, command) = parse_args()?;
    let _log_guard = init_logging(&config);
    info!("flight-live starting");
    debug!("config path: {}", config.config_path.display());
    config.validate()?;

    match command {
        Command::Run { run_for } => run(config, run_for),
        Command::Once => once(config),
        Command::Status => status(&config),
        Command::Lookup { hex, callsign } => lookup(&config, &hex, callsign.as_deref()),
        Command::ImportCommunity { csv } => import_community(&config, &csv),
        Command::UpdateDatabases { force } => update_databases(&config, force),
    }
}

fn shared_state(config: &Config) -> SharedState {
    SharedState::new(
        InterruptionSession::new(config.cooldown, config.max_session),
        config.display_duration,
    )
}

fn build_poller(
    config: &Config,
    identifier: Arc<Identifier>,
    state: SharedState,
) -> Result<Poller> {
    let client = OpenSkyClient::new(config)?;
    Ok(Poller::new(
        config.clone(),
        Box::new(client),
        identifier,
        state,
    ))
}

fn run(config: Config, run_for: Option<Duration>) -> Result<()> {
    let identifier = Arc::new(Identifier::from_config(&config));
    let state = shared_state(&config);
    let stop = Arc::new(AtomicBool::new(false));

    let poller_handle = if config.enabled {
        let poller = build_poller(&config, Arc::clone(&identifier), state.clone())?;
        Some(spawn_poller(poller, Arc::clone(&stop)))
    } else {
        warn!("flight tracking disabled; nothing will interrupt the display");
        None
    };

    let started = Instant::now();
    let mut last_frame: Option<String> = None;
    loop {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        let frame = if state.has_live_content() {
            state.current_record().map(|flight| render_frame(&flight))
        } else {
            None
        };
        if frame != last_frame {
            match frame.as_deref() {
                Some(text) => info!("display: {}", text),
                None if last_frame.is_some() => info!("display: back to normal rotation"),
                None => {}
            }
            last_frame = frame;
        }
        thread::sleep(config.render_tick);
    }

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = poller_handle {
        if handle.join().is_err() {
            warn!("poller thread panicked");
        }
    }
    info!("flight-live stopped");
    Ok(())
}

fn render_frame(flight: &RenderableFlight) -> String {
    let mut parts = vec![flight.callsign.clone(), flight.type_code.to_string()];
    if let Some(name) = &flight.display_name {
        parts.push(name.clone());
    }
    parts.push(format!("{:.1}km {}", flight.distance_km, flight.compass));
    if let Some(alt) = flight.altitude_ft {
        parts.push(format!("{}ft", alt));
    }
    if flight.count > 1 {
        parts.push(format!("({}/{})", flight.position, flight.count));
    }
    parts.join(" ")
}

fn once(config: Config) -> Result<()> {
    if !config.enabled {
        return Err(anyhow!(
            "flight tracking is disabled (set enabled = true or FLIGHT_ENABLED=1)"
        ));
    }
    let identifier = Arc::new(Identifier::from_config(&config));
    let state = shared_state(&config);
    let mut poller = build_poller(&config, identifier, state.clone())?;
    match poller.poll_once() {
        PollOutcome::Failed(err) => return Err(anyhow!("poll failed: {err}")),
        PollOutcome::OutsideWindow => info!("outside the polling window"),
        outcome => debug!("poll outcome: {:?}", outcome),
    }
    let (records, _) = state.snapshot();
    let json = serde_json::to_string_pretty(&*records).context("Failed to encode snapshot")?;
    println!("{json}");
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let identifier = Identifier::from_config(config);
    let state = shared_state(config);
    let report = StatusReport::collect(config, &state, &identifier);
    let json = serde_json::to_string_pretty(&report).context("Failed to encode status")?;
    println!("{json}");
    Ok(())
}

fn lookup(config: &Config, hex: &str, callsign: Option<&str>) -> Result<()> {
    let identifier = Identifier::from_config(config);
    let info = identifier.identify(hex, callsign.unwrap_or(""), None, None);
    let json = serde_json::to_string_pretty(&info).context("Failed to encode aircraft")?;
    println!("{json}");
    Ok(())
}

fn import_community(config: &Config, csv: &Path) -> Result<()> {
    let db_path = Path::new(&config.community_db);
    let db = CommunityDatabase::create(db_path)?;
    let written = db.import_csv(csv)?;
    println!("imported {} aircraft into {}", written, db_path.display());
    Ok(())
}

fn update_databases(config: &Config, force: bool) -> Result<()> {
    let downloader = HttpDownloader::new(config.download_timeout)?;
    let report = DatabaseUpdater::new(config, Box::new(downloader), force).run()?;
    let json = serde_json::to_string_pretty(&report).context("Failed to encode update report")?;
    println!("{json}");
    Ok(())
}
