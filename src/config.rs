use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "flight-live.toml";
pub const DEFAULT_ENABLED: bool = false;
pub const DEFAULT_HOME_LAT: f64 = 41.6;
pub const DEFAULT_HOME_LON: f64 = -93.6;
pub const DEFAULT_RADIUS_KM: f64 = 8.0;
pub const DEFAULT_TOKEN_URL: &str =
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token";
pub const DEFAULT_STATES_URL: &str = "https://opensky-network.org/api/states/all";
pub const DEFAULT_START_HOUR: u32 = 6;
pub const DEFAULT_END_HOUR: u32 = 23;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_FLIGHTS: usize = 10;
pub const DEFAULT_MIN_ALTITUDE_M: f64 = 500.0;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;
pub const DEFAULT_TOKEN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POSITIONS_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_FALLBACK_ENABLED: bool = true;
pub const DEFAULT_FALLBACK_URL: &str = "https://hexdb.io/api/v1/aircraft";
pub const DEFAULT_FALLBACK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FALLBACK_MIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_FALLBACK_CACHE_FILE: &str = "data/aircraft_fallback_cache.json";
pub const DEFAULT_REGISTRY_DIR: &str = "data/faa";
pub const DEFAULT_COMMUNITY_DB: &str = "data/aircraft.db";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.faa.gov/database/ReleasableAircraft.zip";
pub const DEFAULT_COMMUNITY_CSV_URL: &str =
    "https://opensky-network.org/datasets/metadata/aircraft-database-complete-2024-07.csv";
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DATABASE_MAX_AGE_HOURS: u64 = 24;
pub const DEFAULT_COOLDOWN_SECS: u64 = 120;
pub const DEFAULT_MAX_SESSION_SECS: u64 = 30;
pub const DEFAULT_DISPLAY_SECS: u64 = 5;
pub const DEFAULT_DISPLAY_NAME_MAX: usize = 20;
pub const DEFAULT_MIL_HELO_MAX_ALTITUDE_FT: i64 = 5000;
pub const DEFAULT_MIL_HELO_MAX_SPEED_KT: f64 = 180.0;
pub const DEFAULT_RENDER_TICK_MS: u64 = 250;
pub const DEFAULT_LOG_FILE: &str = "flight-live.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub enabled: bool,
    pub home_lat: f64,
    pub home_lon: f64,
    pub radius_km: f64,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub states_url: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub poll_interval: Duration,
    pub max_flights: usize,
    pub min_altitude_m: f64,
    pub max_consecutive_errors: u32,
    pub error_backoff: Duration,
    pub token_timeout: Duration,
    pub positions_timeout: Duration,
    pub fallback_enabled: bool,
    pub fallback_url: String,
    pub fallback_timeout: Duration,
    pub fallback_min_interval: Duration,
    pub fallback_cache_file: String,
    pub registry_dir: String,
    pub community_db: String,
    pub registry_url: String,
    pub community_csv_url: String,
    pub download_timeout: Duration,
    pub database_max_age: Duration,
    pub cooldown: Duration,
    pub max_session: Duration,
    pub display_duration: Duration,
    pub display_name_max: usize,
    pub mil_helo_max_altitude_ft: i64,
    pub mil_helo_max_speed_kt: f64,
    pub render_tick: Duration,
    pub log_enabled: bool,
    pub log_level: String,
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            enabled: DEFAULT_ENABLED,
            home_lat: DEFAULT_HOME_LAT,
            home_lon: DEFAULT_HOME_LON,
            radius_km: DEFAULT_RADIUS_KM,
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            states_url: DEFAULT_STATES_URL.to_string(),
            start_hour: DEFAULT_START_HOUR,
            end_hour: DEFAULT_END_HOUR,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_flights: DEFAULT_MAX_FLIGHTS,
            min_altitude_m: DEFAULT_MIN_ALTITUDE_M,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS),
            token_timeout: Duration::from_secs(DEFAULT_TOKEN_TIMEOUT_SECS),
            positions_timeout: Duration::from_secs(DEFAULT_POSITIONS_TIMEOUT_SECS),
            fallback_enabled: DEFAULT_FALLBACK_ENABLED,
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            fallback_timeout: Duration::from_secs(DEFAULT_FALLBACK_TIMEOUT_SECS),
            fallback_min_interval: Duration::from_millis(DEFAULT_FALLBACK_MIN_INTERVAL_MS),
            fallback_cache_file: DEFAULT_FALLBACK_CACHE_FILE.to_string(),
            registry_dir: DEFAULT_REGISTRY_DIR.to_string(),
            community_db: DEFAULT_COMMUNITY_DB.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            community_csv_url: DEFAULT_COMMUNITY_CSV_URL.to_string(),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            database_max_age: Duration::from_secs(DEFAULT_DATABASE_MAX_AGE_HOURS * 3600),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            max_session: Duration::from_secs(DEFAULT_MAX_SESSION_SECS),
            display_duration: Duration::from_secs(DEFAULT_DISPLAY_SECS),
            display_name_max: DEFAULT_DISPLAY_NAME_MAX,
            mil_helo_max_altitude_ft: DEFAULT_MIL_HELO_MAX_ALTITUDE_FT,
            mil_helo_max_speed_kt: DEFAULT_MIL_HELO_MAX_SPEED_KT,
            render_tick: Duration::from_millis(DEFAULT_RENDER_TICK_MS),
            log_enabled: true,
            log_level: "info".to_string(),
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl Config {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn in_polling_window(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    pub fn radius_miles(&self) -> f64 {
        self.radius_km * 0.621371
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.home_lat) {
            return Err(anyhow!("home_lat {} is outside -90..90", self.home_lat));
        }
        if !(-180.0..=180.0).contains(&self.home_lon) {
            return Err(anyhow!("home_lon {} is outside -180..180", self.home_lon));
        }
        if self.home_lat.abs() > 85.0 {
            return Err(anyhow!(
                "home_lat {} is too close to a pole for the bounding box approximation",
                self.home_lat
            ));
        }
        if !(self.radius_km > 0.0) {
            return Err(anyhow!("radius_km must be positive"));
        }
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(anyhow!(
                "polling window {}..{} is not a valid hour range",
                self.start_hour,
                self.end_hour
            ));
        }
        if self.enabled && !self.has_credentials() {
            return Err(anyhow!(
                "flight tracking is enabled but client_id/client_secret are not set"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    enabled: Option<bool>,
    home_lat: Option<f64>,
    home_lon: Option<f64>,
    radius_km: Option<f64>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: Option<String>,
    states_url: Option<String>,
    start_hour: Option<u32>,
    end_hour: Option<u32>,
    poll_interval_secs: Option<u64>,
    max_flights: Option<usize>,
    min_altitude_m: Option<f64>,
    max_consecutive_errors: Option<u32>,
    error_backoff_secs: Option<u64>,
    token_timeout_secs: Option<u64>,
    positions_timeout_secs: Option<u64>,
    fallback_enabled: Option<bool>,
    fallback_url: Option<String>,
    fallback_timeout_secs: Option<u64>,
    fallback_min_interval_ms: Option<u64>,
    fallback_cache_file: Option<String>,
    registry_dir: Option<String>,
    community_db: Option<String>,
    registry_url: Option<String>,
    community_csv_url: Option<String>,
    download_timeout_secs: Option<u64>,
    database_max_age_hours: Option<u64>,
    cooldown_secs: Option<u64>,
    max_session_secs: Option<u64>,
    display_secs: Option<u64>,
    display_name_max: Option<usize>,
    mil_helo_max_altitude_ft: Option<i64>,
    mil_helo_max_speed_kt: Option<f64>,
    render_tick_ms: Option<u64>,
    log_enabled: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run { run_for: Option<Duration> },
    Once,
    Status,
    Lookup { hex: String, callsign: Option<String> },
    ImportCommunity { csv: PathBuf },
    UpdateDatabases { force: bool },
}

pub fn parse_args() -> Result<(Config, Command)> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_from(&args)
}

fn parse_from(args: &[String]) -> Result<(Config, Command)> {
    let mut explicit_config: Option<PathBuf> = None;
    let mut command = Command::Run { run_for: None };
    let mut force = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a value"))?;
                explicit_config = Some(PathBuf::from(value));
            }
            "--once" => command = Command::Once,
            "--status" => command = Command::Status,
            "--lookup" => {
                let hex = iter
                    .next()
                    .ok_or_else(|| anyhow!("--lookup needs a hex code"))?
                    .clone();
                let callsign = iter.clone().next().filter(|v| !v.starts_with("--")).cloned();
                if callsign.is_some() {
                    iter.next();
                }
                command = Command::Lookup { hex, callsign };
            }
            "--import-community" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--import-community needs a CSV path"))?;
                command = Command::ImportCommunity {
                    csv: PathBuf::from(value),
                };
            }
            "--update-databases" => command = Command::UpdateDatabases { force: false },
            "--force" => force = true,
            "--run-secs" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--run-secs needs a value"))?;
                let secs = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --run-secs value: {value}"))?;
                command = Command::Run {
                    run_for: Some(Duration::from_secs(secs)),
                };
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(anyhow!("unknown argument: {other}")),
        }
    }

    if let Command::UpdateDatabases { force: requested } = &mut command {
        *requested = force;
    } else if force {
        return Err(anyhow!("--force only applies to --update-databases"));
    }

    let env_config = env::var("FLIGHT_CONFIG").ok().map(PathBuf::from);
    let config_path = explicit_config
        .clone()
        .or(env_config)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = Config {
        config_path: config_path.clone(),
        ..Config::default()
    };

    if config_path.exists() {
        if let Some(file_config) = load_file_config(&config_path)? {
            apply_file_config(&mut config, file_config);
        }
    } else if explicit_config.is_some() {
        return Err(anyhow!("Config file not found: {}", config_path.display()));
    }

    apply_env(&mut config);
    Ok((config, command))
}

fn load_file_config(path: &Path) -> Result<Option<FileConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let cfg: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn load_path(path: &Path) -> Result<Config> {
    let mut config = Config {
        config_path: path.to_path_buf(),
        ..Config::default()
    };
    if let Some(file_config) = load_file_config(path)? {
        apply_file_config(&mut config, file_config);
    }
    Ok(config)
}

fn apply_file_config(target: &mut Config, file: FileConfig) {
    if let Some(enabled) = file.enabled {
        target.enabled = enabled;
    }
    if let Some(home_lat) = file.home_lat {
        target.home_lat = home_lat;
    }
    if let Some(home_lon) = file.home_lon {
        target.home_lon = home_lon;
    }
    if let Some(radius_km) = file.radius_km {
        target.radius_km = radius_km;
    }
    if let Some(client_id) = file.client_id {
        target.client_id = client_id;
    }
    if let Some(client_secret) = file.client_secret {
        target.client_secret = client_secret;
    }
    if let Some(token_url) = file.token_url {
        target.token_url = token_url;
    }
    if let Some(states_url) = file.states_url {
        target.states_url = states_url;
    }
    if let Some(start_hour) = file.start_hour {
        target.start_hour = start_hour;
    }
    if let Some(end_hour) = file.end_hour {
        target.end_hour = end_hour;
    }
    if let Some(secs) = file.poll_interval_secs {
        target.poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(max_flights) = file.max_flights {
        target.max_flights = max_flights.max(1);
    }
    if let Some(min_altitude_m) = file.min_altitude_m {
        target.min_altitude_m = min_altitude_m.max(0.0);
    }
    if let Some(max_errors) = file.max_consecutive_errors {
        target.max_consecutive_errors = max_errors.max(1);
    }
    if let Some(secs) = file.error_backoff_secs {
        target.error_backoff = Duration::from_secs(secs);
    }
    if let Some(secs) = file.token_timeout_secs {
        target.token_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = file.positions_timeout_secs {
        target.positions_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(fallback_enabled) = file.fallback_enabled {
        target.fallback_enabled = fallback_enabled;
    }
    if let Some(fallback_url) = file.fallback_url {
        target.fallback_url = fallback_url;
    }
    if let Some(secs) = file.fallback_timeout_secs {
        target.fallback_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(ms) = file.fallback_min_interval_ms {
        target.fallback_min_interval = Duration::from_millis(ms);
    }
    if let Some(path) = file.fallback_cache_file {
        target.fallback_cache_file = path;
    }
    if let Some(dir) = file.registry_dir {
        target.registry_dir = dir;
    }
    if let Some(path) = file.community_db {
        target.community_db = path;
    }
    if let Some(url) = file.registry_url {
        target.registry_url = url;
    }
    if let Some(url) = file.community_csv_url {
        target.community_csv_url = url;
    }
    if let Some(secs) = file.download_timeout_secs {
        target.download_timeout = Duration::from_secs(secs.max(10));
    }
    if let Some(hours) = file.database_max_age_hours {
        target.database_max_age = Duration::from_secs(hours * 3600);
    }
    if let Some(secs) = file.cooldown_secs {
        target.cooldown = Duration::from_secs(secs);
    }
    if let Some(secs) = file.max_session_secs {
        target.max_session = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = file.display_secs {
        target.display_duration = Duration::from_secs(secs.max(1));
    }
    if let Some(max) = file.display_name_max {
        target.display_name_max = max.max(4);
    }
    if let Some(alt) = file.mil_helo_max_altitude_ft {
        target.mil_helo_max_altitude_ft = alt;
    }
    if let Some(speed) = file.mil_helo_max_speed_kt {
        target.mil_helo_max_speed_kt = speed;
    }
    if let Some(ms) = file.render_tick_ms {
        target.render_tick = Duration::from_millis(ms.max(20));
    }
    if let Some(log_enabled) = file.log_enabled {
        target.log_enabled = log_enabled;
    }
    if let Some(log_level) = file.log_level {
        target.log_level = log_level;
    }
    if let Some(log_file) = file.log_file {
        target.log_file = log_file;
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

fn apply_env(config: &mut Config) {
    if let Ok(value) = env::var("FLIGHT_ENABLED") {
        config.enabled = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHT_HOME_LAT") {
        if let Ok(val) = value.parse::<f64>() {
            config.home_lat = val;
        }
    }
    if let Ok(value) = env::var("FLIGHT_HOME_LON") {
        if let Ok(val) = value.parse::<f64>() {
            config.home_lon = val;
        }
    }
    if let Ok(value) = env::var("FLIGHT_RADIUS_KM") {
        if let Ok(val) = value.parse::<f64>() {
            config.radius_km = val;
        }
    }
    if let Ok(value) = env::var("FLIGHT_CLIENT_ID") {
        config.client_id = value;
    }
    if let Ok(value) = env::var("FLIGHT_CLIENT_SECRET") {
        config.client_secret = value;
    }
    if let Ok(value) = env::var("FLIGHT_POLL_INTERVAL") {
        if let Ok(secs) = value.parse::<u64>() {
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
    }
    if let Ok(value) = env::var("FLIGHT_START_HOUR") {
        if let Ok(val) = value.parse::<u32>() {
            config.start_hour = val;
        }
    }
    if let Ok(value) = env::var("FLIGHT_END_HOUR") {
        if let Ok(val) = value.parse::<u32>() {
            config.end_hour = val;
        }
    }
    if let Ok(value) = env::var("FLIGHT_FALLBACK_ENABLED") {
        config.fallback_enabled = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHT_REGISTRY_DIR") {
        config.registry_dir = value;
    }
    if let Ok(value) = env::var("FLIGHT_COMMUNITY_DB") {
        config.community_db = value;
    }
    if let Ok(value) = env::var("FLIGHT_LOG_ENABLED") {
        config.log_enabled = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHT_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Ok(value) = env::var("FLIGHT_LOG_FILE") {
        config.log_file = value;
    }
}

fn print_help() {
    println!("flight-live");
    println!("Usage: flight-live [--config PATH] [--once] [--status]");
    println!("       [--lookup HEX [CALLSIGN]] [--import-community CSV] [--run-secs N]");
    println!("       [--update-databases [--force]]");
    println!("Environment: FLIGHT_CONFIG overrides config path");
    println!("Environment: FLIGHT_ENABLED toggles polling");
    println!("Environment: FLIGHT_HOME_LAT/LON/RADIUS_KM set the watched area");
    println!("Environment: FLIGHT_CLIENT_ID/CLIENT_SECRET set API credentials");
    println!("Environment: FLIGHT_POLL_INTERVAL sets the poll interval in seconds");
    println!("Environment: FLIGHT_START_HOUR/END_HOUR set the polling window");
    println!("Environment: FLIGHT_REGISTRY_DIR/COMMUNITY_DB locate the aircraft databases");
    println!("Environment: FLIGHT_FALLBACK_ENABLED toggles the network lookup");
    println!("Environment: FLIGHT_LOG_ENABLED/LEVEL/FILE configure logging");
}
