// tests/integration_tests.rs

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use flight_live::aircraft::{Source, TypeCode};
use flight_live::community::{CommunityDatabase, CommunityRecord};
use flight_live::config::Config;
use flight_live::fallback::{FallbackCache, FallbackOutcome, FallbackRecord, FallbackSource};
use flight_live::geo::BoundingBox;
use flight_live::heuristics::MilitaryHeloThresholds;
use flight_live::identify::Identifier;
use flight_live::model::StatesResponse;
use flight_live::poller::{FetchError, PollOutcome, PositionSource, Poller};
use flight_live::registry::AircraftRegistry;
use flight_live::session::InterruptionSession;
use flight_live::state::SharedState;

const MASTER_HEADER: &str = "N-NUMBER,SERIAL NUMBER,MFR MDL CODE,ENG MFR MDL,YEAR MFR,TYPE REGISTRANT,NAME,STREET,STREET2,CITY,STATE,ZIP CODE,REGION,COUNTY,COUNTRY,LAST ACTION DATE,CERT ISSUE DATE,CERTIFICATION,TYPE AIRCRAFT,TYPE ENGINE,STATUS CODE,MODE S CODE,FRACT OWNER,AIR WORTH DATE,OTHER NAMES(1),OTHER NAMES(2),OTHER NAMES(3),OTHER NAMES(4),OTHER NAMES(5),EXPIRATION DATE,UNIQUE ID,KIT MFR, KIT MODEL,MODE S CODE HEX,";

const ACFTREF: &str = "CODE,MFR,MODEL,TYPE-ACFT,TYPE-ENG\n\
1384410,BOEING                        ,737-824             ,5,5\n\
1384412,BOEING                        ,767-3S2F            ,5,5\n";

fn master_row(n_number: &str, mfr_code: &str, registrant: &str, hex: &str) -> String {
    let mut fields = vec![String::new(); 35];
    fields[0] = n_number.to_string();
    fields[2] = mfr_code.to_string();
    fields[6] = format!("{registrant:<50}");
    fields[18] = "5".to_string();
    fields[19] = "5".to_string();
    fields[20] = "V".to_string();
    fields[33] = format!("{hex:<10}");
    fields.join(",")
}

fn temp_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    dir.push(format!("flight-live-it-{name}-{suffix}"));
    let _ = fs::create_dir_all(&dir);
    dir
}

fn load_registry() -> (Arc<AircraftRegistry>, PathBuf) {
    let dir = temp_dir("registry");
    let master = [
        MASTER_HEADER.to_string(),
        master_row("12345", "1384410", "UNITED AIRLINES INC", "A12345"),
        master_row("678FE", "1384412", "FEDERAL EXPRESS CORP", "AA0001"),
    ]
    .join("\n");
    fs::write(dir.join("MASTER.txt"), master).unwrap();
    fs::write(dir.join("ACFTREF.txt"), ACFTREF).unwrap();
    let registry = AircraftRegistry::load(&dir).unwrap();
    (Arc::new(registry), dir)
}

struct ScriptedPositions {
    body: String,
}

impl PositionSource for ScriptedPositions {
    fn refresh_credentials(&mut self, _now: Instant) -> Result<(), FetchError> {
        Ok(())
    }

    fn fetch_states(&mut self, _bbox: &BoundingBox) -> Result<StatesResponse, FetchError> {
        serde_json::from_str(&self.body).map_err(|err| FetchError::Decode(err.to_string()))
    }

    fn has_valid_token(&self, _now: Instant) -> bool {
        true
    }
}

struct CountingFallback {
    calls: AtomicUsize,
}

impl FallbackSource for CountingFallback {
    fn fetch(&self, hex_code: &str) -> FallbackOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if hex_code == "c0ffee" {
            FallbackOutcome::Found(FallbackRecord {
                manufacturer: Some("Airbus".to_string()),
                model: Some("A320-214".to_string()),
                icao_type: Some("A320".to_string()),
                registration: Some("C-FABC".to_string()),
                operator: Some("Air Canada".to_string()),
            })
        } else {
            FallbackOutcome::NotFound
        }
    }
}

fn live_config() -> Config {
    Config {
        enabled: true,
        home_lat: 41.6,
        home_lon: -93.6,
        radius_km: 8.0,
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        ..Config::default()
    }
}

#[test]
fn overhead_airliner_interrupts_display() {
    let (registry, dir) = load_registry();
    let identifier = Arc::new(
        Identifier::new(MilitaryHeloThresholds::default(), 20).with_registry(registry),
    );
    let config = live_config();
    let state = SharedState::new(
        InterruptionSession::new(config.cooldown, config.max_session),
        config.display_duration,
    );
    let source = ScriptedPositions {
        body: r#"{"time":1717000000,"states":[["a12345","UAL123  ","United States",0,0,-93.6,41.628,10668.0,false,231.5,92.3,0.0]]}"#
            .to_string(),
    };
    let mut poller = Poller::new(config, Box::new(source), identifier, state.clone());

    let now = Instant::now();
    assert_eq!(poller.poll_once_at(now, 12), PollOutcome::Published(1));
    assert!(state.has_live_content_at(now));

    let flight = state.current_record_at(now).unwrap();
    assert_eq!(flight.hex_code, "a12345");
    assert_eq!(flight.callsign, "UAL123");
    assert_eq!(flight.type_code, TypeCode::Jet);
    assert_eq!(flight.display_name.as_deref(), Some("Boeing 737-824"));
    assert!((flight.distance_km - 3.1).abs() < 0.1);
    assert_eq!(flight.altitude_ft, Some(35000));
    assert_eq!((flight.position, flight.count), (1, 1));

    // Still overhead on the next poll: no second interruption.
    let later = now + Duration::from_secs(40);
    poller.poll_once_at(later, 12);
    assert!(!state.has_live_content_at(later));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn cargo_registrant_overrides_jet() {
    let (registry, dir) = load_registry();
    let identifier = Identifier::new(MilitaryHeloThresholds::default(), 20).with_registry(registry);
    let info = identifier.identify("AA0001", "FDX1402", Some(30000), Some(450.0));
    assert_eq!(info.type_code, TypeCode::Fdx);
    assert_eq!(info.source, Source::Authoritative);
    assert_eq!(info.registration.as_deref(), Some("N678FE"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn registry_outranks_community() {
    let (registry, dir) = load_registry();
    let community = CommunityDatabase::open_in_memory().unwrap();
    community
        .insert(&CommunityRecord {
            icao24: "a12345".to_string(),
            manufacturer: Some("Cessna".to_string()),
            model: Some("172S".to_string()),
            typecode: Some("C172".to_string()),
            ..CommunityRecord::default()
        })
        .unwrap();
    community
        .insert(&CommunityRecord {
            icao24: "4ca123".to_string(),
            manufacturer: Some("Boeing".to_string()),
            model: Some("737-8AS".to_string()),
            typecode: Some("B738".to_string()),
            operator: Some("Ryanair".to_string()),
            ..CommunityRecord::default()
        })
        .unwrap();
    let identifier = Identifier::new(MilitaryHeloThresholds::default(), 20)
        .with_registry(registry)
        .with_community(Arc::new(community));

    let both = identifier.identify("a12345", "UAL123", Some(35000), None);
    assert_eq!(both.type_code, TypeCode::Jet);
    assert_eq!(both.source, Source::Authoritative);

    let foreign = identifier.identify("4CA123", "RYR12", Some(37000), None);
    assert_eq!(foreign.type_code, TypeCode::Jet);
    assert_eq!(foreign.source, Source::Community);
    assert_eq!(foreign.display_name.as_deref(), Some("Boeing 737-8AS"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn fallback_answers_are_fetched_once() {
    let fallback = Arc::new(CountingFallback {
        calls: AtomicUsize::new(0),
    });
    let identifier = Identifier::new(MilitaryHeloThresholds::default(), 20)
        .with_fallback(fallback.clone(), Arc::new(FallbackCache::in_memory()));

    let first = identifier.identify("c0ffee", "ACA881", Some(36000), None);
    let second = identifier.identify("c0ffee", "ACA881", Some(36000), None);
    assert_eq!(first, second);
    assert_eq!(first.source, Source::Fallback);
    assert_eq!(first.type_code, TypeCode::Jet);

    let miss = identifier.identify("deadbe", "N123AB", Some(4000), None);
    let miss_again = identifier.identify("deadbe", "N123AB", Some(4000), None);
    assert_eq!(miss, miss_again);
    assert_eq!(miss.source, Source::Heuristic);
    assert_eq!(miss.type_code, TypeCode::Ga);

    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn military_callsign_skips_lookups() {
    let fallback = Arc::new(CountingFallback {
        calls: AtomicUsize::new(0),
    });
    let identifier = Identifier::new(MilitaryHeloThresholds::default(), 20)
        .with_fallback(fallback.clone(), Arc::new(FallbackCache::in_memory()));
    let info = identifier.identify("ae1234", "RCH401", Some(28000), Some(420.0));
    assert_eq!(info.type_code, TypeCode::Mil);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}
