use crate::aircraft::normalize_hex;
use crate::model::HexDbAircraft;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub icao_type: Option<String>,
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FallbackOutcome {
    Found(FallbackRecord),
    NotFound,
    Unavailable(String),
}

pub trait FallbackSource: Send + Sync {
    fn fetch(&self, hex_code: &str) -> FallbackOutcome;
}

pub struct HexDbClient {
    client: reqwest::blocking::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HexDbClient {
    pub fn new(base_url: &str, timeout: Duration, min_interval: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flight-live/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build fallback HTTP client")?;
        Ok(HexDbClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    fn claim_slot(&self, now: Instant) -> bool {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.is_some_and(|prev| now.duration_since(prev) < self.min_interval) {
            return false;
        }
        *last = Some(now);
        true
    }
}

impl FallbackSource for HexDbClient {
    fn fetch(&self, hex_code: &str) -> FallbackOutcome {
        if !self.claim_slot(Instant::now()) {
            return FallbackOutcome::Unavailable("rate limited".to_string());
        }
        let url = format!("{}/{}", self.base_url, normalize_hex(hex_code));
        let resp = match self.client.get(&url).send() {
            Ok(resp) => resp,
            Err(err) => return FallbackOutcome::Unavailable(err.to_string()),
        };
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return FallbackOutcome::NotFound;
        }
        if !status.is_success() {
            return FallbackOutcome::Unavailable(format!("HTTP {status}"));
        }
        match resp.text() {
            Ok(body) => parse_hexdb_body(&body),
            Err(err) => FallbackOutcome::Unavailable(err.to_string()),
        }
    }
}

pub fn parse_hexdb_body(body: &str) -> FallbackOutcome {
    let data: HexDbAircraft = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(err) => return FallbackOutcome::Unavailable(format!("decode: {err}")),
    };
    if data.is_not_found() {
        return FallbackOutcome::NotFound;
    }
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let record = FallbackRecord {
        manufacturer: clean(data.manufacturer),
        model: clean(data.model),
        icao_type: clean(data.icao_type),
        registration: clean(data.registration),
        operator: clean(data.registered_owners),
    };
    if record == FallbackRecord::default() {
        FallbackOutcome::NotFound
    } else {
        FallbackOutcome::Found(record)
    }
}

pub struct FallbackCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, Option<FallbackRecord>>>,
    write_lock: Mutex<()>,
}

impl FallbackCache {
    pub fn in_memory() -> Self {
        FallbackCache {
            path: None,
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(path: &Path) -> Self {
        let entries = match read_cache_file(path) {
            Ok(entries) => {
                if !entries.is_empty() {
                    info!("fallback cache loaded {} entries", entries.len());
                }
                entries
            }
            Err(err) => {
                warn!("fallback cache ignored: {err:#}");
                HashMap::new()
            }
        };
        FallbackCache {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, hex_code: &str) -> Option<Option<FallbackRecord>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&normalize_hex(hex_code)).cloned()
    }

    pub fn insert(&self, hex_code: &str, record: Option<FallbackRecord>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.insert(normalize_hex(hex_code), record);
            self.path.as_ref().map(|_| entries.clone())
        };
        if let (Some(path), Some(snapshot)) = (&self.path, snapshot) {
            write_cache_file(path, &snapshot)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn negative_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|v| v.is_none())
            .count()
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        if let Some(path) = &self.path {
            write_cache_file(path, &HashMap::new())?;
        }
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<HashMap<String, Option<FallbackRecord>>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fallback cache: {}", path.display()))?;
    let entries: HashMap<String, Option<FallbackRecord>> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fallback cache: {}", path.display()))?;
    Ok(entries)
}

fn write_cache_file(path: &Path, entries: &HashMap<String, Option<FallbackRecord>>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let content = serde_json::to_string(entries).context("Failed to serialize fallback cache")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write fallback cache: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace fallback cache: {}", path.display()))?;
    debug!("fallback cache saved {} entries", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        dir.push(format!("flight-live-fallback-test-{suffix}"));
        let _ = fs::create_dir_all(&dir);
        dir.push(name);
        dir
    }

    fn boeing() -> FallbackRecord {
        FallbackRecord {
            manufacturer: Some("Boeing".to_string()),
            model: Some("737-824".to_string()),
            icao_type: Some("B738".to_string()),
            registration: Some("N12345".to_string()),
            operator: Some("United Airlines".to_string()),
        }
    }

    #[test]
    fn cache_persists_hits_and_misses() {
        let path = temp_file("fallback.json");
        let cache = FallbackCache::load(&path);
        assert!(cache.is_empty());
        cache.insert("A12345", Some(boeing())).unwrap();
        cache.insert("b00000", None).unwrap();

        let reloaded = FallbackCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.negative_count(), 1);
        assert_eq!(reloaded.get("a12345"), Some(Some(boeing())));
        assert_eq!(reloaded.get("b00000"), Some(None));
        assert_eq!(reloaded.get("c00000"), None);

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn clear_is_persisted() {
        let path = temp_file("fallback.json");
        let cache = FallbackCache::load(&path);
        cache.insert("a12345", Some(boeing())).unwrap();
        cache.insert("b00000", None).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(FallbackCache::load(&path).is_empty());

        cache.insert("c00000", None).unwrap();
        let reloaded = FallbackCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("a12345"), None);
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn corrupt_cache_starts_empty_and_is_rewritten() {
        let path = temp_file("fallback.json");
        fs::write(&path, "{not json").unwrap();
        let cache = FallbackCache::load(&path);
        assert!(cache.is_empty());
        cache.insert("a12345", None).unwrap();
        let reloaded = FallbackCache::load(&path);
        assert_eq!(reloaded.get("a12345"), Some(None));
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn parse_body_variants() {
        let found = parse_hexdb_body(
            r#"{"Registration":"N12345","Manufacturer":"Boeing","ICAOTypeCode":"B738","Type":"737-824","RegisteredOwners":"United Airlines"}"#,
        );
        assert_eq!(found, FallbackOutcome::Found(boeing()));
        assert_eq!(
            parse_hexdb_body(r#"{"status":"404","error":"Aircraft not found"}"#),
            FallbackOutcome::NotFound
        );
        assert_eq!(parse_hexdb_body("{}"), FallbackOutcome::NotFound);
        assert!(matches!(
            parse_hexdb_body("<html>"),
            FallbackOutcome::Unavailable(_)
        ));
    }

    #[test]
    fn rate_limit_spaces_requests() {
        let client =
            HexDbClient::new("http://127.0.0.1:9", Duration::from_secs(1), Duration::from_secs(1))
                .unwrap();
        let start = Instant::now();
        assert!(client.claim_slot(start));
        assert!(!client.claim_slot(start + Duration::from_millis(500)));
        assert!(client.claim_slot(start + Duration::from_millis(1000)));
    }

    #[cfg(feature = "net-tests")]
    #[test]
    fn fetch_maps_http_status() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().take(2) {
                let mut stream = stream.unwrap();
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let response = if request.contains("/a12345") {
                    let body = r#"{"Manufacturer":"Boeing","Type":"737-824","ICAOTypeCode":"B738","Registration":"N12345","RegisteredOwners":"United Airlines"}"#;
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
                };
                let _ = stream.write_all(response.as_bytes());
            }
        });

        let client = HexDbClient::new(
            &format!("http://{addr}/api/v1/aircraft/"),
            Duration::from_secs(2),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(client.fetch("A12345"), FallbackOutcome::Found(boeing()));
        assert_eq!(client.fetch("ffffff"), FallbackOutcome::NotFound);
    }
}
