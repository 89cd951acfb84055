use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::community::CommunityDatabase;
use crate::config::Config;
use crate::registry::{AircraftRegistry, ACFTREF_FILE, MASTER_FILE};

pub const METADATA_FILE: &str = "metadata.json";
const REGISTRY_ARCHIVE: &str = "ReleasableAircraft.zip";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub last_update: i64,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpdateOutcome {
    UpToDate,
    Updated { aircraft: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateReport {
    pub registry: UpdateOutcome,
    pub community: UpdateOutcome,
}

pub trait DatasetSource {
    fn download_to(&self, url: &str, dest: &Path) -> Result<u64>;
}

pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flight-live/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build download client")?;
        Ok(HttpDownloader { client })
    }
}

impl DatasetSource for HttpDownloader {
    fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("downloading {}", url);
        let mut resp = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("Download refused: {url}"))?;
        let mut file =
            File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
        let written = resp
            .copy_to(&mut file)
            .with_context(|| format!("Download interrupted: {url}"))?;
        info!("downloaded {:.1} MB to {}", written as f64 / (1024.0 * 1024.0), dest.display());
        Ok(written)
    }
}

pub struct DatabaseUpdater<'a> {
    config: &'a Config,
    source: Box<dyn DatasetSource + 'a>,
    force: bool,
}

impl<'a> DatabaseUpdater<'a> {
    pub fn new(config: &'a Config, source: Box<dyn DatasetSource + 'a>, force: bool) -> Self {
        DatabaseUpdater {
            config,
            source,
            force,
        }
    }

    pub fn run(&self) -> Result<UpdateReport> {
        self.run_at(Utc::now())
    }

    pub fn run_at(&self, now: DateTime<Utc>) -> Result<UpdateReport> {
        let registry = self.update_registry_at(now);
        if let Err(err) = &registry {
            warn!("registry update failed: {err:#}");
        }
        let community = self.update_community_at(now);
        if let Err(err) = &community {
            warn!("community update failed: {err:#}");
        }
        Ok(UpdateReport {
            registry: registry?,
            community: community?,
        })
    }

    pub fn update_registry_at(&self, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        let dir = Path::new(&self.config.registry_dir);
        let meta_path = dir.join(METADATA_FILE);
        if !self.force
            && dir.join(MASTER_FILE).exists()
            && is_fresh(read_metadata(&meta_path).as_ref(), now, self.config.database_max_age)
        {
            info!("aircraft registry is up to date");
            return Ok(UpdateOutcome::UpToDate);
        }

        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let archive_path = dir.join(REGISTRY_ARCHIVE);
        self.source
            .download_to(&self.config.registry_url, &archive_path)?;
        let extracted = File::open(&archive_path)
            .with_context(|| format!("Failed to open {}", archive_path.display()))
            .and_then(|file| extract_registry(file, dir));
        if let Err(err) = fs::remove_file(&archive_path) {
            debug!("could not remove {}: {}", archive_path.display(), err);
        }
        extracted?;

        let registry = AircraftRegistry::load(dir)?;
        let aircraft = registry.stats().aircraft_count;
        write_metadata(
            &meta_path,
            &UpdateMetadata {
                last_update: now.timestamp(),
                source: self.config.registry_url.clone(),
            },
        )?;
        info!("aircraft registry updated: {} aircraft", aircraft);
        Ok(UpdateOutcome::Updated { aircraft })
    }

    pub fn update_community_at(&self, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        let db_path = Path::new(&self.config.community_db);
        let meta_path = sibling(db_path, ".meta.json");
        if !self.force
            && db_path.exists()
            && is_fresh(read_metadata(&meta_path).as_ref(), now, self.config.database_max_age)
        {
            info!("community database is up to date");
            return Ok(UpdateOutcome::UpToDate);
        }

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let csv_path = db_path.with_extension("csv");
        self.source
            .download_to(&self.config.community_csv_url, &csv_path)?;

        // A failed import must leave the live file untouched.
        let staging = sibling(db_path, ".tmp");
        let _ = fs::remove_file(&staging);
        let imported = CommunityDatabase::create(&staging).and_then(|db| db.import_csv(&csv_path));
        let aircraft = match imported {
            Ok(count) if count > 0 => count,
            Ok(_) => {
                let _ = fs::remove_file(&staging);
                return Err(anyhow!("{} contained no aircraft", csv_path.display()));
            }
            Err(err) => {
                let _ = fs::remove_file(&staging);
                return Err(err);
            }
        };
        fs::rename(&staging, db_path)
            .with_context(|| format!("Failed to replace {}", db_path.display()))?;
        if let Err(err) = fs::remove_file(&csv_path) {
            debug!("could not remove {}: {}", csv_path.display(), err);
        }
        write_metadata(
            &meta_path,
            &UpdateMetadata {
                last_update: now.timestamp(),
                source: self.config.community_csv_url.clone(),
            },
        )?;
        info!("community database updated: {} aircraft", aircraft);
        Ok(UpdateOutcome::Updated { aircraft })
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A timestamp in the future counts as stale.
pub fn is_fresh(meta: Option<&UpdateMetadata>, now: DateTime<Utc>, max_age: Duration) -> bool {
    let Some(meta) = meta else {
        return false;
    };
    let age = now.timestamp() - meta.last_update;
    age >= 0 && (age as u64) < max_age.as_secs()
}

pub fn read_metadata(path: &Path) -> Option<UpdateMetadata> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(meta) => Some(meta),
        Err(err) => {
            warn!("ignoring unreadable {}: {}", path.display(), err);
            None
        }
    }
}

fn write_metadata(path: &Path, meta: &UpdateMetadata) -> Result<()> {
    let content = serde_json::to_string(meta).context("Failed to serialize update metadata")?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn extract_registry<R: Read + Seek>(reader: R, dir: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(reader).context("Registry archive is not a zip")?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let mut extracted = 0usize;
    for wanted in [MASTER_FILE, ACFTREF_FILE] {
        let entry_name = names.iter().find(|name| {
            name.rsplit('/')
                .next()
                .is_some_and(|base| base.eq_ignore_ascii_case(wanted))
        });
        let Some(entry_name) = entry_name else {
            if wanted == MASTER_FILE {
                return Err(anyhow!("{wanted} not found in registry archive"));
            }
            warn!("{} not found in registry archive", wanted);
            continue;
        };
        let mut entry = archive
            .by_name(entry_name)
            .with_context(|| format!("Failed to read {entry_name} from archive"))?;
        let dest = dir.join(wanted);
        let staging = sibling(&dest, ".tmp");
        let mut out = File::create(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {entry_name}"))?;
        drop(out);
        fs::rename(&staging, &dest)
            .with_context(|| format!("Failed to replace {}", dest.display()))?;
        debug!("extracted {}", wanted);
        extracted += 1;
    }
    Ok(extracted)
}
