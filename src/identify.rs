use crate::aircraft::{build_display_name, normalize_hex, AircraftInfo, Source, TypeCode};
use crate::community::{CommunityDatabase, CommunityRecord, CommunityStats};
use crate::config::Config;
use crate::fallback::{FallbackCache, FallbackOutcome, FallbackRecord, FallbackSource, HexDbClient};
use crate::heuristics::{self, MilitaryHeloThresholds};
use crate::registry::{AircraftRegistry, RegistryEntry, RegistryStats};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

#[derive(Clone, Debug, Serialize)]
pub struct IdentifierStatus {
    pub registry: Option<RegistryStats>,
    pub community: Option<CommunityStats>,
    pub fallback_enabled: bool,
    pub fallback_cache_entries: usize,
    pub fallback_cache_negative: usize,
    pub memoized: usize,
}

pub struct Identifier {
    registry: Option<Arc<AircraftRegistry>>,
    community: Option<Arc<CommunityDatabase>>,
    fallback: Option<Arc<dyn FallbackSource>>,
    fallback_cache: Arc<FallbackCache>,
    thresholds: MilitaryHeloThresholds,
    display_name_max: usize,
    memo: RwLock<HashMap<String, AircraftInfo>>,
    community_error_logged: AtomicBool,
    cache_error_logged: AtomicBool,
}

impl Identifier {
    pub fn new(thresholds: MilitaryHeloThresholds, display_name_max: usize) -> Self {
        Identifier {
            registry: None,
            community: None,
            fallback: None,
            fallback_cache: Arc::new(FallbackCache::in_memory()),
            thresholds,
            display_name_max,
            memo: RwLock::new(HashMap::new()),
            community_error_logged: AtomicBool::new(false),
            cache_error_logged: AtomicBool::new(false),
        }
    }

    pub fn with_registry(mut self, registry: Arc<AircraftRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_community(mut self, community: Arc<CommunityDatabase>) -> Self {
        self.community = Some(community);
        self
    }

    pub fn with_fallback(
        mut self,
        source: Arc<dyn FallbackSource>,
        cache: Arc<FallbackCache>,
    ) -> Self {
        self.fallback = Some(source);
        self.fallback_cache = cache;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let thresholds = MilitaryHeloThresholds {
            max_altitude_ft: config.mil_helo_max_altitude_ft,
            max_speed_kt: config.mil_helo_max_speed_kt,
        };
        let mut identifier = Identifier::new(thresholds, config.display_name_max);

        match AircraftRegistry::load(Path::new(&config.registry_dir)) {
            Ok(registry) if !registry.is_empty() => {
                identifier = identifier.with_registry(Arc::new(registry));
            }
            Ok(_) => warn!("aircraft registry in {} is empty; tier disabled", config.registry_dir),
            Err(err) => warn!("aircraft registry unavailable; tier disabled: {err:#}"),
        }

        match CommunityDatabase::open(Path::new(&config.community_db)) {
            Ok(db) => identifier = identifier.with_community(Arc::new(db)),
            Err(err) => warn!("community database unavailable; tier disabled: {err:#}"),
        }

        let cache = Arc::new(FallbackCache::load(Path::new(&config.fallback_cache_file)));
        identifier.fallback_cache = Arc::clone(&cache);
        if config.fallback_enabled {
            match HexDbClient::new(
                &config.fallback_url,
                config.fallback_timeout,
                config.fallback_min_interval,
            ) {
                Ok(client) => identifier = identifier.with_fallback(Arc::new(client), cache),
                Err(err) => warn!("fallback lookup disabled: {err:#}"),
            }
        }
        identifier
    }

    pub fn fallback_cache(&self) -> Arc<FallbackCache> {
        Arc::clone(&self.fallback_cache)
    }

    pub fn identify(
        &self,
        hex_code: &str,
        callsign: &str,
        altitude_ft: Option<i64>,
        speed_kt: Option<f64>,
    ) -> AircraftInfo {
        let hex = normalize_hex(hex_code);
        let callsign = callsign.trim();

        // The civil registry does not track military airframes.
        if let Some(mil) = heuristics::military_type(callsign, altitude_ft, speed_kt, self.thresholds)
        {
            return self.military_info(&hex, mil);
        }

        if let Some(cached) = self.memoized(&hex) {
            if cached.source == Source::Authoritative {
                return cached;
            }
            // An N-number callsign can reach the registry even when the hex
            // code did not.
            if let Some(info) = self.from_registry(&hex, callsign) {
                return self.remember(info);
            }
            return cached;
        }

        if let Some(info) = self.from_registry(&hex, callsign) {
            return self.remember(info);
        }
        if let Some(info) = self.from_community(&hex, callsign, altitude_ft) {
            return self.remember(info);
        }
        if let Some(info) = self.from_fallback(&hex, callsign, altitude_ft) {
            return self.remember(info);
        }

        AircraftInfo::heuristic(&hex, heuristics::classify_callsign(callsign, altitude_ft))
    }

    pub fn clear_cache(&self) {
        self.memo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        if let Err(err) = self.fallback_cache.clear() {
            warn!("fallback cache clear failed: {err:#}");
        }
    }

    pub fn status(&self) -> IdentifierStatus {
        let community = self.community.as_ref().and_then(|db| match db.stats() {
            Ok(stats) => Some(stats),
            Err(err) => {
                debug!("community stats failed: {err:#}");
                None
            }
        });
        IdentifierStatus {
            registry: self.registry.as_ref().map(|r| r.stats()),
            community,
            fallback_enabled: self.fallback.is_some(),
            fallback_cache_entries: self.fallback_cache.len(),
            fallback_cache_negative: self.fallback_cache.negative_count(),
            memoized: self
                .memo
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
        }
    }

    fn memoized(&self, hex: &str) -> Option<AircraftInfo> {
        self.memo
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(hex)
            .cloned()
    }

    fn remember(&self, info: AircraftInfo) -> AircraftInfo {
        let mut memo = self
            .memo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match memo.get(&info.hex_code) {
            Some(existing) if !info.source.outranks(existing.source) => existing.clone(),
            _ => {
                memo.insert(info.hex_code.clone(), info.clone());
                info
            }
        }
    }

    fn military_info(&self, hex: &str, type_code: TypeCode) -> AircraftInfo {
        let mut info = AircraftInfo::heuristic(hex, type_code);
        // Make and model still help on screen; the type stays military.
        if let Some(record) = self.community_record(hex) {
            info.display_name = build_display_name(
                record.manufacturer.as_deref(),
                record.model.as_deref(),
                record.typecode.as_deref(),
                self.display_name_max,
            );
            info.icao_type = record.typecode;
            info.registration = record.registration;
            info.operator = record.operator.or(record.owner);
        }
        info
    }

    fn from_registry(&self, hex: &str, callsign: &str) -> Option<AircraftInfo> {
        let registry = self.registry.as_ref()?;
        let callsign = Some(callsign).filter(|c| !c.is_empty());
        let entry = registry.lookup(hex, callsign)?;
        Some(self.registry_info(hex, &entry))
    }

    fn registry_info(&self, hex: &str, entry: &RegistryEntry) -> AircraftInfo {
        AircraftInfo {
            hex_code: hex.to_string(),
            type_code: entry.type_code,
            display_name: build_display_name(
                entry.manufacturer.as_deref(),
                entry.model.as_deref(),
                None,
                self.display_name_max,
            ),
            icao_type: None,
            registration: Some(entry.n_number.clone()),
            operator: entry.registrant.clone(),
            source: Source::Authoritative,
        }
    }

    fn community_record(&self, hex: &str) -> Option<CommunityRecord> {
        let db = self.community.as_ref()?;
        match db.lookup(hex) {
            Ok(record) => record,
            Err(err) => {
                if !self.community_error_logged.swap(true, Ordering::Relaxed) {
                    warn!("community lookup failed: {err:#}");
                }
                None
            }
        }
    }

    fn from_community(
        &self,
        hex: &str,
        callsign: &str,
        altitude_ft: Option<i64>,
    ) -> Option<AircraftInfo> {
        let record = self.community_record(hex)?;
        let base = record
            .typecode
            .as_deref()
            .and_then(heuristics::type_from_icao_type)
            .unwrap_or_else(|| heuristics::classify_callsign(callsign, altitude_ft));
        let type_code = heuristics::apply_cargo_override(
            base,
            [record.operator.as_deref(), record.owner.as_deref()],
        );
        Some(AircraftInfo {
            hex_code: hex.to_string(),
            type_code,
            display_name: build_display_name(
                record.manufacturer.as_deref(),
                record.model.as_deref(),
                record.typecode.as_deref(),
                self.display_name_max,
            ),
            icao_type: record.typecode,
            registration: record.registration,
            operator: record.operator.or(record.owner),
            source: Source::Community,
        })
    }

    fn from_fallback(
        &self,
        hex: &str,
        callsign: &str,
        altitude_ft: Option<i64>,
    ) -> Option<AircraftInfo> {
        let record = match self.fallback_cache.get(hex) {
            Some(cached) => cached?,
            None => {
                let source = self.fallback.as_ref()?;
                match source.fetch(hex) {
                    FallbackOutcome::Found(record) => {
                        self.store_fallback(hex, Some(record.clone()));
                        record
                    }
                    FallbackOutcome::NotFound => {
                        self.store_fallback(hex, None);
                        return None;
                    }
                    FallbackOutcome::Unavailable(reason) => {
                        debug!("fallback lookup for {hex} unavailable: {reason}");
                        return None;
                    }
                }
            }
        };
        Some(self.fallback_info(hex, callsign, altitude_ft, record))
    }

    fn store_fallback(&self, hex: &str, record: Option<FallbackRecord>) {
        if let Err(err) = self.fallback_cache.insert(hex, record) {
            if !self.cache_error_logged.swap(true, Ordering::Relaxed) {
                warn!("fallback cache write failed: {err:#}");
            }
        }
    }

    fn fallback_info(
        &self,
        hex: &str,
        callsign: &str,
        altitude_ft: Option<i64>,
        record: FallbackRecord,
    ) -> AircraftInfo {
        let base = record
            .icao_type
            .as_deref()
            .and_then(heuristics::type_from_icao_type)
            .unwrap_or_else(|| heuristics::classify_callsign(callsign, altitude_ft));
        let type_code = heuristics::apply_cargo_override(base, [record.operator.as_deref()]);
        AircraftInfo {
            hex_code: hex.to_string(),
            type_code,
            display_name: build_display_name(
                record.manufacturer.as_deref(),
                record.model.as_deref(),
                record.icao_type.as_deref(),
                self.display_name_max,
            ),
            icao_type: record.icao_type,
            registration: record.registration,
            operator: record.operator,
            source: Source::Fallback,
        }
    }
}
