use crate::aircraft::TypeCode;
use crate::heuristics;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const MASTER_FILE: &str = "MASTER.txt";
pub const ACFTREF_FILE: &str = "ACFTREF.txt";

const MASTER_MIN_FIELDS: usize = 21;
const COL_N_NUMBER: usize = 0;
const COL_MFR_MODEL_CODE: usize = 2;
const COL_REGISTRANT: usize = 6;
const COL_TYPE_AIRCRAFT: usize = 18;
const COL_TYPE_ENGINE: usize = 19;
const COL_STATUS: usize = 20;
const COL_MODE_S_HEX: usize = 33;

const ACTIVE_STATUS_CODES: &[&str] = &["V", "A", "M", "T", "N", "R", "S"];
const TURBINE_ENGINE_CODES: &[&str] = &["2", "3", "4", "5", "6"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub n_number: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub registrant: Option<String>,
    pub type_aircraft: String,
    pub type_engine: String,
    pub type_code: TypeCode,
}

#[derive(Clone, Debug, Default)]
struct ModelRef {
    manufacturer: String,
    model: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistryStats {
    pub aircraft_count: usize,
    pub by_hex_count: usize,
    pub by_n_number_count: usize,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct AircraftRegistry {
    by_hex: HashMap<String, Arc<RegistryEntry>>,
    by_n_number: HashMap<String, Arc<RegistryEntry>>,
    aircraft_count: usize,
    source: Option<PathBuf>,
}

impl AircraftRegistry {
    pub fn load(dir: &Path) -> Result<Self> {
        let master_path = dir.join(MASTER_FILE);
        if !master_path.exists() {
            return Err(anyhow!("registry file not found: {}", master_path.display()));
        }
        let master = read_lossy(&master_path)?;
        let reference_path = dir.join(ACFTREF_FILE);
        let reference = if reference_path.exists() {
            Some(read_lossy(&reference_path)?)
        } else {
            debug!("no aircraft reference table at {}", reference_path.display());
            None
        };

        let mut registry = Self::parse(&master, reference.as_deref());
        registry.source = Some(dir.to_path_buf());
        info!(
            "aircraft registry loaded aircraft={} by_hex={} by_n_number={}",
            registry.aircraft_count,
            registry.by_hex.len(),
            registry.by_n_number.len()
        );
        Ok(registry)
    }

    pub fn parse(master: &str, reference: Option<&str>) -> Self {
        let models = reference.map(parse_reference).unwrap_or_default();
        let mut registry = AircraftRegistry::default();

        let mut malformed = 0usize;
        for record in csv_reader(master).records() {
            let fields = match record {
                Ok(fields) => fields,
                Err(_) => {
                    malformed += 1;
                    continue;
                }
            };
            if fields.len() < MASTER_MIN_FIELDS {
                continue;
            }
            let n_number = fields[COL_N_NUMBER].trim().to_ascii_uppercase();
            if n_number.is_empty() || n_number == "N-NUMBER" {
                continue;
            }
            let status = fields[COL_STATUS].trim();
            if !status.is_empty() && !ACTIVE_STATUS_CODES.contains(&status) {
                continue;
            }

            let type_aircraft = fields[COL_TYPE_AIRCRAFT].trim().to_string();
            let type_engine = fields[COL_TYPE_ENGINE].trim().to_string();
            let registrant = Some(fields[COL_REGISTRANT].trim().to_ascii_uppercase())
                .filter(|r| !r.is_empty());
            let model_ref = models
                .get(fields[COL_MFR_MODEL_CODE].trim())
                .cloned()
                .unwrap_or_default();

            let base = classify_registration(&type_aircraft, &type_engine);
            let type_code = heuristics::apply_cargo_override(base, [registrant.as_deref()]);

            let entry = Arc::new(RegistryEntry {
                n_number: format!("N{n_number}"),
                manufacturer: Some(model_ref.manufacturer).filter(|m| !m.is_empty()),
                model: Some(model_ref.model).filter(|m| !m.is_empty()),
                registrant,
                type_aircraft,
                type_engine,
                type_code,
            });

            if let Some(hex) = fields.get(COL_MODE_S_HEX).map(registry_hex_key) {
                if !hex.is_empty() {
                    registry.by_hex.insert(hex, Arc::clone(&entry));
                }
            }
            registry.by_n_number.insert(n_number, entry);
            registry.aircraft_count += 1;
        }
        if malformed > 0 {
            debug!("skipped {} unreadable registry rows", malformed);
        }
        registry
    }

    pub fn lookup(&self, hex_code: &str, callsign: Option<&str>) -> Option<Arc<RegistryEntry>> {
        let key = registry_hex_key(hex_code);
        if !key.is_empty() {
            if let Some(entry) = self.by_hex.get(&key) {
                return Some(Arc::clone(entry));
            }
        }
        let callsign = callsign?.trim().to_ascii_uppercase();
        let tail = callsign.strip_prefix('N')?;
        self.by_n_number.get(tail).map(Arc::clone)
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft_count == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            aircraft_count: self.aircraft_count,
            by_hex_count: self.by_hex.len(),
            by_n_number_count: self.by_n_number.len(),
            source: self.source.clone(),
        }
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes())
}

fn parse_reference(text: &str) -> HashMap<String, ModelRef> {
    let mut models = HashMap::new();
    for fields in csv_reader(text).records().flatten() {
        if fields.len() < 4 {
            continue;
        }
        let code = fields[0].trim();
        if code.is_empty() {
            continue;
        }
        models.insert(
            code.to_string(),
            ModelRef {
                manufacturer: fields[1].trim().to_string(),
                model: fields[2].trim().to_string(),
            },
        );
    }
    models
}

/// Lowercase with leading zeros stripped, so "00A1B2" and "a1b2" collide.
pub fn registry_hex_key(hex_code: &str) -> String {
    hex_code
        .trim()
        .trim_start_matches('0')
        .to_ascii_lowercase()
}

pub fn classify_registration(type_aircraft: &str, type_engine: &str) -> TypeCode {
    match type_aircraft {
        "1" => TypeCode::Glider,
        "2" | "3" => TypeCode::Balloon,
        "4" | "7" | "H" => TypeCode::Ga,
        "5" if TURBINE_ENGINE_CODES.contains(&type_engine) => TypeCode::Jet,
        "5" => TypeCode::Twin,
        "6" | "9" => TypeCode::Helo,
        "8" => TypeCode::Chute,
        _ => TypeCode::Unknown,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MASTER_HEADER: &str = "N-NUMBER,SERIAL NUMBER,MFR MDL CODE,ENG MFR MDL,YEAR MFR,TYPE REGISTRANT,NAME,STREET,STREET2,CITY,STATE,ZIP CODE,REGION,COUNTY,COUNTRY,LAST ACTION DATE,CERT ISSUE DATE,CERTIFICATION,TYPE AIRCRAFT,TYPE ENGINE,STATUS CODE,MODE S CODE,FRACT OWNER,AIR WORTH DATE,OTHER NAMES(1),OTHER NAMES(2),OTHER NAMES(3),OTHER NAMES(4),OTHER NAMES(5),EXPIRATION DATE,UNIQUE ID,KIT MFR, KIT MODEL,MODE S CODE HEX,";

    pub(crate) fn master_row(
        n_number: &str,
        mfr_code: &str,
        registrant: &str,
        type_aircraft: &str,
        type_engine: &str,
        status: &str,
        hex: &str,
    ) -> String {
        let mut fields = vec![String::new(); 35];
        fields[COL_N_NUMBER] = format!("{n_number:<5}");
        fields[COL_MFR_MODEL_CODE] = mfr_code.to_string();
        fields[COL_REGISTRANT] = format!("{registrant:<50}");
        fields[COL_TYPE_AIRCRAFT] = type_aircraft.to_string();
        fields[COL_TYPE_ENGINE] = type_engine.to_string();
        fields[COL_STATUS] = status.to_string();
        fields[COL_MODE_S_HEX] = format!("{hex:<10}");
        fields.join(",")
    }

    fn sample_registry() -> AircraftRegistry {
        let master = [
            MASTER_HEADER.to_string(),
            master_row("12345", "1384410", "UNITED AIRLINES INC", "5", "5", "V", "A12345"),
            master_row("678FE", "1384410", "FEDERAL EXPRESS CORP", "5", "5", "V", "AA0001"),
            master_row("44XY", "2072705", "SMITH JOHN", "4", "1", "V", "0A44FF"),
            master_row("90210", "2072705", "GONE AWAY LLC", "4", "1", "D", "A90210"),
            master_row("55HX", "", "COUNTY HEALTH", "6", "3", "", "ABCDEF"),
        ]
        .join("\n");
        let reference = "CODE,MFR,MODEL,TYPE-ACFT,TYPE-ENG\n\
1384410,BOEING                        ,737-824             ,5,5\n\
2072705,CESSNA                        ,172S                ,4,1\n";
        AircraftRegistry::parse(&master, Some(reference))
    }

    #[test]
    fn parses_master_and_reference() {
        let registry = sample_registry();
        assert_eq!(registry.stats().aircraft_count, 4);
        let entry = registry.lookup("a12345", None).unwrap();
        assert_eq!(entry.n_number, "N12345");
        assert_eq!(entry.type_code, TypeCode::Jet);
        assert_eq!(entry.manufacturer.as_deref(), Some("BOEING"));
        assert_eq!(entry.model.as_deref(), Some("737-824"));
    }

    #[test]
    fn deregistered_rows_are_skipped() {
        let registry = sample_registry();
        assert!(registry.lookup("a90210", Some("N90210")).is_none());
    }

    #[test]
    fn hex_lookup_ignores_leading_zeros_and_case() {
        let registry = sample_registry();
        let entry = registry.lookup("00a44ff", None).unwrap();
        assert_eq!(entry.n_number, "N44XY");
        assert_eq!(entry.type_code, TypeCode::Ga);
        assert_eq!(entry.model.as_deref(), Some("172S"));
    }

    #[test]
    fn n_number_lookup_from_callsign() {
        let registry = sample_registry();
        let entry = registry.lookup("ffffff", Some("n44xy")).unwrap();
        assert_eq!(entry.registrant.as_deref(), Some("SMITH JOHN"));
        assert!(registry.lookup("ffffff", Some("UAL123")).is_none());
        assert!(registry.lookup("ffffff", None).is_none());
    }

    #[test]
    fn cargo_registrant_overrides_jet() {
        let registry = sample_registry();
        let entry = registry.lookup("aa0001", None).unwrap();
        assert_eq!(entry.type_code, TypeCode::Fdx);
    }

    #[test]
    fn rotorcraft_without_reference() {
        let registry = sample_registry();
        let entry = registry.lookup("abcdef", None).unwrap();
        assert_eq!(entry.type_code, TypeCode::Helo);
        assert_eq!(entry.manufacturer, None);
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_registration("1", ""), TypeCode::Glider);
        assert_eq!(classify_registration("3", ""), TypeCode::Balloon);
        assert_eq!(classify_registration("5", "1"), TypeCode::Twin);
        assert_eq!(classify_registration("5", "4"), TypeCode::Jet);
        assert_eq!(classify_registration("9", "1"), TypeCode::Helo);
        assert_eq!(classify_registration("8", "1"), TypeCode::Chute);
        assert_eq!(classify_registration("O", ""), TypeCode::Unknown);
    }

    #[test]
    fn quoted_registrant_keeps_its_comma() {
        let mut fields = vec![String::new(); 35];
        fields[COL_N_NUMBER] = "321AB".to_string();
        fields[COL_MFR_MODEL_CODE] = "2072705".to_string();
        fields[COL_REGISTRANT] = "\"SMITH, JOHN \"\"JACK\"\"\"".to_string();
        fields[COL_TYPE_AIRCRAFT] = "4".to_string();
        fields[COL_TYPE_ENGINE] = "1".to_string();
        fields[COL_STATUS] = "V".to_string();
        fields[COL_MODE_S_HEX] = "A321AB".to_string();
        let master = format!("{MASTER_HEADER}\n{}\n", fields.join(","));
        let registry = AircraftRegistry::parse(&master, None);
        let entry = registry.lookup("a321ab", None).unwrap();
        assert_eq!(entry.registrant.as_deref(), Some("SMITH, JOHN \"JACK\""));
        assert_eq!(entry.type_code, TypeCode::Ga);
    }

    #[test]
    fn byte_order_mark_and_crlf_are_tolerated() {
        let master = format!(
            "\u{feff}{MASTER_HEADER}\r\n{}\r\n",
            master_row("12345", "1384410", "UNITED AIRLINES INC", "5", "5", "V", "A12345")
        );
        let registry = AircraftRegistry::parse(&master, None);
        assert_eq!(registry.stats().aircraft_count, 1);
        assert!(registry.lookup("a12345", None).is_some());
    }

    #[test]
    fn load_missing_directory_is_error() {
        let err = AircraftRegistry::load(Path::new("/nonexistent/faa")).unwrap_err();
        assert!(err.to_string().contains("MASTER.txt"));
    }
}
