use crate::aircraft::TypeCode;

const MILITARY_PREFIXES: &[&str] = &[
    "REACH", "RCH", "TETON", "EVAC", "RESCUE", "ARMY", "NAVY", "GUARD", "DUKE", "HAWK", "VIPER",
    "CNV", "PAT", "SPAR", "IRON", "STEEL", "BLADE", "SABER", "TOPCAT", "BOXER", "KARMA", "RAID",
    "SKULL", "BONE", "DEATH", "DUSTOFF",
];

const HELO_INDICATORS: &[&str] = &[
    "LIFE", "MEDEVAC", "HELI", "COPTER", "AIR1", "MERCY", "ANGEL", "DUSTOFF",
];

const AIRLINE_PREFIXES: &[&str] = &[
    "AAL", "UAL", "DAL", "SWA", "JBU", "ASA", "FFT", "NKS", "SKW", "ENY", "RPA", "EDV", "PDT",
    "CPZ", "ASQ", "EJA", "LXJ", "XOJ", "TVS", "XAJ", "LEA", "WWI", "VIR", "BAW", "AFR", "DLH",
    "KLM", "UAE", "QFA", "ANA", "JAL",
];

const OTHER_CARGO_CALLSIGNS: &[&str] = &[
    "KFS", "CLX", "MPH", "PAC", "SQC", "BOX", "GEC", "ICL", "NCR", "AHK", "CAL", "CKS", "NCA",
    "POL",
];

const OTHER_CARGO_NAMES: &[&str] = &[
    "KALITTA",
    "CARGOLUX",
    "POLAR AIR",
    "SOUTHERN AIR",
    "WESTERN GLOBAL",
    "WORLD AIRWAYS",
    "NIPPON CARGO",
    "CATHAY CARGO",
    "AIR TRANSPORT INT",
    "AMERIJET",
    "MARTINAIRE",
    "EMPIRE AIRLINES",
    "MOUNTAIN AIR CARGO",
];

const HIGH_ALTITUDE_JET_FT: i64 = 25_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MilitaryHeloThresholds {
    pub max_altitude_ft: i64,
    pub max_speed_kt: f64,
}

impl Default for MilitaryHeloThresholds {
    fn default() -> Self {
        MilitaryHeloThresholds {
            max_altitude_ft: 5000,
            max_speed_kt: 180.0,
        }
    }
}

fn normalize_callsign(callsign: &str) -> String {
    callsign.trim().to_ascii_uppercase()
}

fn has_helo_indicator(callsign: &str) -> bool {
    HELO_INDICATORS.iter().any(|p| callsign.contains(p))
}

pub fn is_military_callsign(callsign: &str) -> bool {
    let upper = normalize_callsign(callsign);
    !upper.is_empty() && MILITARY_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub fn military_type(
    callsign: &str,
    altitude_ft: Option<i64>,
    speed_kt: Option<f64>,
    thresholds: MilitaryHeloThresholds,
) -> Option<TypeCode> {
    let upper = normalize_callsign(callsign);
    if !is_military_callsign(&upper) {
        return None;
    }
    if has_helo_indicator(&upper) {
        return Some(TypeCode::MilHelo);
    }
    match (altitude_ft, speed_kt) {
        (Some(alt), Some(speed))
            if alt > 0
                && speed > 0.0
                && alt < thresholds.max_altitude_ft
                && speed < thresholds.max_speed_kt =>
        {
            Some(TypeCode::MilHelo)
        }
        _ => Some(TypeCode::Mil),
    }
}

pub fn cargo_from_callsign(callsign: &str) -> Option<TypeCode> {
    let upper = normalize_callsign(callsign);
    if upper.starts_with("UPS") {
        Some(TypeCode::Ups)
    } else if upper.starts_with("FDX") || upper.starts_with("FXE") {
        Some(TypeCode::Fdx)
    } else if ["GTI", "ATN", "ABX"].iter().any(|p| upper.starts_with(p)) {
        Some(TypeCode::Amazon)
    } else if ["DHL", "BCS", "DAE"].iter().any(|p| upper.starts_with(p)) {
        Some(TypeCode::Dhl)
    } else if OTHER_CARGO_CALLSIGNS.iter().any(|p| upper.starts_with(p)) {
        Some(TypeCode::Cargo)
    } else {
        None
    }
}

pub fn cargo_from_name(name: &str) -> Option<TypeCode> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    let has = |needle: &str| upper.contains(needle);
    if has("UNITED PARCEL") || has("UPS") {
        Some(TypeCode::Ups)
    } else if has("FEDERAL EXPRESS") || has("FEDEX") {
        Some(TypeCode::Fdx)
    } else if has("AMAZON") || has("PRIME AIR") || has("ATLAS AIR") || has("ABX AIR") {
        Some(TypeCode::Amazon)
    } else if has("DHL") {
        Some(TypeCode::Dhl)
    } else if OTHER_CARGO_NAMES.iter().any(|n| upper.contains(n)) {
        Some(TypeCode::Cargo)
    } else {
        None
    }
}

pub fn apply_cargo_override<'a>(
    type_code: TypeCode,
    names: impl IntoIterator<Item = Option<&'a str>>,
) -> TypeCode {
    if !type_code.accepts_cargo_override() {
        return type_code;
    }
    names
        .into_iter()
        .flatten()
        .find_map(cargo_from_name)
        .unwrap_or(type_code)
}

pub fn classify_callsign(callsign: &str, altitude_ft: Option<i64>) -> TypeCode {
    let upper = normalize_callsign(callsign);
    if has_helo_indicator(&upper) {
        return TypeCode::Helo;
    }
    if let Some(cargo) = cargo_from_callsign(&upper) {
        return cargo;
    }
    if AIRLINE_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return TypeCode::Jet;
    }
    if altitude_ft.is_some_and(|alt| alt > HIGH_ALTITUDE_JET_FT) {
        return TypeCode::Jet;
    }
    if looks_like_n_number(&upper) {
        return TypeCode::Ga;
    }
    TypeCode::Unknown
}

pub fn looks_like_n_number(callsign: &str) -> bool {
    let upper = normalize_callsign(callsign);
    let mut chars = upper.chars();
    upper.len() >= 2
        && upper.len() <= 6
        && chars.next() == Some('N')
        && chars.next().is_some_and(|c| c.is_ascii_digit())
        && upper.chars().all(|c| c.is_ascii_alphanumeric())
}

const MIL_HELO_TYPECODES: &[&str] = &["UH60", "AH64", "CH47", "CH53", "MH60", "HH60", "V22", "UH1"];
const HELO_TYPECODES: &[&str] = &[
    "R22", "R44", "R66", "EC", "AS", "B06", "B47", "B04", "S76", "S92", "A109", "A119", "A139",
    "A169", "B20", "B41", "BK", "MD5", "H1",
];
// Short military designators that would otherwise swallow civil families
// (C172, C560, B190) as prefixes.
const MIL_TYPECODES_EXACT: &[&str] = &[
    "A10", "B1", "B2", "C5", "C5M", "C17", "T6", "K35R", "E3TF", "E3CF", "E8",
];
const MIL_TYPECODES: &[&str] = &[
    "F15", "F16", "F18", "F22", "F35", "B52", "C130", "C30J", "KC", "P8", "T38",
];
const AIRLINER_TYPECODES: &[&str] = &[
    "A3", "A2", "B73", "B74", "B75", "B76", "B77", "B78", "E17", "E19", "E29", "MD", "DC",
];
const BIZJET_TYPECODES: &[&str] = &[
    "CL", "GL", "LJ", "C5", "C6", "C7", "G2", "G3", "G4", "G5", "G6", "FA", "H25", "BE4", "PC24",
];
const PISTON_TWIN_TYPECODES: &[&str] = &[
    "BE55", "BE58", "BE76", "PA23", "PA30", "PA31", "PA34", "PA44", "C310", "C340", "C414",
    "DA42", "DA62",
];
const GA_TYPECODES: &[&str] = &["C1", "C2", "PA", "BE", "SR", "DA", "M20", "P28"];

pub fn type_from_icao_type(icao_type: &str) -> Option<TypeCode> {
    let tc = icao_type.trim().to_ascii_uppercase();
    if tc.is_empty() {
        return None;
    }
    let starts = |list: &[&str]| list.iter().any(|p| tc.starts_with(p));

    if starts(MIL_HELO_TYPECODES) {
        Some(TypeCode::MilHelo)
    } else if starts(HELO_TYPECODES) {
        Some(TypeCode::Helo)
    } else if MIL_TYPECODES_EXACT.contains(&tc.as_str()) || starts(MIL_TYPECODES) {
        Some(TypeCode::Mil)
    } else if starts(AIRLINER_TYPECODES) || starts(BIZJET_TYPECODES) {
        Some(TypeCode::Jet)
    } else if starts(PISTON_TWIN_TYPECODES) {
        Some(TypeCode::Twin)
    } else if starts(GA_TYPECODES) {
        Some(TypeCode::Ga)
    } else {
        None
    }
}
