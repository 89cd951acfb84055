use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCode {
    Jet,
    Helo,
    Mil,
    MilHelo,
    Ga,
    Twin,
    Glider,
    Balloon,
    Chute,
    Ups,
    Fdx,
    Amazon,
    Dhl,
    Cargo,
    Unknown,
}

impl TypeCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeCode::Jet => "JET",
            TypeCode::Helo => "HELO",
            TypeCode::Mil => "MIL",
            TypeCode::MilHelo => "MIL_HELO",
            TypeCode::Ga => "GA",
            TypeCode::Twin => "TWIN",
            TypeCode::Glider => "GLIDER",
            TypeCode::Balloon => "BALLOON",
            TypeCode::Chute => "CHUTE",
            TypeCode::Ups => "UPS",
            TypeCode::Fdx => "FDX",
            TypeCode::Amazon => "AMAZON",
            TypeCode::Dhl => "DHL",
            TypeCode::Cargo => "CARGO",
            TypeCode::Unknown => "UNKNOWN",
        }
    }

    pub fn is_military(self) -> bool {
        matches!(self, TypeCode::Mil | TypeCode::MilHelo)
    }

    pub fn is_cargo(self) -> bool {
        matches!(
            self,
            TypeCode::Ups | TypeCode::Fdx | TypeCode::Amazon | TypeCode::Dhl | TypeCode::Cargo
        )
    }

    pub fn accepts_cargo_override(self) -> bool {
        matches!(self, TypeCode::Jet | TypeCode::Twin)
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Variant order is rank order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Heuristic,
    Fallback,
    Community,
    Authoritative,
}

impl Source {
    pub fn outranks(self, other: Source) -> bool {
        self > other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Heuristic => "heuristic",
            Source::Fallback => "fallback",
            Source::Community => "community",
            Source::Authoritative => "authoritative",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AircraftInfo {
    pub hex_code: String,
    pub type_code: TypeCode,
    pub display_name: Option<String>,
    pub icao_type: Option<String>,
    pub registration: Option<String>,
    pub operator: Option<String>,
    pub source: Source,
}

impl AircraftInfo {
    pub fn heuristic(hex_code: &str, type_code: TypeCode) -> Self {
        AircraftInfo {
            hex_code: normalize_hex(hex_code),
            type_code,
            display_name: None,
            icao_type: None,
            registration: None,
            operator: None,
            source: Source::Heuristic,
        }
    }

    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.type_code.as_str().to_string())
    }
}

pub fn normalize_hex(hex_code: &str) -> String {
    hex_code.trim().to_ascii_lowercase()
}

const MANUFACTURER_SHORTCUTS: &[(&str, &str)] = &[
    ("DE HAVILLAND", "DHC"),
    ("MCDONNELL DOUGLAS", "MD"),
    ("BOEING", "Boeing"),
    ("AIRBUS", "Airbus"),
    ("CESSNA", "Cessna"),
    ("PIPER", "Piper"),
    ("BEECH", "Beechcraft"),
    ("BOMBARDIER", "Bombardier"),
    ("EMBRAER", "Embraer"),
    ("GULFSTREAM", "Gulfstream"),
    ("LEARJET", "Learjet"),
    ("CIRRUS", "Cirrus"),
    ("MOONEY", "Mooney"),
    ("DIAMOND", "Diamond"),
    ("ROBINSON", "Robinson"),
    ("BELL", "Bell"),
    ("SIKORSKY", "Sikorsky"),
    ("EUROCOPTER", "Eurocopter"),
    ("TEXTRON", "Textron"),
    ("RAYTHEON", "Raytheon"),
    ("LOCKHEED", "Lockheed"),
];

const MANUFACTURER_MAX_CHARS: usize = 12;

pub fn shorten_manufacturer(manufacturer: &str) -> String {
    let trimmed = manufacturer.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let upper = trimmed.to_ascii_uppercase();
    for (needle, short) in MANUFACTURER_SHORTCUTS {
        if upper.contains(needle) {
            return (*short).to_string();
        }
    }
    title_case(trimmed)
        .chars()
        .take(MANUFACTURER_MAX_CHARS)
        .collect()
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(ch);
            word_start = true;
        }
    }
    out
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn build_display_name(
    manufacturer: Option<&str>,
    model: Option<&str>,
    icao_type: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let manufacturer = non_empty(manufacturer).map(shorten_manufacturer);
    let model = non_empty(model);
    let icao_type = non_empty(icao_type);

    let name = match (manufacturer, model, icao_type) {
        (Some(mfr), Some(model), _) => format!("{mfr} {model}"),
        (Some(mfr), None, Some(tc)) => format!("{mfr} {tc}"),
        (_, Some(model), _) => model.to_string(),
        (_, None, Some(tc)) => tc.to_string(),
        _ => return None,
    };
    Some(truncate_display(&name, max_chars))
}

pub fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
