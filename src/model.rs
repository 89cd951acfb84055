use crate::aircraft::AircraftInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const FEET_PER_METER: f64 = 3.28084;
pub const KNOTS_PER_MPS: f64 = 1.94384;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionRecord {
    pub hex_code: String,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: Option<i64>,
    pub ground_speed_kt: Option<f64>,
    pub heading: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub distance_km: f64,
    pub bearing_deg: f64,
    pub compass: &'static str,
    pub observed_at: DateTime<Utc>,
    pub aircraft: AircraftInfo,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "de_opt_u64_from_any")]
    pub expires_in: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatesResponse {
    #[serde(default, deserialize_with = "de_opt_i64_from_any")]
    pub time: Option<i64>,
    #[serde(default)]
    pub states: Option<Vec<Value>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateVector {
    pub icao24: String,
    pub callsign: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude_m: Option<f64>,
    pub on_ground: bool,
    pub velocity_mps: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
}

impl StateVector {
    pub fn altitude_ft(&self) -> Option<i64> {
        self.baro_altitude_m
            .map(|m| (m * FEET_PER_METER).round() as i64)
    }

    pub fn ground_speed_kt(&self) -> Option<f64> {
        self.velocity_mps.map(|v| v * KNOTS_PER_MPS)
    }
}

const STATE_ICAO24: usize = 0;
const STATE_CALLSIGN: usize = 1;
const STATE_LONGITUDE: usize = 5;
const STATE_LATITUDE: usize = 6;
const STATE_BARO_ALTITUDE: usize = 7;
const STATE_ON_GROUND: usize = 8;
const STATE_VELOCITY: usize = 9;
const STATE_TRUE_TRACK: usize = 10;
const STATE_VERTICAL_RATE: usize = 11;

/// Decodes one state vector. `None` means the row is malformed and should be
/// skipped without affecting the rest of the batch.
pub fn parse_state_vector(row: &[Value]) -> Option<StateVector> {
    if row.len() <= STATE_ON_GROUND {
        return None;
    }
    let icao24 = row[STATE_ICAO24].as_str()?.trim().to_ascii_lowercase();
    if icao24.is_empty() {
        return None;
    }
    let callsign = row[STATE_CALLSIGN]
        .as_str()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let number = |idx: usize| row.get(idx).and_then(value_as_f64);
    Some(StateVector {
        icao24,
        callsign,
        longitude: number(STATE_LONGITUDE),
        latitude: number(STATE_LATITUDE),
        baro_altitude_m: number(STATE_BARO_ALTITUDE),
        on_ground: row[STATE_ON_GROUND].as_bool().unwrap_or(false),
        velocity_mps: number(STATE_VELOCITY),
        true_track: number(STATE_TRUE_TRACK),
        vertical_rate: number(STATE_VERTICAL_RATE),
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HexDbAircraft {
    #[serde(default, rename = "Manufacturer")]
    pub manufacturer: Option<String>,
    #[serde(default, rename = "Type")]
    pub model: Option<String>,
    #[serde(default, rename = "ICAOTypeCode")]
    pub icao_type: Option<String>,
    #[serde(default, rename = "Registration")]
    pub registration: Option<String>,
    #[serde(default, rename = "RegisteredOwners")]
    pub registered_owners: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_from_any")]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl HexDbAircraft {
    pub fn is_not_found(&self) -> bool {
        self.status.as_deref().map(str::trim) == Some("404")
            || self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

fn de_opt_i64_from_any<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(Some(value))
            } else if let Some(value) = number.as_f64() {
                Ok(Some(value as i64))
            } else {
                Ok(None)
            }
        }
        Value::String(text) => Ok(text.trim().parse::<f64>().ok().map(|v| v as i64)),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected number or null, got {other}"
        ))),
    }
}

fn de_opt_u64_from_any<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_i64_from_any(deserializer)?.and_then(|v| u64::try_from(v).ok()))
}

fn de_opt_string_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(Some(text)),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        _ => Ok(None),
    }
}
