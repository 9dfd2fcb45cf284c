//! Typed records for the backend tables the dashboard reads and writes.
//!
//! Rows arrive as loosely typed JSON. Each record validates and coerces its row
//! once at the boundary so the rest of the crate works with plain Rust types.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RidewatchError, config::TableNames};

pub type Row = Value;

pub const ID_COLUMN: &str = "id";
pub const RIDER_COLUMN: &str = "rider_id";
pub const SESSION_COLUMN: &str = "session_id";
pub const UPLOADED_AT_COLUMN: &str = "uploaded_at";
/// Set by the database when a row is inserted, in insertion order
pub const INSERTED_AT_COLUMN: &str = "created_at";

const MPS_TO_KMH: f64 = 3.6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Potholes,
    RideEvents,
}

impl EventKind {
    pub fn table<'a>(&self, tables: &'a TableNames) -> &'a str {
        match self {
            EventKind::Potholes => &tables.potholes,
            EventKind::RideEvents => &tables.ride_events,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Potholes => "Potholes",
            EventKind::RideEvents => "Ride events",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Potholes => write!(f, "potholes"),
            EventKind::RideEvents => write!(f, "ride_events"),
        }
    }
}

/// Direction of an event list, by its timestamp field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Newest => SortOrder::Oldest,
            SortOrder::Oldest => SortOrder::Newest,
        }
    }

    pub fn is_descending(self) -> bool {
        self == SortOrder::Newest
    }

    pub fn label(self) -> &'static str {
        match self {
            SortOrder::Newest => "Newest first",
            SortOrder::Oldest => "Oldest first",
        }
    }
}

/// An event row that belongs to a session and is ordered by one timestamp.
pub trait TimedEvent: Clone + fmt::Debug + Send + 'static {
    const KIND: EventKind;
    /// Column holding the timestamp lists are sorted by
    const TIME_COLUMN: &'static str;

    fn from_row(row: &Row) -> Result<Self, RidewatchError>;
    fn id(&self) -> &str;
    fn session_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct PotholeEvent {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub session_id: String,
    pub rider_id: String,
}

impl TimedEvent for PotholeEvent {
    const KIND: EventKind = EventKind::Potholes;
    const TIME_COLUMN: &'static str = "detected_at";

    fn from_row(row: &Row) -> Result<Self, RidewatchError> {
        let table = "pothole";
        Ok(Self {
            id: required_str(row, table, ID_COLUMN)?,
            detected_at: required_time(row, table, Self::TIME_COLUMN)?,
            session_id: required_str(row, table, SESSION_COLUMN)?,
            rider_id: required_str(row, table, RIDER_COLUMN)?,
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.detected_at
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RideEvent {
    pub id: String,
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub confidence_percent: f64,
    pub duration_seconds: f64,
    pub session_id: String,
    pub rider_id: String,
}

impl TimedEvent for RideEvent {
    const KIND: EventKind = EventKind::RideEvents;
    const TIME_COLUMN: &'static str = "start_time";

    fn from_row(row: &Row) -> Result<Self, RidewatchError> {
        let table = "ride event";
        let start_time = required_time(row, table, Self::TIME_COLUMN)?;
        // a still-open event has no end yet
        let end_time = match field(row, "end_time") {
            Some(_) => required_time(row, table, "end_time")?,
            None => start_time,
        };
        let duration_seconds = opt_f64(row, "duration_seconds")
            .unwrap_or_else(|| (end_time - start_time).num_milliseconds() as f64 / 1000.);

        Ok(Self {
            id: required_str(row, table, ID_COLUMN)?,
            event_type: opt_str(row, "event_type").unwrap_or_else(|| "unknown".to_string()),
            start_time,
            end_time,
            confidence_percent: opt_f64(row, "confidence").unwrap_or(0.),
            duration_seconds,
            session_id: required_str(row, table, SESSION_COLUMN)?,
            rider_id: required_str(row, table, RIDER_COLUMN)?,
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// Latest raw reading from the device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySample {
    /// Acceleration, m/s^2
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    /// Angular rate, rad/s
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Speed as reported by the device, m/s
    pub speed_raw: f64,
    pub session_id: Option<String>,
}

impl TelemetrySample {
    pub fn from_row(row: &Row) -> Result<Self, RidewatchError> {
        if !row.is_object() {
            return Err(RidewatchError::malformed("telemetry", "row is not an object"));
        }
        Ok(Self {
            ax: f64_or_zero(row, "ax"),
            ay: f64_or_zero(row, "ay"),
            az: f64_or_zero(row, "az"),
            gx: f64_or_zero(row, "gx"),
            gy: f64_or_zero(row, "gy"),
            gz: f64_or_zero(row, "gz"),
            latitude: opt_f64(row, "latitude"),
            longitude: opt_f64(row, "longitude"),
            speed_raw: f64_or_zero(row, "speed"),
            session_id: opt_str(row, SESSION_COLUMN),
        })
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_raw * MPS_TO_KMH
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub rider_id: String,
    pub command: String,
    pub status: String,
}

impl CommandRecord {
    pub fn stop(rider_id: &str) -> Self {
        Self {
            rider_id: rider_id.to_string(),
            command: "stop".to_string(),
            status: "pending".to_string(),
        }
    }

    pub fn to_row(&self) -> Result<Row, RidewatchError> {
        serde_json::to_value(self).map_err(|e| RidewatchError::CommandEncode { source: e })
    }
}

/// Pulls the session id out of an uploads row.
pub(crate) fn upload_session_id(row: &Row, tables: &TableNames) -> Result<String, RidewatchError> {
    required_str(row, &tables.uploads, SESSION_COLUMN)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // timestamp columns without a time zone are stored as UTC
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"]
        .iter()
        .find_map(|fmt| {
            DateTime::parse_from_str(raw, fmt)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(raw, fmt).ok().map(|n| n.and_utc()))
        })
}

/// Accepts JSON numbers and numeric strings.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.get(name).filter(|v| !v.is_null())
}

fn opt_f64(row: &Row, name: &str) -> Option<f64> {
    field(row, name).and_then(coerce_f64)
}

fn f64_or_zero(row: &Row, name: &str) -> f64 {
    opt_f64(row, name).unwrap_or(0.)
}

fn opt_str(row: &Row, name: &str) -> Option<String> {
    match field(row, name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_str(row: &Row, table: &str, name: &str) -> Result<String, RidewatchError> {
    opt_str(row, name).ok_or_else(|| RidewatchError::malformed(table, format!("missing {name}")))
}

fn required_time(row: &Row, table: &str, name: &str) -> Result<DateTime<Utc>, RidewatchError> {
    let raw = field(row, name)
        .and_then(Value::as_str)
        .ok_or_else(|| RidewatchError::malformed(table, format!("missing {name}")))?;
    parse_timestamp(raw)
        .ok_or_else(|| RidewatchError::malformed(table, format!("bad {name} timestamp '{raw}'")))
}
