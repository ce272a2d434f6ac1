//! Shared types, error enum, and the report/spot records for wspr-core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by wspr-core.
#[derive(Debug, Error)]
pub enum WsprError {
    #[error("invalid extended telemetry spec: {0}")]
    InvalidSpec(String),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("unknown band: {0}")]
    UnknownBand(String),
    #[error("invalid channel {0}: expected 0..=599")]
    InvalidChannel(u16),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WsprError>;

// ---------------------------------------------------------------------------
// Power ladder
// ---------------------------------------------------------------------------

/// The discrete dBm levels a WSPR transmission may declare.
pub const POWER_LADDER: [u8; 19] = [
    0, 3, 7, 10, 13, 17, 20, 23, 27, 30, 33, 37, 40, 43, 47, 50, 53, 57, 60,
];

/// Position of a dBm value in the power ladder. `None` for off-ladder values.
pub fn power_index(dbm: u8) -> Option<usize> {
    POWER_LADDER.iter().position(|&p| p == dbm)
}

// ---------------------------------------------------------------------------
// Raw reports
// ---------------------------------------------------------------------------

/// One receiver's copy of a transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reception {
    pub receiver: String,
    #[serde(default)]
    pub locator: String,
    pub frequency_hz: u64,
    #[serde(default)]
    pub snr_db: i32,
}

impl Reception {
    pub fn new(receiver: &str, locator: &str, frequency_hz: u64, snr_db: i32) -> Self {
        Reception {
            receiver: receiver.to_string(),
            locator: locator.to_string(),
            frequency_hz,
            snr_db,
        }
    }
}

/// One beacon reception event, as delivered by the upstream feed.
///
/// `receptions` is kept sorted by receiver so co-reception tests can run as
/// a merge join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    pub timestamp: DateTime<Utc>,
    pub callsign: String,
    pub locator: String,
    pub power_dbm: u8,
    #[serde(default)]
    pub receptions: Vec<Reception>,
}

impl RawReport {
    pub fn new(
        timestamp: DateTime<Utc>,
        callsign: &str,
        locator: &str,
        power_dbm: u8,
        mut receptions: Vec<Reception>,
    ) -> Self {
        receptions.sort_by(|a, b| a.receiver.cmp(&b.receiver));
        RawReport {
            timestamp,
            callsign: callsign.to_string(),
            locator: locator.to_string(),
            power_dbm,
            receptions,
        }
    }

    /// Composite sort/merge key.
    pub fn key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.callsign.as_str())
    }

    /// Restore the receiver ordering after deserializing untrusted input.
    pub fn sort_receptions(&mut self) {
        self.receptions.sort_by(|a, b| a.receiver.cmp(&b.receiver));
    }
}

// ---------------------------------------------------------------------------
// Spots
// ---------------------------------------------------------------------------

/// Maximum number of transmissions in one telemetry cycle.
pub const MAX_SLOTS: usize = 5;

/// One reconstructed telemetry reading.
///
/// Slot 0 is held in `primary` so its presence is guaranteed by the type;
/// `secondary[k - 1]` holds slot `k`. Decoded fields are filled in by the
/// decoder, the extended telemetry evaluator, and the curator in turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spot {
    pub primary: RawReport,
    pub secondary: [Option<RawReport>; MAX_SLOTS - 1],
    pub slot_valid: [bool; MAX_SLOTS],

    pub timestamp: DateTime<Utc>,
    pub locator: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_m: Option<f64>,
    pub speed_kph: Option<f64>,
    pub voltage: Option<f64>,
    pub temperature_c: Option<f64>,
    pub gps_valid: bool,

    /// Opaque extended telemetry integers, indexed by slot.
    pub raw_et: [Option<u64>; MAX_SLOTS],
    /// Decoded extended telemetry channels, indexed by extraction order.
    pub et_values: Vec<Option<f64>>,

    pub attached: bool,
}

impl Spot {
    pub fn new(primary: RawReport) -> Self {
        Spot {
            timestamp: primary.timestamp,
            locator: primary.locator.clone(),
            primary,
            secondary: Default::default(),
            slot_valid: [true; MAX_SLOTS],
            lat: None,
            lon: None,
            altitude_m: None,
            speed_kph: None,
            voltage: None,
            temperature_c: None,
            gps_valid: true,
            raw_et: [None; MAX_SLOTS],
            et_values: Vec::new(),
            attached: false,
        }
    }

    /// Report occupying slot `index`, if any.
    pub fn slot(&self, index: usize) -> Option<&RawReport> {
        match index {
            0 => Some(&self.primary),
            k if k < MAX_SLOTS => self.secondary[k - 1].as_ref(),
            _ => None,
        }
    }

    pub fn has_slot(&self, index: usize) -> bool {
        self.slot(index).is_some()
    }

    /// Fill a supplementary slot. Returns `false` if the index is out of
    /// range or already occupied.
    pub fn set_slot(&mut self, index: usize, report: RawReport) -> bool {
        if index == 0 || index >= MAX_SLOTS || self.has_slot(index) {
            return false;
        }
        self.secondary[index - 1] = Some(report);
        true
    }

    /// Number of occupied slots, including the primary.
    pub fn slot_count(&self) -> usize {
        1 + self.secondary.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the decoded position has sub-square (6-character) resolution.
    pub fn is_grid6(&self) -> bool {
        self.locator.len() == 6
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
