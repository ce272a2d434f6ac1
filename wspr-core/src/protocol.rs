//! Protocol catalogue.
//!
//! Every encoding convention the tracker understands is one variant of the
//! closed [`Protocol`] enum. Slot counts, the correlation rule used by the
//! matcher, and the power-to-altitude tables of the vendor protocols all
//! hang off that enum so each protocol's rules live in one place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Result, WsprError};

/// Maximum frequency difference, in Hz, for two receptions to count as the
/// same receiver hearing the same transmitter.
pub const CORRELATION_TOLERANCE_HZ: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Not identified. Reports are passed through one per spot.
    Unknown,
    /// Dense numeric channel scheme with optional extended telemetry.
    #[default]
    U4b,
    /// User-defined: plain primary plus extended telemetry slots.
    Generic,
    /// Zachtek single-message: altitude from the power level only.
    Zachtek1,
    /// Zachtek two-message: second message carries a 6-character locator.
    Zachtek2,
    /// WB8ELK two-message, correlated by primary locator.
    Wb8elk,
}

/// How the matcher decides a supplementary report belongs to the current
/// spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// No matching at all; every report is its own spot.
    Passthrough,
    /// Attach unconditionally.
    Always,
    /// Attach when the 4-character locator equals the primary's.
    SameLocator,
    /// Attach when a lower filled slot was heard by a common receiver at
    /// nearly the same frequency.
    CoReception,
}

/// One affine altitude contribution: `offset + slope * power_dbm` of the
/// report in `slot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeTerm {
    pub slot: usize,
    pub offset: f64,
    pub slope: f64,
}

const fn term(slot: usize, offset: f64, slope: f64) -> AltitudeTerm {
    AltitudeTerm {
        slot,
        offset,
        slope,
    }
}

const ZACHTEK1_ALTITUDE: &[AltitudeTerm] = &[term(0, 0.0, 300.0)];
const TWO_MESSAGE_ALTITUDE: &[AltitudeTerm] = &[term(0, 0.0, 300.0), term(1, 0.0, 20.0)];

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Unknown,
        Protocol::U4b,
        Protocol::Generic,
        Protocol::Zachtek1,
        Protocol::Zachtek2,
        Protocol::Wb8elk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Unknown => "unknown",
            Protocol::U4b => "u4b",
            Protocol::Generic => "generic",
            Protocol::Zachtek1 => "zachtek1",
            Protocol::Zachtek2 => "zachtek2",
            Protocol::Wb8elk => "wb8elk",
        }
    }

    /// Number of transmissions per telemetry cycle.
    pub fn slot_count(self) -> usize {
        match self {
            Protocol::Unknown | Protocol::Zachtek1 => 1,
            Protocol::Zachtek2 | Protocol::Wb8elk => 2,
            Protocol::U4b | Protocol::Generic => 5,
        }
    }

    pub fn correlation(self) -> Correlation {
        match self {
            Protocol::Unknown => Correlation::Passthrough,
            Protocol::U4b | Protocol::Generic => Correlation::CoReception,
            Protocol::Zachtek1 | Protocol::Zachtek2 => Correlation::Always,
            Protocol::Wb8elk => Correlation::SameLocator,
        }
    }

    /// Power-to-altitude terms, empty for protocols that do not encode
    /// altitude in the power field.
    pub fn altitude_terms(self) -> &'static [AltitudeTerm] {
        match self {
            Protocol::Zachtek1 => ZACHTEK1_ALTITUDE,
            Protocol::Zachtek2 | Protocol::Wb8elk => TWO_MESSAGE_ALTITUDE,
            _ => &[],
        }
    }

    /// Protocols whose only position source is the 4-character primary.
    pub fn is_primary_only(self) -> bool {
        self.slot_count() == 1
    }

    /// Protocols whose supplementary slots may carry extended telemetry.
    pub fn carries_extended_telemetry(self) -> bool {
        matches!(self, Protocol::U4b | Protocol::Generic)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = WsprError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Protocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| WsprError::UnknownProtocol(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// U4B versions
// ---------------------------------------------------------------------------

/// Meaning of the U4B GPS-valid bit under a declared protocol version.
///
/// The version is configured out of band and is authoritative for the whole
/// query; nothing is inferred from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum U4bVariant {
    /// Bit clear means the fix is invalid.
    #[default]
    Classic,
    /// Bit set adds 42 speed steps.
    SpeedRange,
    /// Bit set adds 10 m of altitude.
    AltitudePrecision,
    /// Bit selects the east or west half of the sub-square.
    LongitudePrecision,
    /// Bit selects the north or south half of the sub-square.
    LatitudePrecision,
}

impl U4bVariant {
    pub fn from_version(version: Option<u8>) -> Result<Self> {
        match version.unwrap_or(0) {
            0 => Ok(U4bVariant::Classic),
            1 => Ok(U4bVariant::SpeedRange),
            2 => Ok(U4bVariant::AltitudePrecision),
            3 => Ok(U4bVariant::LongitudePrecision),
            4 => Ok(U4bVariant::LatitudePrecision),
            v => Err(WsprError::UnsupportedVersion(v)),
        }
    }

    /// Whether the reserved bit has been repurposed away from GPS validity.
    pub fn repurposes_bit(self) -> bool {
        self != U4bVariant::Classic
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
