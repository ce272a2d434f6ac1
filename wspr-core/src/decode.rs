//! Decode spot payloads into physical fields.
//!
//! Handles every protocol in the catalogue:
//! - Unknown / Generic primary: locator and time pass through unchanged
//! - Zachtek / WB8ELK: altitude from affine power terms, 6-char locator
//!   from the second message
//! - U4B: callsign + locator + power of a supplementary slot packed into
//!   two mixed-radix integers `m` and `n`
//!     - odd `n`:  basic telemetry (sub-square, altitude, GPS bit, speed,
//!       voltage, temperature)
//!     - even `n`: opaque extended telemetry integer
//!
//! A malformed supplementary message only marks its own slot invalid.

use tracing::debug;

use crate::channel::Channel;
use crate::locator;
use crate::protocol::{Protocol, U4bVariant};
use crate::radix::{compose_chars, Alphabet, Extractor};
use crate::types::*;

// ---------------------------------------------------------------------------
// U4B message layout
// ---------------------------------------------------------------------------

/// Callsign characters that carry `m`, most significant first.
const CALLSIGN_LAYOUT: [(usize, Alphabet); 4] = [
    (1, Alphabet::Alphanumeric),
    (3, Alphabet::Letters),
    (4, Alphabet::Letters),
    (5, Alphabet::Letters),
];

/// Locator characters that carry `n` (before the power index).
const LOCATOR_LAYOUT: [(usize, Alphabet); 4] = [
    (0, Alphabet::Field),
    (1, Alphabet::Field),
    (2, Alphabet::Digits),
    (3, Alphabet::Digits),
];

/// Number of distinct `n` values: 18 * 18 * 10 * 10 * 19.
pub const N_RANGE: u64 = 615_600;

/// `m` is split into sub-square index and altitude step by this radix.
const ALTITUDE_STEPS: u64 = 1068;
const ALTITUDE_STEP_M: f64 = 20.0;

/// Sub-square indices above this do not name a sub-square.
const MAX_SUBSQUARE_INDEX: u64 = 24 * 24;

/// One basic-telemetry field of `n`. `rotation` is added to the digit
/// modulo the field's modulus before the affine map.
#[derive(Debug, Clone, Copy)]
struct BasicField {
    extractor: Extractor,
    rotation: u64,
}

impl BasicField {
    const fn new(divisor: u64, modulus: u64, rotation: u64, offset: f64, slope: f64) -> Self {
        BasicField {
            extractor: Extractor::new(divisor, modulus, offset, slope),
            rotation,
        }
    }

    fn digit(&self, n: u64) -> u64 {
        (self.extractor.digit(n) + self.rotation) % self.extractor.modulus
    }

    fn value(&self, n: u64) -> f64 {
        self.extractor.offset + self.digit(n) as f64 * self.extractor.slope
    }
}

const GPS_BIT: BasicField = BasicField::new(2, 2, 0, 0.0, 1.0);
/// Two-knot steps, in km/h.
const SPEED: BasicField = BasicField::new(4, 42, 0, 0.0, 2.0 * 1.852);
const VOLTAGE: BasicField = BasicField::new(168, 40, 20, 3.0, 0.05);
const TEMPERATURE: BasicField = BasicField::new(6720, 90, 0, -50.0, 1.0);

/// Extra speed steps unlocked by the speed-range variant.
const SPEED_RANGE_STEPS: f64 = 42.0;
/// Extra altitude unlocked by the altitude-precision variant.
const ALTITUDE_PRECISION_M: f64 = 10.0;

// ---------------------------------------------------------------------------
// U4B messages
// ---------------------------------------------------------------------------

/// A structurally valid U4B telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U4bMessage {
    pub m: u64,
    pub n: u64,
}

/// Basic telemetry carried by an odd-`n` message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicTelemetry {
    pub subsquare: (u8, u8),
    pub altitude_m: f64,
    /// The reserved bit; meaning depends on the declared version.
    pub flag: bool,
    pub speed_kph: f64,
    pub voltage: f64,
    pub temperature_c: f64,
}

impl U4bMessage {
    /// Unpack a telemetry report sent on `channel`.
    ///
    /// Returns `None` if the callsign does not follow the channel's
    /// pattern, the locator is malformed, or the power is off the ladder.
    pub fn unpack(report: &RawReport, channel: &Channel) -> Option<Self> {
        let cs = report.callsign.to_ascii_uppercase();
        let b = cs.as_bytes();
        if b.len() != 6 {
            return None;
        }
        if b[0] as char != channel.telemetry_id1() || b[2] as char != channel.telemetry_id3() {
            return None;
        }
        let m = compose_chars(&cs, &CALLSIGN_LAYOUT)?;

        let grid = report.locator.get(..4)?;
        if !locator::is_valid(grid) {
            return None;
        }
        let power = power_index(report.power_dbm)? as u64;
        let n = compose_chars(grid, &LOCATOR_LAYOUT)? * POWER_LADDER.len() as u64 + power;

        Some(U4bMessage { m, n })
    }

    /// Odd `n` carries basic telemetry; even `n` extended telemetry.
    pub fn is_basic(&self) -> bool {
        self.n % 2 == 1
    }

    /// The opaque extended telemetry integer.
    pub fn extended(&self) -> u64 {
        (self.m * N_RANGE + self.n) / 2
    }

    /// Decode basic telemetry. `None` if the sub-square index is out of
    /// range.
    pub fn basic(&self) -> Option<BasicTelemetry> {
        let p = self.m / ALTITUDE_STEPS;
        if p >= MAX_SUBSQUARE_INDEX {
            return None;
        }
        Some(BasicTelemetry {
            subsquare: ((p / 24) as u8, (p % 24) as u8),
            altitude_m: (self.m % ALTITUDE_STEPS) as f64 * ALTITUDE_STEP_M,
            flag: GPS_BIT.digit(self.n) == 1,
            speed_kph: SPEED.value(self.n),
            voltage: VOLTAGE.value(self.n),
            temperature_c: TEMPERATURE.value(self.n),
        })
    }
}

// ---------------------------------------------------------------------------
// Payload decoder
// ---------------------------------------------------------------------------

/// Protocol-specific field extraction for matched spots.
#[derive(Debug, Clone, Copy)]
pub struct PayloadDecoder {
    protocol: Protocol,
    channel: Channel,
    variant: U4bVariant,
}

impl PayloadDecoder {
    pub fn new(protocol: Protocol, channel: Channel, version: Option<u8>) -> Result<Self> {
        Ok(PayloadDecoder {
            protocol,
            channel,
            variant: U4bVariant::from_version(version)?,
        })
    }

    pub fn decode_all(&self, spots: &mut [Spot]) {
        for spot in spots.iter_mut() {
            self.decode(spot);
        }
    }

    /// Populate the decoded fields of one spot.
    ///
    /// Decoding starts from the raw slots every time, so re-decoding a spot
    /// gives the same result.
    pub fn decode(&self, spot: &mut Spot) {
        spot.timestamp = spot.primary.timestamp;
        spot.slot_valid = [true; MAX_SLOTS];
        spot.gps_valid = true;
        spot.altitude_m = None;
        spot.speed_kph = None;
        spot.voltage = None;
        spot.temperature_c = None;
        spot.raw_et = [None; MAX_SLOTS];

        let mut basic = None;
        match self.protocol {
            Protocol::Unknown | Protocol::Generic => self.decode_primary(spot, false),
            Protocol::Zachtek1 | Protocol::Zachtek2 | Protocol::Wb8elk => {
                self.decode_primary(spot, true);
                self.decode_two_message(spot);
            }
            Protocol::U4b => {
                self.decode_primary(spot, true);
                basic = self.decode_u4b(spot);
            }
        }

        if self.protocol.carries_extended_telemetry() {
            self.collect_extended(spot);
        }
        let position = locator::to_lat_lon(&spot.locator);
        spot.lat = position.map(|p| p.0);
        spot.lon = position.map(|p| p.1);
        if let Some(basic) = basic {
            self.apply_position_variant(spot, basic.flag);
        }
    }

    /// Take the primary locator, optionally cut to its square.
    fn decode_primary(&self, spot: &mut Spot, square_only: bool) {
        let normalized = if square_only {
            locator::square(&spot.primary.locator)
        } else {
            locator::normalize(&spot.primary.locator)
        };
        match normalized {
            Some(loc) => spot.locator = loc,
            None => {
                debug!(locator = %spot.primary.locator, "malformed primary locator");
                spot.slot_valid[0] = false;
                spot.locator = spot.primary.locator.clone();
            }
        }
    }

    fn decode_two_message(&self, spot: &mut Spot) {
        if self.protocol.slot_count() > 1 {
            if let Some(second) = spot.slot(1) {
                match locator::normalize(&second.locator).filter(|l| l.len() == 6) {
                    Some(loc) => spot.locator = loc,
                    None => {
                        debug!(locator = %second.locator, "second message lacks a 6-char locator");
                        spot.slot_valid[1] = false;
                    }
                }
            }
        }

        let mut altitude = 0.0;
        for term in self.protocol.altitude_terms() {
            let power = spot
                .slot(term.slot)
                .filter(|_| spot.slot_valid[term.slot])
                .map(|r| r.power_dbm);
            match power {
                Some(p) => altitude += term.offset + term.slope * p as f64,
                None => return,
            }
        }
        spot.altitude_m = Some(altitude);
    }

    /// Decode basic telemetry from the lowest valid slot carrying it.
    fn decode_u4b(&self, spot: &mut Spot) -> Option<BasicTelemetry> {
        let mut found = None;
        for slot in 1..MAX_SLOTS {
            let Some(report) = spot.slot(slot) else {
                continue;
            };
            let Some(msg) = U4bMessage::unpack(report, &self.channel) else {
                debug!(slot, callsign = %report.callsign, "malformed telemetry message");
                spot.slot_valid[slot] = false;
                continue;
            };
            if !msg.is_basic() {
                continue;
            }
            let Some(basic) = msg.basic() else {
                debug!(slot, m = msg.m, "sub-square index out of range");
                spot.slot_valid[slot] = false;
                continue;
            };
            if found.is_none() && spot.slot_valid[0] {
                self.apply_basic(spot, &basic);
                found = Some(basic);
            }
        }
        found
    }

    fn apply_basic(&self, spot: &mut Spot, basic: &BasicTelemetry) {
        if let Some(grid6) = locator::with_subsquare(&spot.locator, basic.subsquare.0, basic.subsquare.1) {
            spot.locator = grid6;
        }
        spot.altitude_m = Some(basic.altitude_m);
        spot.speed_kph = Some(basic.speed_kph);
        spot.voltage = Some(basic.voltage);
        spot.temperature_c = Some(basic.temperature_c);
        spot.gps_valid = basic.flag || self.variant.repurposes_bit();

        match self.variant {
            U4bVariant::SpeedRange if basic.flag => {
                spot.speed_kph = Some(basic.speed_kph + SPEED_RANGE_STEPS * SPEED.extractor.slope);
            }
            U4bVariant::AltitudePrecision if basic.flag => {
                spot.altitude_m = Some(basic.altitude_m + ALTITUDE_PRECISION_M);
            }
            // Position refinements are applied once lat/lon exist.
            _ => {}
        }
    }

    /// Shift the sub-square center into the half selected by the reserved
    /// bit.
    fn apply_position_variant(&self, spot: &mut Spot, flag: bool) {
        let sign = if flag { 1.0 } else { -1.0 };
        match self.variant {
            U4bVariant::LongitudePrecision => {
                spot.lon = spot.lon.map(|lon| lon + sign * locator::SUBSQUARE_LON_DEG / 4.0);
            }
            U4bVariant::LatitudePrecision => {
                spot.lat = spot.lat.map(|lat| lat + sign * locator::SUBSQUARE_LAT_DEG / 4.0);
            }
            _ => {}
        }
    }

    fn collect_extended(&self, spot: &mut Spot) {
        for slot in 1..MAX_SLOTS {
            if !spot.slot_valid[slot] {
                continue;
            }
            let Some(report) = spot.slot(slot) else {
                continue;
            };
            match U4bMessage::unpack(report, &self.channel) {
                Some(msg) if !msg.is_basic() => spot.raw_et[slot] = Some(msg.extended()),
                Some(_) => {}
                None => {
                    debug!(slot, callsign = %report.callsign, "malformed telemetry message");
                    spot.slot_valid[slot] = false;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test encoders
// ---------------------------------------------------------------------------

/// Pack `m` and `n` back into a telemetry report on `channel`.
#[cfg(test)]
pub(crate) fn encode_u4b(
    channel: &Channel,
    timestamp: chrono::DateTime<chrono::Utc>,
    m: u64,
    n: u64,
    receptions: Vec<Reception>,
) -> RawReport {
    const ALNUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let letter = |v: u64| (b'A' + v as u8) as char;

    let cs: String = [
        channel.telemetry_id1(),
        ALNUM[(m / (26 * 26 * 26)) as usize] as char,
        channel.telemetry_id3(),
        letter((m / (26 * 26)) % 26),
        letter((m / 26) % 26),
        letter(m % 26),
    ]
    .iter()
    .collect();

    let power = POWER_LADDER[(n % 19) as usize];
    let rest = n / 19;
    let grid: String = [
        letter(rest / 1800),
        letter((rest / 100) % 18),
        (b'0' + ((rest / 10) % 10) as u8) as char,
        (b'0' + (rest % 10) as u8) as char,
    ]
    .iter()
    .collect();

    RawReport::new(timestamp, &cs, &grid, power, receptions)
}

/// Build `m` and `n` for the given basic telemetry digits. The power
/// index is whatever `n mod 19` works out to.
#[cfg(test)]
pub(crate) fn pack_basic(
    subsquare: (u64, u64),
    altitude_step: u64,
    flag: bool,
    speed_step: u64,
    voltage_digit: u64,
    temperature_digit: u64,
) -> (u64, u64) {
    let m = (subsquare.0 * 24 + subsquare.1) * ALTITUDE_STEPS + altitude_step;
    let raw_v = (voltage_digit + 20) % VOLTAGE.extractor.modulus;
    let n = 1
        + GPS_BIT.extractor.divisor * flag as u64
        + SPEED.extractor.divisor * speed_step
        + VOLTAGE.extractor.divisor * raw_v
        + TEMPERATURE.extractor.divisor * temperature_digit;
    (m, n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
