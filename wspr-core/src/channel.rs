//! Band table and channel timing.
//!
//! A tracker transmits once per 10-minute cycle in consecutive 2-minute
//! slots. The band and channel number decide which minute slot 0 starts on;
//! for U4B the channel also fixes the telemetry callsign's first and third
//! characters and the frequency lane.

use chrono::{DateTime, TimeDelta, Timelike, Utc};

use crate::types::{Result, WsprError};

/// Length of one telemetry cycle in minutes.
pub const CYCLE_MINUTES: u32 = 10;

/// Highest valid channel number.
pub const MAX_CHANNEL: u16 = 599;

/// Seconds to wait after a slot starts before refreshing, so that spots
/// have time to reach the database.
const REFRESH_DELAY_SECS: i64 = 195;

/// Minimum lead time for a scheduled refresh.
const REFRESH_MIN_LEAD_SECS: i64 = 10;

/// How far back an incremental fetch reaches from the last update.
const INCREMENTAL_LOOKBACK_HOURS: i64 = 6;

// ---------------------------------------------------------------------------
// Bands
// ---------------------------------------------------------------------------

/// Static band metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandInfo {
    pub name: &'static str,
    /// Minute slot 0 starts on for channel 0.
    pub start_minute: u32,
    /// Band identifier used by wspr.live.
    pub wspr_live_id: i32,
    /// Lower edge of the U4B frequency lanes.
    pub lane_start_hz: u64,
}

const fn band(name: &'static str, start_minute: u32, wspr_live_id: i32, lane_start_hz: u64) -> BandInfo {
    BandInfo {
        name,
        start_minute,
        wspr_live_id,
        lane_start_hz,
    }
}

/// Known WSPR bands.
pub const BAND_TABLE: &[BandInfo] = &[
    band("2200m", 0, -1, 137_400),
    band("630m", 4, 0, 475_600),
    band("160m", 8, 1, 1_838_000),
    band("80m", 2, 3, 3_570_000),
    band("60m", 6, 5, 5_288_600),
    band("40m", 0, 7, 7_040_000),
    band("30m", 4, 10, 10_140_100),
    band("20m", 8, 14, 14_097_000),
    band("17m", 2, 18, 18_106_000),
    band("15m", 6, 21, 21_096_000),
    band("12m", 0, 24, 24_926_000),
    band("10m", 4, 28, 28_126_000),
    band("6m", 8, 50, 50_294_400),
    band("4m", 2, 70, 70_092_400),
    band("2m", 6, 144, 144_490_400),
    band("70cm", 0, 432, 432_301_400),
    band("23cm", 4, 1296, 1_296_501_400),
];

/// Look up band metadata by name (`"20m"`, `"70cm"`, ...).
pub fn band_info(name: &str) -> Option<&'static BandInfo> {
    let name = name.trim();
    BAND_TABLE.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Which 80 Hz lane of the band segment a U4B channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyLane {
    Lower,
    Upper,
}

/// A validated band + channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    band: &'static BandInfo,
    number: u16,
}

impl Channel {
    pub fn new(band: &str, number: u16) -> Result<Self> {
        let band = band_info(band).ok_or_else(|| WsprError::UnknownBand(band.to_string()))?;
        if number > MAX_CHANNEL {
            return Err(WsprError::InvalidChannel(number));
        }
        Ok(Channel { band, number })
    }

    pub fn band(&self) -> &'static BandInfo {
        self.band
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    /// Minute within the 10-minute cycle on which slot 0 starts.
    pub fn base_minute(&self) -> u32 {
        (self.band.start_minute + (self.number as u32 % 5) * 2) % CYCLE_MINUTES
    }

    /// Minute within the cycle on which `slot` starts.
    pub fn slot_minute(&self, slot: usize) -> u32 {
        (self.base_minute() + 2 * slot as u32) % CYCLE_MINUTES
    }

    /// Slot index (0..=4) a transmission at `timestamp` falls into.
    pub fn slot_of(&self, timestamp: DateTime<Utc>) -> usize {
        let minute = timestamp.minute() % CYCLE_MINUTES;
        (((minute + CYCLE_MINUTES - self.base_minute()) % CYCLE_MINUTES) / 2) as usize
    }

    /// First character of this channel's U4B telemetry callsign.
    pub fn telemetry_id1(&self) -> char {
        ['0', '1', 'Q'][(self.number / 200) as usize]
    }

    /// Third character of this channel's U4B telemetry callsign.
    pub fn telemetry_id3(&self) -> char {
        char::from(b'0' + ((self.number / 20) % 10) as u8)
    }

    /// Pattern of the telemetry callsign, e.g. `Q_5___`.
    pub fn telemetry_pattern(&self) -> String {
        format!("{}_{}___", self.telemetry_id1(), self.telemetry_id3())
    }

    pub fn lane(&self) -> FrequencyLane {
        if self.number % 20 < 10 {
            FrequencyLane::Lower
        } else {
            FrequencyLane::Upper
        }
    }

    /// Inclusive frequency window of this channel's lane, in Hz.
    pub fn frequency_window(&self) -> (u64, u64) {
        let start = self.band.lane_start_hz;
        match self.lane() {
            FrequencyLane::Lower => (start, start + 80),
            FrequencyLane::Upper => (start + 120, start + 200),
        }
    }

    /// When to fetch again so that a cycle ending with `last_slot` has been
    /// fully reported.
    pub fn next_update_at(&self, now: DateTime<Utc>, last_slot: usize) -> DateTime<Utc> {
        let into_cycle = (now.minute() % CYCLE_MINUTES) as i64 * 60 + now.second() as i64;
        let cycle_start = now - TimeDelta::seconds(into_cycle);
        let cycle_start = cycle_start.with_nanosecond(0).unwrap_or(cycle_start);

        let mut next = cycle_start
            + TimeDelta::seconds(self.slot_minute(last_slot) as i64 * 60 + REFRESH_DELAY_SECS);
        if next < now + TimeDelta::seconds(REFRESH_MIN_LEAD_SECS) {
            next += TimeDelta::seconds(CYCLE_MINUTES as i64 * 60);
        }
        next
    }
}

/// Start of the window an incremental fetch should cover.
pub fn incremental_cutoff(last_update: DateTime<Utc>) -> DateTime<Utc> {
    last_update - TimeDelta::hours(INCREMENTAL_LOOKBACK_HOURS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
