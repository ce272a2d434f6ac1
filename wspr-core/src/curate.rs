//! Track curation: which decoded spots form the displayed path.
//!
//! Spots are never removed; the curator only sets `attached`. A spot is
//! left out of the path when its fix is unusable, when reaching it from
//! the previous attached fix would need an implausible speed, or when a
//! nearby 6-character fix makes a 4-character one redundant.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;

use crate::protocol::Protocol;
use crate::types::Spot;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_SPEED_KPH: f64 = 300.0;

const GRID4_RADIUS_KM: f64 = 100.0;
const GRID6_RADIUS_KM: f64 = 5.0;
const REDUNDANCY_WINDOW_HOURS: i64 = 2;
const REDUNDANCY_DISTANCE_KM: f64 = 200.0;
const MIN_SEGMENT_KM: f64 = 100.0;

/// Longitude jumps more negative than this are taken as eastbound wraps.
const WRAP_THRESHOLD_DEG: f64 = -120.0;

// ---------------------------------------------------------------------------
// Haversine
// ---------------------------------------------------------------------------

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

fn distance_between(a: &Spot, b: &Spot) -> Option<f64> {
    let (lat1, lon1) = a.position()?;
    let (lat2, lon2) = b.position()?;
    Some(haversine_km(lat1, lon1, lat2, lon2))
}

/// Path length with jitter suppression: a segment only counts once the
/// fix has moved more than `min_segment_km` from the last counted fix.
/// The final fix always closes the last segment.
pub fn track_distance_km(points: &[(f64, f64)], min_segment_km: f64) -> f64 {
    let Some(&first) = points.first() else {
        return 0.0;
    };
    let mut total = 0.0;
    let mut anchor = first;
    for (i, &p) in points.iter().enumerate().skip(1) {
        let segment = haversine_km(anchor.0, anchor.1, p.0, p.1);
        if segment > min_segment_km || i == points.len() - 1 {
            total += segment;
            anchor = p;
        }
    }
    total
}

/// Completed circumnavigations from a sequence of longitudes.
pub fn lap_count(lons: &[f64]) -> u32 {
    let mut sum = 0.0_f64;
    let mut max = 0.0_f64;
    for pair in lons.windows(2) {
        let mut delta = pair[1] - pair[0];
        if delta < WRAP_THRESHOLD_DEG {
            delta += 360.0;
        }
        sum += delta;
        max = max.max(sum);
    }
    (max / 360.0).floor() as u32
}

// ---------------------------------------------------------------------------
// Curator
// ---------------------------------------------------------------------------

/// Tunable curation thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TrackOptions {
    pub max_speed_kph: f64,
    /// Leave every 4-character fix out of the path.
    pub detach_grid4: bool,
    pub grid4_radius_km: f64,
    pub grid6_radius_km: f64,
    pub redundancy_window: TimeDelta,
    pub redundancy_distance_km: f64,
    pub min_segment_km: f64,
}

impl Default for TrackOptions {
    fn default() -> Self {
        TrackOptions {
            max_speed_kph: DEFAULT_MAX_SPEED_KPH,
            detach_grid4: false,
            grid4_radius_km: GRID4_RADIUS_KM,
            grid6_radius_km: GRID6_RADIUS_KM,
            redundancy_window: TimeDelta::hours(REDUNDANCY_WINDOW_HOURS),
            redundancy_distance_km: REDUNDANCY_DISTANCE_KM,
            min_segment_km: MIN_SEGMENT_KM,
        }
    }
}

/// Scalars describing the attached path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackSummary {
    pub attached: usize,
    pub unattached: usize,
    pub distance_km: f64,
    pub laps: u32,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub last_altitude_m: Option<f64>,
    pub last_speed_kph: Option<f64>,
    pub last_voltage: Option<f64>,
}

impl TrackSummary {
    pub fn duration(&self) -> Option<TimeDelta> {
        Some(self.last? - self.first?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackCurator {
    protocol: Protocol,
    options: TrackOptions,
}

impl TrackCurator {
    pub fn new(protocol: Protocol, options: TrackOptions) -> Self {
        TrackCurator { protocol, options }
    }

    fn radius_km(&self, spot: &Spot) -> f64 {
        if spot.is_grid6() {
            self.options.grid6_radius_km
        } else {
            self.options.grid4_radius_km
        }
    }

    /// Speed needed to get from `from` to `to`, after allowing for the
    /// uncertainty of both fixes. Elapsed time is floored at one hour.
    pub fn implied_speed_kph(&self, from: &Spot, to: &Spot) -> Option<f64> {
        let dist = distance_between(from, to)?;
        let slack = self.radius_km(from) + self.radius_km(to);
        let hours = (to.timestamp - from.timestamp).num_seconds() as f64 / 3600.0;
        Some((dist - slack).max(0.0) / hours.max(1.0))
    }

    fn feasible(&self, from: &Spot, to: &Spot) -> bool {
        self.implied_speed_kph(from, to)
            .is_some_and(|v| v <= self.options.max_speed_kph)
    }

    /// Whether a spot may join the path at all.
    fn eligible(&self, spot: &Spot) -> bool {
        spot.gps_valid
            && self.protocol != Protocol::Unknown
            && spot.position().is_some()
            && !(self.options.detach_grid4 && !spot.is_grid6())
    }

    fn within_redundancy_window(&self, a: &Spot, b: &Spot, inclusive: bool) -> bool {
        let dt = (b.timestamp - a.timestamp).abs();
        let Some(dist) = distance_between(a, b) else {
            return false;
        };
        if inclusive {
            dt <= self.options.redundancy_window && dist <= self.options.redundancy_distance_km
        } else {
            dt < self.options.redundancy_window && dist < self.options.redundancy_distance_km
        }
    }

    /// Set `attached` on every spot and summarize the resulting path.
    pub fn curate(&self, spots: &mut [Spot]) -> TrackSummary {
        let mut track: Vec<usize> = Vec::new();
        let redundancy = !self.protocol.is_primary_only();

        for i in 0..spots.len() {
            spots[i].attached = false;
            if !self.eligible(&spots[i]) {
                continue;
            }

            if let Some(&last) = track.last() {
                if !self.feasible(&spots[last], &spots[i]) {
                    debug!(timestamp = %spots[i].timestamp, locator = %spots[i].locator, "infeasible fix");
                    continue;
                }
                if redundancy {
                    let (prev, cur) = (&spots[last], &spots[i]);
                    if !cur.is_grid6() && prev.is_grid6() && self.within_redundancy_window(prev, cur, true) {
                        debug!(timestamp = %cur.timestamp, "4-char fix redundant with 6-char fix");
                        continue;
                    }
                    if cur.is_grid6() && !prev.is_grid6() && self.within_redundancy_window(prev, cur, false) {
                        debug!(timestamp = %prev.timestamp, "replacing 4-char fix with 6-char fix");
                        spots[last].attached = false;
                        track.pop();
                    }
                }
            }

            spots[i].attached = true;
            track.push(i);
        }

        self.summarize(spots, &track)
    }

    fn summarize(&self, spots: &[Spot], track: &[usize]) -> TrackSummary {
        let points: Vec<(f64, f64)> = track.iter().filter_map(|&i| spots[i].position()).collect();
        let lons: Vec<f64> = points.iter().map(|p| p.1).collect();
        let first = track.first().map(|&i| &spots[i]);
        let last = track.last().map(|&i| &spots[i]);

        TrackSummary {
            attached: track.len(),
            unattached: spots.len() - track.len(),
            distance_km: track_distance_km(&points, self.options.min_segment_km),
            laps: lap_count(&lons),
            first: first.map(|s| s.timestamp),
            last: last.map(|s| s.timestamp),
            last_altitude_m: last.and_then(|s| s.altitude_m),
            last_speed_kph: last.and_then(|s| s.speed_kph),
            last_voltage: last.and_then(|s| s.voltage),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator;
    use crate::types::RawReport;
    use chrono::TimeZone;

    fn spot(minutes: i64, loc: &str) -> Spot {
        let ts = Utc.with_ymd_and_hms(2025, 7, 13, 0, 0, 0).unwrap() + TimeDelta::minutes(minutes);
        let mut s = Spot::new(RawReport::new(ts, "N0CALL", &loc[..4], 13, vec![]));
        s.locator = loc.to_string();
        let (lat, lon) = locator::to_lat_lon(loc).unwrap();
        s.lat = Some(lat);
        s.lon = Some(lon);
        s
    }

    fn curator() -> TrackCurator {
        TrackCurator::new(Protocol::U4b, TrackOptions::default())
    }

    fn attached(spots: &[Spot]) -> Vec<bool> {
        spots.iter().map(|s| s.attached).collect()
    }

    #[test]
    fn test_haversine_km() {
        // One degree of latitude.
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.1);
        assert_eq!(haversine_km(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn test_infeasible_jump_unattached() {
        // FN31 to JN58 in ten minutes.
        let mut spots = vec![spot(0, "FN31pr"), spot(10, "JN58td"), spot(20, "FN31ps")];
        let summary = curator().curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, false, true]);
        assert_eq!(summary.attached, 2);
        assert_eq!(summary.unattached, 1);
    }

    #[test]
    fn test_boundary_speed_attached() {
        let a = spot(0, "FN31pr");
        let b = spot(180, "FN45aa");
        let speed = curator().implied_speed_kph(&a, &b).unwrap();
        assert!(speed > 0.0);

        let exact = TrackOptions {
            max_speed_kph: speed,
            ..Default::default()
        };
        let mut spots = vec![a.clone(), b.clone()];
        TrackCurator::new(Protocol::U4b, exact).curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, true]);

        let below = TrackOptions {
            max_speed_kph: speed - 1e-6,
            ..Default::default()
        };
        let mut spots = vec![a, b];
        TrackCurator::new(Protocol::U4b, below).curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, false]);
    }

    #[test]
    fn test_elapsed_time_floored_at_one_hour() {
        let c = curator();
        let a = spot(0, "FN31pr");
        let b10 = spot(10, "FN33pr");
        let b60 = spot(60, "FN33pr");
        assert_eq!(c.implied_speed_kph(&a, &b10), c.implied_speed_kph(&a, &b60));
    }

    #[test]
    fn test_invalid_gps_unattached() {
        let mut spots = vec![spot(0, "FN31pr"), spot(10, "FN31ps")];
        spots[1].gps_valid = false;
        curator().curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, false]);
    }

    #[test]
    fn test_unknown_protocol_never_attached() {
        let mut spots = vec![spot(0, "FN31pr")];
        let c = TrackCurator::new(Protocol::Unknown, TrackOptions::default());
        let summary = c.curate(&mut spots);
        assert!(!spots[0].attached);
        assert_eq!(summary.attached, 0);
        assert_eq!(summary.first, None);
    }

    #[test]
    fn test_detach_grid4_option() {
        let mut spots = vec![spot(0, "FN31"), spot(10, "FN31pr")];
        let c = TrackCurator::new(
            Protocol::U4b,
            TrackOptions {
                detach_grid4: true,
                ..Default::default()
            },
        );
        c.curate(&mut spots);
        assert_eq!(attached(&spots), vec![false, true]);
    }

    #[test]
    fn test_grid4_suppressed_near_grid6() {
        let mut spots = vec![spot(0, "FN31pr"), spot(10, "FN31")];
        curator().curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, false]);
    }

    #[test]
    fn test_grid4_kept_after_window() {
        let mut spots = vec![spot(0, "FN31pr"), spot(180, "FN31")];
        curator().curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, true]);
    }

    #[test]
    fn test_grid6_replaces_nearby_grid4() {
        let mut spots = vec![spot(0, "FN31"), spot(10, "FN31pr")];
        let summary = curator().curate(&mut spots);
        assert_eq!(attached(&spots), vec![false, true]);
        assert_eq!(summary.attached, 1);
    }

    #[test]
    fn test_primary_only_skips_redundancy() {
        let mut spots = vec![spot(0, "FN31pr"), spot(10, "FN31")];
        let c = TrackCurator::new(Protocol::Zachtek1, TrackOptions::default());
        c.curate(&mut spots);
        assert_eq!(attached(&spots), vec![true, true]);
    }

    #[test]
    fn test_track_distance_skips_jitter() {
        let points = [(0.0, 0.0), (0.1, 0.0), (0.2, 0.0), (2.0, 0.0), (2.1, 0.0)];
        let d = track_distance_km(&points, 100.0);
        // (0,0)->(2,0) counted, then the final point closes the track.
        let expected = haversine_km(0.0, 0.0, 2.0, 0.0) + haversine_km(2.0, 0.0, 2.1, 0.0);
        assert!((d - expected).abs() < 1e-9);
        assert_eq!(track_distance_km(&[], 100.0), 0.0);
        assert_eq!(track_distance_km(&[(1.0, 1.0)], 100.0), 0.0);
    }

    #[test]
    fn test_lap_count() {
        // Eastbound around the world in 90-degree steps, crossing the
        // antimeridian once.
        let lons = [0.0, 90.0, 179.0, -91.0, -1.0, 89.0];
        assert_eq!(lap_count(&lons), 1);
        assert_eq!(lap_count(&[0.0, 90.0, 170.0]), 0);
        assert_eq!(lap_count(&[]), 0);
        // Westbound never counts.
        assert_eq!(lap_count(&[0.0, -90.0, -179.0, 91.0, 1.0, -89.0]), 0);
    }

    #[test]
    fn test_summary_last_values() {
        let mut spots = vec![spot(0, "FN31pr"), spot(120, "FN42ab")];
        spots[1].altitude_m = Some(12_000.0);
        spots[1].voltage = Some(4.1);
        let summary = curator().curate(&mut spots);
        assert_eq!(summary.last_altitude_m, Some(12_000.0));
        assert_eq!(summary.last_voltage, Some(4.1));
        assert_eq!(summary.duration(), Some(TimeDelta::hours(2)));
        // Under the segment threshold, but the final fix closes the path.
        let (a, b) = (spots[0].position().unwrap(), spots[1].position().unwrap());
        let expected = haversine_km(a.0, a.1, b.0, b.1);
        assert!(expected < MIN_SEGMENT_KM);
        assert!((summary.distance_km - expected).abs() < 1e-9);
    }
}
