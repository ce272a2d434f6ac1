//! Extended telemetry evaluation.
//!
//! Applies a parsed [`EtSpec`] to the raw extended telemetry integers the
//! payload decoder left on each spot. Channels are laid out flat in
//! decoder order; a decoder that does not match still reserves its
//! channels, so channel `i` means the same thing on every spot.

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::trace;

use crate::et_parse::EtSpec;
use crate::types::{Spot, MAX_SLOTS};

/// Transmission-sequence counter used by temporal filters: one step per
/// 2-minute bucket, restarting each month.
pub fn sequence_counter(timestamp: DateTime<Utc>) -> u64 {
    let day = timestamp.day() as u64 - 1;
    let hour = timestamp.hour() as u64;
    let minute = timestamp.minute() as u64;
    (day * 24 + hour) * 30 + minute / 2
}

/// Evaluates an extended telemetry spec against spots.
#[derive(Debug, Clone)]
pub struct EtEvaluator<'a> {
    spec: &'a EtSpec,
}

impl<'a> EtEvaluator<'a> {
    pub fn new(spec: &'a EtSpec) -> Self {
        EtEvaluator { spec }
    }

    /// Decode every raw integer on `spot` into `spot.et_values`.
    ///
    /// Returns how many raw integers matched a decoder.
    pub fn evaluate(&self, spot: &mut Spot) -> usize {
        let mut values = vec![None; self.spec.channel_count()];
        let sequence = sequence_counter(spot.primary.timestamp);
        let mut decoded = 0;

        for slot in 0..MAX_SLOTS {
            let Some(raw) = spot.raw_et[slot] else {
                continue;
            };
            if self.decode_raw(raw, slot, sequence, &mut values) {
                decoded += 1;
            } else {
                trace!(slot, raw, "no decoder matched");
            }
        }

        spot.et_values = values;
        decoded
    }

    pub fn evaluate_all(&self, spots: &mut [Spot]) -> usize {
        spots.iter_mut().map(|s| self.evaluate(s)).sum()
    }

    /// Try decoders in order; the first whose filters all pass writes its
    /// channels. Returns whether any matched.
    fn decode_raw(&self, raw: u64, slot: usize, sequence: u64, values: &mut [Option<f64>]) -> bool {
        let mut base = 0;
        for decoder in self.spec.decoders() {
            let extractors = decoder.extractors();
            if decoder.matches(raw, slot, sequence) {
                for (k, e) in extractors.iter().enumerate() {
                    values[base + k] = Some(e.value(raw));
                }
                return true;
            }
            base += extractors.len();
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawReport;
    use chrono::TimeZone;

    fn spot_at(day: u32, hour: u32, minute: u32) -> Spot {
        let ts = Utc.with_ymd_and_hms(2025, 7, day, hour, minute, 0).unwrap();
        Spot::new(RawReport::new(ts, "N0CALL", "FN31", 13, vec![]))
    }

    #[test]
    fn test_sequence_counter() {
        let ts = |d, h, m| Utc.with_ymd_and_hms(2025, 7, d, h, m, 0).unwrap();
        assert_eq!(sequence_counter(ts(1, 0, 0)), 0);
        assert_eq!(sequence_counter(ts(1, 0, 1)), 0);
        assert_eq!(sequence_counter(ts(1, 0, 2)), 1);
        assert_eq!(sequence_counter(ts(1, 0, 10)), 5);
        assert_eq!(sequence_counter(ts(1, 1, 0)), 30);
        assert_eq!(sequence_counter(ts(2, 0, 0)), 720);
        assert_eq!(sequence_counter(ts(31, 23, 58)), 30 * 720 + 23 * 30 + 29);
    }

    #[test]
    fn test_second_decoder_offset() {
        // Decoder 0 wants slot 1, decoder 1 wants slot 2.
        let spec = EtSpec::parse("s:1_10:0:1,10:0:1~s:2_10:0:1,10:0:2").unwrap();
        let mut spot = spot_at(13, 12, 0);
        spot.raw_et[2] = Some(57);
        let decoded = EtEvaluator::new(&spec).evaluate(&mut spot);
        assert_eq!(decoded, 1);
        assert_eq!(spot.et_values, vec![None, None, Some(7.0), Some(10.0)]);
    }

    #[test]
    fn test_first_match_wins() {
        let spec = EtSpec::parse("_10:0:1~_10:0:2").unwrap();
        let mut spot = spot_at(13, 12, 0);
        spot.raw_et[1] = Some(3);
        EtEvaluator::new(&spec).evaluate(&mut spot);
        assert_eq!(spot.et_values, vec![Some(3.0), None]);
    }

    #[test]
    fn test_unmatched_raw_leaves_channels_empty() {
        let spec = EtSpec::parse("s:3_10:0:1").unwrap();
        let mut spot = spot_at(13, 12, 0);
        spot.raw_et[1] = Some(5);
        assert_eq!(EtEvaluator::new(&spec).evaluate(&mut spot), 0);
        assert_eq!(spot.et_values, vec![None]);
    }

    #[test]
    fn test_temporal_filter() {
        // Alternate 10-minute cycles (five buckets each) carry decoder 0
        // and decoder 1.
        let spec = EtSpec::parse("t:5:2:0_100:0:1~t:5:2:1_100:0:1").unwrap();
        let eval = EtEvaluator::new(&spec);

        let mut even = spot_at(1, 0, 0);
        even.raw_et[1] = Some(42);
        eval.evaluate(&mut even);
        assert_eq!(even.et_values, vec![Some(42.0), None]);

        let mut odd = spot_at(1, 0, 10);
        odd.raw_et[1] = Some(42);
        eval.evaluate(&mut odd);
        assert_eq!(odd.et_values, vec![None, Some(42.0)]);
    }

    #[test]
    fn test_et0_slot_sentinel() {
        let spec = EtSpec::parse("et0_11:-40:5").unwrap();
        let eval = EtEvaluator::new(&spec);
        let mut spot = spot_at(13, 12, 0);
        // slot digit says 3 but the integer sits in slot 2
        spot.raw_et[2] = Some(4 * 3 + 320 * 4);
        spot.raw_et[3] = Some(4 * 3 + 320 * 4);
        assert_eq!(eval.evaluate(&mut spot), 1);
        assert_eq!(spot.et_values, vec![Some(-20.0)]);
    }

    #[test]
    fn test_evaluate_all_counts() {
        let spec = EtSpec::parse("_10:0:1").unwrap();
        let mut spots = vec![spot_at(13, 12, 0), spot_at(13, 12, 10)];
        spots[0].raw_et[1] = Some(1);
        spots[0].raw_et[2] = Some(2);
        spots[1].raw_et[3] = Some(3);
        assert_eq!(EtEvaluator::new(&spec).evaluate_all(&mut spots), 3);
        // Later slots overwrite the same channel.
        assert_eq!(spots[0].et_values, vec![Some(2.0)]);
        assert!(spots.iter().all(|s| s.et_values.len() == 1));
    }
}
