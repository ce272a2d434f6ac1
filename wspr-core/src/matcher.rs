//! Slot matching.
//!
//! Groups a merged, time-sorted report stream into multi-slot [`Spot`]s.
//! Each report's slot index comes from its minute relative to the channel's
//! base minute; slot 0 opens a new spot and later slots join the current
//! one when they fall inside its cycle and pass the protocol's correlation
//! rule. The pass is a fold over an explicit accumulator, so the same input
//! always produces the same spots.

use chrono::TimeDelta;
use tracing::{debug, trace};

use crate::channel::{Channel, CYCLE_MINUTES};
use crate::locator;
use crate::protocol::{Correlation, Protocol, CORRELATION_TOLERANCE_HZ};
use crate::types::{RawReport, Reception, Spot};

/// Whether two reception lists share a receiver that heard both within
/// the correlation tolerance.
///
/// Both lists must be sorted by receiver; the test is a merge join.
pub fn co_received(a: &[Reception], b: &[Reception]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (ra, rb) = (&a[i], &b[j]);
        match ra.receiver.cmp(&rb.receiver) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if ra.frequency_hz.abs_diff(rb.frequency_hz) <= CORRELATION_TOLERANCE_HZ {
                    return true;
                }
                i += 1;
                j += 1;
            }
        }
    }
    false
}

/// Why a supplementary report was not attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoCurrentSpot,
    OutsideCycle,
    SlotUnused,
    SlotFilled,
    Uncorrelated,
    DuplicatePrimary,
}

/// Assigns reports to spots for one channel and protocol.
#[derive(Debug, Clone, Copy)]
pub struct SlotMatcher {
    channel: Channel,
    protocol: Protocol,
}

impl SlotMatcher {
    pub fn new(channel: Channel, protocol: Protocol) -> Self {
        SlotMatcher { channel, protocol }
    }

    /// Build spots from a sorted report stream.
    pub fn match_reports(&self, reports: &[RawReport]) -> Vec<Spot> {
        reports.iter().fold(Vec::new(), |mut spots, report| {
            if let Err(reason) = self.accept(&mut spots, report) {
                debug!(
                    callsign = %report.callsign,
                    timestamp = %report.timestamp,
                    ?reason,
                    "dropped report"
                );
            }
            spots
        })
    }

    /// Fold step: attach `report` to the last spot or open a new one.
    fn accept(&self, spots: &mut Vec<Spot>, report: &RawReport) -> Result<(), DropReason> {
        if self.protocol.correlation() == Correlation::Passthrough {
            spots.push(Spot::new(report.clone()));
            return Ok(());
        }

        let slot = self.channel.slot_of(report.timestamp);
        if slot == 0 {
            if let Some(current) = spots.last() {
                if current.primary.timestamp == report.timestamp {
                    return Err(DropReason::DuplicatePrimary);
                }
            }
            trace!(timestamp = %report.timestamp, "new spot");
            spots.push(Spot::new(report.clone()));
            return Ok(());
        }

        let current = spots.last_mut().ok_or(DropReason::NoCurrentSpot)?;
        self.attach(current, slot, report)
    }

    fn attach(&self, spot: &mut Spot, slot: usize, report: &RawReport) -> Result<(), DropReason> {
        let dt = report.timestamp - spot.primary.timestamp;
        if dt <= TimeDelta::zero() || dt >= TimeDelta::minutes(CYCLE_MINUTES as i64) {
            return Err(DropReason::OutsideCycle);
        }
        if slot >= self.protocol.slot_count() {
            return Err(DropReason::SlotUnused);
        }
        if spot.has_slot(slot) {
            return Err(DropReason::SlotFilled);
        }
        if !self.correlates(spot, slot, report) {
            return Err(DropReason::Uncorrelated);
        }
        spot.set_slot(slot, report.clone());
        trace!(slot, callsign = %report.callsign, "attached slot");
        Ok(())
    }

    fn correlates(&self, spot: &Spot, slot: usize, report: &RawReport) -> bool {
        match self.protocol.correlation() {
            Correlation::Passthrough => false,
            Correlation::Always => true,
            Correlation::SameLocator => {
                let primary = locator::square(&spot.primary.locator);
                primary.is_some() && primary == locator::square(&report.locator)
            }
            Correlation::CoReception => (0..slot)
                .rev()
                .filter_map(|k| spot.slot(k))
                .any(|lower| co_received(&lower.receptions, &report.receptions)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
