//! End-to-end reconstruction: matcher, decoder, extended telemetry
//! evaluator, and curator composed for one tracker configuration.
//!
//! Everything that can fail is checked in [`Pipeline::from_config`]; a built
//! pipeline never fails on data, it only marks slots invalid or leaves
//! spots off the track.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::channel::Channel;
use crate::config::TrackerConfig;
use crate::curate::{TrackCurator, TrackOptions, TrackSummary};
use crate::decode::PayloadDecoder;
use crate::et_eval::EtEvaluator;
use crate::et_parse::EtSpec;
use crate::matcher::SlotMatcher;
use crate::protocol::Protocol;
use crate::types::{RawReport, Result, Spot};

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub reports: usize,
    pub spots: usize,
    /// Supplementary reports placed into a spot.
    pub attached_slots: usize,
    /// Occupied slots that failed to decode.
    pub invalid_slots: usize,
    pub et_decoded: usize,
}

/// Output of [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct Reconstruction {
    pub spots: Vec<Spot>,
    pub summary: TrackSummary,
    pub stats: RunStats,
}

impl Reconstruction {
    pub fn attached(&self) -> impl Iterator<Item = &Spot> {
        self.spots.iter().filter(|s| s.attached)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    channel: Channel,
    protocol: Protocol,
    matcher: SlotMatcher,
    decoder: PayloadDecoder,
    et_spec: Option<EtSpec>,
    curator: TrackCurator,
}

impl Pipeline {
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        config.validate()?;
        let channel = Channel::new(&config.band, config.channel)?;
        let protocol = config.protocol;
        let options = TrackOptions {
            max_speed_kph: config.track.max_speed_kph,
            detach_grid4: config.track.detach_grid4,
            ..TrackOptions::default()
        };

        Ok(Pipeline {
            channel,
            protocol,
            matcher: SlotMatcher::new(channel, protocol),
            decoder: PayloadDecoder::new(protocol, channel, config.version)?,
            et_spec: config.telemetry.spec()?,
            curator: TrackCurator::new(protocol, options),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn et_spec(&self) -> Option<&EtSpec> {
        self.et_spec.as_ref()
    }

    /// When new data for this channel is worth fetching: just after the
    /// last slot the protocol uses.
    pub fn next_update_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let last_slot = self.protocol.slot_count().saturating_sub(1);
        self.channel.next_update_at(now, last_slot)
    }

    /// Reconstruct the track from a time-and-callsign sorted report stream.
    pub fn run(&self, reports: &[RawReport]) -> Reconstruction {
        let mut spots = self.matcher.match_reports(reports);
        self.decoder.decode_all(&mut spots);

        let et_decoded = match &self.et_spec {
            Some(spec) => EtEvaluator::new(spec).evaluate_all(&mut spots),
            None => 0,
        };

        let summary = self.curator.curate(&mut spots);

        let stats = RunStats {
            reports: reports.len(),
            spots: spots.len(),
            attached_slots: spots.iter().map(|s| s.slot_count() - 1).sum(),
            invalid_slots: spots
                .iter()
                .map(|s| (0..s.slot_valid.len()).filter(|&k| s.has_slot(k) && !s.slot_valid[k]).count())
                .sum(),
            et_decoded,
        };
        info!(
            reports = stats.reports,
            spots = stats.spots,
            attached = summary.attached,
            invalid_slots = stats.invalid_slots,
            "reconstruction complete"
        );

        Reconstruction {
            spots,
            summary,
            stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
