//! wspr-core: Telemetry reconstruction library for WSPR balloon beacons.
//!
//! No async, no I/O beyond the config file. Reports come
//! in already parsed and sorted; spots come out decoded and curated.

pub mod channel;
pub mod config;
pub mod curate;
pub mod decode;
pub mod et_eval;
pub mod et_parse;
pub mod locator;
pub mod matcher;
pub mod merge;
pub mod pipeline;
pub mod protocol;
pub mod radix;
pub mod traquito;
pub mod types;

// Re-export commonly used types at crate root
pub use channel::Channel;
pub use config::TrackerConfig;
pub use curate::{TrackCurator, TrackSummary};
pub use decode::PayloadDecoder;
pub use et_eval::EtEvaluator;
pub use et_parse::EtSpec;
pub use matcher::SlotMatcher;
pub use merge::merge_reports;
pub use pipeline::{Pipeline, Reconstruction, RunStats};
pub use protocol::Protocol;
pub use types::*;
