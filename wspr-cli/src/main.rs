//! wspr: CLI for reconstructing WSPR balloon tracks from report files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use wspr_core::config::{self, TrackerConfig};
use wspr_core::et_parse::{AnnotationText, EtSpec};
use wspr_core::merge::{merge_reports, sort_and_dedup};
use wspr_core::pipeline::{Pipeline, Reconstruction};
use wspr_core::protocol::Protocol;
use wspr_core::traquito;
use wspr_core::types::{RawReport, Spot};

mod feed;

#[derive(Parser)]
#[command(name = "wspr", about = "WSPR balloon telemetry decoder and tracker")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
struct CommonArgs {
    /// Config file (default: ~/.wspr-track/config.toml)
    #[arg(long, global = true, env = "WSPR_TRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Tracked callsign
    #[arg(long, global = true)]
    callsign: Option<String>,

    /// Band name, e.g. 20m
    #[arg(long, global = true)]
    band: Option<String>,

    /// U4B channel, 0..=599
    #[arg(long, global = true)]
    channel: Option<u16>,

    /// Protocol: unknown, u4b, generic, zachtek1, zachtek2, wb8elk
    #[arg(long, global = true)]
    protocol: Option<Protocol>,

    /// Declared U4B protocol version
    #[arg(long, global = true)]
    version: Option<u8>,

    /// Extended telemetry decoder spec
    #[arg(long, global = true)]
    et: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a report file and print the reconstructed track
    Decode {
        /// JSON report file ("-" for stdin)
        file: PathBuf,

        /// Input is a wspr.live JSONCompact document
        #[arg(long)]
        wspr_live: bool,

        /// Print spots and summary as JSON
        #[arg(long)]
        json: bool,

        /// Include spots left off the track
        #[arg(long)]
        all: bool,

        /// Feet, mph and Fahrenheit
        #[arg(long)]
        imperial: bool,
    },

    /// Merge two report files; entries in NEW win on equal keys
    Merge { old: PathBuf, new: PathBuf },

    /// Validate an extended telemetry spec and show its channels
    Et {
        decoders: String,

        #[arg(long)]
        labels: Option<String>,

        #[arg(long)]
        long_labels: Option<String>,

        #[arg(long)]
        units: Option<String>,

        #[arg(long)]
        resolutions: Option<String>,
    },

    /// Convert a Traquito JSON export to a decoder spec
    EtImport { file: PathBuf },

    /// Show channel timing, telemetry callsign pattern and frequencies
    Channel,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let common = cli.common;
    match cli.command {
        Commands::Decode {
            file,
            wspr_live,
            json,
            all,
            imperial,
        } => cmd_decode(&common, &file, wspr_live, json, all, imperial),
        Commands::Merge { old, new } => cmd_merge(&old, &new),
        Commands::Et {
            decoders,
            labels,
            long_labels,
            units,
            resolutions,
        } => cmd_et(
            &decoders,
            AnnotationText {
                labels: labels.as_deref(),
                long_labels: long_labels.as_deref(),
                units: units.as_deref(),
                resolutions: resolutions.as_deref(),
            },
        ),
        Commands::EtImport { file } => cmd_et_import(&file),
        Commands::Channel => cmd_channel(&common),
        Commands::Config { init } => cmd_config(&common, init),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn config_path(common: &CommonArgs) -> PathBuf {
    common.config.clone().unwrap_or_else(config::config_file)
}

/// File values, then command-line overrides.
fn effective_config(common: &CommonArgs) -> Result<TrackerConfig> {
    let mut cfg = match &common.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config(),
    };
    apply_overrides(common, &mut cfg);
    Ok(cfg)
}

fn apply_overrides(common: &CommonArgs, cfg: &mut TrackerConfig) {
    if let Some(callsign) = &common.callsign {
        cfg.callsign = callsign.to_uppercase();
    }
    if let Some(band) = &common.band {
        cfg.band = band.clone();
    }
    if let Some(channel) = common.channel {
        cfg.channel = channel;
    }
    if let Some(protocol) = common.protocol {
        cfg.protocol = protocol;
    }
    if common.version.is_some() {
        cfg.version = common.version;
    }
    if let Some(et) = &common.et {
        cfg.telemetry.decoders = Some(et.clone());
    }
    debug!(?cfg, "effective configuration");
}

// ---------------------------------------------------------------------------
// Report files
// ---------------------------------------------------------------------------

fn read_input(path: &Path) -> Result<String> {
    if path.to_str() == Some("-") {
        return std::io::read_to_string(std::io::stdin()).context("reading stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("opening {}", path.display()))
}

fn load_reports(path: &Path, wspr_live: bool, callsign: &str) -> Result<Vec<RawReport>> {
    let text = read_input(path)?;
    if wspr_live {
        return feed::parse_compact(&text, callsign);
    }
    let mut reports: Vec<RawReport> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    for r in &mut reports {
        r.sort_receptions();
    }
    sort_and_dedup(&mut reports);
    Ok(reports)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_decode(
    common: &CommonArgs,
    file: &Path,
    wspr_live: bool,
    json: bool,
    all: bool,
    imperial: bool,
) -> Result<()> {
    let cfg = effective_config(common)?;
    let pipeline = Pipeline::from_config(&cfg)?;
    let reports = load_reports(file, wspr_live, &cfg.callsign)?;
    let mut result = pipeline.run(&reports);

    if !all {
        result.spots.retain(|s| s.attached);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_spots(&result.spots, pipeline.et_spec(), imperial);
    print_synopsis(&result, imperial);
    Ok(())
}

fn cmd_merge(old: &Path, new: &Path) -> Result<()> {
    let old = load_reports(old, false, "")?;
    let new = load_reports(new, false, "")?;
    let merged = merge_reports(&old, &new);
    println!("{}", serde_json::to_string_pretty(&merged)?);
    Ok(())
}

fn cmd_et(decoders: &str, annotations: AnnotationText<'_>) -> Result<()> {
    let spec = EtSpec::parse_annotated(decoders, annotations)?;
    print_spec(&spec);
    Ok(())
}

fn cmd_et_import(file: &Path) -> Result<()> {
    let json = read_input(file)?;
    let spec = traquito::import_json(&json)?;
    print_spec(&spec);
    Ok(())
}

fn cmd_channel(common: &CommonArgs) -> Result<()> {
    let cfg = effective_config(common)?;
    let pipeline = Pipeline::from_config(&cfg)?;
    let channel = pipeline.channel();
    let protocol = pipeline.protocol();
    let (lo, hi) = channel.frequency_window();

    println!();
    println!("Band {} channel {} ({protocol})", channel.band().name, channel.number());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Slot", "Minute"]);
    for slot in 0..protocol.slot_count() {
        table.add_row(vec![
            Cell::new(slot),
            Cell::new(format!(":{:02}", channel.slot_minute(slot))),
        ]);
    }
    println!("{table}");
    println!();
    println!("  Telemetry callsign:  {}", channel.telemetry_pattern());
    println!("  Lane:                {:?} ({lo} - {hi} Hz)", channel.lane());
    println!(
        "  Next update:         {}",
        pipeline.next_update_at(Utc::now()).format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    Ok(())
}

fn cmd_config(common: &CommonArgs, init: bool) -> Result<()> {
    let path = config_path(common);
    let cfg = if init && !path.exists() {
        let mut cfg = TrackerConfig::default();
        apply_overrides(common, &mut cfg);
        cfg
    } else {
        effective_config(common)?
    };
    cfg.validate()?;

    if init {
        config::save_config_to(&cfg, &path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", config::serialize_config(&cfg)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn dash() -> String {
    "-".into()
}

fn print_spots(spots: &[Spot], spec: Option<&EtSpec>, imperial: bool) {
    if spots.is_empty() {
        println!("No spots.");
        return;
    }

    let (alt_unit, speed_unit, temp_unit) = if imperial {
        ("ft", "mph", "F")
    } else {
        ("m", "km/h", "C")
    };
    let mut header = vec![
        "Time (UTC)".to_string(),
        "Grid".into(),
        "Lat".into(),
        "Lon".into(),
        format!("Alt ({alt_unit})"),
        format!("Speed ({speed_unit})"),
        "Volts".into(),
        format!("Temp ({temp_unit})"),
        "GPS".into(),
        "Slots".into(),
    ];
    let channels = spec.map_or(0, EtSpec::channel_count);
    if let Some(spec) = spec {
        header.extend((0..channels).map(|i| spec.header(i)));
    }

    let mut table = Table::new();
    table.set_header(header);

    for spot in spots {
        let mut row = vec![
            Cell::new(spot.timestamp.format("%Y-%m-%d %H:%M")),
            Cell::new(&spot.locator),
            Cell::new(spot.lat.map(|l| format!("{l:.4}")).unwrap_or_else(dash)),
            Cell::new(spot.lon.map(|l| format!("{l:.4}")).unwrap_or_else(dash)),
            Cell::new(
                spot.altitude_m
                    .map(|a| format!("{:.0}", altitude(a, imperial)))
                    .unwrap_or_else(dash),
            ),
            Cell::new(
                spot.speed_kph
                    .map(|s| format!("{:.0}", speed(s, imperial)))
                    .unwrap_or_else(dash),
            ),
            Cell::new(spot.voltage.map(|v| format!("{v:.2}")).unwrap_or_else(dash)),
            Cell::new(
                spot.temperature_c
                    .map(|t| format!("{:.0}", temperature(t, imperial)))
                    .unwrap_or_else(dash),
            ),
            Cell::new(if spot.gps_valid { "ok" } else { "no" }),
            Cell::new(slot_map(spot)),
        ];
        if let Some(spec) = spec {
            row.extend((0..channels).map(|i| {
                let value = spot.et_values.get(i).copied().flatten();
                Cell::new(value.map(|v| spec.format_value(i, v)).unwrap_or_else(dash))
            }));
        }
        table.add_row(row);
    }

    println!("{table}");
}

/// One character per slot: `+` decoded, `!` invalid, `.` empty.
fn slot_map(spot: &Spot) -> String {
    (0..spot.slot_valid.len())
        .map(|k| match (spot.has_slot(k), spot.slot_valid[k]) {
            (false, _) => '.',
            (true, true) => '+',
            (true, false) => '!',
        })
        .collect()
}

fn print_synopsis(result: &Reconstruction, imperial: bool) {
    let stats = &result.stats;
    let summary = &result.summary;
    let (dist_unit, alt_unit, speed_unit) = if imperial {
        ("mi", "ft", "mph")
    } else {
        ("km", "m", "km/h")
    };

    println!();
    println!(
        "Reports: {} read, {} spots, {} slots attached, {} invalid",
        stats.reports, stats.spots, stats.attached_slots, stats.invalid_slots
    );
    println!(
        "Track:   {} attached, {} unattached, {:.0} {dist_unit}, {} laps",
        summary.attached,
        summary.unattached,
        speed(summary.distance_km, imperial),
        summary.laps
    );
    if let (Some(first), Some(duration)) = (summary.first, summary.duration()) {
        println!(
            "Span:    since {} ({}d {}h)",
            first.format("%Y-%m-%d %H:%M"),
            duration.num_days(),
            duration.num_hours() % 24
        );
    }
    if let Some(a) = summary.last_altitude_m {
        println!("Last:    altitude {:.0} {alt_unit}", altitude(a, imperial));
    }
    if let Some(s) = summary.last_speed_kph {
        println!("         speed {:.0} {speed_unit}", speed(s, imperial));
    }
    if let Some(v) = summary.last_voltage {
        println!("         voltage {v:.2} V");
    }
    if stats.et_decoded > 0 {
        println!("Extended telemetry: {} messages decoded", stats.et_decoded);
    }
    println!();
}

fn print_spec(spec: &EtSpec) {
    println!();
    println!("Decoders:     {spec}");
    let ann = spec.annotations();
    for (name, text) in [
        ("Labels", ann.labels_text()),
        ("Long labels", ann.long_labels_text()),
        ("Units", ann.units_text()),
        ("Resolutions", ann.resolutions_text()),
    ] {
        if let Some(text) = text {
            println!("{:<13} {text}", format!("{name}:"));
        }
    }
    println!();

    let mut table = Table::new();
    table.set_header(vec![
        "#", "Decoder", "Label", "Long label", "Unit", "Res", "Divisor", "Modulus", "Offset",
        "Slope",
    ]);
    let mut channel = 0;
    for (d, decoder) in spec.decoders().iter().enumerate() {
        for e in decoder.extractors() {
            table.add_row(vec![
                Cell::new(channel),
                Cell::new(d),
                Cell::new(spec.label(channel)),
                Cell::new(spec.long_label(channel)),
                Cell::new(spec.unit(channel).unwrap_or("-")),
                Cell::new(spec.resolution(channel)),
                Cell::new(e.divisor),
                Cell::new(e.modulus),
                Cell::new(e.offset),
                Cell::new(e.slope),
            ]);
            channel += 1;
        }
    }
    println!("{table}");
}

fn altitude(m: f64, imperial: bool) -> f64 {
    if imperial {
        m * 3.28084
    } else {
        m
    }
}

/// Also used for distances: km to mi.
fn speed(kph: f64, imperial: bool) -> f64 {
    if imperial {
        kph * 0.621371
    } else {
        kph
    }
}

fn temperature(c: f64, imperial: bool) -> f64 {
    if imperial {
        c * 9.0 / 5.0 + 32.0
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "wspr", "decode", "reports.json", "--band", "10m", "--channel", "42", "--protocol",
            "zachtek2", "-vv", "--all",
        ])
        .unwrap();
        assert_eq!(cli.common.band.as_deref(), Some("10m"));
        assert_eq!(cli.common.channel, Some(42));
        assert_eq!(cli.common.protocol, Some(Protocol::Zachtek2));
        assert_eq!(cli.common.verbose, 2);
        assert!(matches!(cli.command, Commands::Decode { all: true, .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_protocol() {
        assert!(Cli::try_parse_from(["wspr", "channel", "--protocol", "morse"]).is_err());
    }

    #[test]
    fn test_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "band = \"40m\"\nchannel = 5\n").unwrap();

        let common = CommonArgs {
            config: Some(path),
            channel: Some(9),
            callsign: Some("k1abc".into()),
            ..Default::default()
        };
        let cfg = effective_config(&common).unwrap();
        assert_eq!(cfg.band, "40m");
        assert_eq!(cfg.channel, 9);
        assert_eq!(cfg.callsign, "K1ABC");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let common = CommonArgs {
            config: Some(PathBuf::from("/nonexistent/wspr/config.toml")),
            ..Default::default()
        };
        assert!(effective_config(&common).is_err());
    }

    #[test]
    fn test_load_reports_sorts_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        let ts = |m| Utc.with_ymd_and_hms(2025, 7, 13, 12, m, 0).unwrap();
        let reports = vec![
            RawReport::new(ts(2), "0A1BCD", "AA06", 0, vec![]),
            RawReport::new(ts(0), "N0CALL", "FN31", 13, vec![]),
            RawReport::new(ts(0), "N0CALL", "FN32", 13, vec![]),
        ];
        std::fs::write(&path, serde_json::to_string(&reports).unwrap()).unwrap();

        let loaded = load_reports(&path, false, "").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].locator, "FN32");
        assert_eq!(loaded[1].callsign, "0A1BCD");
    }

    #[test]
    fn test_slot_map() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 13, 12, 0, 0).unwrap();
        let mut spot = Spot::new(RawReport::new(ts, "N0CALL", "FN31", 13, vec![]));
        spot.set_slot(1, RawReport::new(ts, "0A1BCD", "AA06", 0, vec![]));
        spot.set_slot(3, RawReport::new(ts, "0A1BCE", "AA06", 0, vec![]));
        spot.slot_valid[3] = false;
        assert_eq!(slot_map(&spot), "++.!.");
    }

    #[test]
    fn test_unit_conversions() {
        assert!((altitude(1000.0, true) - 3280.84).abs() < 1e-6);
        assert!((temperature(100.0, true) - 212.0).abs() < 1e-9);
        assert_eq!(speed(50.0, false), 50.0);
    }
}
