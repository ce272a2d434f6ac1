//! wspr.live `JSONCompact` import.
//!
//! Two row shapes come back from the grouped `wspr.rx` queries:
//!
//! ```text
//! [time, tx_loc, power, [[rx_sign, rx_loc, frequency, snr], ...]]            callsign
//! [time, tx_sign, tx_loc, power, [[rx_sign, frequency], ...]]                telemetry
//! ```
//!
//! Callsign rows carry no `tx_sign`; the tracked callsign is filled in.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use wspr_core::merge::sort_and_dedup;
use wspr_core::types::{RawReport, Reception};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct CompactDocument {
    data: Vec<Vec<Value>>,
}

/// Parse a `JSONCompact` document into a sorted, de-duplicated report list.
pub fn parse_compact(json: &str, callsign: &str) -> Result<Vec<RawReport>> {
    let doc: CompactDocument =
        serde_json::from_str(json).context("not a wspr.live JSONCompact document")?;
    let mut reports = doc
        .data
        .iter()
        .enumerate()
        .map(|(i, row)| parse_row(row, callsign).with_context(|| format!("row {i}")))
        .collect::<Result<Vec<_>>>()?;
    sort_and_dedup(&mut reports);
    Ok(reports)
}

fn parse_row(row: &[Value], callsign: &str) -> Result<RawReport> {
    let (sign, rest) = match row.len() {
        4 => {
            if callsign.is_empty() {
                bail!("callsign row but no callsign configured");
            }
            (callsign.to_string(), &row[1..])
        }
        5 => (string(&row[1])?, &row[2..]),
        n => bail!("expected 4 or 5 columns, got {n}"),
    };

    let timestamp = parse_time(&string(&row[0])?)?;
    let locator = string(&rest[0])?;
    let power = rest[1]
        .as_u64()
        .and_then(|p| u8::try_from(p).ok())
        .context("power is not a small integer")?;
    let receptions = rest[2]
        .as_array()
        .context("receptions are not an array")?
        .iter()
        .map(parse_reception)
        .collect::<Result<Vec<_>>>()?;

    Ok(RawReport::new(timestamp, &sign, &locator, power, receptions))
}

fn parse_reception(value: &Value) -> Result<Reception> {
    let fields = value.as_array().context("reception is not a tuple")?;
    let (receiver, locator, freq, snr) = match fields.as_slice() {
        [rx, freq] => (rx, None, freq, None),
        [rx, loc, freq, snr] => (rx, Some(loc), freq, Some(snr)),
        _ => bail!("reception has {} fields", fields.len()),
    };
    let locator = locator.map(string).transpose()?.unwrap_or_default();
    let frequency_hz = freq.as_u64().context("frequency is not an integer")?;
    let snr_db = snr
        .and_then(Value::as_i64)
        .and_then(|s| i32::try_from(s).ok())
        .unwrap_or(0);
    Ok(Reception::new(&string(receiver)?, &locator, frequency_hz, snr_db))
}

fn string(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("expected string, got {value}"))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .with_context(|| format!("bad timestamp '{text}'"))?;
    Ok(naive.and_utc())
}
