//! Import Traquito message definitions.
//!
//! Traquito describes each extended telemetry slot as a list of fields
//! with a value range and step. Every present `slot3MsgDef`..`slot5MsgDef`
//! becomes one `et0:0,s:<k>` decoder whose extractors chain from the
//! preset's implied divisor.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::et_parse::{
    parse_label, parse_unit, Annotations, Decoder, EtSpec, ExtractorTerm, Filter, FilterTerm,
    Preset,
};
use crate::types::{Result, WsprError};

/// Slot indices that may carry Traquito extended messages.
const FIRST_SLOT: usize = 2;
const LAST_SLOT: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    unit: String,
    low_value: f64,
    high_value: f64,
    step_size: f64,
}

impl FieldDef {
    fn modulus(&self) -> Result<u64> {
        let span = (self.high_value - self.low_value) / self.step_size;
        if !span.is_finite() || span < 0.0 || self.step_size <= 0.0 {
            return Err(WsprError::InvalidSpec(format!(
                "field '{}' has an invalid range",
                self.name
            )));
        }
        Ok(span.ceil() as u64 + 1)
    }
}

/// Parse one slot definition: a comma list of field objects, possibly with
/// `//` comments and a trailing comma.
fn parse_slot_def(text: &str) -> Result<Vec<FieldDef>> {
    let stripped: Vec<&str> = text
        .lines()
        .map(|line| line.find("//").map_or(line, |i| &line[..i]))
        .collect();
    let body = stripped.join("\n");
    let body = body.trim_end();
    let body = body.strip_suffix(',').unwrap_or(body);
    serde_json::from_str(&format!("[{body}]"))
        .map_err(|e| WsprError::InvalidSpec(format!("traquito message definition: {e}")))
}

/// Convert a Traquito JSON export into an extended telemetry spec.
pub fn import_json(json: &str) -> Result<EtSpec> {
    let root: Map<String, Value> = serde_json::from_str(json)
        .map_err(|e| WsprError::InvalidSpec(format!("traquito json: {e}")))?;

    let mut decoders = Vec::new();
    let mut labels = Vec::new();
    let mut units = Vec::new();

    for slot in FIRST_SLOT..=LAST_SLOT {
        let key = format!("slot{}MsgDef", slot + 1);
        let Some(def) = root.get(&key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
        else {
            continue;
        };

        let fields = parse_slot_def(def)?;
        let mut extractors = Vec::with_capacity(fields.len());
        for field in &fields {
            extractors.push(ExtractorTerm {
                divisor: None,
                modulus: field.modulus()?,
                offset: field.low_value,
                slope: field.step_size,
            });
            labels.push(parse_label_lenient(&field.name));
            units.push(parse_unit_lenient(&field.unit));
        }

        let filters = vec![
            FilterTerm::Preset(Preset::Et0 { kind: Some(0) }),
            FilterTerm::Filter(Filter::Slot(slot)),
        ];
        decoders.push(Decoder::new(filters, extractors)?);
    }

    if decoders.is_empty() {
        return Err(WsprError::InvalidSpec(
            "no slot3MsgDef..slot5MsgDef definitions found".into(),
        ));
    }

    EtSpec::new(decoders)?.with_annotations(Annotations {
        labels,
        units,
        ..Default::default()
    })
}

fn parse_label_lenient(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    parse_label(name)
        .map_err(|e| debug!(name, error = %e, "dropping label"))
        .ok()
}

fn parse_unit_lenient(unit: &str) -> Option<String> {
    if unit.is_empty() {
        return None;
    }
    parse_unit(unit)
        .map_err(|e| debug!(unit, error = %e, "dropping unit"))
        .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"{
        "slot3MsgDef": "{ \"name\": \"ClockDrift\", \"unit\": \"Count\", \"lowValue\": 0, \"highValue\": 100, \"stepSize\": 1 },\n// comment line\n{ \"name\": \"Temp\", \"unit\": \"C\", \"lowValue\": -50, \"highValue\": 39, \"stepSize\": 1 }, // trailing\n",
        "slot5MsgDef": "{ \"name\": \"Volts\", \"unit\": \"V\", \"lowValue\": 3, \"highValue\": 5, \"stepSize\": 0.5 },"
    }"#;

    #[test]
    fn test_import() {
        let spec = import_json(EXPORT).unwrap();
        assert_eq!(spec.decoders().len(), 2);
        assert_eq!(
            spec.to_string(),
            "et0:0,s:2_101:0:1,90:-50:1~et0:0,s:4_5:3:0.5"
        );
        let d = &spec.decoders()[0];
        assert_eq!(d.extractors()[0].divisor, 320);
        assert_eq!(d.extractors()[1].divisor, 320 * 101);
        assert_eq!(spec.label(0), "ClockDrift");
        assert_eq!(spec.unit(1), Some("C"));
        assert_eq!(spec.label(2), "Volts");
        assert_eq!(spec.channel_count(), 3);
    }

    #[test]
    fn test_import_roundtrips_through_parser() {
        let spec = import_json(EXPORT).unwrap();
        let reparsed = EtSpec::parse(&spec.to_string()).unwrap();
        assert_eq!(reparsed.decoders(), spec.decoders());
    }

    #[test]
    fn test_invalid_unit_dropped() {
        let json = r#"{"slot4MsgDef": "{\"name\": \"Humidity\", \"unit\": \"%\", \"lowValue\": 0, \"highValue\": 100, \"stepSize\": 5}"}"#;
        let spec = import_json(json).unwrap();
        assert_eq!(spec.unit(0), None);
        assert_eq!(spec.label(0), "Humidity");
        assert_eq!(spec.decoders()[0].extractors()[0].modulus, 21);
    }

    #[test]
    fn test_empty_import_fails() {
        assert!(import_json("{}").is_err());
        assert!(import_json("not json").is_err());
        assert!(import_json(r#"{"slot3MsgDef": "{\"lowValue\": 5}"}"#).is_err());
    }

    #[test]
    fn test_bad_range_fails() {
        let json = r#"{"slot3MsgDef": "{\"name\": \"X\", \"lowValue\": 0, \"highValue\": 10, \"stepSize\": 0}"}"#;
        assert!(import_json(json).is_err());
    }
}
