//! Extended telemetry specification language.
//!
//! A spec is a list of decoders separated by `~`. Each decoder is
//! `filters_extractors`; filters and extractors are comma lists of
//! colon-separated fields:
//!
//! ```text
//! s:3                    slot filter
//! 4:5:s                  value filter, digit must equal the slot index
//! t:6:144:0              temporal filter on the cycle counter
//! et0[:k] / et3          preset filter triples
//! 320:11:-40:5           extractor (divisor:modulus:offset:slope)
//! 11:-40:5               extractor with the divisor implied by the chain
//! ```
//!
//! Parsing produces a typed AST. Presets and implied divisors are kept in
//! source form next to their expansion so a parsed spec serializes back to
//! the text it came from. Any malformed token rejects the whole spec.

use std::fmt;
use std::str::FromStr;

use crate::radix::{Extractor, RAW_CEILING};
use crate::types::{Result, MAX_SLOTS, WsprError};

/// Characters allowed in a spec string after lowercasing.
fn is_spec_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, 'e' | 't' | 's' | ',' | ':' | '_' | '~' | '.' | '-')
}

const MAX_LABEL_LEN: usize = 32;
const MAX_LONG_LABEL_LEN: usize = 64;
const MAX_UNIT_LEN: usize = 8;
const MAX_RESOLUTION: u8 = 6;

/// Number of distinct `et0` message types.
const ET0_TYPES: u64 = 16;

fn invalid(msg: impl Into<String>) -> WsprError {
    WsprError::InvalidSpec(msg.into())
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Value a filter digit must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Value(u64),
    /// The index of the slot the raw integer came from.
    SlotIndex,
}

/// `floor(x / divisor) mod modulus == expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitTest {
    pub divisor: u64,
    pub modulus: u64,
    pub expected: Expected,
}

impl DigitTest {
    pub const fn new(divisor: u64, modulus: u64, expected: Expected) -> Self {
        DigitTest {
            divisor,
            modulus,
            expected,
        }
    }

    pub fn matches(&self, x: u64, slot: usize) -> bool {
        let digit = (x / self.divisor) % self.modulus;
        match self.expected {
            Expected::Value(v) => digit == v,
            Expected::SlotIndex => digit == slot as u64,
        }
    }

    fn validate(&self) -> Result<()> {
        check_radix(self.divisor, self.modulus)?;
        if let Expected::Value(v) = self.expected {
            if v >= self.modulus {
                return Err(invalid(format!(
                    "filter value {v} must be less than modulus {}",
                    self.modulus
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Raw integer must come from this slot.
    Slot(usize),
    /// Test on the transmission sequence counter.
    Temporal(DigitTest),
    /// Test on the raw integer itself.
    Value(DigitTest),
}

impl Filter {
    pub fn matches(&self, raw: u64, slot: usize, sequence: u64) -> bool {
        match self {
            Filter::Slot(s) => *s == slot,
            Filter::Temporal(t) => t.matches(sequence, slot),
            Filter::Value(t) => t.matches(raw, slot),
        }
    }
}

/// Shorthand filter triples for common vendor conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Traquito-style extended message. `kind` is the message type, written
    /// explicitly when present in the source.
    Et0 { kind: Option<u64> },
    /// Slot-2 extended message with the two low bits set.
    Et3,
}

impl Preset {
    pub fn expand(&self) -> [Filter; 3] {
        match *self {
            Preset::Et0 { kind } => [
                Filter::Value(DigitTest::new(1, 4, Expected::Value(0))),
                Filter::Value(DigitTest::new(4, 5, Expected::SlotIndex)),
                Filter::Value(DigitTest::new(20, 16, Expected::Value(kind.unwrap_or(0)))),
            ],
            Preset::Et3 => [
                Filter::Slot(2),
                Filter::Value(DigitTest::new(1, 2, Expected::Value(1))),
                Filter::Value(DigitTest::new(2, 2, Expected::Value(1))),
            ],
        }
    }

    /// Divisor of the first extractor when it is left implicit.
    pub fn implied_divisor(&self) -> u64 {
        match self {
            Preset::Et0 { .. } => 320,
            Preset::Et3 => 4,
        }
    }
}

/// A filter as written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTerm {
    Filter(Filter),
    Preset(Preset),
}

/// An extractor as written in the source. `divisor` is `None` when implied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorTerm {
    pub divisor: Option<u64>,
    pub modulus: u64,
    pub offset: f64,
    pub slope: f64,
}

/// One (filters, extractors) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoder {
    terms: Vec<FilterTerm>,
    extractor_terms: Vec<ExtractorTerm>,
    filters: Vec<Filter>,
    extractors: Vec<Extractor>,
}

impl Decoder {
    /// Validate terms, expand presets and resolve implied divisors.
    pub fn new(terms: Vec<FilterTerm>, extractor_terms: Vec<ExtractorTerm>) -> Result<Self> {
        let mut preset = None;
        let mut filters = Vec::new();
        for term in &terms {
            match term {
                FilterTerm::Preset(p) => {
                    if preset.replace(*p).is_some() {
                        return Err(invalid("at most one preset filter per decoder"));
                    }
                    if let Preset::Et0 { kind: Some(k) } = p {
                        if *k >= ET0_TYPES {
                            return Err(invalid(format!("et0 type {k} out of range")));
                        }
                    }
                    filters.extend(p.expand());
                }
                FilterTerm::Filter(f) => {
                    match f {
                        Filter::Slot(s) if *s >= MAX_SLOTS => {
                            return Err(invalid(format!("slot {s} out of range")));
                        }
                        Filter::Slot(_) => {}
                        Filter::Temporal(t) | Filter::Value(t) => t.validate()?,
                    }
                    filters.push(*f);
                }
            }
        }

        if extractor_terms.is_empty() {
            return Err(invalid("decoder has no extractors"));
        }
        let mut next_divisor = preset.map_or(1, |p| p.implied_divisor());
        let mut extractors = Vec::with_capacity(extractor_terms.len());
        for e in &extractor_terms {
            let divisor = e.divisor.unwrap_or(next_divisor);
            check_radix(divisor, e.modulus)?;
            if !e.offset.is_finite() || !e.slope.is_finite() {
                return Err(invalid("extractor offset and slope must be finite"));
            }
            let extractor = Extractor::new(divisor, e.modulus, e.offset, e.slope);
            next_divisor = extractor.next_divisor();
            extractors.push(extractor);
        }

        Ok(Decoder {
            terms,
            extractor_terms,
            filters,
            extractors,
        })
    }

    /// Filters after preset expansion.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Extractors with every divisor resolved.
    pub fn extractors(&self) -> &[Extractor] {
        &self.extractors
    }

    pub fn matches(&self, raw: u64, slot: usize, sequence: u64) -> bool {
        self.filters.iter().all(|f| f.matches(raw, slot, sequence))
    }
}

fn check_radix(divisor: u64, modulus: u64) -> Result<()> {
    if divisor < 1 {
        return Err(invalid("divisor must be >= 1"));
    }
    if modulus < 2 {
        return Err(invalid("modulus must be >= 2"));
    }
    match divisor.checked_mul(modulus) {
        Some(p) if p <= RAW_CEILING => Ok(()),
        _ => Err(invalid(format!("{divisor}*{modulus} exceeds {RAW_CEILING}"))),
    }
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// Optional per-channel display metadata, indexed by cumulative extractor
/// order across all decoders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub labels: Vec<Option<String>>,
    pub long_labels: Vec<Option<String>>,
    pub units: Vec<Option<String>>,
    pub resolutions: Vec<Option<u8>>,
}

/// Raw annotation strings as they appear in configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationText<'a> {
    pub labels: Option<&'a str>,
    pub long_labels: Option<&'a str>,
    pub units: Option<&'a str>,
    pub resolutions: Option<&'a str>,
}

fn split_list<T>(
    text: Option<&str>,
    what: &str,
    parse: impl Fn(&str) -> Result<T>,
) -> Result<Vec<Option<T>>> {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return Ok(Vec::new());
    };
    text.split(',')
        .map(|item| {
            if item.is_empty() {
                Ok(None)
            } else {
                parse(item).map(Some).map_err(|e| match e {
                    WsprError::InvalidSpec(msg) => invalid(format!("{what}: {msg}")),
                    other => other,
                })
            }
        })
        .collect()
}

pub(crate) fn parse_label(item: &str) -> Result<String> {
    check_label(item, MAX_LABEL_LEN)
}

fn check_label(item: &str, max: usize) -> Result<String> {
    if item.chars().count() > max {
        return Err(invalid(format!("'{item}' longer than {max}")));
    }
    if !item.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '#' | '_')) {
        return Err(invalid(format!("'{item}' has characters outside [0-9A-Za-z #_]")));
    }
    Ok(item.to_string())
}

pub(crate) fn parse_unit(item: &str) -> Result<String> {
    if item.chars().count() > MAX_UNIT_LEN {
        return Err(invalid(format!("'{item}' longer than {MAX_UNIT_LEN}")));
    }
    if !item.chars().all(|c| c.is_ascii_alphabetic() || matches!(c, ' ' | '/' | '°')) {
        return Err(invalid(format!("'{item}' has characters outside [A-Za-z /°]")));
    }
    Ok(item.to_string())
}

fn parse_resolution(item: &str) -> Result<u8> {
    match item.parse::<u8>() {
        Ok(r) if r <= MAX_RESOLUTION => Ok(r),
        _ => Err(invalid(format!("'{item}' is not an integer in 0..={MAX_RESOLUTION}"))),
    }
}

impl Annotations {
    pub fn parse(text: AnnotationText<'_>) -> Result<Self> {
        Ok(Annotations {
            labels: split_list(text.labels, "labels", parse_label)?,
            long_labels: split_list(text.long_labels, "long labels", |s| {
                check_label(s, MAX_LONG_LABEL_LEN)
            })?,
            units: split_list(text.units, "units", parse_unit)?,
            resolutions: split_list(text.resolutions, "resolutions", parse_resolution)?,
        })
    }

    fn longest(&self) -> usize {
        [
            self.labels.len(),
            self.long_labels.len(),
            self.units.len(),
            self.resolutions.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn join<T: fmt::Display>(items: &[Option<T>]) -> Option<String> {
        if items.iter().all(|i| i.is_none()) {
            return None;
        }
        Some(
            items
                .iter()
                .map(|i| i.as_ref().map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn labels_text(&self) -> Option<String> {
        Self::join(&self.labels)
    }

    pub fn long_labels_text(&self) -> Option<String> {
        Self::join(&self.long_labels)
    }

    pub fn units_text(&self) -> Option<String> {
        Self::join(&self.units)
    }

    /// Zero resolutions are written as empty entries.
    pub fn resolutions_text(&self) -> Option<String> {
        let nonzero: Vec<Option<u8>> = self
            .resolutions
            .iter()
            .map(|r| r.filter(|&v| v != 0))
            .collect();
        Self::join(&nonzero)
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// A parsed extended telemetry specification.
#[derive(Debug, Clone, PartialEq)]
pub struct EtSpec {
    decoders: Vec<Decoder>,
    annotations: Annotations,
}

impl EtSpec {
    pub fn new(decoders: Vec<Decoder>) -> Result<Self> {
        if decoders.is_empty() {
            return Err(invalid("no decoders"));
        }
        Ok(EtSpec {
            decoders,
            annotations: Annotations::default(),
        })
    }

    /// Parse a spec string with no annotations.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim().to_ascii_lowercase();
        if text.is_empty() {
            return Err(invalid("empty spec"));
        }
        if let Some(c) = text.chars().find(|&c| !is_spec_char(c)) {
            return Err(invalid(format!("unexpected character '{c}'")));
        }
        let decoders = text
            .split('~')
            .map(parse_decoder)
            .collect::<Result<Vec<_>>>()?;
        EtSpec::new(decoders)
    }

    /// Parse a spec string together with its annotation side channels.
    pub fn parse_annotated(text: &str, annotations: AnnotationText<'_>) -> Result<Self> {
        EtSpec::parse(text)?.with_annotations(Annotations::parse(annotations)?)
    }

    /// Attach annotations. Fails if any list is longer than the number of
    /// channels.
    pub fn with_annotations(mut self, annotations: Annotations) -> Result<Self> {
        let channels = self.channel_count();
        if annotations.longest() > channels {
            return Err(invalid(format!(
                "{} annotation entries for {channels} channels",
                annotations.longest()
            )));
        }
        self.annotations = annotations;
        Ok(self)
    }

    pub fn decoders(&self) -> &[Decoder] {
        &self.decoders
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Total number of output channels.
    pub fn channel_count(&self) -> usize {
        self.decoders.iter().map(|d| d.extractors.len()).sum()
    }

    // -- display helpers --

    pub fn label(&self, channel: usize) -> String {
        match self.annotations.labels.get(channel) {
            Some(Some(l)) => l.clone(),
            _ => format!("ET{channel}"),
        }
    }

    pub fn long_label(&self, channel: usize) -> String {
        match self.annotations.long_labels.get(channel) {
            Some(Some(l)) => l.clone(),
            _ => self.label(channel),
        }
    }

    pub fn unit(&self, channel: usize) -> Option<&str> {
        self.annotations.units.get(channel)?.as_deref()
    }

    pub fn resolution(&self, channel: usize) -> usize {
        self.annotations
            .resolutions
            .get(channel)
            .copied()
            .flatten()
            .unwrap_or(0) as usize
    }

    /// Column header: `Long label (unit)`.
    pub fn header(&self, channel: usize) -> String {
        match self.unit(channel) {
            Some(unit) => format!("{} ({unit})", self.long_label(channel)),
            None => self.long_label(channel),
        }
    }

    /// Value rounded to the channel's resolution, with its unit.
    pub fn format_value(&self, channel: usize, value: f64) -> String {
        let digits = self.resolution(channel);
        match self.unit(channel) {
            Some(unit) => format!("{value:.digits$} {unit}"),
            None => format!("{value:.digits$}"),
        }
    }
}

impl FromStr for EtSpec {
    type Err = WsprError;

    fn from_str(s: &str) -> Result<Self> {
        EtSpec::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Token parsing
// ---------------------------------------------------------------------------

fn parse_decoder(text: &str) -> Result<Decoder> {
    let mut parts = text.split('_');
    let (Some(filters), Some(extractors), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid(format!("decoder '{text}' must have exactly one '_'")));
    };

    let terms = if filters.is_empty() {
        Vec::new()
    } else {
        filters
            .split(',')
            .map(parse_filter)
            .collect::<Result<Vec<_>>>()?
    };
    let extractor_terms = if extractors.is_empty() {
        Vec::new()
    } else {
        extractors
            .split(',')
            .map(parse_extractor)
            .collect::<Result<Vec<_>>>()?
    };
    Decoder::new(terms, extractor_terms)
}

fn parse_int(field: &str) -> Result<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("'{field}' is not a non-negative integer")));
    }
    field
        .parse()
        .map_err(|_| invalid(format!("'{field}' is out of range")))
}

fn parse_real(field: &str) -> Result<f64> {
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(invalid(format!("'{field}' is not a number"))),
    }
}

fn parse_expected(field: &str) -> Result<Expected> {
    if field == "s" {
        Ok(Expected::SlotIndex)
    } else {
        parse_int(field).map(Expected::Value)
    }
}

fn parse_digit_test(div: &str, modulus: &str, expected: &str) -> Result<DigitTest> {
    Ok(DigitTest::new(
        parse_int(div)?,
        parse_int(modulus)?,
        parse_expected(expected)?,
    ))
}

fn parse_filter(text: &str) -> Result<FilterTerm> {
    let fields: Vec<&str> = text.split(':').collect();
    let term = match fields.as_slice() {
        ["et0"] => FilterTerm::Preset(Preset::Et0 { kind: None }),
        ["et0", kind] => FilterTerm::Preset(Preset::Et0 {
            kind: Some(parse_int(kind)?),
        }),
        ["et3"] => FilterTerm::Preset(Preset::Et3),
        ["s", slot] => FilterTerm::Filter(Filter::Slot(parse_int(slot)? as usize)),
        ["t", d, m, v] => FilterTerm::Filter(Filter::Temporal(parse_digit_test(d, m, v)?)),
        [d, m, v] => FilterTerm::Filter(Filter::Value(parse_digit_test(d, m, v)?)),
        _ => return Err(invalid(format!("malformed filter '{text}'"))),
    };
    Ok(term)
}

fn parse_extractor(text: &str) -> Result<ExtractorTerm> {
    let fields: Vec<&str> = text.split(':').collect();
    let (divisor, rest) = match fields.as_slice() {
        [d, rest @ ..] if rest.len() == 3 => (Some(parse_int(d)?), rest),
        rest if rest.len() == 3 => (None, rest),
        _ => return Err(invalid(format!("malformed extractor '{text}'"))),
    };
    Ok(ExtractorTerm {
        divisor,
        modulus: parse_int(rest[0])?,
        offset: parse_real(rest[1])?,
        slope: parse_real(rest[2])?,
    })
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Value(v) => write!(f, "{v}"),
            Expected::SlotIndex => f.write_str("s"),
        }
    }
}

impl fmt::Display for DigitTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.divisor, self.modulus, self.expected)
    }
}

impl fmt::Display for FilterTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterTerm::Preset(Preset::Et0 { kind: None }) => f.write_str("et0"),
            FilterTerm::Preset(Preset::Et0 { kind: Some(k) }) => write!(f, "et0:{k}"),
            FilterTerm::Preset(Preset::Et3) => f.write_str("et3"),
            FilterTerm::Filter(Filter::Slot(s)) => write!(f, "s:{s}"),
            FilterTerm::Filter(Filter::Temporal(t)) => write!(f, "t:{t}"),
            FilterTerm::Filter(Filter::Value(t)) => write!(f, "{t}"),
        }
    }
}

impl fmt::Display for ExtractorTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(d) = self.divisor {
            write!(f, "{d}:")?;
        }
        write!(f, "{}:{}:{}", self.modulus, self.offset, self.slope)
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.terms, ",")?;
        f.write_str("_")?;
        write_joined(f, &self.extractor_terms, ",")
    }
}

impl fmt::Display for EtSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.decoders, "~")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
