//! Configuration file management for wspr-track.
//!
//! Reads/writes `~/.wspr-track/config.toml` with the tracker identity
//! (callsign, band, channel, protocol), track curation settings, and the
//! extended telemetry spec with its annotations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{band_info, MAX_CHANNEL};
use crate::curate::DEFAULT_MAX_SPEED_KPH;
use crate::et_parse::{AnnotationText, EtSpec};
use crate::protocol::{Protocol, U4bVariant};
use crate::types::{Result, WsprError};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub callsign: String,
    pub band: String,
    pub channel: u16,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    pub track: TrackConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub detach_grid4: bool,
    pub max_speed_kph: f64,
}

/// Extended telemetry spec and annotation strings, in their textual form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoders: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            callsign: String::new(),
            band: "20m".into(),
            channel: 0,
            protocol: Protocol::U4b,
            version: None,
            track: TrackConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        TrackConfig {
            detach_grid4: false,
            max_speed_kph: DEFAULT_MAX_SPEED_KPH,
        }
    }
}

impl TelemetryConfig {
    pub fn annotation_text(&self) -> AnnotationText<'_> {
        AnnotationText {
            labels: self.labels.as_deref(),
            long_labels: self.long_labels.as_deref(),
            units: self.units.as_deref(),
            resolutions: self.resolutions.as_deref(),
        }
    }

    /// Parse the configured spec, if any.
    pub fn spec(&self) -> Result<Option<EtSpec>> {
        match self.decoders.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => EtSpec::parse_annotated(text, self.annotation_text()).map(Some),
        }
    }
}

impl TrackerConfig {
    /// Check every field that can be checked without data.
    pub fn validate(&self) -> Result<()> {
        if !self.callsign.is_empty() && !is_valid_callsign(&self.callsign) {
            return Err(WsprError::Config(format!("invalid callsign: {}", self.callsign)));
        }
        if band_info(&self.band).is_none() {
            return Err(WsprError::UnknownBand(self.band.clone()));
        }
        if self.channel > MAX_CHANNEL {
            return Err(WsprError::InvalidChannel(self.channel));
        }
        U4bVariant::from_version(self.version)?;
        if !(self.track.max_speed_kph.is_finite() && self.track.max_speed_kph > 0.0) {
            return Err(WsprError::Config(format!(
                "max_speed_kph must be positive, got {}",
                self.track.max_speed_kph
            )));
        }
        self.telemetry.spec()?;
        Ok(())
    }
}

/// `[A-Z0-9]{4,6}` after uppercasing.
fn is_valid_callsign(callsign: &str) -> bool {
    (4..=6).contains(&callsign.len()) && callsign.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Get the config directory path (`~/.wspr-track/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".wspr-track")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.wspr-track/config.toml`.
///
/// Returns default config if the file doesn't exist or can't be parsed.
pub fn load_config() -> TrackerConfig {
    let path = config_file();
    if !path.exists() {
        return TrackerConfig::default();
    }
    load_config_from(&path).unwrap_or_default()
}

pub fn load_config_from(path: &Path) -> Result<TrackerConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.wspr-track/config.toml`.
pub fn save_config(config: &TrackerConfig) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &TrackerConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config)?)?;
    Ok(())
}

pub fn parse_config(text: &str) -> Result<TrackerConfig> {
    toml::from_str(text).map_err(|e| WsprError::Config(e.to_string()))
}

pub fn serialize_config(config: &TrackerConfig) -> Result<String> {
    let body = toml::to_string_pretty(config).map_err(|e| WsprError::Config(e.to_string()))?;
    Ok(format!("# wspr-track configuration\n\n{body}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.band, "20m");
        assert_eq!(config.protocol, Protocol::U4b);
        assert_eq!(config.track.max_speed_kph, 300.0);
        assert!(config.telemetry.decoders.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
callsign = "N0CALL"
band = "10m"
channel = 123
protocol = "u4b"
version = 2

[track]
detach_grid4 = true

[telemetry]
decoders = "et0:0,s:2_11:-40:5"
labels = "Temp"
units = "C"
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.callsign, "N0CALL");
        assert_eq!(config.band, "10m");
        assert_eq!(config.channel, 123);
        assert_eq!(config.version, Some(2));
        assert!(config.track.detach_grid4);
        assert_eq!(config.track.max_speed_kph, 300.0);
        let spec = config.telemetry.spec().unwrap().unwrap();
        assert_eq!(spec.label(0), "Temp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config("channel = 7\n").unwrap();
        assert_eq!(config.channel, 7);
        assert_eq!(config.band, "20m");
    }

    #[test]
    fn test_parse_rejects_unknown_protocol() {
        assert!(parse_config("protocol = \"morse\"\n").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = TrackerConfig::default();
        config.channel = 600;
        assert!(matches!(config.validate(), Err(WsprError::InvalidChannel(600))));

        let mut config = TrackerConfig::default();
        config.band = "11m".into();
        assert!(matches!(config.validate(), Err(WsprError::UnknownBand(_))));

        let mut config = TrackerConfig::default();
        config.version = Some(7);
        assert!(matches!(config.validate(), Err(WsprError::UnsupportedVersion(7))));

        let mut config = TrackerConfig::default();
        config.callsign = "N0/CALL".into();
        assert!(matches!(config.validate(), Err(WsprError::Config(_))));

        let mut config = TrackerConfig::default();
        config.telemetry.decoders = Some("s:2_1:0:1".into());
        assert!(matches!(config.validate(), Err(WsprError::InvalidSpec(_))));
    }

    #[test]
    fn test_roundtrip() {
        let config = TrackerConfig {
            callsign: "N0CALL".into(),
            band: "40m".into(),
            channel: 42,
            protocol: Protocol::Generic,
            version: None,
            track: TrackConfig {
                detach_grid4: true,
                max_speed_kph: 250.0,
            },
            telemetry: TelemetryConfig {
                decoders: Some("s:1_10:0:1".into()),
                resolutions: Some("2".into()),
                ..Default::default()
            },
        };
        let text = serialize_config(&config).unwrap();
        assert!(text.starts_with("# wspr-track configuration"));
        let parsed = parse_config(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = TrackerConfig::default();
        config.callsign = "K1ABC".into();
        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_from(&dir.path().join("absent.toml")),
            Err(WsprError::Io(_))
        ));
    }
}
