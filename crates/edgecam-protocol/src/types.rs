use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest threshold accepted by the edge detector
pub const MAX_THRESHOLD: u16 = 500;

/// Per-session frame processing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Camera frames are sent untouched
    Passthrough,
    /// Grayscale, blur and edge detection, re-expanded to three channels
    #[default]
    Edges,
    /// Grayscale and edge detection only, sent as a single-channel mask
    Canny,
}

impl FilterMode {
    pub const ALL: [FilterMode; 3] = [FilterMode::Passthrough, FilterMode::Edges, FilterMode::Canny];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::Passthrough => "passthrough",
            FilterMode::Edges => "edges",
            FilterMode::Canny => "canny",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown filter mode '{0}' (expected passthrough, edges or canny)")]
pub struct ParseFilterModeError(pub String);

impl FromStr for FilterMode {
    type Err = ParseFilterModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "none" => Ok(FilterMode::Passthrough),
            "edges" => Ok(FilterMode::Edges),
            "canny" => Ok(FilterMode::Canny),
            _ => Err(ParseFilterModeError(s.to_string())),
        }
    }
}

/// Edge detector thresholds, shared by every running session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterSettings {
    pub threshold1: u16,
    pub threshold2: u16,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            threshold1: 100,
            threshold2: 200,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{name} must be between 0 and {MAX_THRESHOLD}, got {value}")]
    OutOfRange { name: &'static str, value: u16 },
}

impl FilterSettings {
    pub fn new(threshold1: u16, threshold2: u16) -> Result<Self, SettingsError> {
        let settings = Self {
            threshold1,
            threshold2,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Both thresholds must lie in `[0, MAX_THRESHOLD]`. Their ordering is not checked.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.threshold1 > MAX_THRESHOLD {
            return Err(SettingsError::OutOfRange {
                name: "threshold1",
                value: self.threshold1,
            });
        }
        if self.threshold2 > MAX_THRESHOLD {
            return Err(SettingsError::OutOfRange {
                name: "threshold2",
                value: self.threshold2,
            });
        }
        Ok(())
    }
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_mode_parse() {
        assert_eq!("edges".parse::<FilterMode>(), Ok(FilterMode::Edges));
        assert_eq!(" Canny ".parse::<FilterMode>(), Ok(FilterMode::Canny));
        assert_eq!("none".parse::<FilterMode>(), Ok(FilterMode::Passthrough));
        assert!("sobel".parse::<FilterMode>().is_err());
    }

    #[test]
    fn test_filter_mode_serde_matches_display() {
        for mode in FilterMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode));
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = FilterSettings::default();
        assert_eq!(settings.threshold1, 100);
        assert_eq!(settings.threshold2, 200);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_range() {
        assert!(FilterSettings::new(0, 500).is_ok());
        // Reversed pairs are allowed, the detector swaps them
        assert!(FilterSettings::new(300, 10).is_ok());
        assert_eq!(
            FilterSettings::new(501, 10),
            Err(SettingsError::OutOfRange {
                name: "threshold1",
                value: 501
            })
        );
        assert!(FilterSettings::new(10, 900).is_err());
    }
}
