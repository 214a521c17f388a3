use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the capture driver does when a seek lands outside the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissedSeekPolicy {
    /// Skip both the pose and the point sample for that timestamp.
    #[default]
    Drop,
    /// Keep appending points while dropping the pose; pose and point sample
    /// counts may then diverge.
    KeepPoints,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    pub version: u32,
    #[serde(default)]
    pub reconstruction: ReconstructionSettings,
    #[serde(default)]
    pub feeder: FeederSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconstructionSettings {
    /// Fraction of depth pixels turned into points, in `[0, 1]`.
    pub quality: f32,
    /// Half extent of each rendered point quad in world units.
    pub point_size: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeederSettings {
    pub delay_width: u32,
    pub delay_height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CaptureSettings {
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,
    #[serde(default = "default_seek_tolerance")]
    pub seek_tolerance: f64,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(
        default = "default_seek_timeout",
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt"
    )]
    pub seek_timeout: Option<Duration>,
    #[serde(default)]
    pub missed_seek: MissedSeekPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub enabled: bool,
    pub gizmo_cap: usize,
    pub gizmo_offset: usize,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            version: 1,
            reconstruction: ReconstructionSettings::default(),
            feeder: FeederSettings::default(),
            capture: CaptureSettings::default(),
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            quality: 1.0,
            point_size: 0.005,
        }
    }
}

impl Default for FeederSettings {
    fn default() -> Self {
        Self {
            delay_width: 1920,
            delay_height: 1080,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            seek_tolerance: default_seek_tolerance(),
            poll_interval: default_poll_interval(),
            seek_timeout: default_seek_timeout(),
            missed_seek: MissedSeekPolicy::default(),
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            gizmo_cap: 1000,
            gizmo_offset: 0,
        }
    }
}

fn default_sample_count() -> u32 {
    100
}

fn default_seek_tolerance() -> f64 {
    0.1
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_seek_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(duration) => serialize_duration(duration, serializer),
        None => serializer.serialize_str("off"),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.unwrap_or(default_poll_interval()))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds, human-readable string, or 'off'")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = v.trim();
            if trimmed.eq_ignore_ascii_case("off") || trimmed.eq_ignore_ascii_case("none") {
                return Ok(None);
            }
            humantime::parse_duration(trimmed)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl CloudConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CloudConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let quality = self.reconstruction.quality;
        if !(0.0..=1.0).contains(&quality) {
            return Err(ConfigError::Invalid(format!(
                "reconstruction.quality must be within [0, 1], got {quality}"
            )));
        }

        if !(self.reconstruction.point_size > 0.0) {
            return Err(ConfigError::Invalid(
                "reconstruction.point_size must be greater than zero".into(),
            ));
        }

        if self.feeder.delay_width < 2 || self.feeder.delay_height < 2 {
            return Err(ConfigError::Invalid(format!(
                "feeder delay surface {}x{} is too small",
                self.feeder.delay_width, self.feeder.delay_height
            )));
        }

        if self.capture.sample_count == 0 {
            return Err(ConfigError::Invalid(
                "capture.sample_count must be greater than zero".into(),
            ));
        }

        if !(self.capture.seek_tolerance > 0.0) {
            return Err(ConfigError::Invalid(
                "capture.seek_tolerance must be greater than zero".into(),
            ));
        }

        if self.capture.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "capture.poll_interval must be greater than zero".into(),
            ));
        }

        if self.diagnostics.gizmo_cap == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics.gizmo_cap must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[reconstruction]
quality = 0.5
point_size = 0.01

[feeder]
delay_width = 1280
delay_height = 720

[capture]
sample_count = 40
seek_tolerance = 0.05
poll_interval = "5ms"
seek_timeout = "off"
missed_seek = "keep-points"

[diagnostics]
enabled = true
gizmo_offset = 12
"#;

    #[test]
    fn parses_sample_config() {
        let config = CloudConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.reconstruction.quality, 0.5);
        assert_eq!(config.feeder.delay_width, 1280);
        assert_eq!(config.capture.sample_count, 40);
        assert_eq!(config.capture.poll_interval, Duration::from_millis(5));
        assert_eq!(config.capture.seek_timeout, None);
        assert_eq!(config.capture.missed_seek, MissedSeekPolicy::KeepPoints);
        assert!(config.diagnostics.enabled);
        assert_eq!(config.diagnostics.gizmo_cap, 1000);
        assert_eq!(config.diagnostics.gizmo_offset, 12);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = CloudConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.reconstruction.quality, 1.0);
        assert_eq!(config.feeder.delay_width, 1920);
        assert_eq!(config.feeder.delay_height, 1080);
        assert_eq!(config.capture.sample_count, 100);
        assert!((config.capture.seek_tolerance - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.capture.poll_interval, Duration::from_millis(10));
        assert_eq!(config.capture.seek_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.capture.missed_seek, MissedSeekPolicy::Drop);
        assert!(!config.diagnostics.enabled);
    }

    #[test]
    fn rejects_quality_out_of_range() {
        let err = CloudConfig::from_toml_str(
            r#"
version = 1
[reconstruction]
quality = 1.5
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_sample_count() {
        let err = CloudConfig::from_toml_str(
            r#"
version = 1
[capture]
sample_count = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = CloudConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_config_survives_toml_round_trip() {
        let rendered = CloudConfig::default().to_toml_string().unwrap();
        let parsed = CloudConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.capture, CaptureSettings::default());
        assert_eq!(parsed.reconstruction, ReconstructionSettings::default());
    }
}
