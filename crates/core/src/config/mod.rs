use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AtmoError, CaptureConfig, DeviceInfo, DeviceKind, Mappings, Region, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output devices; the position in this list is the device index.
    pub devices: Vec<DeviceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<AnalyzerConfig>,
}

/// One output device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Serial port or SPI device node.
    pub filename: PathBuf,
    /// Falls back to the kind's maximum where it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<usize>,
    #[serde(default)]
    pub reset_on_error: bool,
}

impl DeviceConfig {
    /// Resolves and checks the channel count against the device kind.
    pub fn channel_count(&self) -> Result<usize> {
        let channels = self
            .channels
            .or_else(|| self.kind.default_channels())
            .ok_or_else(|| {
                AtmoError::config(format!(
                    "device '{}': {} devices need an explicit channel count",
                    self.name, self.kind
                ))
            })?;
        if channels == 0 {
            return Err(AtmoError::config(format!(
                "device '{}': channel count must be at least 1",
                self.name
            )));
        }
        if let Some(max) = self.kind.max_channels() {
            if channels > max {
                return Err(AtmoError::config(format!(
                    "device '{}': {} devices support at most {max} channels, {channels} configured",
                    self.name, self.kind
                )));
            }
        }
        Ok(channels)
    }
}

/// Listen address of the control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub mappings: Mappings,
}

impl AppConfig {
    /// Reads, parses and validates a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AtmoError::config(format!("cannot read '{}': {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&text)?;
        tracing::debug!(path = %path.display(), devices = config.devices.len(), "loaded configuration");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Device names and resolved channel counts, in index order.
    pub fn device_infos(&self) -> Result<Vec<DeviceInfo>> {
        self.devices
            .iter()
            .map(|device| {
                Ok(DeviceInfo {
                    name: device.name.clone(),
                    channels: device.channel_count()?,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.control.is_none() && self.analyzer.is_none() {
            return Err(AtmoError::config(
                "neither 'control' nor 'analyzer' is configured",
            ));
        }

        let devices = self.device_infos()?;

        if let Some(analyzer) = &self.analyzer {
            let capture = &analyzer.capture;
            if capture.width == 0 || capture.height == 0 {
                return Err(AtmoError::config(format!(
                    "capture size {}x{} is empty",
                    capture.width, capture.height
                )));
            }
            for region in Region::ALL {
                let samples = capture.regions.get(region).count;
                let mappings = analyzer.mappings.get(region).len();
                if mappings < samples {
                    return Err(AtmoError::config(format!(
                        "{region} region takes {samples} samples but only {mappings} mappings are configured"
                    )));
                }
            }
            analyzer.mappings.validate(&devices)?;
        }

        Ok(())
    }
}
