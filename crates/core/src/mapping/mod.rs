use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AtmoError, Channel, Color, DeviceIndex, DeviceInfo, Result};

/// The four screen areas a capture source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Top,
    Bottom,
    Left,
    Right,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Top, Region::Bottom, Region::Left, Region::Right];
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Top => "top",
            Region::Bottom => "bottom",
            Region::Left => "left",
            Region::Right => "right",
        };
        f.write_str(name)
    }
}

/// Per-region values, e.g. sampled colors or mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Regions<T> {
    pub top: Vec<T>,
    pub bottom: Vec<T>,
    pub left: Vec<T>,
    pub right: Vec<T>,
}

impl<T> Default for Regions<T> {
    fn default() -> Self {
        Self {
            top: Vec::new(),
            bottom: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
        }
    }
}

impl<T> Regions<T> {
    pub fn get(&self, region: Region) -> &[T] {
        match region {
            Region::Top => &self.top,
            Region::Bottom => &self.bottom,
            Region::Left => &self.left,
            Region::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, region: Region) -> &mut Vec<T> {
        match region {
            Region::Top => &mut self.top,
            Region::Bottom => &mut self.bottom,
            Region::Left => &mut self.left,
            Region::Right => &mut self.right,
        }
    }
}

/// The colors produced by one captured frame, ordered per region.
pub type CapturedFrame = Regions<Color>;

/// All mappings for all four areas, index-aligned with [`CapturedFrame`].
pub type Mappings = Regions<Mapping>;

/// Destination of one sampled input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub device_index: DeviceIndex,
    pub device_channel: Channel,
}

impl Mapping {
    pub const fn new(device_index: DeviceIndex, device_channel: Channel) -> Self {
        Self {
            device_index,
            device_channel,
        }
    }
}

impl Mappings {
    /// Writes every sampled color of `frame` into the channel buffer its
    /// mapping points at. Slots no mapping touches keep their value.
    pub fn apply(&self, frame: &CapturedFrame, buffers: &mut [Vec<Color>]) -> Result<()> {
        for region in Region::ALL {
            let mappings = self.get(region);
            for (index, color) in frame.get(region).iter().enumerate() {
                let mapping = mappings.get(index).ok_or_else(|| {
                    AtmoError::config(format!(
                        "no mapping for {region} channel {index} ({} mappings configured)",
                        mappings.len()
                    ))
                })?;
                let available = buffers.len();
                let device = buffers.get_mut(mapping.device_index).ok_or(
                    AtmoError::DeviceNotFound {
                        index: mapping.device_index,
                        available,
                    },
                )?;
                let available = device.len();
                let slot = device.get_mut(mapping.device_channel).ok_or(
                    AtmoError::InvalidChannel {
                        index: mapping.device_channel,
                        available,
                    },
                )?;
                *slot = *color;
            }
        }
        Ok(())
    }

    /// Checks every mapping against the configured devices.
    pub fn validate(&self, devices: &[DeviceInfo]) -> Result<()> {
        for region in Region::ALL {
            for (index, mapping) in self.get(region).iter().enumerate() {
                let device = devices.get(mapping.device_index).ok_or_else(|| {
                    AtmoError::config(format!(
                        "{region} mapping {index} targets unknown device {}",
                        mapping.device_index
                    ))
                })?;
                if mapping.device_channel >= device.channels {
                    return Err(AtmoError::config(format!(
                        "{region} mapping {index} targets channel {} of device '{}' which has {} channels",
                        mapping.device_channel, device.name, device.channels
                    )));
                }
            }
        }
        Ok(())
    }
}
