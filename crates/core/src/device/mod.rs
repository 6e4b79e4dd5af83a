//! Output devices: colors, the device capability trait and the strip device
//! that composes a wire encoder with a transport.

mod encoder;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AtmoError, Result};

pub use encoder::{
    dotstar_brightness, encode_atmolight, encode_dotstar, encode_karatelight, xor_checksum,
    DeviceKind, Link,
};
pub use transport::{transport_for, SerialTransport, SpiTransport, Transport};

/// The channel index, specific to one device.
pub type Channel = usize;

/// RGB color with 8 bit precision per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// An RGB output device with at least one channel, e.g. a LED strip.
///
/// The hardware is write-only: getters return the buffered state. Every
/// mutation pushes the complete channel buffer to the hardware.
pub trait LightDevice: Send {
    /// Sets every channel to black.
    fn clear(&mut self) -> Result<()>;

    fn channel(&self, channel: Channel) -> Result<Color>;

    fn channels(&self) -> Vec<Color>;

    fn set_channel(&mut self, channel: Channel, color: Color) -> Result<()>;

    /// Overwrites the leading `colors.len()` channels. Trailing channels keep
    /// their previous value.
    fn set_channels(&mut self, colors: &[Color]) -> Result<()>;

    /// Re-acquires the underlying transport.
    fn reset(&mut self) -> Result<()>;

    fn channel_count(&self) -> usize;
}

/// A [`LightDevice`] made of a channel buffer, the wire encoding of its
/// [`DeviceKind`] and a [`Transport`].
pub struct StripDevice {
    kind: DeviceKind,
    transport: Box<dyn Transport>,
    buffer: Vec<Color>,
}

impl StripDevice {
    /// Creates a device without touching the hardware.
    pub fn new(kind: DeviceKind, transport: Box<dyn Transport>, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(AtmoError::config(format!(
                "illegal number of channels for {kind} device: 0"
            )));
        }
        if let Some(max) = kind.max_channels() {
            if channels > max {
                return Err(AtmoError::config(format!(
                    "{kind} devices support at most {max} channels, {channels} configured"
                )));
            }
        }

        Ok(Self {
            kind,
            transport,
            buffer: vec![Color::BLACK; channels],
        })
    }

    /// Creates the device, opens its transport and switches every channel off.
    pub fn connect(kind: DeviceKind, transport: Box<dyn Transport>, channels: usize) -> Result<Self> {
        let mut device = Self::new(kind, transport, channels)?;
        device.reset()?;
        device.clear()?;
        Ok(device)
    }

    fn update(&mut self) -> Result<()> {
        let frame = self.kind.encode(&self.buffer);
        self.transport.write(&frame)
    }

    fn check_channel(&self, channel: Channel) -> Result<()> {
        if channel >= self.buffer.len() {
            return Err(AtmoError::InvalidChannel {
                index: channel,
                available: self.buffer.len(),
            });
        }
        Ok(())
    }
}

impl LightDevice for StripDevice {
    fn clear(&mut self) -> Result<()> {
        self.buffer.fill(Color::BLACK);
        self.update()
    }

    fn channel(&self, channel: Channel) -> Result<Color> {
        self.check_channel(channel)?;
        Ok(self.buffer[channel])
    }

    fn channels(&self) -> Vec<Color> {
        self.buffer.clone()
    }

    fn set_channel(&mut self, channel: Channel, color: Color) -> Result<()> {
        self.check_channel(channel)?;
        self.buffer[channel] = color;
        self.update()
    }

    fn set_channels(&mut self, colors: &[Color]) -> Result<()> {
        if colors.len() > self.buffer.len() {
            return Err(AtmoError::InvalidChannel {
                index: colors.len(),
                available: self.buffer.len(),
            });
        }
        self.buffer[..colors.len()].copy_from_slice(colors);
        self.update()
    }

    fn reset(&mut self) -> Result<()> {
        self.transport.open()
    }

    fn channel_count(&self) -> usize {
        self.buffer.len()
    }
}

impl fmt::Debug for StripDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripDevice")
            .field("kind", &self.kind)
            .field("channels", &self.buffer.len())
            .finish()
    }
}
