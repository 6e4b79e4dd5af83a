use std::fmt;

use serde::{Deserialize, Serialize};

use super::Color;

const ATMOLIGHT_HEADER: [u8; 7] = [0xFF, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00];
const ATMOLIGHT_CHANNELS: usize = 4;
const ATMOLIGHT_FRAME_SIZE: usize = ATMOLIGHT_HEADER.len() + ATMOLIGHT_CHANNELS * 3;

const KARATELIGHT_HEADER: [u8; 4] = [0xAA, 0x12, 0x00, 0x30];
const KARATELIGHT_CHANNELS: usize = 16;
const KARATELIGHT_FRAME_SIZE: usize = 52;
const KARATELIGHT_CHECKSUM_POS: usize = 2;

const DOTSTAR_START_FRAME: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const DOTSTAR_END_FRAME: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const DOTSTAR_LED_FRAME_SIZE: usize = 4;
const DOTSTAR_BRIGHTNESS: u8 = 0b1110_0000;

/// The supported families of output hardware. Each kind selects the wire
/// format used to encode a full channel frame and the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Fixed-header serial protocol with four RGB channels.
    AtmoLight,
    /// Checksummed serial protocol with sixteen GBR channels.
    KarateLight,
    /// APA102-style LEDs on an SPI bus.
    DotStar,
}

/// Physical link a device kind is driven over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Serial { baud_rate: u32 },
    Spi { speed_hz: u32 },
}

impl DeviceKind {
    /// Largest channel count the wire format can carry, `None` if unbounded.
    pub fn max_channels(self) -> Option<usize> {
        match self {
            Self::AtmoLight => Some(ATMOLIGHT_CHANNELS),
            Self::KarateLight => Some(KARATELIGHT_CHANNELS),
            Self::DotStar => None,
        }
    }

    /// Channel count used when the configuration does not name one.
    pub fn default_channels(self) -> Option<usize> {
        self.max_channels()
    }

    pub fn link(self) -> Link {
        match self {
            Self::AtmoLight => Link::Serial { baud_rate: 38_400 },
            Self::KarateLight => Link::Serial { baud_rate: 57_600 },
            Self::DotStar => Link::Spi { speed_hz: 500_000 },
        }
    }

    /// Encodes the complete channel state into one wire frame.
    pub fn encode(self, channels: &[Color]) -> Vec<u8> {
        match self {
            Self::AtmoLight => encode_atmolight(channels),
            Self::KarateLight => encode_karatelight(channels),
            Self::DotStar => encode_dotstar(channels),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AtmoLight => "atmolight",
            Self::KarateLight => "karatelight",
            Self::DotStar => "dotstar",
        };
        f.write_str(name)
    }
}

/// `FF 00 00 0F 00 00 00` followed by four `R G B` triplets. Missing
/// channels are sent as black, extra channels are dropped.
pub fn encode_atmolight(channels: &[Color]) -> Vec<u8> {
    let mut buffer = vec![0u8; ATMOLIGHT_FRAME_SIZE];
    buffer[..ATMOLIGHT_HEADER.len()].copy_from_slice(&ATMOLIGHT_HEADER);
    let payload = &mut buffer[ATMOLIGHT_HEADER.len()..];
    for (slot, color) in payload.chunks_exact_mut(3).zip(channels) {
        slot.copy_from_slice(&[color.red, color.green, color.blue]);
    }
    buffer
}

/// `AA 12 <xor> 30` followed by sixteen `G B R` triplets, always 52 bytes.
/// Byte 2 holds the XOR of the whole frame computed while it is still zero,
/// so the XOR over the finished frame is zero.
pub fn encode_karatelight(channels: &[Color]) -> Vec<u8> {
    let mut buffer = vec![0u8; KARATELIGHT_FRAME_SIZE];
    buffer[..KARATELIGHT_HEADER.len()].copy_from_slice(&KARATELIGHT_HEADER);
    let payload = &mut buffer[KARATELIGHT_HEADER.len()..];
    for (slot, color) in payload.chunks_exact_mut(3).zip(channels) {
        slot.copy_from_slice(&[color.green, color.blue, color.red]);
    }
    buffer[KARATELIGHT_CHECKSUM_POS] = xor_checksum(&buffer);
    buffer
}

/// Start frame, one `[brightness, B, G, R]` frame per channel, end frame.
pub fn encode_dotstar(channels: &[Color]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(
        DOTSTAR_START_FRAME.len() + channels.len() * DOTSTAR_LED_FRAME_SIZE + DOTSTAR_END_FRAME.len(),
    );
    buffer.extend_from_slice(&DOTSTAR_START_FRAME);
    for color in channels {
        buffer.extend_from_slice(&[dotstar_brightness(*color), color.blue, color.green, color.red]);
    }
    buffer.extend_from_slice(&DOTSTAR_END_FRAME);
    buffer
}

/// `0b111xxxxx` where the low five bits are the mean intensity scaled to 0..=31.
pub fn dotstar_brightness(color: Color) -> u8 {
    let sum = u32::from(color.red) + u32::from(color.green) + u32::from(color.blue);
    let intensity = (31.0 * sum as f32 / (3.0 * 255.0)).round() as u8;
    DOTSTAR_BRIGHTNESS | intensity.min(31)
}

pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}
