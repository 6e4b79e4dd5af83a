//! Core library for the AtmoLight ambient lighting daemon.
//!
//! Colors sampled from the edges of a video picture are mapped onto the
//! channels of serial and SPI light devices. Each module owns a distinct
//! subsystem (devices, the device registry, capture, analysis, mode
//! switching, the control surface) and the [`Application`] wires them
//! together from an [`AppConfig`].

pub mod analysis;
pub mod application;
pub mod capture;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod mapping;
pub mod mode;
pub mod registry;

pub use analysis::Analyzer;
pub use application::Application;
pub use capture::{
    sample_regions, CaptureConfig, CaptureFactory, CaptureKind, CaptureSource, RawVideoCapture,
    RegionConfig, RegionConfigs, RgbFrame,
};
pub use config::{AnalyzerConfig, AppConfig, ControlConfig, DeviceConfig};
pub use control::{ControlServer, MessageId, RequestHandler};
pub use device::{
    dotstar_brightness, encode_atmolight, encode_dotstar, encode_karatelight, transport_for,
    xor_checksum, Channel, Color, DeviceKind, LightDevice, Link, SerialTransport, SpiTransport,
    StripDevice, Transport,
};
pub use error::{AtmoError, Result};
pub use mapping::{CapturedFrame, Mapping, Mappings, Region, Regions};
pub use mode::{AnalyzerSetup, Mode, ModeController};
pub use registry::{
    backoff, DeviceEntry, DeviceIndex, DeviceInfo, Devices, Sleeper, ThreadSleeper, MAX_RETRIES,
};
