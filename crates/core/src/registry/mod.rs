//! The device registry owns every configured output device and serializes
//! all access to them behind a single lock.
//!
//! The lock covers the whole device vector and each call's retry loop,
//! including the backoff sleeps. A device stuck in its retry sequence
//! therefore stalls traffic to every other device until it recovers or
//! gives up.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AtmoError, Channel, Color, LightDevice, Result};

/// The device index as configured by the user (ordering in the config file).
pub type DeviceIndex = usize;

/// Retries performed after the first failed attempt.
pub const MAX_RETRIES: u32 = 7;

/// One configured device together with its recovery settings.
pub struct DeviceEntry {
    pub name: String,
    pub device: Box<dyn LightDevice>,
    pub reset_on_error: bool,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>, device: Box<dyn LightDevice>, reset_on_error: bool) -> Self {
        Self {
            name: name.into(),
            device,
            reset_on_error,
        }
    }
}

impl fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("name", &self.name)
            .field("channels", &self.device.channel_count())
            .field("reset_on_error", &self.reset_on_error)
            .finish()
    }
}

/// Name and channel count of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: usize,
}

/// Source of the backoff delay between retries. Tests substitute a
/// recording implementation to observe the schedule without waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Exponential backoff: retry `n` (0-based) waits `2^n` seconds.
pub fn backoff(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry)
}

/// Thread-safe manager for all configured devices.
pub struct Devices {
    entries: Mutex<Vec<DeviceEntry>>,
    infos: Vec<DeviceInfo>,
    sleeper: Arc<dyn Sleeper>,
}

impl Devices {
    /// Takes ownership of `entries`; their order defines the device indices.
    pub fn new(entries: Vec<DeviceEntry>) -> Self {
        Self::with_sleeper(entries, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(entries: Vec<DeviceEntry>, sleeper: Arc<dyn Sleeper>) -> Self {
        let infos = entries
            .iter()
            .map(|entry| DeviceInfo {
                name: entry.name.clone(),
                channels: entry.device.channel_count(),
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            infos,
            sleeper,
        }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Snapshot of all devices, ordered by device index. Names and channel
    /// counts never change after construction.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.infos.clone()
    }

    /// Clears every device in index order. The first device that exhausts its
    /// retries aborts the remaining clears.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.lock()?;
        for entry in entries.iter_mut() {
            self.execute_with_retry(entry, |device| device.clear())?;
        }
        Ok(())
    }

    pub fn channel(&self, device: DeviceIndex, channel: Channel) -> Result<Color> {
        let mut entries = self.lock()?;
        let entry = self.entry(&mut entries, device)?;
        self.execute_with_retry(entry, |device| device.channel(channel))
    }

    pub fn channels(&self, device: DeviceIndex) -> Result<Vec<Color>> {
        let mut entries = self.lock()?;
        let entry = self.entry(&mut entries, device)?;
        self.execute_with_retry(entry, |device| Ok(device.channels()))
    }

    pub fn set_channel(&self, device: DeviceIndex, channel: Channel, color: Color) -> Result<()> {
        let mut entries = self.lock()?;
        let entry = self.entry(&mut entries, device)?;
        self.execute_with_retry(entry, |device| device.set_channel(channel, color))
    }

    pub fn set_channels(&self, device: DeviceIndex, colors: &[Color]) -> Result<()> {
        let mut entries = self.lock()?;
        let entry = self.entry(&mut entries, device)?;
        self.execute_with_retry(entry, |device| device.set_channels(colors))
    }

    fn entry<'a>(
        &self,
        entries: &'a mut [DeviceEntry],
        device: DeviceIndex,
    ) -> Result<&'a mut DeviceEntry> {
        let available = entries.len();
        entries.get_mut(device).ok_or(AtmoError::DeviceNotFound {
            index: device,
            available,
        })
    }

    fn execute_with_retry<T>(
        &self,
        entry: &mut DeviceEntry,
        mut operation: impl FnMut(&mut dyn LightDevice) -> Result<T>,
    ) -> Result<T> {
        let mut retry = 0;
        loop {
            let error = match operation(entry.device.as_mut()) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(error);
            }

            if !entry.reset_on_error {
                tracing::error!(device = %entry.name, %error, "device failed");
                return Err(error);
            }

            if retry >= MAX_RETRIES {
                tracing::error!(device = %entry.name, %error, "giving up on device");
                return Err(error);
            }

            let wait = backoff(retry);
            tracing::warn!(
                device = %entry.name,
                %error,
                wait_seconds = wait.as_secs(),
                "device failed, resetting and retrying"
            );
            self.sleeper.sleep(wait);

            if let Err(reset_error) = entry.device.reset() {
                tracing::warn!(device = %entry.name, error = %reset_error, "resetting device failed");
            }

            retry += 1;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<DeviceEntry>>> {
        self.entries
            .lock()
            .map_err(|_| AtmoError::msg("device registry has been poisoned"))
    }
}

impl fmt::Debug for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devices")
            .field("devices", &self.infos)
            .finish()
    }
}
