use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::{io, thread, time::Duration};

use crate::Result;

use super::Transport;

#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    pub frames: Vec<Vec<u8>>,
    pub opens: usize,
}

/// In-memory transport that records frames and can be told to fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTransport {
    log: Arc<Mutex<TransportLog>>,
    failing: Arc<AtomicBool>,
    write_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps for `delay` before it is recorded.
    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.log().frames.clone()
    }

    pub fn opens(&self) -> usize {
        self.log().opens
    }

    fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock().unwrap()
    }
}

impl Transport for FakeTransport {
    fn open(&mut self) -> Result<()> {
        self.log().opens += 1;
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
        }
        self.log().frames.push(frame.to_vec());
        Ok(())
    }
}
