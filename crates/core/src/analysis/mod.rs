use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::{CaptureSource, Color, Devices, Mappings, Result};

/// The analyzer maps the sampled colors of a [`CaptureSource`] onto the
/// channels of the configured devices. Processing runs on a dedicated thread
/// from construction until the analyzer is stopped or dropped.
///
/// A stopped analyzer cannot be restarted; create a new one instead.
pub struct Analyzer {
    interrupted: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Analyzer {
    /// Spawns the worker thread.
    pub fn start(
        capture: Box<dyn CaptureSource>,
        devices: Arc<Devices>,
        mappings: Mappings,
    ) -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let worker = AnalyzerWorker::new(capture, devices, mappings);

        let flag = Arc::clone(&interrupted);
        let handle = thread::Builder::new()
            .name("analyzer".into())
            .spawn(move || worker.run(&flag))?;

        Ok(Self {
            interrupted,
            worker: Some(handle),
        })
    }

    /// Returns whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Requests the worker to stop and blocks until it has exited. The frame
    /// in progress (including a blocking capture) is finished first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("analyzer thread panicked");
            }
        }
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("running", &self.is_running())
            .finish()
    }
}

struct AnalyzerWorker {
    capture: Box<dyn CaptureSource>,
    devices: Arc<Devices>,
    mappings: Mappings,
    /// Last mapped colors per device, sized to each device's channel count.
    channels_per_device: Vec<Vec<Color>>,
}

impl AnalyzerWorker {
    fn new(capture: Box<dyn CaptureSource>, devices: Arc<Devices>, mappings: Mappings) -> Self {
        let channels_per_device = devices
            .devices()
            .iter()
            .map(|device| vec![Color::BLACK; device.channels])
            .collect();
        Self {
            capture,
            devices,
            mappings,
            channels_per_device,
        }
    }

    fn run(mut self, interrupted: &AtomicBool) {
        tracing::info!("starting ambilight analyzer");
        while !interrupted.load(Ordering::SeqCst) {
            if let Err(error) = self.process_frame() {
                tracing::error!(%error, "error in ambilight analyzer");
            }
        }
        tracing::info!("exiting ambilight analyzer");
    }

    fn process_frame(&mut self) -> Result<()> {
        let frame = self.capture.capture()?;
        self.mappings.apply(&frame, &mut self.channels_per_device)?;
        self.submit_channels()
    }

    /// Pushes every device's full buffer, even if this frame left it untouched.
    fn submit_channels(&self) -> Result<()> {
        for (device, channels) in self.channels_per_device.iter().enumerate() {
            self.devices.set_channels(device, channels)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::device::testing::FakeTransport;
    use crate::{
        encode_dotstar, AtmoError, CaptureFactory, CapturedFrame, DeviceEntry, DeviceKind, Mapping,
        StripDevice,
    };

    /// Replays a fixed frame, failing on the frames listed in `failures`.
    pub(crate) struct ScriptedCapture {
        pub frame: CapturedFrame,
        pub failures: Vec<usize>,
        pub calls: Arc<Mutex<usize>>,
    }

    impl CaptureSource for ScriptedCapture {
        fn capture(&mut self) -> Result<CapturedFrame> {
            thread::sleep(Duration::from_millis(1));
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.failures.contains(&call) {
                return Err(AtmoError::capture("scripted failure"));
            }
            Ok(self.frame.clone())
        }
    }

    pub(crate) struct ScriptedFactory {
        pub frame: CapturedFrame,
    }

    impl CaptureFactory for ScriptedFactory {
        fn open(&self) -> Result<Box<dyn CaptureSource>> {
            Ok(Box::new(ScriptedCapture {
                frame: self.frame.clone(),
                failures: Vec::new(),
                calls: Arc::new(Mutex::new(0)),
            }))
        }
    }

    fn devices(channels: &[usize]) -> (Arc<Devices>, Vec<FakeTransport>) {
        let mut transports = Vec::new();
        let entries = channels
            .iter()
            .enumerate()
            .map(|(index, count)| {
                let transport = FakeTransport::new();
                transports.push(transport.clone());
                let device =
                    StripDevice::new(DeviceKind::DotStar, Box::new(transport), *count).unwrap();
                DeviceEntry::new(format!("strip{index}"), Box::new(device), false)
            })
            .collect();
        (Arc::new(Devices::new(entries)), transports)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn maps_frames_and_submits_every_device() {
        let (devices, transports) = devices(&[2, 3]);
        let capture = ScriptedCapture {
            frame: CapturedFrame {
                top: vec![Color::new(1, 2, 3)],
                ..Default::default()
            },
            failures: Vec::new(),
            calls: Arc::new(Mutex::new(0)),
        };
        let mappings = Mappings {
            top: vec![Mapping::new(0, 1)],
            ..Default::default()
        };

        let analyzer = Analyzer::start(Box::new(capture), devices.clone(), mappings).unwrap();
        wait_until(|| !transports[1].frames().is_empty());
        analyzer.stop();

        assert_eq!(
            devices.channels(0).unwrap(),
            vec![Color::BLACK, Color::new(1, 2, 3)]
        );
        // The untouched device still receives full frames.
        assert_eq!(
            transports[1].frames().last().unwrap(),
            &encode_dotstar(&[Color::BLACK; 3])
        );
    }

    #[test]
    fn keeps_running_after_failed_frames() {
        let (devices, transports) = devices(&[1]);
        let calls = Arc::new(Mutex::new(0));
        let capture = ScriptedCapture {
            frame: CapturedFrame {
                left: vec![Color::new(9, 9, 9)],
                ..Default::default()
            },
            failures: vec![1, 2, 3],
            calls: calls.clone(),
        };
        let mappings = Mappings {
            left: vec![Mapping::new(0, 0)],
            ..Default::default()
        };

        let analyzer = Analyzer::start(Box::new(capture), devices.clone(), mappings).unwrap();
        wait_until(|| !transports[0].frames().is_empty());
        assert!(analyzer.is_running());
        drop(analyzer);

        assert!(*calls.lock().unwrap() > 3);
        assert_eq!(devices.channel(0, 0).unwrap(), Color::new(9, 9, 9));
    }

    #[test]
    fn device_failures_do_not_stop_the_analyzer() {
        let (devices, transports) = devices(&[1]);
        transports[0].fail_writes(true);
        let calls = Arc::new(Mutex::new(0));
        let capture = ScriptedCapture {
            frame: CapturedFrame::default(),
            failures: Vec::new(),
            calls: calls.clone(),
        };

        let analyzer = Analyzer::start(Box::new(capture), devices, Mappings::default()).unwrap();
        wait_until(|| *calls.lock().unwrap() > 5);
        transports[0].fail_writes(false);
        wait_until(|| !transports[0].frames().is_empty());
        analyzer.stop();
    }

    #[test]
    fn no_writes_after_stop_returns() {
        let (devices, transports) = devices(&[2]);
        let capture = ScriptedCapture {
            frame: CapturedFrame::default(),
            failures: Vec::new(),
            calls: Arc::new(Mutex::new(0)),
        };

        let analyzer = Analyzer::start(Box::new(capture), devices, Mappings::default()).unwrap();
        wait_until(|| !transports[0].frames().is_empty());
        analyzer.stop();

        let written = transports[0].frames().len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(transports[0].frames().len(), written);
    }
}
