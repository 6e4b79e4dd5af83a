use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::{
    transport_for, AnalyzerSetup, AppConfig, ControlServer, DeviceEntry, Devices, LightDevice,
    ModeController, RequestHandler, Result, StripDevice,
};

/// The running daemon: devices, mode controller and, if configured, the
/// control server.
#[derive(Debug)]
pub struct Application {
    devices: Arc<Devices>,
    modes: Arc<ModeController>,
    server: Option<ControlServer>,
}

impl Application {
    /// Opens every configured device, then starts the analyzer and the
    /// control server as configured.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let entries = connect_devices(config)?;
        Self::with_devices(config, Devices::new(entries))
    }

    /// Wires up the application around an already built device registry.
    pub fn with_devices(config: &AppConfig, devices: Devices) -> Result<Self> {
        config.validate()?;
        let devices = Arc::new(devices);

        let setup = config.analyzer.as_ref().map(|analyzer| {
            AnalyzerSetup::new(Box::new(analyzer.capture.clone()), analyzer.mappings.clone())
        });
        let modes = Arc::new(ModeController::new(
            Arc::clone(&devices),
            setup,
            config.control.is_some(),
        )?);

        let server = match &config.control {
            Some(control) => {
                let handler = Arc::new(RequestHandler::new(
                    Arc::clone(&devices),
                    Arc::clone(&modes),
                ));
                Some(ControlServer::start(&control.address, control.port, handler)?)
            }
            None => None,
        };

        Ok(Self {
            devices,
            modes,
            server,
        })
    }

    pub fn devices(&self) -> &Arc<Devices> {
        &self.devices
    }

    pub fn modes(&self) -> &Arc<ModeController> {
        &self.modes
    }

    pub fn control_server(&self) -> Option<&ControlServer> {
        self.server.as_ref()
    }

    /// Blocks until `shutdown` fires or its sender is dropped, then stops
    /// the control server and the analyzer.
    pub fn run(self, shutdown: Receiver<()>) -> Result<()> {
        tracing::info!(devices = self.devices.len(), "atmolight running");
        // A dropped sender means nobody can ask for shutdown any more.
        let _ = shutdown.recv();
        tracing::info!("shutting down");
        self.shutdown()
    }

    fn shutdown(mut self) -> Result<()> {
        if let Some(server) = self.server.take() {
            server.stop();
        }
        self.modes.shutdown()
    }
}

fn connect_devices(config: &AppConfig) -> Result<Vec<DeviceEntry>> {
    config
        .devices
        .iter()
        .map(|device| {
            let channels = device.channel_count()?;
            let path = device.filename.to_string_lossy();
            let transport = transport_for(device.kind, &path);
            let strip = StripDevice::connect(device.kind, transport, channels)?;
            tracing::info!(
                device = %device.name,
                kind = %device.kind,
                path = %path,
                channels = strip.channel_count(),
                "device connected"
            );
            Ok(DeviceEntry::new(
                device.name.clone(),
                Box::new(strip),
                device.reset_on_error,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::device::testing::FakeTransport;
    use crate::{encode_atmolight, Color, DeviceKind, Mode};

    fn registry(transport: &FakeTransport) -> Devices {
        let device =
            StripDevice::connect(DeviceKind::AtmoLight, Box::new(transport.clone()), 4).unwrap();
        Devices::new(vec![DeviceEntry::new("tv", Box::new(device), false)])
    }

    #[test]
    fn control_only_application_serves_requests() {
        let config = AppConfig::from_yaml_str(
            r#"
devices:
  - { name: tv, type: atmolight, filename: /dev/null }
control: { address: 127.0.0.1, port: 0 }
"#,
        )
        .unwrap();
        let transport = FakeTransport::new();
        let app = Application::with_devices(&config, registry(&transport)).unwrap();

        assert_eq!(app.modes().mode().unwrap(), Mode::Control);
        let addr = app.control_server().unwrap().local_addr();
        let (mut socket, _) = tungstenite::connect(format!("ws://{addr}")).unwrap();
        socket
            .send(tungstenite::Message::Text(
                r#"{"cmd":"get_mode","msg_id":4}"#.to_owned().into(),
            ))
            .unwrap();
        let reply = socket.read().unwrap();
        let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(reply["mode"], "control");

        let (tx, rx) = mpsc::channel();
        let runner = thread::spawn(move || app.run(rx));
        tx.send(()).unwrap();
        runner.join().unwrap().unwrap();
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[test]
    fn analyzer_application_drives_devices_until_shutdown() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        // Two 2x2 frames, solid color each.
        for _ in 0..8 {
            input.write_all(&[40, 50, 60]).unwrap();
        }
        let yaml = format!(
            r#"
devices:
  - {{ name: tv, type: atmolight, filename: /dev/null }}
analyzer:
  capture:
    type: rawvideo
    filename: {}
    width: 2
    height: 2
    top: {{ count: 1, depth: 1 }}
  mappings:
    top: [ {{ device_index: 0, device_channel: 2 }} ]
"#,
            input.path().display()
        );
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        let transport = FakeTransport::new();
        let app = Application::with_devices(&config, registry(&transport)).unwrap();
        assert!(app.control_server().is_none());

        let expected = encode_atmolight(&[
            Color::BLACK,
            Color::BLACK,
            Color::new(40, 50, 60),
            Color::BLACK,
        ]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !transport.frames().contains(&expected) {
            assert!(Instant::now() < deadline, "analyzer output never arrived");
            thread::sleep(Duration::from_millis(1));
        }

        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        app.run(rx).unwrap();
    }

    #[test]
    fn invalid_configuration_is_fatal() {
        let mut config = AppConfig::from_yaml_str(
            r#"
devices: []
control: { address: 127.0.0.1, port: 0 }
"#,
        )
        .unwrap();
        config.control = None;
        let transport = FakeTransport::new();
        assert!(Application::with_devices(&config, registry(&transport)).is_err());
    }
}
