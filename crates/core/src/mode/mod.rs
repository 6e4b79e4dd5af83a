use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{Analyzer, AtmoError, CaptureFactory, Devices, Mappings, Result};

/// The two mutually exclusive operating regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Devices are driven by manual commands only.
    Control,
    /// An analyzer pipeline continuously drives the devices.
    Analyzer,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Control => "control",
            Mode::Analyzer => "analyzer",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = AtmoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control" => Ok(Mode::Control),
            "analyzer" => Ok(Mode::Analyzer),
            other => Err(AtmoError::request(format!("unknown mode '{other}'"))),
        }
    }
}

/// Everything needed to start a fresh analyzer pipeline.
pub struct AnalyzerSetup {
    pub capture: Box<dyn CaptureFactory>,
    pub mappings: Mappings,
}

impl AnalyzerSetup {
    pub fn new(capture: Box<dyn CaptureFactory>, mappings: Mappings) -> Self {
        Self { capture, mappings }
    }
}

struct ModeState {
    mode: Mode,
    analyzer: Option<Analyzer>,
}

/// Switches between manual control and automatic analysis.
///
/// Transitions hold the controller's lock for their whole duration, so two
/// concurrent `set_mode` calls never interleave.
pub struct ModeController {
    devices: Arc<Devices>,
    setup: Option<AnalyzerSetup>,
    control_enabled: bool,
    state: Mutex<ModeState>,
}

impl ModeController {
    /// Starts the analyzer right away if one is configured.
    pub fn new(
        devices: Arc<Devices>,
        setup: Option<AnalyzerSetup>,
        control_enabled: bool,
    ) -> Result<Self> {
        if setup.is_none() && !control_enabled {
            return Err(AtmoError::config(
                "neither a control surface nor an analyzer is configured",
            ));
        }

        let analyzer = match &setup {
            Some(setup) => Some(Self::start_analyzer(&devices, setup)?),
            None => None,
        };
        let mode = if analyzer.is_some() {
            Mode::Analyzer
        } else {
            Mode::Control
        };
        tracing::info!(%mode, "initial mode");

        Ok(Self {
            devices,
            setup,
            control_enabled,
            state: Mutex::new(ModeState { mode, analyzer }),
        })
    }

    /// Modes that are configured and may be passed to [`set_mode`](Self::set_mode).
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes = Vec::with_capacity(2);
        if self.control_enabled {
            modes.push(Mode::Control);
        }
        if self.setup.is_some() {
            modes.push(Mode::Analyzer);
        }
        modes
    }

    pub fn mode(&self) -> Result<Mode> {
        Ok(self.lock()?.mode)
    }

    /// Switching to `Control` joins the running analyzer before every device
    /// is cleared. Requesting the active mode does nothing.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut state = self.lock()?;
        if state.mode == mode {
            tracing::info!(%mode, "mode already active");
            return Ok(());
        }

        match mode {
            Mode::Control => {
                if let Some(analyzer) = state.analyzer.take() {
                    analyzer.stop();
                }
                state.mode = Mode::Control;
                tracing::info!(%mode, "switched mode");
                self.devices.clear()
            }
            Mode::Analyzer => {
                let setup = self
                    .setup
                    .as_ref()
                    .ok_or(AtmoError::ModeUnavailable(Mode::Analyzer))?;
                state.analyzer = Some(Self::start_analyzer(&self.devices, setup)?);
                state.mode = Mode::Analyzer;
                tracing::info!(%mode, "switched mode");
                Ok(())
            }
        }
    }

    /// Stops the analyzer, if any, without clearing the devices.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(analyzer) = state.analyzer.take() {
            analyzer.stop();
        }
        Ok(())
    }

    fn start_analyzer(devices: &Arc<Devices>, setup: &AnalyzerSetup) -> Result<Analyzer> {
        let capture = setup.capture.open()?;
        Analyzer::start(capture, Arc::clone(devices), setup.mappings.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ModeState>> {
        self.state
            .lock()
            .map_err(|_| AtmoError::msg("mode controller has been poisoned"))
    }
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("modes", &self.modes())
            .field("mode", &self.state.try_lock().ok().map(|state| state.mode))
            .finish()
    }
}
