use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};

use atmolight_core::{
    transport_for, AppConfig, Application, Color, DeviceKind, LightDevice, StripDevice,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Channel count assumed for DotStar strips when none is given.
const DEFAULT_DOTSTAR_CHANNELS: usize = 256;

fn main() -> atmolight_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config),
        Commands::Set(args) => set(&args),
        Commands::Check { config } => check(&config),
    }
}

fn run(config: &Path) -> atmolight_core::Result<()> {
    tracing::info!(config = %config.display(), "starting atmolight");
    let config = AppConfig::from_file(config)?;
    let app = Application::new(&config)?;

    let (shutdown, shutdown_requested) = mpsc::channel();
    let interrupts = Interrupts::new(shutdown);
    ctrlc::set_handler(move || {
        if interrupts.interrupt() {
            tracing::warn!("interrupted again, exiting immediately");
            std::process::exit(EXIT_INTERRUPTED);
        }
    })
    .map_err(|e| atmolight_core::AtmoError::msg(format!("cannot install Ctrl-C handler: {e}")))?;

    app.run(shutdown_requested)
}

/// Exit status for a forced shutdown (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

/// The first interrupt requests a graceful shutdown, any further one asks
/// for an immediate exit.
struct Interrupts {
    shutdown: Sender<()>,
    requested: AtomicBool,
}

impl Interrupts {
    fn new(shutdown: Sender<()>) -> Self {
        Self {
            shutdown,
            requested: AtomicBool::new(false),
        }
    }

    /// Returns `true` if shutdown had already been requested.
    fn interrupt(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return true;
        }
        tracing::info!("interrupted, shutting down (press Ctrl-C again to force)");
        let _ = self.shutdown.send(());
        false
    }
}

fn set(args: &SetArgs) -> atmolight_core::Result<()> {
    let kind = DeviceKind::from(args.kind);
    let channels = args
        .channels
        .or_else(|| kind.default_channels())
        .unwrap_or(DEFAULT_DOTSTAR_CHANNELS);
    let color = Color::new(args.red, args.green, args.blue);
    tracing::info!(%kind, device = %args.device, channels, ?color, "setting device");

    let transport = transport_for(kind, &args.device);
    let mut device = StripDevice::connect(kind, transport, channels)?;
    match args.channel {
        Some(channel) => device.set_channel(channel, color),
        None => device.set_channels(&vec![color; device.channel_count()]),
    }
}

fn check(config: &Path) -> atmolight_core::Result<()> {
    let config = AppConfig::from_file(config)?;
    for (index, device) in config.device_infos()?.iter().enumerate() {
        println!("{index}: {} ({} channels)", device.name, device.channels);
    }
    if let Some(control) = &config.control {
        println!("control: {}:{}", control.address, control.port);
    }
    if let Some(analyzer) = &config.analyzer {
        println!(
            "analyzer: {} ({}x{})",
            analyzer.capture.filename.display(),
            analyzer.capture.width,
            analyzer.capture.height
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ambient lighting for serial and SPI light devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon until interrupted.
    Run {
        /// YAML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Set a single device to a color, without the daemon.
    Set(SetArgs),
    /// Validate a configuration file and print what it describes.
    Check {
        /// YAML configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct SetArgs {
    /// The device type.
    #[arg(short = 't', long = "type", value_enum)]
    kind: KindArg,
    /// The device file to connect to.
    #[arg(short, long)]
    device: String,
    /// Number of channels, defaults to the maximum the device supports.
    #[arg(short = 'n', long)]
    channels: Option<usize>,
    /// Only set this channel; all channels otherwise.
    #[arg(short, long)]
    channel: Option<usize>,
    /// Red intensity.
    #[arg(short, long, default_value_t = 0)]
    red: u8,
    /// Green intensity.
    #[arg(short, long, default_value_t = 0)]
    green: u8,
    /// Blue intensity.
    #[arg(short, long, default_value_t = 0)]
    blue: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Atmolight,
    Karatelight,
    Dotstar,
}

impl From<KindArg> for DeviceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Atmolight => DeviceKind::AtmoLight,
            KindArg::Karatelight => DeviceKind::KarateLight,
            KindArg::Dotstar => DeviceKind::DotStar,
        }
    }
}
