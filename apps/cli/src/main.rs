use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use miassist_core::checksum;
use miassist_core::{FlashEvent, FlashObserver, RecoverySession, SessionConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Xiaomi Mi Assistant recovery flash tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML session config
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe for a device in Mi Assistant recovery mode
    Detect,
    /// Read the device identity fields
    Info,
    /// List the official ROM packages flashable on this device
    ListRoms,
    /// Validate a recovery ROM package and flash it
    Flash {
        file: PathBuf,
        /// Skip the data-erase confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Sideload a package with an explicit validation token
    Sideload {
        file: PathBuf,
        #[arg(long)]
        token: String,
    },
    /// Wipe userdata, then reboot
    FormatData,
    /// Reboot out of recovery
    Reboot,
    /// Print the MD5 checksum of a package
    Md5 { file: PathBuf },
}

/// Observer that renders sideload progress on the console.
struct ConsoleObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleObserver {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl FlashObserver for ConsoleObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::Progress { sent, total } => {
                let mut guard = self.bar.lock().unwrap();
                let bar = guard.get_or_insert_with(|| {
                    let bar = ProgressBar::new(*total);
                    bar.set_style(
                        ProgressStyle::with_template(
                            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
                        )
                        .unwrap(),
                    );
                    bar
                });
                bar.set_position(*sent);
            }
            FlashEvent::DeviceMessage { text } => {
                if let Some(bar) = self.bar.lock().unwrap().take() {
                    bar.finish_and_clear();
                }
                println!("\n{text}\n");
            }
            FlashEvent::Connected { banner, .. } => {
                info!(%banner, "connected");
            }
            _ => {}
        }
    }
}

const NO_DEVICE_HINT: &str =
    "No device found. Put the device in recovery/Mi Assistant mode and connect it via USB.";

fn open_session(config: SessionConfig) -> Result<RecoverySession<ConsoleObserver>> {
    RecoverySession::open_with_observer(config, Arc::new(ConsoleObserver::new()))
        .context(NO_DEVICE_HINT)
}

fn read_identity(
    session: &mut RecoverySession<ConsoleObserver>,
) -> Result<miassist_core::DeviceInfo> {
    let handshake = session.handshake().context("ADB connect failed")?;
    session
        .read_identity(&handshake)
        .context("Identity queries failed")
}

fn flash(
    config: SessionConfig,
    file: &Path,
    assume_yes: bool,
) -> Result<()> {
    let md5 = checksum::md5_file(file)
        .with_context(|| format!("Failed to compute MD5 for {}", file.display()))?;
    info!(%md5, "package checksum");

    let mut session = open_session(config)?;
    let info = read_identity(&mut session)?;

    let validation = session
        .request_validation(&info, &md5)
        .context("OTA validation failed")?;

    if validation.erase && !assume_yes {
        eprintln!(
            "NOTICE: Data will be erased during flashing. Press Enter to continue (or Ctrl-C to abort)..."
        );
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }

    let outcome = session
        .sideload(file, &validation.token)
        .context("Sideload failed")?;
    if outcome.message.is_none() {
        println!("Transfer complete ({} bytes sent)", outcome.bytes_sent);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match &cli.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Detect => {
            let _session = open_session(config)?;
            println!("Device detected (recovery interface claimed)");
        }
        Commands::Info => {
            let mut session = open_session(config)?;
            let info = read_identity(&mut session)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::ListRoms => {
            let mut session = open_session(config)?;
            let info = read_identity(&mut session)?;
            let roms = session
                .list_roms(&info)
                .context("OTA listing failed")?;
            println!("{}", serde_json::to_string_pretty(&roms)?);
        }
        Commands::Flash { file, yes } => flash(config, &file, yes)?,
        Commands::Sideload { file, token } => {
            let mut session = open_session(config)?;
            session.handshake().context("ADB connect failed")?;
            let outcome = session
                .sideload(&file, &token)
                .context("Sideload failed")?;
            if outcome.message.is_none() {
                println!("Transfer complete ({} bytes sent)", outcome.bytes_sent);
            }
        }
        Commands::FormatData => {
            let mut session = open_session(config)?;
            session.handshake().context("ADB connect failed")?;
            let reply = session.format_data().context("format-data failed")?;
            println!("{reply}");
            let reply = session.reboot().context("reboot failed")?;
            println!("{reply}");
        }
        Commands::Reboot => {
            let mut session = open_session(config)?;
            session.handshake().context("ADB connect failed")?;
            let reply = session.reboot().context("reboot failed")?;
            println!("{reply}");
        }
        Commands::Md5 { file } => {
            println!("{}", checksum::md5_file(&file)?);
        }
    }
    Ok(())
}
