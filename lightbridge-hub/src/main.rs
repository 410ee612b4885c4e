use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lightbridge_hub::Config;
use lightbridge_hub::topics::parse_rgb;
use lightbridge_proto::{Command, Registry, products};

#[derive(Parser)]
#[command(name = "lightbridge")]
#[command(about = "Bridges BLE lights to an MQTT home-automation hub")]
struct Cli {
    /// Config file [default: $LIGHTBRIDGE_HOME/config.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured lights and serve bus commands
    Run,
    /// List advertising peripherals
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Print the bytes a command encodes to
    Frame {
        /// Product id, e.g. govee-gu10
        product: String,
        #[command(subcommand)]
        command: FrameCommand,
    },
}

#[derive(Subcommand)]
enum FrameCommand {
    On,
    Off,
    Brightness { percent: u8 },
    /// Color as r,g,b
    Color { rgb: String },
    ColorTemp { mireds: u32 },
    KeepAlive,
}

impl FrameCommand {
    fn to_command(&self) -> Result<Command, String> {
        Ok(match self {
            FrameCommand::On => Command::Power(true),
            FrameCommand::Off => Command::Power(false),
            FrameCommand::Brightness { percent } => Command::Brightness(*percent),
            FrameCommand::Color { rgb } => {
                let (red, green, blue) =
                    parse_rgb(rgb).ok_or_else(|| format!("invalid color {rgb:?}, expected r,g,b"))?;
                Command::Color { red, green, blue }
            }
            FrameCommand::ColorTemp { mireds } => Command::ColorTemperature { mireds: *mireds },
            FrameCommand::KeepAlive => Command::KeepAlive,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            info!(config = %path.display(), devices = config.devices.len(), "starting");

            tokio::select! {
                result = lightbridge_hub::run(config) => result?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
        Commands::Scan { duration } => {
            let registry = registry(cli.config.as_deref())?;
            println!("Scanning for {duration} seconds...");

            let found = lightbridge_hub::btle::scan(Duration::from_secs(duration)).await?;
            println!("\nFound {} devices:", found.len());
            for p in found {
                let rssi = p
                    .rssi
                    .map(|r| format!("{r} dBm"))
                    .unwrap_or_else(|| "N/A".to_string());
                let product = registry
                    .resolve_profile(&p.name)
                    .map(|profile| format!(" [{}]", profile.id))
                    .unwrap_or_default();
                let configured = registry
                    .resolve_config(&p.address)
                    .map(|device| format!(" as {}", device.unique_id))
                    .unwrap_or_default();
                println!("  {} ({}) RSSI: {rssi}{product}{configured}", p.name, p.address);
            }
        }
        Commands::Frame { product, command } => {
            let registry = registry(cli.config.as_deref())?;
            let profile = registry
                .product(&product)
                .ok_or_else(|| format!("unknown product {product:?}"))?;
            let bytes = profile.frame(&command.to_command()?)?;
            println!("{}", data_encoding::HEXLOWER.encode(&bytes));
        }
    }

    Ok(())
}

/// Products and devices from the config file if there is one, otherwise just
/// the built-in products
fn registry(explicit: Option<&Path>) -> Result<Registry, Box<dyn std::error::Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = Config::default_path()?;
            if !path.exists() {
                return Ok(Registry::new(products::builtin(), vec![]));
            }
            path
        }
    };
    Ok(Config::load(&path)?.registry())
}
