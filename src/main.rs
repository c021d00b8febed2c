//! Entry point for `serial-udp-bridge`.
//!
//! Owns only process setup (logging, argument parsing, interrupt wiring);
//! the protocol lives in the library.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use serial_udp_bridge::cancel::spawn_interrupt_handler;
use serial_udp_bridge::config::{self, ConfigOverrides};
use serial_udp_bridge::transport::{available_ports, bind_endpoint, SerialLine};
use serial_udp_bridge::{Bridge, BridgeConfig, CancelController};

/// Forward UDP datagrams to a serial device and send its replies back.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Serial device (e.g. /dev/ttyUSB0 or COM4).
    #[arg(short, long)]
    device: Option<String>,

    /// Serial baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// UDP address to receive commands on (e.g. 0.0.0.0:11880).
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Bound on writing a command and reading its reply, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Largest accepted reply in bytes.
    #[arg(long)]
    max_frame: Option<usize>,

    /// JSON config file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every command and reply.
    #[arg(short, long)]
    verbose: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// List serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device: self.device.clone(),
            baud_rate: self.baud,
            bind: self.bind,
            cycle_timeout_ms: self.timeout_ms,
            max_frame_size: self.max_frame,
            log_frames: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout stays free for `--list-ports`.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.list_ports {
        return match available_ports() {
            Ok(ports) => {
                for (name, description) in ports {
                    println!("{}\t{}", name, description);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Failed to list serial ports: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match config::load(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BridgeConfig) -> serial_udp_bridge::Result<()> {
    let controller = CancelController::new();
    spawn_interrupt_handler(controller.clone());

    tracing::info!(
        "Starting to wait for commands on {} using a baud rate of {}",
        config.device,
        config.baud_rate
    );

    let serial = SerialLine::open(&config.device, config.baud_rate)?;
    let socket = bind_endpoint(config.bind).await?;

    let mut bridge = Bridge::from_config(serial, socket, controller.token(), &config);
    bridge.run().await
}
