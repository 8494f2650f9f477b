//! hidkey-gpio
//!
//! Runs a chase pattern on a HID keyboard's LEDs and logs modifier key
//! changes, using the keyboard as a GPIO port.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{ExitReason, ExitSignal, setup_logging};
use hidkey::config::{Config, parse_hex_id};
use hidkey::demo::{self, DemoOptions};
use hidkey::{HidGpio, RusbBus};
use protocol::InputMode;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hidkey-gpio")]
#[command(
    author,
    version,
    about = "hidkey-gpio - Use a USB HID keyboard as a GPIO port"
)]
#[command(long_about = "
Drives the LEDs of a USB keyboard as outputs and reads its modifier keys as
inputs. The default layout has 3 outputs (pins 1-3) and 4 inputs (pins 4-7).

EXAMPLES:
    # Run the chase demo with the default keyboard
    hidkey-gpio

    # Read inputs from the interrupt-fed cache
    hidkey-gpio --mode cached

    # Use another keyboard
    hidkey-gpio --vendor-id 0x046d --product-id 0xc31c

    # List USB devices and exit
    hidkey-gpio --list-devices

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/hidkey-gpio/config.toml
    3. /etc/hidkey-gpio/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Input mode (cached, polled)
    #[arg(short, long, value_name = "MODE")]
    mode: Option<InputMode>,

    /// Keyboard vendor id (e.g. 0x045e)
    #[arg(long, value_name = "VID")]
    vendor_id: Option<String>,

    /// Keyboard product id (e.g. 0x0750)
    #[arg(long, value_name = "PID")]
    product_id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitReason> {
    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitReason::Requested);
    }

    let mut config = if let Some(ref path) = args.config {
        let path = PathBuf::from(shellexpand::tilde(path).as_ref());
        Config::load(Some(path)).context("Failed to load configuration")?
    } else {
        Config::load_or_default().context("Failed to load configuration")?
    };
    apply_overrides(&mut config, &args)?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.app.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("hidkey-gpio v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let bus = RusbBus::new().map_err(|e| anyhow!("Failed to initialize USB: {}", e))?;

    if args.list_devices {
        list_devices(&bus)?;
        return Ok(ExitReason::Requested);
    }

    let exit = Arc::new(ExitSignal::new());
    let options = config.gpio_options();
    let gpio = match HidGpio::open(&bus, &options, exit.clone()) {
        Ok(gpio) => gpio,
        Err(e) => {
            error!("Failed to start: {}", e);
            return Ok(ExitReason::fatal(e.code()));
        }
    };

    let ctrl_c_exit = exit.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                ctrl_c_exit.signal(ExitReason::Requested);
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let demo_options = DemoOptions::from(&config.demo);
    let reason = tokio::task::spawn_blocking(move || {
        demo::run(&gpio, demo_options);
        gpio.shutdown()
    })
    .await
    .context("Control loop panicked")?;

    match reason {
        ExitReason::Requested => info!("Stopped"),
        ExitReason::Fatal(code) => error!("Stopped on fatal error ({})", code),
    }
    Ok(reason)
}

/// Command line values take precedence over the configuration file
fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(mode) = args.mode {
        config.input.mode = mode;
    }
    if let Some(ref vid) = args.vendor_id {
        config.device.vendor_id = parse_hex_id(vid, "VID").map_err(|e| anyhow!(e))?;
    }
    if let Some(ref pid) = args.product_id {
        config.device.product_id = parse_hex_id(pid, "PID").map_err(|e| anyhow!(e))?;
    }
    config.validate()
}

/// List USB devices and exit
fn list_devices(bus: &RusbBus) -> Result<()> {
    let devices = bus
        .list_devices()
        .map_err(|e| anyhow!("Failed to enumerate USB devices: {}", e))?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {:04x}:{:04x} - {} {}",
            device.vendor_id,
            device.product_id,
            device
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03} Class: {:#04x}",
            device.bus_number, device.device_address, device.class
        );
        println!();
    }

    Ok(())
}
