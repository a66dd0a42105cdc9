use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use findn_led_controller::*;
use tracing::{debug, error, info, instrument, trace};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// MAC address or platform id of the strip
    #[arg(short, long)]
    address: String,

    /// Seconds of inactivity before the link is dropped
    #[arg(long, default_value_t = 120)]
    idle_timeout: u64,

    /// Override the write characteristic UUID
    #[arg(long)]
    characteristic: Option<Uuid>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Demonstration of LED features
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },
    /// Turn LED strip on
    On,
    /// Turn LED strip off
    Off,
    /// Set brightness
    Brightness {
        /// Brightness level (1-255)
        #[arg(short, long, default_value_t = 255)]
        level: u8,
    },
    /// Set color from hue and saturation
    Color {
        /// Hue in degrees (0-360)
        #[arg(long, default_value_t = 0.0)]
        hue: f64,
        /// Saturation in percent (0-100)
        #[arg(short, long, default_value_t = 100.0)]
        saturation: f64,
    },
    /// Set custom RGB color
    Rgb {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: u8,
    },
    /// Set effect (e.g. 5, -5 to run backwards, 0x0a)
    Effect {
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Connect and print the known state
    Status,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("findn_led_controller=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let mut config = ConnectionConfig {
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        ..ConnectionConfig::default()
    };
    if let Some(characteristic) = cli.characteristic {
        config.write_characteristic = characteristic;
    }

    let transport = match BtleplugTransport::new(BleConfig::default()).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to open Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };
    let device = LedDevice::new(transport, DeviceIdentity::new(cli.address), config);

    match cli.command.unwrap_or(Commands::Demo { duration: 5 }) {
        Commands::Demo { duration } => {
            run_demo(&device, duration).await?;
        }
        Commands::On => {
            device.turn_on().await?;
        }
        Commands::Off => {
            device.turn_off().await?;
        }
        Commands::Brightness { level } => {
            // We need to ensure the device is on for brightness changes to be visible
            device
                .turn_on_with(LightRequest {
                    brightness: Some(level),
                    ..LightRequest::default()
                })
                .await?;
        }
        Commands::Color { hue, saturation } => {
            device
                .turn_on_with(LightRequest {
                    hs: Some((hue, saturation)),
                    ..LightRequest::default()
                })
                .await?;
        }
        Commands::Rgb { red, green, blue } => {
            device.turn_on().await?;
            device.set_rgb_color(red, green, blue).await?;
        }
        Commands::Effect { value } => {
            let effect = parse_effect(&value)?;
            debug!("Using effect code: {}", effect);
            device
                .turn_on_with(LightRequest {
                    effect: Some(effect),
                    ..LightRequest::default()
                })
                .await?;
        }
        Commands::Status => {
            device.update().await?;
            let state = device.state();
            println!("device:     {} ({})", device.name(), device.address());
            println!("connection: {:?}", device.connection_state());
            println!("power:      {}", if state.power { "on" } else { "off" });
            println!("brightness: {}", state.brightness);
            println!("hs:         {:?}", state.hs);
            println!("effect:     {:?}", state.effect);
        }
    }

    device.stop().await?;
    Ok(())
}

/// Sleep for specified number of seconds
#[instrument]
async fn sleep(seconds: u64) {
    trace!("Sleeping for {}s", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    trace!("Sleep completed");
}

/// Run a demonstration of various LED strip features
#[instrument(skip(device))]
async fn run_demo(device: &LedDevice, duration: u64) -> Result<()> {
    info!("Running LED strip demo with {}s intervals", duration);

    info!("Turning LEDs off");
    device.turn_off().await?;
    sleep(duration).await;

    info!("Turning LEDs on");
    device.turn_on().await?;
    sleep(duration).await;

    for (name, hue) in [("red", 0.0), ("green", 120.0), ("blue", 240.0)] {
        info!("Setting color to {}", name);
        device.set_hs_color(hue, 100.0).await?;
        sleep(duration).await;
    }

    info!("Setting brightness to half");
    device.set_brightness(128).await?;
    sleep(duration).await;

    info!("Setting brightness to full");
    device.set_brightness(255).await?;
    sleep(duration).await;

    for effect in [1, -1, 5] {
        info!("Setting effect {}", effect);
        device.set_effect(effect).await?;
        sleep(duration).await;
    }

    info!("Back to static white");
    device.set_rgb_color(255, 255, 255).await?;
    sleep(1).await;

    info!("Turning LEDs off to end demo");
    device.turn_off().await?;

    info!("Demo completed!");
    Ok(())
}
