use std::{env, io, process};

use findn_led_controller::*;
use tracing_subscriber::EnvFilter;

fn read_line() -> io::Result<Option<String>> {
    let mut input = String::new();
    let read = io::stdin().read_line(&mut input)?;
    Ok((read > 0).then_some(input))
}

fn parse_list<T: std::str::FromStr>(args: Option<&str>, count: usize) -> Option<Vec<T>> {
    let values: Vec<T> = args?
        .split(',')
        .map(|s| s.trim().parse().ok())
        .collect::<Option<_>>()?;
    (values.len() == count).then_some(values)
}

async fn execute(device: &LedDevice, line: &str) -> std::result::Result<(), String> {
    let mut cmd = line.trim().splitn(2, ':');
    let result = match cmd.next() {
        Some("power_on") => device.turn_on().await,
        Some("power_off") => device.turn_off().await,
        Some("set_brightness") => {
            let Some(level) = parse_list::<u8>(cmd.next(), 1) else {
                return Err("Brightness must be between 1 and 255".into());
            };
            device.set_brightness(level[0]).await
        }
        Some("set_hs") => {
            let Some(hs) = parse_list::<f64>(cmd.next(), 2) else {
                return Err("Invalid color format. Use H,S (e.g., 120,100 for green)".into());
            };
            device.set_hs_color(hs[0], hs[1]).await
        }
        Some("set_color") => {
            let Some(rgb) = parse_list::<u8>(cmd.next(), 3) else {
                return Err("Invalid color format. Use R,G,B (e.g., 255,0,0 for red)".into());
            };
            device.set_rgb_color(rgb[0], rgb[1], rgb[2]).await
        }
        Some("set_effect") => match parse_effect(cmd.next().unwrap_or_default()) {
            Ok(effect) => device.set_effect(effect).await,
            Err(e) => Err(e),
        },
        Some("update") => device.update().await,
        Some("stop") => device.stop().await,
        Some("") | None => return Err("No command given".into()),
        Some(other) => return Err(format!("Unknown command: {other}")),
    };
    result.map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    // Get a target id/mac address from command line arguments.
    // If not provided, exit.
    let usage = "Usage: findnd <id/mac address>";
    let args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{usage}");
        process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        eprintln!("{usage}");
        process::exit(0);
    }

    // Logs go to stderr so stdout stays a clean OK/ERR channel
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("findn_led_controller=warn")),
        )
        .with_writer(io::stderr)
        .init();
    color_eyre::install()?;

    let transport = BtleplugTransport::new(BleConfig::default()).await?;
    let device = LedDevice::new(
        transport,
        DeviceIdentity::new(args[1].as_str()),
        ConnectionConfig::default(),
    );

    // Inform about successful initialization
    println!("OK");

    // Mainloop: wait for user input, line by line. The session stays open
    // between commands until it idles out.
    loop {
        let Some(line) = tokio::task::spawn_blocking(read_line).await?? else {
            break;
        };
        match execute(&device, &line).await {
            Ok(()) => println!("OK"),
            Err(e) => println!("ERR {e}"),
        }
    }

    device.stop().await?;
    Ok(())
}
