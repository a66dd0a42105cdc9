/*!
 # Findn LED BLE Strip Controller Library

 A Rust library for controlling Findn Bluetooth LED strips.
 The strip speaks a small write-only protocol; this crate keeps a lazily
 established BLE session around it and hides reconnects, idle disconnects and
 per-command retries from the caller.

 ## Features

 * Power on/off control
 * Hue/saturation and RGB color control
 * Brightness adjustment
 * Effect selection with direction
 * Idle disconnect and transparent reconnect
 * Bounded retry with backoff on bus faults

 ## Example

 ```no_run
 use findn_led_controller::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let transport = BtleplugTransport::new(BleConfig::default()).await?;
     let identity = DeviceIdentity::new("AA:BB:CC:DD:EE:FF");
     let device = LedDevice::new(transport, identity, ConnectionConfig::default());

     device.turn_on().await?;
     device.set_hs_color(120.0, 100.0).await?; // Green
     device.set_brightness(128).await?;

     device.stop().await?;
     Ok(())
 }
 ```
*/

use thiserror::Error;
use uuid::Uuid;

/// Custom error types for the Findn LED controller library
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// Device absent, out of range or with too weak a signal
    #[error("Device not reachable: {0}")]
    NotReachable(String),

    /// Software/bus-layer hiccup; worth a backoff and a clean reconnect
    #[error("Transient BLE bus fault: {0}")]
    TransientBus(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    Transport(String),

    /// The write characteristic was never resolved on the connected device
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicMissing(Uuid),

    /// Value out of range
    #[error("Value {0} out of range ({1}..{2})")]
    ValueOutOfRange(u32, u32, u32),

    /// Hue or saturation outside the accepted range
    #[error("Invalid color: hue {hue}, saturation {saturation}")]
    InvalidColor { hue: f64, saturation: f64 },

    /// Effect value that cannot be encoded
    #[error("Invalid effect: {0}")]
    InvalidEffect(String),
}

impl Error {
    /// Whether a failed command attempt should be retried.
    ///
    /// Only transport faults are retried; a missing characteristic or a bad
    /// argument fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotReachable(_) | Error::TransientBus(_) | Error::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod ble;
pub mod color;
pub mod config;
pub mod connection;
pub mod device;
pub mod dispatcher;
pub mod protocol;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod mock;

// Re-export key types
pub use ble::{BleConfig, BtleplugTransport};
pub use config::ConnectionConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use device::{LedDevice, LightRequest, LightState};
pub use protocol::{parse_effect, Frame, DEFAULT_WRITE_CHARACTERISTIC};
pub use transport::{DeviceIdentity, LinkEvents, Session, Transport, TransportError};
