/*!
 # btleplug transport

 Connects to the strip through the host's default Bluetooth adapter.
*/

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::transport::{DeviceIdentity, LinkEvents, Session, Transport, TransportError};
use crate::{Error, Result};

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match &err {
            btleplug::Error::DeviceNotFound => TransportError::NotFound(err.to_string()),
            // Backend-specific failures, e.g. BlueZ D-Bus errors
            btleplug::Error::Other(_) => TransportError::Bus(err.to_string()),
            _ => TransportError::Link(err.to_string()),
        }
    }
}

/// Configuration for the btleplug transport
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Maximum time to scan for a device the adapter has not seen yet
    pub discovery_timeout: Duration,
    /// Connect attempts per session, first one included
    pub connect_attempts: u8,
    /// Base pause between connect attempts, grows linearly
    pub connect_backoff: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(250),
        }
    }
}

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapters = manager.adapters().await.map_err(TransportError::from)?;
    let Some(adapter) = adapters.into_iter().next() else {
        error!("No Bluetooth adapters found");
        return Err(Error::NoBluetoothAdapters);
    };
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

/// Transport backed by the system Bluetooth stack
pub struct BtleplugTransport {
    adapter: Adapter,
    config: BleConfig,
}

impl BtleplugTransport {
    /// Opens the default Bluetooth adapter
    #[instrument]
    pub async fn new(config: BleConfig) -> Result<Self> {
        let manager = Manager::new().await.map_err(TransportError::from)?;
        let adapter = get_central(&manager).await?;
        Ok(Self { adapter, config })
    }

    /// Finds the peripheral with a given MAC address or platform id,
    /// scanning for it if the adapter has not seen it yet
    async fn find_peripheral(&self, address: &str) -> std::result::Result<Peripheral, TransportError> {
        let known = self.adapter.peripherals().await?;
        if let Some(peripheral) = known.into_iter().find(|p| matches_address(p, address)) {
            return Ok(peripheral);
        }

        info!("Scanning for {}...", address);
        self.adapter.start_scan(ScanFilter::default()).await?;
        let found = self.poll_for(address).await;
        self.adapter.stop_scan().await?;

        found?.ok_or_else(|| {
            TransportError::NotFound(format!(
                "{} not seen within {} seconds",
                address,
                self.config.discovery_timeout.as_secs()
            ))
        })
    }

    async fn poll_for(&self, address: &str) -> std::result::Result<Option<Peripheral>, TransportError> {
        let start_time = Instant::now();
        loop {
            let peripherals = self.adapter.peripherals().await?;
            debug!("Found {} BLE peripherals so far", peripherals.len());
            if let Some(peripheral) = peripherals.into_iter().find(|p| matches_address(p, address)) {
                return Ok(Some(peripheral));
            }
            if start_time.elapsed() >= self.config.discovery_timeout {
                return Ok(None);
            }
            // Wait a moment before polling again
            time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Session = BtleplugSession;

    #[instrument(skip(self, events))]
    async fn connect_with_retry(
        &self,
        identity: &DeviceIdentity,
        events: LinkEvents,
    ) -> std::result::Result<BtleplugSession, TransportError> {
        let peripheral = self.find_peripheral(&identity.address).await?;
        let mut central_events = self.adapter.events().await?;

        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        while !peripheral.is_connected().await? {
            match peripheral.connect().await {
                Ok(()) => break,
                Err(err) if attempt < attempts => {
                    warn!(
                        "Connect to {} failed (attempt {}/{}): {}",
                        identity.display_name(),
                        attempt,
                        attempts,
                        err
                    );
                    time::sleep(self.config.connect_backoff * attempt as u32).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!("Discovering services...");
        peripheral.discover_services().await?;

        let id = peripheral.id();
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id) {
                    events.disconnected();
                    break;
                }
            }
        });

        Ok(BtleplugSession { peripheral })
    }
}

/// A connected btleplug peripheral
pub struct BtleplugSession {
    peripheral: Peripheral,
}

#[async_trait]
impl Session for BtleplugSession {
    type Characteristic = Characteristic;

    fn resolve_characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    async fn refresh_services(&self) -> std::result::Result<(), TransportError> {
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn write_without_response(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> std::result::Result<(), TransportError> {
        self.peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> std::result::Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
