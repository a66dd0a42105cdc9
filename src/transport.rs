/*!
 # Transport capability

 The session logic never talks to a Bluetooth stack directly. It asks a
 [`Transport`] for a connected [`Session`], writes frames through it, and
 learns about link loss through [`LinkEvents`].
*/

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Error;

/// Faults reported by a transport
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Device absent, out of range or not advertising
    #[error("device not found: {0}")]
    NotFound(String),

    /// Software/bus-layer error, e.g. a D-Bus hiccup in BlueZ
    #[error("bus error: {0}")]
    Bus(String),

    /// Any other link or GATT failure
    #[error("link error: {0}")]
    Link(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(msg) => Error::NotReachable(msg),
            TransportError::Bus(msg) => Error::TransientBus(msg),
            TransportError::Link(msg) => Error::Transport(msg),
        }
    }
}

/// Who the device is, as last seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// MAC address or platform peripheral id
    pub address: String,
    /// Advertised local name
    pub name: Option<String>,
    /// Signal strength of the last advertisement
    pub rssi: Option<i16>,
}

impl DeviceIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name to show and log; falls back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Something that happened to a link outside of a call into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    Disconnected { generation: u64 },
}

/// Handle a transport uses to report that a session's link went down.
///
/// Each handle is bound to the session it was issued for.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { generation, tx }
    }

    /// Reports that the link dropped. Safe to call more than once.
    pub fn disconnected(&self) {
        // The receiver is gone once the device itself has been dropped
        let _ = self.tx.send(LinkEvent::Disconnected {
            generation: self.generation,
        });
    }
}

/// Establishes sessions with one peripheral
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Connects to the device, retrying internally as the transport sees fit.
    ///
    /// `events` must be signalled whenever the link of the returned session
    /// goes down.
    async fn connect_with_retry(
        &self,
        identity: &DeviceIdentity,
        events: LinkEvents,
    ) -> Result<Self::Session, TransportError>;
}

/// A connected link with its discovered GATT services
#[async_trait]
pub trait Session: Send + Sync + 'static {
    type Characteristic: Clone + Send + Sync + 'static;

    /// Looks a characteristic up in the services discovered so far
    fn resolve_characteristic(&self, uuid: Uuid) -> Option<Self::Characteristic>;

    /// Discovers services again, bypassing any cache
    async fn refresh_services(&self) -> Result<(), TransportError>;

    /// Writes without waiting for an acknowledgement
    async fn write_without_response(
        &self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
