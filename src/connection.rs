/*!
 # Connection lifecycle

 Owns the physical link to one device: connects on demand, drops the link
 after a period of inactivity, and notices when the link is lost on its own.
 Connecting and disconnecting share one lock, so a firing idle timer can never
 race an explicit disconnect or a concurrent connect.
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::protocol::Frame;
use crate::transport::{DeviceIdentity, LinkEvent, LinkEvents, Session, Transport};
use crate::{Error, Result};

/// Observable phase of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A live session together with its resolved write characteristic
pub struct Link<S: Session> {
    generation: u64,
    session: S,
    write_uuid: Uuid,
    write_char: Option<S::Characteristic>,
}

impl<S: Session> Link<S> {
    /// Writes every frame in order, without waiting for acknowledgements
    pub async fn write_frames(&self, frames: &[Frame]) -> Result<()> {
        let characteristic = self
            .write_char
            .as_ref()
            .ok_or(Error::CharacteristicMissing(self.write_uuid))?;
        for frame in frames {
            self.session
                .write_without_response(characteristic, frame.as_bytes())
                .await?;
        }
        Ok(())
    }

    pub fn has_write_characteristic(&self) -> bool {
        self.write_char.is_some()
    }
}

struct IdleTimer {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    identity: RwLock<DeviceIdentity>,
    /// Connect domain: held for the whole of a connect or a disconnect
    connect_lock: tokio::sync::Mutex<()>,
    link: Mutex<Option<Arc<Link<T::Session>>>>,
    connecting: AtomicBool,
    expected_disconnect: AtomicBool,
    link_generation: AtomicU64,
    completed_attempts: AtomicU64,
    last_connect_error: Mutex<Option<Error>>,
    idle_timer: Mutex<Option<IdleTimer>>,
    timer_generation: AtomicU64,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
}

/// Manages the link to a single device
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, identity: DeviceIdentity, config: ConnectionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                identity: RwLock::new(identity),
                connect_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(None),
                connecting: AtomicBool::new(false),
                expected_disconnect: AtomicBool::new(false),
                link_generation: AtomicU64::new(0),
                completed_attempts: AtomicU64::new(0),
                last_connect_error: Mutex::new(None),
                idle_timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.inner.identity.read().clone()
    }

    /// Replaces name and signal strength from a fresh advertisement
    pub fn set_advertisement(&self, name: Option<String>, rssi: Option<i16>) {
        let mut identity = self.inner.identity.write();
        identity.name = name;
        identity.rssi = rssi;
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else if self.inner.link.lock().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Returns a live link, connecting first if there is none.
    ///
    /// Every successful call rearms the idle timer.
    pub async fn ensure_connected(&self) -> Result<Arc<Link<T::Session>>> {
        self.inner.ensure_connected().await
    }

    /// Drops the link, if any. Counts as an expected disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }
}

impl<T: Transport> Inner<T> {
    async fn live_link(&self) -> Option<Arc<Link<T::Session>>> {
        let link = self.link.lock().clone()?;
        link.session.is_connected().await.then_some(link)
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<Link<T::Session>>> {
        let observed_attempts = self.completed_attempts.load(Ordering::SeqCst);
        if self.connect_lock.try_lock().is_err() {
            let identity = self.identity.read();
            debug!(
                "{}: Connection already in progress, waiting for it to complete; RSSI: {:?}",
                identity.display_name(),
                identity.rssi
            );
        }
        if let Some(link) = self.live_link().await {
            self.reset_idle_timer();
            return Ok(link);
        }

        let _guard = self.connect_lock.lock().await;
        // Check again while holding the lock
        if let Some(link) = self.live_link().await {
            self.reset_idle_timer();
            return Ok(link);
        }
        if self.completed_attempts.load(Ordering::SeqCst) != observed_attempts {
            if let Some(err) = self.last_connect_error.lock().clone() {
                // The attempt we waited on failed; share its outcome
                return Err(err);
            }
        }

        self.connecting.store(true, Ordering::SeqCst);
        let result = self.establish().await;
        self.connecting.store(false, Ordering::SeqCst);
        self.completed_attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_connect_error.lock() = result.as_ref().err().cloned();

        let link = result?;
        *self.link.lock() = Some(link.clone());
        self.reset_idle_timer();
        Ok(link)
    }

    #[instrument(skip(self))]
    async fn establish(self: &Arc<Self>) -> Result<Arc<Link<T::Session>>> {
        self.start_event_listener();

        let identity = self.identity.read().clone();
        let name = identity.display_name();
        debug!("{}: Connecting; RSSI: {:?}", name, identity.rssi);

        let generation = self.link_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let events = LinkEvents::new(generation, self.events_tx.clone());
        let session = self
            .transport
            .connect_with_retry(&identity, events)
            .await
            .map_err(Error::from)?;
        info!("{}: Connected; RSSI: {:?}", name, identity.rssi);

        let write_uuid = self.config.write_characteristic;
        let mut write_char = session.resolve_characteristic(write_uuid);
        if write_char.is_none() {
            // Services sometimes fail to load on the first pass
            debug!("{}: Write characteristic not resolved, refetching services", name);
            if let Err(err) = session.refresh_services().await {
                if let Err(disconnect_err) = session.disconnect().await {
                    warn!("{}: Failed to drop half-set-up link: {}", name, disconnect_err);
                }
                return Err(err.into());
            }
            write_char = session.resolve_characteristic(write_uuid);
        }
        if write_char.is_none() {
            warn!("{}: Write characteristic {} not found", name, write_uuid);
        }

        Ok(Arc::new(Link {
            generation,
            session,
            write_uuid,
            write_char,
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        self.disconnect_locked().await
    }

    /// Tears the link down. The caller holds `connect_lock`.
    async fn disconnect_locked(&self) -> Result<()> {
        self.cancel_idle_timer();
        self.expected_disconnect.store(true, Ordering::SeqCst);
        let link = self.link.lock().take();
        let Some(link) = link else {
            return Ok(());
        };
        if link.session.is_connected().await {
            link.session.disconnect().await?;
        }
        debug!("{}: Disconnected", self.identity.read().display_name());
        Ok(())
    }

    fn reset_idle_timer(self: &Arc<Self>) {
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.config.idle_timeout;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.idle_timeout_fired(generation).await;
            }
        });

        self.expected_disconnect.store(false, Ordering::SeqCst);
        if let Some(previous) = self.idle_timer.lock().replace(IdleTimer { generation, task }) {
            previous.task.abort();
        }
    }

    fn cancel_idle_timer(&self) {
        if let Some(timer) = self.idle_timer.lock().take() {
            timer.task.abort();
        }
    }

    async fn idle_timeout_fired(&self, generation: u64) {
        {
            let mut slot = self.idle_timer.lock();
            if slot.as_ref().map(|timer| timer.generation) != Some(generation) {
                return;
            }
            // Detach ourselves so the disconnect below cannot abort us
            slot.take();
        }
        let _guard = self.connect_lock.lock().await;
        if self.timer_generation.load(Ordering::SeqCst) != generation {
            // A connect finished while we waited and armed a fresh timer
            return;
        }
        debug!(
            "{}: Disconnecting after timeout of {:?}",
            self.identity.read().display_name(),
            self.config.idle_timeout
        );
        if let Err(err) = self.disconnect_locked().await {
            warn!("{}: Idle disconnect failed: {}", self.identity.read().display_name(), err);
        }
    }

    fn start_event_listener(self: &Arc<Self>) {
        let Some(rx) = self.events_rx.lock().take() else {
            return;
        };
        tokio::spawn(listen_for_link_events(Arc::downgrade(self), rx));
    }

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Disconnected { generation } => {
                let identity = self.identity.read();
                let mut slot = self.link.lock();
                let current = slot
                    .as_ref()
                    .is_some_and(|link| link.generation == generation);
                if !current || self.expected_disconnect.load(Ordering::SeqCst) {
                    debug!(
                        "{}: Disconnected from device; RSSI: {:?}",
                        identity.display_name(),
                        identity.rssi
                    );
                    return;
                }
                warn!(
                    "{}: Device unexpectedly disconnected; RSSI: {:?}",
                    identity.display_name(),
                    identity.rssi
                );
                // Reconnecting is left to the next caller
                slot.take();
                drop(slot);
                self.cancel_idle_timer();
            }
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.cancel_idle_timer();
    }
}

async fn listen_for_link_events<T: Transport>(
    inner: Weak<Inner<T>>,
    mut rx: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_link_event(event);
    }
}
