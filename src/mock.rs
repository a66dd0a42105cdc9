//! Scripted in-memory transport for exercising the session logic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time;
use uuid::Uuid;

use crate::transport::{DeviceIdentity, LinkEvents, Session, Transport, TransportError};

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    refreshes: AtomicUsize,
    write_attempts: AtomicUsize,
    written: Mutex<Vec<Vec<u8>>>,
    connect_delay: Mutex<Duration>,
    write_delay: Mutex<Duration>,
    disconnect_delay: Mutex<Duration>,
    connect_failures: Mutex<VecDeque<Option<TransportError>>>,
    write_failures: Mutex<VecDeque<Option<TransportError>>>,
    sticky_write_failure: Mutex<Option<TransportError>>,
    /// (cached before refresh, present after refresh)
    characteristic: Mutex<Option<(bool, bool)>>,
    current: Mutex<Option<(Arc<AtomicBool>, LinkEvents)>>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.shared.write_delay.lock() = delay;
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.shared.disconnect_delay.lock() = delay;
    }

    pub fn fail_next_connect(&self, err: TransportError) {
        self.shared.connect_failures.lock().push_back(Some(err));
    }

    /// Scripts the outcome of upcoming connects; `None` lets a connect through
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Option<TransportError>>) {
        self.shared.connect_failures.lock().extend(outcomes);
    }

    /// Scripts the outcome of upcoming writes; `None` lets a write through
    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = Option<TransportError>>) {
        self.shared.write_failures.lock().extend(outcomes);
    }

    pub fn fail_all_writes(&self, err: TransportError) {
        *self.shared.sticky_write_failure.lock() = Some(err);
    }

    /// Whether the write characteristic resolves before and after a refetch
    pub fn set_characteristic(&self, cached: bool, after_refresh: bool) {
        *self.shared.characteristic.lock() = Some((cached, after_refresh));
    }

    /// Simulates the link dropping on its own
    pub fn drop_link(&self) {
        if let Some((connected, events)) = self.shared.current.lock().clone() {
            connected.store(false, Ordering::SeqCst);
            events.disconnected();
        }
    }

    pub fn last_events(&self) -> Option<LinkEvents> {
        self.shared.current.lock().as_ref().map(|(_, events)| events.clone())
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.shared.refreshes.load(Ordering::SeqCst)
    }

    pub fn write_attempts(&self) -> usize {
        self.shared.write_attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect_with_retry(
        &self,
        _identity: &DeviceIdentity,
        events: LinkEvents,
    ) -> Result<MockSession, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        if let Some(Some(err)) = self.shared.connect_failures.lock().pop_front() {
            return Err(err);
        }
        let connected = Arc::new(AtomicBool::new(true));
        *self.shared.current.lock() = Some((connected.clone(), events.clone()));
        Ok(MockSession {
            shared: self.shared.clone(),
            connected,
            events,
            refreshed: AtomicBool::new(false),
        })
    }
}

pub(crate) struct MockSession {
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
    events: LinkEvents,
    refreshed: AtomicBool,
}

#[async_trait]
impl Session for MockSession {
    type Characteristic = Uuid;

    fn resolve_characteristic(&self, uuid: Uuid) -> Option<Uuid> {
        let (cached, after_refresh) = self.shared.characteristic.lock().unwrap_or((true, true));
        let present = if self.refreshed.load(Ordering::SeqCst) {
            after_refresh
        } else {
            cached
        };
        present.then_some(uuid)
    }

    async fn refresh_services(&self) -> Result<(), TransportError> {
        self.shared.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refreshed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_without_response(
        &self,
        _characteristic: &Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.shared.write_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.shared.write_delay.lock();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Link("not connected".into()));
        }
        if let Some(Some(err)) = self.shared.write_failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.shared.sticky_write_failure.lock().clone() {
            return Err(err);
        }
        self.shared.written.lock().push(data.to_vec());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.shared.disconnect_delay.lock();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.events.disconnected();
        Ok(())
    }
}
