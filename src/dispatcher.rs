/*!
 # Command dispatch

 Serializes commands on the wire and recovers from transport faults by tearing
 the link down and trying again, up to a fixed number of attempts.
*/

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, error, instrument, warn};

use crate::connection::ConnectionManager;
use crate::protocol::Frame;
use crate::retry::Retry;
use crate::transport::Transport;
use crate::{Error, Result};

/// Sends frame sequences to the device one command at a time
pub struct CommandDispatcher<T: Transport> {
    connection: Arc<ConnectionManager<T>>,
    /// Operation domain: held while one command is on the wire
    operation_lock: tokio::sync::Mutex<()>,
    retry: Retry,
    bus_backoff: Duration,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(connection: Arc<ConnectionManager<T>>) -> Self {
        let config = connection.config();
        let retry = Retry::new(config.max_attempts);
        let bus_backoff = config.bus_backoff;
        Self {
            connection,
            operation_lock: tokio::sync::Mutex::new(()),
            retry,
            bus_backoff,
        }
    }

    /// Writes `frames` in order as one command
    pub async fn send(&self, frames: &[Frame]) -> Result<()> {
        self.send_then(frames, || ()).await
    }

    /// Writes `frames` in order as one command, then runs `on_sent` before
    /// the next command may start.
    ///
    /// `on_sent` runs only if every frame was written.
    #[instrument(skip(self, on_sent))]
    pub async fn send_then<R>(&self, frames: &[Frame], on_sent: impl FnOnce() -> R) -> Result<R> {
        self.connection.ensure_connected().await?;

        let identity = self.connection.identity();
        let name = identity.display_name();
        debug!("{}: Sending commands {:?}", name, frames);

        let _guard = match self.operation_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(
                    "{}: Operation already in progress, waiting for it to complete; RSSI: {:?}",
                    name, identity.rssi
                );
                self.operation_lock.lock().await
            }
        };

        let result = self
            .retry
            .run(
                move |attempt| self.attempt(frames, attempt),
                Error::is_retryable,
            )
            .await;

        match result {
            Ok(()) => Ok(on_sent()),
            Err(err) => {
                match &err {
                    Error::NotReachable(_) => error!(
                        "{}: device not found, no longer in range, or poor RSSI: {:?}",
                        name, identity.rssi
                    ),
                    Error::CharacteristicMissing(_) => error!(
                        "{}: write characteristic missing; RSSI: {:?}",
                        name, identity.rssi
                    ),
                    Error::TransientBus(_) | Error::Transport(_) => {
                        error!("{}: communication failed: {}", name, err)
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    async fn attempt(&self, frames: &[Frame], attempt: u8) -> Result<()> {
        let link = self.connection.ensure_connected().await?;
        let result = link.write_frames(frames).await;
        // Release our hold on the session before tearing it down
        drop(link);

        match result {
            Err(err @ Error::TransientBus(_)) => {
                time::sleep(self.bus_backoff).await;
                debug!(
                    "Attempt {}: backing off {:?}; disconnecting due to error: {}",
                    attempt, self.bus_backoff, err
                );
                self.reset_link().await;
                Err(err)
            }
            Err(err @ (Error::Transport(_) | Error::NotReachable(_))) => {
                debug!("Attempt {}: disconnecting due to error: {}", attempt, err);
                self.reset_link().await;
                Err(err)
            }
            other => other,
        }
    }

    async fn reset_link(&self) {
        if let Err(err) = self.connection.disconnect().await {
            warn!("Failed to disconnect after write error: {}", err);
        }
    }
}
