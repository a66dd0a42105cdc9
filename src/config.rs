/*!
 # Session configuration

 Timings that govern how long an idle link is kept and how failed commands are
 retried, plus the characteristic commands are written to.
*/

use std::time::Duration;

use uuid::Uuid;

use crate::protocol::DEFAULT_WRITE_CHARACTERISTIC;

/// Configuration for one device session
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time without commands after which the link is dropped
    pub idle_timeout: Duration,
    /// Pause after a transient bus fault before reconnecting
    pub bus_backoff: Duration,
    /// Total attempts per command, first one included
    pub max_attempts: u8,
    /// UUID of the characteristic frames are written to
    pub write_characteristic: Uuid,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            bus_backoff: Duration::from_millis(250),
            max_attempts: 3,
            write_characteristic: DEFAULT_WRITE_CHARACTERISTIC,
        }
    }
}
