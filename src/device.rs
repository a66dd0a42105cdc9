use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::ble::BtleplugTransport;
use crate::color;
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::CommandDispatcher;
use crate::protocol::{self, Frame};
use crate::transport::{DeviceIdentity, Transport};
use crate::Result;

/// What the strip was last successfully told to do.
///
/// Replaced as a whole after every acknowledged command, never edited in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightState {
    /// Whether the strip is on
    pub power: bool,
    /// Hue in degrees and saturation in percent
    pub hs: (f64, f64),
    /// Brightness (1-255)
    pub brightness: u8,
    /// Active effect, signed by direction, if one was ever selected
    pub effect: Option<i32>,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            power: false,
            hs: (0.0, 0.0),
            brightness: 1,
            effect: None,
        }
    }
}

impl LightState {
    pub fn with_power(self, power: bool) -> Self {
        Self { power, ..self }
    }

    pub fn with_hs(self, hue: f64, saturation: f64) -> Self {
        Self {
            hs: (hue, saturation),
            ..self
        }
    }

    pub fn with_brightness(self, brightness: u8) -> Self {
        Self { brightness, ..self }
    }

    pub fn with_effect(self, effect: i32) -> Self {
        Self {
            effect: Some(effect),
            ..self
        }
    }
}

/// A combined "turn on" request as issued by a host UI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightRequest {
    pub hs: Option<(f64, f64)>,
    pub brightness: Option<u8>,
    pub effect: Option<i32>,
}

type UpdateCallback = Arc<dyn Fn(&LightState) + Send + Sync>;

/// Main struct for controlling a Findn LED strip
pub struct LedDevice<T: Transport = BtleplugTransport> {
    connection: Arc<ConnectionManager<T>>,
    dispatcher: CommandDispatcher<T>,
    state: RwLock<LightState>,
    update_callback: RwLock<Option<UpdateCallback>>,
}

impl<T: Transport> LedDevice<T> {
    /// Creates a device handle. No connection is made until the first command.
    pub fn new(transport: T, identity: DeviceIdentity, config: ConnectionConfig) -> Self {
        let connection = Arc::new(ConnectionManager::new(transport, identity, config));
        let dispatcher = CommandDispatcher::new(connection.clone());
        Self {
            connection,
            dispatcher,
            state: RwLock::new(LightState::default()),
            update_callback: RwLock::new(None),
        }
    }

    pub fn address(&self) -> String {
        self.connection.identity().address
    }

    /// Advertised name, or the address when the device has none
    pub fn name(&self) -> String {
        self.connection.identity().display_name().to_string()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.connection.identity().rssi
    }

    /// Records a fresh advertisement for this device
    pub fn set_advertisement(&self, name: Option<String>, rssi: Option<i16>) {
        self.connection.set_advertisement(name, rssi);
    }

    pub fn state(&self) -> LightState {
        *self.state.read()
    }

    pub fn is_on(&self) -> bool {
        self.state.read().power
    }

    pub fn brightness(&self) -> u8 {
        self.state.read().brightness
    }

    pub fn hs(&self) -> (f64, f64) {
        self.state.read().hs
    }

    pub fn effect(&self) -> Option<i32> {
        self.state.read().effect
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Registers the function called after every state change, replacing any
    /// previous one
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&LightState) + Send + Sync + 'static,
    {
        *self.update_callback.write() = Some(Arc::new(callback));
    }

    /// Makes sure the device is reachable, connecting if needed
    #[instrument(skip(self))]
    pub async fn update(&self) -> Result<()> {
        self.connection.ensure_connected().await?;
        debug!("{}: Updating", self.name());
        Ok(())
    }

    /// Turns the LED strip on
    #[instrument(skip(self))]
    pub async fn turn_on(&self) -> Result<()> {
        debug!("{}: Turn on", self.name());
        self.apply(&[protocol::turn_on()], |state| state.with_power(true))
            .await?;
        info!("LED strip powered on");
        Ok(())
    }

    /// Turns the LED strip off
    #[instrument(skip(self))]
    pub async fn turn_off(&self) -> Result<()> {
        debug!("{}: Turn off", self.name());
        self.apply(&[protocol::turn_off()], |state| state.with_power(false))
            .await?;
        info!("LED strip powered off");
        Ok(())
    }

    /// Sets the brightness level
    ///
    /// # Arguments
    ///
    /// * `brightness` - Brightness level (1-255)
    #[instrument(skip(self))]
    pub async fn set_brightness(&self, brightness: u8) -> Result<()> {
        debug!("{}: Set brightness: {}", self.name(), brightness);
        let frame = protocol::set_brightness(brightness)?;
        self.apply(&[frame], |state| state.with_brightness(brightness))
            .await?;
        info!("Brightness set to {}", brightness);
        Ok(())
    }

    /// Sets the color from hue and saturation
    ///
    /// # Arguments
    ///
    /// * `hue` - Hue in degrees (0-360)
    /// * `saturation` - Saturation in percent (0-100)
    #[instrument(skip(self))]
    pub async fn set_hs_color(&self, hue: f64, saturation: f64) -> Result<()> {
        debug!("{}: Set hs color: ({}, {})", self.name(), hue, saturation);
        let frame = protocol::set_hs_color(hue, saturation)?;
        self.apply(&[frame], |state| state.with_hs(hue, saturation))
            .await?;
        info!("Color set to HS({}, {})", hue, saturation);
        Ok(())
    }

    /// Sets the color from an RGB triple; the state keeps the converted
    /// hue and saturation
    #[instrument(skip(self))]
    pub async fn set_rgb_color(&self, red: u8, green: u8, blue: u8) -> Result<()> {
        let (hue, saturation) = color::rgb_to_hs(red, green, blue);
        debug!(
            "{}: Set rgb color: ({}, {}, {}) -> hs ({}, {})",
            self.name(),
            red,
            green,
            blue,
            hue,
            saturation
        );
        let frame = protocol::set_rgb_color(red, green, blue);
        self.apply(&[frame], |state| state.with_hs(hue, saturation))
            .await?;
        info!("Color set to RGB({}, {}, {})", red, green, blue);
        Ok(())
    }

    /// Selects an effect; negative values run it backwards
    #[instrument(skip(self))]
    pub async fn set_effect(&self, effect: i32) -> Result<()> {
        debug!("{}: Set effect: {}", self.name(), effect);
        let frames = protocol::set_effect(effect)?;
        self.apply(&frames, |state| state.with_effect(effect))
            .await?;
        info!("Effect set to {}", effect);
        Ok(())
    }

    /// Applies a host "turn on" request step by step, powering on last and
    /// only if the strip is off.
    ///
    /// Stops at the first failing step; steps already sent stay applied.
    #[instrument(skip(self))]
    pub async fn turn_on_with(&self, request: LightRequest) -> Result<()> {
        if let Some((hue, saturation)) = request.hs {
            self.set_hs_color(hue, saturation).await?;
        }
        if let Some(brightness) = request.brightness {
            self.set_brightness(brightness).await?;
        }
        if let Some(effect) = request.effect {
            self.set_effect(effect).await?;
        }
        if !self.is_on() {
            self.turn_on().await?;
        }
        Ok(())
    }

    /// Drops the connection. The next command reconnects.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        debug!("{}: Stop", self.name());
        self.connection.disconnect().await
    }

    async fn apply(
        &self,
        frames: &[Frame],
        next: impl FnOnce(LightState) -> LightState,
    ) -> Result<()> {
        // Runs under the operation lock: commits and callbacks follow wire order
        self.dispatcher
            .send_then(frames, || {
                let state = {
                    let mut current = self.state.write();
                    *current = next(*current);
                    *current
                };
                let callback = self.update_callback.read().clone();
                if let Some(callback) = callback {
                    callback(&state);
                }
            })
            .await
    }
}
