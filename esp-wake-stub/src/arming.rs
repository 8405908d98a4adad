//! # Sleep arming
//!
//! ## Overview
//!
//! Runs in the application, with the full runtime available. Configures the wake sources through
//! the platform's sleep API, registers the wake stub and enters deep sleep. Once asleep the
//! application does not run again until the stub lets the boot continue or the chip is reset.
//!
//! Any error returned here is meant to be fatal: the chip must not go to sleep with a wake source
//! that failed to configure.
//!
//! ## Examples
//!
//! ```rust, ignore
//! let mut arming = SleepArming::new(platform);
//! arming.configure_from(&STUB, StubEntry::of(wake_stub))?;
//! match arming.enter_sleep()? {}
//! ```

use core::convert::Infallible;

use crate::{
    stub::{StubEntry, WakePin, WakeStub, WakeupLevel},
    timer::WakeInterval,
};

/// The platform's sleep API.
pub trait SleepPlatform {
    /// Error reported by the platform.
    type Error;

    /// Wakes the chip when `pin` reaches `level`. The platform puts the pin into input mode.
    fn enable_pin_wakeup(&mut self, pin: WakePin, level: WakeupLevel) -> Result<(), Self::Error>;

    /// Wakes the chip after `interval`.
    fn enable_timer_wakeup(&mut self, interval: WakeInterval) -> Result<(), Self::Error>;

    /// Runs `entry` on the next wakeup, before the normal boot.
    fn set_wake_stub(&mut self, entry: StubEntry) -> Result<(), Self::Error>;

    /// Enters deep sleep with the configured wake sources.
    fn sleep_deep(&mut self) -> !;
}

/// Sleep arming errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error<E> {
    /// Sleep was requested without any wake source.
    NoWakeSource,
    /// Sleep was requested without a wake stub.
    StubNotInstalled,
    /// The platform rejected the configuration.
    Platform(E),
}

impl<E: core::fmt::Display> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoWakeSource => write!(f, "no wake source is enabled"),
            Error::StubNotInstalled => write!(f, "no wake stub is installed"),
            Error::Platform(e) => write!(f, "platform error: {e}"),
        }
    }
}

impl<E: core::fmt::Debug + core::fmt::Display> core::error::Error for Error<E> {}

/// The wake sources and stub configured so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeConfiguration {
    pin: Option<(WakePin, WakeupLevel)>,
    timer: Option<WakeInterval>,
    stub: Option<StubEntry>,
}

impl WakeConfiguration {
    /// The pin wakeup, if enabled.
    pub fn pin(&self) -> Option<(WakePin, WakeupLevel)> {
        self.pin
    }

    /// The timer wakeup interval, if enabled.
    pub fn timer(&self) -> Option<WakeInterval> {
        self.timer
    }

    /// The installed wake stub, if any.
    pub fn stub(&self) -> Option<StubEntry> {
        self.stub
    }

    /// Whether at least one wake source is enabled.
    pub fn has_wake_source(&self) -> bool {
        self.pin.is_some() || self.timer.is_some()
    }
}

/// Configures the wake sources and the wake stub, then enters deep sleep.
#[derive(Debug)]
pub struct SleepArming<P> {
    platform: P,
    config: WakeConfiguration,
}

impl<P: SleepPlatform> SleepArming<P> {
    /// Starts with no wake sources and no stub.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            config: WakeConfiguration::default(),
        }
    }

    /// What has been configured so far.
    pub fn configuration(&self) -> &WakeConfiguration {
        &self.config
    }

    /// Wakes the chip when `pin` reaches `level`.
    pub fn configure_pin_wake(
        &mut self,
        pin: WakePin,
        level: WakeupLevel,
    ) -> Result<(), Error<P::Error>> {
        debug!("Enabling wakeup on GPIO{} at {:?} level", pin.number(), level);

        if let Err(e) = self.platform.enable_pin_wakeup(pin, level) {
            error!("Failed to enable wakeup on GPIO{}", pin.number());
            return Err(Error::Platform(e));
        }

        self.config.pin = Some((pin, level));
        Ok(())
    }

    /// Wakes the chip after `interval`.
    pub fn configure_timer_wake(&mut self, interval: WakeInterval) -> Result<(), Error<P::Error>> {
        debug!("Enabling timer wakeup after {} us", interval.as_micros());

        if let Err(e) = self.platform.enable_timer_wakeup(interval) {
            error!("Failed to enable timer wakeup");
            return Err(Error::Platform(e));
        }

        self.config.timer = Some(interval);
        Ok(())
    }

    /// Runs the stub at `entry` on every wakeup.
    pub fn install_wake_stub(&mut self, entry: StubEntry) -> Result<(), Error<P::Error>> {
        debug!("Installing wake stub at {:#x}", entry.address());

        if let Err(e) = self.platform.set_wake_stub(entry) {
            error!("Failed to install wake stub");
            return Err(Error::Platform(e));
        }

        self.config.stub = Some(entry);
        Ok(())
    }

    /// Enables exactly the wake sources `stub` re-arms and installs it at `entry`.
    pub fn configure_from(
        &mut self,
        stub: &WakeStub,
        entry: StubEntry,
    ) -> Result<(), Error<P::Error>> {
        if let Some(pin) = stub.pin_wake() {
            self.configure_pin_wake(pin.pin, pin.level)?;
        }
        if let Some(timer) = stub.timer_wake() {
            self.configure_timer_wake(timer.interval)?;
        }

        self.install_wake_stub(entry)
    }

    /// Enters deep sleep.
    ///
    /// Only returns if the configuration is incomplete. After a successful call the next code to
    /// run is the wake stub.
    pub fn enter_sleep(mut self) -> Result<Infallible, Error<P::Error>> {
        if !self.config.has_wake_source() {
            error!("Refusing to sleep without a wake source");
            return Err(Error::NoWakeSource);
        }
        if self.config.stub.is_none() {
            error!("Refusing to sleep without a wake stub");
            return Err(Error::StubNotInstalled);
        }

        info!("Entering deep sleep");
        self.platform.sleep_deep()
    }
}
