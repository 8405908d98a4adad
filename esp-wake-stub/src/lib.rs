//! # Deep-sleep wake stub for the ESP32-C3
//!
//! ## Overview
//!
//! A wake stub is a small function in RTC fast memory that the ROM runs on every wakeup from deep
//! sleep, before the bootloader loads the application. This crate contains
//!
//! - a wake stub that waits for the wake pin to settle, re-arms the timer wakeup and either goes
//!   back to sleep or lets the boot continue ([`stub`])
//! - the deadline computation for the RTC timer wakeup ([`timer`], [`clock`])
//! - the arming controller the application uses to configure wake sources and enter deep sleep
//!   ([`arming`])
//! - a simulated register file to test all of the above on the host ([`sim`], feature `sim`)
//!
//! The stub code never touches global state: every function takes a [`regs::RegisterAccess`]
//! handle, which is [`regs::Mmio`] on the chip (feature `esp32c3`).
//!
//! ## Additional configuration
//!
//! We've exposed some configuration options that don't fit into cargo
//! features. These can be set via environment variables, or via cargo's `[env]`
//! section inside `.cargo/config.toml`. Below is a table of tunable parameters
//! for this crate:
#![doc = ""]
#![doc = include_str!(concat!(env!("OUT_DIR"), "/esp_wake_stub_config_table.md"))]
#![doc = ""]
//! ## Feature Flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![doc(html_logo_url = "https://avatars.githubusercontent.com/u/46717278")]
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

// MUST be the first module
mod fmt;

#[cfg(feature = "esp32c3")]
mod rom;

pub mod arming;
pub mod cause;
pub mod clock;
pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod stub;
pub mod timer;

pub use self::{
    arming::{SleepArming, SleepPlatform},
    cause::WakeCause,
    stub::{StubEntry, WakeStub},
};

/// Invalid wake stub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// The pin cannot wake the chip from deep sleep.
    InvalidWakePin,
    /// The timer interval is too long to be converted to slow clock cycles.
    IntervalOutOfRange,
}

impl core::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        assert_eq!(ConfigError::InvalidWakePin.to_string(), "InvalidWakePin");
    }
}
