//! # Wake stub
//!
//! ## Overview
//!
//! The wake stub runs from RTC fast memory on every wakeup, before the ROM bootloader loads the
//! application. Nothing is initialized at that point: there is no heap, no logging and no
//! interrupt handling, only the registers. Everything in this module therefore takes an explicit
//! [`RegisterAccess`] handle and is inlined into the caller, which must itself be placed in RTC
//! fast memory.
//!
//! On every wakeup the stub
//!
//! 1. waits until the wake pin has left its trigger level, feeding the watchdog while waiting
//! 2. re-arms the timer wakeup and clears pending RTC interrupts
//! 3. either resumes the normal boot or re-installs itself and goes back to sleep
//!
//! The decision in step 3 is made by a [`ResumePolicy`].
//!
//! ## Examples
//!
//! ```rust, ignore
//! #[esp_hal::ram(unstable(rtc_fast))]
//! static STUB: WakeStub = WakeStub::new()
//!     .with_pin_wake(PinWake::new(WAKE_PIN, WakeupLevel::High))
//!     .with_timer_wake(TimerWake::new(INTERVAL, SlowClockSource::RcSlow, CpuClock::_160MHz));
//!
//! #[esp_hal::ram(unstable(rtc_fast))]
//! extern "C" fn wake_stub() {
//!     STUB.run(&mut unsafe { Mmio::steal() }, StubEntry::of(wake_stub));
//! }
//! ```

use core::num::NonZeroU32;

use crate::{
    ConfigError,
    cause::WakeCause,
    clock::SlowClockSource,
    regs::{
        GPIO_IN,
        RTC_CNTL_SLEEP_EN,
        RTC_CNTL_STATE0,
        RTC_ENTRY_ADDR_REG,
        RTC_WAKE_CYCLES_REG,
        RegisterAccess,
        TIMG0_WDTFEED,
    },
    timer::{CpuClock, TimerWake, WakeInterval, clear_pending_interrupts, rearm},
};

/// A pin that can wake the chip from deep sleep.
///
/// Only GPIO0 to GPIO5 are in the RTC power domain of the ESP32-C3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakePin(u8);

impl WakePin {
    /// The highest pin number that can wake the chip.
    pub const MAX: u8 = 5;

    /// Validates a pin number.
    pub const fn new(pin: u8) -> Result<Self, ConfigError> {
        if pin > Self::MAX {
            Err(ConfigError::InvalidWakePin)
        } else {
            Ok(Self(pin))
        }
    }

    /// The GPIO number.
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Bit of this pin in `GPIO_IN` and in wakeup pin masks.
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl TryFrom<u8> for WakePin {
    type Error = ConfigError;

    fn try_from(pin: u8) -> Result<Self, Self::Error> {
        Self::new(pin)
    }
}

/// Level of a pin that triggers the wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupLevel {
    /// Wakeup on low level
    Low,
    /// Wakeup on high level
    High,
}

/// Pin wakeup settings of the wake stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinWake {
    /// The pin.
    pub pin: WakePin,
    /// The level that wakes the chip.
    pub level: WakeupLevel,
    /// How many times the stub polls a pin still at its trigger level before giving up and
    /// resuming the boot. `None` waits forever.
    pub poll_budget: Option<NonZeroU32>,
}

impl PinWake {
    /// Pin wakeup without a poll budget.
    pub const fn new(pin: WakePin, level: WakeupLevel) -> Self {
        Self {
            pin,
            level,
            poll_budget: None,
        }
    }

    /// Limits the pin wait to `polls` polls, `0` removes the limit.
    pub const fn with_poll_budget(self, polls: u32) -> Self {
        Self {
            poll_budget: NonZeroU32::new(polls),
            ..self
        }
    }

    /// Whether the pin currently reads its trigger level.
    #[inline(always)]
    pub fn is_triggered(&self, regs: &mut impl RegisterAccess) -> bool {
        let high = regs.read(GPIO_IN) & self.pin.mask() != 0;
        high == matches!(self.level, WakeupLevel::High)
    }
}

/// When the stub lets the normal boot continue instead of going back to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResumePolicy {
    /// Always go back to sleep. The application only runs again after a reset.
    #[default]
    Never,
    /// Resume when the chip was woken by the given cause.
    OnCause(WakeCause),
    /// Resume on every n-th wakeup handled by the stub. The count is kept in
    /// `RTC_CNTL_STORE0` and survives deep sleep. It restarts whenever the boot resumes, for any
    /// reason, and should be cleared with [`reset_cycle_count`] when the stub is installed.
    AfterCycles(NonZeroU32),
}

/// Why the stub let the normal boot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResumeReason {
    /// The wake pin was still at its trigger level when the poll budget ran out.
    PinStuck,
    /// The wake cause matched [`ResumePolicy::OnCause`].
    Cause(WakeCause),
    /// The number of cycles of [`ResumePolicy::AfterCycles`] was reached.
    CyclesElapsed,
}

/// The pin wait ran out of polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinStuck;

/// States of the wake stub.
///
/// The cause of the wakeup is read once when leaving [`StubState::Entered`] and carried along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StubState {
    /// The stub just started.
    Entered,
    /// Waiting for the wake pin to become idle.
    EvaluatingPin(WakeCause),
    /// Programming the next timer wakeup and deciding how to continue.
    RearmTimer(WakeCause),
    /// Terminal: continue with the normal boot.
    ResumeBoot(ResumeReason),
    /// Terminal: go back to sleep.
    ReturnToSleep,
}

impl StubState {
    /// Whether no further transition exists.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ResumeBoot(_) | Self::ReturnToSleep)
    }
}

/// The result of evaluating one wakeup.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Return from the stub and let the ROM continue with the normal boot.
    ResumeBoot(ResumeReason),
    /// Go back to sleep by committing the request.
    Sleep(SleepRequest),
}

/// Address of the wake stub function, as the ROM expects it in `RTC_ENTRY_ADDR_REG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StubEntry(u32);

impl StubEntry {
    /// The entry address of `stub`, which must be placed in RTC fast memory.
    #[inline(always)]
    pub fn of(stub: extern "C" fn()) -> Self {
        Self(stub as usize as u32)
    }

    /// An entry at a raw address.
    pub const fn from_address(address: u32) -> Self {
        Self(address)
    }

    /// The entry address.
    pub const fn address(self) -> u32 {
        self.0
    }
}

/// Registers `entry` as the wake stub for the next wakeup.
///
/// The ROM only jumps to the stub if the RTC memory CRC matches, so it is recomputed after
/// writing the address.
#[inline(always)]
pub fn install(regs: &mut impl RegisterAccess, entry: StubEntry) {
    regs.write(RTC_ENTRY_ADDR_REG, entry.address());
    regs.update_memory_crc();
}

/// Restarts the wakeup count of [`ResumePolicy::AfterCycles`].
#[inline(always)]
pub fn reset_cycle_count(regs: &mut impl RegisterAccess) {
    regs.write(RTC_WAKE_CYCLES_REG, 0);
}

/// Feeds the timer group 0 watchdog, which is running while the stub waits.
#[inline(always)]
pub fn feed_watchdog(regs: &mut impl RegisterAccess) {
    regs.write(TIMG0_WDTFEED, 1);
}

/// Polls the wake pin until it leaves its trigger level.
///
/// `feed` is called once for every poll that still finds the pin at its trigger level. Returns the
/// number of those polls, or [`PinStuck`] if the poll budget ran out first.
#[inline(always)]
pub fn wait_for_pin_idle<R: RegisterAccess>(
    regs: &mut R,
    pin: &PinWake,
    feed: &mut impl FnMut(&mut R),
) -> Result<u32, PinStuck> {
    let mut polls = 0u32;

    while pin.is_triggered(regs) {
        if let Some(budget) = pin.poll_budget {
            if polls >= budget.get() {
                return Err(PinStuck);
            }
        }

        feed(regs);
        polls = polls.saturating_add(1);
    }

    Ok(polls)
}

/// Permission to put the chip back to sleep, returned by [`WakeStub::evaluate`].
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use = "the chip only goes back to sleep once the request is committed"]
pub struct SleepRequest {
    _private: (),
}

impl SleepRequest {
    /// Re-installs the stub at `entry` and requests deep sleep.
    ///
    /// `SLEEP_EN` is cleared before it is set, the hardware reacts to the rising edge.
    #[inline(always)]
    pub fn commit(self, regs: &mut impl RegisterAccess, entry: StubEntry) {
        install(regs, entry);

        regs.clear_bits(RTC_CNTL_STATE0, RTC_CNTL_SLEEP_EN);
        regs.set_bits(RTC_CNTL_STATE0, RTC_CNTL_SLEEP_EN);
    }

    /// Commits the request and waits for the hardware to power down the core.
    #[inline(always)]
    pub fn return_to_sleep(self, regs: &mut impl RegisterAccess, entry: StubEntry) -> ! {
        self.commit(regs, entry);

        loop {
            core::hint::spin_loop();
        }
    }
}

/// The wake stub configuration.
///
/// All constructors are `const` so the stub can be a `static` placed in RTC fast memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeStub {
    pin: Option<PinWake>,
    timer: Option<TimerWake>,
    resume: ResumePolicy,
}

impl Default for WakeStub {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeStub {
    /// A stub without wake sources that never resumes the boot.
    pub const fn new() -> Self {
        Self {
            pin: None,
            timer: None,
            resume: ResumePolicy::Never,
        }
    }

    /// Waits for the pin to become idle on every wakeup.
    pub const fn with_pin_wake(self, pin: PinWake) -> Self {
        Self {
            pin: Some(pin),
            ..self
        }
    }

    /// Re-arms the timer on every wakeup.
    pub const fn with_timer_wake(self, timer: TimerWake) -> Self {
        Self {
            timer: Some(timer),
            ..self
        }
    }

    /// Sets when the normal boot continues.
    pub const fn with_resume_policy(self, resume: ResumePolicy) -> Self {
        Self { resume, ..self }
    }

    /// Builds the stub from the `ESP_WAKE_STUB_CONFIG_*` build options, waking on `pin` at `level`.
    pub const fn from_config(pin: u8, level: WakeupLevel) -> Result<Self, ConfigError> {
        const INTERVAL_US: u64 =
            esp_config::esp_config_int!(u64, "ESP_WAKE_STUB_CONFIG_TIMER_INTERVAL_US");
        const PIN_WAIT_MAX_POLLS: u32 =
            esp_config::esp_config_int!(u32, "ESP_WAKE_STUB_CONFIG_PIN_WAIT_MAX_POLLS");
        const RESUME_AFTER_CYCLES: u32 =
            esp_config::esp_config_int!(u32, "ESP_WAKE_STUB_CONFIG_RESUME_AFTER_CYCLES");

        cfg_if::cfg_if! {
            if #[cfg(slow_clock_source_xtal32k)] {
                const CLOCK: SlowClockSource = SlowClockSource::Xtal32k;
            } else {
                const CLOCK: SlowClockSource = SlowClockSource::RcSlow;
            }
        }

        cfg_if::cfg_if! {
            if #[cfg(cpu_clock_mhz_80)] {
                const CPU: CpuClock = CpuClock::_80MHz;
            } else {
                const CPU: CpuClock = CpuClock::_160MHz;
            }
        }

        let pin = match WakePin::new(pin) {
            Ok(pin) => pin,
            Err(e) => return Err(e),
        };
        let Some(interval) = WakeInterval::from_micros(INTERVAL_US) else {
            return Err(ConfigError::IntervalOutOfRange);
        };
        let resume = match NonZeroU32::new(RESUME_AFTER_CYCLES) {
            Some(n) => ResumePolicy::AfterCycles(n),
            None => ResumePolicy::Never,
        };

        Ok(Self::new()
            .with_pin_wake(PinWake::new(pin, level).with_poll_budget(PIN_WAIT_MAX_POLLS))
            .with_timer_wake(TimerWake::new(interval, CLOCK, CPU))
            .with_resume_policy(resume))
    }

    /// The pin wakeup, if any.
    pub const fn pin_wake(&self) -> Option<&PinWake> {
        self.pin.as_ref()
    }

    /// The timer wakeup, if any.
    pub const fn timer_wake(&self) -> Option<&TimerWake> {
        self.timer.as_ref()
    }

    /// When the normal boot continues.
    pub const fn resume_policy(&self) -> ResumePolicy {
        self.resume
    }

    /// Performs a single transition from `state`.
    ///
    /// Terminal states are returned unchanged.
    #[inline(always)]
    pub fn step<R: RegisterAccess>(
        &self,
        state: StubState,
        regs: &mut R,
        feed: &mut impl FnMut(&mut R),
    ) -> StubState {
        match state {
            StubState::Entered => {
                let cause = WakeCause::read(regs);
                if self.pin.is_some() {
                    StubState::EvaluatingPin(cause)
                } else {
                    StubState::RearmTimer(cause)
                }
            }
            StubState::EvaluatingPin(cause) => match self.wait_for_pin(regs, feed) {
                Ok(()) => StubState::RearmTimer(cause),
                Err(PinStuck) => {
                    StubState::ResumeBoot(self.resume_boot(regs, ResumeReason::PinStuck))
                }
            },
            StubState::RearmTimer(cause) => match self.rearm_and_decide(regs, cause) {
                Some(reason) => StubState::ResumeBoot(reason),
                None => StubState::ReturnToSleep,
            },
            terminal => terminal,
        }
    }

    /// Runs the state machine from [`StubState::Entered`] to a terminal state.
    ///
    /// Takes the same transitions as repeated calls to [`WakeStub::step`], as straight-line code
    /// without dispatching on the state. The compiler may lower such a dispatch to a jump table in
    /// flash, which the stub cannot read.
    #[inline(always)]
    pub fn evaluate<R: RegisterAccess>(
        &self,
        regs: &mut R,
        mut feed: impl FnMut(&mut R),
    ) -> Outcome {
        let cause = WakeCause::read(regs);

        if let Err(PinStuck) = self.wait_for_pin(regs, &mut feed) {
            return Outcome::ResumeBoot(self.resume_boot(regs, ResumeReason::PinStuck));
        }

        match self.rearm_and_decide(regs, cause) {
            Some(reason) => Outcome::ResumeBoot(reason),
            None => Outcome::Sleep(SleepRequest { _private: () }),
        }
    }

    /// The whole wake stub: evaluates the wakeup with the TIMG0 watchdog as liveness signal, then
    /// either returns to let the boot continue or goes back to sleep.
    #[inline(always)]
    pub fn run(&self, regs: &mut impl RegisterAccess, entry: StubEntry) -> ResumeReason {
        match self.evaluate(regs, |regs| feed_watchdog(regs)) {
            Outcome::ResumeBoot(reason) => reason,
            Outcome::Sleep(request) => request.return_to_sleep(regs, entry),
        }
    }

    #[inline(always)]
    fn wait_for_pin<R: RegisterAccess>(
        &self,
        regs: &mut R,
        feed: &mut impl FnMut(&mut R),
    ) -> Result<(), PinStuck> {
        match &self.pin {
            Some(pin) => wait_for_pin_idle(regs, pin, feed).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Re-arms the timer, or only clears the pending interrupts without one, then applies the
    /// resume policy.
    #[inline(always)]
    fn rearm_and_decide(
        &self,
        regs: &mut impl RegisterAccess,
        cause: WakeCause,
    ) -> Option<ResumeReason> {
        match &self.timer {
            Some(timer) => {
                rearm(regs, timer);
            }
            None => clear_pending_interrupts(regs),
        }

        let reason = self.should_resume(regs, cause)?;
        Some(self.resume_boot(regs, reason))
    }

    #[inline(always)]
    fn should_resume(
        &self,
        regs: &mut impl RegisterAccess,
        cause: WakeCause,
    ) -> Option<ResumeReason> {
        match self.resume {
            ResumePolicy::Never => None,
            ResumePolicy::OnCause(wanted) => {
                (cause == wanted).then_some(ResumeReason::Cause(cause))
            }
            ResumePolicy::AfterCycles(n) => {
                let cycles = regs.read(RTC_WAKE_CYCLES_REG).saturating_add(1);
                if cycles >= n.get() {
                    Some(ResumeReason::CyclesElapsed)
                } else {
                    regs.write(RTC_WAKE_CYCLES_REG, cycles);
                    None
                }
            }
        }
    }

    #[inline(always)]
    fn resume_boot(&self, regs: &mut impl RegisterAccess, reason: ResumeReason) -> ResumeReason {
        if let ResumePolicy::AfterCycles(_) = self.resume {
            reset_cycle_count(regs);
        }

        reason
    }
}
