//! # Low-power clock
//!
//! ## Overview
//!
//! The RTC slow clock keeps running through deep sleep and drives the 48-bit counter the timer
//! wakeup compares against. Its oscillator is not precise, so the boot code measures it against
//! the XTAL and stores the result in `RTC_SLOW_CLK_CAL_REG` as a Q13.19 fixed-point period in
//! microseconds per slow clock cycle.
//!
//! The calibration can differ between boots and is therefore read again on every use.

use core::num::NonZeroU32;

use crate::regs::{
    RTC_CLK_CAL_FRACT,
    RTC_CNTL_TIME_HIGH0,
    RTC_CNTL_TIME_LOW0,
    RTC_CNTL_TIME_UPDATE,
    RTC_CNTL_TIME_UPDATE_BIT,
    RTC_CNTL_TIMER_VALUE0_HIGH,
    RTC_SLOW_CLK_CAL_REG,
    RegisterAccess,
};

/// Oscillator driving RTC_SLOW_CLK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlowClockSource {
    /// Internal 150 kHz RC oscillator.
    #[default]
    RcSlow,
    /// External 32.768 kHz crystal.
    Xtal32k,
}

impl SlowClockSource {
    /// Nominal frequency in Hz.
    pub const fn frequency_hz(self) -> u32 {
        match self {
            Self::RcSlow => 150_000,
            Self::Xtal32k => 32_768,
        }
    }

    /// The calibration period this source would have if it ran exactly at its nominal frequency.
    pub const fn nominal_period(self) -> CalibrationPeriod {
        const RC_SLOW: CalibrationPeriod = period_of(SlowClockSource::RcSlow.frequency_hz());
        const XTAL32K: CalibrationPeriod = period_of(SlowClockSource::Xtal32k.frequency_hz());

        match self {
            Self::RcSlow => RC_SLOW,
            Self::Xtal32k => XTAL32K,
        }
    }
}

const fn period_of(hz: u32) -> CalibrationPeriod {
    let raw = (1_000_000u64 << RTC_CLK_CAL_FRACT) / hz as u64;
    match NonZeroU32::new(raw as u32) {
        Some(period) => CalibrationPeriod(period),
        None => panic!("zero calibration period"),
    }
}

/// Slow clock period in microseconds, Q13.19 fixed-point.
///
/// Zero is not representable, so converting with it can never divide by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationPeriod(NonZeroU32);

impl CalibrationPeriod {
    /// Creates a period from its raw register representation.
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Creates a period from a raw value, returning `None` for zero.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// The raw Q13.19 value.
    pub const fn raw(self) -> u32 {
        self.0.get()
    }

    /// Converts microseconds to slow clock cycles, truncating.
    ///
    /// `us` must be below `2^45`, see [`crate::timer::WakeInterval::MAX_MICROS`].
    #[inline(always)]
    pub const fn us_to_slow_cycles(self, us: u64) -> u64 {
        div_u64_by_u32(us << RTC_CLK_CAL_FRACT, self.0)
    }

    /// Converts slow clock cycles to microseconds, truncating.
    ///
    /// Exact for any value of the 48-bit counter. Counts whose duration does not fit in a `u64`
    /// saturate to `u64::MAX`.
    pub const fn slow_cycles_to_us(self, cycles: u64) -> u64 {
        let us = (cycles as u128 * self.0.get() as u128) >> RTC_CLK_CAL_FRACT;
        if us > u64::MAX as u128 {
            u64::MAX
        } else {
            us as u64
        }
    }
}

/// Restoring long division of a 64-bit value by a non-zero 32-bit divisor.
///
/// The wake stub cannot call `__udivdi3`, which the compiler emits for 64-bit `/` on riscv32 and
/// which is placed in flash.
#[inline(always)]
const fn div_u64_by_u32(dividend: u64, divisor: NonZeroU32) -> u64 {
    let divisor = divisor.get() as u64;
    let mut quotient = 0u64;
    let mut remainder = 0u64;

    let mut bit = 64;
    while bit > 0 {
        bit -= 1;
        // fits: the remainder stays below the 32-bit divisor before the shift
        remainder = (remainder << 1) | ((dividend >> bit) & 1);
        if remainder >= divisor {
            remainder -= divisor;
            quotient |= 1 << bit;
        }
    }

    quotient
}

/// Reads the current slow clock calibration.
///
/// A zero register means the boot code never calibrated the clock, in which case the nominal
/// period of `source` is used.
#[inline(always)]
pub fn read_calibration(
    regs: &mut impl RegisterAccess,
    source: SlowClockSource,
) -> CalibrationPeriod {
    match CalibrationPeriod::from_raw(regs.read(RTC_SLOW_CLK_CAL_REG)) {
        Some(period) => period,
        None => source.nominal_period(),
    }
}

/// A coherent reading of the slow clock counter.
///
/// Only [`snapshot_counter`] creates these, which always requests a fresh latch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CounterSnapshot(u64);

impl CounterSnapshot {
    /// Counter value in slow clock cycles.
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

/// Latches the live slow clock counter and reads it back.
#[inline(always)]
pub fn snapshot_counter(regs: &mut impl RegisterAccess) -> CounterSnapshot {
    regs.set_bits(RTC_CNTL_TIME_UPDATE, RTC_CNTL_TIME_UPDATE_BIT);

    let l = regs.read(RTC_CNTL_TIME_LOW0);
    let h = regs.read(RTC_CNTL_TIME_HIGH0) & RTC_CNTL_TIMER_VALUE0_HIGH;

    CounterSnapshot(((h as u64) << 32) | (l as u64))
}
