//! # Timer wakeup re-arming
//!
//! ## Overview
//!
//! The timer wakeup fires when the slow clock counter reaches the value in the compare registers
//! `RTC_CNTL_SLP_TIMER0`/`RTC_CNTL_SLP_TIMER1`. Re-arming from the wake stub computes that
//! absolute deadline from the requested interval:
//!
//! 1. read the calibration period (never cached, it changes between boots)
//! 2. subtract the fixed wakeup overhead from the interval, saturating at zero
//! 3. convert the remaining microseconds to slow clock cycles
//! 4. latch and read the live counter
//! 5. write the sum to the compare registers, enabling the alarm in the same write as the high
//!    bits
//!
//! and then clears every pending RTC interrupt, otherwise the chip wakes up again immediately.

use crate::{
    clock::{
        CalibrationPeriod,
        CounterSnapshot,
        SlowClockSource,
        read_calibration,
        snapshot_counter,
    },
    regs::{
        RTC_CLK_CAL_FRACT,
        RTC_CNTL_INT_CLR,
        RTC_CNTL_INT_CLR_ALL,
        RTC_CNTL_MAIN_TIMER_ALARM_EN,
        RTC_CNTL_SLP_TIMER0,
        RTC_CNTL_SLP_TIMER1,
        RTC_CNTL_SLP_VAL_HI,
        RegisterAccess,
    },
};

/// Time to sleep between two wakeups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeInterval(u64);

impl WakeInterval {
    /// Longest representable interval. Converting to slow clock cycles shifts the value left by
    /// 19 bits, which must not overflow.
    pub const MAX_MICROS: u64 = u64::MAX >> RTC_CLK_CAL_FRACT;

    /// Creates an interval from microseconds, `None` if longer than [`Self::MAX_MICROS`].
    pub const fn from_micros(us: u64) -> Option<Self> {
        if us > Self::MAX_MICROS {
            None
        } else {
            Some(Self(us))
        }
    }

    /// Creates an interval from milliseconds.
    pub const fn from_millis(ms: u32) -> Self {
        Self(ms as u64 * 1_000)
    }

    /// Creates an interval from seconds, `None` if longer than [`Self::MAX_MICROS`].
    pub const fn from_secs(secs: u32) -> Option<Self> {
        Self::from_micros(secs as u64 * 1_000_000)
    }

    /// The interval in microseconds.
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl From<WakeInterval> for core::time::Duration {
    fn from(interval: WakeInterval) -> Self {
        core::time::Duration::from_micros(interval.0)
    }
}

/// CPU frequency the ROM bootloader runs at while waking up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CpuClock {
    /// 80 MHz
    _80MHz,
    /// 160 MHz
    #[default]
    _160MHz,
}

impl CpuClock {
    /// The frequency in MHz.
    pub const fn mhz(self) -> u32 {
        match self {
            Self::_80MHz => 80,
            Self::_160MHz => 160,
        }
    }
}

/// Time between the timer firing and the wake stub running, which is subtracted from every
/// requested interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepTimeOverhead(u32);

impl SleepTimeOverhead {
    /// The deep sleep overhead for the given slow clock source and CPU frequency.
    ///
    /// The external crystal needs considerably longer to start up than the RC oscillator.
    pub const fn deep_sleep(source: SlowClockSource, cpu: CpuClock) -> Self {
        let startup = match source {
            SlowClockSource::RcSlow => 250,
            SlowClockSource::Xtal32k => 650,
        };

        Self(startup + 100 * 240 / cpu.mhz())
    }

    /// An explicit overhead in microseconds.
    pub const fn from_micros(us: u32) -> Self {
        Self(us)
    }

    /// The overhead in microseconds.
    pub const fn as_micros(self) -> u32 {
        self.0
    }
}

/// Slow clock cycles to sleep for `interval`, after subtracting `overhead`.
///
/// Intervals shorter than the overhead yield zero, never a negative or wrapped delta.
#[inline(always)]
pub const fn cycle_delta(
    interval: WakeInterval,
    overhead: SleepTimeOverhead,
    period: CalibrationPeriod,
) -> u64 {
    let sleep_us = interval.as_micros().saturating_sub(overhead.as_micros() as u64);
    period.us_to_slow_cycles(sleep_us)
}

/// Absolute slow clock counter value at which the timer wakeup fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeDeadline(u64);

impl WakeDeadline {
    /// The deadline `delta` cycles after `now`.
    #[inline(always)]
    pub const fn after(now: CounterSnapshot, delta: u64) -> Self {
        Self(now.ticks().saturating_add(delta))
    }

    /// Deadline in slow clock cycles.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Value for `RTC_CNTL_SLP_TIMER0`.
    #[inline(always)]
    pub const fn low_word(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Value for `RTC_CNTL_SLP_TIMER1`: bits 47..32 of the deadline with the alarm enabled.
    #[inline(always)]
    pub const fn high_word(self) -> u32 {
        ((self.0 >> 32) as u32 & RTC_CNTL_SLP_VAL_HI) | RTC_CNTL_MAIN_TIMER_ALARM_EN
    }
}

/// Timer wakeup settings of the wake stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerWake {
    /// Time to sleep between two wakeups.
    pub interval: WakeInterval,
    /// Subtracted from `interval`.
    pub overhead: SleepTimeOverhead,
    /// Slow clock source, used when the clock has not been calibrated.
    pub clock: SlowClockSource,
}

impl TimerWake {
    /// Timer wakeup after `interval` with the deep sleep overhead of `clock` at `cpu`.
    pub const fn new(interval: WakeInterval, clock: SlowClockSource, cpu: CpuClock) -> Self {
        Self {
            interval,
            overhead: SleepTimeOverhead::deep_sleep(clock, cpu),
            clock,
        }
    }

    /// The deadline this configuration yields for a given calibration and counter value.
    #[inline(always)]
    pub const fn deadline(&self, period: CalibrationPeriod, now: CounterSnapshot) -> WakeDeadline {
        WakeDeadline::after(now, cycle_delta(self.interval, self.overhead, period))
    }
}

/// Programs the next timer wakeup and clears all pending RTC interrupts.
#[inline(always)]
pub fn rearm(regs: &mut impl RegisterAccess, timer: &TimerWake) -> WakeDeadline {
    let period = read_calibration(regs, timer.clock);
    let delta = cycle_delta(timer.interval, timer.overhead, period);
    let deadline = WakeDeadline::after(snapshot_counter(regs), delta);

    regs.write(RTC_CNTL_SLP_TIMER0, deadline.low_word());
    regs.write(RTC_CNTL_SLP_TIMER1, deadline.high_word());

    clear_pending_interrupts(regs);

    deadline
}

/// Clears all pending RTC interrupts. A pending interrupt wakes the chip as soon as it sleeps.
#[inline(always)]
pub fn clear_pending_interrupts(regs: &mut impl RegisterAccess) {
    regs.write(RTC_CNTL_INT_CLR, RTC_CNTL_INT_CLR_ALL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        regs::{RTC_CNTL_TIME_UPDATE, RTC_CNTL_TIME_UPDATE_BIT},
        sim::{RegisterWrite, SimulatedRtc},
    };

    const RC_160: SleepTimeOverhead =
        SleepTimeOverhead::deep_sleep(SlowClockSource::RcSlow, CpuClock::_160MHz);

    fn period(raw: u32) -> CalibrationPeriod {
        CalibrationPeriod::from_raw(raw).unwrap()
    }

    fn interval(us: u64) -> WakeInterval {
        WakeInterval::from_micros(us).unwrap()
    }

    fn rc_timer(us: u64) -> TimerWake {
        TimerWake::new(interval(us), SlowClockSource::RcSlow, CpuClock::_160MHz)
    }

    #[test]
    fn overhead_constants() {
        assert_eq!(RC_160.as_micros(), 400);
        assert_eq!(
            SleepTimeOverhead::deep_sleep(SlowClockSource::Xtal32k, CpuClock::_160MHz).as_micros(),
            800
        );
        assert_eq!(
            SleepTimeOverhead::deep_sleep(SlowClockSource::RcSlow, CpuClock::_80MHz).as_micros(),
            550
        );
    }

    #[test]
    fn interval_limits() {
        assert!(WakeInterval::from_micros(WakeInterval::MAX_MICROS).is_some());
        assert!(WakeInterval::from_micros(WakeInterval::MAX_MICROS + 1).is_none());
        assert_eq!(WakeInterval::from_secs(10), Some(interval(10_000_000)));
        assert_eq!(WakeInterval::from_millis(u32::MAX).as_micros(), u32::MAX as u64 * 1000);
    }

    #[test]
    fn delta_is_zero_up_to_the_overhead() {
        let p = period(150_000);
        for us in [0, 1, 399, 400] {
            assert_eq!(cycle_delta(interval(us), RC_160, p), 0, "{us} us");
        }
    }

    #[test]
    fn delta_is_positive_past_the_overhead() {
        for p in [150_000, 3_495_253] {
            let p = period(p);
            for us in [408, 1_000, 1_000_000, 10_000_000, WakeInterval::MAX_MICROS] {
                assert!(cycle_delta(interval(us), RC_160, p) > 0, "{us} us");
            }
        }
    }

    #[test]
    fn delta_truncates() {
        // (10_000_000 - 400) << 19 / 150_000 = 34_951_135.3...
        assert_eq!(cycle_delta(interval(10_000_000), RC_160, period(150_000)), 34_951_135);
        // 600 us at the nominal 150 kHz period is 90.0... cycles
        assert_eq!(cycle_delta(interval(1_000), RC_160, period(3_495_253)), 90);
    }

    #[test]
    fn deadline_is_monotonic_in_the_interval() {
        let now = {
            let mut rtc = SimulatedRtc::new();
            rtc.advance(0xABCD_1234_5678);
            snapshot_counter(&mut rtc)
        };

        for p in [150_000, 3_495_253, 16_000_000] {
            let p = period(p);
            let mut last = WakeDeadline::after(now, 0);
            for us in (0..20_000_000).step_by(99_991) {
                let timer = rc_timer(us);
                let deadline = timer.deadline(p, now);
                assert!(deadline >= last);
                last = deadline;
            }
        }
    }

    #[test]
    fn compare_words() {
        let deadline = WakeDeadline(0x1_255A_B768);
        assert_eq!(deadline.low_word(), 0x255A_B768);
        assert_eq!(deadline.high_word(), 0x0001_0001);

        // only 16 high bits exist in the compare register
        let deadline = WakeDeadline(0xFFFF_FFFF_0000_0000);
        assert_eq!(deadline.high_word(), 0x0001_FFFF);
    }

    #[test]
    fn rearm_matches_the_closed_form() {
        let mut rtc = SimulatedRtc::new();
        rtc.set_calibration(150_000);
        rtc.advance(0x1_2345_6789);

        let timer = rc_timer(10_000_000);
        let deadline = rearm(&mut rtc, &timer);

        assert_eq!(deadline.ticks(), 0x1_2345_6789 + 34_951_135);
        assert_eq!(rtc.armed_alarm(), Some(deadline.ticks()));
    }

    #[test]
    fn rearm_write_sequence() {
        let mut rtc = SimulatedRtc::new();
        rtc.set_calibration(150_000);
        rtc.advance(0x1_2345_6789);

        let timer = rc_timer(10_000_000);
        rearm(&mut rtc, &timer);

        let writes: heapless::Vec<RegisterWrite, 8> = rtc.writes().collect();
        assert_eq!(
            writes.as_slice(),
            &[
                RegisterWrite::new(RTC_CNTL_TIME_UPDATE, RTC_CNTL_TIME_UPDATE_BIT),
                RegisterWrite::new(RTC_CNTL_SLP_TIMER0, 0x255A_B768),
                RegisterWrite::new(RTC_CNTL_SLP_TIMER1, 0x0001 | RTC_CNTL_MAIN_TIMER_ALARM_EN),
                RegisterWrite::new(RTC_CNTL_INT_CLR, 0xFFFF),
            ]
        );
    }

    #[test]
    fn alarm_enable_never_arrives_without_high_bits() {
        let mut rtc = SimulatedRtc::new();
        rtc.set_calibration(150_000);
        rtc.advance(0xFFFF_0000);

        let timer = rc_timer(10_000_000);
        let deadline = rearm(&mut rtc, &timer);
        // the deadline crosses into the high word
        assert_eq!(deadline.ticks() >> 32, 1);

        for write in rtc.writes().filter(|w| w.reg == RTC_CNTL_SLP_TIMER1) {
            assert_ne!(write.value & RTC_CNTL_MAIN_TIMER_ALARM_EN, 0);
            assert_eq!(write.value & RTC_CNTL_SLP_VAL_HI, 1);
        }
    }

    #[test]
    fn reproducible_for_the_same_now() {
        let timer = rc_timer(10_000_000);

        let run = || {
            let mut rtc = SimulatedRtc::new();
            rtc.set_calibration(150_000);
            rtc.advance(42_000);
            rearm(&mut rtc, &timer)
        };

        let first = run();
        assert!(first.ticks() > 42_000);
        for _ in 0..4 {
            assert_eq!(run(), first);
        }
    }

    #[test]
    fn rearm_clears_pending_interrupts() {
        let mut rtc = SimulatedRtc::new();
        rtc.raise_interrupts(0x0000_0401);

        let timer = rc_timer(1_000_000);
        rearm(&mut rtc, &timer);

        assert_eq!(rtc.pending_interrupts(), 0);
    }
}
