//! Wake stub register access on the chip.
//!
//! Exercises the stub building blocks against the real RTC_CNTL, GPIO and TIMG0 registers without
//! entering deep sleep.
//!
//! The following wiring is assumed:
//! - GPIO2 unconnected

//% CHIPS: esp32c3
//% FEATURES: unstable

#![no_std]
#![no_main]

use esp_hal::{
    delay::Delay,
    gpio::{Input, InputConfig, Pull},
    peripherals::GPIO2,
};
use esp_wake_stub::{
    StubEntry,
    clock::{SlowClockSource, read_calibration, snapshot_counter},
    regs::{
        Mmio,
        RTC_CNTL_MAIN_TIMER_ALARM_EN,
        RTC_CNTL_SLP_TIMER0,
        RTC_CNTL_SLP_TIMER1,
        RTC_CNTL_SLP_VAL_HI,
        RTC_ENTRY_ADDR_REG,
        RTC_SLOW_CLK_CAL_REG,
        RegisterAccess,
    },
    stub::{PinStuck, PinWake, WakePin, WakeupLevel, feed_watchdog, install, wait_for_pin_idle},
    timer::{CpuClock, TimerWake, WakeInterval, rearm},
};
use hil_test::within_percent;

esp_bootloader_esp_idf::esp_app_desc!();

struct Context {
    pin: GPIO2<'static>,
    delay: Delay,
}

fn regs() -> Mmio {
    unsafe { Mmio::steal() }
}

fn wake_pin() -> WakePin {
    match WakePin::new(2) {
        Ok(pin) => pin,
        Err(_) => defmt::panic!("GPIO2 is a wake pin"),
    }
}

#[cfg(test)]
#[embedded_test::tests(default_timeout = 3)]
mod tests {
    use super::*;

    #[init]
    fn init() -> Context {
        let peripherals = esp_hal::init(esp_hal::Config::default());

        Context {
            pin: peripherals.GPIO2,
            delay: Delay::new(),
        }
    }

    #[test]
    fn slow_clock_is_calibrated(_ctx: Context) {
        let mut regs = regs();

        assert_ne!(regs.read(RTC_SLOW_CLK_CAL_REG), 0);

        let period = read_calibration(&mut regs, SlowClockSource::RcSlow);
        let nominal = SlowClockSource::RcSlow.nominal_period();
        assert!(within_percent(period.raw() as u64, nominal.raw() as u64, 25));
    }

    #[test]
    fn counter_follows_real_time(ctx: Context) {
        let mut regs = regs();
        let period = read_calibration(&mut regs, SlowClockSource::RcSlow);

        let before = snapshot_counter(&mut regs);
        ctx.delay.delay_millis(100);
        let after = snapshot_counter(&mut regs);

        let elapsed_us = period.slow_cycles_to_us(after.ticks() - before.ticks());
        assert!(within_percent(elapsed_us, 100_000, 5));
    }

    #[test]
    fn rearm_programs_the_compare_registers(_ctx: Context) {
        let mut regs = regs();
        let timer = TimerWake::new(
            WakeInterval::from_millis(10_000),
            SlowClockSource::RcSlow,
            CpuClock::_160MHz,
        );

        let now = snapshot_counter(&mut regs);
        let deadline = rearm(&mut regs, &timer);

        assert!(deadline.ticks() > now.ticks());
        assert_eq!(regs.read(RTC_CNTL_SLP_TIMER0), deadline.low_word());
        assert_eq!(
            regs.read(RTC_CNTL_SLP_TIMER1) & (RTC_CNTL_SLP_VAL_HI | RTC_CNTL_MAIN_TIMER_ALARM_EN),
            deadline.high_word()
        );

        regs.clear_bits(RTC_CNTL_SLP_TIMER1, RTC_CNTL_MAIN_TIMER_ALARM_EN);
    }

    #[test]
    fn idle_pin_is_not_polled_again(mut ctx: Context) {
        let config = InputConfig::default().with_pull(Pull::Down);
        let _input = Input::new(ctx.pin.reborrow(), config);
        ctx.delay.delay_millis(1);

        let pin = PinWake::new(wake_pin(), WakeupLevel::High);
        let mut feeds = 0u32;
        let result = wait_for_pin_idle(&mut regs(), &pin, &mut |regs: &mut Mmio| {
            feed_watchdog(regs);
            feeds += 1;
        });

        assert_eq!(result, Ok(0));
        assert_eq!(feeds, 0);
    }

    #[test]
    fn stuck_pin_exhausts_the_poll_budget(mut ctx: Context) {
        let config = InputConfig::default().with_pull(Pull::Up);
        let _input = Input::new(ctx.pin.reborrow(), config);
        ctx.delay.delay_millis(1);

        let pin = PinWake::new(wake_pin(), WakeupLevel::High).with_poll_budget(10);
        let mut feeds = 0u32;
        let result = wait_for_pin_idle(&mut regs(), &pin, &mut |regs: &mut Mmio| {
            feed_watchdog(regs);
            feeds += 1;
        });

        assert_eq!(result, Err(PinStuck));
        assert_eq!(feeds, 10);
    }

    #[test]
    fn install_writes_the_entry_address(_ctx: Context) {
        let mut regs = regs();
        let previous = regs.read(RTC_ENTRY_ADDR_REG);

        let entry = StubEntry::from_address(0x5000_0000);
        install(&mut regs, entry);
        assert_eq!(regs.read(RTC_ENTRY_ADDR_REG), entry.address());

        install(&mut regs, StubEntry::from_address(previous));
    }
}
