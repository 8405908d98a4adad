//! Deep sleep with a wake stub that keeps the chip asleep.
//!
//! The application arms a pin wakeup and a timer wakeup, installs the wake stub and enters deep
//! sleep. On every wakeup the stub waits for the pin to go idle, re-arms the timer and goes back
//! to sleep without booting the application. Set `ESP_WAKE_STUB_CONFIG_RESUME_AFTER_CYCLES` to see
//! the application boot again after that many wakeups.
//!
//! The following wiring is assumed:
//! - wakeup pin => GPIO1 (high level)

//% CHIPS: esp32c3

#![no_std]
#![no_main]

use esp_backtrace as _;
use esp_hal::{
    delay::Delay,
    gpio::{Input, InputConfig, Pull, RtcPinWithResistors},
    main,
    peripherals::GPIO1,
    rtc_cntl::{
        Rtc,
        SocResetReason,
        reset_reason,
        sleep::{RtcSleepConfig, RtcioWakeupSource, TimerWakeupSource, WakeupLevel},
        wakeup_cause,
    },
    system::Cpu,
};
use esp_println::println;
use esp_wake_stub::{
    SleepArming,
    SleepPlatform,
    StubEntry,
    WakeCause,
    WakeStub,
    regs::Mmio,
    stub::{self, WakePin},
    timer::WakeInterval,
};

esp_bootloader_esp_idf::esp_app_desc!();

const WAKE_PIN: u8 = 1;

// Read by the wake stub, which cannot access flash. Kept in RTC fast memory.
#[esp_hal::ram(unstable(rtc_fast))]
static STUB: WakeStub = match WakeStub::from_config(WAKE_PIN, stub::WakeupLevel::High) {
    Ok(stub) => stub,
    Err(_) => panic!("invalid wake stub configuration"),
};

#[esp_hal::ram(unstable(rtc_fast))]
extern "C" fn wake_stub() {
    let mut regs = unsafe { Mmio::steal() };
    let _ = STUB.run(&mut regs, StubEntry::of(wake_stub));
}

#[derive(Debug)]
enum PlatformError {
    PinUnavailable(WakePin),
}

struct EspHalSleep<'d> {
    rtc: Rtc<'d>,
    pin: GPIO1<'d>,
    pin_level: Option<WakeupLevel>,
    timer: Option<TimerWakeupSource>,
}

impl SleepPlatform for EspHalSleep<'_> {
    type Error = PlatformError;

    fn enable_pin_wakeup(
        &mut self,
        pin: WakePin,
        level: stub::WakeupLevel,
    ) -> Result<(), PlatformError> {
        if pin.number() != WAKE_PIN {
            return Err(PlatformError::PinUnavailable(pin));
        }

        let config = InputConfig::default().with_pull(Pull::None);
        let _input = Input::new(self.pin.reborrow(), config);

        self.pin_level = Some(match level {
            stub::WakeupLevel::Low => WakeupLevel::Low,
            stub::WakeupLevel::High => WakeupLevel::High,
        });
        Ok(())
    }

    fn enable_timer_wakeup(&mut self, interval: WakeInterval) -> Result<(), PlatformError> {
        self.timer = Some(TimerWakeupSource::new(interval.into()));
        Ok(())
    }

    fn set_wake_stub(&mut self, entry: StubEntry) -> Result<(), PlatformError> {
        let mut regs = unsafe { Mmio::steal() };
        stub::reset_cycle_count(&mut regs);
        stub::install(&mut regs, entry);
        Ok(())
    }

    fn sleep_deep(&mut self) -> ! {
        let config = RtcSleepConfig::deep();

        let level = self.pin_level.unwrap_or(WakeupLevel::High);
        let pins: &mut [(&mut dyn RtcPinWithResistors, WakeupLevel)] =
            &mut [(&mut self.pin, level)];
        let rtcio = RtcioWakeupSource::new(pins);

        match (&self.timer, self.pin_level) {
            (Some(timer), Some(_)) => self.rtc.sleep(&config, &[timer, &rtcio]),
            (Some(timer), None) => self.rtc.sleep(&config, &[timer]),
            (None, Some(_)) => self.rtc.sleep(&config, &[&rtcio]),
            (None, None) => self.rtc.sleep(&config, &[]),
        }

        unreachable!();
    }
}

#[main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    let reason = reset_reason(Cpu::ProCpu).unwrap_or(SocResetReason::ChipPowerOn);
    println!("reset reason: {:?}", reason);
    println!("wake reason: {:?}", wakeup_cause());
    println!("wake cause: {:?}", WakeCause::read(&mut unsafe { Mmio::steal() }));

    println!("Deep sleep test: booted, sleeping in 2 seconds");
    let delay = Delay::new();
    delay.delay_millis(2000);

    let platform = EspHalSleep {
        rtc: Rtc::new(peripherals.LPWR),
        pin: peripherals.GPIO1,
        pin_level: None,
        timer: None,
    };

    let mut arming = SleepArming::new(platform);
    if let Err(e) = arming.configure_from(&STUB, StubEntry::of(wake_stub)) {
        panic!("failed to arm deep sleep: {:?}", e);
    }

    println!("sleeping!");
    delay.delay_millis(100);

    match arming.enter_sleep() {
        Ok(never) => match never {},
        Err(e) => panic!("failed to enter deep sleep: {:?}", e),
    }
}
