//! # Simulated register file
//!
//! ## Overview
//!
//! [`SimulatedRtc`] implements [`RegisterAccess`] in memory and models the parts of the hardware
//! the wake stub depends on:
//!
//! - a 48-bit slow clock counter that only reaches the `TIME_*0` registers when a latch is
//!   requested through `RTC_CNTL_TIME_UPDATE`
//! - raw RTC interrupt flags, cleared by writing `RTC_CNTL_INT_CLR`
//! - GPIO input levels that can be scripted per poll
//! - the TIMG0 watchdog feed register
//! - RTC fast memory protected by a CRC that covers the stub entry address and the memory
//!   contents, computed with the algorithm of the ROM's `crc32_le`
//!
//! Every write is recorded in a bounded journal. When `SLEEP_EN` rises, the state the ROM would
//! see on the next wakeup is captured, and [`SimulatedRtc::audit`] checks it for conditions that
//! would make the chip boot-loop or skip the stub.

use crc::{Algorithm, Crc};
use heapless::{HistoryBuffer, LinearMap};

use crate::{
    cause::WakeCause,
    regs::{
        GPIO_IN,
        RTC_CNTL_INT_CLR,
        RTC_CNTL_INT_CLR_ALL,
        RTC_CNTL_INT_RAW,
        RTC_CNTL_MAIN_TIMER_ALARM_EN,
        RTC_CNTL_MAIN_TIMER_INT,
        RTC_CNTL_SLEEP_EN,
        RTC_CNTL_SLP_TIMER0,
        RTC_CNTL_SLP_TIMER1,
        RTC_CNTL_SLP_VAL_HI,
        RTC_CNTL_SLP_WAKEUP_CAUSE,
        RTC_CNTL_SLP_WAKEUP_INT,
        RTC_CNTL_STATE0,
        RTC_CNTL_TIME_HIGH0,
        RTC_CNTL_TIME_LOW0,
        RTC_CNTL_TIME_UPDATE,
        RTC_CNTL_TIME_UPDATE_BIT,
        RTC_COUNTER_MASK,
        RTC_ENTRY_ADDR_REG,
        RTC_MEMORY_CRC_REG,
        RTC_SLOW_CLK_CAL_REG,
        Reg,
        RegisterAccess,
        TIMG0_WDTFEED,
    },
    stub::StubEntry,
};

static ALGO_CRC32_NORMAL: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c11db7,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0xffffffff,
    check: 0,
    residue: 0,
};

/// Size of the simulated RTC fast memory in bytes.
pub const RTC_MEMORY_SIZE: usize = 64;

const GPIO_COUNT: usize = 22;
const REGISTER_CAPACITY: usize = 32;
const JOURNAL_CAPACITY: usize = 64;

/// A write observed by the simulated register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// The register.
    pub reg: Reg,
    /// The value written.
    pub value: u32,
}

impl RegisterWrite {
    /// A write of `value` to `reg`.
    pub const fn new(reg: Reg, value: u32) -> Self {
        Self { reg, value }
    }
}

/// A condition at sleep entry that breaks the next wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootLoopHazard {
    /// `SLEEP_EN` was never raised, the chip stays awake.
    SleepNotEntered,
    /// `RTC_ENTRY_ADDR_REG` does not point at the stub, the next wakeup runs the normal boot.
    StubNotReinstalled,
    /// The RTC memory CRC does not match, the ROM skips the stub.
    StaleMemoryCrc,
    /// RTC interrupts were pending, the chip wakes up again immediately.
    PendingInterrupt,
}

impl core::error::Error for BootLoopHazard {}

#[derive(Debug, Clone, Copy)]
struct PinHold {
    level: bool,
    polls: u32,
}

#[derive(Debug, Clone, Copy)]
struct SleepEntry {
    entry: u32,
    crc_valid: bool,
    pending: u32,
}

/// In-memory model of the registers used by the wake stub.
#[derive(Debug)]
pub struct SimulatedRtc {
    registers: LinearMap<Reg, u32, REGISTER_CAPACITY>,
    counter: u64,
    latched: u64,
    int_raw: u32,
    gpio_levels: u32,
    holds: [Option<PinHold>; GPIO_COUNT],
    feeds: u32,
    memory: [u8; RTC_MEMORY_SIZE],
    journal: HistoryBuffer<RegisterWrite, JOURNAL_CAPACITY>,
    sleep: Option<SleepEntry>,
}

impl Default for SimulatedRtc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRtc {
    /// A register file as after power-on: everything zero, the slow clock not calibrated.
    pub fn new() -> Self {
        Self {
            registers: LinearMap::new(),
            counter: 0,
            latched: 0,
            int_raw: 0,
            gpio_levels: 0,
            holds: [None; GPIO_COUNT],
            feeds: 0,
            memory: [0; RTC_MEMORY_SIZE],
            journal: HistoryBuffer::new(),
            sleep: None,
        }
    }

    /// Stores a calibration period as the boot code would. `0` means not calibrated.
    pub fn set_calibration(&mut self, raw: u32) {
        self.store(RTC_SLOW_CLK_CAL_REG, raw);
    }

    /// Lets the slow clock run for `cycles`.
    pub fn advance(&mut self, cycles: u64) {
        self.counter = self.counter.wrapping_add(cycles) & RTC_COUNTER_MASK;
    }

    /// The live slow clock counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// The counter value currently visible in `TIME_LOW0`/`TIME_HIGH0`.
    pub fn latched_counter(&self) -> u64 {
        self.latched
    }

    /// Drives `pin` to a constant level.
    pub fn set_pin(&mut self, pin: u8, high: bool) {
        let pin = usize::from(pin);
        self.holds[pin] = None;
        self.set_level(pin, high);
    }

    /// Holds `pin` at `high` for the next `polls` reads of `GPIO_IN`, then at the opposite level.
    pub fn hold_pin(&mut self, pin: u8, high: bool, polls: u32) {
        let pin = usize::from(pin);
        self.set_level(pin, !high);
        self.holds[pin] = (polls > 0).then_some(PinHold { level: high, polls });
    }

    /// Number of watchdog feeds since creation.
    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    /// Raises raw RTC interrupt flags.
    pub fn raise_interrupts(&mut self, flags: u32) {
        self.int_raw |= flags;
    }

    /// Raw RTC interrupt flags that have not been cleared.
    pub fn pending_interrupts(&self) -> u32 {
        self.int_raw
    }

    /// Writes application data into RTC fast memory, which invalidates the memory CRC.
    pub fn write_rtc_memory(&mut self, offset: usize, data: &[u8]) {
        self.memory[offset..][..data.len()].copy_from_slice(data);
    }

    /// Whether `RTC_MEMORY_CRC_REG` matches the current memory contents and entry address.
    pub fn memory_crc_valid(&self) -> bool {
        self.load(RTC_MEMORY_CRC_REG) == self.memory_crc()
    }

    /// The timer wakeup deadline, if the alarm is enabled.
    pub fn armed_alarm(&self) -> Option<u64> {
        let hi = self.load(RTC_CNTL_SLP_TIMER1);
        if hi & RTC_CNTL_MAIN_TIMER_ALARM_EN == 0 {
            return None;
        }

        let lo = self.load(RTC_CNTL_SLP_TIMER0);
        Some(((hi & RTC_CNTL_SLP_VAL_HI) as u64) << 32 | lo as u64)
    }

    /// Writes since creation or the last wakeup, oldest first. Only the most recent writes are
    /// kept.
    pub fn writes(&self) -> impl Iterator<Item = RegisterWrite> + '_ {
        self.journal.oldest_ordered().copied()
    }

    /// Simulates the next wakeup caused by `cause`.
    ///
    /// A timer wakeup moves the counter to the armed deadline. The cause is reported in
    /// `RTC_CNTL_SLP_WAKEUP_CAUSE`, the matching interrupts are raised, `SLEEP_EN` is released and
    /// the journal starts over.
    pub fn wake(&mut self, cause: WakeCause) {
        let mut flags = RTC_CNTL_SLP_WAKEUP_INT;
        if cause == WakeCause::Timer {
            flags |= RTC_CNTL_MAIN_TIMER_INT;
            if let Some(deadline) = self.armed_alarm() {
                self.counter = self.counter.max(deadline);
            }
        }

        self.store(RTC_CNTL_SLP_WAKEUP_CAUSE, cause.reason().bits());
        self.int_raw |= flags;

        let state = self.load(RTC_CNTL_STATE0);
        self.store(RTC_CNTL_STATE0, state & !RTC_CNTL_SLEEP_EN);
        self.sleep = None;
        self.journal.clear();
    }

    /// Checks the state captured when `SLEEP_EN` last rose.
    pub fn audit(&self, entry: StubEntry) -> Result<(), BootLoopHazard> {
        let Some(sleep) = self.sleep else {
            return Err(BootLoopHazard::SleepNotEntered);
        };

        if sleep.entry != entry.address() {
            return Err(BootLoopHazard::StubNotReinstalled);
        }
        if !sleep.crc_valid {
            return Err(BootLoopHazard::StaleMemoryCrc);
        }
        if sleep.pending != 0 {
            return Err(BootLoopHazard::PendingInterrupt);
        }

        Ok(())
    }

    fn set_level(&mut self, pin: usize, high: bool) {
        if high {
            self.gpio_levels |= 1 << pin;
        } else {
            self.gpio_levels &= !(1 << pin);
        }
    }

    fn read_gpio(&mut self) -> u32 {
        let mut levels = self.gpio_levels;

        for (pin, hold) in self.holds.iter_mut().enumerate() {
            if let Some(h) = hold {
                if h.level {
                    levels |= 1 << pin;
                } else {
                    levels &= !(1 << pin);
                }

                h.polls -= 1;
                if h.polls == 0 {
                    *hold = None;
                }
            }
        }

        levels
    }

    fn memory_crc(&self) -> u32 {
        let crc = Crc::<u32>::new(&ALGO_CRC32_NORMAL);
        let mut digest = crc.digest();
        digest.update(&self.load(RTC_ENTRY_ADDR_REG).to_le_bytes());
        digest.update(&self.memory);
        digest.finalize()
    }

    fn load(&self, reg: Reg) -> u32 {
        self.registers.get(&reg).copied().unwrap_or(0)
    }

    fn store(&mut self, reg: Reg, value: u32) {
        if self.registers.insert(reg, value).is_err() {
            panic!("simulated register file is full, cannot store {reg:?}");
        }
    }
}

impl RegisterAccess for SimulatedRtc {
    fn read(&mut self, reg: Reg) -> u32 {
        match reg {
            RTC_CNTL_TIME_LOW0 => self.latched as u32,
            RTC_CNTL_TIME_HIGH0 => (self.latched >> 32) as u32,
            RTC_CNTL_INT_RAW => self.int_raw,
            GPIO_IN => self.read_gpio(),
            RTC_CNTL_TIME_UPDATE | RTC_CNTL_INT_CLR | TIMG0_WDTFEED => 0,
            _ => self.load(reg),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.journal.write(RegisterWrite::new(reg, value));

        match reg {
            RTC_CNTL_TIME_UPDATE => {
                if value & RTC_CNTL_TIME_UPDATE_BIT != 0 {
                    self.latched = self.counter;
                }
            }
            RTC_CNTL_INT_CLR => self.int_raw &= !value,
            TIMG0_WDTFEED => self.feeds += 1,
            GPIO_IN | RTC_CNTL_TIME_LOW0 | RTC_CNTL_TIME_HIGH0 | RTC_CNTL_INT_RAW => {}
            RTC_CNTL_STATE0 => {
                let was_set = self.load(reg) & RTC_CNTL_SLEEP_EN != 0;
                let rising = !was_set && value & RTC_CNTL_SLEEP_EN != 0;
                self.store(reg, value);

                if rising {
                    self.sleep = Some(SleepEntry {
                        entry: self.load(RTC_ENTRY_ADDR_REG),
                        crc_valid: self.memory_crc_valid(),
                        pending: self.int_raw & RTC_CNTL_INT_CLR_ALL,
                    });
                }
            }
            _ => self.store(reg, value),
        }
    }

    fn update_memory_crc(&mut self) {
        let crc = self.memory_crc();
        self.write(RTC_MEMORY_CRC_REG, crc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::install;

    const ENTRY: StubEntry = StubEntry::from_address(0x5000_0200);

    fn sleep(rtc: &mut SimulatedRtc) {
        rtc.clear_bits(RTC_CNTL_STATE0, RTC_CNTL_SLEEP_EN);
        rtc.set_bits(RTC_CNTL_STATE0, RTC_CNTL_SLEEP_EN);
    }

    #[test]
    fn crc_matches_the_rom_algorithm() {
        // crc32_le(u32::MAX, "123456789")
        let crc = Crc::<u32>::new(&ALGO_CRC32_NORMAL);
        assert_eq!(crc.checksum(b"123456789"), 0xD202_D277);
    }

    #[test]
    fn counter_wraps_at_48_bits() {
        let mut rtc = SimulatedRtc::new();
        rtc.advance(RTC_COUNTER_MASK);
        rtc.advance(2);
        assert_eq!(rtc.counter(), 1);
    }

    #[test]
    fn latch_is_explicit() {
        let mut rtc = SimulatedRtc::new();
        rtc.advance(0x0000_ABCD_0000_0001);
        assert_eq!(rtc.read(RTC_CNTL_TIME_LOW0), 0);

        rtc.write(RTC_CNTL_TIME_UPDATE, RTC_CNTL_TIME_UPDATE_BIT);
        assert_eq!(rtc.read(RTC_CNTL_TIME_LOW0), 1);
        assert_eq!(rtc.read(RTC_CNTL_TIME_HIGH0), 0xABCD);
        assert_eq!(rtc.read(RTC_CNTL_TIME_UPDATE), 0);
    }

    #[test]
    fn interrupts_are_write_one_to_clear() {
        let mut rtc = SimulatedRtc::new();
        rtc.raise_interrupts(RTC_CNTL_SLP_WAKEUP_INT | RTC_CNTL_MAIN_TIMER_INT);

        rtc.write(RTC_CNTL_INT_CLR, RTC_CNTL_MAIN_TIMER_INT);
        assert_eq!(rtc.read(RTC_CNTL_INT_RAW), RTC_CNTL_SLP_WAKEUP_INT);

        rtc.write(RTC_CNTL_INT_CLR, RTC_CNTL_INT_CLR_ALL);
        assert_eq!(rtc.pending_interrupts(), 0);
    }

    #[test]
    fn scripted_pin() {
        let mut rtc = SimulatedRtc::new();
        rtc.hold_pin(3, true, 2);

        assert_eq!(rtc.read(GPIO_IN) & 1 << 3, 1 << 3);
        assert_eq!(rtc.read(GPIO_IN) & 1 << 3, 1 << 3);
        assert_eq!(rtc.read(GPIO_IN) & 1 << 3, 0);
        assert_eq!(rtc.read(GPIO_IN) & 1 << 3, 0);
    }

    #[test]
    fn crc_covers_entry_and_memory() {
        let mut rtc = SimulatedRtc::new();
        assert!(!rtc.memory_crc_valid());

        install(&mut rtc, ENTRY);
        assert!(rtc.memory_crc_valid());

        rtc.write_rtc_memory(8, &[1, 2, 3]);
        assert!(!rtc.memory_crc_valid());

        rtc.update_memory_crc();
        rtc.write(RTC_ENTRY_ADDR_REG, 0x5000_0300);
        assert!(!rtc.memory_crc_valid());
    }

    #[test]
    fn audit_flags_each_hazard() {
        let mut rtc = SimulatedRtc::new();
        assert_eq!(rtc.audit(ENTRY), Err(BootLoopHazard::SleepNotEntered));

        sleep(&mut rtc);
        assert_eq!(rtc.audit(ENTRY), Err(BootLoopHazard::StubNotReinstalled));

        rtc.wake(WakeCause::Other);
        rtc.write(RTC_ENTRY_ADDR_REG, ENTRY.address());
        sleep(&mut rtc);
        assert_eq!(rtc.audit(ENTRY), Err(BootLoopHazard::StaleMemoryCrc));

        rtc.wake(WakeCause::Other);
        install(&mut rtc, ENTRY);
        sleep(&mut rtc);
        assert_eq!(rtc.audit(ENTRY), Err(BootLoopHazard::PendingInterrupt));

        rtc.wake(WakeCause::Other);
        rtc.write(RTC_CNTL_INT_CLR, RTC_CNTL_INT_CLR_ALL);
        sleep(&mut rtc);
        assert_eq!(rtc.audit(ENTRY), Ok(()));
    }

    #[test]
    fn state_is_captured_on_the_rising_edge() {
        let mut rtc = SimulatedRtc::new();
        install(&mut rtc, ENTRY);
        sleep(&mut rtc);

        // changes after the edge do not affect what the ROM saw
        rtc.write(RTC_ENTRY_ADDR_REG, 0);
        rtc.set_bits(RTC_CNTL_STATE0, RTC_CNTL_SLEEP_EN);
        assert_eq!(rtc.audit(ENTRY), Ok(()));
    }

    #[test]
    fn timer_wake_reaches_the_deadline() {
        let mut rtc = SimulatedRtc::new();
        rtc.advance(100);
        rtc.write(RTC_CNTL_SLP_TIMER0, 5000);
        rtc.write(RTC_CNTL_SLP_TIMER1, RTC_CNTL_MAIN_TIMER_ALARM_EN);
        assert_eq!(rtc.armed_alarm(), Some(5000));

        rtc.wake(WakeCause::Timer);
        assert_eq!(rtc.counter(), 5000);
        assert_eq!(rtc.pending_interrupts(), RTC_CNTL_SLP_WAKEUP_INT | RTC_CNTL_MAIN_TIMER_INT);
        assert_eq!(rtc.writes().count(), 0);
    }

    #[test]
    fn journal_keeps_the_most_recent_writes() {
        let mut rtc = SimulatedRtc::new();
        for i in 0..(JOURNAL_CAPACITY as u32 + 10) {
            rtc.write(TIMG0_WDTFEED, i);
        }

        assert_eq!(rtc.writes().count(), JOURNAL_CAPACITY);
        assert_eq!(rtc.writes().next().map(|w| w.value), Some(10));
        assert_eq!(rtc.feeds(), JOURNAL_CAPACITY as u32 + 10);
    }
}
