//! # ESP32-C3 register map
//!
//! ## Overview
//!
//! Addresses and bit layouts of the registers the wake stub touches. Everything in here is used
//! before the normal boot has initialized the runtime, so the registers are accessed through a
//! [`RegisterAccess`] handle rather than through a peripheral access crate.
//!
//! Layouts follow the ESP32-C3 technical reference manual. The slow clock counter is 48 bits wide
//! and split across two registers for both the live value and the compare value.

/// Base address of the RTC_CNTL peripheral (`LPWR` in esp-hal).
pub const RTC_CNTL_BASE: u32 = 0x6000_8000;
/// Base address of the GPIO matrix.
pub const GPIO_BASE: u32 = 0x6000_4000;
/// Base address of timer group 0.
pub const TIMG0_BASE: u32 = 0x6001_F000;

/// Number of fractional bits of the slow clock calibration value.
pub const RTC_CLK_CAL_FRACT: u32 = 19;

/// Mask of the 48 significant bits of the slow clock counter.
pub const RTC_COUNTER_MASK: u64 = (1 << 48) - 1;

/// A memory-mapped 32-bit register, identified by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reg(u32);

impl Reg {
    /// Creates a register handle for the given absolute address.
    pub const fn at(address: u32) -> Self {
        Self(address)
    }

    /// The absolute address of the register.
    pub const fn address(self) -> u32 {
        self.0
    }

    const fn rtc_cntl(offset: u32) -> Self {
        Self(RTC_CNTL_BASE + offset)
    }
}

/// Sleep state control. Holds the `SLEEP_EN` latch.
pub const RTC_CNTL_STATE0: Reg = Reg::rtc_cntl(0x0018);
/// Setting this bit requests the chip to enter the configured sleep mode.
pub const RTC_CNTL_SLEEP_EN: u32 = 1 << 31;

/// Low 32 bits of the timer wakeup compare value.
pub const RTC_CNTL_SLP_TIMER0: Reg = Reg::rtc_cntl(0x0004);
/// High 16 bits of the timer wakeup compare value and the alarm enable.
pub const RTC_CNTL_SLP_TIMER1: Reg = Reg::rtc_cntl(0x0008);
/// Mask of `SLP_VAL_HI` within [`RTC_CNTL_SLP_TIMER1`].
pub const RTC_CNTL_SLP_VAL_HI: u32 = 0xFFFF;
/// Arms the main timer alarm. Must be written together with `SLP_VAL_HI`.
pub const RTC_CNTL_MAIN_TIMER_ALARM_EN: u32 = 1 << 16;

/// Writing [`RTC_CNTL_TIME_UPDATE_BIT`] latches the live counter into the `TIME_*0` registers.
pub const RTC_CNTL_TIME_UPDATE: Reg = Reg::rtc_cntl(0x000C);
/// Latch request bit in [`RTC_CNTL_TIME_UPDATE`].
pub const RTC_CNTL_TIME_UPDATE_BIT: u32 = 1 << 31;
/// Latched counter, bits 31..0.
pub const RTC_CNTL_TIME_LOW0: Reg = Reg::rtc_cntl(0x0010);
/// Latched counter, bits 47..32.
pub const RTC_CNTL_TIME_HIGH0: Reg = Reg::rtc_cntl(0x0014);
/// Mask of the significant bits of [`RTC_CNTL_TIME_HIGH0`].
pub const RTC_CNTL_TIMER_VALUE0_HIGH: u32 = 0xFFFF;

/// Raw RTC interrupt status.
pub const RTC_CNTL_INT_RAW: Reg = Reg::rtc_cntl(0x0044);
/// Write-1-to-clear RTC interrupt flags.
pub const RTC_CNTL_INT_CLR: Reg = Reg::rtc_cntl(0x004C);
/// Sleep wakeup interrupt.
pub const RTC_CNTL_SLP_WAKEUP_INT: u32 = 1 << 0;
/// Sleep reject interrupt.
pub const RTC_CNTL_SLP_REJECT_INT: u32 = 1 << 1;
/// Main timer alarm interrupt.
pub const RTC_CNTL_MAIN_TIMER_INT: u32 = 1 << 10;
/// Every flag the wake stub clears before going back to sleep.
pub const RTC_CNTL_INT_CLR_ALL: u32 = 0xFFFF;

/// General purpose retention register. Counts the wake cycles handled by the stub.
pub const RTC_CNTL_STORE0: Reg = Reg::rtc_cntl(0x0050);
/// Slow clock calibration period, written by the boot code (`RTC_SLOW_CLK_CAL_REG`).
pub const RTC_CNTL_STORE1: Reg = Reg::rtc_cntl(0x0054);
/// Wake stub entry address checked by the ROM on wakeup (`RTC_ENTRY_ADDR_REG`).
pub const RTC_CNTL_STORE6: Reg = Reg::rtc_cntl(0x00C0);
/// CRC of the RTC fast memory checked by the ROM on wakeup (`RTC_MEMORY_CRC_REG`).
pub const RTC_CNTL_STORE7: Reg = Reg::rtc_cntl(0x00C4);

/// Wake cycle counter.
pub const RTC_WAKE_CYCLES_REG: Reg = RTC_CNTL_STORE0;
/// Slow clock calibration.
pub const RTC_SLOW_CLK_CAL_REG: Reg = RTC_CNTL_STORE1;
/// Wake stub entry address.
pub const RTC_ENTRY_ADDR_REG: Reg = RTC_CNTL_STORE6;
/// RTC fast memory CRC.
pub const RTC_MEMORY_CRC_REG: Reg = RTC_CNTL_STORE7;

/// Cause of the last wakeup from sleep.
pub const RTC_CNTL_SLP_WAKEUP_CAUSE: Reg = Reg::rtc_cntl(0x00F8);
/// Mask of `WAKEUP_CAUSE` within [`RTC_CNTL_SLP_WAKEUP_CAUSE`].
pub const RTC_CNTL_WAKEUP_CAUSE: u32 = 0x1_FFFF;

/// Input levels of GPIO0..=21.
pub const GPIO_IN: Reg = Reg::at(GPIO_BASE + 0x003C);

/// Timer group 0 watchdog feed. Any written value feeds the watchdog.
pub const TIMG0_WDTFEED: Reg = Reg::at(TIMG0_BASE + 0x0060);

/// Access to the hardware registers.
///
/// This is the only way the wake stub and the deadline computation reach the hardware, which
/// allows substituting a simulated register file in tests. Implementations must not allocate or
/// log: they are called from the wake stub.
pub trait RegisterAccess {
    /// Reads the current value of `reg`.
    fn read(&mut self, reg: Reg) -> u32;

    /// Writes `value` to `reg`.
    fn write(&mut self, reg: Reg, value: u32);

    /// Recomputes the CRC of the RTC fast memory and stores it in [`RTC_MEMORY_CRC_REG`].
    ///
    /// The ROM only jumps into the wake stub if this CRC matches.
    fn update_memory_crc(&mut self);

    /// Read-modify-write of `reg`.
    #[inline(always)]
    fn modify(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    /// Sets the bits of `mask` in `reg`.
    #[inline(always)]
    fn set_bits(&mut self, reg: Reg, mask: u32) {
        self.modify(reg, |v| v | mask);
    }

    /// Clears the bits of `mask` in `reg`.
    #[inline(always)]
    fn clear_bits(&mut self, reg: Reg, mask: u32) {
        self.modify(reg, |v| v & !mask);
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    #[inline(always)]
    fn read(&mut self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    #[inline(always)]
    fn write(&mut self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }

    #[inline(always)]
    fn update_memory_crc(&mut self) {
        (**self).update_memory_crc()
    }
}

/// Direct access to the ESP32-C3 registers.
#[cfg(feature = "esp32c3")]
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

#[cfg(feature = "esp32c3")]
impl Mmio {
    /// Creates the register handle.
    ///
    /// # Safety
    ///
    /// The caller must ensure nothing else accesses the same registers concurrently. This holds
    /// inside the wake stub, which runs before any other code.
    #[inline(always)]
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }
}

#[cfg(feature = "esp32c3")]
impl RegisterAccess for Mmio {
    #[inline(always)]
    fn read(&mut self, reg: Reg) -> u32 {
        unsafe { (reg.address() as usize as *const u32).read_volatile() }
    }

    #[inline(always)]
    fn write(&mut self, reg: Reg, value: u32) {
        unsafe { (reg.address() as usize as *mut u32).write_volatile(value) }
    }

    #[inline(always)]
    fn update_memory_crc(&mut self) {
        crate::rom::set_rtc_memory_crc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_cntl_layout() {
        assert_eq!(RTC_CNTL_STATE0.address(), 0x6000_8018);
        assert_eq!(RTC_CNTL_SLP_TIMER0.address(), 0x6000_8004);
        assert_eq!(RTC_CNTL_SLP_TIMER1.address(), 0x6000_8008);
        assert_eq!(RTC_CNTL_TIME_UPDATE.address(), 0x6000_800C);
        assert_eq!(RTC_CNTL_INT_CLR.address(), 0x6000_804C);
        assert_eq!(RTC_SLOW_CLK_CAL_REG.address(), 0x6000_8054);
        assert_eq!(RTC_ENTRY_ADDR_REG.address(), 0x6000_80C0);
        assert_eq!(RTC_MEMORY_CRC_REG.address(), 0x6000_80C4);
    }

    #[test]
    fn alarm_enable_sits_above_high_counter_bits() {
        assert_eq!(RTC_CNTL_SLP_VAL_HI & RTC_CNTL_MAIN_TIMER_ALARM_EN, 0);
        assert_eq!(
            RTC_CNTL_SLP_VAL_HI.count_ones() + 32,
            RTC_COUNTER_MASK.count_ones()
        );
    }

    #[test]
    fn interrupt_clear_covers_timer_and_wakeup() {
        for flag in [
            RTC_CNTL_SLP_WAKEUP_INT,
            RTC_CNTL_SLP_REJECT_INT,
            RTC_CNTL_MAIN_TIMER_INT,
        ] {
            assert_eq!(RTC_CNTL_INT_CLR_ALL & flag, flag);
        }
    }
}
