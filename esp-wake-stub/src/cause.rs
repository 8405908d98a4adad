//! Classification of the current wake event.

use crate::regs::{RTC_CNTL_SLP_WAKEUP_CAUSE, RTC_CNTL_WAKEUP_CAUSE, RegisterAccess};

bitflags::bitflags! {
    /// Bits of `RTC_CNTL_SLP_WAKEUP_CAUSE` on the ESP32-C3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WakeupReason: u32 {
        /// GPIO wakeup
        const GpioTrigEn      = 1 << 2;
        /// Timer wakeup
        const TimerTrigEn     = 1 << 3;
        /// MAC wakeup (light sleep only)
        const WifiTrigEn      = 1 << 5;
        /// UART0 wakeup (light sleep only)
        const Uart0TrigEn     = 1 << 6;
        /// UART1 wakeup (light sleep only)
        const Uart1TrigEn     = 1 << 7;
        /// BT wakeup (light sleep only)
        const BtTrigEn        = 1 << 10;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WakeupReason {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        defmt::write!(fmt, "WakeupReason({=u32:#x})", self.bits())
    }
}

impl WakeupReason {
    /// Reads the wakeup cause of the current wake event.
    #[inline(always)]
    pub fn read(regs: &mut impl RegisterAccess) -> Self {
        Self::from_bits_retain(regs.read(RTC_CNTL_SLP_WAKEUP_CAUSE) & RTC_CNTL_WAKEUP_CAUSE)
    }
}

/// What ended the last sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCause {
    /// A pin reached its trigger level.
    Gpio,
    /// The slow clock counter reached the compare value.
    Timer,
    /// Anything else, including a reset that went through the stub.
    Other,
}

impl WakeCause {
    /// Derives the cause from the wakeup reason bits. The timer wins if several sources fired.
    pub const fn from_reason(reason: WakeupReason) -> Self {
        if reason.contains(WakeupReason::TimerTrigEn) {
            Self::Timer
        } else if reason.contains(WakeupReason::GpioTrigEn) {
            Self::Gpio
        } else {
            Self::Other
        }
    }

    /// Reads and classifies the cause of the current wake event.
    #[inline(always)]
    pub fn read(regs: &mut impl RegisterAccess) -> Self {
        Self::from_reason(WakeupReason::read(regs))
    }

    /// The wakeup reason bits the hardware reports for this cause.
    pub const fn reason(self) -> WakeupReason {
        match self {
            Self::Gpio => WakeupReason::GpioTrigEn,
            Self::Timer => WakeupReason::TimerTrigEn,
            Self::Other => WakeupReason::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRtc;

    #[test]
    fn timer_takes_precedence() {
        let both = WakeupReason::GpioTrigEn | WakeupReason::TimerTrigEn;
        assert_eq!(WakeCause::from_reason(both), WakeCause::Timer);
        assert_eq!(WakeCause::from_reason(WakeupReason::GpioTrigEn), WakeCause::Gpio);
        assert_eq!(WakeCause::from_reason(WakeupReason::Uart0TrigEn), WakeCause::Other);
        assert_eq!(WakeCause::from_reason(WakeupReason::empty()), WakeCause::Other);
    }

    #[test]
    fn unknown_bits_are_kept() {
        let reason = WakeupReason::from_bits_retain(1 << 16 | 1 << 2);
        assert_eq!(WakeCause::from_reason(reason), WakeCause::Gpio);
        assert_eq!(reason.bits(), 0x1_0004);
    }

    #[test]
    fn cause_is_read_from_hardware() {
        let mut rtc = SimulatedRtc::new();
        assert_eq!(WakeCause::read(&mut rtc), WakeCause::Other);

        rtc.wake(WakeCause::Gpio);
        assert_eq!(WakeCause::read(&mut rtc), WakeCause::Gpio);

        rtc.wake(WakeCause::Timer);
        assert_eq!(WakeCause::read(&mut rtc), WakeCause::Timer);
    }
}
