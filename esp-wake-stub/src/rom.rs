//! ROM functions used by the wake stub.
//!
//! The symbols are provided by the ROM linker scripts that esp-hal links in.

/// Recompute the CRC of the RTC fast memory and store it in `RTC_MEMORY_CRC_REG`.
#[inline(always)]
pub(crate) fn set_rtc_memory_crc() {
    unsafe extern "C" {
        fn set_rtc_memory_crc();
    }

    unsafe { set_rtc_memory_crc() };
}
