#![no_std]

use defmt_rtt as _;
use panic_probe as _;

/// Whether `measured` is within `percent` percent of `expected`.
pub fn within_percent(measured: u64, expected: u64, percent: u64) -> bool {
    let tolerance = expected * percent / 100;
    measured.abs_diff(expected) <= tolerance
}
