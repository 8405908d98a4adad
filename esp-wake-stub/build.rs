use esp_config::{ConfigOption, DisplayHint, Stability, Validator, Value, generate_config};

fn main() {
    // emit config
    generate_config(
        "esp-wake-stub",
        &[
            ConfigOption {
                name: String::from("timer-interval-us"),
                description: String::from("Interval in microseconds the wake stub re-arms the RTC timer for on \
                every cycle it decides to keep sleeping."),
                default_value: Value::Integer(10_000_000),
                // The fixed-point conversion shifts the interval left by 19 bits.
                constraint: Some(Validator::IntegerInRange(1..(1 << 45))),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("slow-clock-source"),
                description: String::from("Oscillator driving RTC_SLOW_CLK. Selects the sleep time overhead \
                and the nominal calibration period used when none has been measured yet."),
                default_value: Value::String(String::from("rc-slow")),
                constraint: Some(Validator::Enumeration(vec![
                    String::from("rc-slow"),
                    String::from("xtal32k"),
                ])),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("cpu-clock-mhz"),
                description: String::from("CPU frequency the ROM bootloader runs at while waking up. Part of \
                the fixed deep sleep time overhead."),
                default_value: Value::String(String::from("160")),
                constraint: Some(Validator::Enumeration(vec![
                    String::from("80"),
                    String::from("160"),
                ])),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("pin-wait-max-polls"),
                description: String::from("Maximum number of polls the wake stub waits for the wake pin to \
                return to its idle level before resuming the full boot. 0 waits forever."),
                default_value: Value::Integer(0),
                constraint: Some(Validator::IntegerInRange(0..(1 << 32))),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("resume-after-cycles"),
                description: String::from("Resume the full boot after this many wake cycles handled by the \
                stub. 0 never resumes; the device then only leaves the stub through a reset."),
                default_value: Value::Integer(0),
                constraint: Some(Validator::IntegerInRange(0..(1 << 32))),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
        ],
        true,
        true,
    );
}
