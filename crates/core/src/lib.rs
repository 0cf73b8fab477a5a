pub mod history;
pub mod protocol;
pub mod repeat;
pub mod state;

pub use history::{HistoryBuffer, HistorySample, HISTORY_SIZE};
pub use protocol::{parse_line, Query, TelemetryEvent, WireVariant};
pub use repeat::{Direction, RepeatPress, INITIAL_INTERVAL, SUBSEQUENT_INTERVAL};
pub use state::{PidState, SetpointState};

/// The minimum temperature to be settable.
pub const MINIMUM_TEMPERATURE: i32 = 80;

/// The maximum temperature to be settable.
pub const MAXIMUM_TEMPERATURE: i32 = 230;

/// Maximum raw heating value reported by the device.
pub const MAXIMUM_HEATING_VALUE: f32 = 255.0;

/// Upper bound for each PID coefficient; the wire carries tenths in one byte.
pub const PID_COEFFICIENT_MAX: f32 = 25.5;

pub fn clamp_setpoint(value: i32) -> i32 {
    value.clamp(MINIMUM_TEMPERATURE, MAXIMUM_TEMPERATURE)
}

/// Raw heating value (0..=255) as a whole percentage, truncated.
pub fn heating_percent(heating: f32) -> u8 {
    (heating / MAXIMUM_HEATING_VALUE * 100.0) as u8
}

pub fn pid_in_range(value: f32) -> bool {
    (0.0..=PID_COEFFICIENT_MAX).contains(&value)
}
