use std::env;
use std::time::Duration;

use vapelink_core::WireVariant;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Which firmware era the device speaks. The two eras are not decodable
    /// from the same tag arity, so this is fixed per session.
    pub variant: WireVariant,
    /// Mandatory pause after each outbound frame before the next one; the
    /// device cannot turn its serial buffer around faster.
    pub settle_delay: Duration,
    /// Capacity of the broadcast channel toward the UI shell.
    pub event_capacity: usize,
    /// Capacity of the serialized outbound command queue.
    pub command_capacity: usize,
    /// Ask the device for its current target and PID on connect (answered by
    /// legacy firmware only).
    pub query_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            variant: WireVariant::default(),
            settle_delay: Duration::from_millis(300),
            event_capacity: 256,
            command_capacity: 32,
            query_on_start: true,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut cfg = SessionConfig::default();

        if let Ok(v) = env::var("VAPELINK_WIRE_VARIANT") {
            match v.as_str() {
                "legacy" => cfg.variant = WireVariant::Legacy,
                "self_contained" => cfg.variant = WireVariant::SelfContained,
                _ => {}
            }
        }
        if let Ok(v) = env::var("VAPELINK_SETTLE_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.settle_delay = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = env::var("VAPELINK_QUERY_ON_START") {
            if let Ok(b) = v.parse::<bool>() {
                cfg.query_on_start = b;
            }
        }

        cfg
    }
}
