// Line protocol spoken by the vape over its RFCOMM serial link.
//
// Inbound telegrams are ASCII, `;`-delimited and newline-terminated; the
// first field is a one-character tag. Outbound commands are short binary
// frames. Two firmware eras exist and are not decodable from the same tag
// arity, so the variant is chosen once per session.

use serde::{Deserialize, Serialize};

use crate::heating_percent;

/// Which era of the device firmware the session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireVariant {
    /// 4-field `s` status with separate `t`/`p` report lines; `t=` carries
    /// the temperature as one raw byte and `t?`/`p?` queries are answered.
    #[default]
    Legacy,
    /// 5-field `s` status with the target prepended; `t=` carries the
    /// temperature as ASCII decimal and there are no query telegrams.
    SelfContained,
}

/// One decoded inbound telegram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Status {
        /// Present only on the self-contained variant, where the device
        /// echoes its current target inside the status line.
        target: Option<i32>,
        temperature: f32,
        heating: f32, // 0..=255
        battery_voltage: f32,
        battery_percent: u8,
    },
    PidReport {
        p: f32,
        i: f32,
        d: f32,
    },
    TargetReport {
        target: i32,
    },
}

/// Queries answered by legacy firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Target,
    Pid,
}

/// Decodes one inbound line. Malformed telegrams (unknown tag, wrong field
/// count, bad numeric literal) are expected under serial noise and yield
/// `None`; there is no partial decode.
pub fn parse_line(variant: WireVariant, raw: &str) -> Option<TelemetryEvent> {
    let mut fields = raw.trim_end_matches(['\r', '\n']).split(';');
    let tag = fields.next()?;
    let rest: Vec<&str> = fields.collect();

    match (tag, variant) {
        ("s", WireVariant::Legacy) => {
            if rest.len() != 4 {
                return None;
            }
            Some(TelemetryEvent::Status {
                target: None,
                temperature: rest[0].parse().ok()?,
                heating: rest[1].parse().ok()?,
                battery_voltage: rest[2].parse().ok()?,
                battery_percent: rest[3].parse().ok()?,
            })
        }
        ("s", WireVariant::SelfContained) => {
            if rest.len() != 5 {
                return None;
            }
            Some(TelemetryEvent::Status {
                target: Some(rest[0].parse().ok()?),
                temperature: rest[1].parse().ok()?,
                heating: rest[2].parse().ok()?,
                battery_voltage: rest[3].parse().ok()?,
                battery_percent: rest[4].parse().ok()?,
            })
        }
        ("p", WireVariant::Legacy) => {
            if rest.len() != 3 {
                return None;
            }
            Some(TelemetryEvent::PidReport {
                p: tenths(rest[0])?,
                i: tenths(rest[1])?,
                d: tenths(rest[2])?,
            })
        }
        ("t", WireVariant::Legacy) => {
            if rest.len() != 1 {
                return None;
            }
            Some(TelemetryEvent::TargetReport {
                target: rest[0].parse().ok()?,
            })
        }
        _ => None,
    }
}

// Coefficients travel as integer tenths in one byte.
fn tenths(field: &str) -> Option<f32> {
    field.parse::<u8>().ok().map(|n| f32::from(n) / 10.0)
}

/// Encodes a `t=` frame. The value must already be clamped to the settable
/// range; range validation is the caller's responsibility.
pub fn encode_set_temperature(variant: WireVariant, value: i32) -> Vec<u8> {
    match variant {
        WireVariant::Legacy => vec![b't', b'=', value as u8],
        WireVariant::SelfContained => format!("t={}\n", value).into_bytes(),
    }
}

/// Encodes a `p=` frame. Coefficients must be within `[0.0, 25.5]` so that
/// the rounded tenths fit one byte each.
pub fn encode_set_pid(p: f32, i: f32, d: f32) -> Vec<u8> {
    vec![b'p', b'=', tenths_byte(p), tenths_byte(i), tenths_byte(d)]
}

fn tenths_byte(value: f32) -> u8 {
    (value * 10.0).round() as u8
}

/// Encodes a `t?` / `p?` query (legacy firmware only).
pub fn encode_query(query: Query) -> Vec<u8> {
    match query {
        Query::Target => b"t?".to_vec(),
        Query::Pid => b"p?".to_vec(),
    }
}

impl TelemetryEvent {
    /// Heating power as a whole percentage for display, when this is a
    /// status telegram.
    pub fn heating_percent(&self) -> Option<u8> {
        match self {
            TelemetryEvent::Status { heating, .. } => Some(heating_percent(*heating)),
            _ => None,
        }
    }
}
