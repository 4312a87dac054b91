use super::{
    ArrivalIndex, FieldNames, Position, ProtocolConfig, SignalPhase, UnitClass, UpdateEvent,
    UpdateKind,
};
use crate::transport::Frame;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Decode errors for inbound payloads. Both variants are non-fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Discriminator names a message type this build does not know
    UnknownType(String),
    /// Payload is not valid JSON or a required field is missing/invalid
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownType(tag) => write!(f, "unknown message type '{}'", tag),
            DecodeError::Malformed(reason) => write!(f, "malformed message: {}", reason),
        }
    }
}

impl std::error::Error for DecodeError {}

type Fields = Map<String, Value>;

/// Turns raw payloads into typed [`UpdateEvent`]s.
///
/// Each successfully decoded event gets the next arrival index; rejected
/// payloads do not consume an index.
pub struct EventNormalizer {
    protocol: ProtocolConfig,
    next_arrival: AtomicU64,
}

impl EventNormalizer {
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            next_arrival: AtomicU64::new(1),
        }
    }

    /// Decode a transport frame. Binary frames must carry UTF-8 JSON.
    pub fn normalize(&self, frame: &Frame) -> Result<UpdateEvent, DecodeError> {
        match frame {
            Frame::Text(text) => self.normalize_str(text),
            Frame::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| DecodeError::Malformed("binary payload is not UTF-8".into()))?;
                self.normalize_str(text)
            }
        }
    }

    /// Decode a JSON text payload.
    pub fn normalize_str(&self, raw: &str) -> Result<UpdateEvent, DecodeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| DecodeError::Malformed(format!("invalid JSON: {}", e)))?;
        let kind = self.classify(&value)?;
        let arrival = ArrivalIndex(self.next_arrival.fetch_add(1, Ordering::SeqCst));
        Ok(UpdateEvent::new(arrival, kind))
    }

    /// Classify and validate a decoded message without assigning an index.
    pub fn classify(&self, value: &Value) -> Result<UpdateKind, DecodeError> {
        let message = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("message must be a JSON object".into()))?;

        let type_field = &self.protocol.type_field;
        let tag = message
            .get(type_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DecodeError::Malformed(format!("missing '{}' discriminator", type_field))
            })?;

        let tags = &self.protocol.tags;
        let known = [
            &tags.unit_update,
            &tags.signal_phase,
            &tags.incident_start,
            &tags.incident_end,
        ];
        if !known.iter().any(|t| t.as_str() == tag) {
            return Err(DecodeError::UnknownType(tag.to_string()));
        }

        let body = self.body(message)?;
        let names = &self.protocol.fields;
        let id = required_id(body, &names.id)?;

        if tag == tags.unit_update {
            let raw_position = required(body, &names.position)?;
            let position = parse_position(raw_position, &names.position, names)?;
            let speed = parse_speed(required(body, &names.speed)?, &names.speed)?;
            let class = match body.get(&names.class) {
                None | Some(Value::Null) => UnitClass::default(),
                Some(v) => parse_class(v, &names.class)?,
            };
            Ok(UpdateKind::UpsertUnit {
                id,
                position,
                speed,
                class,
            })
        } else if tag == tags.signal_phase {
            let phase = parse_phase(required(body, &names.phase)?, &names.phase)?;
            let position = match body.get(&names.position) {
                None | Some(Value::Null) => None,
                Some(v) => Some(parse_position(v, &names.position, names)?),
            };
            Ok(UpdateKind::SetSignalPhase {
                id,
                phase,
                position,
            })
        } else if tag == tags.incident_start {
            let waypoints = match body.get(&names.waypoints) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(points)) => points
                    .iter()
                    .map(|p| parse_position(p, &names.waypoints, names))
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => {
                    return Err(DecodeError::Malformed(format!(
                        "'{}' must be an array of positions",
                        names.waypoints
                    )))
                }
            };
            Ok(UpdateKind::StartIncident { id, waypoints })
        } else {
            Ok(UpdateKind::EndIncident { id })
        }
    }

    fn body<'a>(&self, message: &'a Fields) -> Result<&'a Fields, DecodeError> {
        match &self.protocol.payload_field {
            None => Ok(message),
            Some(field) => message
                .get(field)
                .and_then(Value::as_object)
                .ok_or_else(|| DecodeError::Malformed(format!("missing '{}' object", field))),
        }
    }
}

fn required<'a>(body: &'a Fields, field: &str) -> Result<&'a Value, DecodeError> {
    match body.get(field) {
        None | Some(Value::Null) => Err(DecodeError::Malformed(format!("missing '{}'", field))),
        Some(v) => Ok(v),
    }
}

/// Identifiers may arrive as strings or integers; both normalize to a string.
fn required_id(body: &Fields, field: &str) -> Result<String, DecodeError> {
    match required(body, field)? {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        _ => Err(DecodeError::Malformed(format!(
            "'{}' must be a non-empty string or integer",
            field
        ))),
    }
}

/// Accepts `{"x": .., "y": ..}` (keys from [`FieldNames`]) or `[x, y]`.
fn parse_position(
    value: &Value,
    field: &str,
    names: &FieldNames,
) -> Result<Position, DecodeError> {
    let (x, y) = match value {
        Value::Object(obj) => (
            obj.get(&names.x).and_then(Value::as_f64),
            obj.get(&names.y).and_then(Value::as_f64),
        ),
        Value::Array(items) if items.len() == 2 => (items[0].as_f64(), items[1].as_f64()),
        _ => (None, None),
    };

    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Position::new(x, y)),
        _ => Err(DecodeError::Malformed(format!(
            "'{}' must be a finite 2D coordinate",
            field
        ))),
    }
}

fn parse_speed(value: &Value, field: &str) -> Result<f64, DecodeError> {
    match value.as_f64() {
        Some(speed) if speed.is_finite() && speed >= 0.0 => Ok(speed),
        _ => Err(DecodeError::Malformed(format!(
            "'{}' must be a non-negative number",
            field
        ))),
    }
}

fn parse_class(value: &Value, field: &str) -> Result<UnitClass, DecodeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("'{}' must be a string", field)))?;
    match raw.to_ascii_lowercase().as_str() {
        "standard" | "normal" => Ok(UnitClass::Standard),
        "priority" | "emergency" => Ok(UnitClass::Priority),
        other => Err(DecodeError::Malformed(format!(
            "unknown unit class '{}'",
            other
        ))),
    }
}

fn parse_phase(value: &Value, field: &str) -> Result<SignalPhase, DecodeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("'{}' must be a string", field)))?;
    match raw.to_ascii_lowercase().as_str() {
        "stop" | "red" => Ok(SignalPhase::Stop),
        "caution" | "yellow" | "amber" => Ok(SignalPhase::Caution),
        "go" | "green" => Ok(SignalPhase::Go),
        other => Err(DecodeError::Malformed(format!(
            "unknown signal phase '{}'",
            other
        ))),
    }
}
