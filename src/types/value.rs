//! Runtime dataref values and their wire decoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XplinkError};

/// Declared value kind of a dataref, as reported by the metadata endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int,
    Float,
    Double,
    IntArray,
    FloatArray,
    /// Opaque byte string; travels base64-encoded and NUL-padded on the wire.
    Data,
}

impl ValueKind {
    pub fn is_array(&self) -> bool {
        matches!(self, ValueKind::IntArray | ValueKind::FloatArray)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float | ValueKind::Double)
    }
}

/// A decoded simulator value.
///
/// All numeric scalars are widened to `f64`; arrays likewise. Opaque `data`
/// datarefs decode to text with the trailing-NUL convention stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Array(Vec<f64>),
    Text(String),
}

impl Value {
    /// Decode a raw JSON wire value according to the dataref's declared kind.
    pub fn decode(raw: &serde_json::Value, kind: ValueKind) -> Result<Value> {
        match kind {
            ValueKind::Data => match raw {
                serde_json::Value::String(s) => Ok(Value::Text(decode_data_string(s)?)),
                other => Err(XplinkError::protocol(
                    "value decode",
                    format!("expected base64 string for data dataref, got {other}"),
                )),
            },
            ValueKind::IntArray | ValueKind::FloatArray => match raw {
                serde_json::Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(item.as_f64().ok_or_else(|| {
                            XplinkError::protocol(
                                "value decode",
                                format!("non-numeric array element {item}"),
                            )
                        })?);
                    }
                    Ok(Value::Array(out))
                }
                other => Err(XplinkError::protocol(
                    "value decode",
                    format!("expected array, got {other}"),
                )),
            },
            ValueKind::Int | ValueKind::Float | ValueKind::Double => {
                raw.as_f64().map(Value::Number).ok_or_else(|| {
                    XplinkError::protocol("value decode", format!("expected number, got {raw}"))
                })
            }
        }
    }

    /// Apply display rounding to `decimals` places. Text values pass through.
    ///
    /// Tiny negative artifacts (-0.001, 0.0) are clamped to zero so switch
    /// positions don't flicker between `-0.0` and `0.0`.
    pub fn rounded(&self, decimals: i32) -> Value {
        match self {
            Value::Number(n) => Value::Number(round_display(*n, decimals)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| round_display(*v, decimals)).collect())
            }
            Value::Text(_) => self.clone(),
        }
    }

    /// Encode for an outbound set-value request.
    pub fn to_wire(&self, kind: ValueKind) -> serde_json::Value {
        match (self, kind) {
            (Value::Text(s), ValueKind::Data) => {
                serde_json::Value::String(BASE64.encode(s.as_bytes()))
            }
            (Value::Text(s), _) => serde_json::Value::String(s.clone()),
            (Value::Number(n), _) => serde_json::json!(n),
            (Value::Array(items), _) => serde_json::json!(items),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

pub fn round_display(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let r = (v * factor).round() / factor;
    // squash -0.0 and sub-millimetric negatives
    if r <= 0.0 && r > -0.001 { 0.0 } else { r }
}

/// Decode a base64-encoded byte string, dropping the trailing-NUL padding
/// the simulator uses for fixed-size buffers.
pub fn decode_data_string(encoded: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| XplinkError::protocol("base64 decode", e.to_string()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_end_matches('\0').replace('\u{0}', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_decode_widens_to_f64() {
        let v = Value::decode(&serde_json::json!(42), ValueKind::Int).unwrap();
        assert_eq!(v, Value::Number(42.0));
    }

    #[test]
    fn data_decode_strips_trailing_nulls() {
        // "B738\0\0" base64-encoded
        let encoded = BASE64.encode(b"B738\0\0");
        let v = Value::decode(&serde_json::json!(encoded), ValueKind::Data).unwrap();
        assert_eq!(v, Value::Text("B738".to_string()));
    }

    #[test]
    fn array_decode_rejects_scalars() {
        assert!(Value::decode(&serde_json::json!(1.0), ValueKind::FloatArray).is_err());
    }

    #[test]
    fn rounding_clamps_negative_noise() {
        assert_eq!(Value::Number(-0.0004).rounded(3), Value::Number(0.0));
        assert_eq!(Value::Number(1.23456).rounded(2), Value::Number(1.23));
    }

    #[test]
    fn wire_encoding_of_data_is_base64() {
        let v = Value::Text("hello".to_string());
        let wire = v.to_wire(ValueKind::Data);
        assert_eq!(wire, serde_json::json!(BASE64.encode(b"hello")));
    }
}
