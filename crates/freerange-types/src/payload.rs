//! Structured payload values recorded with every snapshot.
//!
//! Environment-wide fields (fires, intensity, suppressants, ...) and the
//! per-agent action and observation maps are opaque to the telemetry layer:
//! it only guarantees that what goes in comes back out unchanged. To make
//! that guarantee total, payloads are restricted to [`StructuredValue`], a
//! tagged tree of numbers, strings, sequences and string-keyed mappings.
//!
//! # Encoding
//!
//! Values are stored as JSON text. Numbers map to JSON numbers, text to JSON
//! strings, sequences to arrays and mappings to objects. JSON `null` and
//! booleans have no counterpart and are rejected on decode. Non-finite
//! numbers cannot be represented in JSON and are rejected on encode, as are
//! trees nested deeper than [`MAX_DEPTH`], which the decoder would refuse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maximum number of nested sequences and mappings in one value.
///
/// Kept below the `serde_json` recursion limit of 128 so that every value
/// that encodes also decodes.
pub const MAX_DEPTH: usize = 100;

/// Errors raised while validating, encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// A number inside the payload is NaN or infinite.
    #[error("non-finite number at {path}")]
    NonFinite {
        /// Location of the offending number, e.g. `$.fires[2]`.
        path: String,
    },

    /// Sequences and mappings are nested deeper than [`MAX_DEPTH`].
    #[error("payload nested too deeply at {path}")]
    TooDeep {
        /// Location of the first container past the limit.
        path: String,
    },

    /// Serializing a validated payload failed.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// Stored text is not a well-formed structured value.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// A JSON value has no structured counterpart (null or boolean).
    #[error("unsupported JSON value at {path}: {kind}")]
    Unsupported {
        /// Location of the offending value.
        path: String,
        /// The JSON kind that was found.
        kind: &'static str,
    },
}

/// A self-describing structured value.
///
/// Equality is structural. Numbers compare with IEEE semantics, which is
/// exact for every value that passes [`StructuredValue::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructuredValue {
    /// A finite floating-point number.
    Number(f64),
    /// A UTF-8 string.
    Text(String),
    /// An ordered sequence of values.
    Sequence(Vec<StructuredValue>),
    /// A mapping from string keys to values, ordered by key.
    Mapping(BTreeMap<String, StructuredValue>),
}

impl StructuredValue {
    /// An empty sequence, the usual "nothing to report" payload.
    pub const fn empty_sequence() -> Self {
        Self::Sequence(Vec::new())
    }

    /// An empty mapping.
    pub const fn empty_mapping() -> Self {
        Self::Mapping(BTreeMap::new())
    }

    /// Check that every number in the tree is finite and that containers
    /// nest at most [`MAX_DEPTH`] levels deep.
    pub fn validate(&self) -> Result<(), PayloadError> {
        self.validate_at("$", 0)
    }

    /// `depth` counts the containers enclosing `self`.
    fn validate_at(&self, path: &str, depth: usize) -> Result<(), PayloadError> {
        match self {
            Self::Number(n) if !n.is_finite() => Err(PayloadError::NonFinite {
                path: path.to_owned(),
            }),
            Self::Number(_) | Self::Text(_) => Ok(()),
            Self::Sequence(_) | Self::Mapping(_) if depth >= MAX_DEPTH => {
                Err(PayloadError::TooDeep {
                    path: path.to_owned(),
                })
            }
            Self::Sequence(items) => {
                let depth = depth.saturating_add(1);
                for (i, item) in items.iter().enumerate() {
                    item.validate_at(&format!("{path}[{i}]"), depth)?;
                }
                Ok(())
            }
            Self::Mapping(entries) => {
                let depth = depth.saturating_add(1);
                for (key, value) in entries {
                    value.validate_at(&format!("{path}.{key}"), depth)?;
                }
                Ok(())
            }
        }
    }

    /// Validate and serialize to the stored text form.
    pub fn encode(&self) -> Result<String, PayloadError> {
        self.validate()?;
        serde_json::to_string(self).map_err(PayloadError::Encode)
    }

    /// Parse the stored text form.
    ///
    /// Values with no structured counterpart are reported with their path.
    pub fn decode(text: &str) -> Result<Self, PayloadError> {
        let json: serde_json::Value = serde_json::from_str(text).map_err(PayloadError::Decode)?;
        Self::try_from(json)
    }

    /// The number, if this is a number.
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The items, if this is a sequence.
    pub fn as_sequence(&self) -> Option<&[Self]> {
        match self {
            Self::Sequence(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// The entries, if this is a mapping.
    pub const fn as_mapping(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key when this is a mapping.
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_mapping().and_then(|entries| entries.get(key))
    }

    fn from_json_at(value: serde_json::Value, path: &str) -> Result<Self, PayloadError> {
        match value {
            serde_json::Value::Null => Err(PayloadError::Unsupported {
                path: path.to_owned(),
                kind: "null",
            }),
            serde_json::Value::Bool(_) => Err(PayloadError::Unsupported {
                path: path.to_owned(),
                kind: "boolean",
            }),
            serde_json::Value::Number(n) => {
                n.as_f64()
                    .map(Self::Number)
                    .ok_or_else(|| PayloadError::Unsupported {
                        path: path.to_owned(),
                        kind: "number",
                    })
            }
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| Self::from_json_at(item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Sequence),
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(key, item)| {
                    let child = Self::from_json_at(item, &format!("{path}.{key}"))?;
                    Ok((key, child))
                })
                .collect::<Result<BTreeMap<_, _>, PayloadError>>()
                .map(Self::Mapping),
        }
    }
}

impl TryFrom<serde_json::Value> for StructuredValue {
    type Error = PayloadError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json_at(value, "$")
    }
}

impl From<f64> for StructuredValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u8> for StructuredValue {
    fn from(n: u8) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u16> for StructuredValue {
    fn from(n: u16) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for StructuredValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i32> for StructuredValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for StructuredValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for StructuredValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Self>> From<Vec<T>> for StructuredValue {
    fn from(items: Vec<T>) -> Self {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<Self> for StructuredValue {
    fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        Self::Sequence(iter.into_iter().collect())
    }
}

impl<K: Into<String>> FromIterator<(K, Self)> for StructuredValue {
    fn from_iter<I: IntoIterator<Item = (K, Self)>>(iter: I) -> Self {
        Self::Mapping(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire(y: u8, x: u8, intensity: u8) -> StructuredValue {
        [
            ("y", StructuredValue::from(y)),
            ("x", StructuredValue::from(x)),
            ("intensity", StructuredValue::from(intensity)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn nested_value_survives_encoding() {
        let original: StructuredValue = vec![fire(1, 2, 3), fire(4, 5, 6)].into();
        let text = original.encode().ok();
        let decoded = text.as_deref().map(StructuredValue::decode);
        assert!(matches!(decoded, Some(Ok(ref v)) if *v == original));
    }

    #[test]
    fn fractional_numbers_are_exact() {
        let original = StructuredValue::Sequence(vec![
            StructuredValue::Number(0.1),
            StructuredValue::Number(1.0 / 3.0),
            StructuredValue::Number(-2.5e-300),
        ]);
        let decoded = original
            .encode()
            .ok()
            .and_then(|text| StructuredValue::decode(&text).ok());
        assert_eq!(decoded, Some(original));
    }

    #[test]
    fn integers_decode_as_numbers() {
        let decoded = StructuredValue::decode("[10, \"a\", {\"k\": []}]").ok();
        let expected = StructuredValue::Sequence(vec![
            StructuredValue::Number(10.0),
            StructuredValue::Text("a".to_owned()),
            [("k", StructuredValue::empty_sequence())].into_iter().collect(),
        ]);
        assert_eq!(decoded, Some(expected));
    }

    #[test]
    fn non_finite_numbers_are_rejected_with_path() {
        let fires = StructuredValue::Sequence(vec![
            StructuredValue::Number(1.0),
            StructuredValue::Number(f64::NAN),
        ]);
        let value: StructuredValue = [("fires", fires)].into_iter().collect();
        let err = value.encode().err();
        assert!(
            matches!(err, Some(PayloadError::NonFinite { ref path }) if path == "$.fires[1]"),
            "unexpected result: {err:?}"
        );
    }

    #[test]
    fn null_and_booleans_do_not_decode() {
        assert!(matches!(
            StructuredValue::decode("null"),
            Err(PayloadError::Unsupported { ref path, kind: "null" }) if path == "$"
        ));
        assert!(matches!(
            StructuredValue::decode("[true]"),
            Err(PayloadError::Unsupported { ref path, kind: "boolean" }) if path == "$[0]"
        ));
        assert!(matches!(
            StructuredValue::decode("{\"a\": null}"),
            Err(PayloadError::Unsupported { ref path, .. }) if path == "$.a"
        ));
        assert!(matches!(
            StructuredValue::decode("[1,"),
            Err(PayloadError::Decode(_))
        ));
    }

    fn nested(levels: usize) -> StructuredValue {
        let mut value = StructuredValue::Number(1.0);
        for _ in 0..levels {
            value = StructuredValue::Sequence(vec![value]);
        }
        value
    }

    #[test]
    fn depth_limit_value_encodes_and_decodes() {
        let original = nested(MAX_DEPTH);
        let decoded = original
            .encode()
            .ok()
            .and_then(|text| StructuredValue::decode(&text).ok());
        assert_eq!(decoded, Some(original));
    }

    #[test]
    fn values_past_the_depth_limit_are_rejected() {
        let err = nested(MAX_DEPTH.saturating_add(1)).encode().err();
        assert!(
            matches!(err, Some(PayloadError::TooDeep { ref path }) if path.starts_with("$[0][0]")),
            "unexpected result: {err:?}"
        );

        let mapped: StructuredValue = [("fires", nested(200))].into_iter().collect();
        assert!(matches!(
            mapped.validate(),
            Err(PayloadError::TooDeep { .. })
        ));
    }

    #[test]
    fn try_from_json_reports_unsupported_kind() {
        let json = serde_json::json!({"agents": [1, false]});
        let err = StructuredValue::try_from(json).err();
        assert!(
            matches!(
                err,
                Some(PayloadError::Unsupported { ref path, kind: "boolean" }) if path == "$.agents[1]"
            ),
            "unexpected result: {err:?}"
        );
    }

    #[test]
    fn accessors() {
        let value: StructuredValue = [("name", StructuredValue::from("tanker"))]
            .into_iter()
            .collect();
        assert_eq!(value.get("name").and_then(StructuredValue::as_text), Some("tanker"));
        assert!(value.get("missing").is_none());
        assert!(StructuredValue::from(2u8).as_number().is_some());
        assert_eq!(StructuredValue::empty_sequence().as_sequence().map(<[_]>::len), Some(0));
    }
}
