//! Typed values held by a setting.
//!
//! [`Value`] is a closed tagged variant with one case per supported kind.
//! Sequences are grouped under [`List`], whose cases are typed vectors, so a
//! list can never mix element types.

use crate::error::ValueError;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Every kind of value a setting can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float64,
    Complex128,
    String,
    Bytes,
    BoolList,
    Int32List,
    Int64List,
    Uint32List,
    Uint64List,
    Float64List,
    Complex128List,
    StringList,
    Map,
}

impl Kind {
    /// All kinds in their canonical order. The position of a kind in this
    /// array is its bit in a snapshot kind mask.
    pub const ALL: [Kind; 18] = [
        Kind::Bool,
        Kind::Int32,
        Kind::Int64,
        Kind::Uint32,
        Kind::Uint64,
        Kind::Float64,
        Kind::Complex128,
        Kind::String,
        Kind::Bytes,
        Kind::BoolList,
        Kind::Int32List,
        Kind::Int64List,
        Kind::Uint32List,
        Kind::Uint64List,
        Kind::Float64List,
        Kind::Complex128List,
        Kind::StringList,
        Kind::Map,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::Float64 => "float64",
            Kind::Complex128 => "complex128",
            Kind::String => "string",
            Kind::Bytes => "bytes",
            Kind::BoolList => "bool_list",
            Kind::Int32List => "int32_list",
            Kind::Int64List => "int64_list",
            Kind::Uint32List => "uint32_list",
            Kind::Uint64List => "uint64_list",
            Kind::Float64List => "float64_list",
            Kind::Complex128List => "complex128_list",
            Kind::StringList => "string_list",
            Kind::Map => "map",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complex number stored as a pair of doubles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// A homogeneous sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum List {
    Bytes(Vec<u8>),
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Float64(Vec<f64>),
    Complex128(Vec<Complex>),
    String(Vec<String>),
}

impl List {
    pub fn kind(&self) -> Kind {
        match self {
            List::Bytes(_) => Kind::Bytes,
            List::Bool(_) => Kind::BoolList,
            List::Int32(_) => Kind::Int32List,
            List::Int64(_) => Kind::Int64List,
            List::Uint32(_) => Kind::Uint32List,
            List::Uint64(_) => Kind::Uint64List,
            List::Float64(_) => Kind::Float64List,
            List::Complex128(_) => Kind::Complex128List,
            List::String(_) => Kind::StringList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            List::Bytes(v) => v.len(),
            List::Bool(v) => v.len(),
            List::Int32(v) => v.len(),
            List::Int64(v) => v.len(),
            List::Uint32(v) => v.len(),
            List::Uint64(v) => v.len(),
            List::Float64(v) => v.len(),
            List::Complex128(v) => v.len(),
            List::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_rendered(&self, out: &mut String) {
        fn items<T>(out: &mut String, items: &[T], mut each: impl FnMut(&mut String, &T)) {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                each(out, item);
            }
            out.push(']');
        }

        match self {
            List::Bytes(v) => items(out, v, |o, b| {
                let _ = write!(o, "{}", b);
            }),
            List::Bool(v) => items(out, v, |o, b| {
                let _ = write!(o, "{}", b);
            }),
            List::Int32(v) => items(out, v, |o, n| {
                let _ = write!(o, "{}", n);
            }),
            List::Int64(v) => items(out, v, |o, n| {
                let _ = write!(o, "{}", n);
            }),
            List::Uint32(v) => items(out, v, |o, n| {
                let _ = write!(o, "{}", n);
            }),
            List::Uint64(v) => items(out, v, |o, n| {
                let _ = write!(o, "{}", n);
            }),
            List::Float64(v) => items(out, v, |o, f| write_float(o, *f)),
            List::Complex128(v) => items(out, v, |o, c| write_complex(o, *c)),
            List::String(v) => items(out, v, |o, s| write_quoted(o, s)),
        }
    }

    fn to_json(&self) -> Json {
        match self {
            List::Bytes(v) => Json::from(v.clone()),
            List::Bool(v) => Json::from(v.clone()),
            List::Int32(v) => Json::from(v.clone()),
            List::Int64(v) => Json::from(v.clone()),
            List::Uint32(v) => Json::from(v.clone()),
            List::Uint64(v) => Json::from(v.clone()),
            List::Float64(v) => Json::Array(v.iter().map(|f| float_json(*f)).collect()),
            List::Complex128(v) => Json::Array(v.iter().map(|c| complex_json(*c)).collect()),
            List::String(v) => Json::from(v.clone()),
        }
    }
}

/// The current (or archived) value of a setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float64(f64),
    Complex128(Complex),
    String(String),
    List(List),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int32(_) => Kind::Int32,
            Value::Int64(_) => Kind::Int64,
            Value::Uint32(_) => Kind::Uint32,
            Value::Uint64(_) => Kind::Uint64,
            Value::Float64(_) => Kind::Float64,
            Value::Complex128(_) => Kind::Complex128,
            Value::String(_) => Kind::String,
            Value::List(list) => list.kind(),
            Value::Map(_) => Kind::Map,
        }
    }

    /// The unset value of a kind.
    pub fn zero(kind: Kind) -> Self {
        match kind {
            Kind::Bool => Value::Bool(false),
            Kind::Int32 => Value::Int32(0),
            Kind::Int64 => Value::Int64(0),
            Kind::Uint32 => Value::Uint32(0),
            Kind::Uint64 => Value::Uint64(0),
            Kind::Float64 => Value::Float64(0.0),
            Kind::Complex128 => Value::Complex128(Complex::default()),
            Kind::String => Value::String(String::new()),
            Kind::Bytes => Value::List(List::Bytes(Vec::new())),
            Kind::BoolList => Value::List(List::Bool(Vec::new())),
            Kind::Int32List => Value::List(List::Int32(Vec::new())),
            Kind::Int64List => Value::List(List::Int64(Vec::new())),
            Kind::Uint32List => Value::List(List::Uint32(Vec::new())),
            Kind::Uint64List => Value::List(List::Uint64(Vec::new())),
            Kind::Float64List => Value::List(List::Float64(Vec::new())),
            Kind::Complex128List => Value::List(List::Complex128(Vec::new())),
            Kind::StringList => Value::List(List::String(Vec::new())),
            Kind::Map => Value::Map(BTreeMap::new()),
        }
    }

    /// Canonical textual form. The output is always a valid JSON fragment so
    /// it can be embedded in a map's rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_rendered(&mut out);
        out
    }

    pub(crate) fn write_rendered(&self, out: &mut String) {
        match self {
            Value::Bool(b) => {
                let _ = write!(out, "{}", b);
            }
            Value::Int32(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Int64(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Uint32(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Uint64(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Float64(f) => write_float(out, *f),
            Value::Complex128(c) => write_complex(out, *c),
            Value::String(s) => write_quoted(out, s),
            Value::List(list) => list.write_rendered(out),
            Value::Map(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_quoted(out, key);
                    out.push_str(": ");
                    value.write_rendered(out);
                }
                out.push('}');
            }
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Bool(b) => Json::Bool(*b),
            Value::Int32(n) => Json::from(*n),
            Value::Int64(n) => Json::from(*n),
            Value::Uint32(n) => Json::from(*n),
            Value::Uint64(n) => Json::from(*n),
            Value::Float64(f) => float_json(*f),
            Value::Complex128(c) => complex_json(*c),
            Value::String(s) => Json::String(s.clone()),
            Value::List(list) => list.to_json(),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON value received over the wire into a value of `kind`.
    pub fn from_json(kind: Kind, json: &Json) -> Result<Self, ValueError> {
        let value = match kind {
            Kind::Bool => Value::Bool(json_bool(kind, json)?),
            Kind::Int32 => Value::Int32(json_int(kind, json)?),
            Kind::Int64 => Value::Int64(json_int(kind, json)?),
            Kind::Uint32 => Value::Uint32(json_uint(kind, json)?),
            Kind::Uint64 => Value::Uint64(json_uint(kind, json)?),
            Kind::Float64 => Value::Float64(json_float(kind, json)?),
            Kind::Complex128 => Value::Complex128(json_complex(kind, json)?),
            Kind::String => Value::String(json_string(kind, json)?),
            Kind::Bytes => match json {
                Json::String(s) => Value::List(List::Bytes(s.as_bytes().to_vec())),
                _ => Value::List(List::Bytes(json_items(kind, json, json_uint)?)),
            },
            Kind::BoolList => Value::List(List::Bool(json_items(kind, json, json_bool)?)),
            Kind::Int32List => Value::List(List::Int32(json_items(kind, json, json_int)?)),
            Kind::Int64List => Value::List(List::Int64(json_items(kind, json, json_int)?)),
            Kind::Uint32List => Value::List(List::Uint32(json_items(kind, json, json_uint)?)),
            Kind::Uint64List => Value::List(List::Uint64(json_items(kind, json, json_uint)?)),
            Kind::Float64List => Value::List(List::Float64(json_items(kind, json, json_float)?)),
            Kind::Complex128List => {
                Value::List(List::Complex128(json_items(kind, json, json_complex)?))
            }
            Kind::StringList => Value::List(List::String(json_items(kind, json, json_string)?)),
            Kind::Map => match json {
                Json::Object(obj) => Value::Map(
                    obj.iter()
                        .map(|(k, v)| Ok((k.clone(), Value::infer_json(v)?)))
                        .collect::<Result<_, ValueError>>()?,
                ),
                other => return Err(invalid(kind, format!("expected object, got {}", other))),
            },
        };
        Ok(value)
    }

    /// Pick the natural kind for an untyped JSON value (used for map elements).
    pub fn infer_json(json: &Json) -> Result<Self, ValueError> {
        match json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::Uint64(u))
                } else {
                    Ok(Value::Float64(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => {
                let kind = if items.iter().all(Json::is_boolean) {
                    Kind::BoolList
                } else if items.iter().all(Json::is_i64) {
                    Kind::Int64List
                } else if items.iter().all(Json::is_number) {
                    Kind::Float64List
                } else if items.iter().all(Json::is_string) {
                    Kind::StringList
                } else {
                    return Err(invalid(Kind::Map, "mixed element types in list"));
                };
                Value::from_json(kind, json)
            }
            Json::Object(_) => Value::from_json(Kind::Map, json),
            Json::Null => Err(invalid(Kind::Map, "null is not a value")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Complex> for Value {
    fn from(v: Complex) -> Self {
        Value::Complex128(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Value::List(v)
    }
}

// Non-finite floats have no JSON literal.
fn write_float(out: &mut String, f: f64) {
    if f.is_finite() {
        // Debug keeps the fraction on integral values ("12.0"), so the
        // rendering reads back as a float.
        let _ = write!(out, "{:?}", f);
    } else {
        out.push_str("null");
    }
}

fn write_complex(out: &mut String, c: Complex) {
    out.push('[');
    write_float(out, c.re);
    out.push_str(", ");
    write_float(out, c.im);
    out.push(']');
}

pub(crate) fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn float_json(f: f64) -> Json {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn complex_json(c: Complex) -> Json {
    Json::Array(vec![float_json(c.re), float_json(c.im)])
}

fn invalid(kind: Kind, reason: impl Into<String>) -> ValueError {
    ValueError::Invalid {
        kind,
        reason: reason.into(),
    }
}

fn json_bool(kind: Kind, json: &Json) -> Result<bool, ValueError> {
    json.as_bool()
        .ok_or_else(|| invalid(kind, format!("expected boolean, got {}", json)))
}

fn json_int<T: TryFrom<i64>>(kind: Kind, json: &Json) -> Result<T, ValueError> {
    json.as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| invalid(kind, format!("expected integer in range, got {}", json)))
}

fn json_uint<T: TryFrom<u64>>(kind: Kind, json: &Json) -> Result<T, ValueError> {
    json.as_u64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| invalid(kind, format!("expected unsigned integer in range, got {}", json)))
}

fn json_float(kind: Kind, json: &Json) -> Result<f64, ValueError> {
    json.as_f64()
        .ok_or_else(|| invalid(kind, format!("expected number, got {}", json)))
}

fn json_complex(kind: Kind, json: &Json) -> Result<Complex, ValueError> {
    match json {
        Json::Array(parts) if parts.len() == 2 => Ok(Complex::new(
            json_float(kind, &parts[0])?,
            json_float(kind, &parts[1])?,
        )),
        Json::Number(_) => Ok(Complex::new(json_float(kind, json)?, 0.0)),
        other => Err(invalid(
            kind,
            format!("expected [real, imag] pair, got {}", other),
        )),
    }
}

fn json_string(kind: Kind, json: &Json) -> Result<String, ValueError> {
    json.as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(kind, format!("expected string, got {}", json)))
}

fn json_items<T>(
    kind: Kind,
    json: &Json,
    each: fn(Kind, &Json) -> Result<T, ValueError>,
) -> Result<Vec<T>, ValueError> {
    json.as_array()
        .ok_or_else(|| invalid(kind, format!("expected array, got {}", json)))?
        .iter()
        .map(|item| each(kind, item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_rendering() {
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Int32(-99).render(), "-99");
        assert_eq!(Value::Uint64(u64::MAX).render(), "18446744073709551615");
        assert_eq!(Value::Float64(-99.99).render(), "-99.99");
        assert_eq!(Value::from("foo").render(), "\"foo\"");
        assert_eq!(
            Value::Complex128(Complex::new(23.12, 12.0)).render(),
            "[23.12, 12.0]"
        );
    }

    #[test]
    fn test_string_rendering_escapes() {
        let rendered = Value::from("say \"hi\"\n\\").render();
        assert_eq!(rendered, r#""say \"hi\"\n\\""#);
        let parsed: Json = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!("say \"hi\"\n\\"));
    }

    #[test]
    fn test_non_finite_float_renders_null() {
        assert_eq!(Value::Float64(f64::NAN).render(), "null");
        assert_eq!(
            Value::List(List::Float64(vec![1.5, f64::INFINITY])).render(),
            "[1.5, null]"
        );
    }

    #[test]
    fn test_list_rendering() {
        assert_eq!(Value::List(List::Int32(vec![1, -2, 3])).render(), "[1, -2, 3]");
        assert_eq!(Value::List(List::Bytes(b"ab".to_vec())).render(), "[97, 98]");
        assert_eq!(
            Value::List(List::String(vec!["a".into(), "b".into()])).render(),
            r#"["a", "b"]"#
        );
        assert_eq!(Value::zero(Kind::Uint64List).render(), "[]");
    }

    #[test]
    fn test_map_rendering_is_valid_json() {
        let mut map = BTreeMap::new();
        map.insert("port".to_string(), Value::Uint32(707));
        map.insert("tags".to_string(), Value::List(List::String(vec!["x".into()])));
        let rendered = Value::Map(map).render();
        assert_eq!(rendered, r#"{"port": 707, "tags": ["x"]}"#);
        let parsed: Json = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({"port": 707, "tags": ["x"]}));
    }

    #[test]
    fn test_zero_matches_kind() {
        for kind in Kind::ALL {
            assert_eq!(Value::zero(kind).kind(), kind);
        }
    }

    #[test]
    fn test_kind_bits_are_distinct() {
        let mask = Kind::ALL.iter().fold(0u32, |acc, k| {
            assert_eq!(acc & k.bit(), 0);
            acc | k.bit()
        });
        assert_eq!(mask.count_ones() as usize, Kind::ALL.len());
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(serde_json::to_string(&Kind::Complex128).unwrap(), "\"complex128\"");
        assert_eq!(serde_json::to_string(&Kind::Int32List).unwrap(), "\"int32_list\"");
        let kind: Kind = serde_json::from_str("\"uint64\"").unwrap();
        assert_eq!(kind, Kind::Uint64);
        assert_eq!(Kind::StringList.to_string(), "string_list");
    }

    #[test]
    fn test_from_json_checks_range() {
        assert_eq!(
            Value::from_json(Kind::Int32, &json!(-5)).unwrap(),
            Value::Int32(-5)
        );
        assert!(Value::from_json(Kind::Int32, &json!(i64::MAX)).is_err());
        assert!(Value::from_json(Kind::Uint32, &json!(-1)).is_err());
        assert!(Value::from_json(Kind::Bool, &json!("true")).is_err());
    }

    #[test]
    fn test_from_json_lists_and_complex() {
        assert_eq!(
            Value::from_json(Kind::Complex128, &json!([1.5, -2])).unwrap(),
            Value::Complex128(Complex::new(1.5, -2.0))
        );
        assert_eq!(
            Value::from_json(Kind::Uint64List, &json!([1, 2])).unwrap(),
            Value::List(List::Uint64(vec![1, 2]))
        );
        assert_eq!(
            Value::from_json(Kind::Bytes, &json!("hi")).unwrap(),
            Value::List(List::Bytes(b"hi".to_vec()))
        );
        let err = Value::from_json(Kind::StringList, &json!(["a", 1])).unwrap_err();
        assert!(matches!(err, ValueError::Invalid { kind: Kind::StringList, .. }));
    }

    #[test]
    fn test_to_json_inverts_from_json() {
        let cases = [
            (Kind::Float64, json!(-99.99)),
            (Kind::StringList, json!(["a", "b"])),
            (Kind::Complex128List, json!([[1.0, 2.0]])),
            (Kind::Map, json!({"a": true, "b": [1, 2], "c": {"d": "e"}})),
        ];
        for (kind, input) in cases {
            let value = Value::from_json(kind, &input).unwrap();
            assert_eq!(value.kind(), kind);
            assert_eq!(value.to_json(), input);
        }
    }
}
