//! Scalar values and their line codec.
//!
//! Record format: one value per line, `\n` terminated, UTF-8.
//! - integers: decimal (`-42`)
//! - floats: shortest round-trip form that always carries a `.`/exponent (`3.0`, `1e21`)
//! - strings: raw text, must not contain `\n`
//!
//! Decoding infers the type only from canonical forms: a line is an integer or a
//! float when re-encoding that number reproduces the line exactly. Anything else
//! (`007`, `+5`, `1e3`, `nan`) is text, so every line's text survives a reload.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line separator of the durable format.
pub const LINE_SEPARATOR: char = '\n';

/// A primitive value stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Checks that the value can be stored as a single record.
    pub fn validate(&self) -> Result<()> {
        match self {
            Scalar::Text(s) if s.contains(LINE_SEPARATOR) => Err(Error::InvalidValue(
                "value is not allowed to include a newline character".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Appends the encoded record, separator included, to `buf`.
    pub fn encode_into(&self, buf: &mut String) {
        use std::fmt::Write;
        // Writing into a String cannot fail.
        let _ = write!(buf, "{}{}", self, LINE_SEPARATOR);
    }

    /// Decodes a single record (without its separator).
    pub fn decode(line: &str) -> Self {
        if let Ok(v) = line.parse::<i64>() {
            if v.to_string() == line {
                return Scalar::Int(v);
            }
        }
        if let Ok(v) = line.parse::<f64>() {
            if format!("{:?}", v) == line {
                return Scalar::Float(v);
            }
        }
        Scalar::Text(line.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            // Debug keeps the fractional part, so `3.0` does not come back as an integer.
            Scalar::Float(v) => write!(f, "{:?}", v),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Encodes a batch of values into one contiguous buffer.
pub fn encode_lines(values: &[Scalar]) -> String {
    let mut buf = String::with_capacity(values.len() * 8);
    for value in values {
        value.encode_into(&mut buf);
    }
    buf
}

/// Parses file content into records.
///
/// A single trailing empty record produced by a trailing separator is dropped.
pub fn decode_lines(content: &str) -> Vec<Scalar> {
    let mut lines: Vec<&str> = content.split(LINE_SEPARATOR).collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines.into_iter().map(Scalar::decode).collect()
}

macro_rules! scalar_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Scalar {
            fn from(v: $t) -> Self {
                Scalar::Int(v as i64)
            }
        })*
    };
}

scalar_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl TryFrom<serde_json::Value> for Scalar {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(v) => Ok(Scalar::Int(v)),
                None => n
                    .as_f64()
                    .map(Scalar::Float)
                    .ok_or_else(|| Error::InvalidType(format!("number {}", n))),
            },
            Value::String(s) => Ok(Scalar::Text(s)),
            Value::Null => Err(Error::InvalidType("null".to_string())),
            Value::Bool(_) => Err(Error::InvalidType("bool".to_string())),
            Value::Array(_) => Err(Error::InvalidType("array".to_string())),
            Value::Object(_) => Err(Error::InvalidType("object".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_infers_types() {
        assert_eq!(Scalar::decode("42"), Scalar::Int(42));
        assert_eq!(Scalar::decode("-7"), Scalar::Int(-7));
        assert_eq!(Scalar::decode("3.5"), Scalar::Float(3.5));
        assert_eq!(Scalar::decode("hello"), Scalar::Text("hello".into()));
        assert_eq!(Scalar::decode(""), Scalar::Text(String::new()));
    }

    #[test]
    fn test_non_canonical_numbers_stay_text() {
        for line in ["007", "+5", "1e3", "nan", "-0", "1.50", " 1"] {
            let decoded = Scalar::decode(line);
            assert_eq!(decoded, Scalar::Text(line.to_string()), "line {:?}", line);
            assert_eq!(encode_lines(&[decoded]), format!("{}\n", line));
        }
        assert_eq!(Scalar::decode("-0.0"), Scalar::Float(-0.0));
        assert_eq!(Scalar::decode("1e21"), Scalar::Float(1e21));
        assert_eq!(Scalar::decode("inf"), Scalar::Float(f64::INFINITY));
        assert!(matches!(Scalar::decode("NaN"), Scalar::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_whole_float_keeps_its_type() {
        let mut buf = String::new();
        Scalar::Float(3.0).encode_into(&mut buf);
        assert_eq!(buf, "3.0\n");
        assert_eq!(decode_lines(&buf), vec![Scalar::Float(3.0)]);
    }

    #[test]
    fn test_decode_lines_drops_one_trailing_empty_record() {
        assert_eq!(
            decode_lines("1\n2\n"),
            vec![Scalar::Int(1), Scalar::Int(2)]
        );
        assert_eq!(decode_lines("1\n2"), vec![Scalar::Int(1), Scalar::Int(2)]);
        // An empty string record at the end survives.
        assert_eq!(
            decode_lines("a\n\n"),
            vec![Scalar::Text("a".into()), Scalar::Text(String::new())]
        );
        assert!(decode_lines("").is_empty());
    }

    #[test]
    fn test_encode_lines_batch() {
        let values = vec![Scalar::Int(8), Scalar::Text("x y".into()), Scalar::Float(0.5)];
        assert_eq!(encode_lines(&values), "8\nx y\n0.5\n");
    }

    #[test]
    fn test_newline_is_rejected() {
        assert!(matches!(
            Scalar::from("a\nb").validate(),
            Err(Error::InvalidValue(_))
        ));
        assert!(Scalar::from("a b").validate().is_ok());
        assert!(Scalar::from(12).validate().is_ok());
    }

    #[test]
    fn test_json_conversion() {
        use serde_json::json;
        assert_eq!(Scalar::try_from(json!(5)).unwrap(), Scalar::Int(5));
        assert_eq!(Scalar::try_from(json!(1.25)).unwrap(), Scalar::Float(1.25));
        assert_eq!(Scalar::try_from(json!("s")).unwrap(), Scalar::Text("s".into()));
        assert!(matches!(
            Scalar::try_from(json!({"a": "Object not allowed"})),
            Err(Error::InvalidType(_))
        ));
        assert!(matches!(Scalar::try_from(json!([1])), Err(Error::InvalidType(_))));
        assert!(matches!(Scalar::try_from(json!(true)), Err(Error::InvalidType(_))));
    }

    #[test]
    fn test_serde_untagged_json() {
        let values = vec![Scalar::Int(1), Scalar::Float(2.5), Scalar::from("007")];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[1,2.5,"007"]"#);

        let back: Vec<Scalar> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
