//! Values produced and consumed by command callbacks.

use std::fmt;

/// The result of reading (or writing) a command-tree node.
///
/// Scalars are rendered as text in the reply. [`Value::Array`] is routed
/// through the data codec and rendered as ASCII CSV or a binary block
/// depending on the configured data format.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No answer. Reads yielding `None` contribute nothing to the reply;
    /// writes yielding `None` are acknowledged with `ACK`.
    #[default]
    None,
    /// The IEEE not-a-number sentinel.
    Nan,
    /// A boolean, rendered as `1` or `0`.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// Free text, rendered verbatim.
    Text(String),
    /// A numeric sequence, rendered by the data codec.
    Array(Vec<f64>),
}

impl Value {
    /// Whether this is [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Build an array from nested rows, flattening them in row-major order.
    pub fn flatten<R: AsRef<[f64]>>(rows: &[R]) -> Self {
        Value::Array(rows.iter().flat_map(|r| r.as_ref().iter().copied()).collect())
    }
}

/// Render a single sample the way replies show it.
pub fn format_float(v: f64) -> String {
    if v.is_nan() { "NaN".to_string() } else { v.to_string() }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Nan => f.write_str("NaN"),
            Value::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::Text(s) => f.write_str(s),
            Value::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(&format_float(*v))?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Value::Array(values)
    }
}
