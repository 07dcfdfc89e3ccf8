//! Header value parsing and fixed-format serialization.

use std::fmt;
use std::str;

/// The value field of a keyword card.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Float(f64),
    /// Quoted text with `''` unescaped and trailing blanks dropped.
    String(String),
}

impl Value {
    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Logical(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Find a ` /` comment separator in `bytes` and return the comment text.
///
/// Real-world files omit the space after the slash as often as not, so only
/// the leading space is required.
fn find_comment(bytes: &[u8]) -> (usize, Option<String>) {
    let len = bytes.len();
    let mut i = 0;
    while i + 1 < len {
        if bytes[i] == b' ' && bytes[i + 1] == b'/' {
            let mut start = i + 2;
            if start < len && bytes[start] == b' ' {
                start += 1;
            }
            let comment = str::from_utf8(&bytes[start..])
                .ok()
                .map(|s| s.trim_end().to_string())
                .filter(|s| !s.is_empty());
            return (i, comment);
        }
        i += 1;
    }
    (len, None)
}

/// Parse a quoted string value; doubled quotes are literal quotes.
fn parse_string(field: &[u8]) -> (Value, Option<String>) {
    let mut value = String::new();
    let mut i = 1;
    while i < field.len() {
        if field[i] == b'\'' {
            if i + 1 < field.len() && field[i + 1] == b'\'' {
                value.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        value.push(field[i] as char);
        i += 1;
    }
    let (_, comment) = find_comment(&field[i.min(field.len())..]);
    (Value::String(value.trim_end().to_string()), comment)
}

/// Parse a float string, accepting the Fortran `D` exponent.
fn parse_float_str(s: &str) -> Option<f64> {
    s.replace(['D', 'd'], "E").parse::<f64>().ok()
}

/// Parse the 70-byte value field of a card (bytes 10..80).
///
/// Returns `None` for an empty (undefined) value. The caller checks the
/// `= ` value indicator.
pub fn parse_value(field: &[u8]) -> Option<(Value, Option<String>)> {
    let start = field.iter().position(|&b| b != b' ')?;
    let field = &field[start..];

    if field[0] == b'\'' {
        return Some(parse_string(field));
    }

    let (end, comment) = find_comment(field);
    let text = str::from_utf8(&field[..end]).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    let value = match text {
        "T" => Value::Logical(true),
        "F" => Value::Logical(false),
        _ if !text.contains(['.', 'E', 'e', 'D', 'd']) => match text.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Float(parse_float_str(text)?),
        },
        _ => Value::Float(parse_float_str(text)?),
    };
    Some((value, comment))
}

/// Right-justify `src` in the first 20 bytes of `buf` (card columns 11-30).
fn right_justify(src: &str, buf: &mut [u8; 70]) {
    let bytes = src.as_bytes();
    let len = bytes.len().min(20);
    buf[20 - len..20].copy_from_slice(&bytes[..len]);
}

/// Shortest exponent form that fits a fixed-format field of `max_len` bytes.
fn format_float(v: f64, max_len: usize) -> String {
    if v == 0.0 {
        return String::from("0.0");
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{v:.precision$E}");
        if s.len() <= max_len || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

/// Serialize a [`Value`] into the 70-byte field that follows `= `.
pub fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => buf[19] = if *b { b'T' } else { b'F' },
        Value::Integer(n) => right_justify(&n.to_string(), &mut buf),
        Value::Float(v) => right_justify(&format_float(*v, 20), &mut buf),
        Value::String(s) => {
            let mut pos = 0;
            buf[pos] = b'\'';
            pos += 1;
            for ch in s.bytes() {
                let needed = if ch == b'\'' { 2 } else { 1 };
                if pos + needed >= 69 {
                    break;
                }
                buf[pos] = ch;
                if ch == b'\'' {
                    buf[pos + 1] = b'\'';
                }
                pos += needed;
            }
            // Strings are padded to at least eight characters.
            pos = pos.max(9);
            buf[pos] = b'\'';
        }
    }
    buf
}

/// Length of the value portion of a formatted field, used to place comments.
pub(crate) fn formatted_value_len(field: &[u8; 70]) -> usize {
    if field[0] != b'\'' {
        return 20;
    }
    let mut i = 1;
    while i < 70 {
        if field[i] == b'\'' {
            if i + 1 < 70 && field[i + 1] == b'\'' {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    70
}
