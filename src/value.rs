//! Host-side value model: local type identifiers, cell values, and the
//! text-rendering/parsing pair used at the remote boundary. Values always
//! cross the wire in textual form; the remote engine's own input conversion
//! turns the text back into its native types (and vice versa on fetch).

use crate::error::{RemoteError, RemoteResult};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Local (host-engine) type identifier for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Uuid,
    Date,
    Timestamp,
    /// Whole-row (composite) reference. Stays generic until the referenced
    /// relation's concrete composite type is resolved.
    Record,
}

/// One materialized cell value. NULL travels as `Option<HostValue>::None`.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Arbitrary-precision numeric kept in its textual form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Raw composite text, e.g. "(1,abc)". Parsed lazily by the host.
    Record(String),
}

/// Remote-side text-rendering function, selected once per parameter from the
/// expression's static result type and kept in statement-scoped state.
pub type OutputFn = fn(&HostValue) -> String;

fn render_default(v: &HostValue) -> String {
    match v {
        HostValue::I16(n) => n.to_string(),
        HostValue::I32(n) => n.to_string(),
        HostValue::I64(n) => n.to_string(),
        HostValue::F32(n) => n.to_string(),
        HostValue::F64(n) => n.to_string(),
        HostValue::Numeric(s) | HostValue::Text(s) | HostValue::Record(s) => s.clone(),
        HostValue::Bool(b) => render_bool_value(*b),
        HostValue::Bytes(b) => render_hex(b),
        HostValue::Uuid(u) => u.hyphenated().to_string(),
        HostValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        HostValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    }
}

// The remote engine has no boolean literal; render as 0/1.
fn render_bool_value(b: bool) -> String {
    if b { "1".into() } else { "0".into() }
}

fn render_bool(v: &HostValue) -> String {
    match v {
        HostValue::Bool(b) => render_bool_value(*b),
        other => render_default(other),
    }
}

fn render_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn render_bytes(v: &HostValue) -> String {
    match v {
        HostValue::Bytes(b) => render_hex(b),
        other => render_default(other),
    }
}

/// Pick the rendering function for a static result type. Resolved once per
/// parameter at plan-adaptation time and owned by the modify/scan state.
pub fn output_fn(ty: LocalType) -> OutputFn {
    match ty {
        LocalType::Bool => render_bool,
        LocalType::Bytea => render_bytes,
        _ => render_default,
    }
}

/// Parse remote column text back into a host cell of the destination type.
/// Malformed remote text is an execution failure, not silently coerced.
pub fn parse_cell(text: &str, ty: LocalType) -> RemoteResult<HostValue> {
    let malformed = |what: &str| {
        RemoteError::exec_failed(crate::protocol::Diag {
            state: "22018".into(),
            native: 0,
            message: format!("malformed remote {what} value: '{text}'"),
        })
    };
    let cell = match ty {
        LocalType::Bool => {
            let t = text.trim();
            HostValue::Bool(t == "1" || t.eq_ignore_ascii_case("true"))
        }
        LocalType::Int2 => HostValue::I16(text.trim().parse().map_err(|_| malformed("smallint"))?),
        LocalType::Int4 => HostValue::I32(text.trim().parse().map_err(|_| malformed("integer"))?),
        LocalType::Int8 => HostValue::I64(text.trim().parse().map_err(|_| malformed("bigint"))?),
        LocalType::Float4 => HostValue::F32(text.trim().parse().map_err(|_| malformed("real"))?),
        LocalType::Float8 => HostValue::F64(text.trim().parse().map_err(|_| malformed("double"))?),
        LocalType::Numeric => HostValue::Numeric(text.trim().to_string()),
        LocalType::Text => HostValue::Text(text.to_string()),
        LocalType::Bytea => HostValue::Bytes(parse_hex(text.trim()).ok_or_else(|| malformed("binary"))?),
        LocalType::Uuid => {
            HostValue::Uuid(text.trim().parse().map_err(|_| malformed("uuid"))?)
        }
        LocalType::Date => HostValue::Date(
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| malformed("date"))?,
        ),
        LocalType::Timestamp => HostValue::Timestamp(parse_timestamp(text.trim()).ok_or_else(|| malformed("timestamp"))?),
        // Whole-row values stay as raw composite text. When the composite type
        // was never resolved the adapter refuses the column before we get here.
        LocalType::Record => HostValue::Record(text.to_string()),
    };
    Ok(cell)
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    // Byte-wise so arbitrary (non-ASCII) remote text is rejected, not sliced.
    let bytes = s.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    // Remote engines vary in fractional-second width; try the common shapes.
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_by_static_type() {
        let f = output_fn(LocalType::Bool);
        assert_eq!(f(&HostValue::Bool(true)), "1");
        assert_eq!(f(&HostValue::Bool(false)), "0");

        let f = output_fn(LocalType::Int8);
        assert_eq!(f(&HostValue::I64(-42)), "-42");

        let f = output_fn(LocalType::Bytea);
        assert_eq!(f(&HostValue::Bytes(vec![0xde, 0xad])), "dead");

        let f = output_fn(LocalType::Timestamp);
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(10, 30, 0, 250)
            .unwrap();
        assert_eq!(f(&HostValue::Timestamp(ts)), "2024-03-09 10:30:00.000250");
    }

    #[test]
    fn parse_round_trips_common_types() {
        assert_eq!(parse_cell("17", LocalType::Int4).unwrap(), HostValue::I32(17));
        assert_eq!(parse_cell(" 5 ", LocalType::Int2).unwrap(), HostValue::I16(5));
        assert_eq!(parse_cell("abc", LocalType::Text).unwrap(), HostValue::Text("abc".into()));
        assert_eq!(
            parse_cell("12.500", LocalType::Numeric).unwrap(),
            HostValue::Numeric("12.500".into())
        );
        assert_eq!(parse_cell("dead", LocalType::Bytea).unwrap(), HostValue::Bytes(vec![0xde, 0xad]));
        let d = parse_cell("2023-12-01", LocalType::Date).unwrap();
        assert_eq!(d, HostValue::Date(NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()));
    }

    #[test]
    fn malformed_remote_text_fails_loudly() {
        let err = parse_cell("not-a-number", LocalType::Int4).unwrap_err();
        assert!(matches!(err, RemoteError::ExecutionFailed { .. }));
        assert!(format!("{err}").contains("not-a-number"));
        assert!(parse_cell("zz", LocalType::Bytea).is_err());
        assert!(parse_cell("2023-13-45", LocalType::Date).is_err());
    }

    #[test]
    fn non_ascii_binary_text_is_an_error_not_a_panic() {
        // Multi-byte UTF-8 from the remote side must surface as a failed
        // conversion like any other malformed text.
        let err = parse_cell("\u{20ac}\u{20ac}", LocalType::Bytea).unwrap_err();
        assert!(matches!(err, RemoteError::ExecutionFailed { .. }));
        assert!(parse_cell("d\u{e9}ad", LocalType::Bytea).is_err());
    }

    #[test]
    fn record_text_kept_raw() {
        assert_eq!(
            parse_cell("(1,abc)", LocalType::Record).unwrap(),
            HostValue::Record("(1,abc)".into())
        );
    }
}
