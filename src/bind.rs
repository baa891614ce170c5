//! Bind descriptors and the type-directed parameter binder.
//! One `BindSlot` per parameter marker, ordered; index + 1 is the remote bind
//! position. Slots are allocated once per prepared statement and their values
//! refreshed per execution, so declared sizes (not runtime lengths) drive
//! buffer reuse.

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{Diag, ParamValue, RemoteStatement, RemoteTypeCode};
use crate::value::LocalType;

/// Binding strategy for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Decimal/integer text parsed into the remote numeric subtype.
    NumericText,
    Text,
    LongText,
    LongBinary,
    /// Output/returning parameter bound to a pre-sized caller-owned buffer.
    Output,
}

/// Describes one parameter: remote column, types, rendered value, sizing.
#[derive(Debug, Clone)]
pub struct BindSlot {
    pub remote_name: String,
    pub remote_type: RemoteTypeCode,
    pub size: usize,
    pub scale: i16,
    pub local_type: LocalType,
    pub kind: BindKind,
    /// Rendered textual value; `None` binds a null indicator.
    pub value: Option<String>,
    /// Raw bytes for long-binary binds.
    pub bytes: Option<Vec<u8>>,
    /// Allocated-size hint for output-style binds.
    pub alloc_len: usize,
}

impl BindSlot {
    pub fn input(
        remote_name: &str,
        remote_type: RemoteTypeCode,
        size: usize,
        scale: i16,
        local_type: LocalType,
        kind: BindKind,
    ) -> Self {
        BindSlot {
            remote_name: remote_name.to_string(),
            remote_type,
            size,
            scale,
            local_type,
            kind,
            value: None,
            bytes: None,
            alloc_len: 0,
        }
    }

    pub fn output(
        remote_name: &str,
        remote_type: RemoteTypeCode,
        local_type: LocalType,
        alloc_len: usize,
    ) -> Self {
        BindSlot {
            remote_name: remote_name.to_string(),
            remote_type,
            size: alloc_len,
            scale: 0,
            local_type,
            kind: BindKind::Output,
            value: None,
            bytes: None,
            alloc_len,
        }
    }
}

fn parse_diag(slot: &BindSlot, what: &str) -> Diag {
    Diag {
        state: "22018".into(),
        native: 0,
        message: format!("cannot convert value for '{}' to remote {what}", slot.remote_name),
    }
}

/// Attach one slot's value at a 1-based remote parameter position so the next
/// execution uses it. NULL values bind an indicator only; the rendered payload
/// is never touched.
pub fn attach_param(
    stmt: &mut dyn RemoteStatement,
    position: u16,
    slot: &BindSlot,
) -> RemoteResult<()> {
    let bound = match slot.kind {
        BindKind::NumericText => match &slot.value {
            None => stmt.bind_parameter(position, ParamValue::Null(slot.remote_type)),
            Some(text) => {
                let text = text.trim();
                match slot.remote_type {
                    RemoteTypeCode::TinyInt | RemoteTypeCode::SmallInt => {
                        let v: i16 = text
                            .parse()
                            .map_err(|_| RemoteError::bind_failed(position, parse_diag(slot, "smallint")))?;
                        stmt.bind_parameter(position, ParamValue::SmallInt(v))
                    }
                    RemoteTypeCode::Integer => {
                        let v: i32 = text
                            .parse()
                            .map_err(|_| RemoteError::bind_failed(position, parse_diag(slot, "integer")))?;
                        stmt.bind_parameter(position, ParamValue::Int(v))
                    }
                    RemoteTypeCode::BigInt => {
                        let v: i64 = text
                            .parse()
                            .map_err(|_| RemoteError::bind_failed(position, parse_diag(slot, "bigint")))?;
                        stmt.bind_parameter(position, ParamValue::BigInt(v))
                    }
                    RemoteTypeCode::Decimal
                    | RemoteTypeCode::Numeric
                    | RemoteTypeCode::Real
                    | RemoteTypeCode::Float
                    | RemoteTypeCode::Double => {
                        // Arbitrary precision: bound in textual form, converted
                        // by the remote engine.
                        stmt.bind_parameter(position, ParamValue::Decimal(text))
                    }
                    other => {
                        return Err(RemoteError::unsupported(format!(
                            "no numeric bind path for remote type {:?} (parameter '{}')",
                            other, slot.remote_name
                        )))
                    }
                }
            }
        },
        BindKind::Text | BindKind::LongText => {
            let long = slot.kind == BindKind::LongText || slot.remote_type.is_long();
            match &slot.value {
                None => stmt.bind_parameter(position, ParamValue::Null(slot.remote_type)),
                // Size from the declared column, not the runtime string, so the
                // binding stays valid across executions.
                Some(text) => stmt.bind_parameter(
                    position,
                    ParamValue::Text { value: text, declared_len: slot.size, long },
                ),
            }
        }
        BindKind::LongBinary => match &slot.bytes {
            None => stmt.bind_parameter(position, ParamValue::Null(slot.remote_type)),
            Some(bytes) => {
                stmt.bind_parameter(position, ParamValue::Bytes { value: bytes, long: true })
            }
        },
        BindKind::Output => {
            // UUID-like locals round-trip through the remote engine as plain
            // character data; force the wire type accordingly.
            let remote_type = if slot.local_type == LocalType::Uuid {
                RemoteTypeCode::Char
            } else {
                slot.remote_type
            };
            stmt.bind_parameter(
                position,
                ParamValue::Output { remote_type, alloc_len: slot.alloc_len },
            )
        }
    };
    bound.map_err(|diag| RemoteError::bind_failed(position, diag))
}

/// Attach every slot in order, positions 1..=N.
pub fn attach_all(stmt: &mut dyn RemoteStatement, slots: &[BindSlot]) -> RemoteResult<()> {
    for (idx, slot) in slots.iter().enumerate() {
        attach_param(stmt, (idx + 1) as u16, slot)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockEngine, OwnedParam};
    use crate::protocol::RemoteConnection;

    fn slot(kind: BindKind, remote_type: RemoteTypeCode, value: Option<&str>) -> BindSlot {
        let mut s = BindSlot::input("c1", remote_type, 10, 0, LocalType::Text, kind);
        s.value = value.map(|v| v.to_string());
        s
    }

    #[test]
    fn numeric_text_dispatch() {
        let engine = MockEngine::new();
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();

        attach_param(&mut *stmt, 1, &slot(BindKind::NumericText, RemoteTypeCode::SmallInt, Some("7"))).unwrap();
        attach_param(&mut *stmt, 2, &slot(BindKind::NumericText, RemoteTypeCode::Integer, Some("-90000"))).unwrap();
        attach_param(&mut *stmt, 3, &slot(BindKind::NumericText, RemoteTypeCode::BigInt, Some("5000000000"))).unwrap();
        attach_param(&mut *stmt, 4, &slot(BindKind::NumericText, RemoteTypeCode::Numeric, Some("12.75"))).unwrap();

        let params = engine.bound_params();
        assert_eq!(params[0], OwnedParam::SmallInt(7));
        assert_eq!(params[1], OwnedParam::Int(-90000));
        assert_eq!(params[2], OwnedParam::BigInt(5_000_000_000));
        assert_eq!(params[3], OwnedParam::Decimal("12.75".into()));
    }

    #[test]
    fn null_binds_indicator_only() {
        let engine = MockEngine::new();
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();

        for (pos, kind) in [
            (1u16, BindKind::NumericText),
            (2, BindKind::Text),
            (3, BindKind::LongText),
            (4, BindKind::LongBinary),
        ] {
            attach_param(&mut *stmt, pos, &slot(kind, RemoteTypeCode::Varchar, None)).unwrap();
        }
        for p in engine.bound_params() {
            assert!(matches!(p, OwnedParam::Null(_)));
        }
    }

    #[test]
    fn unsupported_numeric_subtype() {
        let engine = MockEngine::new();
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();

        let err = attach_param(
            &mut *stmt,
            1,
            &slot(BindKind::NumericText, RemoteTypeCode::Varchar, Some("1")),
        )
        .unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedType { .. }));
    }

    #[test]
    fn declared_size_drives_text_bind() {
        let engine = MockEngine::new();
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();

        let mut s = slot(BindKind::Text, RemoteTypeCode::Varchar, Some("ab"));
        s.size = 40;
        attach_param(&mut *stmt, 1, &s).unwrap();
        match &engine.bound_params()[0] {
            OwnedParam::Text { declared_len, long, .. } => {
                assert_eq!(*declared_len, 40);
                assert!(!long);
            }
            other => panic!("unexpected bind: {other:?}"),
        }
    }

    #[test]
    fn uuid_output_forced_to_char() {
        let engine = MockEngine::new();
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();

        let s = BindSlot::output("id", RemoteTypeCode::Guid, LocalType::Uuid, 37);
        attach_param(&mut *stmt, 1, &s).unwrap();
        match &engine.bound_params()[0] {
            OwnedParam::Output { remote_type, alloc_len } => {
                assert_eq!(*remote_type, RemoteTypeCode::Char);
                assert_eq!(*alloc_len, 37);
            }
            other => panic!("unexpected bind: {other:?}"),
        }
    }
}
