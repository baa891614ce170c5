//! Result column descriptors and the result column binder.
//! One descriptor per projected column, ordered; each owns its output buffer
//! for the statement's whole lifetime (every fetch overwrites the contents).
//! Buffer sizing is a per-remote-type heuristic, reproduced exactly: an
//! undersized buffer truncates silently instead of erroring, so the numbers
//! here are load-bearing.

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{ColumnSink, Indicator, RemoteStatement, RemoteTypeCode, WireFormat, LOB_CHUNK_LEN};
use crate::value::LocalType;

/// Headroom added on top of declared precision/scale for exact and approximate
/// numerics: sign, decimal point, exponent, terminator.
pub const NUMERIC_HEADROOM: usize = 12;

/// Fixed textual width for big-integer types: 19 digits, sign, terminator.
pub const BIGINT_TEXT_LEN: usize = 21;

/// Hyphenated UUID plus terminator.
pub const UUID_TEXT_LEN: usize = 37;

/// Deterministic, type-pure buffer size for a remote type/size/scale tuple.
pub fn buffer_len_for(ty: RemoteTypeCode, size: usize, scale: i16) -> usize {
    match ty {
        // Fixed binary/character: declared byte length as-is.
        RemoteTypeCode::Binary | RemoteTypeCode::Varbinary | RemoteTypeCode::LongVarbinary => size,
        RemoteTypeCode::Char => size,
        // Text/CLOB/Unicode variants carry a terminator.
        RemoteTypeCode::Varchar
        | RemoteTypeCode::LongVarchar
        | RemoteTypeCode::WChar
        | RemoteTypeCode::WVarchar
        | RemoteTypeCode::WLongVarchar
        | RemoteTypeCode::Clob => size + 1,
        // Exact/approximate numerics: larger of precision/scale plus headroom.
        RemoteTypeCode::Decimal
        | RemoteTypeCode::Numeric
        | RemoteTypeCode::TinyInt
        | RemoteTypeCode::SmallInt
        | RemoteTypeCode::Integer
        | RemoteTypeCode::Real
        | RemoteTypeCode::Float
        | RemoteTypeCode::Double
        | RemoteTypeCode::Bit => size.max(scale.max(0) as usize) + NUMERIC_HEADROOM,
        RemoteTypeCode::BigInt => BIGINT_TEXT_LEN,
        // Temporal: declared length plus terminator.
        RemoteTypeCode::Date | RemoteTypeCode::Time | RemoteTypeCode::Timestamp => size + 1,
        RemoteTypeCode::Guid => UUID_TEXT_LEN,
        // Opaque/XML: one LOB chunk; anything bigger is streamed.
        RemoteTypeCode::Xml | RemoteTypeCode::Blob => LOB_CHUNK_LEN,
    }
}

/// Wire-format hint derived from the local destination type. UUID-like columns
/// are forced to character form so the text round-trips through the host's
/// native input conversion.
pub fn wire_format_for(ty: LocalType) -> WireFormat {
    match ty {
        LocalType::Bytea => WireFormat::Binary,
        _ => WireFormat::Char,
    }
}

/// Describes one projected column and owns its output storage.
#[derive(Debug)]
pub struct ResultColumn {
    pub remote_name: String,
    pub remote_type: RemoteTypeCode,
    pub size: usize,
    pub scale: i16,
    pub nullable: bool,
    /// Local attribute number (negative values are system columns).
    pub attno: i32,
    pub local_type: LocalType,
    /// 1-based position within the remote cursor.
    pub position: u16,
    buf: Vec<u8>,
    /// Bytes of `buf` actually written by the last fetch.
    valid: usize,
    pub indicator: Indicator,
}

impl ResultColumn {
    pub fn new(
        remote_name: &str,
        remote_type: RemoteTypeCode,
        size: usize,
        scale: i16,
        nullable: bool,
        attno: i32,
        local_type: LocalType,
        position: u16,
    ) -> Self {
        let len = buffer_len_for(remote_type, size, scale);
        ResultColumn {
            remote_name: remote_name.to_string(),
            remote_type,
            size,
            scale,
            nullable,
            attno,
            local_type,
            position,
            buf: vec![0u8; len],
            valid: 0,
            indicator: Indicator::Unset,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_null(&self) -> bool {
        self.indicator == Indicator::Null
    }

    /// True when the last fetch did not fit the buffer and the value must be
    /// re-read through the chunked LOB path.
    pub fn is_truncated(&self) -> bool {
        match self.indicator {
            Indicator::NoTotal => true,
            Indicator::Len(n) => n > self.buf.len(),
            _ => false,
        }
    }

    /// Bytes of the last fetched value (valid prefix only). A `NoTotal` value
    /// is still truncated; this returns only what the fetch wrote, the full
    /// value comes from the chunked LOB path.
    pub fn data(&self) -> &[u8] {
        match self.indicator {
            Indicator::Len(n) => &self.buf[..n.min(self.buf.len())],
            Indicator::NoTotal => &self.buf[..self.valid],
            _ => &[],
        }
    }

    /// Last fetched value as text, for character-form columns.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.data())
    }

    fn store(&mut self, data: Option<&[u8]>, indicator: Indicator) {
        match data {
            None => {
                self.valid = 0;
                self.indicator = Indicator::Null;
            }
            Some(bytes) => {
                let n = bytes.len().min(self.buf.len());
                self.buf[..n].copy_from_slice(&bytes[..n]);
                self.valid = n;
                self.indicator = match indicator {
                    Indicator::Unset => Indicator::Len(bytes.len()),
                    other => other,
                };
            }
        }
    }
}

/// Delivers fetched values into the ordered descriptor array.
pub struct RowSink<'a> {
    cols: &'a mut [ResultColumn],
}

impl<'a> RowSink<'a> {
    pub fn new(cols: &'a mut [ResultColumn]) -> Self {
        RowSink { cols }
    }
}

impl ColumnSink for RowSink<'_> {
    fn put(&mut self, position: u16, data: Option<&[u8]>, indicator: Indicator) {
        if let Some(col) = self.cols.iter_mut().find(|c| c.position == position) {
            col.store(data, indicator);
        }
    }
}

/// Attach one output buffer and indicator per projected column, once per
/// prepared statement.
pub fn bind_result_columns(
    stmt: &mut dyn RemoteStatement,
    cols: &[ResultColumn],
) -> RemoteResult<()> {
    for col in cols {
        stmt.bind_col(col.position, wire_format_for(col.local_type), col.capacity())
            .map_err(|diag| RemoteError::bind_failed(col.position, diag))?;
    }
    Ok(())
}

/// Zero-projection case (e.g. an aggregate with no selected value): the
/// execute/fetch protocol still needs somewhere to land its implicit result.
/// The returned column must be owned by the statement-lifetime state, never
/// the stack, since it stays bound across every fetch.
pub fn bind_dummy_column(stmt: &mut dyn RemoteStatement) -> RemoteResult<ResultColumn> {
    let col = ResultColumn::new(
        "",
        RemoteTypeCode::Integer,
        0,
        0,
        true,
        0,
        LocalType::Int4,
        1,
    );
    stmt.bind_col(1, WireFormat::Char, col.capacity())
        .map_err(|diag| RemoteError::bind_failed(1, diag))?;
    Ok(col)
}
