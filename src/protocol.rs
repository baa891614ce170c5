//! Call-level interface to the remote engine.
//! The remote database is an opaque service reached through a handle-based,
//! blocking, call-per-round-trip protocol (connect, prepare, bind parameters,
//! execute, bind result columns, fetch). This module defines the type codes,
//! indicator values, return codes and the two traits a concrete driver binding
//! implements. The crate itself links no driver; the host supplies a connection
//! through a [`SessionProvider`].

use serde::{Deserialize, Serialize};

/// Size of one bounded LOB read, and the default buffer size for opaque/XML
/// result columns.
pub const LOB_CHUNK_LEN: usize = 8192;

/// Remote-side type codes, mirroring the call-level protocol's SQL type set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTypeCode {
    Char,
    Varchar,
    LongVarchar,
    WChar,
    WVarchar,
    WLongVarchar,
    Clob,
    Decimal,
    Numeric,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Bit,
    Binary,
    Varbinary,
    LongVarbinary,
    Blob,
    Date,
    Time,
    Timestamp,
    Guid,
    Xml,
}

impl RemoteTypeCode {
    /// Long types are streamed by the protocol rather than copied inline.
    pub fn is_long(self) -> bool {
        matches!(
            self,
            RemoteTypeCode::LongVarchar
                | RemoteTypeCode::WLongVarchar
                | RemoteTypeCode::Clob
                | RemoteTypeCode::LongVarbinary
                | RemoteTypeCode::Blob
                | RemoteTypeCode::Xml
        )
    }

    pub fn is_character(self) -> bool {
        matches!(
            self,
            RemoteTypeCode::Char
                | RemoteTypeCode::Varchar
                | RemoteTypeCode::LongVarchar
                | RemoteTypeCode::WChar
                | RemoteTypeCode::WVarchar
                | RemoteTypeCode::WLongVarchar
                | RemoteTypeCode::Clob
                | RemoteTypeCode::Xml
        )
    }
}

/// Out-of-band length/NULL signal accompanying a bound column or LOB chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indicator {
    /// No fetch has filled the slot yet.
    #[default]
    Unset,
    /// The value is absent.
    Null,
    /// The remote engine does not know the remaining length.
    NoTotal,
    /// Full length of the value in bytes (may exceed the bound buffer,
    /// in which case the buffer holds a truncated prefix).
    Len(usize),
}

/// Return code of a protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc {
    Success,
    /// Succeeded with a warning condition attached (e.g. truncation).
    SuccessWithInfo,
    /// The statement produced or has no (more) data. Not an error.
    NoData,
}

/// One remote diagnostic record, preserved verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diag {
    pub state: String,
    pub native: i32,
    pub message: String,
}

impl Diag {
    pub fn new<S: Into<String>>(state: S, native: i32, message: S) -> Self {
        Diag { state: state.into(), native, message: message.into() }
    }
}

/// Statement attributes. Cursor and sizing attributes must be set on an
/// unprepared handle; the lifecycle manager enforces the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtAttr {
    /// Rows transferred per fetch call.
    RowArraySize(usize),
    /// Rows the driver may prefetch transparently.
    PrefetchRows(usize),
    /// Dynamic cursor, used together with pessimistic locking concurrency.
    CursorDynamic,
    /// Static, insensitive cursor for plain reads.
    CursorInsensitive,
    /// Pessimistic row-locking concurrency mode (FOR UPDATE semantics).
    ConcurrencyLock,
}

/// Wire-format hint for a bound result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Char,
    Binary,
}

/// A parameter value as handed to the protocol. Borrowed forms only; the
/// binding keeps descriptor-owned storage alive across executions.
#[derive(Debug, Clone, Copy)]
pub enum ParamValue<'a> {
    /// NULL of the given remote type; only the indicator travels.
    Null(RemoteTypeCode),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    /// Arbitrary-precision decimal/float, bound in its textual form.
    Decimal(&'a str),
    Text { value: &'a str, declared_len: usize, long: bool },
    Bytes { value: &'a [u8], long: bool },
    /// Output/returning parameter: a pre-sized caller-owned buffer.
    Output { remote_type: RemoteTypeCode, alloc_len: usize },
}

/// Outcome of one bounded LOB read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetDataOutcome {
    /// A chunk landed in the buffer. `more` is true while data remains.
    Chunk { indicator: Indicator, more: bool },
    /// The value is exhausted (or was never there).
    NoData,
}

/// Receives fetched column data. Implemented over the ordered result-column
/// descriptors; the sink owns buffer capacity and truncation bookkeeping.
pub trait ColumnSink {
    /// Deliver the value for a 1-based result position. `data` is the full
    /// value; the sink copies at most its buffer capacity and records the
    /// indicator (full length or NULL) as reported.
    fn put(&mut self, position: u16, data: Option<&[u8]>, indicator: Indicator);
}

/// One remote statement handle. All calls block until the remote engine
/// responds; errors carry the verbatim diagnostic record.
pub trait RemoteStatement {
    /// Set a statement attribute. Cursor/sizing attributes are only valid
    /// before `prepare`.
    fn set_attr(&mut self, attr: StmtAttr) -> Result<(), Diag>;

    fn prepare(&mut self, sql: &str) -> Result<(), Diag>;

    /// Attach a parameter value at a 1-based position for the next execution.
    fn bind_parameter(&mut self, position: u16, value: ParamValue<'_>) -> Result<(), Diag>;

    /// Register an output buffer of `buf_len` bytes for a 1-based result
    /// position. Called once per statement, before the first fetch.
    fn bind_col(&mut self, position: u16, wire: WireFormat, buf_len: usize) -> Result<(), Diag>;

    fn execute(&mut self) -> Result<Rc, Diag>;

    /// Affected/returned row count of the last execution.
    fn row_count(&mut self) -> Result<u64, Diag>;

    /// Advance the cursor one row, delivering bound columns through the sink.
    fn fetch(&mut self, sink: &mut dyn ColumnSink) -> Result<Rc, Diag>;

    /// Read the next bounded chunk of an oversized column value of the current
    /// row. Successive calls advance through the value.
    fn get_data(&mut self, position: u16, buf: &mut [u8]) -> Result<GetDataOutcome, Diag>;

    /// Close the handle. Infallible and idempotent by contract.
    fn close(&mut self);
}

/// One remote connection handle. A connection owns at most one active
/// statement at a time; that invariant is enforced by the session layer, not
/// here.
pub trait RemoteConnection {
    fn alloc_statement(&mut self) -> Result<Box<dyn RemoteStatement>, Diag>;
    fn commit(&mut self) -> Result<(), Diag>;
    fn rollback(&mut self) -> Result<(), Diag>;
}

/// Resolved connection scalars, consumed as-is (option parsing happens in the
/// host, outside this core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnDescriptor {
    pub addr: String,
    pub user: String,
    pub secret: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// External session provider: hands out connected remote sessions. Pooling
/// policy, if any, lives behind this seam.
pub trait SessionProvider {
    fn open(&self, desc: &ConnDescriptor) -> anyhow::Result<Box<dyn RemoteConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_types_flagged() {
        assert!(RemoteTypeCode::Clob.is_long());
        assert!(RemoteTypeCode::Blob.is_long());
        assert!(RemoteTypeCode::Xml.is_long());
        assert!(!RemoteTypeCode::Varchar.is_long());
        assert!(!RemoteTypeCode::Integer.is_long());
    }

    #[test]
    fn character_types_flagged() {
        assert!(RemoteTypeCode::Varchar.is_character());
        assert!(RemoteTypeCode::Clob.is_character());
        assert!(!RemoteTypeCode::Varbinary.is_character());
        assert!(!RemoteTypeCode::BigInt.is_character());
    }

    #[test]
    fn conn_descriptor_deserializes_without_locale() {
        let d: ConnDescriptor =
            serde_json::from_str(r#"{"addr":"db:2638","user":"u","secret":"s"}"#).unwrap();
        assert!(d.locale.is_none());
    }
}
