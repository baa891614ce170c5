//! In-memory stand-in for the remote engine.
//! The real remote database is an external collaborator reached through the
//! `protocol` traits; this module ships a scriptable implementation so unit
//! and integration tests can drive the full marshaling path and then inspect
//! the exact call sequence the core issued (the TRUNCATE ordering property
//! depends on that log).

use crate::protocol::{
    ColumnSink, ConnDescriptor, Diag, GetDataOutcome, Indicator, ParamValue, Rc, RemoteConnection,
    RemoteStatement, SessionProvider, StmtAttr, WireFormat,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Owned copy of a bound parameter, kept for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedParam {
    Null(crate::protocol::RemoteTypeCode),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Decimal(String),
    Text { value: String, declared_len: usize, long: bool },
    Bytes { value: Vec<u8>, long: bool },
    Output { remote_type: crate::protocol::RemoteTypeCode, alloc_len: usize },
}

impl OwnedParam {
    fn from_value(v: ParamValue<'_>) -> Self {
        match v {
            ParamValue::Null(t) => OwnedParam::Null(t),
            ParamValue::SmallInt(n) => OwnedParam::SmallInt(n),
            ParamValue::Int(n) => OwnedParam::Int(n),
            ParamValue::BigInt(n) => OwnedParam::BigInt(n),
            ParamValue::Decimal(s) => OwnedParam::Decimal(s.to_string()),
            ParamValue::Text { value, declared_len, long } => {
                OwnedParam::Text { value: value.to_string(), declared_len, long }
            }
            ParamValue::Bytes { value, long } => OwnedParam::Bytes { value: value.to_vec(), long },
            ParamValue::Output { remote_type, alloc_len } => {
                OwnedParam::Output { remote_type, alloc_len }
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    calls: Vec<String>,
    params: BTreeMap<u16, OwnedParam>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    rowcount: u64,
    execute_no_data: bool,
    fail_execute: Option<Diag>,
    lob_no_total: bool,
}

impl Inner {
    fn log<S: Into<String>>(&mut self, call: S) {
        self.calls.push(call.into());
    }
}

/// Scriptable mock remote engine. Clone-free: hand out connections, then
/// inspect state through the shared handle.
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine { inner: Arc::new(Mutex::new(Inner::default())) }
    }

    pub fn connection(&self) -> Box<dyn RemoteConnection> {
        Box::new(MockConnection { inner: self.inner.clone() })
    }

    /// Script one result row; cells are textual, `None` is NULL.
    pub fn push_row(&self, cells: Vec<Option<&str>>) {
        let row = cells
            .into_iter()
            .map(|c| c.map(|s| s.as_bytes().to_vec()))
            .collect();
        self.inner.lock().rows.push(row);
    }

    pub fn set_rowcount(&self, n: u64) {
        self.inner.lock().rowcount = n;
    }

    /// Make the next execute report success-with-no-data.
    pub fn set_execute_no_data(&self, v: bool) {
        self.inner.lock().execute_no_data = v;
    }

    /// Fail the next execute with the given SQLSTATE and message.
    pub fn fail_next_execute(&self, state: &str, message: &str) {
        self.inner.lock().fail_execute =
            Some(Diag { state: state.into(), native: -911, message: message.into() });
    }

    /// Report "length undefined" instead of remaining length on LOB chunks.
    pub fn set_lob_no_total(&self, v: bool) {
        self.inner.lock().lob_no_total = v;
    }

    /// Full protocol call sequence observed so far.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Bound parameters in position order.
    pub fn bound_params(&self) -> Vec<OwnedParam> {
        self.inner.lock().params.values().cloned().collect()
    }
}

impl SessionProvider for MockEngine {
    fn open(&self, _desc: &ConnDescriptor) -> anyhow::Result<Box<dyn RemoteConnection>> {
        Ok(self.connection())
    }
}

struct MockConnection {
    inner: Arc<Mutex<Inner>>,
}

impl RemoteConnection for MockConnection {
    fn alloc_statement(&mut self) -> Result<Box<dyn RemoteStatement>, Diag> {
        self.inner.lock().log("alloc_statement");
        Ok(Box::new(MockStatement {
            inner: self.inner.clone(),
            prepared: false,
            executed: false,
            cursor: 0,
            col_binds: Vec::new(),
            lob_done: HashSet::new(),
            lob_offsets: BTreeMap::new(),
        }))
    }

    fn commit(&mut self) -> Result<(), Diag> {
        self.inner.lock().log("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Diag> {
        self.inner.lock().log("rollback");
        Ok(())
    }
}

struct MockStatement {
    inner: Arc<Mutex<Inner>>,
    prepared: bool,
    executed: bool,
    cursor: usize,
    col_binds: Vec<(u16, WireFormat, usize)>,
    lob_offsets: BTreeMap<u16, usize>,
    lob_done: HashSet<u16>,
}

impl RemoteStatement for MockStatement {
    fn set_attr(&mut self, attr: StmtAttr) -> Result<(), Diag> {
        if self.prepared {
            return Err(Diag {
                state: "HY011".into(),
                native: 0,
                message: "attribute cannot be set now".into(),
            });
        }
        let label = match attr {
            StmtAttr::RowArraySize(n) => format!("attr:row_array_size={n}"),
            StmtAttr::PrefetchRows(n) => format!("attr:prefetch_rows={n}"),
            StmtAttr::CursorDynamic => "attr:cursor_dynamic".into(),
            StmtAttr::CursorInsensitive => "attr:cursor_insensitive".into(),
            StmtAttr::ConcurrencyLock => "attr:concurrency_lock".into(),
        };
        self.inner.lock().log(label);
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<(), Diag> {
        self.inner.lock().log(format!("prepare:{sql}"));
        self.prepared = true;
        Ok(())
    }

    fn bind_parameter(&mut self, position: u16, value: ParamValue<'_>) -> Result<(), Diag> {
        let mut inner = self.inner.lock();
        inner.log(format!("bind_parameter:{position}"));
        inner.params.insert(position, OwnedParam::from_value(value));
        Ok(())
    }

    fn bind_col(&mut self, position: u16, wire: WireFormat, buf_len: usize) -> Result<(), Diag> {
        self.inner.lock().log(format!("bind_col:{position}"));
        self.col_binds.push((position, wire, buf_len));
        Ok(())
    }

    fn execute(&mut self) -> Result<Rc, Diag> {
        let mut inner = self.inner.lock();
        inner.log("execute");
        if let Some(diag) = inner.fail_execute.take() {
            return Err(diag);
        }
        self.executed = true;
        self.cursor = 0;
        if inner.execute_no_data {
            return Ok(Rc::NoData);
        }
        Ok(Rc::Success)
    }

    fn row_count(&mut self) -> Result<u64, Diag> {
        let mut inner = self.inner.lock();
        inner.log("row_count");
        if inner.rowcount > 0 {
            Ok(inner.rowcount)
        } else {
            Ok(inner.rows.len() as u64)
        }
    }

    fn fetch(&mut self, sink: &mut dyn ColumnSink) -> Result<Rc, Diag> {
        let mut inner = self.inner.lock();
        inner.log("fetch");
        if !self.executed {
            return Err(Diag {
                state: "HY010".into(),
                native: 0,
                message: "function sequence error: fetch before execute".into(),
            });
        }
        if self.cursor >= inner.rows.len() {
            return Ok(Rc::NoData);
        }
        let row = inner.rows[self.cursor].clone();
        for (position, _wire, _len) in &self.col_binds {
            let cell = row.get(*position as usize - 1).and_then(|c| c.as_deref());
            match cell {
                None => sink.put(*position, None, Indicator::Null),
                Some(bytes) => sink.put(*position, Some(bytes), Indicator::Len(bytes.len())),
            }
        }
        self.cursor += 1;
        self.lob_offsets.clear();
        self.lob_done.clear();
        Ok(Rc::Success)
    }

    fn get_data(&mut self, position: u16, buf: &mut [u8]) -> Result<GetDataOutcome, Diag> {
        let mut inner = self.inner.lock();
        inner.log(format!("get_data:{position}"));
        if self.cursor == 0 || self.cursor > inner.rows.len() {
            return Err(Diag {
                state: "HY010".into(),
                native: 0,
                message: "function sequence error: get_data with no current row".into(),
            });
        }
        if self.lob_done.contains(&position) {
            return Ok(GetDataOutcome::NoData);
        }
        let row = &inner.rows[self.cursor - 1];
        let cell = row.get(position as usize - 1).and_then(|c| c.as_deref());
        let bytes = match cell {
            None => {
                self.lob_done.insert(position);
                return Ok(GetDataOutcome::Chunk { indicator: Indicator::Null, more: false });
            }
            Some(b) => b,
        };
        let offset = *self.lob_offsets.get(&position).unwrap_or(&0);
        let remaining = bytes.len() - offset;
        // Character get_data: data bytes plus a terminator within the buffer.
        let cap = buf.len().saturating_sub(1);
        let n = remaining.min(cap);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        buf[n] = 0;
        let indicator = if inner.lob_no_total && remaining >= cap {
            Indicator::NoTotal
        } else {
            Indicator::Len(remaining)
        };
        let more = remaining > n;
        self.lob_offsets.insert(position, offset + n);
        if !more {
            self.lob_done.insert(position);
        }
        Ok(GetDataOutcome::Chunk { indicator, more })
    }

    fn close(&mut self) {
        self.inner.lock().log("close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink(Vec<(u16, Option<Vec<u8>>)>);
    impl ColumnSink for VecSink {
        fn put(&mut self, position: u16, data: Option<&[u8]>, _indicator: Indicator) {
            self.0.push((position, data.map(|d| d.to_vec())));
        }
    }

    #[test]
    fn scripted_rows_come_back_in_order() {
        let engine = MockEngine::new();
        engine.push_row(vec![Some("1"), Some("ada")]);
        engine.push_row(vec![Some("2"), None]);
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();
        stmt.prepare("SELECT id, name FROM emp").unwrap();
        stmt.bind_col(1, WireFormat::Char, 16).unwrap();
        stmt.bind_col(2, WireFormat::Char, 16).unwrap();
        stmt.execute().unwrap();

        let mut sink = VecSink(Vec::new());
        assert_eq!(stmt.fetch(&mut sink).unwrap(), Rc::Success);
        assert_eq!(stmt.fetch(&mut sink).unwrap(), Rc::Success);
        assert_eq!(stmt.fetch(&mut sink).unwrap(), Rc::NoData);
        assert_eq!(sink.0[0], (1, Some(b"1".to_vec())));
        assert_eq!(sink.0[1], (2, Some(b"ada".to_vec())));
        assert_eq!(sink.0[3], (2, None));
    }

    #[test]
    fn fetch_before_execute_is_a_sequence_error() {
        let engine = MockEngine::new();
        engine.push_row(vec![Some("1")]);
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();
        let mut sink = VecSink(Vec::new());
        let diag = stmt.fetch(&mut sink).unwrap_err();
        assert_eq!(diag.state, "HY010");
    }

    #[test]
    fn get_data_streams_in_bounded_chunks() {
        let engine = MockEngine::new();
        engine.push_row(vec![Some("abcdefgh")]);
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();
        stmt.prepare("SELECT note FROM t").unwrap();
        stmt.execute().unwrap();
        let mut sink = VecSink(Vec::new());
        stmt.fetch(&mut sink).unwrap();

        let mut buf = [0u8; 4];
        let mut seen = Vec::new();
        loop {
            match stmt.get_data(1, &mut buf).unwrap() {
                GetDataOutcome::Chunk { indicator, more } => {
                    if let Indicator::Len(remaining) = indicator {
                        let n = remaining.min(buf.len() - 1);
                        seen.extend_from_slice(&buf[..n]);
                    }
                    if !more {
                        break;
                    }
                }
                GetDataOutcome::NoData => break,
            }
        }
        assert_eq!(seen, b"abcdefgh");
        // A further read reports exhaustion.
        assert_eq!(stmt.get_data(1, &mut buf).unwrap(), GetDataOutcome::NoData);
    }
}
