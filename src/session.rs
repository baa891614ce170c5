//! Statement/session lifecycle manager.
//! A session owns one remote connection and at most one active statement,
//! expressed as a sum-typed slot so double-preparation is a typed invariant
//! violation rather than a silent handle swap. Cursor and sizing attributes
//! are set on the unprepared handle; teardown is idempotent.

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{RemoteConnection, RemoteStatement, StmtAttr};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// Statement-shape recognition only: is the read query asking for row locks?
static ROW_LOCKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfor\s+(update|share)\b").unwrap());

/// True when the statement text requests row locking (FOR UPDATE semantics),
/// which demands a dynamic cursor with pessimistic concurrency.
pub fn wants_row_locking(sql: &str) -> bool {
    ROW_LOCKING_RE.is_match(sql)
}

/// Per-row scratch scope for transient conversions. Bulk-released at the end
/// of every scan/modify iteration and again at teardown; both releases are
/// idempotent. Checked-out buffers keep their capacity across rows.
#[derive(Debug, Default)]
pub struct Scratch {
    pool: Vec<Vec<u8>>,
}

impl Scratch {
    pub fn checkout(&mut self, len: usize) -> Vec<u8> {
        let mut buf = self.pool.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    pub fn restore(&mut self, buf: Vec<u8>) {
        self.pool.push(buf);
    }

    /// Bulk release. Safe to call any number of times.
    pub fn reset(&mut self) {
        self.pool.clear();
    }
}

/// The statement slot: exactly zero or one handle attached to the session.
enum StmtState {
    Idle,
    Prepared(Box<dyn RemoteStatement>),
    Executing(Box<dyn RemoteStatement>),
}

impl StmtState {
    fn name(&self) -> &'static str {
        match self {
            StmtState::Idle => "idle",
            StmtState::Prepared(_) => "prepared",
            StmtState::Executing(_) => "executing",
        }
    }
}

pub struct Session {
    conn: Box<dyn RemoteConnection>,
    state: StmtState,
    scratch: Scratch,
}

impl Session {
    /// Wrap a connection obtained from the external session provider.
    pub fn new(conn: Box<dyn RemoteConnection>) -> Self {
        Session { conn, state: StmtState::Idle, scratch: Scratch::default() }
    }

    fn alloc(&mut self) -> RemoteResult<Box<dyn RemoteStatement>> {
        match self.state {
            StmtState::Idle => {}
            ref other => {
                // Caller bug: a statement is already attached. Never recovered,
                // never silently replaced.
                return Err(RemoteError::invariant(format!(
                    "statement already attached to session (state: {})",
                    other.name()
                )));
            }
        }
        self.conn.alloc_statement().map_err(RemoteError::exec_failed)
    }

    /// Prepare a modify/utility statement. No cursor attributes apply.
    pub fn prepare(&mut self, sql: &str) -> RemoteResult<()> {
        let mut stmt = self.alloc()?;
        stmt.prepare(sql).map_err(RemoteError::exec_failed)?;
        debug!(target: "remora::session", "prepared: {}", sql);
        self.state = StmtState::Prepared(stmt);
        Ok(())
    }

    /// Prepare a read query. Decides cursor sensitivity from the statement
    /// shape and sets the row-array and prefetch sizing attributes; all of
    /// these must land on the handle before the prepare call.
    pub fn prepare_query(
        &mut self,
        sql: &str,
        fetch_size: usize,
        prefetch_rows: usize,
    ) -> RemoteResult<()> {
        let mut stmt = self.alloc()?;
        if wants_row_locking(sql) {
            stmt.set_attr(StmtAttr::CursorDynamic).map_err(RemoteError::exec_failed)?;
            stmt.set_attr(StmtAttr::ConcurrencyLock).map_err(RemoteError::exec_failed)?;
        } else {
            stmt.set_attr(StmtAttr::CursorInsensitive).map_err(RemoteError::exec_failed)?;
        }
        stmt.set_attr(StmtAttr::RowArraySize(fetch_size)).map_err(RemoteError::exec_failed)?;
        stmt.set_attr(StmtAttr::PrefetchRows(prefetch_rows)).map_err(RemoteError::exec_failed)?;
        stmt.prepare(sql).map_err(RemoteError::exec_failed)?;
        debug!(target: "remora::session", "prepared query (locking={}): {}", wants_row_locking(sql), sql);
        self.state = StmtState::Prepared(stmt);
        Ok(())
    }

    /// The attached statement, whatever its execution phase.
    pub fn stmt(&mut self) -> RemoteResult<&mut dyn RemoteStatement> {
        match &mut self.state {
            StmtState::Prepared(s) | StmtState::Executing(s) => Ok(s.as_mut()),
            StmtState::Idle => Err(RemoteError::invariant("no statement attached to session")),
        }
    }

    /// Record that the attached statement entered execution.
    pub(crate) fn mark_executing(&mut self) {
        self.state = match std::mem::replace(&mut self.state, StmtState::Idle) {
            StmtState::Prepared(s) | StmtState::Executing(s) => StmtState::Executing(s),
            StmtState::Idle => StmtState::Idle,
        };
    }

    pub fn scratch(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    pub fn commit(&mut self) -> RemoteResult<()> {
        self.conn.commit().map_err(RemoteError::exec_failed)
    }

    pub fn rollback(&mut self) -> RemoteResult<()> {
        self.conn.rollback().map_err(RemoteError::exec_failed)
    }

    /// Close the attached statement, if any, and release scratch. Idempotent:
    /// tearing down an idle session is a no-op, never an error.
    pub fn teardown(&mut self) {
        if let StmtState::Prepared(mut s) | StmtState::Executing(mut s) =
            std::mem::replace(&mut self.state, StmtState::Idle)
        {
            s.close();
            debug!(target: "remora::session", "statement closed");
        }
        self.scratch.reset();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockEngine;

    #[test]
    fn row_locking_shape_detection() {
        assert!(wants_row_locking("SELECT a FROM t WHERE id = ? FOR UPDATE"));
        assert!(wants_row_locking("select a from t for\n share"));
        assert!(!wants_row_locking("SELECT a FROM t"));
        assert!(!wants_row_locking("UPDATE t SET a = 1"));
    }

    #[test]
    fn second_prepare_is_invariant_violation() {
        let engine = MockEngine::new();
        let mut session = Session::new(engine.connection());
        session.prepare("DELETE FROM t").unwrap();
        let err = session.prepare("DELETE FROM u").unwrap_err();
        assert!(matches!(err, RemoteError::ProtocolInvariantViolation { .. }));
        // The original handle survives untouched.
        assert!(session.stmt().is_ok());
    }

    #[test]
    fn query_attributes_set_before_prepare() {
        let engine = MockEngine::new();
        let mut session = Session::new(engine.connection());
        session.prepare_query("SELECT id FROM t FOR UPDATE", 50, 200).unwrap();
        let calls = engine.calls();
        let prepare_at = calls.iter().position(|c| c.starts_with("prepare")).unwrap();
        for attr in ["attr:cursor_dynamic", "attr:concurrency_lock", "attr:row_array_size=50", "attr:prefetch_rows=200"] {
            let at = calls.iter().position(|c| c == attr).unwrap();
            assert!(at < prepare_at, "{attr} must precede prepare");
        }
    }

    #[test]
    fn plain_query_uses_insensitive_cursor() {
        let engine = MockEngine::new();
        let mut session = Session::new(engine.connection());
        session.prepare_query("SELECT id FROM t", 100, 0).unwrap();
        let calls = engine.calls();
        assert!(calls.iter().any(|c| c == "attr:cursor_insensitive"));
        assert!(!calls.iter().any(|c| c == "attr:concurrency_lock"));
    }

    #[test]
    fn teardown_is_idempotent() {
        let engine = MockEngine::new();
        let mut session = Session::new(engine.connection());
        session.prepare("DELETE FROM t").unwrap();
        session.teardown();
        session.teardown();
        session.teardown();
        let closes = engine.calls().iter().filter(|c| *c == "close").count();
        assert_eq!(closes, 1);
        // A fresh prepare works after teardown.
        session.prepare("DELETE FROM u").unwrap();
    }

    #[test]
    fn scratch_reset_is_idempotent() {
        let mut scratch = Scratch::default();
        let b = scratch.checkout(16);
        scratch.restore(b);
        scratch.reset();
        scratch.reset();
        assert_eq!(scratch.checkout(4).len(), 4);
    }
}
