//! Query execution and the row-count protocol.
//! Execute distinguishes success-with-rows, success-with-no-data (zero
//! affected rows, not an error) and failure; failures are classified by the
//! remote SQLSTATE so the host can tell a retryable serialization conflict
//! from a plain execution error. The same execute/row-count sequence backs
//! pushed modifies, plain remote INSERTs and remote TRUNCATE.

use crate::bind::{attach_all, BindSlot};
use crate::error::{RemoteError, RemoteResult};
use crate::protocol::Rc;
use crate::session::Session;
use crate::table::TableDesc;
use crate::value::{output_fn, HostValue};
use tracing::{debug, info};

/// Execute the attached statement and retrieve the affected/returned row
/// count. `Rc::NoData` means zero affected rows. Row-count retrieval failing
/// is always fatal.
pub fn execute_with_rowcount(session: &mut Session) -> RemoteResult<u64> {
    match session.stmt()?.execute() {
        Ok(Rc::NoData) => {
            session.mark_executing();
            debug!(target: "remora::exec", "execute: no data (0 rows)");
            return Ok(0);
        }
        Ok(_) => session.mark_executing(),
        Err(diag) => return Err(RemoteError::from_execute_diag(diag)),
    }
    let count = session.stmt()?.row_count().map_err(RemoteError::exec_failed)?;
    debug!(target: "remora::exec", "execute: {} rows", count);
    Ok(count)
}

/// Execute without consuming the row count (SELECT path: the count is not
/// applicable, rows arrive through fetch).
pub fn execute(session: &mut Session) -> RemoteResult<Rc> {
    match session.stmt()?.execute() {
        Ok(rc) => {
            session.mark_executing();
            Ok(rc)
        }
        Err(diag) => Err(RemoteError::from_execute_diag(diag)),
    }
}

/// Push one row into the remote table: parameters bound 1..N in table-column
/// order, values rendered to text by each column's static local type.
pub fn insert_row(
    session: &mut Session,
    table: &TableDesc,
    values: &[Option<HostValue>],
) -> RemoteResult<u64> {
    if values.len() != table.col_count() {
        return Err(RemoteError::invariant(format!(
            "insert into '{}' expects {} values, got {}",
            table.name,
            table.col_count(),
            values.len()
        )));
    }
    let cols = table
        .columns()
        .iter()
        .map(|c| c.remote_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let markers = vec!["?"; table.col_count()].join(", ");
    let sql = format!("INSERT INTO {} ({}) VALUES ({})", table.name, cols, markers);

    session.prepare(&sql)?;
    let mut slots = Vec::with_capacity(table.col_count());
    for (col, value) in table.columns().iter().zip(values) {
        let mut slot = col.bind_slot();
        slot.value = value.as_ref().map(|v| output_fn(col.local_type)(v));
        if let Some(HostValue::Bytes(b)) = value {
            slot.bytes = Some(b.clone());
        }
        slots.push(slot);
    }
    // The statement is torn down whichever way execution goes, so the session
    // is idle again before the error (if any) propagates.
    let outcome = bind_and_execute(session, &slots);
    session.teardown();
    outcome
}

fn bind_and_execute(session: &mut Session, slots: &[BindSlot]) -> RemoteResult<u64> {
    attach_all(session.stmt()?, slots)?;
    execute_with_rowcount(session)
}

/// Remote TRUNCATE. Truncation is not transactional on the remote side, so the
/// current transaction is force-committed before the statement handle is even
/// allocated.
pub fn truncate(session: &mut Session, table_name: &str) -> RemoteResult<u64> {
    session.commit()?;
    info!(target: "remora::exec", "truncating remote table {}", table_name);
    session.prepare(&format!("TRUNCATE TABLE {}", table_name))?;
    let outcome = execute_with_rowcount(session);
    session.teardown();
    outcome
}
