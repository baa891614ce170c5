//! Chunked LOB reader: streams one oversized column value across repeated
//! bounded reads into a growing owned buffer. The chunk buffer is scoped to a
//! single column read; the accumulated result carries exactly one trailing
//! terminator byte.

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{GetDataOutcome, Indicator, RemoteStatement};
use tracing::debug;

/// Read the whole long value at a 1-based result position.
/// Returns `Ok(None)` when the value is absent (NULL), `Ok(Some(bytes))` when
/// present; a present zero-length value yields just the terminator byte, kept
/// distinct from absence. Any non-success, non-more-data status is fatal for
/// this column read.
pub fn read_long_column(
    stmt: &mut dyn RemoteStatement,
    position: u16,
    chunk_len: usize,
) -> RemoteResult<Option<Vec<u8>>> {
    debug_assert!(chunk_len >= 2, "chunk must hold at least one byte plus terminator");
    let mut chunk = vec![0u8; chunk_len];
    let mut out: Vec<u8> = Vec::new();
    let mut produced = false;

    loop {
        let outcome = stmt
            .get_data(position, &mut chunk)
            .map_err(RemoteError::exec_failed)?;
        match outcome {
            GetDataOutcome::NoData => break,
            GetDataOutcome::Chunk { indicator, more } => {
                let avail = match indicator {
                    // Whole value absent; the output stays unset.
                    Indicator::Null => return Ok(None),
                    // Remaining length undefined: still a full chunk of data
                    // (the last byte is the terminator the protocol appended).
                    Indicator::NoTotal | Indicator::Unset => chunk_len - 1,
                    Indicator::Len(remaining) => remaining.min(chunk_len - 1),
                };
                produced = true;
                // Previous chunk's terminator was never copied, so plain
                // extension concatenates without doubling it.
                out.extend_from_slice(&chunk[..avail]);
                if !more {
                    break;
                }
            }
        }
    }

    if !produced {
        return Ok(None);
    }
    out.push(0);
    debug!(target: "remora::lob", "read long column pos={} bytes={}", position, out.len() - 1);
    Ok(Some(out))
}

/// Strip the single trailing terminator of an accumulated LOB value.
pub fn lob_bytes(accumulated: &[u8]) -> &[u8] {
    match accumulated.last() {
        Some(0) => &accumulated[..accumulated.len() - 1],
        _ => accumulated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RemoteConnection;
    use crate::testkit::MockEngine;

    fn stmt_with_lob(engine: &MockEngine, value: Option<&str>) -> Box<dyn RemoteStatement> {
        if let Some(v) = value {
            engine.push_row(vec![Some(v)]);
        } else {
            engine.push_row(vec![None]);
        }
        let mut conn = engine.connection();
        let mut stmt = conn.alloc_statement().unwrap();
        stmt.prepare("SELECT note FROM t").unwrap();
        stmt.execute().unwrap();
        // Position the cursor on the scripted row.
        let mut sink = NoopSink;
        stmt.fetch(&mut sink).unwrap();
        stmt
    }

    struct NoopSink;
    impl crate::protocol::ColumnSink for NoopSink {
        fn put(&mut self, _p: u16, _d: Option<&[u8]>, _i: crate::protocol::Indicator) {}
    }

    #[test]
    fn accumulation_is_chunk_size_invariant() {
        let text = "the quick brown fox jumps over the lazy dog";
        let mut outputs = Vec::new();
        for chunk_len in [4usize, 7, 16, 64] {
            let engine = MockEngine::new();
            let mut stmt = stmt_with_lob(&engine, Some(text));
            let got = read_long_column(&mut *stmt, 1, chunk_len).unwrap().unwrap();
            outputs.push(got);
        }
        for out in &outputs {
            assert_eq!(lob_bytes(out), text.as_bytes());
            assert_eq!(out.last(), Some(&0u8));
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn empty_present_distinct_from_absent() {
        let engine = MockEngine::new();
        let mut stmt = stmt_with_lob(&engine, Some(""));
        let present = read_long_column(&mut *stmt, 1, 8).unwrap();
        assert_eq!(present.as_deref(), Some(&[0u8][..]));
        assert_eq!(lob_bytes(present.as_deref().unwrap()), b"");

        let engine = MockEngine::new();
        let mut stmt = stmt_with_lob(&engine, None);
        let absent = read_long_column(&mut *stmt, 1, 8).unwrap();
        assert!(absent.is_none());
    }

    #[test]
    fn no_total_extends_by_full_chunk() {
        let engine = MockEngine::new();
        engine.set_lob_no_total(true);
        let mut stmt = stmt_with_lob(&engine, Some("abcdefghij"));
        let got = read_long_column(&mut *stmt, 1, 6).unwrap().unwrap();
        assert_eq!(lob_bytes(&got), b"abcdefghij");
    }
}
