//! Direct-modify plan adapter.
//! Reconciles a planner-produced UPDATE/DELETE fragment, pushed entirely to
//! the remote side (possibly over a join), with the row shape the host
//! executor expects back. The core of it is the attribute-number remap: when
//! the modification runs over a join, the physical result row is described by
//! the scan's projection list rather than the target relation's tuple shape,
//! and `attno_map` routes each projected RETURNING column to its physical
//! attribute slot. Attributes the map does not cover materialize as NULL.

use crate::bind::{attach_all, BindKind, BindSlot};
use crate::error::{RemoteError, RemoteResult};
use crate::lob;
use crate::protocol::{Rc, RemoteTypeCode, LOB_CHUNK_LEN};
use crate::results::{bind_dummy_column, bind_result_columns, ResultColumn, RowSink};
use crate::session::Session;
use crate::table::TableDesc;
use crate::value::{output_fn, parse_cell, HostValue, LocalType, OutputFn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// System attribute number of the row identifier. The only system column a
/// RETURNING projection may reference.
pub const ROW_ID_ATTNO: i32 = -1;

/// Serialized plan fragment handed over by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyFragment {
    pub sql: String,
    pub has_returning: bool,
    /// Projection positions (1-based) retrieved by RETURNING, in cursor order.
    pub retrieved_attrs: Vec<usize>,
    /// Whether this node maintains the processed-row count itself.
    pub set_processed: bool,
}

impl ModifyFragment {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Concrete composite type of a range-table relation, used to de-genericize
/// whole-row projection entries.
#[derive(Debug, Clone)]
pub struct CompositeType {
    pub relation: String,
    pub attr_types: Vec<LocalType>,
}

/// Host-side range-table/catalog lookup.
pub trait RangeTableLookup {
    fn composite_type(&self, rel_index: u32) -> Option<CompositeType>;
}

/// One entry of the scan's projection list, 1-based by slice position.
#[derive(Debug, Clone)]
pub enum TargetEntry {
    /// Direct column reference.
    Column { rel_index: u32, attno: i32, ty: LocalType },
    /// Whole-row (record-typed) reference. `resolved` is filled from the
    /// range table when the relation can be identified; left generic
    /// otherwise, in which case materialization later fails loudly.
    WholeRow { rel_index: u32, resolved: Option<CompositeType> },
    /// Anything else (computed expression); never remapped.
    Expression,
}

/// Resolve whole-row entries referencing the target relation to their concrete
/// composite type. Unidentifiable relations are left generic; that is
/// accepted degraded behavior, not masked.
pub fn resolve_whole_row_types(
    targets: &mut [TargetEntry],
    lookup: &dyn RangeTableLookup,
) {
    for entry in targets.iter_mut() {
        if let TargetEntry::WholeRow { rel_index, resolved } = entry {
            if resolved.is_none() {
                match lookup.composite_type(*rel_index) {
                    Some(ct) => *resolved = Some(ct),
                    None => {
                        warn!(target: "remora::modify",
                              "whole-row type for range-table entry {} left generic", rel_index);
                    }
                }
            }
        }
    }
}

/// The remap from physical result attributes to projection positions.
/// One entry per physical attribute; 0 means "no value retrieved, substitute
/// NULL". Construction is a pure function of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttnoMap {
    map: Vec<usize>,
    /// Projection position carrying the row identifier, when retrieved.
    pub row_id_slot: Option<usize>,
}

impl AttnoMap {
    /// Projection position feeding a 1-based physical attribute, or `None`
    /// when the attribute must be synthesized as NULL.
    pub fn slot_for(&self, attno: usize) -> Option<usize> {
        match self.map.get(attno - 1) {
            Some(0) | None => None,
            Some(pos) => Some(*pos),
        }
    }

    pub fn entries(&self) -> &[usize] {
        &self.map
    }
}

/// Walk the scan projection list and record, for every direct column
/// reference to the target relation whose projection position is retrieved,
/// that position at the referenced attribute's slot.
pub fn build_attno_map(
    targets: &[TargetEntry],
    retrieved: &[usize],
    result_natts: usize,
    target_rel: u32,
) -> RemoteResult<AttnoMap> {
    let mut map = vec![0usize; result_natts];
    let mut row_id_slot = None;
    for (idx, entry) in targets.iter().enumerate() {
        let proj_pos = idx + 1;
        if !retrieved.contains(&proj_pos) {
            continue;
        }
        if let TargetEntry::Column { rel_index, attno, .. } = entry {
            if *rel_index != target_rel {
                continue;
            }
            if *attno > 0 {
                let slot = *attno as usize;
                if slot > result_natts {
                    return Err(RemoteError::invariant(format!(
                        "projection entry {} references attribute {} beyond result row width {}",
                        proj_pos, attno, result_natts
                    )));
                }
                map[slot - 1] = proj_pos;
            } else if *attno == ROW_ID_ATTNO {
                row_id_slot = Some(proj_pos);
            } else {
                return Err(RemoteError::invariant(format!(
                    "projection entry {} references unsupported system attribute {}",
                    proj_pos, attno
                )));
            }
        }
    }
    Ok(AttnoMap { map, row_id_slot })
}

/// Evaluation context for one scan/modify iteration.
#[derive(Debug, Default)]
pub struct RowContext {
    pub values: Vec<Option<HostValue>>,
    pub row_id: Option<HostValue>,
}

/// One host-evaluated parameter expression: a static result type and the
/// narrow evaluate-to-a-value contract against the current row context.
pub struct ParamExpr {
    pub ty: LocalType,
    pub eval: Box<dyn Fn(&RowContext) -> Option<HostValue>>,
}

impl ParamExpr {
    pub fn new(ty: LocalType, eval: impl Fn(&RowContext) -> Option<HostValue> + 'static) -> Self {
        ParamExpr { ty, eval: Box::new(eval) }
    }

    /// Constant parameter, independent of the row context.
    pub fn constant(ty: LocalType, value: Option<HostValue>) -> Self {
        ParamExpr { ty, eval: Box::new(move |_| value.clone()) }
    }
}

/// Ready-to-execute direct-modify state. Created at scan initialization,
/// destroyed (with its scratch scope) at scan teardown.
pub struct DirectModify {
    session: Session,
    frag: ModifyFragment,
    params: Vec<ParamExpr>,
    out_fns: Vec<OutputFn>,
    slots: Vec<BindSlot>,
    result_cols: Vec<ResultColumn>,
    // Owned by this state, never the stack: stays bound across every fetch.
    #[allow(dead_code)]
    dummy: Option<ResultColumn>,
    attno_map: AttnoMap,
    cursor_of_proj: HashMap<usize, u16>,
    unresolved_whole_row: HashSet<u16>,
    /// Projection position of a retrieved whole-row reference to the target
    /// relation, when the RETURNING list carries one.
    whole_row_proj: Option<usize>,
    result_natts: usize,
    executed: bool,
    processed: u64,
    last_row_id: Option<HostValue>,
}

impl DirectModify {
    /// Build per-statement state for a pushed-down UPDATE/DELETE: prepare the
    /// statement, allocate parameter slots and rendering functions, and attach
    /// output storage for the RETURNING projection (or the dummy buffer when
    /// nothing is projected).
    pub fn begin(
        mut session: Session,
        frag: ModifyFragment,
        params: Vec<ParamExpr>,
        mut targets: Vec<TargetEntry>,
        target_rel: u32,
        result_natts: usize,
        table: &TableDesc,
        lookup: &dyn RangeTableLookup,
    ) -> RemoteResult<Self> {
        resolve_whole_row_types(&mut targets, lookup);
        let attno_map = build_attno_map(&targets, &frag.retrieved_attrs, result_natts, target_rel)?;

        session.prepare(&frag.sql)?;

        // Output functions are resolved once from each expression's static
        // type and owned by this state for its whole lifetime.
        let out_fns: Vec<OutputFn> = params.iter().map(|p| output_fn(p.ty)).collect();
        let slots: Vec<BindSlot> = params
            .iter()
            .map(|p| {
                BindSlot::input("?", RemoteTypeCode::Varchar, 0, 0, p.ty, BindKind::Text)
            })
            .collect();

        let mut result_cols = Vec::new();
        let mut cursor_of_proj = HashMap::new();
        let mut unresolved_whole_row = HashSet::new();
        let mut whole_row_proj = None;
        let mut dummy = None;

        if frag.has_returning {
            for (i, proj_pos) in frag.retrieved_attrs.iter().enumerate() {
                let position = (i + 1) as u16;
                cursor_of_proj.insert(*proj_pos, position);
                let col = match targets.get(proj_pos - 1) {
                    Some(TargetEntry::Column { attno, ty, .. }) => {
                        match table.column_by_attno(*attno) {
                            Some(tc) => tc.result_column(position),
                            // Row identifier and other non-table refs come
                            // back as text.
                            None => ResultColumn::new(
                                "",
                                RemoteTypeCode::Varchar,
                                255,
                                0,
                                true,
                                *attno,
                                *ty,
                                position,
                            ),
                        }
                    }
                    Some(TargetEntry::WholeRow { rel_index, resolved }) => {
                        if *rel_index == target_rel {
                            whole_row_proj = Some(*proj_pos);
                        }
                        if resolved.is_none() {
                            unresolved_whole_row.insert(position);
                        }
                        ResultColumn::new(
                            "",
                            RemoteTypeCode::Clob,
                            LOB_CHUNK_LEN - 1,
                            0,
                            true,
                            0,
                            LocalType::Record,
                            position,
                        )
                    }
                    Some(TargetEntry::Expression) | None => ResultColumn::new(
                        "",
                        RemoteTypeCode::Varchar,
                        255,
                        0,
                        true,
                        0,
                        LocalType::Text,
                        position,
                    ),
                };
                result_cols.push(col);
            }
            bind_result_columns(session.stmt()?, &result_cols)?;
        } else {
            dummy = Some(bind_dummy_column(session.stmt()?)?);
        }

        debug!(target: "remora::modify", "direct modify ready: returning={} params={} natts={}",
               frag.has_returning, params.len(), result_natts);

        Ok(DirectModify {
            session,
            frag,
            params,
            out_fns,
            slots,
            result_cols,
            dummy,
            attno_map,
            cursor_of_proj,
            unresolved_whole_row,
            whole_row_proj,
            result_natts,
            executed: false,
            processed: 0,
            last_row_id: None,
        })
    }

    /// Evaluate and attach the parameters for this execution. Each expression
    /// is evaluated once per row against the current context and rendered to
    /// text; values never travel in binary host-native form.
    fn refresh_params(&mut self, ctx: &RowContext) -> RemoteResult<()> {
        for ((param, slot), render) in
            self.params.iter().zip(self.slots.iter_mut()).zip(self.out_fns.iter())
        {
            let value = (param.eval)(ctx);
            slot.value = value.as_ref().map(|v| render(v));
            if let Some(text) = &slot.value {
                slot.size = text.len();
            }
        }
        attach_all(self.session.stmt()?, &self.slots)
    }

    /// Advance the modify: the first call executes the pushed statement; with
    /// RETURNING, every call materializes one result row until exhaustion.
    /// Per-row scratch is bulk-released at the end of each iteration.
    pub fn iterate(&mut self, ctx: &RowContext) -> RemoteResult<Option<Vec<Option<HostValue>>>> {
        if !self.executed {
            self.refresh_params(ctx)?;
            if !self.frag.has_returning {
                self.processed = crate::exec::execute_with_rowcount(&mut self.session)?;
                self.executed = true;
                self.session.scratch().reset();
                return Ok(None);
            }
            let rc = crate::exec::execute(&mut self.session)?;
            self.executed = true;
            if rc == Rc::NoData {
                return Ok(None);
            }
        }

        let row = self.fetch_returning_row();
        self.session.scratch().reset();
        row
    }

    fn fetch_returning_row(&mut self) -> RemoteResult<Option<Vec<Option<HostValue>>>> {
        let rc = {
            let mut sink = RowSink::new(&mut self.result_cols);
            self.session
                .stmt()?
                .fetch(&mut sink)
                .map_err(RemoteError::exec_failed)?
        };
        if rc == Rc::NoData {
            return Ok(None);
        }

        let mut row: Vec<Option<HostValue>> = vec![None; self.result_natts];
        for attno in 1..=self.result_natts {
            // Attributes absent from the map stay NULL.
            let proj_pos = match self.attno_map.slot_for(attno) {
                Some(p) => p,
                None => continue,
            };
            row[attno - 1] = self.materialize_column(proj_pos)?;
        }

        if let Some(proj_pos) = self.attno_map.row_id_slot {
            self.last_row_id = self.materialize_column(proj_pos)?;
        }

        if self.frag.set_processed {
            self.processed += 1;
        }
        Ok(Some(row))
    }

    /// Materialize the value fetched for one projection position, escalating
    /// to the chunked LOB reader when the inline buffer did not hold it.
    fn materialize_column(&mut self, proj_pos: usize) -> RemoteResult<Option<HostValue>> {
        let position = *self.cursor_of_proj.get(&proj_pos).ok_or_else(|| {
            RemoteError::invariant(format!("projection position {} was never bound", proj_pos))
        })?;
        if self.unresolved_whole_row.contains(&position) {
            // Degraded path promised to fail loudly at materialization time.
            return Err(RemoteError::unsupported(format!(
                "whole-row value at projection position {} has unresolved composite type",
                proj_pos
            )));
        }
        let col = self
            .result_cols
            .iter()
            .find(|c| c.position == position)
            .ok_or_else(|| RemoteError::invariant(format!("no result column at position {}", position)))?;
        if col.is_null() {
            return Ok(None);
        }
        if col.is_truncated() {
            let stmt = self.session.stmt()?;
            return match lob::read_long_column(stmt, position, LOB_CHUNK_LEN)? {
                None => Ok(None),
                Some(acc) => {
                    let text = String::from_utf8_lossy(lob::lob_bytes(&acc)).into_owned();
                    let col = self
                        .result_cols
                        .iter()
                        .find(|c| c.position == position)
                        .ok_or_else(|| RemoteError::invariant("result column vanished"))?;
                    parse_cell(&text, col.local_type).map(Some)
                }
            };
        }
        parse_cell(&col.text(), col.local_type).map(Some)
    }

    /// Materialize the retrieved whole-row (record) value of the target
    /// relation for the current row, when the RETURNING list projects one.
    /// Fails loudly when the composite type was never resolved.
    pub fn whole_row(&mut self) -> RemoteResult<Option<HostValue>> {
        match self.whole_row_proj {
            Some(proj_pos) => self.materialize_column(proj_pos),
            None => Ok(None),
        }
    }

    /// Rows processed so far (affected count for RETURNING-less modifies).
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Row identifier retrieved with the last RETURNING row, if projected.
    pub fn last_row_id(&self) -> Option<&HostValue> {
        self.last_row_id.as_ref()
    }

    /// Tear down: close the statement and release scratch, then report the
    /// processed count. Idempotent through the session's teardown contract.
    pub fn end(mut self) -> u64 {
        self.session.teardown();
        self.processed
    }
}
