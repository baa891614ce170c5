//! Foreign table descriptors.
//! A table description is built once, when the foreign table is first
//! described, and reused across scans/modifies within an execution. The
//! builder is all-or-nothing: a single column missing a required fact discards
//! the whole table, which the host treats as "cannot push down, fall back to
//! row-by-row". There is no partially-populated descriptor to inspect.

use crate::bind::{BindKind, BindSlot};
use crate::protocol::RemoteTypeCode;
use crate::results::ResultColumn;
use crate::value::LocalType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::warn;

/// Raw per-column facts from the host catalog. Every `Option` is a required
/// fact; absence of any one of them discards the table description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFacts {
    pub remote_name: String,
    pub attno: i32,
    pub local_type: LocalType,
    pub remote_type: Option<RemoteTypeCode>,
    pub byte_size: Option<usize>,
    pub char_count: Option<usize>,
    pub scale: Option<i16>,
    pub nullable: Option<bool>,
    pub codepage: Option<u32>,
}

/// One fully-described remote column.
#[derive(Debug, Clone)]
pub struct TableColumn {
    pub remote_name: String,
    pub attno: i32,
    pub local_type: LocalType,
    pub remote_type: RemoteTypeCode,
    pub byte_size: usize,
    pub char_count: usize,
    pub scale: i16,
    pub nullable: bool,
    pub codepage: u32,
}

impl TableColumn {
    /// Binding strategy for pushing this column's value as a parameter.
    pub fn bind_kind(&self) -> BindKind {
        match self.remote_type {
            RemoteTypeCode::LongVarbinary | RemoteTypeCode::Blob => BindKind::LongBinary,
            t if t.is_long() => BindKind::LongText,
            t if t.is_character() || matches!(t, RemoteTypeCode::Date | RemoteTypeCode::Time | RemoteTypeCode::Timestamp | RemoteTypeCode::Guid) => {
                BindKind::Text
            }
            RemoteTypeCode::Binary | RemoteTypeCode::Varbinary => BindKind::LongBinary,
            _ => BindKind::NumericText,
        }
    }

    pub fn bind_slot(&self) -> BindSlot {
        BindSlot::input(
            &self.remote_name,
            self.remote_type,
            self.char_count.max(self.byte_size),
            self.scale,
            self.local_type,
            self.bind_kind(),
        )
    }

    pub fn result_column(&self, position: u16) -> ResultColumn {
        ResultColumn::new(
            &self.remote_name,
            self.remote_type,
            self.char_count.max(self.byte_size),
            self.scale,
            self.nullable,
            self.attno,
            self.local_type,
            position,
        )
    }
}

/// Complete, immutable description of one remote table.
#[derive(Debug, Clone)]
pub struct TableDesc {
    pub name: String,
    pub batch_size: usize,
    cols: Vec<TableColumn>,
}

/// Typed "incomplete" outcome naming the first missing fact. The host must
/// discard the table and fall back to row-by-row processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteTable {
    pub table: String,
    pub column: String,
    pub fact: &'static str,
}

impl Display for IncompleteTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table '{}' cannot be described: column '{}' is missing required fact '{}'",
            self.table, self.column, self.fact
        )
    }
}

impl std::error::Error for IncompleteTable {}

impl TableDesc {
    /// Fallible constructor: either every required fact is present for every
    /// column, or the whole description is discarded.
    pub fn build(
        name: &str,
        batch_size: usize,
        facts: Vec<ColumnFacts>,
    ) -> Result<TableDesc, IncompleteTable> {
        let incomplete = |column: &str, fact: &'static str| {
            warn!(target: "remora::table", "discarding table '{}': column '{}' missing '{}'", name, column, fact);
            IncompleteTable { table: name.to_string(), column: column.to_string(), fact }
        };
        let mut cols = Vec::with_capacity(facts.len());
        for f in facts {
            let col = TableColumn {
                remote_type: f.remote_type.ok_or_else(|| incomplete(&f.remote_name, "remote_type"))?,
                byte_size: f.byte_size.ok_or_else(|| incomplete(&f.remote_name, "byte_size"))?,
                char_count: f.char_count.ok_or_else(|| incomplete(&f.remote_name, "char_count"))?,
                scale: f.scale.ok_or_else(|| incomplete(&f.remote_name, "scale"))?,
                nullable: f.nullable.ok_or_else(|| incomplete(&f.remote_name, "nullable"))?,
                codepage: f.codepage.ok_or_else(|| incomplete(&f.remote_name, "codepage"))?,
                remote_name: f.remote_name,
                attno: f.attno,
                local_type: f.local_type,
            };
            cols.push(col);
        }
        Ok(TableDesc { name: name.to_string(), batch_size, cols })
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.cols
    }

    pub fn col_count(&self) -> usize {
        self.cols.len()
    }

    pub fn column_by_attno(&self, attno: i32) -> Option<&TableColumn> {
        self.cols.iter().find(|c| c.attno == attno)
    }
}
