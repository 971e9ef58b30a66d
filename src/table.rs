//! Schema types: column definitions, table schemas and the in-memory
//! catalog entry that mirrors them.

use crate::error::{DbError, Result};
use crate::value::{ColumnValue, DataType};
use std::rc::Rc;

/// Referential action for the referencing side of a foreign key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FkAction {
    NoAction,
    Cascade,
    Restrict,
    SetNull,
}

impl FkAction {
    pub fn code(self) -> i64 {
        match self {
            FkAction::NoAction => 0,
            FkAction::Cascade => 1,
            FkAction::Restrict => 2,
            FkAction::SetNull => 3,
        }
    }

    pub fn from_code(code: i64) -> FkAction {
        match code {
            1 => FkAction::Cascade,
            2 => FkAction::Restrict,
            3 => FkAction::SetNull,
            _ => FkAction::NoAction,
        }
    }
}

/// Foreign key declared on a column.
#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Column definition: name, type, type parameters and constraint flags.
/// The default value is an expression, kept as source text and re-parsed
/// ( then cached ) when first needed, so defaults may call functions such
/// as NOW().
#[derive(Clone, Debug)]
pub struct ColumnDef {
    pub name: String,
    pub typ: DataType,
    pub varchar_len: u8,
    pub dec_precision: u8,
    pub dec_scale: u8,
    pub not_null: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    pub is_index: bool,
    pub is_array: bool,
    pub has_default: bool,
    pub default_expr: Option<String>,
    pub check_expr: Option<String>,
    pub has_sequence: bool,
    pub fk: Option<ForeignKey>,
}

impl ColumnDef {
    pub fn new(name: &str, typ: DataType) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            typ,
            varchar_len: 0,
            dec_precision: 0,
            dec_scale: 0,
            not_null: false,
            is_primary: false,
            is_unique: false,
            is_index: false,
            is_array: false,
            has_default: false,
            default_expr: None,
            check_expr: None,
            has_sequence: typ == DataType::Serial,
            fk: None,
        }
    }

    /// Whether this column carries a B-tree index file.
    pub fn indexed(&self) -> bool {
        self.is_primary || self.is_unique || self.is_index
    }

    /// Coerce a value to this column's declared type, enforcing type
    /// parameters. This is the `infer_and_cast` step that precedes
    /// constraint validation.
    pub fn coerce(&self, v: &mut ColumnValue) -> Result<()> {
        if v.is_null() || v.is_toast() {
            return Ok(());
        }
        if self.is_array {
            if !matches!(v, ColumnValue::Array(..)) {
                return Err(DbError::Type(format!(
                    "column '{}' expects an array",
                    self.name
                )));
            }
        } else if matches!(v, ColumnValue::Array(..)) {
            return Err(DbError::Type(format!(
                "column '{}' is not an array",
                self.name
            )));
        }
        v.cast_to(self.typ)?;
        match self.typ {
            DataType::Char => {
                if let ColumnValue::Str(s) = v {
                    if s.chars().count() > 1 {
                        return Err(DbError::Type(format!(
                            "value too long for CHAR column '{}'",
                            self.name
                        )));
                    }
                }
            }
            DataType::VarChar => {
                if let ColumnValue::Str(s) = v {
                    if self.varchar_len > 0 && s.len() > self.varchar_len as usize {
                        return Err(DbError::Type(format!(
                            "value too long for VARCHAR({}) column '{}'",
                            self.varchar_len, self.name
                        )));
                    }
                }
            }
            DataType::Decimal => {
                if let ColumnValue::Decimal(d) = v {
                    d.precision = self.dec_precision;
                    d.scale = self.dec_scale;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Table schema: ordered column definitions plus cached counts.
#[derive(Clone, Debug)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub prim_count: usize,
    pub not_null_count: usize,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> TableSchema {
        let prim_count = columns.iter().filter(|c| c.is_primary).count();
        let not_null_count = columns.iter().filter(|c| c.not_null).count();
        TableSchema {
            name: name.to_string(),
            columns,
            prim_count,
            not_null_count,
        }
    }

    /// Recompute the cached counts after an ALTER.
    pub fn refresh_counts(&mut self) {
        self.prim_count = self.columns.iter().filter(|c| c.is_primary).count();
        self.not_null_count = self.columns.iter().filter(|c| c.not_null).count();
    }

    /// Resolve a column name to its position.
    pub fn find_col(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Positions of primary-key columns.
    pub fn primary_cols(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary)
            .map(|(i, _)| i)
            .collect()
    }

    /// Bytes in the per-row null bitmap.
    pub fn bitmap_len(&self) -> usize {
        (self.columns.len() + 7) / 8
    }
}

/// In-memory mirror of one catalog slot: table identity, on-disk schema
/// offset, and the owning schema. B-trees are managed separately by the
/// tree cache so they can be paged out.
#[derive(Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub table_id: i64,
    pub offset: u32,
    pub schema: Rc<TableSchema>,
}

/// Name of the sequence backing a SERIAL column.
pub fn sequence_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_seq")
}
