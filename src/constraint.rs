//! Constraint engine. After type coercion, INSERT and UPDATE run the
//! table's declared constraints against the prospective row; DELETE and
//! referenced-key UPDATE resolve the referring side's ON DELETE/ON UPDATE
//! actions through the self-hosted SQL path.

use crate::error::{DbError, Result};
use crate::eval;
use crate::parse::{ConstraintKind, Parser};
use crate::sys;
use crate::table::{FkAction, TableSchema};
use crate::value::ColumnValue;
use crate::DB;

/// A constraint row from jb_constraints, parsed.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub id: i64,
    pub table_id: i64,
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub check_expr: Option<String>,
    pub ref_table_id: i64,
    pub ref_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Load the constraints declared on a table.
pub fn table_constraints(db: &DB, table_id: i64) -> Result<Vec<Constraint>> {
    let res = db.exec_internal(&format!(
        "SELECT id, table_id, name, constraint_type, columns, check_expr, ref_table_id, \
         ref_columns, on_delete, on_update FROM jb_constraints WHERE table_id = {table_id};"
    ))?;
    res.rows.iter().map(parse_constraint_row).collect()
}

/// Load the foreign keys in other tables that reference `table_id`.
pub fn referring_constraints(db: &DB, table_id: i64) -> Result<Vec<Constraint>> {
    let res = db.exec_internal(&format!(
        "SELECT id, table_id, name, constraint_type, columns, check_expr, ref_table_id, \
         ref_columns, on_delete, on_update FROM jb_constraints \
         WHERE ref_table_id = {table_id} AND constraint_type = 3;"
    ))?;
    res.rows.iter().map(parse_constraint_row).collect()
}

fn parse_constraint_row(row: &Vec<ColumnValue>) -> Result<Constraint> {
    Ok(Constraint {
        id: row[0].int()?,
        table_id: row[1].int()?,
        name: row[2].str().unwrap_or("").to_string(),
        kind: ConstraintKind::from_code(row[3].int()?),
        columns: sys::parse_text_array(row[4].str().unwrap_or("")),
        check_expr: row[5].str().ok().map(|s| s.to_string()),
        ref_table_id: row[6].int().unwrap_or(-1),
        ref_columns: sys::parse_text_array(row[7].str().unwrap_or("")),
        on_delete: FkAction::from_code(row[8].int().unwrap_or(0)),
        on_update: FkAction::from_code(row[9].int().unwrap_or(0)),
    })
}

/// Validate a prospective row against every constraint on the table.
/// `current_rid` carries the row being replaced for UPDATE, so uniqueness
/// checks can ignore the row itself.
pub fn validate_row(
    db: &DB,
    schema: &TableSchema,
    table_id: i64,
    values: &[ColumnValue],
    skip_rid: Option<crate::page::RowId>,
) -> Result<()> {
    // NOT NULL comes from the schema flags ( jb_attribute mirror ).
    for (i, col) in schema.columns.iter().enumerate() {
        if col.not_null && values[i].is_null() && !col.has_sequence {
            return Err(DbError::constraint(
                &format!("{}_{}_not_null", schema.name, col.name),
                format!("column '{}' may not be null", col.name),
            ));
        }
    }
    // Column-level uniqueness, primary keys included.
    for (i, col) in schema.columns.iter().enumerate() {
        if (col.is_primary || col.is_unique) && !values[i].is_null() {
            let existing = db.index_lookup(&schema.name, &col.name, &values[i])?;
            if !existing.is_none() && Some(existing) != skip_rid {
                let kind = if col.is_primary { "pkey" } else { "key" };
                return Err(DbError::constraint(
                    &format!("{}_{}_{kind}", schema.name, col.name),
                    format!("duplicate value {} for '{}'", values[i], col.name),
                ));
            }
        }
    }
    // Column-level CHECK expressions.
    for col in &schema.columns {
        if let Some(text) = &col.check_expr {
            check_holds(db, schema, text, values, &format!("{}_{}_check", schema.name, col.name))?;
        }
    }
    // Column-level foreign keys.
    for (i, col) in schema.columns.iter().enumerate() {
        if let Some(fk) = &col.fk {
            if fk.table.is_empty() || values[i].is_null() {
                continue;
            }
            if !foreign_row_exists(db, &fk.table, &fk.column, &values[i])? {
                return Err(DbError::constraint(
                    &format!("{}_{}_fkey", schema.name, col.name),
                    format!(
                        "value {} has no match in {}({})",
                        values[i], fk.table, fk.column
                    ),
                ));
            }
        }
    }
    // Table-level constraints added through ALTER ( multi-column forms ).
    for c in table_constraints(db, table_id)? {
        match c.kind {
            ConstraintKind::Check => {
                if let Some(text) = &c.check_expr {
                    check_holds(db, schema, text, values, &c.name)?;
                }
            }
            ConstraintKind::Unique | ConstraintKind::PrimaryKey if c.columns.len() > 1 => {
                validate_multi_unique(db, schema, &c, values, skip_rid)?;
            }
            ConstraintKind::ForeignKey if c.columns.len() > 1 => {
                // Multi-column FK tuples fall back to a scan of the
                // referenced table.
                validate_multi_fk(db, schema, &c, values)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_holds(
    db: &DB,
    schema: &TableSchema,
    text: &str,
    values: &[ColumnValue],
    name: &str,
) -> Result<()> {
    let expr = {
        let mut p = Parser::new(text, db.as_lookup())?;
        p.parse_expr(schema)?
    };
    let ok = eval::eval_bool(db, &expr, Some(values), schema)?;
    if !ok {
        return Err(DbError::constraint(
            name,
            format!("check expression '{text}' is false"),
        ));
    }
    Ok(())
}

/// Multi-column uniqueness goes through a scan; single columns use the
/// B-tree path above.
fn validate_multi_unique(
    db: &DB,
    schema: &TableSchema,
    c: &Constraint,
    values: &[ColumnValue],
    skip_rid: Option<crate::page::RowId>,
) -> Result<()> {
    let mut idx = Vec::new();
    for name in &c.columns {
        idx.push(schema.find_col(name).ok_or_else(|| {
            DbError::NotFound(format!("constraint column '{name}'"))
        })?);
    }
    let rows = db.scan_table(&schema.name)?;
    for row in &rows {
        if Some(row.id) == skip_rid {
            continue;
        }
        let mut all_eq = true;
        for &ci in &idx {
            let a = &row.values[ci];
            let b = &values[ci];
            if a.is_null() || b.is_null() || eval::compare_coerced(a, b)? != std::cmp::Ordering::Equal
            {
                all_eq = false;
                break;
            }
        }
        if all_eq {
            return Err(DbError::constraint(
                &c.name,
                format!("duplicate key tuple for ({})", c.columns.join(", ")),
            ));
        }
    }
    Ok(())
}

fn validate_multi_fk(
    db: &DB,
    schema: &TableSchema,
    c: &Constraint,
    values: &[ColumnValue],
) -> Result<()> {
    let ref_table = sys::table_name_by_id(db, c.ref_table_id)?;
    let ref_schema = db
        .as_lookup()
        .table_schema(&ref_table)
        .ok_or_else(|| DbError::NotFound(format!("table '{ref_table}'")))?;
    let mut local = Vec::new();
    for name in &c.columns {
        local.push(schema.find_col(name).ok_or_else(|| {
            DbError::NotFound(format!("constraint column '{name}'"))
        })?);
    }
    if local.iter().any(|&ci| values[ci].is_null()) {
        return Ok(());
    }
    let mut remote = Vec::new();
    for name in &c.ref_columns {
        remote.push(ref_schema.find_col(name).ok_or_else(|| {
            DbError::NotFound(format!("referenced column '{name}'"))
        })?);
    }
    let rows = db.scan_table(&ref_table)?;
    'rows: for row in &rows {
        for (&lci, &rci) in local.iter().zip(remote.iter()) {
            if eval::compare_coerced(&values[lci], &row.values[rci])? != std::cmp::Ordering::Equal {
                continue 'rows;
            }
        }
        return Ok(());
    }
    Err(DbError::constraint(
        &c.name,
        format!("no matching row in {ref_table}"),
    ))
}

/// Does the referenced table contain `value` in `column`? B-tree lookup
/// when the column is indexed, scan otherwise.
pub fn foreign_row_exists(db: &DB, table: &str, column: &str, value: &ColumnValue) -> Result<bool> {
    let schema = db
        .as_lookup()
        .table_schema(table)
        .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
    let ci = schema
        .find_col(column)
        .ok_or_else(|| DbError::NotFound(format!("column '{column}' in '{table}'")))?;
    if schema.columns[ci].indexed() {
        return Ok(!db.index_lookup(table, column, value)?.is_none());
    }
    let rows = db.scan_table(table)?;
    for row in &rows {
        if !row.values[ci].is_null()
            && eval::compare_coerced(&row.values[ci], value)? == std::cmp::Ordering::Equal
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Count referring rows in `table` whose `column` equals `value`.
fn referring_row_count(db: &DB, table: &str, column: &str, value: &ColumnValue) -> Result<usize> {
    let res = db.exec_internal(&format!(
        "SELECT COUNT(*) FROM {table} WHERE {column} = {};",
        sys::sql_literal(value)
    ))?;
    Ok(res.rows.first().map_or(0, |r| r[0].int().unwrap_or(0) as usize))
}

/// Resolve every referring foreign key before deleting a key tuple from
/// the referenced table. CASCADE issues a recursive DELETE, SET NULL a
/// recursive UPDATE, RESTRICT and NO ACTION abort if referring rows exist.
pub fn handle_on_delete(db: &DB, table_id: i64, schema: &TableSchema, row: &[ColumnValue]) -> Result<()> {
    for c in referring_constraints(db, table_id)? {
        let referring = sys::table_name_by_id(db, c.table_id)?;
        let (Some(col), Some(ref_col)) = (c.columns.first(), c.ref_columns.first()) else {
            continue;
        };
        let Some(rci) = schema.find_col(ref_col) else {
            continue;
        };
        let key = &row[rci];
        if key.is_null() {
            continue;
        }
        match c.on_delete {
            FkAction::Cascade => {
                db.exec_fk_action(&format!(
                    "DELETE FROM {referring} WHERE {col} = {};",
                    sys::sql_literal(key)
                ))?;
            }
            FkAction::SetNull => {
                db.exec_fk_action(&format!(
                    "UPDATE {referring} SET {col} = NULL WHERE {col} = {};",
                    sys::sql_literal(key)
                ))?;
            }
            FkAction::Restrict | FkAction::NoAction => {
                if referring_row_count(db, &referring, col, key)? > 0 {
                    return Err(DbError::constraint(
                        &c.name,
                        format!("rows in {referring} still reference {key}"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Resolve referring foreign keys for an UPDATE that rewrites referenced
/// key tuples.
pub fn handle_on_update(
    db: &DB,
    table_id: i64,
    schema: &TableSchema,
    before: &[ColumnValue],
    after: &[ColumnValue],
) -> Result<()> {
    for c in referring_constraints(db, table_id)? {
        let referring = sys::table_name_by_id(db, c.table_id)?;
        let (Some(col), Some(ref_col)) = (c.columns.first(), c.ref_columns.first()) else {
            continue;
        };
        let Some(rci) = schema.find_col(ref_col) else {
            continue;
        };
        let old_key = &before[rci];
        let new_key = &after[rci];
        if old_key.is_null()
            || eval::compare_coerced(old_key, new_key).unwrap_or(std::cmp::Ordering::Less)
                == std::cmp::Ordering::Equal
        {
            continue;
        }
        match c.on_update {
            FkAction::Cascade => {
                db.exec_fk_action(&format!(
                    "UPDATE {referring} SET {col} = {} WHERE {col} = {};",
                    sys::sql_literal(new_key),
                    sys::sql_literal(old_key)
                ))?;
            }
            FkAction::SetNull => {
                db.exec_fk_action(&format!(
                    "UPDATE {referring} SET {col} = NULL WHERE {col} = {};",
                    sys::sql_literal(old_key)
                ))?;
            }
            FkAction::Restrict | FkAction::NoAction => {
                if referring_row_count(db, &referring, col, old_key)? > 0 {
                    return Err(DbError::constraint(
                        &c.name,
                        format!("rows in {referring} still reference {old_key}"),
                    ));
                }
            }
        }
    }
    Ok(())
}
