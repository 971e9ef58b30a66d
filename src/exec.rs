//! Statement execution. Dispatches by command kind, mutates the buffer
//! pool and indexes, and rolls a failed statement back by draining an
//! in-memory undo list in reverse order.

use crate::constraint;
use crate::error::{DbError, Result};
use crate::eval;
use crate::expr::ExprNode;
use crate::page::{Row, RowId};
use crate::parse::{
    AlterCmd, AlterOp, Command, ConstraintKind, CreateCmd, DeleteCmd, InsertCmd, OrderBy,
    SelectCmd, UpdateCmd,
};
use crate::sys;
use crate::table::{sequence_name, TableSchema};
use crate::toast;
use crate::value::ColumnValue;
use crate::wal::{self, WalAction};
use crate::DB;
use std::rc::Rc;

/// Outcome of one statement: a code ( zero on success ), a human-readable
/// message, result rows, and one alias per projected column.
pub struct ExecutionResult {
    pub code: i32,
    pub message: String,
    pub rows: Vec<Vec<ColumnValue>>,
    pub aliases: Vec<String>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> ExecutionResult {
        ExecutionResult {
            code: 0,
            message: message.into(),
            rows: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn with_rows(
        message: impl Into<String>,
        rows: Vec<Vec<ColumnValue>>,
        aliases: Vec<String>,
    ) -> ExecutionResult {
        ExecutionResult {
            code: 0,
            message: message.into(),
            rows,
            aliases,
        }
    }
}

/// Dispatch a bound command.
pub fn execute(db: &DB, cmd: Command) -> Result<ExecutionResult> {
    match cmd {
        Command::Create(c) => execute_create_table(db, c),
        Command::Alter(a) => execute_alter_table(db, a),
        Command::Insert(i) => execute_insert(db, i),
        Command::Select(s) => execute_select(db, s),
        Command::Update(u) => execute_update(db, u),
        Command::Delete(d) => execute_delete(db, d),
    }
}

// ------ undo list ------

enum UndoOp {
    /// Remove an inserted row and its index entries.
    Insert {
        table: String,
        rid: RowId,
        keys: Vec<(String, ColumnValue)>,
    },
    /// Put a row's previous values back and restore index entries.
    Update {
        table: String,
        rid: RowId,
        before: Vec<ColumnValue>,
        old_keys: Vec<(String, ColumnValue)>,
        new_keys: Vec<(String, ColumnValue)>,
    },
    /// Resurrect a tombstoned row and its index entries.
    Delete {
        table: String,
        rid: RowId,
        keys: Vec<(String, ColumnValue)>,
    },
}

#[derive(Default)]
struct UndoList {
    ops: Vec<UndoOp>,
}

impl UndoList {
    /// Drain in reverse, replaying inverse mutations. Failures here are
    /// logged rather than propagated; the original error wins.
    fn rollback(&mut self, db: &DB) {
        while let Some(op) = self.ops.pop() {
            let res = match op {
                UndoOp::Insert { table, rid, keys } => (|| -> Result<()> {
                    for (col, key) in &keys {
                        let tree = db.tree(&table, col)?;
                        tree.delete(key)?;
                    }
                    db.pool(&table)?.delete_row(rid)
                })(),
                UndoOp::Update {
                    table,
                    rid,
                    before,
                    old_keys,
                    new_keys,
                } => (|| -> Result<()> {
                    let pool = db.pool(&table)?;
                    let restored = pool.update_row(rid, before)?;
                    for (col, key) in &new_keys {
                        let tree = db.tree(&table, col)?;
                        tree.delete(key)?;
                    }
                    for (col, key) in &old_keys {
                        let tree = db.tree(&table, col)?;
                        let _ = tree.insert(key.clone(), restored);
                    }
                    Ok(())
                })(),
                UndoOp::Delete { table, rid, keys } => (|| -> Result<()> {
                    db.pool(&table)?.undelete_row(rid)?;
                    for (col, key) in &keys {
                        let tree = db.tree(&table, col)?;
                        let _ = tree.insert(key.clone(), rid);
                    }
                    Ok(())
                })(),
            };
            if let Err(e) = res {
                log::warn!("rollback step failed: {e}");
            }
        }
    }
}

// ------ index maintenance ------

/// Insert a row's keys into every per-column B-tree. Returns the entries
/// written, for the undo list. Non-unique INDEX trees keep the first RowId
/// seen for a key.
fn index_insert(
    db: &DB,
    schema: &TableSchema,
    table: &str,
    values: &[ColumnValue],
    rid: RowId,
) -> Result<Vec<(String, ColumnValue)>> {
    let mut written = Vec::new();
    for (i, col) in schema.columns.iter().enumerate() {
        if !col.indexed() || values[i].is_null() || matches!(values[i], ColumnValue::Array(..)) {
            continue;
        }
        let tree = db.tree(table, &col.name)?;
        match tree.insert(values[i].clone(), rid) {
            Ok(()) => written.push((col.name.clone(), values[i].clone())),
            Err(DbError::DuplicateKey(_)) if !col.is_primary && !col.is_unique => {}
            Err(e) => {
                // Unwind the entries already written for this row.
                for (cname, key) in &written {
                    if let Ok(t) = db.tree(table, cname) {
                        let _ = t.delete(key);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(written)
}

/// Remove a row's keys from every per-column B-tree. Only entries that
/// still point at this row are dropped.
fn index_remove(
    db: &DB,
    schema: &TableSchema,
    table: &str,
    values: &[ColumnValue],
    rid: RowId,
) -> Result<Vec<(String, ColumnValue)>> {
    let mut removed = Vec::new();
    for (i, col) in schema.columns.iter().enumerate() {
        if !col.indexed() || values[i].is_null() || matches!(values[i], ColumnValue::Array(..)) {
            continue;
        }
        let tree = db.tree(table, &col.name)?;
        if tree.search(&values[i])? == rid && tree.delete(&values[i])? {
            removed.push((col.name.clone(), values[i].clone()));
        }
    }
    Ok(removed)
}

// ------ target row collection ------

/// Rows a statement applies to: a single B-tree probe when the predicate
/// is `pk = literal`, otherwise a full scan filtered by the predicate.
fn collect_targets(
    db: &DB,
    table: &str,
    schema: &TableSchema,
    where_clause: Option<&ExprNode>,
) -> Result<Vec<Row>> {
    if let Some(we) = where_clause {
        if let Some((ci, lit)) = we.as_eq_literal() {
            let col = &schema.columns[ci];
            if col.is_primary && schema.prim_count == 1 && !lit.is_null() {
                let rid = db.index_lookup(table, &col.name, lit)?;
                let mut out = Vec::new();
                if !rid.is_none() {
                    if let Some(row) = db.pool(table)?.fetch_row(rid)? {
                        out.push(row);
                    }
                }
                return Ok(out);
            }
        }
    }
    let rows = db.scan_table(table)?;
    match where_clause {
        None => Ok(rows),
        Some(we) => {
            let mut out = Vec::new();
            for row in rows {
                if eval::eval_bool(db, we, Some(&row.values), schema)? {
                    out.push(row);
                }
            }
            Ok(out)
        }
    }
}

// ------ CREATE TABLE ------

fn execute_create_table(db: &DB, cmd: CreateCmd) -> Result<ExecutionResult> {
    let name = cmd.schema.name.clone();
    if db.catalog(&name).is_some() {
        if cmd.if_not_exists {
            return Ok(ExecutionResult::ok(format!(
                "table '{name}' already exists, skipped"
            )));
        }
        return Err(DbError::DuplicateName(name));
    }
    if let Some(other) = db.slot_occupant(&name) {
        // Open addressing with no probing: colliding names are rejected.
        return Err(DbError::DuplicateName(format!(
            "'{name}' hashes to the catalog slot held by '{other}'"
        )));
    }
    // Referenced tables must exist before the FK is registered.
    for col in &cmd.schema.columns {
        if let Some(fk) = &col.fk {
            let ref_schema = db
                .catalog(&fk.table)
                .ok_or_else(|| DbError::NotFound(format!("referenced table '{}'", fk.table)))?;
            if ref_schema.schema.find_col(&fk.column).is_none() {
                return Err(DbError::NotFound(format!(
                    "referenced column '{}' in '{}'",
                    fk.column, fk.table
                )));
            }
        }
    }
    let dbname = db
        .root
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let table_id = sys::insert_table(db, &name, &dbname)?;
    let schema = Rc::new(cmd.schema);
    db.create_physical_table(schema.clone(), table_id)?;

    for (pos, col) in schema.columns.iter().enumerate() {
        sys::insert_attribute(db, table_id, col, pos, false)?;
        if let Some(text) = &col.default_expr {
            sys::insert_attrdef(db, table_id, &col.name, text)?;
        }
        if col.has_sequence {
            sys::create_default_sequence(db, &sequence_name(&name, &col.name), false)?;
        }
        if cmd.no_constraints {
            continue;
        }
        let one = vec![col.name.clone()];
        if col.is_primary {
            sys::insert_constraint(
                db,
                table_id,
                &format!("{name}_{}_pkey", col.name),
                ConstraintKind::PrimaryKey.code(),
                &one,
                None,
                -1,
                &[],
                crate::table::FkAction::NoAction,
                crate::table::FkAction::NoAction,
            )?;
        }
        if col.is_unique {
            sys::insert_constraint(
                db,
                table_id,
                &format!("{name}_{}_key", col.name),
                ConstraintKind::Unique.code(),
                &one,
                None,
                -1,
                &[],
                crate::table::FkAction::NoAction,
                crate::table::FkAction::NoAction,
            )?;
        }
        if let Some(text) = &col.check_expr {
            sys::insert_constraint(
                db,
                table_id,
                &format!("{name}_{}_check", col.name),
                ConstraintKind::Check.code(),
                &one,
                Some(text),
                -1,
                &[],
                crate::table::FkAction::NoAction,
                crate::table::FkAction::NoAction,
            )?;
        }
        if let Some(fk) = &col.fk {
            let ref_id = sys::find_table(db, &fk.table)?;
            sys::insert_constraint(
                db,
                table_id,
                &format!("{name}_{}_fkey", col.name),
                ConstraintKind::ForeignKey.code(),
                &one,
                None,
                ref_id,
                &[fk.column.clone()],
                fk.on_delete,
                fk.on_update,
            )?;
        }
    }
    log::info!("created table '{name}' with id {table_id}");
    Ok(ExecutionResult::ok(format!("CREATE TABLE {name}")))
}

// ------ INSERT ------

fn execute_insert(db: &DB, cmd: InsertCmd) -> Result<ExecutionResult> {
    let schema = cmd.schema.clone();
    let table = cmd.table.clone();
    let entry = db
        .catalog(&table)
        .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
    let ncols = schema.columns.len();
    let target_cols: Vec<usize> = match &cmd.columns {
        Some(list) => list.clone(),
        None => (0..ncols).collect(),
    };
    let mut undo = UndoList::default();
    let mut out_rows = Vec::new();
    let result = (|| -> Result<usize> {
        for exprs in &cmd.rows {
            let mut values = vec![ColumnValue::Null; ncols];
            for (expr, &ci) in exprs.iter().zip(target_cols.iter()) {
                values[ci] = eval::eval(db, expr, None, &schema)?;
            }
            // SERIAL columns assigned implicitly draw from their sequence.
            for (i, col) in schema.columns.iter().enumerate() {
                if col.has_sequence && values[i].is_null() && !target_cols.contains(&i) {
                    let next = sys::sequence_next_val(db, &sequence_name(&table, &col.name))?;
                    values[i] = ColumnValue::Int(next);
                }
            }
            // Defaults for columns left NULL.
            for (i, col) in schema.columns.iter().enumerate() {
                if values[i].is_null() && col.has_default && !target_cols.contains(&i) {
                    let expr = db.default_expr(entry.table_id, &schema, i)?;
                    values[i] = eval::eval(db, &expr, None, &schema)?;
                }
            }
            for (i, col) in schema.columns.iter().enumerate() {
                col.coerce(&mut values[i])?;
            }
            toast::toast_outgoing(db, &schema, &mut values)?;
            if !cmd.unsafe_con {
                constraint::validate_row(db, &schema, entry.table_id, &values, None)?;
            }
            let pool = db.pool(&table)?;
            let rid = pool.insert_row(values.clone())?;
            let row = Row::new(rid, values.clone(), &schema);
            db.wal_append(WalAction::Insert, entry.table_id, wal::insert_payload(&row))?;
            let keys = match index_insert(db, &schema, &table, &values, rid) {
                Ok(k) => k,
                Err(e) => {
                    pool.delete_row(rid)?;
                    return Err(e);
                }
            };
            undo.ops.push(UndoOp::Insert {
                table: table.clone(),
                rid,
                keys,
            });
            if !cmd.returning.is_empty() {
                let mut projected = Vec::new();
                for item in &cmd.returning {
                    projected.push(eval::eval(db, &item.expr, Some(&values), &schema)?);
                }
                out_rows.push(projected);
            }
        }
        Ok(cmd.rows.len())
    })();
    match result {
        Ok(n) => {
            let aliases = cmd.returning.iter().map(|i| i.alias.clone()).collect();
            Ok(ExecutionResult::with_rows(
                format!("INSERT {n}"),
                out_rows,
                aliases,
            ))
        }
        Err(e) => {
            undo.rollback(db);
            Err(e)
        }
    }
}

// ------ SELECT ------

fn execute_select(db: &DB, cmd: SelectCmd) -> Result<ExecutionResult> {
    let schema = cmd.schema.clone();
    let mut rows = collect_targets(db, &cmd.table, &schema, cmd.where_clause.as_ref())?;
    sort_rows(&mut rows, &cmd.order_by)?;

    let has_aggregate = cmd.items.iter().any(|i| i.expr.has_aggregate());
    if has_aggregate {
        let base: Vec<Vec<ColumnValue>> = rows.into_iter().map(|r| r.values).collect();
        let mut projected = Vec::new();
        for item in &cmd.items {
            projected.push(project_aggregate(db, &item.expr, &base, &schema)?);
        }
        let aliases: Vec<String> = cmd.items.iter().map(|i| i.alias.clone()).collect();
        return Ok(ExecutionResult::with_rows("SELECT 1", vec![projected], aliases));
    }

    let off = cmd.offset.unwrap_or(0) as usize;
    if off < rows.len() {
        rows.drain(..off);
    } else {
        rows.clear();
    }
    if let Some(lim) = cmd.limit {
        rows.truncate(lim as usize);
    }

    let mut out = Vec::with_capacity(rows.len());
    let aliases: Vec<String>;
    if cmd.select_all {
        aliases = schema.columns.iter().map(|c| c.name.clone()).collect();
        for row in rows {
            let mut vals = Vec::with_capacity(schema.columns.len());
            for v in row.values {
                vals.push(toast::detoast(db, v)?);
            }
            out.push(vals);
        }
    } else {
        aliases = cmd.items.iter().map(|i| i.alias.clone()).collect();
        for row in &rows {
            let mut vals = Vec::with_capacity(cmd.items.len());
            for item in &cmd.items {
                vals.push(eval::eval(db, &item.expr, Some(&row.values), &schema)?);
            }
            out.push(vals);
        }
    }
    let n = out.len();
    Ok(ExecutionResult::with_rows(format!("SELECT {n}"), out, aliases))
}

/// Evaluate a projection item in an aggregate query. Aggregate nodes
/// reduce over the whole set; plain expressions see the first row.
fn project_aggregate(
    db: &DB,
    expr: &ExprNode,
    rows: &[Vec<ColumnValue>],
    schema: &TableSchema,
) -> Result<ColumnValue> {
    match expr {
        ExprNode::Aggregate { agg, arg } => {
            eval::eval_aggregate(db, *agg, arg.as_deref(), rows, schema)
        }
        other => match rows.first() {
            Some(first) => eval::eval(db, other, Some(first), schema),
            None => Ok(ColumnValue::Null),
        },
    }
}

/// Multi-key sort honouring each key's asc/desc flag. Nulls order first.
fn sort_rows(rows: &mut [Row], keys: &[OrderBy]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let mut err = None;
    rows.sort_by(|a, b| {
        for k in keys {
            let ord = match eval::compare_coerced(&a.values[k.col], &b.values[k.col]) {
                Ok(o) => o,
                Err(e) => {
                    if err.is_none() {
                        err = Some(e);
                    }
                    std::cmp::Ordering::Equal
                }
            };
            let ord = if k.desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ------ UPDATE ------

fn execute_update(db: &DB, cmd: UpdateCmd) -> Result<ExecutionResult> {
    let schema = cmd.schema.clone();
    let table = cmd.table.clone();
    let entry = db
        .catalog(&table)
        .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
    let targets = collect_targets(db, &table, &schema, cmd.where_clause.as_ref())?;
    let mut undo = UndoList::default();
    let result = (|| -> Result<usize> {
        for row in &targets {
            let before = row.values.clone();
            let mut after = row.values.clone();
            for (ci, arr_idx, expr) in &cmd.sets {
                let new_val = eval::eval(db, expr, Some(&before), &schema)?;
                match arr_idx {
                    None => after[*ci] = new_val,
                    Some(idx_expr) => {
                        let idx = eval::eval(db, idx_expr, Some(&before), &schema)?.int()?;
                        match &mut after[*ci] {
                            ColumnValue::Array(elems, _) => {
                                let i = idx as usize;
                                if i >= elems.len() {
                                    return Err(DbError::Type(format!(
                                        "array index {idx} out of bounds for '{}'",
                                        schema.columns[*ci].name
                                    )));
                                }
                                elems[i] = new_val;
                            }
                            _ => {
                                return Err(DbError::Type(format!(
                                    "column '{}' is not an array",
                                    schema.columns[*ci].name
                                )))
                            }
                        }
                    }
                }
            }
            for (i, col) in schema.columns.iter().enumerate() {
                col.coerce(&mut after[i])?;
            }
            toast::toast_outgoing(db, &schema, &mut after)?;
            // Referenced-side FK actions come before the row mutation.
            constraint::handle_on_update(db, entry.table_id, &schema, &before, &after)?;
            constraint::validate_row(db, &schema, entry.table_id, &after, Some(row.id))?;

            let before_row = Row::new(row.id, before.clone(), &schema);
            let after_row = Row::new(row.id, after.clone(), &schema);
            db.wal_append(
                WalAction::Update,
                entry.table_id,
                wal::update_payload(&before_row, &after_row),
            )?;
            let old_keys = index_remove(db, &schema, &table, &before, row.id)?;
            let pool = db.pool(&table)?;
            let new_rid = pool.update_row(row.id, after.clone())?;
            let new_keys = match index_insert(db, &schema, &table, &after, new_rid) {
                Ok(k) => k,
                Err(e) => {
                    // Put the old image and entries back before failing.
                    let _ = pool.update_row(new_rid, before.clone());
                    for (cname, key) in &old_keys {
                        if let Ok(t) = db.tree(&table, cname) {
                            let _ = t.insert(key.clone(), row.id);
                        }
                    }
                    return Err(e);
                }
            };
            undo.ops.push(UndoOp::Update {
                table: table.clone(),
                rid: new_rid,
                before,
                old_keys,
                new_keys,
            });
        }
        Ok(targets.len())
    })();
    match result {
        Ok(n) => Ok(ExecutionResult::ok(format!("UPDATE {n}"))),
        Err(e) => {
            undo.rollback(db);
            Err(e)
        }
    }
}

// ------ DELETE ------

fn execute_delete(db: &DB, cmd: DeleteCmd) -> Result<ExecutionResult> {
    let schema = cmd.schema.clone();
    let table = cmd.table.clone();
    let entry = db
        .catalog(&table)
        .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
    let targets = collect_targets(db, &table, &schema, cmd.where_clause.as_ref())?;
    let mut undo = UndoList::default();
    let result = (|| -> Result<usize> {
        for row in &targets {
            // Referring tables first: cascade, set-null, or abort.
            constraint::handle_on_delete(db, entry.table_id, &schema, &row.values)?;
            let before_row = Row::new(row.id, row.values.clone(), &schema);
            db.wal_append(
                WalAction::Delete,
                entry.table_id,
                wal::delete_payload(&before_row),
            )?;
            let keys = index_remove(db, &schema, &table, &row.values, row.id)?;
            db.pool(&table)?.delete_row(row.id)?;
            undo.ops.push(UndoOp::Delete {
                table: table.clone(),
                rid: row.id,
                keys,
            });
        }
        Ok(targets.len())
    })();
    match result {
        Ok(n) => Ok(ExecutionResult::ok(format!("DELETE {n}"))),
        Err(e) => {
            undo.rollback(db);
            Err(e)
        }
    }
}

// ------ ALTER TABLE ------

fn execute_alter_table(db: &DB, cmd: AlterCmd) -> Result<ExecutionResult> {
    let table = cmd.table.clone();
    let entry = db
        .catalog(&table)
        .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
    let table_id = entry.table_id;
    match cmd.op {
        AlterOp::AddColumn(col) => {
            let mut schema = (*entry.schema).clone();
            if schema.find_col(&col.name).is_some() {
                return Err(DbError::DuplicateName(col.name));
            }
            let default_val = match &col.default_expr {
                Some(text) => {
                    let expr = db.parse_default(text)?;
                    let mut v = eval::eval(db, &expr, None, &schema)?;
                    col.coerce(&mut v)?;
                    v
                }
                None => ColumnValue::Null,
            };
            if col.not_null && default_val.is_null() {
                return Err(DbError::constraint(
                    &format!("{table}_{}_not_null", col.name),
                    "cannot add a NOT NULL column without a default",
                ));
            }
            let pos = schema.columns.len();
            sys::insert_attribute(db, table_id, &col, pos, false)?;
            if let Some(text) = &col.default_expr {
                sys::insert_attrdef(db, table_id, &col.name, text)?;
            }
            if col.has_sequence {
                sys::create_default_sequence(db, &sequence_name(&table, &col.name), false)?;
            }
            schema.columns.push(col);
            schema.refresh_counts();
            // Physical layout changed: copy every row through the new shape.
            db.replace_schema_and_rewrite(&table, Rc::new(schema), |mut vals| {
                vals.push(default_val.clone());
                vals
            })?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} ADD COLUMN")))
        }
        AlterOp::DropColumn(name) => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&name)
                .ok_or_else(|| DbError::NotFound(format!("column '{name}'")))?;
            if schema.columns[ci].is_primary {
                return Err(DbError::constraint(
                    &format!("{table}_{name}_pkey"),
                    "cannot drop a primary key column",
                ));
            }
            let dropped = schema.columns.remove(ci);
            schema.refresh_counts();
            db.exec_internal(&format!(
                "DELETE FROM jb_attribute WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&name)
            ))?;
            db.exec_internal(&format!(
                "DELETE FROM jb_attrdef WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&name)
            ))?;
            db.exec_internal(&format!(
                "DELETE FROM jb_constraints WHERE table_id = {table_id} AND columns = {};",
                sys::sql_quote(&sys::text_array(&[name.clone()]))
            ))?;
            if dropped.indexed() {
                db.drop_index_file(&table, &name)?;
            }
            db.replace_schema_and_rewrite(&table, Rc::new(schema), move |mut vals| {
                vals.remove(ci);
                vals
            })?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} DROP COLUMN")))
        }
        AlterOp::RenameColumn { from, to } => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&from)
                .ok_or_else(|| DbError::NotFound(format!("column '{from}'")))?;
            if schema.find_col(&to).is_some() {
                return Err(DbError::DuplicateName(to));
            }
            let was_indexed = schema.columns[ci].indexed();
            if was_indexed {
                db.rename_index_file(&table, &from, &to)?;
            }
            schema.columns[ci].name = to.clone();
            db.exec_internal(&format!(
                "UPDATE jb_attribute SET column_name = {} WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&to),
                sys::sql_quote(&from)
            ))?;
            db.exec_internal(&format!(
                "UPDATE jb_attrdef SET column_name = {} WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&to),
                sys::sql_quote(&from)
            ))?;
            db.exec_internal(&format!(
                "UPDATE jb_constraints SET columns = {} WHERE table_id = {table_id} AND columns = {};",
                sys::sql_quote(&sys::text_array(&[to.clone()])),
                sys::sql_quote(&sys::text_array(&[from.clone()]))
            ))?;
            db.replace_schema(&table, Rc::new(schema))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} RENAME COLUMN")))
        }
        AlterOp::SetDefault { column, expr_text } => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&column)
                .ok_or_else(|| DbError::NotFound(format!("column '{column}'")))?;
            db.exec_internal(&format!(
                "DELETE FROM jb_attrdef WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            sys::insert_attrdef(db, table_id, &column, &expr_text)?;
            db.exec_internal(&format!(
                "UPDATE jb_attribute SET has_default = true WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            schema.columns[ci].has_default = true;
            schema.columns[ci].default_expr = Some(expr_text);
            db.clear_default_cache(table_id);
            db.replace_schema(&table, Rc::new(schema))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} SET DEFAULT")))
        }
        AlterOp::DropDefault { column } => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&column)
                .ok_or_else(|| DbError::NotFound(format!("column '{column}'")))?;
            db.exec_internal(&format!(
                "DELETE FROM jb_attrdef WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            db.exec_internal(&format!(
                "UPDATE jb_attribute SET has_default = false WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            schema.columns[ci].has_default = false;
            schema.columns[ci].default_expr = None;
            db.clear_default_cache(table_id);
            db.replace_schema(&table, Rc::new(schema))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} DROP DEFAULT")))
        }
        AlterOp::SetNotNull { column } => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&column)
                .ok_or_else(|| DbError::NotFound(format!("column '{column}'")))?;
            for row in db.scan_table(&table)? {
                if row.values[ci].is_null() {
                    return Err(DbError::constraint(
                        &format!("{table}_{column}_not_null"),
                        "existing rows contain nulls",
                    ));
                }
            }
            db.exec_internal(&format!(
                "UPDATE jb_attribute SET is_nullable = false WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            schema.columns[ci].not_null = true;
            schema.refresh_counts();
            db.replace_schema(&table, Rc::new(schema))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} SET NOT NULL")))
        }
        AlterOp::DropNotNull { column } => {
            let mut schema = (*entry.schema).clone();
            let ci = schema
                .find_col(&column)
                .ok_or_else(|| DbError::NotFound(format!("column '{column}'")))?;
            if schema.columns[ci].is_primary {
                return Err(DbError::constraint(
                    &format!("{table}_{column}_pkey"),
                    "a primary key column cannot be nullable",
                ));
            }
            db.exec_internal(&format!(
                "UPDATE jb_attribute SET is_nullable = true WHERE table_id = {table_id} AND column_name = {};",
                sys::sql_quote(&column)
            ))?;
            schema.columns[ci].not_null = false;
            schema.refresh_counts();
            db.replace_schema(&table, Rc::new(schema))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} DROP NOT NULL")))
        }
        AlterOp::AddConstraint(c) => {
            if sys::find_constraint_by_name(db, table_id, &c.name)? >= 0 {
                return Err(DbError::DuplicateName(c.name));
            }
            let mut schema = (*entry.schema).clone();
            // Existing rows must already satisfy the new constraint.
            let probe = schema.clone();
            match c.kind {
                ConstraintKind::Check => {
                    if let Some(text) = &c.check_expr {
                        for row in db.scan_table(&table)? {
                            let expr = {
                                let mut p = crate::parse::Parser::new(text, db.as_lookup())?;
                                p.parse_expr(&probe)?
                            };
                            if !eval::eval_bool(db, &expr, Some(&row.values), &probe)? {
                                return Err(DbError::constraint(
                                    &c.name,
                                    "existing rows violate the check expression",
                                ));
                            }
                        }
                    }
                }
                ConstraintKind::Unique | ConstraintKind::PrimaryKey => {
                    let mut idx = Vec::new();
                    for n in &c.columns {
                        idx.push(probe.find_col(n).ok_or_else(|| {
                            DbError::NotFound(format!("column '{n}'"))
                        })?);
                    }
                    let rows = db.scan_table(&table)?;
                    for (i, a) in rows.iter().enumerate() {
                        for b in rows.iter().skip(i + 1) {
                            let dup = idx.iter().all(|&ci| {
                                !a.values[ci].is_null()
                                    && eval::compare_coerced(&a.values[ci], &b.values[ci])
                                        .map_or(false, |o| o == std::cmp::Ordering::Equal)
                            });
                            if dup {
                                return Err(DbError::constraint(
                                    &c.name,
                                    "existing rows contain duplicate key tuples",
                                ));
                            }
                        }
                    }
                }
                ConstraintKind::ForeignKey => {}
            }
            let ref_id = match &c.ref_table {
                Some(t) => sys::find_table(db, t)?,
                None => -1,
            };
            sys::insert_constraint(
                db,
                table_id,
                &c.name,
                c.kind.code(),
                &c.columns,
                c.check_expr.as_deref(),
                ref_id,
                &c.ref_columns,
                c.on_delete,
                c.on_update,
            )?;
            // Single-column forms gain their schema flag and index.
            if c.columns.len() == 1 {
                if let Some(ci) = schema.find_col(&c.columns[0]) {
                    match c.kind {
                        ConstraintKind::PrimaryKey => {
                            schema.columns[ci].is_primary = true;
                            schema.columns[ci].not_null = true;
                        }
                        ConstraintKind::Unique => schema.columns[ci].is_unique = true,
                        ConstraintKind::Check => {
                            schema.columns[ci].check_expr = c.check_expr.clone()
                        }
                        ConstraintKind::ForeignKey => {
                            if let (Some(rt), Some(rc)) = (&c.ref_table, c.ref_columns.first()) {
                                schema.columns[ci].fk = Some(crate::table::ForeignKey {
                                    table: rt.clone(),
                                    column: rc.clone(),
                                    on_delete: c.on_delete,
                                    on_update: c.on_update,
                                });
                            }
                        }
                    }
                    schema.refresh_counts();
                }
            }
            db.replace_schema(&table, Rc::new(schema))?;
            db.rebuild_indexes(&table)?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} ADD CONSTRAINT")))
        }
        AlterOp::DropConstraint(name) => {
            let cid = sys::find_constraint_by_name(db, table_id, &name)?;
            if cid < 0 {
                return Err(DbError::NotFound(format!("constraint '{name}'")));
            }
            let cons = constraint::table_constraints(db, table_id)?;
            db.exec_internal(&format!("DELETE FROM jb_constraints WHERE id = {cid};"))?;
            if let Some(c) = cons.iter().find(|c| c.name == name) {
                if c.columns.len() == 1 {
                    let mut schema = (*entry.schema).clone();
                    if let Some(ci) = schema.find_col(&c.columns[0]) {
                        match c.kind {
                            ConstraintKind::PrimaryKey => schema.columns[ci].is_primary = false,
                            ConstraintKind::Unique => schema.columns[ci].is_unique = false,
                            ConstraintKind::Check => schema.columns[ci].check_expr = None,
                            ConstraintKind::ForeignKey => schema.columns[ci].fk = None,
                        }
                        schema.refresh_counts();
                        db.replace_schema(&table, Rc::new(schema))?;
                    }
                }
            }
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} DROP CONSTRAINT")))
        }
        AlterOp::RenameConstraint { from, to } => {
            let cid = sys::find_constraint_by_name(db, table_id, &from)?;
            if cid < 0 {
                return Err(DbError::NotFound(format!("constraint '{from}'")));
            }
            db.exec_internal(&format!(
                "UPDATE jb_constraints SET name = {} WHERE id = {cid};",
                sys::sql_quote(&to)
            ))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} RENAME CONSTRAINT")))
        }
        AlterOp::RenameTable(new_name) => {
            db.rename_table(&table, &new_name)?;
            db.exec_internal(&format!(
                "UPDATE jb_tables SET name = {} WHERE id = {table_id};",
                sys::sql_quote(&new_name)
            ))?;
            Ok(ExecutionResult::ok(format!(
                "ALTER TABLE {table} RENAME TO {new_name}"
            )))
        }
        AlterOp::SetOwner(owner) => {
            db.exec_internal(&format!(
                "UPDATE jb_tables SET owner = {} WHERE id = {table_id};",
                sys::sql_quote(&owner)
            ))?;
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} OWNER")))
        }
        AlterOp::SetTablespace(space) => {
            // Tablespaces have no physical counterpart here; the request is
            // accepted for compatibility.
            log::debug!("SET TABLESPACE {space} on {table} is metadata-only");
            Ok(ExecutionResult::ok(format!("ALTER TABLE {table} SET TABLESPACE")))
        }
    }
}
