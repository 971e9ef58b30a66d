//! Self-hosted catalog. Four core meta-tables ( plus the constraint and
//! TOAST tables ) describe every user table; their own schemas are
//! hardcoded here and written out with `_unsafecon` inserts on first open,
//! so the catalog can describe itself before it exists.
//!
//! The physical side of a schema lives in the `tables/schema` file; the
//! logical side ( nullability, defaults, constraints ) lives in the
//! meta-tables and is loaded through the engine's own SQL path.

use crate::error::{DbError, Result};
use crate::table::{CatalogEntry, ColumnDef, FkAction, ForeignKey, TableSchema};
use crate::util::{self, MAX_TABLES};
use crate::value::{ColumnValue, DataType};
use crate::{Database, DB};
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

/// "JUGA".
pub const SCHEMA_MAGIC: u32 = 0x4A55_4741;

/// Header: magic u32, table_count u32, then 256 offset slots.
const OFFSET_TABLE: u64 = 8;
const RECORD_REGION: u64 = OFFSET_TABLE + (MAX_TABLES as u64) * 4;

/// The `tables/schema` file: a magic header, a fixed 256-slot offset table
/// indexed by the table-name hash, and packed schema records.
pub struct SchemaFile {
    file: RefCell<File>,
    pub table_count: Cell<u32>,
    offsets: RefCell<Vec<u32>>,
}

impl SchemaFile {
    pub fn open(path: &Path) -> Result<SchemaFile> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if is_new {
            let mut hdr = Vec::with_capacity(RECORD_REGION as usize);
            hdr.extend_from_slice(&SCHEMA_MAGIC.to_le_bytes());
            hdr.extend_from_slice(&0u32.to_le_bytes());
            hdr.resize(RECORD_REGION as usize, 0);
            file.write_all(&hdr)?;
            return Ok(SchemaFile {
                file: RefCell::new(file),
                table_count: Cell::new(0),
                offsets: RefCell::new(vec![0; MAX_TABLES]),
            });
        }
        let mut hdr = vec![0u8; RECORD_REGION as usize];
        file.read_exact(&mut hdr)?;
        if util::getu32(&hdr, 0) != SCHEMA_MAGIC {
            return Err(DbError::Corruption(format!(
                "bad magic in schema file {}",
                path.display()
            )));
        }
        let table_count = util::getu32(&hdr, 4);
        let mut offsets = vec![0u32; MAX_TABLES];
        for (i, o) in offsets.iter_mut().enumerate() {
            *o = util::getu32(&hdr, 8 + i * 4);
        }
        Ok(SchemaFile {
            file: RefCell::new(file),
            table_count: Cell::new(table_count),
            offsets: RefCell::new(offsets),
        })
    }

    pub fn offset(&self, slot: usize) -> u32 {
        self.offsets.borrow()[slot]
    }

    /// Append a schema record and point the slot at it. Rewrites after
    /// ALTER go through here too; the superseded record becomes dead space.
    pub fn write_schema(&self, slot: usize, schema: &TableSchema) -> Result<u32> {
        let rec = encode_schema_record(schema);
        let mut file = self.file.borrow_mut();
        let off = file.seek(SeekFrom::End(0))?.max(RECORD_REGION) as u32;
        file.seek(SeekFrom::Start(off as u64))?;
        file.write_all(&rec)?;
        let fresh = self.offsets.borrow()[slot] == 0;
        self.offsets.borrow_mut()[slot] = off;
        file.seek(SeekFrom::Start(OFFSET_TABLE + slot as u64 * 4))?;
        file.write_all(&off.to_le_bytes())?;
        if fresh {
            self.table_count.set(self.table_count.get() + 1);
            file.seek(SeekFrom::Start(4))?;
            file.write_all(&self.table_count.get().to_le_bytes())?;
        }
        file.flush()?;
        Ok(off)
    }

    /// Zero out a slot after a table rename moved its record.
    pub fn clear_slot(&self, slot: usize) -> Result<()> {
        let was = self.offsets.borrow()[slot];
        self.offsets.borrow_mut()[slot] = 0;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(OFFSET_TABLE + slot as u64 * 4))?;
        file.write_all(&0u32.to_le_bytes())?;
        if was != 0 {
            self.table_count.set(self.table_count.get().saturating_sub(1));
            file.seek(SeekFrom::Start(4))?;
            file.write_all(&self.table_count.get().to_le_bytes())?;
        }
        file.flush()?;
        Ok(())
    }

    /// Read the physical schema record at `offset`. Logical attributes
    /// ( nullability, defaults, named constraints ) are not here; they are
    /// loaded from the meta-tables afterwards.
    pub fn read_schema(&self, offset: u32) -> Result<TableSchema> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > 1 << 20 {
            return Err(DbError::Corruption(format!(
                "schema record at {offset} is implausibly large"
            )));
        }
        let mut rec = vec![0u8; len];
        file.read_exact(&mut rec)?;
        decode_schema_record(&rec)
    }
}

fn encode_schema_record(schema: &TableSchema) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(schema.name.len() as u8);
    body.extend_from_slice(schema.name.as_bytes());
    body.push(schema.columns.len() as u8);
    for c in &schema.columns {
        body.push(c.name.len() as u8);
        body.extend_from_slice(c.name.as_bytes());
        body.push(c.typ as u8);
        body.push(c.varchar_len);
        body.push(c.dec_precision);
        body.push(c.dec_scale);
        let mut flags = 0u8;
        if c.is_array {
            flags |= 1;
        }
        if c.is_index {
            flags |= 2;
        }
        if c.fk.is_some() {
            flags |= 4;
        }
        if c.has_sequence {
            flags |= 8;
        }
        if c.is_primary {
            flags |= 16;
        }
        if c.is_unique {
            flags |= 32;
        }
        body.push(flags);
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn take<'a>(rec: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *off + n > rec.len() {
        return Err(DbError::Corruption("truncated schema record".into()));
    }
    let s = &rec[*off..*off + n];
    *off += n;
    Ok(s)
}

fn decode_schema_record(rec: &[u8]) -> Result<TableSchema> {
    let mut off = 0usize;
    let name_len = take(rec, &mut off, 1)?[0] as usize;
    let name = String::from_utf8(take(rec, &mut off, name_len)?.to_vec())
        .map_err(|_| DbError::Corruption("non-utf8 table name".into()))?;
    let col_count = take(rec, &mut off, 1)?[0] as usize;
    let mut columns = Vec::with_capacity(col_count);
    for _ in 0..col_count {
        let n = take(rec, &mut off, 1)?[0] as usize;
        let cname = String::from_utf8(take(rec, &mut off, n)?.to_vec())
            .map_err(|_| DbError::Corruption("non-utf8 column name".into()))?;
        let meta = take(rec, &mut off, 5)?;
        let mut col = ColumnDef::new(&cname, DataType::from_code(meta[0])?);
        col.varchar_len = meta[1];
        col.dec_precision = meta[2];
        col.dec_scale = meta[3];
        let flags = meta[4];
        col.is_array = flags & 1 != 0;
        col.is_index = flags & 2 != 0;
        if flags & 4 != 0 {
            // Placeholder; the real reference is filled from jb_constraints.
            col.fk = Some(ForeignKey {
                table: String::new(),
                column: String::new(),
                on_delete: FkAction::NoAction,
                on_update: FkAction::NoAction,
            });
        }
        col.has_sequence = flags & 8 != 0;
        col.is_primary = flags & 16 != 0;
        col.is_unique = flags & 32 != 0;
        if col.is_primary {
            col.not_null = true;
        }
        columns.push(col);
    }
    Ok(TableSchema::new(&name, columns))
}

// ------ meta-table schemas ( hardcoded, as the bootstrap requires ) ------

pub const META_TABLES: [&str; 6] = [
    "jb_tables",
    "jb_sequences",
    "jb_attribute",
    "jb_attrdef",
    "jb_constraints",
    "jb_toast",
];

pub fn is_meta_table(name: &str) -> bool {
    META_TABLES.iter().any(|t| *t == name)
}

fn col(name: &str, typ: DataType) -> ColumnDef {
    ColumnDef::new(name, typ)
}

fn col_nn(name: &str, typ: DataType) -> ColumnDef {
    let mut c = ColumnDef::new(name, typ);
    c.not_null = true;
    c
}

fn serial_pk(name: &str) -> ColumnDef {
    let mut c = ColumnDef::new(name, DataType::Serial);
    c.is_primary = true;
    c.not_null = true;
    c
}

pub fn jb_tables_schema() -> TableSchema {
    let mut owner = col("owner", DataType::Text);
    owner.has_default = true;
    owner.default_expr = Some("'sudo'".to_string());
    TableSchema::new(
        "jb_tables",
        vec![
            serial_pk("id"),
            col_nn("name", DataType::Text),
            col("database_name", DataType::Text),
            owner,
            col("created_at", DataType::Timestamp),
        ],
    )
}

pub fn jb_sequences_schema() -> TableSchema {
    TableSchema::new(
        "jb_sequences",
        vec![
            serial_pk("id"),
            col("name", DataType::Text),
            col("current_value", DataType::Int),
            col("increment_by", DataType::Int),
            col("min_value", DataType::Int),
            col("max_value", DataType::Int),
            col("cycle", DataType::Bool),
        ],
    )
}

pub fn jb_attribute_schema() -> TableSchema {
    TableSchema::new(
        "jb_attribute",
        vec![
            serial_pk("id"),
            col("table_id", DataType::Int),
            col("column_name", DataType::Text),
            col("data_type", DataType::Int),
            col("ordinal_position", DataType::Int),
            col("is_nullable", DataType::Bool),
            col("has_default", DataType::Bool),
            col("has_constraints", DataType::Bool),
            col("created_at", DataType::Timestamp),
        ],
    )
}

pub fn jb_attrdef_schema() -> TableSchema {
    TableSchema::new(
        "jb_attrdef",
        vec![
            serial_pk("id"),
            col_nn("table_id", DataType::Int),
            col_nn("column_name", DataType::Text),
            col_nn("default_expr", DataType::Text),
            col("created_at", DataType::Timestamp),
        ],
    )
}

pub fn jb_constraints_schema() -> TableSchema {
    TableSchema::new(
        "jb_constraints",
        vec![
            serial_pk("id"),
            col("table_id", DataType::Int),
            col("name", DataType::Text),
            col("constraint_type", DataType::Int),
            col("columns", DataType::Text),
            col("check_expr", DataType::Text),
            col("ref_table_id", DataType::Int),
            col("ref_columns", DataType::Text),
            col("on_delete", DataType::Int),
            col("on_update", DataType::Int),
        ],
    )
}

pub fn jb_toast_schema() -> TableSchema {
    TableSchema::new(
        "jb_toast",
        vec![
            col("id", DataType::Int),
            col("chunk_seq", DataType::Int),
            col("data", DataType::Text),
        ],
    )
}

fn meta_schema(name: &str) -> TableSchema {
    match name {
        "jb_tables" => jb_tables_schema(),
        "jb_sequences" => jb_sequences_schema(),
        "jb_attribute" => jb_attribute_schema(),
        "jb_attrdef" => jb_attrdef_schema(),
        "jb_constraints" => jb_constraints_schema(),
        "jb_toast" => jb_toast_schema(),
        _ => unreachable!("not a meta table: {name}"),
    }
}

// ------ SQL text helpers ------

/// Quote a string for embedding in an internal statement.
pub fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a value as a SQL literal for internal statements.
pub fn sql_literal(v: &ColumnValue) -> String {
    match v {
        ColumnValue::Null => "NULL".to_string(),
        ColumnValue::Int(_)
        | ColumnValue::Uint(_)
        | ColumnValue::Float(_)
        | ColumnValue::Double(_)
        | ColumnValue::Bool(_)
        | ColumnValue::Decimal(_) => v.to_string(),
        other => sql_quote(&other.to_string()),
    }
}

/// Render column name tuples the way jb_constraints stores them.
pub fn text_array(names: &[String]) -> String {
    format!("{{{}}}", names.join(","))
}

/// Parse a stored `{a,b,c}` tuple.
pub fn parse_text_array(s: &str) -> Vec<String> {
    let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
    if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|p| p.trim().to_string()).collect()
    }
}

// ------ catalog operations, issued through the self-hosted SQL path ------

/// Table id of a named table, or -1.
pub fn find_table(db: &DB, name: &str) -> Result<i64> {
    let res = db.exec_internal(&format!(
        "SELECT id FROM jb_tables WHERE name = {};",
        sql_quote(name)
    ))?;
    match res.rows.first() {
        Some(row) => row[0].int(),
        None => Ok(-1),
    }
}

/// Register a table; returns its id.
pub fn insert_table(db: &DB, name: &str, database_name: &str) -> Result<i64> {
    let res = db.exec_internal(&format!(
        "INSERT INTO jb_tables (name, database_name, owner, created_at) \
         VALUES ({}, {}, 'sudo', NOW()) RETURNING id;",
        sql_quote(name),
        sql_quote(database_name)
    ))?;
    res.rows
        .first()
        .ok_or_else(|| DbError::NotFound(format!("failed to register table '{name}'")))?[0]
        .int()
}

pub fn insert_attribute(
    db: &DB,
    table_id: i64,
    column: &ColumnDef,
    ordinal: usize,
    unsafe_con: bool,
) -> Result<()> {
    let prefix = if unsafe_con { "INSERT _unsafecon" } else { "INSERT" };
    db.exec_internal(&format!(
        "{prefix} INTO jb_attribute (table_id, column_name, data_type, ordinal_position, \
         is_nullable, has_default, has_constraints, created_at) \
         VALUES ({table_id}, {}, {}, {ordinal}, {}, {}, {}, NOW());",
        sql_quote(&column.name),
        column.typ as u8,
        !column.not_null,
        column.has_default,
        column.is_primary || column.is_unique || column.fk.is_some() || column.check_expr.is_some(),
    ))?;
    Ok(())
}

pub fn insert_attrdef(
    db: &DB,
    table_id: i64,
    column_name: &str,
    default_expr: &str,
) -> Result<()> {
    db.exec_internal(&format!(
        "INSERT INTO jb_attrdef (table_id, column_name, default_expr, created_at) \
         VALUES ({table_id}, {}, {}, NOW());",
        sql_quote(column_name),
        sql_quote(default_expr)
    ))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_constraint(
    db: &DB,
    table_id: i64,
    name: &str,
    kind: i64,
    columns: &[String],
    check_expr: Option<&str>,
    ref_table_id: i64,
    ref_columns: &[String],
    on_delete: FkAction,
    on_update: FkAction,
) -> Result<i64> {
    let res = db.exec_internal(&format!(
        "INSERT INTO jb_constraints (table_id, name, constraint_type, columns, check_expr, \
         ref_table_id, ref_columns, on_delete, on_update) \
         VALUES ({table_id}, {}, {kind}, {}, {}, {ref_table_id}, {}, {}, {}) RETURNING id;",
        sql_quote(name),
        sql_quote(&text_array(columns)),
        match check_expr {
            Some(e) => sql_quote(e),
            None => "NULL".to_string(),
        },
        sql_quote(&text_array(ref_columns)),
        on_delete.code(),
        on_update.code(),
    ))?;
    res.rows
        .first()
        .ok_or_else(|| DbError::NotFound(format!("failed to register constraint '{name}'")))?[0]
        .int()
}

pub fn find_constraint_by_name(db: &DB, table_id: i64, name: &str) -> Result<i64> {
    let res = db.exec_internal(&format!(
        "SELECT id FROM jb_constraints WHERE table_id = {table_id} AND name = {};",
        sql_quote(name)
    ))?;
    match res.rows.first() {
        Some(row) => row[0].int(),
        None => Ok(-1),
    }
}

// ------ sequences ------

/// Advance a sequence and return its new value. Issued as two self-hosted
/// statements, the way a client would write it.
pub fn sequence_next_val(db: &DB, name: &str) -> Result<i64> {
    let upd = db.exec_internal(&format!(
        "UPDATE jb_sequences SET current_value = current_value + increment_by \
         WHERE name = {};",
        sql_quote(name)
    ))?;
    if upd.code != 0 {
        return Err(DbError::NotFound(format!("sequence '{name}'")));
    }
    let res = db.exec_internal(&format!(
        "SELECT current_value FROM jb_sequences WHERE name = {};",
        sql_quote(name)
    ))?;
    res.rows
        .first()
        .ok_or_else(|| DbError::NotFound(format!("sequence '{name}'")))?[0]
        .int()
}

/// Create a sequence with the default parameters; returns its id.
pub fn create_default_sequence(db: &DB, name: &str, unsafe_con: bool) -> Result<i64> {
    let prefix = if unsafe_con { "INSERT _unsafecon" } else { "INSERT" };
    let res = db.exec_internal(&format!(
        "{prefix} INTO jb_sequences (name, current_value, increment_by, min_value, max_value, cycle) \
         VALUES ({}, 0, 1, 0, NULL, false) RETURNING id;",
        sql_quote(name)
    ))?;
    res.rows
        .first()
        .ok_or_else(|| DbError::NotFound(format!("failed to create sequence '{name}'")))?[0]
        .int()
}

pub fn find_sequence(db: &DB, name: &str) -> Result<i64> {
    let res = db.exec_internal(&format!(
        "SELECT id FROM jb_sequences WHERE name = {};",
        sql_quote(name)
    ))?;
    match res.rows.first() {
        Some(row) => row[0].int(),
        None => Ok(-1),
    }
}

// ------ bootstrap ------

/// Create the meta-tables in a fresh database directory and make the
/// catalog describe itself.
pub fn bootstrap_core_tables(db: &DB) -> Result<()> {
    log::info!("bootstrapping catalog in {}", db.root.display());
    // Physical creation first, so the SQL path below has tables to write to.
    for (i, name) in META_TABLES.iter().enumerate() {
        let schema = Rc::new(meta_schema(name));
        let table_id = (i + 1) as i64;
        db.create_physical_table(schema, table_id)?;
    }
    let dbname = db
        .root
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    // Self-description: one jb_tables row per meta table.
    for (i, name) in META_TABLES.iter().enumerate() {
        db.exec_internal(&format!(
            "INSERT _unsafecon INTO jb_tables (id, name, database_name, owner, created_at) \
             VALUES ({}, {}, {}, 'sudo', NOW());",
            i + 1,
            sql_quote(name),
            sql_quote(&dbname)
        ))?;
    }

    // One jb_attribute row per meta column.
    let mut attr_id = 0i64;
    for (i, name) in META_TABLES.iter().enumerate() {
        let schema = meta_schema(name);
        for (pos, c) in schema.columns.iter().enumerate() {
            attr_id += 1;
            db.exec_internal(&format!(
                "INSERT _unsafecon INTO jb_attribute (id, table_id, column_name, data_type, \
                 ordinal_position, is_nullable, has_default, has_constraints, created_at) \
                 VALUES ({attr_id}, {}, {}, {}, {pos}, {}, {}, {}, NOW());",
                i + 1,
                sql_quote(&c.name),
                c.typ as u8,
                !c.not_null,
                c.has_default,
                c.is_primary,
            ))?;
        }
    }

    // Default expressions.
    db.exec_internal(&format!(
        "INSERT _unsafecon INTO jb_attrdef (id, table_id, column_name, default_expr, created_at) \
         VALUES (1, 1, 'owner', {}, NOW());",
        sql_quote("'sudo'")
    ))?;

    // Backing sequences. Serial ids handed out explicitly above, so each
    // sequence starts past what the bootstrap consumed.
    let seqs: Vec<(String, i64)> = vec![
        ("jb_tables_id_seq".to_string(), META_TABLES.len() as i64),
        ("jb_sequences_id_seq".to_string(), 0),
        ("jb_attribute_id_seq".to_string(), attr_id),
        ("jb_attrdef_id_seq".to_string(), 1),
        ("jb_constraints_id_seq".to_string(), 0),
        ("jb_toast_id_seq".to_string(), 0),
    ];
    let seq_count = seqs.len() as i64;
    for (i, (name, current)) in seqs.iter().enumerate() {
        let current = if name == "jb_sequences_id_seq" {
            seq_count
        } else {
            *current
        };
        db.exec_internal(&format!(
            "INSERT _unsafecon INTO jb_sequences (id, name, current_value, increment_by, \
             min_value, max_value, cycle) VALUES ({}, {}, {current}, 1, 0, NULL, false);",
            i + 1,
            sql_quote(name)
        ))?;
    }
    log::info!("catalog bootstrap complete: {} meta tables", META_TABLES.len());
    Ok(())
}

/// Install the hardcoded meta schemas on reopen of an existing database.
pub fn load_core_tables(db: &Database) -> Result<()> {
    for (i, name) in META_TABLES.iter().enumerate() {
        let slot = util::fnv1a(name, MAX_TABLES as u32) as usize;
        let offset = db.schema_file.offset(slot);
        if offset == 0 {
            return Err(DbError::Corruption(format!(
                "meta table '{name}' is missing from the schema file"
            )));
        }
        db.install_entry(CatalogEntry {
            name: name.to_string(),
            table_id: (i + 1) as i64,
            offset,
            schema: Rc::new(meta_schema(name)),
        })?;
    }
    Ok(())
}

/// Load every user table recorded in the schema file, enriching the
/// physical record with the logical attributes from the meta-tables.
pub fn load_user_tables(db: &DB) -> Result<()> {
    let mut slots = Vec::new();
    for slot in 0..MAX_TABLES {
        let off = db.schema_file.offset(slot);
        if off != 0 {
            slots.push((slot, off));
        }
    }
    for (_slot, off) in slots {
        let schema = db.schema_file.read_schema(off)?;
        if is_meta_table(&schema.name) {
            continue;
        }
        load_schema_for_table(db, schema, off)?;
    }
    Ok(())
}

fn load_schema_for_table(db: &DB, mut schema: TableSchema, offset: u32) -> Result<()> {
    let table_id = find_table(db, &schema.name)?;
    if table_id < 0 {
        log::warn!(
            "table '{}' is in the schema file but not in jb_tables, skipping",
            schema.name
        );
        return Ok(());
    }
    // Nullability and default flags.
    let attrs = db.exec_internal(&format!(
        "SELECT column_name, is_nullable, has_default FROM jb_attribute \
         WHERE table_id = {table_id};"
    ))?;
    for row in &attrs.rows {
        let cname = row[0].str()?.to_string();
        if let Some(ci) = schema.find_col(&cname) {
            let nullable = matches!(row[1], ColumnValue::Bool(true));
            if !nullable {
                schema.columns[ci].not_null = true;
            }
            if matches!(row[2], ColumnValue::Bool(true)) {
                schema.columns[ci].has_default = true;
            }
        }
    }
    // Default expression text.
    let defs = db.exec_internal(&format!(
        "SELECT column_name, default_expr FROM jb_attrdef WHERE table_id = {table_id};"
    ))?;
    for row in &defs.rows {
        let cname = row[0].str()?.to_string();
        if let Some(ci) = schema.find_col(&cname) {
            schema.columns[ci].has_default = true;
            schema.columns[ci].default_expr = Some(row[1].str()?.to_string());
        }
    }
    // Constraints: fill FK references and CHECK texts back into the schema.
    let cons = db.exec_internal(&format!(
        "SELECT name, constraint_type, columns, check_expr, ref_table_id, ref_columns, \
         on_delete, on_update FROM jb_constraints WHERE table_id = {table_id};"
    ))?;
    for row in &cons.rows {
        let kind = row[1].int()?;
        let cols = parse_text_array(row[2].str().unwrap_or(""));
        match kind {
            3 => {
                // Foreign key: resolve the referenced table name.
                let ref_id = row[4].int()?;
                let ref_cols = parse_text_array(row[5].str().unwrap_or(""));
                let ref_name = table_name_by_id(db, ref_id)?;
                if let (Some(colname), Some(ref_col)) = (cols.first(), ref_cols.first()) {
                    if let Some(ci) = schema.find_col(colname) {
                        schema.columns[ci].fk = Some(ForeignKey {
                            table: ref_name.clone(),
                            column: ref_col.clone(),
                            on_delete: FkAction::from_code(row[6].int()?),
                            on_update: FkAction::from_code(row[7].int()?),
                        });
                    }
                }
            }
            4 => {
                if let (Some(colname), Ok(expr)) = (cols.first(), row[3].str()) {
                    if let Some(ci) = schema.find_col(colname) {
                        schema.columns[ci].check_expr = Some(expr.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    schema.refresh_counts();
    db.install_entry(CatalogEntry {
        name: schema.name.clone(),
        table_id,
        offset,
        schema: Rc::new(schema),
    })?;
    Ok(())
}

/// Table name for an id ( referenced tables in FK constraints ).
pub fn table_name_by_id(db: &DB, table_id: i64) -> Result<String> {
    let res = db.exec_internal(&format!(
        "SELECT name FROM jb_tables WHERE id = {table_id};"
    ))?;
    match res.rows.first() {
        Some(row) => Ok(row[0].str()?.to_string()),
        None => Err(DbError::NotFound(format!("table id {table_id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_array_roundtrip() {
        assert_eq!(parse_text_array("{a,b,c}"), vec!["a", "b", "c"]);
        assert_eq!(parse_text_array("{}").len(), 0);
        assert_eq!(text_array(&["x".into(), "y".into()]), "{x,y}");
    }

    #[test]
    fn sql_quote_escapes() {
        assert_eq!(sql_quote("o'clock"), "'o''clock'");
    }

    #[test]
    fn schema_record_roundtrip() {
        let mut v = ColumnDef::new("v", DataType::VarChar);
        v.varchar_len = 20;
        v.is_index = true;
        let mut arr = ColumnDef::new("tags", DataType::Text);
        arr.is_array = true;
        let s = TableSchema::new("t", vec![serial_pk("id"), v, arr]);
        let rec = encode_schema_record(&s);
        let back = decode_schema_record(&rec[4..]).unwrap();
        assert_eq!(back.name, "t");
        assert_eq!(back.columns.len(), 3);
        assert!(back.columns[0].is_primary && back.columns[0].has_sequence);
        assert_eq!(back.columns[1].varchar_len, 20);
        assert!(back.columns[1].is_index);
        assert!(back.columns[2].is_array);
    }

    #[test]
    fn schema_file_offsets_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema");
        let slot = util::fnv1a("t", MAX_TABLES as u32) as usize;
        {
            let sf = SchemaFile::open(&path).unwrap();
            let s = TableSchema::new("t", vec![col("id", DataType::Int)]);
            sf.write_schema(slot, &s).unwrap();
            assert_eq!(sf.table_count.get(), 1);
        }
        let sf = SchemaFile::open(&path).unwrap();
        assert_eq!(sf.table_count.get(), 1);
        let off = sf.offset(slot);
        assert!(off >= RECORD_REGION as u32);
        let s = sf.read_schema(off).unwrap();
        assert_eq!(s.name, "t");
    }
}
