//! The Oversized-Attribute Storage Technique. Strings longer than
//! `TOAST_CHUNK_SIZE` are split into chunk rows of the bootstrap
//! `jb_toast` table through the normal storage path; the owning column
//! keeps a 32-bit toast id and reads reassemble transparently.

use crate::error::{DbError, Result};
use crate::sys;
use crate::table::TableSchema;
use crate::value::{ColumnValue, DataType};
use crate::DB;

/// Maximum bytes stored inline in a row before a string is TOASTed.
pub const TOAST_CHUNK_SIZE: usize = 2048;

/// Store a large string; returns the toast id.
pub fn toast_store(db: &DB, text: &str) -> Result<u32> {
    let id = sys::sequence_next_val(db, "jb_toast_id_seq")?;
    let bytes = text.as_bytes();
    let mut seq = 0;
    let mut off = 0;
    while off < bytes.len() {
        let mut end = (off + TOAST_CHUNK_SIZE).min(bytes.len());
        // Chunk on a char boundary so each piece stays valid UTF-8.
        while end < bytes.len() && !text.is_char_boundary(end) {
            end -= 1;
        }
        let chunk = &text[off..end];
        db.exec_internal(&format!(
            "INSERT _unsafecon INTO jb_toast (id, chunk_seq, data) VALUES ({id}, {seq}, {});",
            sys::sql_quote(chunk)
        ))?;
        seq += 1;
        off = end;
    }
    log::debug!("toasted {} bytes as id {id} in {seq} chunks", bytes.len());
    Ok(id as u32)
}

/// Reassemble a toasted string.
pub fn toast_fetch(db: &DB, id: u32) -> Result<String> {
    let res = db.exec_internal(&format!(
        "SELECT data FROM jb_toast WHERE id = {id} ORDER BY chunk_seq;"
    ))?;
    if res.rows.is_empty() {
        return Err(DbError::Corruption(format!(
            "toast object {id} has no chunks"
        )));
    }
    let mut out = String::new();
    for row in &res.rows {
        out.push_str(row[0].str()?);
    }
    Ok(out)
}

/// Delete the chunks behind a toast id ( owning row was deleted ).
pub fn toast_delete(db: &DB, id: u32) -> Result<()> {
    db.exec_internal(&format!("DELETE FROM jb_toast WHERE id = {id};"))?;
    Ok(())
}

/// Redirect oversized strings in a prospective row through TOAST. Only
/// textual, non-array columns participate.
pub fn toast_outgoing(db: &DB, schema: &TableSchema, values: &mut [ColumnValue]) -> Result<()> {
    if schema.name == "jb_toast" {
        return Ok(());
    }
    for (i, v) in values.iter_mut().enumerate() {
        let col = &schema.columns[i];
        if !col.is_array && col.typ.is_textual() && col.typ != DataType::Char {
            if let ColumnValue::Str(s) = v {
                if s.len() > TOAST_CHUNK_SIZE {
                    let id = toast_store(db, s)?;
                    *v = ColumnValue::Toast(id);
                }
            }
        }
    }
    Ok(())
}

/// Resolve a value read out of storage, fetching toasted payloads.
pub fn detoast(db: &DB, v: ColumnValue) -> Result<ColumnValue> {
    match v {
        ColumnValue::Toast(id) => Ok(ColumnValue::Str(toast_fetch(db, id)?)),
        other => Ok(other),
    }
}
