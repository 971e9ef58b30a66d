//! Append-only write-ahead log. Every data-changing statement appends a
//! record carrying redo/undo images before the statement is reported
//! successful; pages themselves are flushed later, at checkpoint. On open,
//! records above the checkpointed LSN are replayed. Replay is idempotent:
//! applying the log twice converges to the same state.

use crate::error::{DbError, Result};
use crate::page::{Row, RowId};
use crate::table::TableSchema;
use crate::util;
use crate::value::ColumnValue;
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Mutation kind recorded in a WAL record.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WalAction {
    Insert,
    Update,
    Delete,
}

impl WalAction {
    fn code(self) -> u8 {
        match self {
            WalAction::Insert => 0,
            WalAction::Update => 1,
            WalAction::Delete => 2,
        }
    }

    fn from_code(c: u8) -> Result<WalAction> {
        Ok(match c {
            0 => WalAction::Insert,
            1 => WalAction::Update,
            2 => WalAction::Delete,
            _ => return Err(DbError::Corruption(format!("unknown WAL action {c}"))),
        })
    }
}

/// One log record. The payload holds the row id plus an after-image
/// ( INSERT ), before- and after-images ( UPDATE ) or a before-image
/// ( DELETE ).
#[derive(Debug)]
pub struct WalRecord {
    pub lsn: u64,
    pub txid: u64,
    pub timestamp: i64,
    pub action: WalAction,
    pub table_id: i64,
    pub payload: Vec<u8>,
}

/// File header: 8-byte checkpointed LSN, 8-byte next LSN.
const WAL_HDR: usize = 16;

pub struct Wal {
    file: RefCell<File>,
    pub next_lsn: Cell<u64>,
    pub checkpoint_lsn: Cell<u64>,
}

impl Wal {
    pub fn open(path: &Path) -> Result<Wal> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let (checkpoint, next) = if is_new {
            file.write_all(&[0u8; WAL_HDR])?;
            (0, 1)
        } else {
            let mut hdr = [0u8; WAL_HDR];
            file.read_exact(&mut hdr)?;
            (util::getu64(&hdr, 0), util::getu64(&hdr, 8).max(1))
        };
        Ok(Wal {
            file: RefCell::new(file),
            next_lsn: Cell::new(next),
            checkpoint_lsn: Cell::new(checkpoint),
        })
    }

    /// Append a record; assigns and returns its LSN. The log is flushed
    /// before the append returns.
    pub fn append(
        &self,
        txid: u64,
        action: WalAction,
        table_id: i64,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let lsn = self.next_lsn.get();
        self.next_lsn.set(lsn + 1);
        let timestamp = now_micros();
        let mut buf = Vec::with_capacity(37 + payload.len());
        buf.extend_from_slice(&lsn.to_le_bytes());
        buf.extend_from_slice(&txid.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.push(action.code());
        buf.extend_from_slice(&table_id.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&buf)?;
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&self.next_lsn.get().to_le_bytes())?;
        file.flush()?;
        Ok(lsn)
    }

    /// Read every record in LSN order.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(WAL_HDR as u64))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let mut out = Vec::new();
        let mut off = 0;
        while off + 37 <= data.len() {
            let lsn = util::getu64(&data, off);
            let txid = util::getu64(&data, off + 8);
            let timestamp = util::geti64(&data, off + 16);
            let action = WalAction::from_code(data[off + 24])?;
            let table_id = util::geti64(&data, off + 25);
            let payload_size = util::getu32(&data, off + 33) as usize;
            off += 37;
            if off + payload_size > data.len() {
                // Torn tail from an interrupted append: stop replay here.
                log::warn!("wal record {lsn} is torn, ignoring the tail");
                break;
            }
            out.push(WalRecord {
                lsn,
                txid,
                timestamp,
                action,
                table_id,
                payload: data[off..off + payload_size].to_vec(),
            });
            off += payload_size;
        }
        Ok(out)
    }

    /// Record that everything up to `lsn` is safely in the page files, and
    /// truncate the log.
    pub fn checkpoint(&self, lsn: u64) -> Result<()> {
        self.checkpoint_lsn.set(lsn);
        let mut file = self.file.borrow_mut();
        file.set_len(WAL_HDR as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&lsn.to_le_bytes())?;
        file.write_all(&self.next_lsn.get().to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn now_micros() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        Err(_) => 0,
    }
}

// ------ payload codecs ------

fn put_row(row: &Row, out: &mut Vec<u8>) {
    row.id.encode(out);
    out.extend_from_slice(&(row.values.len() as u16).to_le_bytes());
    for v in &row.values {
        out.push(!v.is_null() as u8);
        v.encode(out);
    }
}

fn get_row(schema: &TableSchema, data: &[u8], off: &mut usize) -> Result<Row> {
    let id = RowId::decode(data, *off);
    let n = util::getu16(data, *off + 6) as usize;
    *off += 8;
    if n != schema.columns.len() {
        return Err(DbError::Corruption(format!(
            "wal row has {n} columns, schema '{}' has {}",
            schema.name,
            schema.columns.len()
        )));
    }
    let mut values = Vec::with_capacity(n);
    for col in &schema.columns {
        let present = data[*off] != 0;
        *off += 1;
        if present {
            values.push(ColumnValue::decode(data, off, col.typ, col.is_array)?);
        } else {
            values.push(ColumnValue::Null);
        }
    }
    Ok(Row::new(id, values, schema))
}

/// After-image payload for INSERT.
pub fn insert_payload(row: &Row) -> Vec<u8> {
    let mut out = Vec::new();
    put_row(row, &mut out);
    out
}

/// Before- and after-image payload for UPDATE.
pub fn update_payload(before: &Row, after: &Row) -> Vec<u8> {
    let mut out = Vec::new();
    put_row(before, &mut out);
    put_row(after, &mut out);
    out
}

/// Before-image payload for DELETE.
pub fn delete_payload(row: &Row) -> Vec<u8> {
    let mut out = Vec::new();
    put_row(row, &mut out);
    out
}

pub fn decode_insert(schema: &TableSchema, payload: &[u8]) -> Result<Row> {
    let mut off = 0;
    get_row(schema, payload, &mut off)
}

pub fn decode_update(schema: &TableSchema, payload: &[u8]) -> Result<(Row, Row)> {
    let mut off = 0;
    let before = get_row(schema, payload, &mut off)?;
    let after = get_row(schema, payload, &mut off)?;
    Ok((before, after))
}

pub fn decode_delete(schema: &TableSchema, payload: &[u8]) -> Result<Row> {
    let mut off = 0;
    get_row(schema, payload, &mut off)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDef;
    use crate::value::DataType;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::Int),
                ColumnDef::new("name", DataType::Text),
            ],
        )
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.wal");
        let s = schema();
        let row = Row::new(
            RowId { page: 0, slot: 1 },
            vec![ColumnValue::Int(1), ColumnValue::Str("a".into())],
            &s,
        );
        {
            let wal = Wal::open(&path).unwrap();
            wal.append(7, WalAction::Insert, 42, insert_payload(&row))
                .unwrap();
            wal.append(7, WalAction::Delete, 42, delete_payload(&row))
                .unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        let recs = wal.read_all().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].lsn, 1);
        assert_eq!(recs[0].action, WalAction::Insert);
        assert_eq!(recs[0].table_id, 42);
        let back = decode_insert(&s, &recs[0].payload).unwrap();
        assert_eq!(back.values[1], ColumnValue::Str("a".into()));
        assert_eq!(recs[1].action, WalAction::Delete);
        assert_eq!(wal.next_lsn.get(), 3);
    }

    #[test]
    fn checkpoint_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.wal");
        let s = schema();
        let row = Row::new(
            RowId { page: 0, slot: 1 },
            vec![ColumnValue::Int(1), ColumnValue::Null],
            &s,
        );
        let wal = Wal::open(&path).unwrap();
        wal.append(1, WalAction::Insert, 1, insert_payload(&row))
            .unwrap();
        wal.checkpoint(wal.next_lsn.get() - 1).unwrap();
        assert!(wal.read_all().unwrap().is_empty());
        drop(wal);
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.checkpoint_lsn.get(), 1);
        assert_eq!(wal.next_lsn.get(), 2);
    }

    #[test]
    fn update_payload_roundtrip() {
        let s = schema();
        let before = Row::new(
            RowId { page: 2, slot: 3 },
            vec![ColumnValue::Int(1), ColumnValue::Str("old".into())],
            &s,
        );
        let after = Row::new(
            RowId { page: 2, slot: 3 },
            vec![ColumnValue::Int(1), ColumnValue::Str("new".into())],
            &s,
        );
        let p = update_payload(&before, &after);
        let (b, a) = decode_update(&s, &p).unwrap();
        assert_eq!(b.values[1], ColumnValue::Str("old".into()));
        assert_eq!(a.values[1], ColumnValue::Str("new".into()));
    }
}
