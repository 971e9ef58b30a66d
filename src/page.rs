//! Fixed-size row pages and the row wire format.
//!
//! A rows.db file starts with an 8-byte next-row counter; pages follow at
//! `PAGE_SIZE` intervals. A page holds a header and a slot array of rows in
//! insertion order. Row slots are 1-based so the all-zero RowId stays
//! reserved for "absent".

use crate::error::{DbError, Result};
use crate::table::TableSchema;
use crate::util;
use crate::value::ColumnValue;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 8192;

/// On-disk page header: page_id u32, row_count u16, free_space u16,
/// flags u8, reserved.
pub const PAGE_HDR: usize = 12;

/// Offset of the first page in rows.db ( the 8-byte row counter precedes it ).
pub const FILE_HDR: usize = 8;

/// Row header: RowId ( 6 bytes ) plus a 16-bit total length whose high bit
/// marks a tombstone.
pub const ROW_HDR: usize = 8;

const TOMBSTONE_BIT: u16 = 0x8000;

/// Physical row locator. Stable for the row's lifetime; `NONE` means
/// "absent / not found".
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
pub struct RowId {
    pub page: u32,
    pub slot: u16,
}

impl RowId {
    pub const NONE: RowId = RowId { page: 0, slot: 0 };

    pub fn is_none(self) -> bool {
        self == RowId::NONE
    }

    pub fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.page.to_le_bytes());
        out.extend_from_slice(&self.slot.to_le_bytes());
    }

    pub fn decode(data: &[u8], off: usize) -> RowId {
        RowId {
            page: util::getu32(data, off),
            slot: util::getu16(data, off + 4),
        }
    }
}

/// A materialised row.
#[derive(Clone, Debug)]
pub struct Row {
    pub id: RowId,
    pub values: Vec<ColumnValue>,
    /// Cached serialised length, header included.
    pub size: usize,
    pub tombstone: bool,
}

impl Row {
    pub fn new(id: RowId, values: Vec<ColumnValue>, schema: &TableSchema) -> Row {
        let mut row = Row {
            id,
            values,
            size: 0,
            tombstone: false,
        };
        row.size = row.compute_size(schema);
        row
    }

    /// Serialised length: header, null bitmap, then non-null payloads.
    pub fn compute_size(&self, schema: &TableSchema) -> usize {
        ROW_HDR + schema.bitmap_len() + self.values.iter().map(|v| v.disk_size()).sum::<usize>()
    }

    /// The null bitmap, bit i set iff column i is null.
    pub fn null_bitmap(&self, schema: &TableSchema) -> Vec<u8> {
        let mut bm = vec![0u8; schema.bitmap_len()];
        for (i, v) in self.values.iter().enumerate() {
            if v.is_null() {
                bm[i / 8] |= 1 << (i % 8);
            }
        }
        bm
    }

    pub fn encode(&self, schema: &TableSchema, out: &mut Vec<u8>) {
        self.id.encode(out);
        let mut len = self.size as u16;
        if self.tombstone {
            len |= TOMBSTONE_BIT;
        }
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.null_bitmap(schema));
        for v in &self.values {
            v.encode(out);
        }
    }

    /// Decode a row at `data[off..]`, advancing `off` past it.
    pub fn decode(schema: &TableSchema, data: &[u8], off: &mut usize) -> Result<Row> {
        let start = *off;
        let id = RowId::decode(data, *off);
        let raw_len = util::getu16(data, *off + 6);
        let tombstone = raw_len & TOMBSTONE_BIT != 0;
        let len = (raw_len & !TOMBSTONE_BIT) as usize;
        if start + len > data.len() {
            return Err(DbError::Corruption(format!(
                "row at offset {start} overruns its page"
            )));
        }
        *off += ROW_HDR;
        let bm_len = schema.bitmap_len();
        let bitmap = &data[*off..*off + bm_len];
        *off += bm_len;
        let mut values = Vec::with_capacity(schema.columns.len());
        for (i, col) in schema.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(ColumnValue::Null);
            } else {
                values.push(ColumnValue::decode(data, off, col.typ, col.is_array)?);
            }
        }
        if *off != start + len {
            return Err(DbError::Corruption(format!(
                "row length mismatch at offset {start}: header says {len}, decoded {}",
                *off - start
            )));
        }
        Ok(Row {
            id,
            values,
            size: len,
            tombstone,
        })
    }
}

/// An 8 KiB page: header plus rows in slot order. The unit of buffered I/O.
pub struct Page {
    pub id: u32,
    pub rows: Vec<Row>,
    pub dirty: bool,
    pub full: bool,
}

impl Page {
    pub fn new(id: u32) -> Page {
        Page {
            id,
            rows: Vec::new(),
            dirty: false,
            full: false,
        }
    }

    /// Bytes consumed by the slot array, tombstones included ( their bytes
    /// remain until a vacuum, which is out of scope ).
    pub fn used(&self) -> usize {
        self.rows.iter().map(|r| r.size).sum()
    }

    /// Remaining free space.
    pub fn free_space(&self) -> usize {
        PAGE_SIZE - PAGE_HDR - self.used()
    }

    /// Number of live ( non-tombstoned ) rows.
    pub fn live_rows(&self) -> usize {
        self.rows.iter().filter(|r| !r.tombstone).count()
    }

    /// Whether a row of `size` bytes fits.
    pub fn fits(&self, size: usize) -> bool {
        self.free_space() >= size
    }

    /// Append a row, assigning its slot. Caller has checked `fits`.
    pub fn push_row(&mut self, mut row: Row) -> RowId {
        let slot = (self.rows.len() + 1) as u16;
        row.id = RowId {
            page: self.id,
            slot,
        };
        let id = row.id;
        self.rows.push(row);
        self.dirty = true;
        id
    }

    /// Row by slot number.
    pub fn row(&self, slot: u16) -> Option<&Row> {
        self.rows.get(slot as usize - 1)
    }

    pub fn row_mut(&mut self, slot: u16) -> Option<&mut Row> {
        self.rows.get_mut(slot as usize - 1)
    }

    /// Serialise to a full page image.
    pub fn to_bytes(&self, schema: &TableSchema) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.rows.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(self.free_space() as u16).to_le_bytes());
        buf.push(self.full as u8);
        buf.resize(PAGE_HDR, 0);
        for row in &self.rows {
            row.encode(schema, &mut buf);
        }
        buf.resize(PAGE_SIZE, 0);
        buf
    }

    /// Rebuild from a page image, validating the header.
    pub fn from_bytes(schema: &TableSchema, expect_id: u32, data: &[u8]) -> Result<Page> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "short page read for page {expect_id}"
            )));
        }
        let id = util::getu32(data, 0);
        if id != expect_id {
            return Err(DbError::Corruption(format!(
                "page header id {id} does not match expected {expect_id}"
            )));
        }
        let count = util::getu16(data, 4) as usize;
        let free = util::getu16(data, 6) as usize;
        let full = data[8] != 0;
        let mut rows = Vec::with_capacity(count);
        let mut off = PAGE_HDR;
        for _ in 0..count {
            rows.push(Row::decode(schema, data, &mut off)?);
        }
        let page = Page {
            id,
            rows,
            dirty: false,
            full,
        };
        if page.free_space() != free {
            return Err(DbError::Corruption(format!(
                "page {id} free-space header {free} disagrees with contents {}",
                page.free_space()
            )));
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDef;
    use crate::value::DataType;

    fn schema() -> TableSchema {
        let mut name = ColumnDef::new("name", DataType::Text);
        name.not_null = true;
        TableSchema::new("t", vec![ColumnDef::new("id", DataType::Int), name])
    }

    #[test]
    fn row_roundtrip_with_nulls() {
        let s = schema();
        let row = Row::new(
            RowId { page: 3, slot: 1 },
            vec![ColumnValue::Null, ColumnValue::Str("abc".into())],
            &s,
        );
        let mut buf = Vec::new();
        row.encode(&s, &mut buf);
        assert_eq!(buf.len(), row.size);
        let mut off = 0;
        let back = Row::decode(&s, &buf, &mut off).unwrap();
        assert!(back.values[0].is_null());
        assert_eq!(back.values[1], ColumnValue::Str("abc".into()));
        assert_eq!(back.id, row.id);
    }

    #[test]
    fn bitmap_matches_null_values() {
        let s = schema();
        let row = Row::new(
            RowId { page: 1, slot: 2 },
            vec![ColumnValue::Int(5), ColumnValue::Null],
            &s,
        );
        let bm = row.null_bitmap(&s);
        assert_eq!(bm[0] & 1, 0);
        assert_eq!(bm[0] & 2, 2);
    }

    #[test]
    fn page_roundtrip_preserves_tombstones() {
        let s = schema();
        let mut page = Page::new(7);
        for i in 0..3 {
            let row = Row::new(
                RowId::NONE,
                vec![
                    ColumnValue::Int(i),
                    ColumnValue::Str(format!("row{i}")),
                ],
                &s,
            );
            page.push_row(row);
        }
        page.row_mut(2).unwrap().tombstone = true;
        let img = page.to_bytes(&s);
        let back = Page::from_bytes(&s, 7, &img).unwrap();
        assert_eq!(back.rows.len(), 3);
        assert_eq!(back.live_rows(), 2);
        assert!(back.row(2).unwrap().tombstone);
        assert_eq!(back.free_space(), page.free_space());
    }

    #[test]
    fn header_mismatch_is_corruption() {
        let s = schema();
        let page = Page::new(7);
        let img = page.to_bytes(&s);
        assert!(Page::from_bytes(&s, 8, &img).is_err());
    }
}
