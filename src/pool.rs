//! Per-table buffer pool ( the "lake" ). At most `POOL_SIZE` pages of a
//! table's rows.db are resident; victims are chosen least-recently-used,
//! and a pinned page ( one the caller still holds a reference to ) is never
//! evicted. Dirty pages are flushed on checkpoint and engine shutdown.

use crate::error::{DbError, Result};
use crate::page::{Page, Row, RowId, FILE_HDR, PAGE_HDR, PAGE_SIZE};
use crate::table::TableSchema;
use crate::value::ColumnValue;
use lru::LruCache;
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Resident pages per table.
pub const POOL_SIZE: usize = 32;

pub type PagePtr = Rc<RefCell<Page>>;

pub struct BufferPool {
    pub path: PathBuf,
    file: RefCell<File>,
    schema: RefCell<Rc<TableSchema>>,
    frames: RefCell<LruCache<u32, PagePtr>>,
    pub page_count: Cell<u32>,
    /// Monotonic row counter persisted in the file header.
    pub next_row: Cell<u64>,
    hdr_dirty: Cell<bool>,
    max_file_pages: u32,
}

impl BufferPool {
    /// Open ( or create ) the rows.db file for a table.
    pub fn open(path: &Path, schema: Rc<TableSchema>, max_file_pages: u32) -> Result<Rc<BufferPool>> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let next_row = if is_new {
            file.write_all(&0u64.to_le_bytes())?;
            0
        } else {
            let mut hdr = [0u8; FILE_HDR];
            file.read_exact(&mut hdr)?;
            u64::from_le_bytes(hdr)
        };
        let len = file.metadata()?.len() as usize;
        if len < FILE_HDR || (len - FILE_HDR) % PAGE_SIZE != 0 {
            return Err(DbError::Corruption(format!(
                "rows file {} has a torn page region",
                path.display()
            )));
        }
        let page_count = ((len - FILE_HDR) / PAGE_SIZE) as u32;
        Ok(Rc::new(BufferPool {
            path: path.to_path_buf(),
            file: RefCell::new(file),
            schema: RefCell::new(schema),
            frames: RefCell::new(LruCache::unbounded()),
            page_count: Cell::new(page_count),
            next_row: Cell::new(next_row),
            hdr_dirty: Cell::new(false),
            max_file_pages,
        }))
    }

    pub fn schema(&self) -> Rc<TableSchema> {
        self.schema.borrow().clone()
    }

    /// Swap in a new schema after an ALTER. Resident frames must have been
    /// flushed and dropped first, since their rows decode with the old one.
    pub fn set_schema(&self, schema: Rc<TableSchema>) {
        self.frames.borrow_mut().clear();
        *self.schema.borrow_mut() = schema;
    }

    /// Get a pinned page reference, reading it from disk on a miss.
    pub fn get_page(&self, page_id: u32) -> Result<PagePtr> {
        if page_id >= self.page_count.get() {
            return Err(DbError::Corruption(format!(
                "page {page_id} out of range for {}",
                self.path.display()
            )));
        }
        if let Some(pp) = self.frames.borrow_mut().get(&page_id) {
            return Ok(pp.clone());
        }
        let page = self.read_page(page_id)?;
        let pp = Rc::new(RefCell::new(page));
        self.put_frame(page_id, pp.clone())?;
        Ok(pp)
    }

    /// A page with at least `size` bytes free: a resident page, the last
    /// page of the file, or a freshly appended page.
    pub fn make_room_for(&self, size: usize) -> Result<PagePtr> {
        if size > PAGE_SIZE - PAGE_HDR {
            return Err(DbError::OutOfSpace(format!(
                "row of {size} bytes exceeds the page capacity"
            )));
        }
        {
            let frames = self.frames.borrow();
            for (_, pp) in frames.iter() {
                if pp.borrow().fits(size) {
                    return Ok(pp.clone());
                }
            }
        }
        let n = self.page_count.get();
        if n > 0 {
            let last = self.get_page(n - 1)?;
            if last.borrow().fits(size) {
                return Ok(last);
            }
            last.borrow_mut().full = true;
        }
        self.alloc_page()
    }

    /// Append an empty page to the file.
    fn alloc_page(&self) -> Result<PagePtr> {
        let id = self.page_count.get();
        if self.max_file_pages > 0 && id >= self.max_file_pages {
            return Err(DbError::OutOfSpace(format!(
                "{} reached its configured limit of {} pages",
                self.path.display(),
                self.max_file_pages
            )));
        }
        let mut page = Page::new(id);
        page.dirty = true;
        self.page_count.set(id + 1);
        // Extend the file now so page_count always matches the file length.
        let schema = self.schema();
        let img = page.to_bytes(&schema);
        self.write_image(id, &img)?;
        let pp = Rc::new(RefCell::new(page));
        self.put_frame(id, pp.clone())?;
        log::debug!("allocated page {id} in {}", self.path.display());
        Ok(pp)
    }

    /// Insert a frame, evicting the least-recently-used unpinned page when
    /// the pool is over capacity.
    fn put_frame(&self, id: u32, pp: PagePtr) -> Result<()> {
        let mut victims = Vec::new();
        {
            let mut frames = self.frames.borrow_mut();
            frames.put(id, pp);
            let mut skipped = Vec::new();
            while frames.len() > POOL_SIZE {
                match frames.pop_lru() {
                    Some((vid, vp)) => {
                        if Rc::strong_count(&vp) > 1 {
                            // Pinned, keep resident.
                            skipped.push((vid, vp));
                        } else {
                            victims.push(vp);
                        }
                    }
                    None => break,
                }
                if skipped.len() >= POOL_SIZE {
                    break;
                }
            }
            for (vid, vp) in skipped.into_iter().rev() {
                frames.put(vid, vp);
            }
        }
        for vp in victims {
            let p = vp.borrow();
            if p.dirty {
                let img = p.to_bytes(&self.schema());
                self.write_image(p.id, &img)?;
            }
        }
        Ok(())
    }

    fn read_page(&self, id: u32) -> Result<Page> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start((FILE_HDR + id as usize * PAGE_SIZE) as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        Page::from_bytes(&self.schema(), id, &buf)
    }

    fn write_image(&self, id: u32, img: &[u8]) -> Result<()> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start((FILE_HDR + id as usize * PAGE_SIZE) as u64))?;
        file.write_all(img)?;
        Ok(())
    }

    /// Discard the in-memory copy of a page and reload it from disk. Used
    /// to roll back a statement's in-memory mutations.
    pub fn reload_page(&self, id: u32) -> Result<()> {
        self.frames.borrow_mut().pop(&id);
        if id < self.page_count.get() {
            let page = self.read_page(id)?;
            self.put_frame(id, Rc::new(RefCell::new(page)))?;
        }
        Ok(())
    }

    /// Insert a row; returns its new RowId.
    pub fn insert_row(&self, values: Vec<ColumnValue>) -> Result<RowId> {
        let schema = self.schema();
        let row = Row::new(RowId::NONE, values, &schema);
        let pp = self.make_room_for(row.size)?;
        let mut page = pp.borrow_mut();
        let rid = page.push_row(row);
        self.next_row.set(self.next_row.get() + 1);
        self.hdr_dirty.set(true);
        Ok(rid)
    }

    /// Fetch a copy of a row. Tombstoned rows report as absent.
    pub fn fetch_row(&self, rid: RowId) -> Result<Option<Row>> {
        if rid.is_none() || rid.page >= self.page_count.get() {
            return Ok(None);
        }
        let pp = self.get_page(rid.page)?;
        let page = pp.borrow();
        match page.row(rid.slot) {
            Some(r) if !r.tombstone => Ok(Some(r.clone())),
            _ => Ok(None),
        }
    }

    /// Overwrite a row in place when the new image fits, otherwise
    /// tombstone it and re-insert at a fresh slot. Returns the RowId the
    /// row lives at afterwards.
    pub fn update_row(&self, rid: RowId, values: Vec<ColumnValue>) -> Result<RowId> {
        let schema = self.schema();
        let pp = self.get_page(rid.page)?;
        let mut page = pp.borrow_mut();
        let old_size = match page.row(rid.slot) {
            Some(r) if !r.tombstone => r.size,
            _ => return Err(DbError::NotFound(format!("row {rid:?} is gone"))),
        };
        let new_row = Row::new(rid, values, &schema);
        let grow = new_row.size.saturating_sub(old_size);
        if grow == 0 || page.free_space() >= grow {
            let slot = page.row_mut(rid.slot).unwrap();
            slot.values = new_row.values;
            slot.size = new_row.size;
            page.dirty = true;
            Ok(rid)
        } else {
            page.row_mut(rid.slot).unwrap().tombstone = true;
            page.dirty = true;
            drop(page);
            self.insert_row(new_row.values)
        }
    }

    /// Tombstone a row. The slot bytes stay until a vacuum.
    pub fn delete_row(&self, rid: RowId) -> Result<()> {
        let pp = self.get_page(rid.page)?;
        let mut page = pp.borrow_mut();
        match page.row_mut(rid.slot) {
            Some(r) if !r.tombstone => {
                r.tombstone = true;
                page.dirty = true;
                Ok(())
            }
            _ => Err(DbError::NotFound(format!("row {rid:?} is gone"))),
        }
    }

    /// Resurrect a tombstoned row in place ( statement rollback ).
    pub fn undelete_row(&self, rid: RowId) -> Result<()> {
        let pp = self.get_page(rid.page)?;
        let mut page = pp.borrow_mut();
        if let Some(r) = page.row_mut(rid.slot) {
            r.tombstone = false;
            page.dirty = true;
        }
        Ok(())
    }

    /// Force a row image into an exact slot, creating pages and padding
    /// slots as needed. Used by WAL replay, where records carry the RowId
    /// the row lived at; applying the same record twice converges.
    pub fn apply_row_at(&self, rid: RowId, values: Option<Vec<ColumnValue>>) -> Result<()> {
        if rid.is_none() {
            return Ok(());
        }
        let schema = self.schema();
        while self.page_count.get() <= rid.page {
            self.alloc_page()?;
        }
        let pp = self.get_page(rid.page)?;
        let mut page = pp.borrow_mut();
        while page.rows.len() < rid.slot as usize {
            // Pad intermediate slots with tombstoned all-null rows.
            let slot = (page.rows.len() + 1) as u16;
            let mut filler = Row::new(
                RowId {
                    page: rid.page,
                    slot,
                },
                vec![ColumnValue::Null; schema.columns.len()],
                &schema,
            );
            filler.tombstone = true;
            page.rows.push(filler);
        }
        let row = page.row_mut(rid.slot).unwrap();
        match values {
            Some(vals) => {
                let fresh = Row::new(rid, vals, &schema);
                row.values = fresh.values;
                row.size = fresh.size;
                row.tombstone = false;
                if self.next_row.get() == 0 {
                    self.next_row.set(1);
                    self.hdr_dirty.set(true);
                }
            }
            None => row.tombstone = true,
        }
        page.dirty = true;
        Ok(())
    }

    /// Write out every dirty resident page and the header counter.
    pub fn flush(&self) -> Result<()> {
        let schema = self.schema();
        let frames = self.frames.borrow();
        for (_, pp) in frames.iter() {
            let mut p = pp.borrow_mut();
            if p.dirty {
                let img = p.to_bytes(&schema);
                self.write_image(p.id, &img)?;
                p.dirty = false;
            }
        }
        drop(frames);
        if self.hdr_dirty.get() {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&self.next_row.get().to_le_bytes())?;
            self.hdr_dirty.set(false);
        }
        self.file.borrow_mut().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDef;
    use crate::value::DataType;

    fn schema() -> Rc<TableSchema> {
        Rc::new(TableSchema::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::Int),
                ColumnDef::new("name", DataType::Text),
            ],
        ))
    }

    fn vals(i: i64) -> Vec<ColumnValue> {
        vec![ColumnValue::Int(i), ColumnValue::Str(format!("row{i}"))]
    }

    #[test]
    fn insert_fetch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::open(&dir.path().join("rows.db"), schema(), 0).unwrap();
        let r1 = pool.insert_row(vals(1)).unwrap();
        let r2 = pool.insert_row(vals(2)).unwrap();
        assert_ne!(r1, r2);
        assert_eq!(
            pool.fetch_row(r1).unwrap().unwrap().values[0],
            ColumnValue::Int(1)
        );
        assert_eq!(pool.next_row.get(), 2);
    }

    #[test]
    fn rows_survive_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.db");
        let rid;
        {
            let pool = BufferPool::open(&path, schema(), 0).unwrap();
            rid = pool.insert_row(vals(42)).unwrap();
            pool.flush().unwrap();
        }
        let pool = BufferPool::open(&path, schema(), 0).unwrap();
        let row = pool.fetch_row(rid).unwrap().unwrap();
        assert_eq!(row.values[1], ColumnValue::Str("row42".into()));
        assert_eq!(pool.next_row.get(), 1);
    }

    #[test]
    fn delete_is_a_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::open(&dir.path().join("rows.db"), schema(), 0).unwrap();
        let rid = pool.insert_row(vals(1)).unwrap();
        pool.delete_row(rid).unwrap();
        assert!(pool.fetch_row(rid).unwrap().is_none());
        pool.undelete_row(rid).unwrap();
        assert!(pool.fetch_row(rid).unwrap().is_some());
    }

    #[test]
    fn update_relocates_when_grown_past_page() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::open(&dir.path().join("rows.db"), schema(), 0).unwrap();
        // Nearly fill page 0 so the grown row cannot stay in place.
        let rid = pool.insert_row(vals(1)).unwrap();
        let filler = "x".repeat(7000);
        pool.insert_row(vec![ColumnValue::Int(2), ColumnValue::Str(filler)])
            .unwrap();
        let big = "y".repeat(2000);
        let new_rid = pool
            .update_row(rid, vec![ColumnValue::Int(1), ColumnValue::Str(big.clone())])
            .unwrap();
        assert_ne!(new_rid, rid);
        assert!(pool.fetch_row(rid).unwrap().is_none());
        assert_eq!(
            pool.fetch_row(new_rid).unwrap().unwrap().values[1],
            ColumnValue::Str(big)
        );
    }

    #[test]
    fn pool_evicts_but_data_remains_readable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::open(&dir.path().join("rows.db"), schema(), 0).unwrap();
        let filler = "f".repeat(4000);
        let mut rids = Vec::new();
        // Two rows per page, enough pages to exceed POOL_SIZE.
        for i in 0..(POOL_SIZE as i64 * 2 + 10) {
            rids.push(
                pool.insert_row(vec![ColumnValue::Int(i), ColumnValue::Str(filler.clone())])
                    .unwrap(),
            );
        }
        for (i, rid) in rids.iter().enumerate() {
            let row = pool.fetch_row(*rid).unwrap().unwrap();
            assert_eq!(row.values[0], ColumnValue::Int(i as i64));
        }
    }

    #[test]
    fn file_size_limit_reports_out_of_space() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::open(&dir.path().join("rows.db"), schema(), 1).unwrap();
        let filler = "z".repeat(5000);
        pool.insert_row(vec![ColumnValue::Int(1), ColumnValue::Str(filler.clone())])
            .unwrap();
        let err = pool
            .insert_row(vec![ColumnValue::Int(2), ColumnValue::Str(filler)])
            .unwrap_err();
        assert!(matches!(err, DbError::OutOfSpace(_)));
    }
}
