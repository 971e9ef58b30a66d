//! Single-process relational database engine.
//!
//! A database lives in one directory: paginated row files and per-column
//! B-tree index files under `tables/`, a self-describing catalog rooted in
//! four meta-tables, a write-ahead log, and JSON configuration. Statements
//! come in as SQL text and come back as an [ExecutionResult] of rows with
//! aliases.
//!
//! The engine is single-threaded per database; a statement runs to
//! completion before the next is read. It is also re-entrant against the
//! same database: resolving defaults, CHECK expressions, sequences and
//! catalog metadata issues internal statements through
//! [Database::exec_internal].
//!
//! ```no_run
//! use jugadb::Database;
//! let db = Database::open(std::path::Path::new("./mydb")).unwrap();
//! db.exec("CREATE TABLE t (id SERIAL PRIMKEY, name VARCHAR(20) NOT NULL);");
//! db.exec("INSERT INTO t (name) VALUES ('alice'), ('bob');");
//! let res = db.exec("SELECT id, name FROM t ORDER BY id;");
//! assert_eq!(res.rows.len(), 2);
//! db.save().unwrap();
//! ```

use lru::LruCache;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Byte codecs and the table-name hash.
pub mod util;

/// Error taxonomy.
pub mod error;

/// Engine configuration files.
pub mod config;

/// Temporal value codecs.
pub mod datetime;

/// Run-time values and their on-disk encoding.
pub mod value;

/// Lexical analysis.
pub mod lexer;

/// Expression trees.
pub mod expr;

/// SQL parser.
pub mod parse;

/// Schema types.
pub mod table;

/// Row pages.
pub mod page;

/// Per-table buffer pool.
pub mod pool;

/// Disk-resident B-tree index.
pub mod btree;

/// Oversized-string storage.
pub mod toast;

/// Write-ahead log.
pub mod wal;

/// Self-hosted catalog and bootstrap.
pub mod sys;

/// Constraint engine.
pub mod constraint;

/// Expression evaluation.
pub mod eval;

/// Statement execution.
pub mod exec;

#[cfg(test)]
mod test;

pub use crate::config::DbConfig;
pub use crate::error::{DbError, Result};
pub use crate::exec::ExecutionResult;
pub use crate::page::RowId;
pub use crate::value::{ColumnValue, DataType};

use crate::btree::BTree;
use crate::expr::ExprNode;
use crate::page::Row;
use crate::parse::{Command, Parser, SchemaLookup};
use crate::pool::BufferPool;
use crate::sys::SchemaFile;
use crate::table::{CatalogEntry, TableSchema};
use crate::util::MAX_TABLES;
use crate::wal::{Wal, WalAction};

/// `Rc<Database>`.
pub type DB = Rc<Database>;

/// One open database rooted at a directory.
pub struct Database {
    /// Database root directory.
    pub root: PathBuf,
    pub cfg: DbConfig,
    /// The `tables/schema` catalog file.
    pub schema_file: SchemaFile,
    /// Catalog slots, indexed by the FNV-1a hash of the table name.
    tc: RefCell<Vec<Option<CatalogEntry>>>,
    /// Buffer pools ( "lakes" ), one per catalog slot.
    lake: RefCell<Vec<Option<Rc<BufferPool>>>>,
    /// Live B-trees, keyed by ( catalog slot, column-name hash ).
    trees: RefCell<LruCache<(usize, u32), Rc<BTree>>>,
    wal: Option<Wal>,
    /// Monotonic transaction id, advanced per WAL append.
    txid: Cell<u64>,
    /// Re-entrancy depth of the internal statement path.
    reentry: Cell<usize>,
    /// Foreign-key action recursion depth.
    fk_depth: Cell<usize>,
    /// Suppresses WAL writes while the log itself is being replayed.
    replaying: Cell<bool>,
    /// Set once corruption is detected; the session becomes read-only.
    read_only: Cell<bool>,
    /// Parsed default expressions, keyed by ( table id, column position ).
    defaults: RefCell<FxHashMap<(i64, usize), Rc<ExprNode>>>,
}

/// Hard bound on internal statement nesting, independent of FK depth.
const REENTRY_LIMIT: usize = 64;

impl SchemaLookup for Database {
    fn table_schema(&self, name: &str) -> Option<Rc<TableSchema>> {
        self.catalog(name).map(|e| e.schema)
    }
}

impl Database {
    /// Open ( or create ) the database rooted at `root`.
    pub fn open(root: &Path) -> Result<DB> {
        for sub in ["tables", "logs", "backups", "config"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        let cfg = DbConfig::load_or_create(&root.join("config"))?;
        let _logging = config::LoggingConfig::load_or_create(&root.join("config"))?;
        let schema_file = SchemaFile::open(&root.join("tables").join("schema"))?;
        let is_new = schema_file.table_count.get() == 0;
        let wal = if cfg.wal_enabled {
            Some(Wal::open(&root.join("db.wal"))?)
        } else {
            None
        };
        let btree_cache = NonZeroUsize::new(cfg.btree_cache.max(1)).unwrap();
        let db = Rc::new(Database {
            root: root.to_path_buf(),
            cfg,
            schema_file,
            tc: RefCell::new(vec![None; MAX_TABLES]),
            lake: RefCell::new((0..MAX_TABLES).map(|_| None).collect()),
            trees: RefCell::new(LruCache::new(btree_cache)),
            wal,
            txid: Cell::new(1),
            reentry: Cell::new(0),
            fk_depth: Cell::new(0),
            replaying: Cell::new(false),
            read_only: Cell::new(false),
            defaults: RefCell::new(FxHashMap::default()),
        });
        if is_new {
            sys::bootstrap_core_tables(&db)?;
            db.save()?;
        } else {
            sys::load_core_tables(&db)?;
            db.recover()?;
        }
        Ok(db)
    }

    // ------ statement entry points ------

    /// Run a batch of statements; the last statement's result is returned.
    /// Errors are folded into a non-zero result code, the way the REPL
    /// collaborator consumes them.
    pub fn exec(self: &DB, sql: &str) -> ExecutionResult {
        match self.try_exec(sql) {
            Ok(res) => res,
            Err(e) => {
                if matches!(e, DbError::Corruption(_)) {
                    log::error!("marking database read-only: {e}");
                    self.read_only.set(true);
                }
                ExecutionResult {
                    code: e.code(),
                    message: e.to_string(),
                    rows: Vec::new(),
                    aliases: Vec::new(),
                }
            }
        }
    }

    /// Run a batch of statements, propagating errors.
    pub fn try_exec(self: &DB, sql: &str) -> Result<ExecutionResult> {
        let mut last = ExecutionResult::ok("");
        let mut parser = Parser::new(sql, self.as_lookup())?;
        loop {
            let cmd = match parser.parse_statement()? {
                Some(c) => c,
                None => break,
            };
            if self.read_only.get() && !matches!(cmd, Command::Select(_)) {
                return Err(DbError::ReadOnly);
            }
            last = exec::execute(self, cmd)?;
        }
        Ok(last)
    }

    /// Re-entrant door for the engine's own statements ( catalog queries,
    /// defaults, sequences, TOAST ). Each nested level saves nothing of the
    /// outer statement: parsers are per-call, and pinned pages stay valid.
    pub fn exec_internal(self: &DB, sql: &str) -> Result<ExecutionResult> {
        let depth = self.reentry.get();
        if depth >= REENTRY_LIMIT {
            return Err(DbError::CascadeCycle(format!(
                "internal statement nesting exceeded {REENTRY_LIMIT}"
            )));
        }
        self.reentry.set(depth + 1);
        let res = self.try_exec(sql);
        self.reentry.set(depth);
        res
    }

    /// Foreign-key action statements ( CASCADE / SET NULL ) run through
    /// here so cycles abort instead of overflowing the stack.
    pub fn exec_fk_action(self: &DB, sql: &str) -> Result<ExecutionResult> {
        let depth = self.fk_depth.get();
        if depth >= self.cfg.cascade_depth_limit {
            return Err(DbError::CascadeCycle(format!(
                "foreign-key action depth exceeded {}",
                self.cfg.cascade_depth_limit
            )));
        }
        self.fk_depth.set(depth + 1);
        let res = self.try_exec(sql);
        self.fk_depth.set(depth);
        res
    }

    pub fn as_lookup(&self) -> &dyn SchemaLookup {
        self
    }

    // ------ catalog access ------

    fn slot_of(&self, name: &str) -> usize {
        util::fnv1a(name, MAX_TABLES as u32) as usize
    }

    /// Catalog entry for a table, if present.
    pub fn catalog(&self, name: &str) -> Option<CatalogEntry> {
        let tc = self.tc.borrow();
        match &tc[self.slot_of(name)] {
            Some(e) if e.name.eq_ignore_ascii_case(name) => Some(e.clone()),
            _ => None,
        }
    }

    /// Name of a different table already occupying this name's slot.
    pub fn slot_occupant(&self, name: &str) -> Option<String> {
        let tc = self.tc.borrow();
        match &tc[self.slot_of(name)] {
            Some(e) if !e.name.eq_ignore_ascii_case(name) => Some(e.name.clone()),
            _ => None,
        }
    }

    /// Install a catalog entry into its slot.
    pub fn install_entry(&self, entry: CatalogEntry) -> Result<()> {
        let slot = self.slot_of(&entry.name);
        let mut tc = self.tc.borrow_mut();
        if let Some(existing) = &tc[slot] {
            if !existing.name.eq_ignore_ascii_case(&entry.name) {
                return Err(DbError::DuplicateName(format!(
                    "'{}' collides with '{}' in catalog slot {slot}",
                    entry.name, existing.name
                )));
            }
        }
        tc[slot] = Some(entry);
        Ok(())
    }

    fn entry_by_id(&self, table_id: i64) -> Option<CatalogEntry> {
        self.tc
            .borrow()
            .iter()
            .flatten()
            .find(|e| e.table_id == table_id)
            .cloned()
    }

    // ------ storage access ------

    fn table_dir(&self, name: &str) -> PathBuf {
        self.root.join("tables").join(name)
    }

    /// The buffer pool for a table, opened on first use.
    pub fn pool(&self, name: &str) -> Result<Rc<BufferPool>> {
        let entry = self
            .catalog(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        let slot = self.slot_of(name);
        if let Some(p) = &self.lake.borrow()[slot] {
            return Ok(p.clone());
        }
        let pool = BufferPool::open(
            &self.table_dir(&entry.name).join("rows.db"),
            entry.schema.clone(),
            self.cfg.max_file_pages,
        )?;
        self.lake.borrow_mut()[slot] = Some(pool.clone());
        Ok(pool)
    }

    /// The B-tree for an indexed column, loaded or created on first use.
    /// Live trees are bounded by an LRU; evicted trees are saved.
    pub fn tree(&self, table: &str, column: &str) -> Result<Rc<BTree>> {
        let entry = self
            .catalog(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
        let slot = self.slot_of(table);
        let colhash = util::fnv1a_full(column);
        if let Some(t) = self.trees.borrow_mut().get(&(slot, colhash)) {
            return Ok(t.clone());
        }
        let ci = entry
            .schema
            .find_col(column)
            .ok_or_else(|| DbError::NotFound(format!("column '{column}' in '{table}'")))?;
        let path = self.table_dir(&entry.name).join(format!("{colhash:08x}.idx"));
        let tree = if path.exists() {
            BTree::load(&path)?
        } else {
            BTree::new(
                slot as u32,
                btree::compute_order(self.cfg.block_size),
                entry.schema.columns[ci].typ,
                &path,
            )
        };
        let tree = Rc::new(tree);
        let evicted = self.trees.borrow_mut().push((slot, colhash), tree.clone());
        if let Some(((eslot, ehash), old)) = evicted {
            if (eslot, ehash) != (slot, colhash) {
                old.save()?;
            }
        }
        Ok(tree)
    }

    /// Key probe in a column's B-tree; the key is coerced to the column's
    /// type first.
    pub fn index_lookup(
        &self,
        table: &str,
        column: &str,
        key: &ColumnValue,
    ) -> Result<RowId> {
        let entry = self
            .catalog(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
        let ci = entry
            .schema
            .find_col(column)
            .ok_or_else(|| DbError::NotFound(format!("column '{column}' in '{table}'")))?;
        let mut key = key.clone();
        entry.schema.columns[ci].coerce(&mut key)?;
        self.tree(table, column)?.search(&key)
    }

    /// Every live row of a table, page by page.
    pub fn scan_table(&self, name: &str) -> Result<Vec<Row>> {
        let pool = self.pool(name)?;
        let mut out = Vec::new();
        for page_id in 0..pool.page_count.get() {
            let pp = pool.get_page(page_id)?;
            let page = pp.borrow();
            for row in &page.rows {
                if !row.tombstone {
                    out.push(row.clone());
                }
            }
        }
        Ok(out)
    }

    // ------ DDL plumbing ------

    /// Create the physical side of a table: directory, rows file, schema
    /// record and catalog entry.
    pub fn create_physical_table(&self, schema: Rc<TableSchema>, table_id: i64) -> Result<()> {
        let name = schema.name.clone();
        std::fs::create_dir_all(self.table_dir(&name))?;
        let slot = self.slot_of(&name);
        let offset = self.schema_file.write_schema(slot, &schema)?;
        let pool = BufferPool::open(
            &self.table_dir(&name).join("rows.db"),
            schema.clone(),
            self.cfg.max_file_pages,
        )?;
        self.lake.borrow_mut()[slot] = Some(pool);
        self.install_entry(CatalogEntry {
            name,
            table_id,
            offset,
            schema,
        })
    }

    /// Swap a table's schema ( metadata-only ALTER ). The row file layout
    /// is unchanged.
    pub fn replace_schema(&self, table: &str, schema: Rc<TableSchema>) -> Result<()> {
        let entry = self
            .catalog(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
        let slot = self.slot_of(table);
        let offset = self.schema_file.write_schema(slot, &schema)?;
        if let Some(pool) = &self.lake.borrow()[slot] {
            pool.flush()?;
            pool.set_schema(schema.clone());
        }
        self.defaults
            .borrow_mut()
            .retain(|(tid, _), _| *tid != entry.table_id);
        self.install_entry(CatalogEntry {
            name: entry.name,
            table_id: entry.table_id,
            offset,
            schema,
        })
    }

    /// Swap a table's schema AND rewrite the row file through `map`, so
    /// pages are never read with a mismatched layout.
    pub fn replace_schema_and_rewrite(
        &self,
        table: &str,
        schema: Rc<TableSchema>,
        mut map: impl FnMut(Vec<ColumnValue>) -> Vec<ColumnValue>,
    ) -> Result<()> {
        let rows = self.scan_table(table)?;
        let slot = self.slot_of(table);
        self.lake.borrow_mut()[slot] = None;
        let rows_path = self.table_dir(table).join("rows.db");
        std::fs::remove_file(&rows_path)?;
        self.replace_schema(table, schema.clone())?;
        let pool = BufferPool::open(&rows_path, schema, self.cfg.max_file_pages)?;
        self.lake.borrow_mut()[slot] = Some(pool.clone());
        for row in rows {
            pool.insert_row(map(row.values))?;
        }
        self.rebuild_indexes(table)
    }

    /// Rebuild every per-column B-tree of a table from its live rows.
    pub fn rebuild_indexes(&self, table: &str) -> Result<()> {
        let entry = self
            .catalog(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))?;
        let slot = self.slot_of(table);
        let rows = self.scan_table(table)?;
        for (ci, col) in entry.schema.columns.iter().enumerate() {
            if !col.indexed() {
                continue;
            }
            let colhash = util::fnv1a_full(&col.name);
            self.trees.borrow_mut().pop(&(slot, colhash));
            let path = self
                .table_dir(&entry.name)
                .join(format!("{colhash:08x}.idx"));
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let tree = Rc::new(BTree::new(
                slot as u32,
                btree::compute_order(self.cfg.block_size),
                col.typ,
                &path,
            ));
            for row in &rows {
                let key = &row.values[ci];
                if key.is_null() || matches!(key, ColumnValue::Array(..)) {
                    continue;
                }
                match tree.insert(key.clone(), row.id) {
                    Ok(()) => {}
                    Err(DbError::DuplicateKey(_)) if !col.is_primary && !col.is_unique => {}
                    Err(e) => return Err(e),
                }
            }
            tree.save()?;
            let evicted = self.trees.borrow_mut().push((slot, colhash), tree);
            if let Some((k, old)) = evicted {
                if k != (slot, colhash) {
                    old.save()?;
                }
            }
        }
        Ok(())
    }

    pub fn drop_index_file(&self, table: &str, column: &str) -> Result<()> {
        let slot = self.slot_of(table);
        let colhash = util::fnv1a_full(column);
        self.trees.borrow_mut().pop(&(slot, colhash));
        let path = self.table_dir(table).join(format!("{colhash:08x}.idx"));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn rename_index_file(&self, table: &str, from: &str, to: &str) -> Result<()> {
        let slot = self.slot_of(table);
        let old_hash = util::fnv1a_full(from);
        let new_hash = util::fnv1a_full(to);
        if let Some(tree) = self.trees.borrow_mut().pop(&(slot, old_hash)) {
            tree.save()?;
        }
        let old_path = self.table_dir(table).join(format!("{old_hash:08x}.idx"));
        if old_path.exists() {
            std::fs::rename(
                old_path,
                self.table_dir(table).join(format!("{new_hash:08x}.idx")),
            )?;
        }
        Ok(())
    }

    /// Rename a table: new catalog slot, renamed directory, updated schema
    /// record. The caller updates jb_tables.
    pub fn rename_table(&self, old: &str, new: &str) -> Result<()> {
        let entry = self
            .catalog(old)
            .ok_or_else(|| DbError::NotFound(format!("table '{old}'")))?;
        if self.catalog(new).is_some() || self.slot_occupant(new).is_some() {
            return Err(DbError::DuplicateName(new.to_string()));
        }
        let old_slot = self.slot_of(old);
        if let Some(pool) = self.lake.borrow_mut()[old_slot].take() {
            pool.flush()?;
        }
        // Trees are keyed by slot; drop them and let lookups reload.
        let keys: Vec<(usize, u32)> = self
            .trees
            .borrow()
            .iter()
            .map(|(k, _)| *k)
            .filter(|(s, _)| *s == old_slot)
            .collect();
        for k in keys {
            if let Some(tree) = self.trees.borrow_mut().pop(&k) {
                tree.save()?;
            }
        }
        std::fs::rename(self.table_dir(old), self.table_dir(new))?;
        let mut schema = (*entry.schema).clone();
        schema.name = new.to_string();
        let schema = Rc::new(schema);
        let new_slot = self.slot_of(new);
        let offset = self.schema_file.write_schema(new_slot, &schema)?;
        self.schema_file.clear_slot(old_slot)?;
        self.tc.borrow_mut()[old_slot] = None;
        self.install_entry(CatalogEntry {
            name: new.to_string(),
            table_id: entry.table_id,
            offset,
            schema,
        })
    }

    // ------ defaults ------

    /// Parsed default expression for a column, cached per ( table, column ).
    pub fn default_expr(
        self: &DB,
        table_id: i64,
        schema: &TableSchema,
        ci: usize,
    ) -> Result<Rc<ExprNode>> {
        if let Some(e) = self.defaults.borrow().get(&(table_id, ci)) {
            return Ok(e.clone());
        }
        let text = schema.columns[ci]
            .default_expr
            .clone()
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "default expression for '{}.{}'",
                    schema.name, schema.columns[ci].name
                ))
            })?;
        let expr = Rc::new(self.parse_default(&text)?);
        self.defaults
            .borrow_mut()
            .insert((table_id, ci), expr.clone());
        Ok(expr)
    }

    /// Parse a default expression ( no column context ).
    pub fn parse_default(&self, text: &str) -> Result<ExprNode> {
        let mut p = Parser::new(text, self.as_lookup())?;
        p.parse_expr_unbound()
    }

    pub fn clear_default_cache(&self, table_id: i64) {
        self.defaults
            .borrow_mut()
            .retain(|(tid, _), _| *tid != table_id);
    }

    // ------ WAL ------

    /// Append a redo/undo record ahead of a buffer-pool mutation.
    pub fn wal_append(&self, action: WalAction, table_id: i64, payload: Vec<u8>) -> Result<()> {
        if self.replaying.get() {
            return Ok(());
        }
        if let Some(wal) = &self.wal {
            let txid = self.txid.get();
            self.txid.set(txid + 1);
            wal.append(txid, action, table_id, payload)?;
        }
        Ok(())
    }

    /// Reopen path: redo WAL records above the checkpointed LSN, then load
    /// the user catalog. Replay runs in two phases because user schemas are
    /// themselves read through the meta-tables: first the records against
    /// the ( already installed ) meta-tables, then the rest once the user
    /// tables are loaded. Replay is idempotent: records at or below the
    /// checkpoint are skipped, and re-applying a record reproduces the same
    /// page state.
    fn recover(self: &DB) -> Result<()> {
        let records = match &self.wal {
            Some(wal) => {
                let checkpoint = wal.checkpoint_lsn.get();
                wal.read_all()?
                    .into_iter()
                    .filter(|r| r.lsn > checkpoint)
                    .collect()
            }
            None => Vec::new(),
        };
        let total = records.len();
        let pending = self.apply_wal_records(records)?;
        sys::load_user_tables(self)?;
        let orphans = self.apply_wal_records(pending)?;
        for rec in &orphans {
            log::warn!(
                "wal record {} references unknown table {}",
                rec.lsn,
                rec.table_id
            );
        }
        if total > 0 {
            log::info!("replayed {} wal records", total - orphans.len());
            self.save()?;
        }
        Ok(())
    }

    /// Apply the records whose table is known; returns the rest. Touched
    /// tables get their indexes rebuilt from the replayed rows.
    fn apply_wal_records(self: &DB, records: Vec<wal::WalRecord>) -> Result<Vec<wal::WalRecord>> {
        let mut pending = Vec::new();
        let mut touched = Vec::new();
        self.replaying.set(true);
        let res = (|| -> Result<()> {
            for rec in records {
                let Some(entry) = self.entry_by_id(rec.table_id) else {
                    pending.push(rec);
                    continue;
                };
                let pool = self.pool(&entry.name)?;
                match rec.action {
                    WalAction::Insert => {
                        let row = wal::decode_insert(&entry.schema, &rec.payload)?;
                        pool.apply_row_at(row.id, Some(row.values))?;
                    }
                    WalAction::Update => {
                        let (_, after) = wal::decode_update(&entry.schema, &rec.payload)?;
                        pool.apply_row_at(after.id, Some(after.values))?;
                    }
                    WalAction::Delete => {
                        let row = wal::decode_delete(&entry.schema, &rec.payload)?;
                        pool.apply_row_at(row.id, None)?;
                    }
                }
                if !touched.contains(&entry.name) {
                    touched.push(entry.name.clone());
                }
            }
            for name in &touched {
                self.rebuild_indexes(name)?;
            }
            Ok(())
        })();
        self.replaying.set(false);
        res?;
        Ok(pending)
    }

    // ------ checkpoint / shutdown ------

    /// Flush every dirty page and tree, then checkpoint the WAL.
    pub fn save(&self) -> Result<()> {
        for pool in self.lake.borrow().iter().flatten() {
            pool.flush()?;
        }
        for (_, tree) in self.trees.borrow().iter() {
            tree.save()?;
        }
        if let Some(wal) = &self.wal {
            wal.checkpoint(wal.next_lsn.get() - 1)?;
        }
        log::debug!("checkpoint complete for {}", self.root.display());
        Ok(())
    }
}

impl Drop for Database {
    /// Best-effort flush on shutdown.
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            log::warn!("flush on close failed: {e}");
        }
    }
}
