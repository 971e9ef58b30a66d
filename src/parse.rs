//! SQL parser. Recursive descent with one-token lookahead; statements bind
//! to a `TableSchema` from the catalog while parsing, and column references
//! resolve to positional indexes ( an unknown column is a parse error ).

use crate::error::{DbError, Result};
use crate::expr::{Agg, BinOp, CmpOp, ExprNode, Func};
use crate::lexer::{Lexer, Tok, Token};
use crate::table::{ColumnDef, FkAction, ForeignKey, TableSchema};
use crate::value::{ColumnValue, DataType};
use std::rc::Rc;

/// The parser resolves table names through this seam so it can be driven
/// by the engine or by tests.
pub trait SchemaLookup {
    fn table_schema(&self, name: &str) -> Option<Rc<TableSchema>>;
}

/// ORDER BY key.
#[derive(Clone, Debug)]
pub struct OrderBy {
    pub col: usize,
    pub desc: bool,
}

/// Projected item with its result alias.
#[derive(Clone, Debug)]
pub struct SelectItem {
    pub expr: ExprNode,
    pub alias: String,
}

pub struct SelectCmd {
    pub table: String,
    pub schema: Rc<TableSchema>,
    pub select_all: bool,
    pub items: Vec<SelectItem>,
    pub where_clause: Option<ExprNode>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct InsertCmd {
    pub table: String,
    pub schema: Rc<TableSchema>,
    /// Column positions in the order given, or None for schema order.
    pub columns: Option<Vec<usize>>,
    pub rows: Vec<Vec<ExprNode>>,
    pub returning: Vec<SelectItem>,
    /// `_unsafecon`: skip constraint validation ( bootstrap only ).
    pub unsafe_con: bool,
}

pub struct UpdateCmd {
    pub table: String,
    pub schema: Rc<TableSchema>,
    /// (column, optional array element index, value).
    pub sets: Vec<(usize, Option<ExprNode>, ExprNode)>,
    pub where_clause: Option<ExprNode>,
}

pub struct DeleteCmd {
    pub table: String,
    pub schema: Rc<TableSchema>,
    pub where_clause: Option<ExprNode>,
}

pub struct CreateCmd {
    pub schema: TableSchema,
    pub if_not_exists: bool,
    /// `NO_CONSTRAINTS`: the created table skips constraint registration.
    pub no_constraints: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    pub fn code(self) -> i64 {
        match self {
            ConstraintKind::PrimaryKey => 1,
            ConstraintKind::Unique => 2,
            ConstraintKind::ForeignKey => 3,
            ConstraintKind::Check => 4,
        }
    }

    pub fn from_code(code: i64) -> ConstraintKind {
        match code {
            1 => ConstraintKind::PrimaryKey,
            3 => ConstraintKind::ForeignKey,
            4 => ConstraintKind::Check,
            _ => ConstraintKind::Unique,
        }
    }
}

/// ADD CONSTRAINT payload.
pub struct AlterConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub check_expr: Option<String>,
    pub ref_table: Option<String>,
    pub ref_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

pub enum AlterOp {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { from: String, to: String },
    SetDefault { column: String, expr_text: String },
    DropDefault { column: String },
    SetNotNull { column: String },
    DropNotNull { column: String },
    AddConstraint(AlterConstraint),
    DropConstraint(String),
    RenameConstraint { from: String, to: String },
    RenameTable(String),
    SetOwner(String),
    SetTablespace(String),
}

pub struct AlterCmd {
    pub table: String,
    pub schema: Rc<TableSchema>,
    pub op: AlterOp,
}

/// A parsed statement, bound to its schema.
pub enum Command {
    Create(CreateCmd),
    Alter(AlterCmd),
    Insert(InsertCmd),
    Select(SelectCmd),
    Update(UpdateCmd),
    Delete(DeleteCmd),
}

pub struct Parser<'a> {
    src: &'a str,
    lx: Lexer<'a>,
    cur: Token,
    /// Byte offset where `cur` starts, for slicing expression source text.
    cur_start: usize,
    /// Byte offset just past the last consumed token.
    prev_end: usize,
    db: &'a dyn SchemaLookup,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, db: &'a dyn SchemaLookup) -> Result<Self> {
        let mut lx = Lexer::new(src);
        let st = lx.save();
        let cur = lx.next_token()?;
        let mut p = Parser {
            src,
            lx,
            cur,
            cur_start: st.offset(),
            prev_end: st.offset(),
            db,
        };
        p.cur_start = p.find_cur_start(st.offset());
        Ok(p)
    }

    fn find_cur_start(&self, from: usize) -> usize {
        // Skip whitespace/comments between `from` and the token itself.
        let bytes = self.src.as_bytes();
        let mut i = from;
        while i < bytes.len() {
            match bytes[i] {
                b' ' | b'\t' | b'\r' | b'\n' => i += 1,
                b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                _ => break,
            }
        }
        i
    }

    fn advance(&mut self) -> Result<()> {
        self.prev_end = self.lx.save().offset();
        let st = self.lx.save();
        self.cur = self.lx.next_token()?;
        self.cur_start = self.find_cur_start(st.offset());
        Ok(())
    }

    fn err(&self, msg: impl Into<String>) -> DbError {
        DbError::Syntax {
            msg: msg.into(),
            line: self.cur.line,
            column: self.cur.col,
        }
    }

    fn accept(&mut self, t: &Tok) -> Result<bool> {
        if self.cur.tok == *t {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, t: &Tok, what: &str) -> Result<()> {
        if self.cur.tok == *t {
            self.advance()
        } else {
            Err(self.err(format!("expected {what}, got {:?}", self.cur.tok)))
        }
    }

    fn accept_kw(&mut self, kw: &str) -> Result<bool> {
        if self.cur.is_kw(kw) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.cur.is_kw(kw) {
            self.advance()
        } else {
            Err(self.err(format!("expected {kw}, got {:?}", self.cur.tok)))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match &self.cur.tok {
            Tok::Id(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(s)
            }
            _ => Err(self.err(format!("expected {what}, got {:?}", self.cur.tok))),
        }
    }

    fn bind_schema(&self, table: &str) -> Result<Rc<TableSchema>> {
        self.db
            .table_schema(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{table}'")))
    }

    /// Parse one statement; None at end of input. A trailing semicolon is
    /// consumed so the caller can loop.
    pub fn parse_statement(&mut self) -> Result<Option<Command>> {
        while self.cur.tok == Tok::Semi {
            self.advance()?;
        }
        if self.cur.tok == Tok::Eof {
            return Ok(None);
        }
        let unsafe_con = if self.cur.tok == Tok::UnsafeCon {
            self.advance()?;
            true
        } else {
            false
        };
        let cmd = if self.accept_kw("CREATE")? {
            Command::Create(self.parse_create()?)
        } else if self.accept_kw("ALTER")? {
            Command::Alter(self.parse_alter()?)
        } else if self.accept_kw("INSERT")? {
            Command::Insert(self.parse_insert(unsafe_con)?)
        } else if self.accept_kw("SELECT")? {
            Command::Select(self.parse_select()?)
        } else if self.accept_kw("UPDATE")? {
            Command::Update(self.parse_update()?)
        } else if self.accept_kw("DELETE")? {
            Command::Delete(self.parse_delete()?)
        } else {
            return Err(self.err(format!("statement keyword expected, got {:?}", self.cur.tok)));
        };
        if self.cur.tok == Tok::Semi {
            self.advance()?;
        }
        Ok(Some(cmd))
    }

    // ------ CREATE ------

    fn parse_create(&mut self) -> Result<CreateCmd> {
        let no_constraints = self.accept_kw("NO_CONSTRAINTS")?;
        self.expect_kw("TABLE")?;
        let mut if_not_exists = false;
        if self.accept_kw("IF")? {
            self.expect_kw("NOT")?;
            self.expect_kw("EXISTS")?;
            if_not_exists = true;
        }
        let name = self.ident("table name")?;
        self.expect(&Tok::LParen, "'('")?;
        let mut columns: Vec<ColumnDef> = Vec::new();
        loop {
            let col = self.parse_column_def(&name, &columns)?;
            columns.push(col);
            if !self.accept(&Tok::Comma)? {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(CreateCmd {
            schema: TableSchema::new(&name, columns),
            if_not_exists,
            no_constraints,
        })
    }

    fn parse_column_def(&mut self, _table: &str, prior: &[ColumnDef]) -> Result<ColumnDef> {
        let name = self.ident("column name")?;
        if prior.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            return Err(self.err(format!("duplicate column '{name}'")));
        }
        let (typ, varchar_len, prec, scale) = self.parse_data_type()?;
        let mut col = ColumnDef::new(&name, typ);
        col.varchar_len = varchar_len;
        col.dec_precision = prec;
        col.dec_scale = scale;
        if self.accept(&Tok::LBracket)? {
            self.expect(&Tok::RBracket, "']'")?;
            col.is_array = true;
        }
        // Constraint words, in any order.
        loop {
            if self.accept_kw("PRIMKEY")? {
                col.is_primary = true;
                col.not_null = true;
            } else if self.accept_kw("UNIQUE")? {
                col.is_unique = true;
            } else if self.accept_kw("NOT")? {
                if self.cur.tok == Tok::Null {
                    self.advance()?;
                    col.not_null = true;
                } else {
                    return Err(self.err("expected NULL after NOT"));
                }
            } else if self.accept_kw("DEFAULT")? {
                let start = self.cur_start;
                // Parse for validation; the text is what gets stored.
                self.parse_expr_unbound()?;
                col.has_default = true;
                col.default_expr = Some(self.src[start..self.prev_end].trim().to_string());
            } else if self.accept_kw("CHECK")? {
                self.expect(&Tok::LParen, "'('")?;
                let start = self.cur_start;
                let mut cols = prior.to_vec();
                cols.push(col.clone());
                let probe = TableSchema::new("check", cols);
                self.parse_expr(&probe)?;
                col.check_expr = Some(self.src[start..self.prev_end].trim().to_string());
                self.expect(&Tok::RParen, "')'")?;
            } else if self.accept_kw("FOREIGN")? {
                self.expect_kw("KEY")?;
                self.expect_kw("REFERENCES")?;
                let ref_table = self.ident("referenced table")?;
                self.expect(&Tok::LParen, "'('")?;
                let ref_column = self.ident("referenced column")?;
                self.expect(&Tok::RParen, "')'")?;
                let mut fk = ForeignKey {
                    table: ref_table,
                    column: ref_column,
                    on_delete: FkAction::NoAction,
                    on_update: FkAction::NoAction,
                };
                while self.accept_kw("ON")? {
                    let which_delete = if self.accept_kw("DELETE")? {
                        true
                    } else {
                        self.expect_kw("UPDATE")?;
                        false
                    };
                    let action = self.parse_fk_action()?;
                    if which_delete {
                        fk.on_delete = action;
                    } else {
                        fk.on_update = action;
                    }
                }
                col.fk = Some(fk);
            } else if self.accept_kw("INDEX")? {
                col.is_index = true;
            } else {
                break;
            }
        }
        Ok(col)
    }

    fn parse_fk_action(&mut self) -> Result<FkAction> {
        if self.accept_kw("CASCADE")? {
            Ok(FkAction::Cascade)
        } else if self.accept_kw("RESTRICT")? {
            Ok(FkAction::Restrict)
        } else if self.accept_kw("SET")? {
            if self.cur.tok == Tok::Null {
                self.advance()?;
                Ok(FkAction::SetNull)
            } else {
                Err(self.err("expected NULL after SET"))
            }
        } else if self.accept_kw("NO")? {
            self.expect_kw("ACTION")?;
            Ok(FkAction::NoAction)
        } else {
            Err(self.err("expected NO ACTION, CASCADE, RESTRICT or SET NULL"))
        }
    }

    fn parse_data_type(&mut self) -> Result<(DataType, u8, u8, u8)> {
        let name = self.ident("type name")?;
        let typ = match name.to_ascii_uppercase().as_str() {
            "INT" => DataType::Int,
            "UINT" => DataType::Uint,
            "SERIAL" => DataType::Serial,
            "FLOAT" => DataType::Float,
            "DOUBLE" => DataType::Double,
            "DECIMAL" => DataType::Decimal,
            "BOOL" => DataType::Bool,
            "CHAR" => DataType::Char,
            "VARCHAR" => DataType::VarChar,
            "TEXT" => DataType::Text,
            "JSON" => DataType::Json,
            "BLOB" => DataType::Blob,
            "UUID" => DataType::Uuid,
            "DATE" => DataType::Date,
            "TIME" => DataType::Time,
            "TIMETZ" => DataType::TimeTz,
            "DATETIME" => DataType::DateTime,
            "DATETIMETZ" => DataType::DateTimeTz,
            "TIMESTAMP" => DataType::Timestamp,
            "TIMESTAMPTZ" => DataType::TimestampTz,
            "INTERVAL" => DataType::Interval,
            _ => return Err(self.err(format!("unknown type '{name}'"))),
        };
        let mut varchar_len = 0u8;
        let mut prec = 0u8;
        let mut scale = 0u8;
        if self.cur.tok == Tok::LParen && matches!(typ, DataType::VarChar | DataType::Decimal) {
            self.advance()?;
            let n = self.int_lit("type parameter")?;
            match typ {
                DataType::VarChar => {
                    if !(1..=255).contains(&n) {
                        return Err(self.err("VARCHAR length must be between 1 and 255"));
                    }
                    varchar_len = n as u8;
                }
                DataType::Decimal => {
                    prec = n as u8;
                    if self.accept(&Tok::Comma)? {
                        scale = self.int_lit("decimal scale")? as u8;
                    }
                }
                _ => unreachable!(),
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        Ok((typ, varchar_len, prec, scale))
    }

    fn int_lit(&mut self, what: &str) -> Result<i64> {
        match self.cur.tok {
            Tok::IntLit(n) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.err(format!("expected {what}"))),
        }
    }

    // ------ ALTER ------

    fn parse_alter(&mut self) -> Result<AlterCmd> {
        self.expect_kw("TABLE")?;
        let table = self.ident("table name")?;
        let schema = self.bind_schema(&table)?;
        let op = if self.accept_kw("ADD")? {
            if self.accept_kw("COLUMN")? {
                let col = self.parse_column_def(&table, &schema.columns)?;
                AlterOp::AddColumn(col)
            } else {
                self.expect_kw("CONSTRAINT")?;
                AlterOp::AddConstraint(self.parse_add_constraint(&schema)?)
            }
        } else if self.accept_kw("DROP")? {
            if self.accept_kw("COLUMN")? {
                AlterOp::DropColumn(self.ident("column name")?)
            } else {
                self.expect_kw("CONSTRAINT")?;
                AlterOp::DropConstraint(self.ident("constraint name")?)
            }
        } else if self.accept_kw("RENAME")? {
            if self.accept_kw("COLUMN")? {
                let from = self.ident("column name")?;
                self.expect_kw("TO")?;
                let to = self.ident("new column name")?;
                AlterOp::RenameColumn { from, to }
            } else if self.accept_kw("CONSTRAINT")? {
                let from = self.ident("constraint name")?;
                self.expect_kw("TO")?;
                let to = self.ident("new constraint name")?;
                AlterOp::RenameConstraint { from, to }
            } else {
                self.expect_kw("TO")?;
                AlterOp::RenameTable(self.ident("new table name")?)
            }
        } else if self.accept_kw("ALTER")? {
            self.accept_kw("COLUMN")?;
            let column = self.ident("column name")?;
            if self.accept_kw("SET")? {
                if self.accept_kw("DEFAULT")? {
                    let start = self.cur_start;
                    self.parse_expr_unbound()?;
                    AlterOp::SetDefault {
                        column,
                        expr_text: self.src[start..self.prev_end].trim().to_string(),
                    }
                } else {
                    self.expect_kw("NOT")?;
                    if self.cur.tok != Tok::Null {
                        return Err(self.err("expected NULL after NOT"));
                    }
                    self.advance()?;
                    AlterOp::SetNotNull { column }
                }
            } else {
                self.expect_kw("DROP")?;
                if self.accept_kw("DEFAULT")? {
                    AlterOp::DropDefault { column }
                } else {
                    self.expect_kw("NOT")?;
                    if self.cur.tok != Tok::Null {
                        return Err(self.err("expected NULL after NOT"));
                    }
                    self.advance()?;
                    AlterOp::DropNotNull { column }
                }
            }
        } else if self.accept_kw("SET")? {
            if self.accept_kw("OWNER")? {
                self.expect_kw("TO")?;
                AlterOp::SetOwner(self.ident("owner")?)
            } else {
                self.expect_kw("TABLESPACE")?;
                AlterOp::SetTablespace(self.ident("tablespace")?)
            }
        } else {
            return Err(self.err("unknown ALTER TABLE operation"));
        };
        Ok(AlterCmd { table, schema, op })
    }

    fn parse_add_constraint(&mut self, schema: &TableSchema) -> Result<AlterConstraint> {
        let name = self.ident("constraint name")?;
        let mut c = AlterConstraint {
            name,
            kind: ConstraintKind::Unique,
            columns: Vec::new(),
            check_expr: None,
            ref_table: None,
            ref_columns: Vec::new(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        };
        if self.accept_kw("PRIMKEY")? {
            c.kind = ConstraintKind::PrimaryKey;
            c.columns = self.parse_name_list()?;
        } else if self.accept_kw("UNIQUE")? {
            c.kind = ConstraintKind::Unique;
            c.columns = self.parse_name_list()?;
        } else if self.accept_kw("CHECK")? {
            c.kind = ConstraintKind::Check;
            self.expect(&Tok::LParen, "'('")?;
            let start = self.cur_start;
            self.parse_expr(schema)?;
            c.check_expr = Some(self.src[start..self.prev_end].trim().to_string());
            self.expect(&Tok::RParen, "')'")?;
        } else if self.accept_kw("FOREIGN")? {
            self.expect_kw("KEY")?;
            c.kind = ConstraintKind::ForeignKey;
            c.columns = self.parse_name_list()?;
            self.expect_kw("REFERENCES")?;
            c.ref_table = Some(self.ident("referenced table")?);
            c.ref_columns = self.parse_name_list()?;
            while self.accept_kw("ON")? {
                let is_delete = if self.accept_kw("DELETE")? {
                    true
                } else {
                    self.expect_kw("UPDATE")?;
                    false
                };
                let action = self.parse_fk_action()?;
                if is_delete {
                    c.on_delete = action;
                } else {
                    c.on_update = action;
                }
            }
        } else {
            return Err(self.err("expected PRIMKEY, UNIQUE, CHECK or FOREIGN KEY"));
        }
        Ok(c)
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>> {
        self.expect(&Tok::LParen, "'('")?;
        let mut names = Vec::new();
        loop {
            names.push(self.ident("column name")?);
            if !self.accept(&Tok::Comma)? {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(names)
    }

    // ------ INSERT ------

    fn parse_insert(&mut self, mut unsafe_con: bool) -> Result<InsertCmd> {
        if self.cur.tok == Tok::UnsafeCon {
            self.advance()?;
            unsafe_con = true;
        }
        self.expect_kw("INTO")?;
        let table = self.ident("table name")?;
        let schema = self.bind_schema(&table)?;
        let columns = if self.cur.tok == Tok::LParen {
            let names = self.parse_name_list()?;
            let mut idx = Vec::with_capacity(names.len());
            for n in &names {
                idx.push(
                    schema
                        .find_col(n)
                        .ok_or_else(|| self.err(format!("unknown column '{n}'")))?,
                );
            }
            Some(idx)
        } else {
            None
        };
        self.expect_kw("VALUES")?;
        let expected = columns.as_ref().map_or(schema.columns.len(), |c| c.len());
        let mut rows = Vec::new();
        loop {
            self.expect(&Tok::LParen, "'('")?;
            let mut exprs = Vec::new();
            loop {
                exprs.push(self.parse_expr(&schema)?);
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
            if exprs.len() != expected {
                return Err(self.err(format!(
                    "expected {expected} values per row, got {}",
                    exprs.len()
                )));
            }
            rows.push(exprs);
            if !self.accept(&Tok::Comma)? {
                break;
            }
        }
        let mut returning = Vec::new();
        if self.accept_kw("RETURNING")? {
            returning = self.parse_select_items(&schema)?;
        }
        Ok(InsertCmd {
            table,
            schema,
            columns,
            rows,
            returning,
            unsafe_con,
        })
    }

    // ------ SELECT ------

    fn parse_select(&mut self) -> Result<SelectCmd> {
        // The projection precedes FROM, but columns resolve against the
        // bound schema, so peek ahead for the table name first.
        let st = self.lx.save();
        let saved_cur = self.cur.clone();
        let saved_start = self.cur_start;
        let saved_end = self.prev_end;
        let mut depth = 0usize;
        loop {
            match &self.cur.tok {
                Tok::Eof => return Err(self.err("expected FROM")),
                Tok::LParen => depth += 1,
                Tok::RParen => depth = depth.saturating_sub(1),
                Tok::Id(s) if depth == 0 && s.eq_ignore_ascii_case("FROM") => break,
                _ => {}
            }
            self.advance()?;
        }
        self.advance()?; // past FROM
        let table = self.ident("table name")?;
        let schema = self.bind_schema(&table)?;
        self.lx.restore(st);
        self.cur = saved_cur;
        self.cur_start = saved_start;
        self.prev_end = saved_end;

        let (select_all, items) = if self.cur.tok == Tok::Star {
            self.advance()?;
            (true, Vec::new())
        } else {
            (false, self.parse_select_items(&schema)?)
        };
        self.expect_kw("FROM")?;
        let _ = self.ident("table name")?;
        let where_clause = if self.accept_kw("WHERE")? {
            Some(self.parse_expr(&schema)?)
        } else {
            None
        };
        let mut order_by = Vec::new();
        if self.accept_kw("ORDER")? {
            self.expect_kw("BY")?;
            loop {
                let name = self.ident("column name")?;
                let col = schema
                    .find_col(&name)
                    .ok_or_else(|| self.err(format!("unknown column '{name}'")))?;
                let desc = if self.accept_kw("DESC")? {
                    true
                } else {
                    self.accept_kw("ASC")?;
                    false
                };
                order_by.push(OrderBy { col, desc });
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
        }
        let mut limit = None;
        let mut offset = None;
        loop {
            if self.accept_kw("LIM")? || self.accept_kw("LIMIT")? {
                limit = Some(self.int_lit("limit")? as u32);
            } else if self.accept_kw("OFF")? || self.accept_kw("OFFSET")? {
                offset = Some(self.int_lit("offset")? as u32);
            } else {
                break;
            }
        }
        Ok(SelectCmd {
            table,
            schema,
            select_all,
            items,
            where_clause,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_items(&mut self, schema: &TableSchema) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            let start = self.cur_start;
            let expr = self.parse_expr(schema)?;
            let alias = if self.accept_kw("AS")? {
                self.ident("alias")?
            } else {
                default_alias(&expr, schema, self.src[start..self.prev_end].trim())
            };
            items.push(SelectItem { expr, alias });
            if !self.accept(&Tok::Comma)? {
                break;
            }
        }
        Ok(items)
    }

    // ------ UPDATE / DELETE ------

    fn parse_update(&mut self) -> Result<UpdateCmd> {
        let table = self.ident("table name")?;
        let schema = self.bind_schema(&table)?;
        self.expect_kw("SET")?;
        let mut sets = Vec::new();
        loop {
            let name = self.ident("column name")?;
            let col = schema
                .find_col(&name)
                .ok_or_else(|| self.err(format!("unknown column '{name}'")))?;
            let array_idx = if self.accept(&Tok::LBracket)? {
                let idx = self.parse_expr(&schema)?;
                self.expect(&Tok::RBracket, "']'")?;
                Some(idx)
            } else {
                None
            };
            self.expect(&Tok::Eq, "'='")?;
            let value = self.parse_expr(&schema)?;
            sets.push((col, array_idx, value));
            if !self.accept(&Tok::Comma)? {
                break;
            }
        }
        let where_clause = if self.accept_kw("WHERE")? {
            Some(self.parse_expr(&schema)?)
        } else {
            None
        };
        Ok(UpdateCmd {
            table,
            schema,
            sets,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteCmd> {
        self.expect_kw("FROM")?;
        let table = self.ident("table name")?;
        let schema = self.bind_schema(&table)?;
        let where_clause = if self.accept_kw("WHERE")? {
            Some(self.parse_expr(&schema)?)
        } else {
            None
        };
        Ok(DeleteCmd {
            table,
            schema,
            where_clause,
        })
    }

    // ------ expressions ------

    /// Parse an expression with no column context ( defaults ).
    pub fn parse_expr_unbound(&mut self) -> Result<ExprNode> {
        let empty = TableSchema::new("", Vec::new());
        self.parse_expr(&empty)
    }

    pub fn parse_expr(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        self.parse_or(schema)
    }

    fn parse_or(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        let mut left = self.parse_and(schema)?;
        while self.accept_kw("OR")? {
            let right = self.parse_and(schema)?;
            left = ExprNode::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        let mut left = self.parse_not(schema)?;
        while self.accept_kw("AND")? {
            let right = self.parse_not(schema)?;
            left = ExprNode::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        if self.accept_kw("NOT")? {
            Ok(ExprNode::Not(Box::new(self.parse_not(schema)?)))
        } else {
            self.parse_predicate(schema)
        }
    }

    fn parse_predicate(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        let left = self.parse_addsub(schema)?;
        if self.accept_kw("LIKE")? {
            let pattern = match &self.cur.tok {
                Tok::StrLit(s) => s.clone(),
                _ => return Err(self.err("LIKE expects a string pattern")),
            };
            self.advance()?;
            return Ok(ExprNode::Like {
                left: Box::new(left),
                pattern,
            });
        }
        if self.accept_kw("BETWEEN")? {
            let lower = self.parse_addsub(schema)?;
            self.expect_kw("AND")?;
            let upper = self.parse_addsub(schema)?;
            return Ok(ExprNode::Between {
                value: Box::new(left),
                lower: Box::new(lower),
                upper: Box::new(upper),
            });
        }
        if self.accept_kw("IN")? {
            self.expect(&Tok::LParen, "'('")?;
            let mut list = Vec::new();
            loop {
                list.push(self.parse_addsub(schema)?);
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
            return Ok(ExprNode::In {
                value: Box::new(left),
                list,
            });
        }
        let op = match self.cur.tok {
            Tok::Eq => CmpOp::Eq,
            Tok::Neq => CmpOp::Ne,
            Tok::Lt => CmpOp::Lt,
            Tok::Gt => CmpOp::Gt,
            Tok::Le => CmpOp::Le,
            Tok::Ge => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_addsub(schema)?;
        Ok(ExprNode::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_addsub(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        let mut left = self.parse_muldiv(schema)?;
        loop {
            let op = match self.cur.tok {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_muldiv(schema)?;
            left = ExprNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_muldiv(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        let mut left = self.parse_unary(schema)?;
        loop {
            let op = match self.cur.tok {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary(schema)?;
            left = ExprNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        if self.accept(&Tok::Minus)? {
            Ok(ExprNode::Neg(Box::new(self.parse_unary(schema)?)))
        } else if self.accept(&Tok::Plus)? {
            self.parse_unary(schema)
        } else {
            self.parse_primary(schema)
        }
    }

    fn parse_primary(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        match self.cur.tok.clone() {
            Tok::IntLit(n) => {
                self.advance()?;
                Ok(ExprNode::Literal(ColumnValue::Int(n)))
            }
            Tok::FloatLit(x) => {
                self.advance()?;
                Ok(ExprNode::Literal(ColumnValue::Double(x)))
            }
            Tok::StrLit(s) => {
                self.advance()?;
                Ok(ExprNode::Literal(ColumnValue::Str(s)))
            }
            Tok::BoolLit(b) => {
                self.advance()?;
                Ok(ExprNode::Literal(ColumnValue::Bool(b)))
            }
            Tok::Null => {
                self.advance()?;
                Ok(ExprNode::Literal(ColumnValue::Null))
            }
            Tok::LParen => {
                self.advance()?;
                let e = self.parse_expr(schema)?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::LBrace => self.parse_array_literal(schema),
            Tok::Id(name) => {
                self.advance()?;
                if self.cur.tok == Tok::LParen {
                    return self.parse_call(&name, schema);
                }
                let index = schema
                    .find_col(&name)
                    .ok_or_else(|| self.err(format!("unknown column '{name}'")))?;
                if self.accept(&Tok::LBracket)? {
                    let idx = self.parse_expr(schema)?;
                    self.expect(&Tok::RBracket, "']'")?;
                    Ok(ExprNode::Column {
                        index,
                        array_idx: Some(Box::new(idx)),
                    })
                } else {
                    Ok(ExprNode::Column {
                        index,
                        array_idx: None,
                    })
                }
            }
            t => Err(self.err(format!("unexpected token {t:?} in expression"))),
        }
    }

    fn parse_array_literal(&mut self, schema: &TableSchema) -> Result<ExprNode> {
        self.expect(&Tok::LBrace, "'{'")?;
        let mut elems = Vec::new();
        if self.cur.tok != Tok::RBrace {
            loop {
                match self.parse_expr(schema)? {
                    ExprNode::Literal(v) => elems.push(v),
                    ExprNode::Neg(e) => match *e {
                        ExprNode::Literal(ColumnValue::Int(n)) => {
                            elems.push(ColumnValue::Int(-n))
                        }
                        ExprNode::Literal(ColumnValue::Double(x)) => {
                            elems.push(ColumnValue::Double(-x))
                        }
                        _ => return Err(self.err("array literals may only contain literals")),
                    },
                    _ => return Err(self.err("array literals may only contain literals")),
                }
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Tok::RBrace, "'}'")?;
        let elem_t = elems
            .iter()
            .find_map(|e| e.kind())
            .unwrap_or(DataType::Int);
        Ok(ExprNode::Literal(ColumnValue::Array(elems, elem_t)))
    }

    fn parse_call(&mut self, name: &str, schema: &TableSchema) -> Result<ExprNode> {
        self.expect(&Tok::LParen, "'('")?;
        if let Some(agg) = Agg::from_name(name) {
            // COUNT(*) and friends reduce over the whole result set.
            if agg == Agg::Count && self.cur.tok == Tok::Star {
                self.advance()?;
                self.expect(&Tok::RParen, "')'")?;
                return Ok(ExprNode::Aggregate { agg, arg: None });
            }
            let arg = self.parse_expr(schema)?;
            self.expect(&Tok::RParen, "')'")?;
            return Ok(ExprNode::Aggregate {
                agg,
                arg: Some(Box::new(arg)),
            });
        }
        let f = Func::from_name(name)
            .ok_or_else(|| self.err(format!("unknown function '{name}'")))?;
        let mut args = Vec::new();
        if f == Func::Cast {
            // CAST(expr AS TYPE)
            args.push(self.parse_expr(schema)?);
            self.expect_kw("AS")?;
            let (t, _, _, _) = self.parse_data_type()?;
            args.push(ExprNode::Literal(ColumnValue::Str(t.name().to_string())));
        } else if f == Func::Extract {
            // EXTRACT(field FROM expr), with the comma form accepted too.
            let field = match &self.cur.tok {
                Tok::Id(s) => s.clone(),
                Tok::StrLit(s) => s.clone(),
                _ => return Err(self.err("EXTRACT expects a field name")),
            };
            self.advance()?;
            args.push(ExprNode::Literal(ColumnValue::Str(field)));
            if !self.accept_kw("FROM")? {
                self.expect(&Tok::Comma, "','")?;
            }
            args.push(self.parse_expr(schema)?);
        } else if self.cur.tok != Tok::RParen {
            loop {
                args.push(self.parse_expr(schema)?);
                if !self.accept(&Tok::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(ExprNode::Func { f, args })
    }
}

/// Result column alias when no `AS` is given: the column name for plain
/// references, `name[index]` for array access, otherwise the source text.
fn default_alias(expr: &ExprNode, schema: &TableSchema, src_text: &str) -> String {
    match expr {
        ExprNode::Column {
            index,
            array_idx: None,
        } => schema.columns[*index].name.clone(),
        ExprNode::Column {
            index,
            array_idx: Some(idx),
        } => {
            let name = &schema.columns[*index].name;
            match &**idx {
                ExprNode::Literal(v) => format!("{name}[{v}]"),
                _ => format!("{name}[..]"),
            }
        }
        _ => src_text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    struct Tables {
        map: FxHashMap<String, Rc<TableSchema>>,
    }

    impl SchemaLookup for Tables {
        fn table_schema(&self, name: &str) -> Option<Rc<TableSchema>> {
            self.map.get(name).cloned()
        }
    }

    fn fixture() -> Tables {
        let mut id = ColumnDef::new("id", DataType::Serial);
        id.is_primary = true;
        id.not_null = true;
        let mut name = ColumnDef::new("name", DataType::VarChar);
        name.varchar_len = 20;
        let salary = ColumnDef::new("salary", DataType::Double);
        let tags = {
            let mut t = ColumnDef::new("tags", DataType::Text);
            t.is_array = true;
            t
        };
        let schema = Rc::new(TableSchema::new(
            "employees",
            vec![id, name, salary, tags],
        ));
        let mut map = FxHashMap::default();
        map.insert("employees".to_string(), schema);
        Tables { map }
    }

    fn parse_one(sql: &str) -> Command {
        let db = fixture();
        let mut p = Parser::new(sql, &db).unwrap();
        p.parse_statement().unwrap().unwrap()
    }

    #[test]
    fn select_binds_columns_positionally() {
        let cmd = parse_one("SELECT name, salary FROM employees WHERE id = 3 ORDER BY salary DESC LIM 5 OFF 2;");
        let sel = match cmd {
            Command::Select(s) => s,
            _ => panic!("expected select"),
        };
        assert_eq!(sel.items.len(), 2);
        assert_eq!(sel.items[0].alias, "name");
        assert!(matches!(
            sel.items[1].expr,
            ExprNode::Column { index: 2, .. }
        ));
        assert_eq!(sel.limit, Some(5));
        assert_eq!(sel.offset, Some(2));
        assert!(sel.order_by[0].desc);
        let where_clause = sel.where_clause.unwrap();
        let (col, v) = where_clause.as_eq_literal().unwrap();
        assert_eq!(col, 0);
        assert_eq!(*v, ColumnValue::Int(3));
    }

    #[test]
    fn unknown_column_is_a_parse_error() {
        let db = fixture();
        let mut p = Parser::new("SELECT nope FROM employees;", &db).unwrap();
        assert!(matches!(
            p.parse_statement(),
            Err(DbError::Syntax { .. })
        ));
    }

    #[test]
    fn create_with_constraints() {
        let cmd = parse_one(
            "CREATE TABLE IF NOT EXISTS orders (id SERIAL PRIMKEY, who INT NOT NULL FOREIGN KEY REFERENCES employees(id) ON DELETE CASCADE, total DECIMAL(10,2) DEFAULT 0, note VARCHAR(40));",
        );
        let c = match cmd {
            Command::Create(c) => c,
            _ => panic!("expected create"),
        };
        assert!(c.if_not_exists);
        let cols = &c.schema.columns;
        assert!(cols[0].is_primary && cols[0].has_sequence);
        let fk = cols[1].fk.as_ref().unwrap();
        assert_eq!(fk.table, "employees");
        assert_eq!(fk.on_delete, FkAction::Cascade);
        assert_eq!(cols[2].dec_precision, 10);
        assert_eq!(cols[2].default_expr.as_deref(), Some("0"));
        assert_eq!(cols[3].varchar_len, 40);
        assert_eq!(c.schema.prim_count, 1);
    }

    #[test]
    fn insert_with_returning_and_unsafecon() {
        let cmd = parse_one("INSERT _unsafecon INTO employees(name) VALUES ('a'), ('b') RETURNING id;");
        let ins = match cmd {
            Command::Insert(i) => i,
            _ => panic!("expected insert"),
        };
        assert!(ins.unsafe_con);
        assert_eq!(ins.columns.as_deref(), Some(&[1usize][..]));
        assert_eq!(ins.rows.len(), 2);
        assert_eq!(ins.returning[0].alias, "id");
    }

    #[test]
    fn expression_precedence() {
        let cmd = parse_one("SELECT id FROM employees WHERE salary + 1 * 2 = 3 AND NOT id = 4 OR id = 5;");
        let sel = match cmd {
            Command::Select(s) => s,
            _ => panic!(),
        };
        // ((salary + (1*2) = 3 AND NOT (id=4)) OR id=5)
        match sel.where_clause.unwrap() {
            ExprNode::Or(left, _) => match *left {
                ExprNode::And(a, b) => {
                    assert!(matches!(*a, ExprNode::Compare { .. }));
                    assert!(matches!(*b, ExprNode::Not(_)));
                }
                _ => panic!("expected AND under OR"),
            },
            _ => panic!("expected OR at top"),
        }
    }

    #[test]
    fn aggregates_and_functions() {
        let cmd = parse_one("SELECT COUNT(*), UPPER(name), salary * 1.1 AS bumped FROM employees;");
        let sel = match cmd {
            Command::Select(s) => s,
            _ => panic!(),
        };
        assert!(matches!(
            sel.items[0].expr,
            ExprNode::Aggregate {
                agg: Agg::Count,
                arg: None
            }
        ));
        assert_eq!(sel.items[0].alias, "COUNT(*)");
        assert!(matches!(sel.items[1].expr, ExprNode::Func { f: Func::Upper, .. }));
        assert_eq!(sel.items[2].alias, "bumped");
    }

    #[test]
    fn array_literal_and_access() {
        let cmd = parse_one("UPDATE employees SET tags = {'a','b'} WHERE tags[0] = 'a';");
        let up = match cmd {
            Command::Update(u) => u,
            _ => panic!(),
        };
        assert!(matches!(
            up.sets[0].2,
            ExprNode::Literal(ColumnValue::Array(_, DataType::Text))
        ));
        match up.where_clause.unwrap() {
            ExprNode::Compare { left, .. } => {
                assert!(matches!(*left, ExprNode::Column { array_idx: Some(_), .. }))
            }
            _ => panic!(),
        }
    }

    #[test]
    fn alter_forms() {
        let db = fixture();
        for sql in [
            "ALTER TABLE employees ADD COLUMN age INT DEFAULT 18;",
            "ALTER TABLE employees DROP COLUMN name;",
            "ALTER TABLE employees RENAME COLUMN name TO full_name;",
            "ALTER TABLE employees ALTER COLUMN name SET NOT NULL;",
            "ALTER TABLE employees ALTER COLUMN name DROP DEFAULT;",
            "ALTER TABLE employees ADD CONSTRAINT chk CHECK (salary > 0);",
            "ALTER TABLE employees DROP CONSTRAINT chk;",
            "ALTER TABLE employees RENAME TO people;",
            "ALTER TABLE employees SET OWNER TO root;",
            "ALTER TABLE employees SET TABLESPACE fast;",
        ] {
            let mut p = Parser::new(sql, &db).unwrap();
            assert!(
                matches!(p.parse_statement().unwrap(), Some(Command::Alter(_))),
                "failed: {sql}"
            );
        }
    }
}
