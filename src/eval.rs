//! Bottom-up expression evaluation. Literals pass through ( TOAST
//! references are reassembled transparently ), column references index the
//! current row, arithmetic coerces to a common numeric type, and date/time
//! arithmetic follows its own rules.

use crate::datetime::{self, Interval, Timestamp, MICROS_PER_SEC};
use crate::error::{DbError, Result};
use crate::expr::{Agg, BinOp, CmpOp, ExprNode, Func};
use crate::table::TableSchema;
use crate::toast;
use crate::value::{ColumnValue, DataType};
use crate::DB;
use rand::Rng;
use std::cmp::Ordering;

/// Microseconds between 1970-01-01 and the engine epoch 2000-01-01.
const UNIX_TO_ENGINE_EPOCH: i64 = 946_684_800 * MICROS_PER_SEC;

/// The current time as an engine timestamp.
pub fn now_timestamp() -> Timestamp {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    Timestamp {
        micros: unix - UNIX_TO_ENGINE_EPOCH,
    }
}

/// Evaluate an expression against an optional row context.
pub fn eval(
    db: &DB,
    expr: &ExprNode,
    row: Option<&[ColumnValue]>,
    schema: &TableSchema,
) -> Result<ColumnValue> {
    match expr {
        ExprNode::Literal(v) => toast::detoast(db, v.clone()),
        ExprNode::Column { index, array_idx } => {
            let row = row.ok_or_else(|| {
                DbError::Type("column reference outside a row context".to_string())
            })?;
            let v = row
                .get(*index)
                .cloned()
                .unwrap_or(ColumnValue::Null);
            let v = toast::detoast(db, v)?;
            match array_idx {
                None => Ok(v),
                Some(idx) => {
                    let i = eval(db, idx, Some(row), schema)?.int()?;
                    match v {
                        ColumnValue::Array(elems, _) => Ok(elems
                            .get(i as usize)
                            .cloned()
                            .unwrap_or(ColumnValue::Null)),
                        ColumnValue::Null => Ok(ColumnValue::Null),
                        _ => Err(DbError::Type(format!(
                            "column '{}' is not an array",
                            schema.columns[*index].name
                        ))),
                    }
                }
            }
        }
        ExprNode::Neg(e) => {
            let v = eval(db, e, row, schema)?;
            match v {
                ColumnValue::Null => Ok(ColumnValue::Null),
                ColumnValue::Int(x) => Ok(ColumnValue::Int(-x)),
                ColumnValue::Float(x) => Ok(ColumnValue::Float(-x)),
                ColumnValue::Double(x) => Ok(ColumnValue::Double(-x)),
                ColumnValue::Interval(iv) => Ok(ColumnValue::Interval(Interval {
                    months: -iv.months,
                    days: -iv.days,
                    micros: -iv.micros,
                })),
                other => Err(DbError::Type(format!("cannot negate {other}"))),
            }
        }
        ExprNode::Binary { op, left, right } => {
            let l = eval(db, left, row, schema)?;
            let r = eval(db, right, row, schema)?;
            binary_op(*op, l, r)
        }
        ExprNode::Compare { op, left, right } => {
            let l = eval(db, left, row, schema)?;
            let r = eval(db, right, row, schema)?;
            if l.is_null() || r.is_null() {
                return Ok(ColumnValue::Bool(false));
            }
            let ord = compare_coerced(&l, &r)?;
            let res = match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
            };
            Ok(ColumnValue::Bool(res))
        }
        ExprNode::Like { left, pattern } => {
            let l = eval(db, left, row, schema)?;
            match l {
                ColumnValue::Null => Ok(ColumnValue::Bool(false)),
                ColumnValue::Str(s) => Ok(ColumnValue::Bool(like_match(&s, pattern))),
                other => Err(DbError::Type(format!("LIKE expects a string, got {other}"))),
            }
        }
        ExprNode::Between { value, lower, upper } => {
            let v = eval(db, value, row, schema)?;
            let lo = eval(db, lower, row, schema)?;
            let hi = eval(db, upper, row, schema)?;
            if v.is_null() || lo.is_null() || hi.is_null() {
                return Ok(ColumnValue::Bool(false));
            }
            let ge = compare_coerced(&v, &lo)? != Ordering::Less;
            let le = compare_coerced(&v, &hi)? != Ordering::Greater;
            Ok(ColumnValue::Bool(ge && le))
        }
        ExprNode::In { value, list } => {
            let v = eval(db, value, row, schema)?;
            if v.is_null() {
                return Ok(ColumnValue::Bool(false));
            }
            for item in list {
                let x = eval(db, item, row, schema)?;
                if !x.is_null() && compare_coerced(&v, &x)? == Ordering::Equal {
                    return Ok(ColumnValue::Bool(true));
                }
            }
            Ok(ColumnValue::Bool(false))
        }
        ExprNode::Not(e) => {
            let v = eval_bool(db, e, row, schema)?;
            Ok(ColumnValue::Bool(!v))
        }
        ExprNode::And(a, b) => {
            let l = eval_bool(db, a, row, schema)?;
            if !l {
                return Ok(ColumnValue::Bool(false));
            }
            Ok(ColumnValue::Bool(eval_bool(db, b, row, schema)?))
        }
        ExprNode::Or(a, b) => {
            let l = eval_bool(db, a, row, schema)?;
            if l {
                return Ok(ColumnValue::Bool(true));
            }
            Ok(ColumnValue::Bool(eval_bool(db, b, row, schema)?))
        }
        ExprNode::Func { f, args } => eval_func(db, *f, args, row, schema),
        ExprNode::Aggregate { agg, .. } => Err(DbError::Type(format!(
            "aggregate {} cannot be evaluated per row",
            agg.name()
        ))),
    }
}

/// Evaluate a predicate; NULL counts as false.
pub fn eval_bool(
    db: &DB,
    expr: &ExprNode,
    row: Option<&[ColumnValue]>,
    schema: &TableSchema,
) -> Result<bool> {
    match eval(db, expr, row, schema)? {
        ColumnValue::Bool(b) => Ok(b),
        ColumnValue::Null => Ok(false),
        other => Err(DbError::Type(format!(
            "expected a boolean condition, got {other}"
        ))),
    }
}

/// Comparison with one-sided string coercion, so `created_at > '2024-01-01'`
/// compares as dates rather than text.
pub fn compare_coerced(l: &ColumnValue, r: &ColumnValue) -> Result<Ordering> {
    match (l.kind(), r.kind()) {
        (Some(lk), Some(rk)) if lk != rk => {
            if rk == DataType::Text && !lk.is_textual() {
                let mut r2 = r.clone();
                r2.cast_to(lk)?;
                return l.compare(&r2);
            }
            if lk == DataType::Text && !rk.is_textual() {
                let mut l2 = l.clone();
                l2.cast_to(rk)?;
                return l2.compare(r);
            }
            l.compare(r)
        }
        _ => l.compare(r),
    }
}

fn is_temporal(v: &ColumnValue) -> bool {
    matches!(
        v,
        ColumnValue::Date(_)
            | ColumnValue::Time(_)
            | ColumnValue::TimeTz(_)
            | ColumnValue::DateTime(_)
            | ColumnValue::DateTimeTz(_)
            | ColumnValue::Timestamp(_)
            | ColumnValue::TimestampTz(_)
            | ColumnValue::Interval(_)
    )
}

fn binary_op(op: BinOp, l: ColumnValue, r: ColumnValue) -> Result<ColumnValue> {
    if l.is_null() || r.is_null() {
        return Ok(ColumnValue::Null);
    }
    if is_temporal(&l) || is_temporal(&r) {
        return datetime_binary_op(op, l, r);
    }
    let both_int = matches!(l, ColumnValue::Int(_) | ColumnValue::Uint(_))
        && matches!(r, ColumnValue::Int(_) | ColumnValue::Uint(_));
    if both_int {
        let a = l.int()?;
        let b = r.int()?;
        let v = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(DbError::Type("division by zero".to_string()));
                }
                a / b
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(DbError::Type("division by zero".to_string()));
                }
                a % b
            }
        };
        return Ok(ColumnValue::Int(v));
    }
    let a = l.double()?;
    let b = r.double()?;
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(DbError::Type("division by zero".to_string()));
            }
            a / b
        }
        BinOp::Mod => a % b,
    };
    Ok(ColumnValue::Double(v))
}

/// `datetime ± interval → datetime`; `datetime − datetime → interval`;
/// `timestamp ± interval → timestamp`; timezone-aware variants normalise to
/// UTC and re-attach the left operand's offset.
fn datetime_binary_op(op: BinOp, l: ColumnValue, r: ColumnValue) -> Result<ColumnValue> {
    use ColumnValue::*;
    let neg = |iv: &crate::datetime::Interval| crate::datetime::Interval {
        months: -iv.months,
        days: -iv.days,
        micros: -iv.micros,
    };
    match (op, &l, &r) {
        (BinOp::Add, DateTime(dt), Interval(iv)) => Ok(DateTime(dt.add_interval(iv))),
        (BinOp::Sub, DateTime(dt), Interval(iv)) => Ok(DateTime(dt.add_interval(&neg(iv)))),
        (BinOp::Add, Interval(iv), DateTime(dt)) => Ok(DateTime(dt.add_interval(iv))),
        (BinOp::Sub, DateTime(a), DateTime(b)) => Ok(Interval(a.diff(b))),
        (BinOp::Add, Timestamp(ts), Interval(iv)) => Ok(Timestamp(ts.add_interval(iv))),
        (BinOp::Sub, Timestamp(ts), Interval(iv)) => Ok(Timestamp(ts.add_interval(&neg(iv)))),
        (BinOp::Add, Interval(iv), Timestamp(ts)) => Ok(Timestamp(ts.add_interval(iv))),
        (BinOp::Sub, Timestamp(a), Timestamp(b)) => Ok(Interval(crate::datetime::Interval {
            months: 0,
            days: 0,
            micros: a.micros - b.micros,
        })),
        (BinOp::Add, TimestampTz(ts), Interval(iv)) => {
            let base = crate::datetime::Timestamp { micros: ts.micros };
            Ok(TimestampTz(crate::datetime::TimestampTz {
                micros: base.add_interval(iv).micros,
                tz_offset: ts.tz_offset,
            }))
        }
        (BinOp::Sub, TimestampTz(ts), Interval(iv)) => {
            let base = crate::datetime::Timestamp { micros: ts.micros };
            Ok(TimestampTz(crate::datetime::TimestampTz {
                micros: base.add_interval(&neg(iv)).micros,
                tz_offset: ts.tz_offset,
            }))
        }
        (BinOp::Sub, TimestampTz(a), TimestampTz(b)) => Ok(Interval(crate::datetime::Interval {
            months: 0,
            days: 0,
            micros: a.utc_micros() - b.utc_micros(),
        })),
        (BinOp::Add, DateTimeTz(d), Interval(iv)) => Ok(DateTimeTz(crate::datetime::DateTimeTz {
            dt: d.dt.add_interval(iv),
            tz_offset: d.tz_offset,
        })),
        (BinOp::Sub, DateTimeTz(d), Interval(iv)) => Ok(DateTimeTz(crate::datetime::DateTimeTz {
            dt: d.dt.add_interval(&neg(iv)),
            tz_offset: d.tz_offset,
        })),
        (BinOp::Sub, DateTimeTz(a), DateTimeTz(b)) => Ok(Interval(a.to_utc().diff(&b.to_utc()))),
        (BinOp::Add, Date(d), Interval(iv)) => {
            let (y, m, dd) = datetime::decode_date(*d);
            let dt = crate::datetime::DateTime::new(y, m, dd, 0, 0, 0)?.add_interval(iv);
            Ok(Date(datetime::encode_date(dt.year, dt.month, dt.day)?))
        }
        (BinOp::Sub, Date(d), Interval(iv)) => {
            let (y, m, dd) = datetime::decode_date(*d);
            let dt = crate::datetime::DateTime::new(y, m, dd, 0, 0, 0)?.add_interval(&neg(iv));
            Ok(Date(datetime::encode_date(dt.year, dt.month, dt.day)?))
        }
        (BinOp::Sub, Date(a), Date(b)) => Ok(Interval(crate::datetime::Interval {
            months: 0,
            days: a - b,
            micros: 0,
        })),
        (BinOp::Add, Time(t), Interval(iv)) => Ok(Time(t + iv.micros)),
        (BinOp::Sub, Time(t), Interval(iv)) => Ok(Time(t - iv.micros)),
        (BinOp::Add, Interval(a), Interval(b)) => Ok(Interval(crate::datetime::Interval {
            months: a.months + b.months,
            days: a.days + b.days,
            micros: a.micros + b.micros,
        })),
        (BinOp::Sub, Interval(a), Interval(b)) => Ok(Interval(crate::datetime::Interval {
            months: a.months - b.months,
            days: a.days - b.days,
            micros: a.micros - b.micros,
        })),
        _ => Err(DbError::Type(format!(
            "unsupported date/time arithmetic: {l} {op:?} {r}"
        ))),
    }
}

/// `%` matches any run, `_` exactly one character, `[...]` a character
/// class ( with ranges and `^` negation ).
pub fn like_match(s: &str, pattern: &str) -> bool {
    fn rec(s: &[char], p: &[char]) -> bool {
        if p.is_empty() {
            return s.is_empty();
        }
        match p[0] {
            '%' => {
                for skip in 0..=s.len() {
                    if rec(&s[skip..], &p[1..]) {
                        return true;
                    }
                }
                false
            }
            '_' => !s.is_empty() && rec(&s[1..], &p[1..]),
            '[' => {
                let close = match p.iter().position(|c| *c == ']') {
                    Some(i) if i > 0 => i,
                    _ => return !s.is_empty() && s[0] == '[' && rec(&s[1..], &p[1..]),
                };
                if s.is_empty() {
                    return false;
                }
                let mut class = &p[1..close];
                let negate = class.first() == Some(&'^');
                if negate {
                    class = &class[1..];
                }
                let mut hit = false;
                let mut i = 0;
                while i < class.len() {
                    if i + 2 < class.len() && class[i + 1] == '-' {
                        if class[i] <= s[0] && s[0] <= class[i + 2] {
                            hit = true;
                        }
                        i += 3;
                    } else {
                        if class[i] == s[0] {
                            hit = true;
                        }
                        i += 1;
                    }
                }
                if hit != negate {
                    rec(&s[1..], &p[close + 1..])
                } else {
                    false
                }
            }
            c => !s.is_empty() && s[0] == c && rec(&s[1..], &p[1..]),
        }
    }
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    rec(&s, &p)
}

fn eval_func(
    db: &DB,
    f: Func,
    args: &[ExprNode],
    row: Option<&[ColumnValue]>,
    schema: &TableSchema,
) -> Result<ColumnValue> {
    let arg = |i: usize| -> Result<ColumnValue> {
        eval(
            db,
            args.get(i)
                .ok_or_else(|| DbError::Type(format!("{} is missing argument {i}", f.name())))?,
            row,
            schema,
        )
    };
    use ColumnValue::*;
    match f {
        Func::Abs => {
            let v = arg(0)?;
            match v {
                Null => Ok(Null),
                Int(x) => Ok(Int(x.abs())),
                Uint(x) => Ok(Uint(x)),
                _ => Ok(Double(v.double()?.abs())),
            }
        }
        Func::Round => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            if args.len() > 1 {
                let digits = arg(1)?.int()?;
                let scale = 10f64.powi(digits as i32);
                Ok(Double((v.double()? * scale).round() / scale))
            } else {
                Ok(Double(v.double()?.round()))
            }
        }
        Func::Floor => Ok(Double(arg(0)?.double()?.floor())),
        Func::Ceil => Ok(Double(arg(0)?.double()?.ceil())),
        Func::Now => Ok(Timestamp(now_timestamp())),
        Func::Sin => Ok(Double(arg(0)?.double()?.sin())),
        Func::Cos => Ok(Double(arg(0)?.double()?.cos())),
        Func::Tan => Ok(Double(arg(0)?.double()?.tan())),
        Func::Log => {
            if args.len() > 1 {
                Ok(Double(arg(1)?.double()?.log(arg(0)?.double()?)))
            } else {
                Ok(Double(arg(0)?.double()?.ln()))
            }
        }
        Func::Pow => Ok(Double(arg(0)?.double()?.powf(arg(1)?.double()?))),
        Func::Pi => Ok(Double(std::f64::consts::PI)),
        Func::Degrees => Ok(Double(arg(0)?.double()?.to_degrees())),
        Func::Radians => Ok(Double(arg(0)?.double()?.to_radians())),
        Func::Rand => Ok(Double(rand::thread_rng().gen::<f64>())),
        Func::Concat => {
            let mut out = String::new();
            for i in 0..args.len() {
                let v = arg(i)?;
                if !v.is_null() {
                    out.push_str(&v.to_string());
                }
            }
            Ok(Str(out))
        }
        Func::Substring => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            let s = v.str()?.to_string();
            let chars: Vec<char> = s.chars().collect();
            let start = (arg(1)?.int()?.max(1) - 1) as usize;
            let len = if args.len() > 2 {
                arg(2)?.int()?.max(0) as usize
            } else {
                chars.len().saturating_sub(start)
            };
            Ok(Str(chars.iter().skip(start).take(len).collect()))
        }
        Func::Length => {
            let v = arg(0)?;
            match v {
                Null => Ok(Null),
                Str(s) => Ok(Int(s.chars().count() as i64)),
                Blob(b) => Ok(Int(b.len() as i64)),
                Array(elems, _) => Ok(Int(elems.len() as i64)),
                other => Err(DbError::Type(format!("LENGTH expects a string, got {other}"))),
            }
        }
        Func::Lower => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            Ok(Str(v.str()?.to_lowercase()))
        }
        Func::Upper => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            Ok(Str(v.str()?.to_uppercase()))
        }
        Func::Trim => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            Ok(Str(v.str()?.trim().to_string()))
        }
        Func::Replace => {
            let v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            let from = arg(1)?;
            let to = arg(2)?;
            Ok(Str(v.str()?.replace(from.str()?, to.str()?)))
        }
        Func::Coalesce => {
            for i in 0..args.len() {
                let v = arg(i)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Null)
        }
        Func::Ifnull => {
            let v = arg(0)?;
            if v.is_null() {
                arg(1)
            } else {
                Ok(v)
            }
        }
        Func::Cast => {
            let mut v = arg(0)?;
            let tname = arg(1)?;
            let tname = tname.str()?.to_ascii_uppercase();
            let target = match tname.as_str() {
                "INT" | "SERIAL" => DataType::Int,
                "UINT" => DataType::Uint,
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
                _ => return Err(DbError::Type(format!("unknown CAST target '{tname}'"))),
            };
            v.cast_to(target)?;
            Ok(v)
        }
        Func::Date => {
            let mut v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            v.cast_to(DataType::Date)?;
            Ok(v)
        }
        Func::Time => {
            let mut v = arg(0)?;
            if v.is_null() {
                return Ok(Null);
            }
            v.cast_to(DataType::Time)?;
            Ok(v)
        }
        Func::Extract => {
            let field = arg(0)?;
            let field = field.str()?.to_ascii_uppercase();
            let v = arg(1)?;
            if v.is_null() {
                return Ok(Null);
            }
            extract_field(&field, &v)
        }
        Func::Greatest => {
            let mut best: Option<ColumnValue> = None;
            for i in 0..args.len() {
                let v = arg(i)?;
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        if compare_coerced(&v, &b)? == Ordering::Greater {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Null))
        }
        Func::Least => {
            let mut best: Option<ColumnValue> = None;
            for i in 0..args.len() {
                let v = arg(i)?;
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        if compare_coerced(&v, &b)? == Ordering::Less {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Null))
        }
    }
}

fn extract_field(field: &str, v: &ColumnValue) -> Result<ColumnValue> {
    use ColumnValue::*;
    let dt = match v {
        Date(d) => {
            let (y, m, dd) = datetime::decode_date(*d);
            crate::datetime::DateTime::new(y, m, dd, 0, 0, 0)?
        }
        DateTime(dt) => *dt,
        DateTimeTz(d) => d.dt,
        Timestamp(ts) => ts.to_datetime(),
        TimestampTz(ts) => crate::datetime::Timestamp { micros: ts.micros }.to_datetime(),
        Time(t) => {
            let (h, m, s) = datetime::decode_time(*t);
            crate::datetime::DateTime {
                year: 0,
                month: 0,
                day: 0,
                hour: h,
                minute: m,
                second: s,
            }
        }
        other => {
            return Err(DbError::Type(format!(
                "EXTRACT expects a date/time value, got {other}"
            )))
        }
    };
    let out = match field {
        "YEAR" => dt.year as i64,
        "MONTH" => dt.month as i64,
        "DAY" => dt.day as i64,
        "HOUR" => dt.hour as i64,
        "MINUTE" => dt.minute as i64,
        "SECOND" => dt.second as i64,
        "EPOCH" => dt.to_timestamp().micros / MICROS_PER_SEC,
        _ => {
            return Err(DbError::Type(format!(
                "unknown EXTRACT field '{field}'"
            )))
        }
    };
    Ok(Int(out))
}

/// Reduce an aggregate over the collected result set ( second pass ).
pub fn eval_aggregate(
    db: &DB,
    agg: Agg,
    arg: Option<&ExprNode>,
    rows: &[Vec<ColumnValue>],
    schema: &TableSchema,
) -> Result<ColumnValue> {
    use ColumnValue::*;
    match agg {
        Agg::Count => match arg {
            None => Ok(Int(rows.len() as i64)),
            Some(e) => {
                let mut n = 0i64;
                for r in rows {
                    if !eval(db, e, Some(r), schema)?.is_null() {
                        n += 1;
                    }
                }
                Ok(Int(n))
            }
        },
        Agg::Sum | Agg::Avg => {
            let e = arg.ok_or_else(|| {
                DbError::Type(format!("{} requires an argument", agg.name()))
            })?;
            let mut int_sum = 0i64;
            let mut dbl_sum = 0f64;
            let mut all_int = true;
            let mut n = 0i64;
            for r in rows {
                let v = eval(db, e, Some(r), schema)?;
                if v.is_null() {
                    continue;
                }
                n += 1;
                match v {
                    Int(x) => {
                        int_sum += x;
                        dbl_sum += x as f64;
                    }
                    Uint(x) => {
                        int_sum += x as i64;
                        dbl_sum += x as f64;
                    }
                    other => {
                        all_int = false;
                        dbl_sum += other.double()?;
                    }
                }
            }
            if agg == Agg::Avg {
                if n == 0 {
                    return Ok(Null);
                }
                return Ok(Double(dbl_sum / n as f64));
            }
            if n == 0 {
                Ok(Null)
            } else if all_int {
                Ok(Int(int_sum))
            } else {
                Ok(Double(dbl_sum))
            }
        }
        Agg::Min | Agg::Max => {
            let e = arg.ok_or_else(|| {
                DbError::Type(format!("{} requires an argument", agg.name()))
            })?;
            let mut best: Option<ColumnValue> = None;
            for r in rows {
                let v = eval(db, e, Some(r), schema)?;
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let ord = compare_coerced(&v, &b)?;
                        let take = if agg == Agg::Min {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        };
                        if take {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns() {
        assert!(like_match("hello", "h%o"));
        assert!(like_match("hello", "_ello"));
        assert!(!like_match("hello", "_llo"));
        assert!(like_match("cat", "c[a-o]t"));
        assert!(!like_match("cut", "c[a-o]t"));
        assert!(like_match("cut", "c[^a-o]t"));
        assert!(like_match("", "%"));
        assert!(like_match("abc", "%"));
        assert!(!like_match("abc", ""));
    }

    #[test]
    fn extract_fields() {
        let dt = crate::datetime::DateTime::new(2024, 7, 4, 12, 30, 45).unwrap();
        let v = ColumnValue::DateTime(dt);
        assert_eq!(extract_field("YEAR", &v).unwrap(), ColumnValue::Int(2024));
        assert_eq!(extract_field("MONTH", &v).unwrap(), ColumnValue::Int(7));
        assert_eq!(extract_field("SECOND", &v).unwrap(), ColumnValue::Int(45));
        assert!(extract_field("FORTNIGHT", &v).is_err());
    }

    #[test]
    fn temporal_minus_temporal() {
        let a = ColumnValue::Timestamp(Timestamp { micros: 10 * MICROS_PER_SEC });
        let b = ColumnValue::Timestamp(Timestamp { micros: 4 * MICROS_PER_SEC });
        let d = binary_op(BinOp::Sub, a, b).unwrap();
        match d {
            ColumnValue::Interval(iv) => assert_eq!(iv.micros, 6 * MICROS_PER_SEC),
            _ => panic!("expected interval"),
        }
    }

    #[test]
    fn mixed_arithmetic_promotes_to_double() {
        let v = binary_op(
            BinOp::Mul,
            ColumnValue::Int(3),
            ColumnValue::Double(1.5),
        )
        .unwrap();
        assert_eq!(v, ColumnValue::Double(4.5));
        let v = binary_op(BinOp::Add, ColumnValue::Int(3), ColumnValue::Int(4)).unwrap();
        assert_eq!(v, ColumnValue::Int(7));
        assert!(binary_op(BinOp::Div, ColumnValue::Int(1), ColumnValue::Int(0)).is_err());
    }
}
