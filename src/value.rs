//! Run-time values and their on-disk encoding.

use crate::datetime::{
    self, Date, DateTime, DateTimeTz, Interval, TimeStored, TimeTz, Timestamp, TimestampTz,
};
use crate::error::{DbError, Result};
use crate::util;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Column type codes. The discriminants are stored in the schema file and in
/// array element tags, so they are fixed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum DataType {
    Int = 0,
    Uint = 1,
    Serial = 2,
    Float = 3,
    Double = 4,
    Decimal = 5,
    Bool = 6,
    Char = 7,
    VarChar = 8,
    Text = 9,
    Json = 10,
    Blob = 11,
    Uuid = 12,
    Date = 13,
    Time = 14,
    TimeTz = 15,
    DateTime = 16,
    DateTimeTz = 17,
    Timestamp = 18,
    TimestampTz = 19,
    Interval = 20,
}

impl DataType {
    pub fn from_code(code: u8) -> Result<DataType> {
        use DataType::*;
        Ok(match code {
            0 => Int,
            1 => Uint,
            2 => Serial,
            3 => Float,
            4 => Double,
            5 => Decimal,
            6 => Bool,
            7 => Char,
            8 => VarChar,
            9 => Text,
            10 => Json,
            11 => Blob,
            12 => Uuid,
            13 => Date,
            14 => Time,
            15 => TimeTz,
            16 => DateTime,
            17 => DateTimeTz,
            18 => Timestamp,
            19 => TimestampTz,
            20 => Interval,
            _ => return Err(DbError::Corruption(format!("unknown type code {code}"))),
        })
    }

    /// SQL name, used for messages and for rendering schemas.
    pub fn name(self) -> &'static str {
        use DataType::*;
        match self {
            Int => "INT",
            Uint => "UINT",
            Serial => "SERIAL",
            Float => "FLOAT",
            Double => "DOUBLE",
            Decimal => "DECIMAL",
            Bool => "BOOL",
            Char => "CHAR",
            VarChar => "VARCHAR",
            Text => "TEXT",
            Json => "JSON",
            Blob => "BLOB",
            Uuid => "UUID",
            Date => "DATE",
            Time => "TIME",
            TimeTz => "TIMETZ",
            DateTime => "DATETIME",
            DateTimeTz => "DATETIMETZ",
            Timestamp => "TIMESTAMP",
            TimestampTz => "TIMESTAMPTZ",
            Interval => "INTERVAL",
        }
    }

    /// True for the kinds stored as text.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            DataType::Char | DataType::VarChar | DataType::Text | DataType::Json
        )
    }

    /// True for the kinds that take part in numeric arithmetic.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int
                | DataType::Uint
                | DataType::Serial
                | DataType::Float
                | DataType::Double
                | DataType::Decimal
        )
    }
}

/// Fixed decimal: digit string plus declared precision and scale.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Decimal {
    pub precision: u8,
    pub scale: u8,
    pub digits: String,
}

impl Decimal {
    /// Scaled integer representation for comparison. The digit string is
    /// normalised at construction, so parsing here cannot fail on values
    /// that passed coercion.
    fn scaled(&self) -> (i128, u32) {
        let s = &self.digits;
        let (int_part, frac_part) = match s.find('.') {
            Some(i) => (&s[..i], &s[i + 1..]),
            None => (&s[..], ""),
        };
        let mut v: i128 = int_part.parse().unwrap_or(0);
        let neg = v < 0 || int_part.starts_with('-');
        for c in frac_part.chars() {
            v = v * 10 + (c as i128 - '0' as i128) * if neg { -1 } else { 1 };
        }
        (v, frac_part.len() as u32)
    }

    pub fn compare(&self, other: &Decimal) -> Ordering {
        let (a, sa) = self.scaled();
        let (b, sb) = other.scaled();
        let scale = sa.max(sb);
        let a = a * 10i128.pow(scale - sa);
        let b = b * 10i128.pow(scale - sb);
        a.cmp(&b)
    }

    pub fn to_f64(&self) -> f64 {
        self.digits.parse().unwrap_or(0.0)
    }
}

/// A run-time value. Owns its payload; `Null` doubles as the null flag and
/// mirrors the owning row's null bitmap. `Toast(id)` is an on-disk redirect
/// to chunks stored in the `jb_toast` table.
#[derive(Clone, Debug)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Uint(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    Date(Date),
    Time(TimeStored),
    TimeTz(TimeTz),
    DateTime(DateTime),
    DateTimeTz(DateTimeTz),
    Timestamp(Timestamp),
    TimestampTz(TimestampTz),
    Interval(Interval),
    Array(Vec<ColumnValue>, DataType),
    Toast(u32),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn is_toast(&self) -> bool {
        matches!(self, ColumnValue::Toast(_))
    }

    /// The natural type of the value, if it has one.
    pub fn kind(&self) -> Option<DataType> {
        use ColumnValue::*;
        Some(match self {
            Null => return None,
            Int(_) => DataType::Int,
            Uint(_) => DataType::Uint,
            Float(_) => DataType::Float,
            Double(_) => DataType::Double,
            Bool(_) => DataType::Bool,
            Str(_) | Toast(_) => DataType::Text,
            Blob(_) => DataType::Blob,
            Uuid(_) => DataType::Uuid,
            Decimal(_) => DataType::Decimal,
            Date(_) => DataType::Date,
            Time(_) => DataType::Time,
            TimeTz(_) => DataType::TimeTz,
            DateTime(_) => DataType::DateTime,
            DateTimeTz(_) => DataType::DateTimeTz,
            Timestamp(_) => DataType::Timestamp,
            TimestampTz(_) => DataType::TimestampTz,
            Interval(_) => DataType::Interval,
            Array(_, t) => return Some(*t),
        })
    }

    /// Integer view; errors on anything non-integral.
    pub fn int(&self) -> Result<i64> {
        match self {
            ColumnValue::Int(x) => Ok(*x),
            ColumnValue::Uint(x) => Ok(*x as i64),
            ColumnValue::Bool(b) => Ok(*b as i64),
            _ => Err(DbError::Type(format!("expected an integer, got {self}"))),
        }
    }

    /// Floating view of any numeric value.
    pub fn double(&self) -> Result<f64> {
        match self {
            ColumnValue::Int(x) => Ok(*x as f64),
            ColumnValue::Uint(x) => Ok(*x as f64),
            ColumnValue::Float(x) => Ok(*x as f64),
            ColumnValue::Double(x) => Ok(*x),
            ColumnValue::Decimal(d) => Ok(d.to_f64()),
            _ => Err(DbError::Type(format!("expected a number, got {self}"))),
        }
    }

    pub fn bool(&self) -> Result<bool> {
        match self {
            ColumnValue::Bool(b) => Ok(*b),
            _ => Err(DbError::Type(format!("expected a boolean, got {self}"))),
        }
    }

    pub fn str(&self) -> Result<&str> {
        match self {
            ColumnValue::Str(s) => Ok(s),
            _ => Err(DbError::Type(format!("expected a string, got {self}"))),
        }
    }

    /// Total, type-aware ordering over non-null values. NaN floats are
    /// rejected before they can reach an index, so `partial_cmp` cannot fail
    /// on stored data.
    pub fn compare(&self, other: &ColumnValue) -> Result<Ordering> {
        use ColumnValue::*;
        let res = match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(_) | Uint(_) | Bool(_), Int(_) | Uint(_) | Bool(_)) => {
                self.int()?.cmp(&other.int()?)
            }
            (Float(_) | Double(_) | Decimal(_), x) if x.kind().map_or(false, |k| k.is_numeric()) => {
                num_cmp(self.double()?, other.double()?)?
            }
            (x, Float(_) | Double(_) | Decimal(_)) if x.kind().map_or(false, |k| k.is_numeric()) => {
                num_cmp(self.double()?, other.double()?)?
            }
            (Str(a), Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Blob(a), Blob(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (TimeTz(a), TimeTz(b)) => a.utc_micros().cmp(&b.utc_micros()),
            (DateTime(a), DateTime(b)) => a.cmp_fields(b),
            (DateTimeTz(a), DateTimeTz(b)) => a.cmp_utc(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (TimestampTz(a), TimestampTz(b)) => a.utc_micros().cmp(&b.utc_micros()),
            (Interval(a), Interval(b)) => {
                // Nominal ordering: months, then days, then micros.
                (a.months, a.days, a.micros).cmp(&(b.months, b.days, b.micros))
            }
            // Arrays are not ordered; treated as equal for index purposes.
            (Array(..), Array(..)) => Ordering::Equal,
            _ => {
                return Err(DbError::Type(format!(
                    "cannot compare {self} with {other}"
                )))
            }
        };
        Ok(res)
    }

    /// Cast in place to `target`, the way `infer_and_cast` does: numeric
    /// widening/narrowing, string parsing for temporal and UUID kinds.
    /// Nulls pass through untouched.
    pub fn cast_to(&mut self, target: DataType) -> Result<()> {
        use ColumnValue::*;
        if self.is_null() || self.is_toast() {
            return Ok(());
        }
        if let Array(elems, _t) = self {
            let mut elems = std::mem::take(elems);
            for e in elems.iter_mut() {
                e.cast_to(target)?;
            }
            *self = Array(elems, target);
            return Ok(());
        }
        let fail = |v: &ColumnValue| {
            Err(DbError::Type(format!(
                "cannot cast {v} to {}",
                target.name()
            )))
        };
        let next = match target {
            DataType::Int | DataType::Serial => match self {
                Int(_) => return Ok(()),
                Uint(x) => Int(*x as i64),
                Float(x) => Int(*x as i64),
                Double(x) => Int(*x as i64),
                Bool(b) => Int(*b as i64),
                Decimal(d) => Int(d.to_f64() as i64),
                Str(s) => Int(s.trim().parse().map_err(|_| DbError::Type(format!("cannot cast '{s}' to INT")))?),
                _ => return fail(self),
            },
            DataType::Uint => match self {
                Uint(_) => return Ok(()),
                Int(x) if *x >= 0 => Uint(*x as u64),
                Str(s) => Uint(s.trim().parse().map_err(|_| DbError::Type(format!("cannot cast '{s}' to UINT")))?),
                _ => return fail(self),
            },
            DataType::Float => match self {
                Float(_) => return Ok(()),
                Str(s) => Float(s.trim().parse().map_err(|_| DbError::Type(format!("cannot cast '{s}' to FLOAT")))?),
                _ => Float(self.double()? as f32),
            },
            DataType::Double => match self {
                Double(_) => return Ok(()),
                Str(s) => Double(s.trim().parse().map_err(|_| DbError::Type(format!("cannot cast '{s}' to DOUBLE")))?),
                _ => Double(self.double()?),
            },
            DataType::Decimal => match self {
                Decimal(_) => return Ok(()),
                Int(x) => Decimal(crate::value::Decimal {
                    precision: 0,
                    scale: 0,
                    digits: x.to_string(),
                }),
                Double(x) => Decimal(crate::value::Decimal {
                    precision: 0,
                    scale: 0,
                    digits: x.to_string(),
                }),
                Float(x) => Decimal(crate::value::Decimal {
                    precision: 0,
                    scale: 0,
                    digits: x.to_string(),
                }),
                Str(s) => {
                    let t = s.trim();
                    t.parse::<f64>()
                        .map_err(|_| DbError::Type(format!("cannot cast '{s}' to DECIMAL")))?;
                    Decimal(crate::value::Decimal {
                        precision: 0,
                        scale: 0,
                        digits: t.to_string(),
                    })
                }
                _ => return fail(self),
            },
            DataType::Bool => match self {
                Bool(_) => return Ok(()),
                Int(x) => Bool(*x != 0),
                Str(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Bool(true),
                    "false" | "f" | "0" => Bool(false),
                    _ => return fail(self),
                },
                _ => return fail(self),
            },
            DataType::Char | DataType::VarChar | DataType::Text | DataType::Json => match self {
                Str(_) => return Ok(()),
                _ => Str(self.to_string()),
            },
            DataType::Blob => match self {
                Blob(_) => return Ok(()),
                Str(s) => Blob(s.clone().into_bytes()),
                _ => return fail(self),
            },
            DataType::Uuid => match self {
                Uuid(_) => return Ok(()),
                Str(s) => Uuid(uuid::Uuid::parse_str(s.trim())
                    .map_err(|_| DbError::Type(format!("cannot cast '{s}' to UUID")))?),
                _ => return fail(self),
            },
            DataType::Date => match self {
                Date(_) => return Ok(()),
                Str(s) => {
                    let (dt, _) = datetime::parse_datetime(s)?;
                    Date(datetime::encode_date(dt.year, dt.month, dt.day)?)
                }
                DateTime(dt) => Date(datetime::encode_date(dt.year, dt.month, dt.day)?),
                Timestamp(ts) => {
                    let dt = ts.to_datetime();
                    Date(datetime::encode_date(dt.year, dt.month, dt.day)?)
                }
                _ => return fail(self),
            },
            DataType::Time => match self {
                Time(_) => return Ok(()),
                Str(s) => Time(datetime::parse_time(s)?),
                _ => return fail(self),
            },
            DataType::TimeTz => match self {
                TimeTz(_) => return Ok(()),
                Str(s) => {
                    let (dt, tz) = split_time_tz(s)?;
                    TimeTz(crate::datetime::TimeTz {
                        time: dt,
                        tz_offset: tz,
                    })
                }
                _ => return fail(self),
            },
            DataType::DateTime => match self {
                DateTime(_) => return Ok(()),
                Str(s) => DateTime(datetime::parse_datetime(s)?.0),
                Timestamp(ts) => DateTime(ts.to_datetime()),
                Date(d) => {
                    let (y, m, day) = datetime::decode_date(*d);
                    DateTime(crate::datetime::DateTime::new(y, m, day, 0, 0, 0)?)
                }
                _ => return fail(self),
            },
            DataType::DateTimeTz => match self {
                DateTimeTz(_) => return Ok(()),
                Str(s) => {
                    let (dt, tz) = datetime::parse_datetime(s)?;
                    DateTimeTz(crate::datetime::DateTimeTz {
                        dt,
                        tz_offset: tz.unwrap_or(0),
                    })
                }
                DateTime(dt) => DateTimeTz(crate::datetime::DateTimeTz {
                    dt: *dt,
                    tz_offset: 0,
                }),
                _ => return fail(self),
            },
            DataType::Timestamp => match self {
                Timestamp(_) => return Ok(()),
                Str(s) => Timestamp(datetime::parse_datetime(s)?.0.to_timestamp()),
                DateTime(dt) => Timestamp(dt.to_timestamp()),
                Int(x) => Timestamp(crate::datetime::Timestamp { micros: *x }),
                _ => return fail(self),
            },
            DataType::TimestampTz => match self {
                TimestampTz(_) => return Ok(()),
                Str(s) => {
                    let (dt, tz) = datetime::parse_datetime(s)?;
                    TimestampTz(crate::datetime::TimestampTz {
                        micros: dt.to_timestamp().micros,
                        tz_offset: tz.unwrap_or(0),
                    })
                }
                Timestamp(ts) => TimestampTz(crate::datetime::TimestampTz {
                    micros: ts.micros,
                    tz_offset: 0,
                }),
                _ => return fail(self),
            },
            DataType::Interval => match self {
                Interval(_) => return Ok(()),
                _ => return fail(self),
            },
        };
        *self = next;
        Ok(())
    }

    /// Serialised payload size in bytes ( excluding the null bitmap bit ).
    pub fn disk_size(&self) -> usize {
        use ColumnValue::*;
        match self {
            Null => 0,
            Int(_) | Uint(_) | Double(_) | Time(_) | Timestamp(_) => 8,
            Float(_) | Date(_) => 4,
            Bool(_) => 1,
            Str(s) => 2 + s.len(),
            Toast(_) => 2 + 4,
            Blob(b) => 2 + b.len(),
            Uuid(_) => 16,
            Decimal(d) => 2 + 2 + d.digits.len(),
            TimeTz(_) => 12,
            DateTime(_) => 9,
            DateTimeTz(_) => 13,
            TimestampTz(_) => 12,
            Interval(_) => 16,
            Array(elems, _) => 5 + elems.iter().map(|e| 1 + e.disk_size()).sum::<usize>(),
        }
    }

    /// Append the on-disk encoding. Fixed-width kinds write their native
    /// size; strings and blobs are 16-bit length prefixed; arrays carry a
    /// 32-bit count and an element type tag. Nulls write nothing ( the null
    /// bitmap records them ).
    pub fn encode(&self, out: &mut Vec<u8>) {
        use ColumnValue::*;
        match self {
            Null => {}
            Int(x) => out.extend_from_slice(&x.to_le_bytes()),
            Uint(x) => out.extend_from_slice(&x.to_le_bytes()),
            Float(x) => out.extend_from_slice(&x.to_le_bytes()),
            Double(x) => out.extend_from_slice(&x.to_le_bytes()),
            Bool(b) => out.push(*b as u8),
            Str(s) => {
                out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Toast(id) => {
                out.extend_from_slice(&TOAST_LEN_SENTINEL.to_le_bytes());
                out.extend_from_slice(&id.to_le_bytes());
            }
            Blob(b) => {
                out.extend_from_slice(&(b.len() as u16).to_le_bytes());
                out.extend_from_slice(b);
            }
            Uuid(u) => out.extend_from_slice(u.as_bytes()),
            Decimal(d) => {
                out.push(d.precision);
                out.push(d.scale);
                out.extend_from_slice(&(d.digits.len() as u16).to_le_bytes());
                out.extend_from_slice(d.digits.as_bytes());
            }
            Date(d) => out.extend_from_slice(&d.to_le_bytes()),
            Time(t) => out.extend_from_slice(&t.to_le_bytes()),
            TimeTz(t) => {
                out.extend_from_slice(&t.time.to_le_bytes());
                out.extend_from_slice(&t.tz_offset.to_le_bytes());
            }
            DateTime(dt) => {
                out.extend_from_slice(&dt.year.to_le_bytes());
                out.push(dt.month as u8);
                out.push(dt.day as u8);
                out.push(dt.hour as u8);
                out.push(dt.minute as u8);
                out.push(dt.second as u8);
            }
            DateTimeTz(dtz) => {
                ColumnValue::DateTime(dtz.dt).encode(out);
                out.extend_from_slice(&dtz.tz_offset.to_le_bytes());
            }
            Timestamp(ts) => out.extend_from_slice(&ts.micros.to_le_bytes()),
            TimestampTz(ts) => {
                out.extend_from_slice(&ts.micros.to_le_bytes());
                out.extend_from_slice(&ts.tz_offset.to_le_bytes());
            }
            Interval(iv) => {
                out.extend_from_slice(&iv.months.to_le_bytes());
                out.extend_from_slice(&iv.days.to_le_bytes());
                out.extend_from_slice(&iv.micros.to_le_bytes());
            }
            Array(elems, elem_t) => {
                out.extend_from_slice(&(elems.len() as u32).to_le_bytes());
                out.push(*elem_t as u8);
                for e in elems {
                    out.push(!e.is_null() as u8);
                    e.encode(out);
                }
            }
        }
    }

    /// Decode a value of declared type `typ` from `data[off..]`, advancing
    /// `off`. `is_array` selects the array framing.
    pub fn decode(data: &[u8], off: &mut usize, typ: DataType, is_array: bool) -> Result<ColumnValue> {
        if is_array {
            let n = util::getu32(data, *off) as usize;
            let elem_t = DataType::from_code(data[*off + 4])?;
            *off += 5;
            let mut elems = Vec::with_capacity(n);
            for _ in 0..n {
                let present = data[*off] != 0;
                *off += 1;
                if present {
                    elems.push(ColumnValue::decode(data, off, elem_t, false)?);
                } else {
                    elems.push(ColumnValue::Null);
                }
            }
            return Ok(ColumnValue::Array(elems, elem_t));
        }
        use DataType::*;
        let v = match typ {
            Int | Serial => {
                let v = util::geti64(data, *off);
                *off += 8;
                ColumnValue::Int(v)
            }
            Uint => {
                let v = util::getu64(data, *off);
                *off += 8;
                ColumnValue::Uint(v)
            }
            Float => {
                let v = util::getf32(data, *off);
                *off += 4;
                ColumnValue::Float(v)
            }
            Double => {
                let v = util::getf64(data, *off);
                *off += 8;
                ColumnValue::Double(v)
            }
            Bool => {
                let v = data[*off] != 0;
                *off += 1;
                ColumnValue::Bool(v)
            }
            Char | VarChar | Text | Json => {
                let n = util::getu16(data, *off);
                *off += 2;
                if n == TOAST_LEN_SENTINEL {
                    let id = util::getu32(data, *off);
                    *off += 4;
                    ColumnValue::Toast(id)
                } else {
                    let n = n as usize;
                    let s = std::str::from_utf8(&data[*off..*off + n])
                        .map_err(|_| DbError::Corruption("non-utf8 string payload".into()))?
                        .to_string();
                    *off += n;
                    ColumnValue::Str(s)
                }
            }
            Blob => {
                let n = util::getu16(data, *off) as usize;
                *off += 2;
                let b = data[*off..*off + n].to_vec();
                *off += n;
                ColumnValue::Blob(b)
            }
            Uuid => {
                let mut b = [0u8; 16];
                b.copy_from_slice(&data[*off..*off + 16]);
                *off += 16;
                ColumnValue::Uuid(uuid::Uuid::from_bytes(b))
            }
            Decimal => {
                let precision = data[*off];
                let scale = data[*off + 1];
                let n = util::getu16(data, *off + 2) as usize;
                *off += 4;
                let digits = std::str::from_utf8(&data[*off..*off + n])
                    .map_err(|_| DbError::Corruption("non-utf8 decimal payload".into()))?
                    .to_string();
                *off += n;
                ColumnValue::Decimal(crate::value::Decimal {
                    precision,
                    scale,
                    digits,
                })
            }
            Date => {
                let v = util::geti32(data, *off);
                *off += 4;
                ColumnValue::Date(v)
            }
            Time => {
                let v = util::geti64(data, *off);
                *off += 8;
                ColumnValue::Time(v)
            }
            TimeTz => {
                let time = util::geti64(data, *off);
                let tz = util::geti32(data, *off + 8);
                *off += 12;
                ColumnValue::TimeTz(crate::datetime::TimeTz {
                    time,
                    tz_offset: tz,
                })
            }
            DateTime => {
                let dt = decode_dt(data, off);
                ColumnValue::DateTime(dt)
            }
            DateTimeTz => {
                let dt = decode_dt(data, off);
                let tz = util::geti32(data, *off);
                *off += 4;
                ColumnValue::DateTimeTz(crate::datetime::DateTimeTz { dt, tz_offset: tz })
            }
            Timestamp => {
                let v = util::geti64(data, *off);
                *off += 8;
                ColumnValue::Timestamp(crate::datetime::Timestamp { micros: v })
            }
            TimestampTz => {
                let micros = util::geti64(data, *off);
                let tz = util::geti32(data, *off + 8);
                *off += 12;
                ColumnValue::TimestampTz(crate::datetime::TimestampTz {
                    micros,
                    tz_offset: tz,
                })
            }
            Interval => {
                let months = util::geti32(data, *off);
                let days = util::geti32(data, *off + 4);
                let micros = util::geti64(data, *off + 8);
                *off += 16;
                ColumnValue::Interval(crate::datetime::Interval {
                    months,
                    days,
                    micros,
                })
            }
        };
        Ok(v)
    }
}

/// Length sentinel marking a TOASTed string payload.
pub const TOAST_LEN_SENTINEL: u16 = u16::MAX;

fn decode_dt(data: &[u8], off: &mut usize) -> DateTime {
    let year = util::geti32(data, *off);
    let dt = DateTime {
        year,
        month: data[*off + 4] as u32,
        day: data[*off + 5] as u32,
        hour: data[*off + 6] as u32,
        minute: data[*off + 7] as u32,
        second: data[*off + 8] as u32,
    };
    *off += 9;
    dt
}

fn split_time_tz(s: &str) -> Result<(TimeStored, i32)> {
    match s.rfind(|c| c == '+' || c == '-') {
        Some(i) if i > 0 => {
            let t = datetime::parse_time(&s[..i])?;
            let sign = if s[i..].starts_with('-') { -1 } else { 1 };
            let mut it = s[i + 1..].split(':');
            let h: i32 = it
                .next()
                .and_then(|x| x.parse().ok())
                .ok_or_else(|| DbError::Type(format!("cannot parse '{s}' as TIMETZ")))?;
            let m: i32 = it.next().and_then(|x| x.parse().ok()).unwrap_or(0);
            Ok((t, datetime::check_tz_offset(sign * (h * 60 + m))?))
        }
        _ => Ok((datetime::parse_time(s)?, 0)),
    }
}

/// Numeric comparison that refuses NaN.
fn num_cmp(a: f64, b: f64) -> Result<Ordering> {
    a.partial_cmp(&b)
        .ok_or_else(|| DbError::Type("NaN is not comparable".into()))
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.compare(other), Ok(Ordering::Equal))
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ColumnValue::*;
        match self {
            Null => write!(f, "NULL"),
            Int(x) => write!(f, "{x}"),
            Uint(x) => write!(f, "{x}"),
            Float(x) => write!(f, "{x}"),
            Double(x) => write!(f, "{x}"),
            Bool(b) => write!(f, "{b}"),
            Str(s) => write!(f, "{s}"),
            Toast(id) => write!(f, "<toast:{id}>"),
            Blob(b) => {
                write!(f, "0x")?;
                for x in b {
                    write!(f, "{x:02x}")?;
                }
                Ok(())
            }
            Uuid(u) => write!(f, "{u}"),
            Decimal(d) => write!(f, "{}", d.digits),
            Date(d) => write!(f, "{}", datetime::date_to_string(*d)),
            Time(t) => write!(f, "{}", datetime::time_to_string(*t)),
            TimeTz(t) => write!(f, "{t}"),
            DateTime(dt) => write!(f, "{dt}"),
            DateTimeTz(dt) => write!(f, "{dt}"),
            Timestamp(ts) => write!(f, "{ts}"),
            TimestampTz(ts) => write!(f, "{ts}"),
            Interval(iv) => write!(f, "{iv}"),
            Array(elems, _) => {
                write!(f, "{{")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: ColumnValue, t: DataType, is_array: bool) {
        let mut buf = Vec::new();
        v.encode(&mut buf);
        assert_eq!(buf.len(), v.disk_size());
        let mut off = 0;
        let back = ColumnValue::decode(&buf, &mut off, t, is_array).unwrap();
        assert_eq!(off, buf.len());
        assert!(v == back, "{v} != {back}");
    }

    #[test]
    fn encode_roundtrip_all_kinds() {
        roundtrip(ColumnValue::Int(-42), DataType::Int, false);
        roundtrip(ColumnValue::Uint(7), DataType::Uint, false);
        roundtrip(ColumnValue::Float(1.5), DataType::Float, false);
        roundtrip(ColumnValue::Double(-2.25), DataType::Double, false);
        roundtrip(ColumnValue::Bool(true), DataType::Bool, false);
        roundtrip(ColumnValue::Str("hello".into()), DataType::Text, false);
        roundtrip(ColumnValue::Blob(vec![1, 2, 3]), DataType::Blob, false);
        roundtrip(
            ColumnValue::Uuid(Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap()),
            DataType::Uuid,
            false,
        );
        roundtrip(
            ColumnValue::Decimal(Decimal {
                precision: 10,
                scale: 2,
                digits: "123.45".into(),
            }),
            DataType::Decimal,
            false,
        );
        roundtrip(
            ColumnValue::Date(datetime::encode_date(2024, 2, 29).unwrap()),
            DataType::Date,
            false,
        );
        roundtrip(
            ColumnValue::Time(datetime::encode_time(13, 30, 0).unwrap()),
            DataType::Time,
            false,
        );
        roundtrip(
            ColumnValue::DateTime(DateTime::new(2024, 5, 1, 8, 30, 15).unwrap()),
            DataType::DateTime,
            false,
        );
        roundtrip(
            ColumnValue::Timestamp(Timestamp { micros: 123456789 }),
            DataType::Timestamp,
            false,
        );
        roundtrip(
            ColumnValue::TimestampTz(TimestampTz {
                micros: -5,
                tz_offset: 330,
            }),
            DataType::TimestampTz,
            false,
        );
        roundtrip(
            ColumnValue::Interval(Interval {
                months: 1,
                days: -2,
                micros: 3,
            }),
            DataType::Interval,
            false,
        );
        roundtrip(ColumnValue::Toast(77), DataType::Text, false);
        roundtrip(
            ColumnValue::Array(
                vec![ColumnValue::Int(1), ColumnValue::Null, ColumnValue::Int(3)],
                DataType::Int,
            ),
            DataType::Int,
            true,
        );
    }

    #[test]
    fn typed_comparison() {
        assert_eq!(
            ColumnValue::Int(3).compare(&ColumnValue::Double(3.5)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            ColumnValue::Str("abc".into())
                .compare(&ColumnValue::Str("abd".into()))
                .unwrap(),
            Ordering::Less
        );
        let d1 = ColumnValue::Decimal(Decimal {
            precision: 5,
            scale: 2,
            digits: "10.50".into(),
        });
        let d2 = ColumnValue::Decimal(Decimal {
            precision: 5,
            scale: 1,
            digits: "10.5".into(),
        });
        assert!(d1 == d2);
    }

    #[test]
    fn cast_string_to_temporal() {
        let mut v = ColumnValue::Str("2024-05-01 10:00:00".into());
        v.cast_to(DataType::Timestamp).unwrap();
        assert!(matches!(v, ColumnValue::Timestamp(_)));
        let mut v = ColumnValue::Str("not a date".into());
        assert!(v.cast_to(DataType::Date).is_err());
    }
}
