//! Expression trees, result of parsing. Column references have already been
//! resolved to positional indexes into the bound schema.

use crate::value::ColumnValue;

/// Arithmetic operators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Scalar builtin functions. The registry is engine-scoped: names resolve
/// here at parse time and dispatch in the evaluator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Func {
    Abs,
    Round,
    Now,
    Sin,
    Cos,
    Tan,
    Log,
    Pow,
    Concat,
    Substring,
    Length,
    Lower,
    Upper,
    Trim,
    Replace,
    Coalesce,
    Cast,
    Date,
    Time,
    Extract,
    Ifnull,
    Greatest,
    Least,
    Rand,
    Floor,
    Ceil,
    Pi,
    Degrees,
    Radians,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        use Func::*;
        Some(match name.to_ascii_uppercase().as_str() {
            "ABS" => Abs,
            "ROUND" => Round,
            "NOW" => Now,
            "SIN" => Sin,
            "COS" => Cos,
            "TAN" => Tan,
            "LOG" => Log,
            "POW" => Pow,
            "CONCAT" => Concat,
            "SUBSTRING" => Substring,
            "LENGTH" => Length,
            "LOWER" => Lower,
            "UPPER" => Upper,
            "TRIM" => Trim,
            "REPLACE" => Replace,
            "COALESCE" => Coalesce,
            "CAST" => Cast,
            "DATE" => Date,
            "TIME" => Time,
            "EXTRACT" => Extract,
            "IFNULL" => Ifnull,
            "GREATEST" => Greatest,
            "LEAST" => Least,
            "RAND" => Rand,
            "FLOOR" => Floor,
            "CEIL" => Ceil,
            "PI" => Pi,
            "DEGREES" => Degrees,
            "RADIANS" => Radians,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Func::*;
        match self {
            Abs => "ABS",
            Round => "ROUND",
            Now => "NOW",
            Sin => "SIN",
            Cos => "COS",
            Tan => "TAN",
            Log => "LOG",
            Pow => "POW",
            Concat => "CONCAT",
            Substring => "SUBSTRING",
            Length => "LENGTH",
            Lower => "LOWER",
            Upper => "UPPER",
            Trim => "TRIM",
            Replace => "REPLACE",
            Coalesce => "COALESCE",
            Cast => "CAST",
            Date => "DATE",
            Time => "TIME",
            Extract => "EXTRACT",
            Ifnull => "IFNULL",
            Greatest => "GREATEST",
            Least => "LEAST",
            Rand => "RAND",
            Floor => "FLOOR",
            Ceil => "CEIL",
            Pi => "PI",
            Degrees => "DEGREES",
            Radians => "RADIANS",
        }
    }
}

/// Aggregate functions, treated as whole-result-set reducers by the
/// executor rather than per-row scalars.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Agg {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Agg {
    pub fn from_name(name: &str) -> Option<Agg> {
        Some(match name.to_ascii_uppercase().as_str() {
            "COUNT" => Agg::Count,
            "SUM" => Agg::Sum,
            "AVG" => Agg::Avg,
            "MIN" => Agg::Min,
            "MAX" => Agg::Max,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Agg::Count => "COUNT",
            Agg::Sum => "SUM",
            Agg::Avg => "AVG",
            Agg::Min => "MIN",
            Agg::Max => "MAX",
        }
    }
}

/// A parsed expression.
#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(ColumnValue),
    /// Positional column reference, with optional array element access.
    Column {
        index: usize,
        array_idx: Option<Box<ExprNode>>,
    },
    /// Unary minus ( unary plus parses to the operand itself ).
    Neg(Box<ExprNode>),
    Binary {
        op: BinOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Compare {
        op: CmpOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Like {
        left: Box<ExprNode>,
        pattern: String,
    },
    Between {
        value: Box<ExprNode>,
        lower: Box<ExprNode>,
        upper: Box<ExprNode>,
    },
    In {
        value: Box<ExprNode>,
        list: Vec<ExprNode>,
    },
    Not(Box<ExprNode>),
    And(Box<ExprNode>, Box<ExprNode>),
    Or(Box<ExprNode>, Box<ExprNode>),
    Func {
        f: Func,
        args: Vec<ExprNode>,
    },
    Aggregate {
        agg: Agg,
        /// None for COUNT(*).
        arg: Option<Box<ExprNode>>,
    },
}

impl ExprNode {
    /// Whether an aggregate appears anywhere in this tree.
    pub fn has_aggregate(&self) -> bool {
        use ExprNode::*;
        match self {
            Aggregate { .. } => true,
            Literal(_) | Column { .. } => false,
            Neg(e) | Not(e) => e.has_aggregate(),
            Binary { left, right, .. } | Compare { left, right, .. } => {
                left.has_aggregate() || right.has_aggregate()
            }
            And(a, b) | Or(a, b) => a.has_aggregate() || b.has_aggregate(),
            Like { left, .. } => left.has_aggregate(),
            Between { value, lower, upper } => {
                value.has_aggregate() || lower.has_aggregate() || upper.has_aggregate()
            }
            In { value, list } => value.has_aggregate() || list.iter().any(|e| e.has_aggregate()),
            Func { args, .. } => args.iter().any(|e| e.has_aggregate()),
        }
    }

    /// If this expression is `col = literal` ( either side ), return the
    /// column index and the literal. Used to bound scans to an index lookup.
    pub fn as_eq_literal(&self) -> Option<(usize, &ColumnValue)> {
        if let ExprNode::Compare {
            op: CmpOp::Eq,
            left,
            right,
        } = self
        {
            match (&**left, &**right) {
                (ExprNode::Column { index, array_idx: None }, ExprNode::Literal(v))
                | (ExprNode::Literal(v), ExprNode::Column { index, array_idx: None }) => {
                    return Some((*index, v));
                }
                _ => {}
            }
        }
        None
    }
}
