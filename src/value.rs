use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// Scalar kind tag. The same byte values are used for `LoadConst` constant
/// tags and for the declared-type byte of stores and prologues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Int = 0,
    Float = 1,
    String = 2,
    Char = 3,
    Bool = 4,
    Void = 5,
}

impl TypeTag {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => TypeTag::Int,
            1 => TypeTag::Float,
            2 => TypeTag::String,
            3 => TypeTag::Char,
            4 => TypeTag::Bool,
            5 => TypeTag::Void,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn default_value(self) -> Value {
        match self {
            TypeTag::Int => Value::Int(0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::String => Value::Str(String::new()),
            TypeTag::Char => Value::Char('\0'),
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Void => Value::Void,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Char => "char",
            TypeTag::Bool => "bool",
            TypeTag::Void => "void",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A runtime scalar. Values never reference each other.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    /// Restricted to U+0000..=U+00FF so it fits the one-byte payload.
    Char(char),
    Bool(bool),
    Void,
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::String,
            Value::Char(_) => TypeTag::Char,
            Value::Bool(_) => TypeTag::Bool,
            Value::Void => TypeTag::Void,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Char(c) => *c != '\0',
            Value::Bool(b) => *b,
            Value::Void => false,
        }
    }

    /// Numeric view used for mixed comparisons. Every i32 and f32 is exact in f64.
    fn number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    fn float(&self) -> Option<f32> {
        match self {
            Value::Int(n) => Some(*n as f32),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert to a declared type. `Void` means "untyped" and keeps the value.
    pub fn coerce(self, tag: TypeTag) -> Result<Value, CoerceError> {
        let from = self.tag();
        let converted = match (tag, self) {
            (TypeTag::Void, v) => Some(v),
            (TypeTag::String, Value::Str(s)) => Some(Value::Str(s)),
            (TypeTag::String, v) => Some(Value::Str(v.to_string())),
            (TypeTag::Bool, v) => Some(Value::Bool(v.is_truthy())),
            (TypeTag::Int, Value::Int(n)) => Some(Value::Int(n)),
            (TypeTag::Int, Value::Float(f)) => Some(Value::Int(f as i32)),
            (TypeTag::Int, Value::Char(c)) => Some(Value::Int(c as i32)),
            (TypeTag::Int, Value::Bool(b)) => Some(Value::Int(b as i32)),
            (TypeTag::Float, Value::Float(f)) => Some(Value::Float(f)),
            (TypeTag::Float, Value::Int(n)) => Some(Value::Float(n as f32)),
            (TypeTag::Float, Value::Char(c)) => Some(Value::Float(c as u32 as f32)),
            (TypeTag::Char, Value::Char(c)) => Some(Value::Char(c)),
            (TypeTag::Char, Value::Int(n)) => u8::try_from(n).ok().map(|b| Value::Char(char::from(b))),
            _ => None,
        };
        converted.ok_or(CoerceError { from, to: tag })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Char(c) => write!(f, "{}", c),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Void => f.write_str("void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArithError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch { op: BinaryOp, left: TypeTag, right: TypeTag },
    #[error("cannot negate {0}")]
    Negate(TypeTag),
    #[error("repeated string would be {0} bytes, over the limit of {MAX_STRING_LEN}")]
    StringTooLong(usize),
}

impl ArithError {
    /// Value pushed in place of the failed result so execution can continue.
    pub fn substitute(&self) -> Value {
        match self {
            ArithError::DivisionByZero => Value::Float(f32::INFINITY),
            ArithError::TypeMismatch { op, .. } if op.is_comparison() => Value::Bool(false),
            ArithError::TypeMismatch { .. } | ArithError::Negate(_) => Value::Int(0),
            ArithError::StringTooLong(_) => Value::Str(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert {from} to {to}")]
pub struct CoerceError {
    pub from: TypeTag,
    pub to: TypeTag,
}

impl CoerceError {
    pub fn substitute(&self) -> Value {
        self.to.default_value()
    }
}

/// Apply a binary operator to `left op right`.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ArithError> {
    if op.is_comparison() {
        return compare(op, left, right);
    }
    match (left, right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinaryOp::Mul => {
            repeat(s, *n).map(Value::Str)
        }
        (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", left, right))),
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (left.float(), right.float()) {
                (Some(a), Some(b)) => float_arith(op, a, b),
                _ => Err(mismatch(op, left, right)),
            }
        }
        _ => Err(mismatch(op, left, right)),
    }
}

pub fn negate(value: &Value) -> Result<Value, ArithError> {
    match value {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(ArithError::Negate(other.tag())),
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ArithError {
    ArithError::TypeMismatch { op, left: left.tag(), right: right.tag() }
}

/// Longest string `*` repetition may build.
pub const MAX_STRING_LEN: usize = 1 << 24;

fn repeat(s: &str, count: i32) -> Result<String, ArithError> {
    let Ok(count) = usize::try_from(count) else {
        return Ok(String::new());
    };
    match s.len().checked_mul(count) {
        Some(len) if len <= MAX_STRING_LEN => Ok(s.repeat(count)),
        Some(len) => Err(ArithError::StringTooLong(len)),
        None => Err(ArithError::StringTooLong(usize::MAX)),
    }
}

fn int_arith(op: BinaryOp, a: i32, b: i32) -> Result<Value, ArithError> {
    let n = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return Err(ArithError::DivisionByZero),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod if b == 0 => return Err(ArithError::DivisionByZero),
        BinaryOp::Mod => a.wrapping_rem(b),
        _ => return Err(ArithError::TypeMismatch { op, left: TypeTag::Int, right: TypeTag::Int }),
    };
    Ok(Value::Int(n))
}

fn float_arith(op: BinaryOp, a: f32, b: f32) -> Result<Value, ArithError> {
    let x = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(ArithError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(ArithError::TypeMismatch { op, left: TypeTag::Float, right: TypeTag::Float }),
    };
    Ok(Value::Float(x))
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ArithError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        _ => match (left.number(), right.number()) {
            // NaN compares unordered
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                let equal = left == right;
                return Ok(Value::Bool(equal == (op == BinaryOp::Eq)));
            }
            _ => return Err(mismatch(op, left, right)),
        },
    };
    Ok(Value::Bool(holds(op, ordering)))
}

fn holds(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    match (op, ordering) {
        (BinaryOp::Ne, None) => true,
        (_, None) => false,
        (BinaryOp::Eq, Some(o)) => o.is_eq(),
        (BinaryOp::Ne, Some(o)) => o.is_ne(),
        (BinaryOp::Lt, Some(o)) => o.is_lt(),
        (BinaryOp::Le, Some(o)) => o.is_le(),
        (BinaryOp::Gt, Some(o)) => o.is_gt(),
        (BinaryOp::Ge, Some(o)) => o.is_ge(),
        (_, Some(_)) => false,
    }
}
