use crate::error::{OlapError, OlapResult};
use crate::model::{Hierarchy, LevelRef, Member, Tuple};
use std::fmt;
use std::sync::Arc;

/// A runtime value produced by a compiled node.
///
/// `Null` is the "no applicable value" sentinel shared by every scalar kind. It is distinct from
/// `0`, `""` and `false`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Member(Member),
    Tuple(Tuple),
    Set(Arc<[Tuple]>),
    Level(LevelRef),
    Hierarchy(Hierarchy),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of a scalar; `None` is the null sentinel.
    pub fn to_number(&self) -> OlapResult<Option<f64>> {
        match self {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i as f64)),
            Value::Float(f) => Ok(Some(*f)),
            Value::Boolean(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => Ok(Some(n)),
                Err(_) => Err(OlapError::Eval(format!(
                    "cannot convert string \"{s}\" to a number"
                ))),
            },
            other => Err(OlapError::Eval(format!(
                "expected a numeric value, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_integer(&self) -> OlapResult<Option<i64>> {
        match self {
            Value::Integer(i) => Ok(Some(*i)),
            other => Ok(other.to_number()?.map(|n| n.trunc() as i64)),
        }
    }

    pub fn to_boolean(&self) -> OlapResult<Option<bool>> {
        match self {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            Value::Integer(i) => Ok(Some(*i != 0)),
            Value::Float(f) => Ok(Some(*f != 0.0)),
            other => Err(OlapError::Eval(format!(
                "expected a boolean value, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_text(&self) -> OlapResult<Option<Arc<str>>> {
        match self {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Arc::clone(s))),
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => {
                Ok(Some(self.to_string().into()))
            }
            Value::Member(m) => Ok(Some(m.name().into())),
            other => Err(OlapError::Eval(format!(
                "expected a string value, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Member(_) => "member",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Level(_) => "level",
            Value::Hierarchy(_) => "hierarchy",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => f.write_str(s),
            Value::Member(m) => f.write_str(m.unique_name()),
            Value::Tuple(t) => write!(f, "{t:?}"),
            Value::Set(tuples) => write!(f, "{{{} tuples}}", tuples.len()),
            Value::Level(l) => write!(f, "{l}"),
            Value::Hierarchy(h) => write!(f, "[{}]", h.name()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Value::Null, Value::Float)
    }
}

/// The type a caller asks the compiler for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Boolean,
    Integer,
    Numeric,
    String,
    /// Any scalar.
    Value,
    Member,
    Tuple,
    Set,
    Level,
    Hierarchy,
    /// A bare flag keyword such as `DESC`.
    Symbol,
}

impl Category {
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Category::Boolean
                | Category::Integer
                | Category::Numeric
                | Category::String
                | Category::Value
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Boolean => "boolean",
            Category::Integer => "integer",
            Category::Numeric => "numeric",
            Category::String => "string",
            Category::Value => "value",
            Category::Member => "member",
            Category::Tuple => "tuple",
            Category::Set => "set",
            Category::Level => "level",
            Category::Hierarchy => "hierarchy",
            Category::Symbol => "symbol",
        };
        f.write_str(name)
    }
}

/// The natural output shape of a compiled node. Closed: every node produces exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Boolean,
    Integer,
    Float,
    String,
    /// A scalar whose kind is only known at evaluation time (e.g. a cell value).
    Scalar,
    Member,
    Tuple { arity: usize },
    Set { arity: usize },
    Level,
    Hierarchy,
    Symbol,
}

impl Shape {
    pub fn category(self) -> Category {
        match self {
            Shape::Boolean => Category::Boolean,
            Shape::Integer => Category::Integer,
            Shape::Float => Category::Numeric,
            Shape::String => Category::String,
            Shape::Scalar => Category::Value,
            Shape::Member => Category::Member,
            Shape::Tuple { .. } => Category::Tuple,
            Shape::Set { .. } => Category::Set,
            Shape::Level => Category::Level,
            Shape::Hierarchy => Category::Hierarchy,
            Shape::Symbol => Category::Symbol,
        }
    }

    /// Number of members per tuple for member, tuple and set shapes.
    pub fn arity(self) -> Option<usize> {
        match self {
            Shape::Member => Some(1),
            Shape::Tuple { arity } | Shape::Set { arity } => Some(arity),
            _ => None,
        }
    }

    pub fn is_scalar(self) -> bool {
        self.category().is_scalar()
    }

    /// The natural shape produced when a node of this shape is asked for `category`.
    pub fn converted_to(self, category: Category) -> Shape {
        match category {
            Category::Boolean => Shape::Boolean,
            Category::Integer => Shape::Integer,
            Category::Numeric => {
                if self == Shape::Integer {
                    Shape::Integer
                } else {
                    Shape::Float
                }
            }
            Category::String => Shape::String,
            Category::Value => {
                if self.is_scalar() {
                    self
                } else {
                    Shape::Scalar
                }
            }
            Category::Member => Shape::Member,
            Category::Tuple => Shape::Tuple {
                arity: self.arity().unwrap_or(1),
            },
            Category::Set => Shape::Set {
                arity: self.arity().unwrap_or(1),
            },
            Category::Level => Shape::Level,
            Category::Hierarchy => Shape::Hierarchy,
            Category::Symbol => Shape::Symbol,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Tuple { arity } => write!(f, "tuple/{arity}"),
            Shape::Set { arity } => write!(f, "set/{arity}"),
            Shape::Float => f.write_str("float"),
            Shape::Scalar => f.write_str("scalar"),
            other => write!(f, "{}", other.category()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_zero() {
        assert_eq!(Value::Null.to_number().unwrap(), None);
        assert_eq!(Value::Float(0.0).to_number().unwrap(), Some(0.0));
        assert_eq!(Value::Null.to_text().unwrap(), None);
    }

    #[test]
    fn non_numeric_strings_fail_coercion() {
        let err = Value::from("abc").to_number().unwrap_err();
        assert!(err.is_cell_error());
        assert_eq!(Value::from(" 12.5 ").to_number().unwrap(), Some(12.5));
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(Value::Float(4.0).to_string(), "4");
        assert_eq!(Value::Float(4.25).to_string(), "4.25");
        assert_eq!(Value::Null.to_string(), "");
    }
}
