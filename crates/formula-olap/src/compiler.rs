//! Expression compiler.
//!
//! `compile(exp, category)` works in two steps: the expression is compiled to the node its own
//! signature produces (its natural shape), then a conversion node is inserted when the caller
//! asked for a different category. Function calls are resolved against the [`FunctionTable`] by
//! name, syntax and argument count; among the candidates the one whose arguments need the
//! cheapest conversions wins.

use crate::calc::member::{CurrentMemberCalc, MemberConstantCalc, MemberToTupleCalc};
use crate::calc::scalar::{CoerceCalc, ConstantCalc, MemberValueCalc, ToStringCalc, TruncateCalc};
use crate::calc::set::SingletonSetCalc;
use crate::calc::{CalcRef, ResultStyle, SetOperand};
use crate::error::{OlapError, OlapResult};
use crate::functions::{CallSite, FunctionTable, Returns};
use crate::syntax::{Exp, Literal};
use crate::value::{Category, Shape, Value};
use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Compiles expressions against one function table. Cheap to construct; one compiler may be used
/// for any number of expressions.
#[derive(Clone)]
pub struct Compiler<'a> {
    functions: &'a FunctionTable,
    /// Argument shapes of call nodes, keyed by node address. Emptied whenever the outermost
    /// `compile`/`type_of` returns, so every key points into the tree being compiled.
    shape_memo: RefCell<AHashMap<usize, Vec<Shape>>>,
    depth: Cell<usize>,
    #[cfg(test)]
    shape_passes: Cell<usize>,
}

impl<'a> Compiler<'a> {
    pub fn new(functions: &'a FunctionTable) -> Self {
        Self {
            functions,
            shape_memo: RefCell::default(),
            depth: Cell::new(0),
            #[cfg(test)]
            shape_passes: Cell::new(0),
        }
    }

    pub fn functions(&self) -> &'a FunctionTable {
        self.functions
    }

    /// The natural shape of `exp`, without compiling it.
    pub fn type_of(&self, exp: &Exp) -> OlapResult<Shape> {
        self.nested(|| self.natural_shape(exp))
    }

    fn natural_shape(&self, exp: &Exp) -> OlapResult<Shape> {
        Ok(match exp {
            Exp::Literal(lit) => literal_shape(lit),
            Exp::Member(_) => Shape::Member,
            Exp::Level(_) => Shape::Level,
            Exp::Hierarchy(_) => Shape::Hierarchy,
            Exp::Symbol(_) => Shape::Symbol,
            Exp::Call { name, syntax, args } => {
                let shapes = self.arg_shapes(exp, args)?;
                let spec = self.functions.resolve(name, *syntax, &shapes)?;
                return_shape(spec.return_type, &shapes)
            }
        })
    }

    /// Compiles `exp` so that it produces a value of `category`.
    pub fn compile(&self, exp: &Exp, category: Category) -> OlapResult<CalcRef> {
        self.nested(|| {
            let calc = self.compile_natural(exp)?;
            self.convert(exp, calc, category)
        })
    }

    /// Compiles a set operand and negotiates its representation with the consumer's
    /// preferences, `accepts`, most preferred first.
    pub fn compile_set(&self, exp: &Exp, accepts: &[ResultStyle]) -> OlapResult<SetOperand> {
        let calc = self.compile(exp, Category::Set)?;
        let produced = calc.result_styles();
        match ResultStyle::negotiate(produced, accepts) {
            Some(style) => Ok(SetOperand::new(calc, style)),
            None => Err(OlapError::NoAcceptableRepresentation {
                expression: exp.to_string(),
                produced: produced.to_vec(),
                accepted: accepts.to_vec(),
            }),
        }
    }

    pub(crate) fn compile_opt(
        &self,
        exp: Option<&Exp>,
        category: Category,
    ) -> OlapResult<Option<CalcRef>> {
        exp.map(|exp| self.compile(exp, category)).transpose()
    }

    fn nested<T>(&self, f: impl FnOnce() -> T) -> T {
        self.depth.set(self.depth.get() + 1);
        let result = f();
        self.depth.set(self.depth.get() - 1);
        if self.depth.get() == 0 {
            self.shape_memo.borrow_mut().clear();
        }
        result
    }

    /// Shapes of a call's arguments. Each call node is typed once per outermost compile; the
    /// nodes below it are typed again only when a function compiles them.
    fn arg_shapes(&self, call: &Exp, args: &[Exp]) -> OlapResult<Vec<Shape>> {
        let key = call as *const Exp as usize;
        if let Some(shapes) = self.shape_memo.borrow().get(&key) {
            return Ok(shapes.clone());
        }
        #[cfg(test)]
        self.shape_passes.set(self.shape_passes.get() + 1);
        let shapes = args
            .iter()
            .map(|arg| self.natural_shape(arg))
            .collect::<OlapResult<Vec<_>>>()?;
        self.shape_memo.borrow_mut().insert(key, shapes.clone());
        Ok(shapes)
    }

    fn compile_natural(&self, exp: &Exp) -> OlapResult<CalcRef> {
        Ok(match exp {
            Exp::Literal(lit) => Arc::new(ConstantCalc::new(literal_value(lit), literal_shape(lit))),
            Exp::Member(member) => Arc::new(MemberConstantCalc::new(member.clone())),
            Exp::Level(level) => Arc::new(ConstantCalc::new(
                Value::Level(level.clone()),
                Shape::Level,
            )),
            Exp::Hierarchy(hierarchy) => Arc::new(ConstantCalc::new(
                Value::Hierarchy(hierarchy.clone()),
                Shape::Hierarchy,
            )),
            Exp::Symbol(symbol) => Arc::new(ConstantCalc::new(
                Value::String(Arc::clone(symbol)),
                Shape::Symbol,
            )),
            Exp::Call { name, syntax, args } => {
                let shapes = self.arg_shapes(exp, args)?;
                let spec = self.functions.resolve(name, *syntax, &shapes)?;
                let site = CallSite {
                    name,
                    syntax: *syntax,
                    args,
                    exp,
                    spec,
                };
                (spec.implementation)(self, &site)?
            }
        })
    }

    fn convert(&self, exp: &Exp, calc: CalcRef, to: Category) -> OlapResult<CalcRef> {
        let from = calc.shape();
        if from.category() == to {
            return Ok(calc);
        }
        let converted: CalcRef = match (from, to) {
            (_, Category::Value) if from.is_scalar() => return Ok(calc),
            (Shape::Integer, Category::Numeric) => return Ok(calc),
            (Shape::Float, Category::Integer) => Arc::new(TruncateCalc::new(calc)),
            (Shape::Integer | Shape::Float | Shape::Boolean, Category::String) => {
                Arc::new(ToStringCalc::new(calc))
            }
            (
                Shape::Scalar | Shape::Boolean | Shape::Integer | Shape::String,
                Category::Numeric | Category::Integer | Category::Boolean | Category::String,
            )
            | (Shape::Float, Category::Numeric | Category::Boolean) => {
                Arc::new(CoerceCalc::new(calc, to))
            }
            (Shape::Member, Category::Tuple) => Arc::new(MemberToTupleCalc::new(calc)),
            (Shape::Member | Shape::Tuple { .. }, Category::Set) => {
                Arc::new(SingletonSetCalc::new(calc))
            }
            (Shape::Member | Shape::Tuple { .. }, Category::Value) => {
                Arc::new(MemberValueCalc::new(calc))
            }
            (
                Shape::Member | Shape::Tuple { .. },
                Category::Numeric | Category::Integer | Category::Boolean | Category::String,
            ) => Arc::new(CoerceCalc::new(Arc::new(MemberValueCalc::new(calc)), to)),
            (Shape::Hierarchy, Category::Member) => match exp {
                Exp::Hierarchy(hierarchy) => Arc::new(CurrentMemberCalc::new(hierarchy.id())),
                _ => return Err(no_conversion(exp, from, to)),
            },
            _ => return Err(no_conversion(exp, from, to)),
        };
        Ok(converted)
    }
}

fn no_conversion(exp: &Exp, from: Shape, to: Category) -> OlapError {
    OlapError::NoConversion {
        expression: exp.to_string(),
        from,
        to,
    }
}

fn literal_shape(lit: &Literal) -> Shape {
    match lit {
        Literal::Null => Shape::Scalar,
        Literal::Number(_) => Shape::Float,
        Literal::Integer(_) => Shape::Integer,
        Literal::String(_) => Shape::String,
        Literal::Boolean(_) => Shape::Boolean,
    }
}

pub(crate) fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Number(n) => Value::Float(*n),
        Literal::Integer(n) => Value::Integer(*n),
        Literal::String(s) => Value::String(Arc::clone(s)),
        Literal::Boolean(b) => Value::Boolean(*b),
    }
}

/// Cost of converting a node of shape `from` to `to`, or `None` when no conversion exists.
/// Overload resolution sums these over the arguments.
pub(crate) fn conversion_cost(from: Shape, to: Category) -> Option<u32> {
    if from.category() == to {
        return Some(0);
    }
    let member_like = matches!(from, Shape::Member | Shape::Tuple { .. });
    match to {
        Category::Value if from.is_scalar() => Some(0),
        Category::Value if member_like => Some(2),
        Category::Numeric => match from {
            Shape::Integer => Some(0),
            Shape::Scalar | Shape::Boolean => Some(1),
            Shape::String => Some(2),
            _ if member_like => Some(3),
            _ => None,
        },
        Category::Integer => match from {
            Shape::Float | Shape::Scalar => Some(1),
            Shape::Boolean | Shape::String => Some(2),
            _ if member_like => Some(3),
            _ => None,
        },
        Category::Boolean => match from {
            Shape::Scalar | Shape::Integer | Shape::Float => Some(1),
            Shape::String => Some(2),
            _ if member_like => Some(3),
            _ => None,
        },
        Category::String => match from {
            Shape::Scalar | Shape::Integer | Shape::Float | Shape::Boolean => Some(1),
            _ if member_like => Some(3),
            _ => None,
        },
        Category::Member => (from == Shape::Hierarchy).then_some(1),
        Category::Tuple => (from == Shape::Member).then_some(1),
        Category::Set => match from {
            Shape::Tuple { .. } => Some(1),
            Shape::Member => Some(2),
            _ => None,
        },
        _ => None,
    }
}

/// The more general of two scalar shapes.
fn unify(left: Shape, right: Shape) -> Shape {
    match (left, right) {
        (l, r) if l == r => l,
        (Shape::Integer, Shape::Float) | (Shape::Float, Shape::Integer) => Shape::Float,
        _ => Shape::Scalar,
    }
}

pub(crate) fn return_shape(returns: Returns, args: &[Shape]) -> Shape {
    let arity = |shape: &Shape| shape.arity().unwrap_or(1);
    match returns {
        Returns::Fixed(shape) => shape,
        Returns::SetOf(idx) => Shape::Set {
            arity: args.get(idx).map_or(1, arity),
        },
        Returns::CrossJoin | Returns::Tuple => {
            let total = args.iter().map(arity).sum();
            if matches!(returns, Returns::Tuple) {
                Shape::Tuple { arity: total }
            } else {
                Shape::Set { arity: total }
            }
        }
        Returns::Braces => Shape::Set {
            arity: args.first().map_or(1, arity),
        },
        Returns::Unified { from } => args
            .iter()
            .skip(from)
            .map(|shape| if shape.is_scalar() { *shape } else { Shape::Scalar })
            .reduce(unify)
            .unwrap_or(Shape::Scalar),
    }
}
