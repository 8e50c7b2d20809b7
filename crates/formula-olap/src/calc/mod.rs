//! Compiled calculation nodes.
//!
//! A [`Calc`] is produced once by the [`crate::Compiler`] and evaluated many times against an
//! [`Evaluator`]. Nodes hold no per-evaluation state; everything that varies between evaluations
//! (coordinate, non-empty mode, slicer) lives in the evaluator.

pub(crate) mod aggregate;
pub(crate) mod member;
pub(crate) mod scalar;
pub(crate) mod set;
mod style;

pub use style::{ResultStyle, TupleIter, TupleSet};

use crate::error::{OlapError, OlapResult};
use crate::evaluator::Evaluator;
use crate::model::{HierarchyId, Member, Tuple};
use crate::value::{Shape, Value};
use std::fmt;
use std::sync::Arc;

pub type CalcRef = Arc<dyn Calc>;

pub trait Calc: fmt::Debug + Send + Sync {
    /// The natural output shape. Fixed at compile time.
    fn shape(&self) -> Shape;

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value>;

    fn children(&self) -> Vec<&CalcRef> {
        Vec::new()
    }

    /// Whether the value may change when the current member of `hierarchy` changes.
    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.children().iter().any(|c| c.depends_on(hierarchy))
    }

    /// Set representations this node can produce, cheapest first. Non-set nodes report
    /// `[Value]`.
    fn result_styles(&self) -> &'static [ResultStyle] {
        &[ResultStyle::Value]
    }

    /// Evaluates a set-valued node in the representation negotiated at compile time.
    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        match self.evaluate(ev)? {
            Value::Set(list) => Ok(TupleSet::List(list).adapt(style)),
            Value::Null => Ok(TupleSet::empty()),
            other => Err(OlapError::internal(format!(
                "{self:?} produced {} where a set was expected",
                other.type_name()
            ))),
        }
    }

    /// For `Aggregate(set)` nodes: the set being rolled up. The native dispatcher uses it to
    /// accept calculated members that are plain aggregates of stored members.
    fn aggregated_set(&self) -> Option<&SetOperand> {
        None
    }
}

impl dyn Calc {
    pub fn evaluate_number(&self, ev: &mut Evaluator<'_>) -> OlapResult<Option<f64>> {
        self.evaluate(ev)?.to_number()
    }

    pub fn evaluate_integer(&self, ev: &mut Evaluator<'_>) -> OlapResult<Option<i64>> {
        self.evaluate(ev)?.to_integer()
    }

    pub fn evaluate_boolean(&self, ev: &mut Evaluator<'_>) -> OlapResult<Option<bool>> {
        self.evaluate(ev)?.to_boolean()
    }

    pub fn evaluate_string(&self, ev: &mut Evaluator<'_>) -> OlapResult<Option<Arc<str>>> {
        self.evaluate(ev)?.to_text()
    }

    pub fn evaluate_member(&self, ev: &mut Evaluator<'_>) -> OlapResult<Member> {
        match self.evaluate(ev)? {
            Value::Member(member) => Ok(member),
            Value::Null => Err(OlapError::NullMember(format!("{self:?}"))),
            other => Err(OlapError::internal(format!(
                "{self:?} produced {} where a member was expected",
                other.type_name()
            ))),
        }
    }

    pub fn evaluate_tuple(&self, ev: &mut Evaluator<'_>) -> OlapResult<Tuple> {
        match self.evaluate(ev)? {
            Value::Tuple(tuple) => Ok(tuple),
            Value::Member(member) => Ok(Tuple::single(member)),
            Value::Null => Err(OlapError::NullMember(format!("{self:?}"))),
            other => Err(OlapError::internal(format!(
                "{self:?} produced {} where a tuple was expected",
                other.type_name()
            ))),
        }
    }
}

/// A compiled set operand together with the representation negotiated for it.
#[derive(Clone, Debug)]
pub struct SetOperand {
    calc: CalcRef,
    style: ResultStyle,
}

impl SetOperand {
    pub(crate) fn new(calc: CalcRef, style: ResultStyle) -> Self {
        Self { calc, style }
    }

    pub fn calc(&self) -> &CalcRef {
        &self.calc
    }

    pub fn style(&self) -> ResultStyle {
        self.style
    }

    pub fn arity(&self) -> usize {
        self.calc.shape().arity().unwrap_or(1)
    }

    /// Evaluates the operand. A node that hands back a lazy sequence where a list was negotiated
    /// is materialized here, once.
    pub fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<TupleSet> {
        let set = self.calc.evaluate_set(ev, self.style)?;
        Ok(set.adapt(self.style))
    }

    pub fn evaluate_list(&self, ev: &mut Evaluator<'_>) -> OlapResult<Arc<[Tuple]>> {
        Ok(self.evaluate(ev)?.into_list())
    }

    pub fn evaluate_mutable(&self, ev: &mut Evaluator<'_>) -> OlapResult<Vec<Tuple>> {
        Ok(self.evaluate(ev)?.into_mutable())
    }

    pub fn evaluate_iter(&self, ev: &mut Evaluator<'_>) -> OlapResult<TupleIter> {
        Ok(self.evaluate(ev)?.into_iter_tuples())
    }
}

/// Implements [`Calc::evaluate`] for set nodes by materializing into a shared list.
pub(crate) fn set_value(calc: &dyn Calc, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
    Ok(Value::Set(calc.evaluate_set(ev, ResultStyle::List)?.into_list()))
}
