use super::{Calc, CalcRef};
use crate::error::{OlapError, OlapResult};
use crate::evaluator::Evaluator;
use crate::format::Formatter;
use crate::model::HierarchyId;
use crate::schema::CompareOp;
use crate::value::{Category, Shape, Value};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct ConstantCalc {
    value: Value,
    shape: Shape,
}

impl ConstantCalc {
    pub(crate) fn new(value: Value, shape: Shape) -> Self {
        Self { value, shape }
    }

    pub(crate) fn value(&self) -> &Value {
        &self.value
    }
}

impl Calc for ConstantCalc {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn evaluate(&self, _ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(self.value.clone())
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub(crate) fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => ArithOp::Add,
            "-" => ArithOp::Sub,
            "*" => ArithOp::Mul,
            "/" => ArithOp::Div,
            _ => return None,
        })
    }

    /// Null rules: `+`/`-` treat one null side as zero and give null only when both sides are
    /// null; `*`/`/` give null when either side is.
    pub(crate) fn apply(self, left: Option<f64>, right: Option<f64>) -> OlapResult<Option<f64>> {
        match self {
            ArithOp::Add | ArithOp::Sub => {
                if left.is_none() && right.is_none() {
                    return Ok(None);
                }
                let (l, r) = (left.unwrap_or(0.0), right.unwrap_or(0.0));
                Ok(Some(if self == ArithOp::Add { l + r } else { l - r }))
            }
            ArithOp::Mul => Ok(left.zip(right).map(|(l, r)| l * r)),
            ArithOp::Div => match (left, right) {
                (Some(_), Some(r)) if r == 0.0 => Err(OlapError::DivisionByZero),
                (Some(l), Some(r)) => Ok(Some(l / r)),
                _ => Ok(None),
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct ArithmeticCalc {
    op: ArithOp,
    left: CalcRef,
    right: CalcRef,
}

impl ArithmeticCalc {
    pub(crate) fn new(op: ArithOp, left: CalcRef, right: CalcRef) -> Self {
        Self { op, left, right }
    }
}

impl Calc for ArithmeticCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let left = self.left.evaluate_number(ev)?;
        if self.op == ArithOp::Mul && left.is_none() {
            return Ok(Value::Null);
        }
        let right = self.right.evaluate_number(ev)?;
        Ok(self.op.apply(left, right)?.into())
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.left, &self.right]
    }
}

#[derive(Debug)]
pub(crate) struct NegateCalc {
    arg: CalcRef,
}

impl NegateCalc {
    pub(crate) fn new(arg: CalcRef) -> Self {
        Self { arg }
    }
}

impl Calc for NegateCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(self.arg.evaluate_number(ev)?.map(|n| -n).into())
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

/// Compares numbers, or strings when either operand is textual. Null on either side gives null.
pub(crate) fn compare_values(op: CompareOp, left: &Value, right: &Value) -> OlapResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = match (left, right) {
        (Value::String(l), Value::String(r)) => l.as_ref().cmp(r.as_ref()),
        (Value::String(l), other) | (other, Value::String(l))
            if other.to_number().is_err() =>
        {
            let r = other.to_text()?.unwrap_or_default();
            let ord = l.as_ref().cmp(r.as_ref());
            if matches!(left, Value::String(_)) {
                ord
            } else {
                ord.reverse()
            }
        }
        _ => {
            let (Some(l), Some(r)) = (left.to_number()?, right.to_number()?) else {
                return Ok(Value::Null);
            };
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
    };
    Ok(Value::Boolean(op.test(&ordering, &Ordering::Equal)))
}

#[derive(Debug)]
pub(crate) struct CompareCalc {
    op: CompareOp,
    left: CalcRef,
    right: CalcRef,
}

impl CompareCalc {
    pub(crate) fn new(op: CompareOp, left: CalcRef, right: CalcRef) -> Self {
        Self { op, left, right }
    }
}

impl Calc for CompareCalc {
    fn shape(&self) -> Shape {
        Shape::Boolean
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let left = self.left.evaluate(ev)?;
        let right = self.right.evaluate(ev)?;
        compare_values(self.op, &left, &right)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.left, &self.right]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
}

#[derive(Debug)]
pub(crate) struct LogicalCalc {
    op: LogicalOp,
    left: CalcRef,
    right: CalcRef,
}

impl LogicalCalc {
    pub(crate) fn new(op: LogicalOp, left: CalcRef, right: CalcRef) -> Self {
        Self { op, left, right }
    }
}

impl Calc for LogicalCalc {
    fn shape(&self) -> Shape {
        Shape::Boolean
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let left = self.left.evaluate_boolean(ev)?.unwrap_or(false);
        let result = match (self.op, left) {
            (LogicalOp::And, false) => false,
            (LogicalOp::Or, true) => true,
            _ => self.right.evaluate_boolean(ev)?.unwrap_or(false),
        };
        Ok(Value::Boolean(result))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.left, &self.right]
    }
}

#[derive(Debug)]
pub(crate) struct NotCalc {
    arg: CalcRef,
}

impl NotCalc {
    pub(crate) fn new(arg: CalcRef) -> Self {
        Self { arg }
    }
}

impl Calc for NotCalc {
    fn shape(&self) -> Shape {
        Shape::Boolean
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Boolean(!self.arg.evaluate_boolean(ev)?.unwrap_or(false)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

#[derive(Debug)]
pub(crate) struct IIfCalc {
    condition: CalcRef,
    then: CalcRef,
    otherwise: CalcRef,
    shape: Shape,
}

impl IIfCalc {
    pub(crate) fn new(condition: CalcRef, then: CalcRef, otherwise: CalcRef, shape: Shape) -> Self {
        Self {
            condition,
            then,
            otherwise,
            shape,
        }
    }
}

impl Calc for IIfCalc {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        if self.condition.evaluate_boolean(ev)?.unwrap_or(false) {
            self.then.evaluate(ev)
        } else {
            self.otherwise.evaluate(ev)
        }
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.condition, &self.then, &self.otherwise]
    }
}

#[derive(Debug)]
pub(crate) struct IsEmptyCalc {
    arg: CalcRef,
}

impl IsEmptyCalc {
    pub(crate) fn new(arg: CalcRef) -> Self {
        Self { arg }
    }
}

impl Calc for IsEmptyCalc {
    fn shape(&self) -> Shape {
        Shape::Boolean
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Boolean(self.arg.evaluate(ev)?.is_null()))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

#[derive(Debug)]
pub(crate) struct CoalesceEmptyCalc {
    args: Vec<CalcRef>,
    shape: Shape,
}

impl CoalesceEmptyCalc {
    pub(crate) fn new(args: Vec<CalcRef>, shape: Shape) -> Self {
        Self { args, shape }
    }
}

impl Calc for CoalesceEmptyCalc {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        for arg in &self.args {
            let value = arg.evaluate(ev)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        Ok(Value::Null)
    }

    fn children(&self) -> Vec<&CalcRef> {
        self.args.iter().collect()
    }
}

/// `Format` with a pattern known at compile time.
#[derive(Debug)]
pub(crate) struct FormatCalc {
    value: CalcRef,
    formatter: Formatter,
}

impl FormatCalc {
    pub(crate) fn new(value: CalcRef, formatter: Formatter) -> Self {
        Self { value, formatter }
    }
}

impl Calc for FormatCalc {
    fn shape(&self) -> Shape {
        Shape::String
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let value = self.value.evaluate(ev)?;
        Ok(Value::from(self.formatter.format(&value)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.value]
    }
}

/// `Format` whose pattern is itself computed; the pattern is parsed per evaluation.
#[derive(Debug)]
pub(crate) struct DynamicFormatCalc {
    value: CalcRef,
    pattern: CalcRef,
}

impl DynamicFormatCalc {
    pub(crate) fn new(value: CalcRef, pattern: CalcRef) -> Self {
        Self { value, pattern }
    }
}

impl Calc for DynamicFormatCalc {
    fn shape(&self) -> Shape {
        Shape::String
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let value = self.value.evaluate(ev)?;
        let pattern = self.pattern.evaluate_string(ev)?.unwrap_or_default();
        Ok(Value::from(Formatter::new(&pattern).format(&value)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.value, &self.pattern]
    }
}

/// Runtime conversion of a dynamically typed scalar to a requested scalar category.
#[derive(Debug)]
pub(crate) struct CoerceCalc {
    arg: CalcRef,
    target: Category,
}

impl CoerceCalc {
    pub(crate) fn new(arg: CalcRef, target: Category) -> Self {
        Self { arg, target }
    }
}

impl Calc for CoerceCalc {
    fn shape(&self) -> Shape {
        self.arg.shape().converted_to(self.target)
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let value = self.arg.evaluate(ev)?;
        Ok(match self.target {
            Category::Numeric => value.to_number()?.into(),
            Category::Integer => value.to_integer()?.map_or(Value::Null, Value::Integer),
            Category::Boolean => value.to_boolean()?.map_or(Value::Null, Value::Boolean),
            Category::String => value.to_text()?.map_or(Value::Null, Value::String),
            _ => value,
        })
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

/// Float to integer, truncating toward zero.
#[derive(Debug)]
pub(crate) struct TruncateCalc {
    arg: CalcRef,
}

impl TruncateCalc {
    pub(crate) fn new(arg: CalcRef) -> Self {
        Self { arg }
    }
}

impl Calc for TruncateCalc {
    fn shape(&self) -> Shape {
        Shape::Integer
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(self
            .arg
            .evaluate_number(ev)?
            .map_or(Value::Null, |n| Value::Integer(n.trunc() as i64)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

#[derive(Debug)]
pub(crate) struct ToStringCalc {
    arg: CalcRef,
}

impl ToStringCalc {
    pub(crate) fn new(arg: CalcRef) -> Self {
        Self { arg }
    }
}

impl Calc for ToStringCalc {
    fn shape(&self) -> Shape {
        Shape::String
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(self
            .arg
            .evaluate_string(ev)?
            .map_or(Value::Null, Value::String))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.arg]
    }
}

/// The cell value at the coordinate obtained by overlaying a member or tuple on the current
/// context.
#[derive(Debug)]
pub(crate) struct MemberValueCalc {
    tuple: CalcRef,
}

impl MemberValueCalc {
    pub(crate) fn new(tuple: CalcRef) -> Self {
        Self { tuple }
    }
}

impl Calc for MemberValueCalc {
    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let tuple = self.tuple.evaluate_tuple(ev)?;
        let mut scope = ev.scope();
        scope.set_context_tuple(&tuple);
        scope.cell_value()
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.tuple]
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        true
    }
}

/// The cell value at the current coordinate.
#[derive(Debug, Default)]
pub(crate) struct CurrentValueCalc;

impl Calc for CurrentValueCalc {
    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        ev.cell_value()
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        true
    }
}

#[derive(Debug)]
pub(crate) struct MemberNameCalc {
    member: CalcRef,
}

impl MemberNameCalc {
    pub(crate) fn new(member: CalcRef) -> Self {
        Self { member }
    }
}

impl Calc for MemberNameCalc {
    fn shape(&self) -> Shape {
        Shape::String
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let member = self.member.evaluate_member(ev)?;
        Ok(Value::String(Arc::from(member.name())))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.member]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additive_operators_treat_single_null_as_zero() {
        assert_eq!(ArithOp::Add.apply(Some(2.0), None).unwrap(), Some(2.0));
        assert_eq!(ArithOp::Sub.apply(None, Some(2.0)).unwrap(), Some(-2.0));
        assert_eq!(ArithOp::Add.apply(None, None).unwrap(), None);
    }

    #[test]
    fn multiplicative_operators_propagate_null() {
        assert_eq!(ArithOp::Mul.apply(Some(2.0), None).unwrap(), None);
        assert_eq!(ArithOp::Div.apply(None, Some(0.0)).unwrap(), None);
        assert_eq!(
            ArithOp::Div.apply(Some(1.0), Some(0.0)).unwrap_err(),
            OlapError::DivisionByZero
        );
    }

    #[test]
    fn comparisons_mix_numbers_and_strings() {
        let lt = compare_values(CompareOp::Lt, &Value::Integer(2), &Value::Float(2.5)).unwrap();
        assert_eq!(lt, Value::Boolean(true));
        let eq = compare_values(CompareOp::Eq, &Value::from("10"), &Value::Integer(10)).unwrap();
        assert_eq!(eq, Value::Boolean(true));
        let text = compare_values(CompareOp::Gt, &Value::from("b"), &Value::from("a")).unwrap();
        assert_eq!(text, Value::Boolean(true));
        let null = compare_values(CompareOp::Eq, &Value::Null, &Value::Integer(1)).unwrap();
        assert_eq!(null, Value::Null);
    }
}
