use super::{CallSite, FunctionSpec, FunctionTable, Returns};
use crate::calc::scalar::{
    compare_values, ArithOp, ArithmeticCalc, CompareCalc, ConstantCalc, LogicalCalc, LogicalOp,
    NegateCalc, NotCalc,
};
use crate::calc::CalcRef;
use crate::compiler::{literal_value, Compiler};
use crate::error::{OlapError, OlapResult};
use crate::schema::CompareOp;
use crate::syntax::{Exp, Literal, Syntax};
use crate::value::{Category, Shape, Value};
use std::sync::Arc;

const NUMERIC_PAIR: &[Category] = &[Category::Numeric, Category::Numeric];
const BOOLEAN_PAIR: &[Category] = &[Category::Boolean, Category::Boolean];

pub(super) fn register(table: &mut FunctionTable) {
    for name in ["+", "-", "*", "/"] {
        table.register(FunctionSpec {
            name,
            syntax: Syntax::Infix,
            min_args: 2,
            max_args: 2,
            return_type: Returns::Fixed(Shape::Float),
            arg_types: NUMERIC_PAIR,
            implementation: arithmetic,
        });
    }
    table.register(FunctionSpec {
        name: "-",
        syntax: Syntax::Prefix,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Float),
        arg_types: &[Category::Numeric],
        implementation: negate,
    });
    for name in ["=", "<>", "<", "<=", ">", ">="] {
        table.register(FunctionSpec {
            name,
            syntax: Syntax::Infix,
            min_args: 2,
            max_args: 2,
            return_type: Returns::Fixed(Shape::Boolean),
            arg_types: &[Category::Value, Category::Value],
            implementation: compare,
        });
    }
    for name in ["AND", "OR"] {
        table.register(FunctionSpec {
            name,
            syntax: Syntax::Infix,
            min_args: 2,
            max_args: 2,
            return_type: Returns::Fixed(Shape::Boolean),
            arg_types: BOOLEAN_PAIR,
            implementation: logical,
        });
    }
    table.register(FunctionSpec {
        name: "NOT",
        syntax: Syntax::Prefix,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Boolean),
        arg_types: &[Category::Boolean],
        implementation: not,
    });
}

/// A numeric literal; `Some(None)` is the null literal.
fn literal_number(exp: &Exp) -> Option<Option<f64>> {
    match exp {
        Exp::Literal(Literal::Number(n)) => Some(Some(*n)),
        Exp::Literal(Literal::Integer(n)) => Some(Some(*n as f64)),
        Exp::Literal(Literal::Null) => Some(None),
        _ => None,
    }
}

fn constant(value: Value, shape: Shape) -> CalcRef {
    Arc::new(ConstantCalc::new(value, shape))
}

fn arithmetic(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let op = ArithOp::from_symbol(site.name)
        .ok_or_else(|| OlapError::internal(format!("unknown operator {}", site.name)))?;
    if let [left, right] = site.args {
        if let (Some(l), Some(r)) = (literal_number(left), literal_number(right)) {
            // Division by a literal zero stays a runtime cell error.
            if let Ok(folded) = op.apply(l, r) {
                return Ok(constant(folded.into(), Shape::Float));
            }
        }
    }
    Ok(Arc::new(ArithmeticCalc::new(
        op,
        site.arg(compiler, 0)?,
        site.arg(compiler, 1)?,
    )))
}

fn negate(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    if let Some(Some(n)) = site.args.first().and_then(literal_number) {
        return Ok(constant(Value::Float(-n), Shape::Float));
    }
    Ok(Arc::new(NegateCalc::new(site.arg(compiler, 0)?)))
}

fn compare(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let op = CompareOp::from_symbol(site.name)
        .ok_or_else(|| OlapError::internal(format!("unknown comparison {}", site.name)))?;
    if let [Exp::Literal(left), Exp::Literal(right)] = site.args {
        if let Ok(folded) = compare_values(op, &literal_value(left), &literal_value(right)) {
            return Ok(constant(folded, Shape::Boolean));
        }
    }
    Ok(Arc::new(CompareCalc::new(
        op,
        site.arg(compiler, 0)?,
        site.arg(compiler, 1)?,
    )))
}

fn logical(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let op = if site.name.eq_ignore_ascii_case("AND") {
        LogicalOp::And
    } else {
        LogicalOp::Or
    };
    if let [Exp::Literal(Literal::Boolean(l)), Exp::Literal(Literal::Boolean(r))] = site.args {
        let folded = match op {
            LogicalOp::And => *l && *r,
            LogicalOp::Or => *l || *r,
        };
        return Ok(constant(Value::Boolean(folded), Shape::Boolean));
    }
    Ok(Arc::new(LogicalCalc::new(
        op,
        site.arg(compiler, 0)?,
        site.arg(compiler, 1)?,
    )))
}

fn not(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(NotCalc::new(site.arg(compiler, 0)?)))
}
