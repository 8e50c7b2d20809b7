use super::{CallSite, FunctionSpec, FunctionTable, Returns, VAR_ARGS};
use crate::calc::scalar::{CoalesceEmptyCalc, IIfCalc, IsEmptyCalc};
use crate::calc::CalcRef;
use crate::compiler::Compiler;
use crate::error::OlapResult;
use crate::syntax::Syntax;
use crate::value::{Category, Shape};
use std::sync::Arc;

pub(super) fn register(table: &mut FunctionTable) {
    table.register(FunctionSpec {
        name: "IIf",
        syntax: Syntax::Function,
        min_args: 3,
        max_args: 3,
        return_type: Returns::Unified { from: 1 },
        arg_types: &[Category::Boolean, Category::Value, Category::Value],
        implementation: iif,
    });
    table.register(FunctionSpec {
        name: "IsEmpty",
        syntax: Syntax::Function,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Boolean),
        arg_types: &[Category::Value],
        implementation: is_empty,
    });
    table.register(FunctionSpec {
        name: "CoalesceEmpty",
        syntax: Syntax::Function,
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: Returns::Unified { from: 0 },
        arg_types: &[Category::Value],
        implementation: coalesce_empty,
    });
}

fn iif(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let condition = site.arg(compiler, 0)?;
    let then = site.arg(compiler, 1)?;
    let otherwise = site.arg(compiler, 2)?;
    let shape = crate::compiler::return_shape(
        site.spec.return_type,
        &[condition.shape(), then.shape(), otherwise.shape()],
    );
    Ok(Arc::new(IIfCalc::new(condition, then, otherwise, shape)))
}

fn is_empty(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(IsEmptyCalc::new(site.arg(compiler, 0)?)))
}

fn coalesce_empty(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let args = (0..site.args.len())
        .map(|idx| site.arg(compiler, idx))
        .collect::<OlapResult<Vec<_>>>()?;
    let shapes: Vec<Shape> = args.iter().map(|arg| arg.shape()).collect();
    let shape = crate::compiler::return_shape(site.spec.return_type, &shapes);
    Ok(Arc::new(CoalesceEmptyCalc::new(args, shape)))
}
