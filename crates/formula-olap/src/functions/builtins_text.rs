use super::{CallSite, FunctionSpec, FunctionTable, Returns};
use crate::calc::scalar::{DynamicFormatCalc, FormatCalc};
use crate::calc::CalcRef;
use crate::compiler::Compiler;
use crate::error::OlapResult;
use crate::format::Formatter;
use crate::syntax::{Exp, Literal, Syntax};
use crate::value::{Category, Shape};
use std::sync::Arc;

pub(super) fn register(table: &mut FunctionTable) {
    table.register(FunctionSpec {
        name: "Format",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: 2,
        return_type: Returns::Fixed(Shape::String),
        arg_types: &[Category::Value, Category::String],
        implementation: format,
    });
}

/// A literal pattern is parsed once here rather than on every evaluation.
fn format(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let value = site.arg(compiler, 0)?;
    if let Some(Exp::Literal(Literal::String(pattern))) = site.args.get(1) {
        return Ok(Arc::new(FormatCalc::new(value, Formatter::new(pattern))));
    }
    Ok(Arc::new(DynamicFormatCalc::new(value, site.arg(compiler, 1)?)))
}
