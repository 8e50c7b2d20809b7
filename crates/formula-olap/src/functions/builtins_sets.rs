use super::{CallSite, FunctionSpec, FunctionTable, Returns, VAR_ARGS};
use crate::calc::set::{
    ChildrenCalc, CrossJoinCalc, EnumItem, EnumSetCalc, FilterCalc, GenerateCalc, HeadCalc,
    LevelMembersCalc, OrderCalc, SlicerCalc, TopCountCalc,
};
use crate::calc::{CalcRef, ResultStyle};
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::native::NativeSite;
use crate::syntax::{Exp, Syntax};
use crate::value::{Category, Shape};
use std::sync::Arc;

/// Internal function standing for the query's slicer tuples. Used by the synthetic member that
/// represents a compound slicer.
pub(crate) const SLICER_FUNCTION: &str = "$Slicer";

const SET: Shape = Shape::Set { arity: 1 };

pub(super) fn register(table: &mut FunctionTable) {
    table.register(FunctionSpec {
        name: "Members",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(SET),
        arg_types: &[Category::Level],
        implementation: level_members,
    });
    table.register(FunctionSpec {
        name: "Children",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(SET),
        arg_types: &[Category::Member],
        implementation: children,
    });
    table.register(FunctionSpec {
        name: "{}",
        syntax: Syntax::Braces,
        min_args: 0,
        max_args: VAR_ARGS,
        return_type: Returns::Braces,
        arg_types: &[Category::Set],
        implementation: braces,
    });
    table.register(FunctionSpec {
        name: "CrossJoin",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: VAR_ARGS,
        return_type: Returns::CrossJoin,
        arg_types: &[Category::Set],
        implementation: crossjoin,
    });
    table.register(FunctionSpec {
        name: "NonEmptyCrossJoin",
        syntax: Syntax::Function,
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: Returns::CrossJoin,
        arg_types: &[Category::Set],
        implementation: non_empty_crossjoin,
    });
    table.register(FunctionSpec {
        name: "Filter",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: 2,
        return_type: Returns::SetOf(0),
        arg_types: &[Category::Set, Category::Boolean],
        implementation: filter,
    });
    table.register(FunctionSpec {
        name: "TopCount",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: 3,
        return_type: Returns::SetOf(0),
        arg_types: &[Category::Set, Category::Integer, Category::Numeric],
        implementation: top_count,
    });
    table.register(FunctionSpec {
        name: "BottomCount",
        syntax: Syntax::Function,
        min_args: 3,
        max_args: 3,
        return_type: Returns::SetOf(0),
        arg_types: &[Category::Set, Category::Integer, Category::Numeric],
        implementation: bottom_count,
    });
    table.register(FunctionSpec {
        name: "Head",
        syntax: Syntax::Function,
        min_args: 1,
        max_args: 2,
        return_type: Returns::SetOf(0),
        arg_types: &[Category::Set, Category::Integer],
        implementation: head,
    });
    table.register(FunctionSpec {
        name: "Order",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: 3,
        return_type: Returns::SetOf(0),
        arg_types: &[Category::Set, Category::Value, Category::Symbol],
        implementation: order,
    });
    table.register(FunctionSpec {
        name: "Generate",
        syntax: Syntax::Function,
        min_args: 2,
        max_args: 3,
        return_type: Returns::SetOf(1),
        arg_types: &[Category::Set, Category::Set, Category::Symbol],
        implementation: generate,
    });
    table.register(FunctionSpec {
        name: SLICER_FUNCTION,
        syntax: Syntax::Function,
        min_args: 0,
        max_args: 0,
        return_type: Returns::Fixed(SET),
        arg_types: &[],
        implementation: slicer,
    });
}

fn level_members(_compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    match site.args {
        [Exp::Level(level)] => Ok(Arc::new(LevelMembersCalc::new(level.clone()))),
        _ => Err(OlapError::Type(format!(
            "{} requires a level reference",
            site.exp
        ))),
    }
}

fn children(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(ChildrenCalc::new(site.arg(compiler, 0)?)))
}

fn braces(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let mut items = Vec::with_capacity(site.args.len());
    let mut arity = None;
    for item in site.args {
        let shape = compiler.type_of(item)?;
        let item_arity = shape.arity().unwrap_or(1);
        match arity {
            None => arity = Some(item_arity),
            Some(expected) if expected != item_arity => {
                return Err(OlapError::Type(format!(
                    "{}: items have different arities ({expected} and {item_arity})",
                    site.exp
                )))
            }
            Some(_) => {}
        }
        items.push(match shape {
            Shape::Member | Shape::Tuple { .. } => {
                EnumItem::Tuple(compiler.compile(item, shape.category())?)
            }
            _ => EnumItem::Set(compiler.compile_set(item, ResultStyle::ITERATE)?),
        });
    }
    Ok(Arc::new(EnumSetCalc::new(items, arity.unwrap_or(1))))
}

fn crossjoin_args(
    compiler: &Compiler<'_>,
    site: &CallSite<'_>,
) -> OlapResult<Vec<crate::calc::SetOperand>> {
    site.args
        .iter()
        .map(|arg| compiler.compile_set(arg, ResultStyle::RANDOM_ACCESS))
        .collect()
}

fn crossjoin(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let args = crossjoin_args(compiler, site)?;
    let native = NativeSite::crossjoin(site.exp, site.args);
    Ok(Arc::new(CrossJoinCalc::new(args, native, false)))
}

fn non_empty_crossjoin(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let args = crossjoin_args(compiler, site)?;
    let native = NativeSite::crossjoin(site.exp, site.args);
    Ok(Arc::new(CrossJoinCalc::new(args, native, true)))
}

fn filter(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let set = compiler.compile_set(&site.args[0], ResultStyle::ITERATE)?;
    let condition = site.arg(compiler, 1)?;
    let native = NativeSite::filter(site.exp, &site.args[0], &site.args[1]);
    Ok(Arc::new(FilterCalc::new(set, condition, native)))
}

fn top_count(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let set = compiler.compile_set(&site.args[0], ResultStyle::MUTATE)?;
    let count = site.arg(compiler, 1)?;
    let measure = site.opt_arg(compiler, 2)?;
    let native = NativeSite::top_count(site.exp, &site.args[0], &site.args[1], site.args.get(2));
    Ok(Arc::new(TopCountCalc::top(set, count, measure, native)))
}

fn bottom_count(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let set = compiler.compile_set(&site.args[0], ResultStyle::MUTATE)?;
    Ok(Arc::new(TopCountCalc::bottom(
        set,
        site.arg(compiler, 1)?,
        site.arg(compiler, 2)?,
    )))
}

fn head(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let set = compiler.compile_set(&site.args[0], ResultStyle::ITERATE)?;
    Ok(Arc::new(HeadCalc::new(set, site.opt_arg(compiler, 1)?)))
}

fn order(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let set = compiler.compile_set(&site.args[0], ResultStyle::MUTATE)?;
    let key = site.arg(compiler, 1)?;
    // Hierarchized and breaking orders sort the same here: the set is flat.
    let descending = match site.flag(2).as_deref() {
        None | Some("ASC") | Some("BASC") => false,
        Some("DESC") | Some("BDESC") => true,
        Some(other) => {
            return Err(OlapError::Type(format!(
                "{}: unknown sort flag {other}",
                site.exp
            )))
        }
    };
    Ok(Arc::new(OrderCalc::new(set, key, descending)))
}

fn generate(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let source = compiler.compile_set(&site.args[0], ResultStyle::ITERATE)?;
    let each = compiler.compile_set(&site.args[1], ResultStyle::RANDOM_ACCESS)?;
    let all = match site.flag(2).as_deref() {
        None => false,
        Some("ALL") => true,
        Some(other) => {
            return Err(OlapError::Type(format!(
                "{}: unknown flag {other}",
                site.exp
            )))
        }
    };
    Ok(Arc::new(GenerateCalc::new(source, each, all)))
}

fn slicer(_compiler: &Compiler<'_>, _site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(SlicerCalc::new(1)))
}
