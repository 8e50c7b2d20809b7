use super::{CallSite, FunctionSpec, FunctionTable, Returns, VAR_ARGS};
use crate::calc::member::{CurrentMemberCalc, MemberConstantCalc, ParentCalc, TupleCalc};
use crate::calc::scalar::MemberNameCalc;
use crate::calc::CalcRef;
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::syntax::{Exp, Syntax};
use crate::value::{Category, Shape};
use std::sync::Arc;

pub(super) fn register(table: &mut FunctionTable) {
    table.register(FunctionSpec {
        name: "CurrentMember",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Member),
        arg_types: &[Category::Hierarchy],
        implementation: current_member,
    });
    table.register(FunctionSpec {
        name: "DefaultMember",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Member),
        arg_types: &[Category::Hierarchy],
        implementation: default_member,
    });
    table.register(FunctionSpec {
        name: "Parent",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::Member),
        arg_types: &[Category::Member],
        implementation: parent,
    });
    table.register(FunctionSpec {
        name: "Name",
        syntax: Syntax::Property,
        min_args: 1,
        max_args: 1,
        return_type: Returns::Fixed(Shape::String),
        arg_types: &[Category::Member],
        implementation: name,
    });
    table.register(FunctionSpec {
        name: "()",
        syntax: Syntax::Parentheses,
        min_args: 1,
        max_args: VAR_ARGS,
        return_type: Returns::Tuple,
        arg_types: &[Category::Member],
        implementation: tuple,
    });
}

fn hierarchy_arg<'e>(site: &CallSite<'e>) -> OlapResult<&'e crate::model::Hierarchy> {
    match site.args {
        [Exp::Hierarchy(hierarchy)] => Ok(hierarchy),
        _ => Err(OlapError::Type(format!(
            "{} expects a hierarchy, got {}",
            site.name, site.exp
        ))),
    }
}

fn current_member(_compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let hierarchy = hierarchy_arg(site)?;
    Ok(Arc::new(CurrentMemberCalc::new(hierarchy.id())))
}

fn default_member(_compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let hierarchy = hierarchy_arg(site)?;
    Ok(Arc::new(MemberConstantCalc::new(
        hierarchy.default_member().clone(),
    )))
}

fn parent(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(ParentCalc::new(site.arg(compiler, 0)?)))
}

fn name(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(MemberNameCalc::new(site.arg(compiler, 0)?)))
}

fn tuple(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let members = (0..site.args.len())
        .map(|idx| site.arg(compiler, idx))
        .collect::<OlapResult<Vec<_>>>()?;
    Ok(Arc::new(TupleCalc::new(members)))
}
