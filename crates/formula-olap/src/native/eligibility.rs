//! Static and formula-level checks deciding whether an expression can be computed natively.
//!
//! Every check returns `Err(reason)` for a disqualifying construct. Disqualification is not an
//! error: the reason is logged and the caller evaluates the expression itself.

use crate::config::{EngineConfig, SafeCalcPattern};
use crate::model::{HierarchyId, Member};
use crate::schema::{CompareOp, MemberSource};
use crate::syntax::{Exp, Literal, Syntax};

/// Formula nesting followed when checking calculated measures that reference each other.
const MAX_FORMULA_DEPTH: usize = 16;

/// One operand of a native operator: the stored members it ranges over plus calculated members
/// that have to be merged in afterwards.
#[derive(Clone, Debug)]
pub(crate) struct ArgSource {
    pub(crate) hierarchy: HierarchyId,
    pub(crate) stored: Option<MemberSource>,
    pub(crate) calculated: Vec<Member>,
}

/// How the operand set of `TopCount`/`Filter` treats empty tuples when evaluated by itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperandKind {
    /// Level members, children or an enumerated set: never filtered.
    Simple,
    /// `CrossJoin`: filtered only when the context is non-empty.
    CrossJoin,
    /// `NonEmptyCrossJoin`: always filtered.
    NonEmptyCrossJoin,
}

/// Flattens a set expression into member sources.
pub(crate) fn member_sources(exp: &Exp) -> Result<(Vec<ArgSource>, OperandKind), String> {
    let kind = if exp.is_call("CrossJoin", Syntax::Function) {
        Some(OperandKind::CrossJoin)
    } else if exp.is_call("NonEmptyCrossJoin", Syntax::Function) {
        Some(OperandKind::NonEmptyCrossJoin)
    } else {
        None
    };
    if let Some(kind) = kind {
        let args = exp.call_parts().map(|(_, _, args)| args).unwrap_or_default();
        return Ok((crossjoin_sources(args)?, kind));
    }
    Ok((vec![simple_source(exp)?], OperandKind::Simple))
}

/// Sources of the operands of a `CrossJoin` call.
pub(crate) fn crossjoin_sources(args: &[Exp]) -> Result<Vec<ArgSource>, String> {
    let mut sources = Vec::new();
    for arg in args {
        flatten_crossjoin_arg(arg, &mut sources)?;
    }
    check_disjoint(&sources)?;
    Ok(sources)
}

fn flatten_crossjoin_arg(exp: &Exp, out: &mut Vec<ArgSource>) -> Result<(), String> {
    if exp.is_call("CrossJoin", Syntax::Function) {
        if let Some((_, _, args)) = exp.call_parts() {
            for arg in args {
                flatten_crossjoin_arg(arg, out)?;
            }
        }
        return Ok(());
    }
    out.push(simple_source(exp)?);
    Ok(())
}

fn check_disjoint(sources: &[ArgSource]) -> Result<(), String> {
    for (idx, source) in sources.iter().enumerate() {
        if sources[..idx].iter().any(|s| s.hierarchy == source.hierarchy) {
            return Err("operands share a hierarchy".to_string());
        }
    }
    Ok(())
}

fn simple_source(exp: &Exp) -> Result<ArgSource, String> {
    match exp {
        Exp::Call {
            name,
            syntax: Syntax::Property,
            args,
        } => match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("members", [Exp::Level(level)]) => Ok(ArgSource {
                hierarchy: level.hierarchy,
                stored: Some(MemberSource::Level(level.clone())),
                calculated: Vec::new(),
            }),
            ("children", [Exp::Member(member)]) if !member.is_calculated() => Ok(ArgSource {
                hierarchy: member.hierarchy(),
                stored: Some(MemberSource::Children(member.clone())),
                calculated: Vec::new(),
            }),
            _ => Err(format!("{exp} is not a simple member set")),
        },
        Exp::Call {
            syntax: Syntax::Braces,
            args,
            ..
        } => match args.as_slice() {
            [single @ Exp::Call { .. }] => simple_source(single),
            items => enumerated_source(exp, items),
        },
        Exp::Member(_) => enumerated_source(exp, std::slice::from_ref(exp)),
        _ => Err(format!("{exp} is not a simple member set")),
    }
}

fn enumerated_source(exp: &Exp, items: &[Exp]) -> Result<ArgSource, String> {
    let mut stored = Vec::new();
    let mut calculated = Vec::new();
    let mut hierarchy = None;
    for item in items {
        let Exp::Member(member) = item else {
            return Err(format!("{exp} enumerates something other than members"));
        };
        if member.is_measure() {
            return Err(format!("{exp} mixes measures into a dimension set"));
        }
        match hierarchy {
            None => hierarchy = Some(member.hierarchy()),
            Some(h) if h != member.hierarchy() => {
                return Err(format!("{exp} enumerates members of several hierarchies"))
            }
            Some(_) => {}
        }
        if member.is_calculated() {
            calculated.push(member.clone());
        } else {
            stored.push(member.clone());
        }
    }
    if let Some(first) = stored.first() {
        if stored.iter().any(|m| m.depth() != first.depth()) {
            return Err(format!("{exp} enumerates members from different levels"));
        }
    }
    let Some(hierarchy) = hierarchy else {
        return Err("empty set".to_string());
    };
    Ok(ArgSource {
        hierarchy,
        stored: (!stored.is_empty()).then_some(MemberSource::Members(stored)),
        calculated,
    })
}

/// A stored measure referenced directly, e.g. the ranking measure of `TopCount`.
pub(crate) fn stored_measure(exp: &Exp) -> Result<Member, String> {
    match exp {
        Exp::Member(member) if member.is_stored_measure() => Ok(member.clone()),
        _ => Err(format!("{exp} is not a stored measure")),
    }
}

pub(crate) fn literal_count(exp: &Exp) -> Result<usize, String> {
    match exp {
        Exp::Literal(Literal::Integer(n)) => Ok((*n).max(0) as usize),
        Exp::Literal(Literal::Number(n)) if n.fract() == 0.0 => Ok(n.max(0.0) as usize),
        _ => Err(format!("count {exp} is not a literal")),
    }
}

/// Splits `measure <op> literal` (either side) into its parts.
pub(crate) fn measure_comparison(exp: &Exp) -> Result<(Member, CompareOp, f64), String> {
    let not_simple = || format!("{exp} is not a comparison of a stored measure with a number");
    let Some((name, Syntax::Infix, [left, right])) = exp.call_parts() else {
        return Err(not_simple());
    };
    let op = CompareOp::from_symbol(name).ok_or_else(not_simple)?;
    match (left, right) {
        (Exp::Member(m), Exp::Literal(lit)) if m.is_stored_measure() => {
            Ok((m.clone(), op, literal_number(lit).ok_or_else(not_simple)?))
        }
        (Exp::Literal(lit), Exp::Member(m)) if m.is_stored_measure() => {
            Ok((m.clone(), flip(op), literal_number(lit).ok_or_else(not_simple)?))
        }
        _ => Err(not_simple()),
    }
}

fn literal_number(lit: &Literal) -> Option<f64> {
    match lit {
        Literal::Number(n) => Some(*n),
        Literal::Integer(n) => Some(*n as f64),
        _ => None,
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        other => other,
    }
}

/// Checks a calculated measure against the configured safe patterns and returns the stored
/// measures it reads.
pub(crate) fn safe_measures(member: &Member, config: &EngineConfig) -> Result<Vec<Member>, String> {
    let mut out = Vec::new();
    check_member(member, config, 0, &mut out)?;
    Ok(out)
}

/// The stored measure a calculated measure is empty together with, cell for cell.
///
/// Holds for a reference to the stored measure and for `IIf` whose branches both hold for the same
/// stored measure; the condition is free. Anything else, a literal branch in particular, can be
/// empty where the stored measure is not or the other way round.
pub(crate) fn emptiness_measure(member: &Member) -> Result<Member, String> {
    member_emptiness(member, 0)
}

fn member_emptiness(member: &Member, depth: usize) -> Result<Member, String> {
    if member.is_stored_measure() {
        return Ok(member.clone());
    }
    let Some(formula) = member.formula().filter(|_| member.is_measure()) else {
        return Err(format!("{member} is not a measure"));
    };
    if depth >= MAX_FORMULA_DEPTH {
        return Err(format!("{member} nests calculated measures too deeply"));
    }
    exp_emptiness(formula.expression(), depth + 1)
        .map_err(|_| format!("{member} can be empty where its stored measures are not"))
}

fn exp_emptiness(exp: &Exp, depth: usize) -> Result<Member, String> {
    match exp {
        Exp::Member(member) if member.is_measure() => member_emptiness(member, depth),
        Exp::Call {
            name,
            syntax: Syntax::Function,
            args,
        } if name.eq_ignore_ascii_case("IIf") && args.len() == 3 => {
            let then = exp_emptiness(&args[1], depth)?;
            let otherwise = exp_emptiness(&args[2], depth)?;
            if then == otherwise {
                Ok(then)
            } else {
                Err(format!("{exp} switches between {then} and {otherwise}"))
            }
        }
        _ => Err(format!("{exp} does not follow a single stored measure")),
    }
}

fn check_member(
    member: &Member,
    config: &EngineConfig,
    depth: usize,
    out: &mut Vec<Member>,
) -> Result<(), String> {
    if member.is_stored_measure() {
        require(config, SafeCalcPattern::StoredMeasure, member)?;
        if !out.contains(member) {
            out.push(member.clone());
        }
        return Ok(());
    }
    let Some(formula) = member.formula().filter(|_| member.is_measure()) else {
        return Err(format!("{member} is not a measure"));
    };
    if depth >= MAX_FORMULA_DEPTH {
        return Err(format!("{member} nests calculated measures too deeply"));
    }
    check_exp(formula.expression(), config, depth + 1, out)
}

fn check_exp(
    exp: &Exp,
    config: &EngineConfig,
    depth: usize,
    out: &mut Vec<Member>,
) -> Result<(), String> {
    match exp {
        Exp::Literal(_) => require(config, SafeCalcPattern::Literal, exp),
        Exp::Member(member) if member.is_measure() => check_member(member, config, depth, out),
        Exp::Call { name, syntax, args } => {
            let pattern = match (name.to_ascii_uppercase().as_str(), syntax) {
                ("IIF", Syntax::Function)
                | ("AND" | "OR", Syntax::Infix)
                | ("NOT", Syntax::Prefix)
                | ("=" | "<>" | "<" | "<=" | ">" | ">=", Syntax::Infix) => {
                    SafeCalcPattern::Conditional
                }
                ("ISEMPTY", Syntax::Function) => SafeCalcPattern::IsEmpty,
                ("+" | "-" | "*" | "/", Syntax::Infix) | ("-", Syntax::Prefix) => {
                    SafeCalcPattern::Arithmetic
                }
                _ => return Err(format!("{exp} is not safe for native evaluation")),
            };
            require(config, pattern, exp)?;
            for arg in args {
                check_exp(arg, config, depth, out)?;
            }
            Ok(())
        }
        _ => Err(format!("{exp} is not safe for native evaluation")),
    }
}

fn require(
    config: &EngineConfig,
    pattern: SafeCalcPattern,
    what: &dyn std::fmt::Display,
) -> Result<(), String> {
    if config.allows_pattern(pattern) {
        Ok(())
    } else {
        Err(format!("{what} uses {pattern:?}, which is not whitelisted"))
    }
}
