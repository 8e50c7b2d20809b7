//! The function table consulted by the compiler.
//!
//! A [`FunctionTable`] is an explicit value: build one with [`FunctionTable::with_builtins`] (or
//! an empty one with [`FunctionTable::new`]) and hand it to the engine. Built-in functions live in
//! `builtins_*` modules, each exposing a `register` function.

use crate::calc::CalcRef;
use crate::compiler::{conversion_cost, Compiler};
use crate::error::{OlapError, OlapResult};
use crate::syntax::{Exp, Syntax};
use crate::value::{Category, Shape};
use ahash::AHashMap;
use std::fmt;

mod builtins_logical;
mod builtins_members;
mod builtins_operators;
mod builtins_sets;
mod builtins_statistical;
mod builtins_text;

pub(crate) use builtins_sets::SLICER_FUNCTION;

pub const VAR_ARGS: usize = 255;

pub type FunctionImpl = fn(&Compiler<'_>, &CallSite<'_>) -> OlapResult<CalcRef>;

/// How a function's natural result shape is derived from its argument shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Returns {
    Fixed(Shape),
    /// A set with the arity of argument `n`.
    SetOf(usize),
    /// A set whose arity is the sum of the argument arities.
    CrossJoin,
    /// A set with the arity of the first item.
    Braces,
    /// A tuple of all arguments.
    Tuple,
    /// The most general scalar among the arguments from index `from` on.
    Unified { from: usize },
}

pub struct FunctionSpec {
    pub name: &'static str,
    pub syntax: Syntax,
    pub min_args: usize,
    pub max_args: usize,
    pub return_type: Returns,
    /// Expected argument categories; the last one repeats for variadic functions.
    pub arg_types: &'static [Category],
    pub implementation: FunctionImpl,
}

impl FunctionSpec {
    pub fn arg_type(&self, idx: usize) -> Category {
        self.arg_types
            .get(idx)
            .or_else(|| self.arg_types.last())
            .copied()
            .unwrap_or(Category::Value)
    }

    fn accepts_count(&self, count: usize) -> bool {
        (self.min_args..=self.max_args).contains(&count)
    }

    /// Total conversion cost of calling this function with `args`, or `None` if some argument
    /// cannot be converted.
    fn cost(&self, args: &[Shape]) -> Option<u32> {
        args.iter()
            .enumerate()
            .map(|(idx, shape)| conversion_cost(*shape, self.arg_type(idx)))
            .sum()
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("syntax", &self.syntax)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// A resolved call being compiled.
pub struct CallSite<'e> {
    pub name: &'e str,
    pub syntax: Syntax,
    pub args: &'e [Exp],
    /// The whole call expression.
    pub exp: &'e Exp,
    pub spec: &'e FunctionSpec,
}

impl CallSite<'_> {
    /// Compiles argument `idx` to the category the signature declares for it.
    pub(crate) fn arg(&self, compiler: &Compiler<'_>, idx: usize) -> OlapResult<CalcRef> {
        let exp = self
            .args
            .get(idx)
            .ok_or_else(|| OlapError::internal(format!("{}: missing argument {idx}", self.name)))?;
        compiler.compile(exp, self.spec.arg_type(idx))
    }

    pub(crate) fn opt_arg(
        &self,
        compiler: &Compiler<'_>,
        idx: usize,
    ) -> OlapResult<Option<CalcRef>> {
        compiler.compile_opt(self.args.get(idx), self.spec.arg_type(idx))
    }

    /// The upper-cased flag at `idx`, if the argument is a symbol.
    pub(crate) fn flag(&self, idx: usize) -> Option<String> {
        match self.args.get(idx) {
            Some(Exp::Symbol(symbol)) => Some(symbol.to_ascii_uppercase()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FunctionTable {
    specs: AHashMap<String, Vec<FunctionSpec>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        builtins_operators::register(&mut table);
        builtins_logical::register(&mut table);
        builtins_text::register(&mut table);
        builtins_members::register(&mut table);
        builtins_sets::register(&mut table);
        builtins_statistical::register(&mut table);
        table
    }

    /// Adds an overload. Earlier registrations win ties in resolution.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.specs
            .entry(spec.name.to_ascii_uppercase())
            .or_default()
            .push(spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(&name.to_ascii_uppercase())
    }

    /// Picks the overload of `name` written with `syntax` that accepts `args` most cheaply.
    pub fn resolve(&self, name: &str, syntax: Syntax, args: &[Shape]) -> OlapResult<&FunctionSpec> {
        let mut best: Option<(&FunctionSpec, u32)> = None;
        for spec in self
            .specs
            .get(&name.to_ascii_uppercase())
            .into_iter()
            .flatten()
            .filter(|spec| spec.syntax == syntax && spec.accepts_count(args.len()))
        {
            let Some(cost) = spec.cost(args) else {
                continue;
            };
            if best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((spec, cost));
            }
        }
        best.map(|(spec, _)| spec)
            .ok_or_else(|| OlapError::NoMatchingFunction {
                name: name.to_string(),
                signature: signature(name, syntax, args),
            })
    }
}

fn signature(name: &str, syntax: Syntax, args: &[Shape]) -> String {
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    match syntax {
        Syntax::Property => format!("<{}>.{name}", args.join(", ")),
        Syntax::Infix => format!("<{}>", args.join(&format!(" {name} "))),
        Syntax::Prefix => format!("{name} <{}>", args.join(", ")),
        Syntax::Braces => format!("{{{}}}", args.join(", ")),
        Syntax::Parentheses => format!("({})", args.join(", ")),
        Syntax::Function | Syntax::Method => format!("{name}({})", args.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_case_insensitive_and_keyed_by_syntax() {
        let table = FunctionTable::with_builtins();
        let spec = table
            .resolve("sum", Syntax::Function, &[Shape::Set { arity: 1 }, Shape::Member])
            .unwrap();
        assert_eq!(spec.name, "Sum");
        assert!(table
            .resolve("Members", Syntax::Function, &[Shape::Level])
            .is_err());
    }

    #[test]
    fn unknown_signature_reports_argument_shapes() {
        let table = FunctionTable::with_builtins();
        let err = table
            .resolve("+", Syntax::Infix, &[Shape::Set { arity: 1 }, Shape::Integer])
            .unwrap_err();
        assert_eq!(
            err,
            OlapError::NoMatchingFunction {
                name: "+".to_string(),
                signature: "<set/1 + integer>".to_string(),
            }
        );
    }

    #[test]
    fn arity_bounds_filter_overloads() {
        let table = FunctionTable::with_builtins();
        let shapes = [Shape::Set { arity: 1 }; 1];
        assert!(table.resolve("TopCount", Syntax::Function, &shapes).is_err());
        assert!(table.resolve("Head", Syntax::Function, &shapes).is_ok());
    }
}
