//! Untyped expression trees handed to the compiler.
//!
//! Parsing and name resolution happen upstream; by the time an [`Exp`] reaches the compiler every
//! member, level and hierarchy reference has been resolved to a handle.

use crate::model::{Hierarchy, LevelRef, Member};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Number(f64),
    Integer(i64),
    String(Arc<str>),
    Boolean(bool),
}

/// How a call was written. Resolution is keyed by name *and* syntax, so `x.Members` and
/// `Members(x)` are different functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Syntax {
    Function,
    Property,
    Method,
    Infix,
    Prefix,
    Braces,
    Parentheses,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Exp {
    Literal(Literal),
    Member(Member),
    Level(LevelRef),
    Hierarchy(Hierarchy),
    Symbol(Arc<str>),
    Call {
        name: Arc<str>,
        syntax: Syntax,
        args: Vec<Exp>,
    },
}

impl Exp {
    pub fn number(n: f64) -> Self {
        Exp::Literal(Literal::Number(n))
    }

    pub fn integer(n: i64) -> Self {
        Exp::Literal(Literal::Integer(n))
    }

    pub fn string(s: &str) -> Self {
        Exp::Literal(Literal::String(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Exp::Literal(Literal::Boolean(b))
    }

    pub fn null() -> Self {
        Exp::Literal(Literal::Null)
    }

    pub fn symbol(s: &str) -> Self {
        Exp::Symbol(s.into())
    }

    pub fn member(m: &Member) -> Self {
        Exp::Member(m.clone())
    }

    pub fn level(l: &LevelRef) -> Self {
        Exp::Level(l.clone())
    }

    pub fn hierarchy(h: &Hierarchy) -> Self {
        Exp::Hierarchy(h.clone())
    }

    pub fn call(name: &str, args: Vec<Exp>) -> Self {
        Exp::Call {
            name: name.into(),
            syntax: Syntax::Function,
            args,
        }
    }

    /// `arg.Name`, e.g. `[Time].CurrentMember`.
    pub fn property(arg: Exp, name: &str) -> Self {
        Exp::Call {
            name: name.into(),
            syntax: Syntax::Property,
            args: vec![arg],
        }
    }

    pub fn method(target: Exp, name: &str, mut args: Vec<Exp>) -> Self {
        args.insert(0, target);
        Exp::Call {
            name: name.into(),
            syntax: Syntax::Method,
            args,
        }
    }

    pub fn infix(op: &str, left: Exp, right: Exp) -> Self {
        Exp::Call {
            name: op.into(),
            syntax: Syntax::Infix,
            args: vec![left, right],
        }
    }

    pub fn prefix(op: &str, arg: Exp) -> Self {
        Exp::Call {
            name: op.into(),
            syntax: Syntax::Prefix,
            args: vec![arg],
        }
    }

    /// `{a, b, ...}`
    pub fn set(items: Vec<Exp>) -> Self {
        Exp::Call {
            name: "{}".into(),
            syntax: Syntax::Braces,
            args: items,
        }
    }

    /// `(a, b, ...)`
    pub fn tuple(items: Vec<Exp>) -> Self {
        Exp::Call {
            name: "()".into(),
            syntax: Syntax::Parentheses,
            args: items,
        }
    }

    pub fn members_of(level: &LevelRef) -> Self {
        Exp::property(Exp::level(level), "Members")
    }

    pub fn children_of(member: &Member) -> Self {
        Exp::property(Exp::member(member), "Children")
    }

    pub fn current_member(hierarchy: &Hierarchy) -> Self {
        Exp::property(Exp::hierarchy(hierarchy), "CurrentMember")
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Exp::Literal(_))
    }

    pub fn call_parts(&self) -> Option<(&str, Syntax, &[Exp])> {
        match self {
            Exp::Call { name, syntax, args } => Some((name, *syntax, args)),
            _ => None,
        }
    }

    /// Case-insensitive test for a call of `name` written with `syntax`.
    pub fn is_call(&self, name: &str, syntax: Syntax) -> bool {
        matches!(self, Exp::Call { name: n, syntax: s, .. } if *s == syntax && n.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Literal::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, args: &[Exp]) -> fmt::Result {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::Literal(lit) => write!(f, "{lit}"),
            Exp::Member(m) => f.write_str(m.unique_name()),
            Exp::Level(l) => write!(f, "{l}"),
            Exp::Hierarchy(h) => write!(f, "[{}]", h.name()),
            Exp::Symbol(s) => f.write_str(s),
            Exp::Call { name, syntax, args } => match syntax {
                Syntax::Function => {
                    write!(f, "{name}(")?;
                    write_list(f, args)?;
                    f.write_str(")")
                }
                Syntax::Property => match args.first() {
                    Some(target) => write!(f, "{target}.{name}"),
                    None => f.write_str(name),
                },
                Syntax::Method => match args.split_first() {
                    Some((target, rest)) => {
                        write!(f, "{target}.{name}(")?;
                        write_list(f, rest)?;
                        f.write_str(")")
                    }
                    None => write!(f, "{name}()"),
                },
                Syntax::Infix => match args.as_slice() {
                    [left, right] => write!(f, "({left} {name} {right})"),
                    _ => {
                        write!(f, "{name}(")?;
                        write_list(f, args)?;
                        f.write_str(")")
                    }
                },
                Syntax::Prefix => match args.first() {
                    Some(arg) => write!(f, "{name} {arg}"),
                    None => f.write_str(name),
                },
                Syntax::Braces => {
                    f.write_str("{")?;
                    write_list(f, args)?;
                    f.write_str("}")
                }
                Syntax::Parentheses => {
                    f.write_str("(")?;
                    write_list(f, args)?;
                    f.write_str(")")
                }
            },
        }
    }
}
