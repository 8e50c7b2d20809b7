//! Compiled evaluation core of a multidimensional (OLAP) query engine.
//!
//! Resolved expression trees ([`Exp`]) are compiled once into trees of [`Calc`] nodes and then
//! evaluated many times against an [`Evaluator`] positioned on a coordinate of the cube. Set
//! operators negotiate how their results are represented, and `CrossJoin`, `TopCount` and
//! `Filter` may be pushed down to the backend through [`SchemaReader::native_handle`].

mod calc;
mod compiler;
mod config;
mod error;
mod evaluator;
mod execution;
mod format;
mod functions;
mod memory;
mod model;
mod native;
mod query;
mod schema;
mod stats;
mod syntax;
mod value;

pub use crate::calc::{Calc, CalcRef, ResultStyle, SetOperand, TupleIter, TupleSet};
pub use crate::compiler::Compiler;
pub use crate::config::{EngineConfig, NativeAlertMode, SafeCalcPattern};
pub use crate::evaluator::{ContextScope, EvalEnv, Evaluator, Savepoint};
pub use crate::execution::Execution;
pub use crate::format::Formatter;
pub use crate::functions::{CallSite, FunctionImpl, FunctionSpec, FunctionTable, Returns, VAR_ARGS};
pub use crate::value::{Category, Shape, Value};

pub use crate::model::{
    Aggregator, Formula, Hierarchy, HierarchyId, LevelRef, Member, MemberKind, Tuple,
};
pub use crate::schema::{
    CompareOp, ContextConstraint, MemberSource, NativeHandle, NativeOp, NativeRequest,
    RelationalBackend, SchemaReader,
};
pub use crate::syntax::{Exp, Literal, Syntax};

pub use crate::memory::{CubeBuilder, InMemoryCube};
pub use crate::query::{Axis, CellSet, CellValue, OlapEngine, PreparedQuery, Query};

pub use crate::error::{ErrorKind, OlapError, OlapResult};
