//! Collaborator contracts: metadata lookup and the relational backend.
//!
//! The engine never owns metadata or fact storage. It reads structure through [`SchemaReader`]
//! and loads cells or executes delegated set computations through [`RelationalBackend`].
//! Implementations are shared between concurrent query executions, so both traits require
//! `Send + Sync` and must tolerate concurrent readers.

use crate::error::OlapResult;
use crate::model::{Hierarchy, HierarchyId, LevelRef, Member, Tuple};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

pub trait SchemaReader: Send + Sync {
    /// All hierarchies of the cube, indexed by [`HierarchyId`].
    fn hierarchies(&self) -> &[Hierarchy];

    fn hierarchy(&self, id: HierarchyId) -> Option<&Hierarchy> {
        self.hierarchies().get(id.0)
    }

    fn level_members(&self, level: &LevelRef) -> OlapResult<Arc<[Member]>>;

    fn children(&self, member: &Member) -> OlapResult<Vec<Member>>;

    fn lookup_member(&self, unique_name: &str) -> Option<Member>;

    /// Estimated number of members at `level`, used to gate native delegation.
    fn level_cardinality(&self, level: &LevelRef) -> Option<usize> {
        self.level_members(level).ok().map(|m| m.len())
    }

    /// Builds a native plan for `request`, or `None` when the backend cannot compute it.
    fn native_handle(&self, _request: &NativeRequest) -> Option<NativeHandle> {
        None
    }
}

pub trait RelationalBackend: Send + Sync {
    /// Loads the value of the cell at `coordinate`, one member per hierarchy, none calculated.
    fn load_cell(&self, coordinate: &[Member]) -> OlapResult<Value>;

    /// Executes a native plan, pushing each result tuple into `sink` in backend order.
    ///
    /// Errors returned by `sink` must be propagated unchanged and stop execution.
    fn execute(
        &self,
        handle: &NativeHandle,
        sink: &mut dyn FnMut(Tuple) -> OlapResult<()>,
    ) -> OlapResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => CompareOp::Eq,
            "<>" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn test<T: PartialOrd>(self, left: &T, right: &T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }
}

/// Where one operand of a native operator draws its members from.
#[derive(Clone, Debug, PartialEq)]
pub enum MemberSource {
    Level(LevelRef),
    Children(Member),
    Members(Vec<Member>),
}

impl MemberSource {
    pub fn hierarchy(&self) -> Option<HierarchyId> {
        match self {
            MemberSource::Level(level) => Some(level.hierarchy),
            MemberSource::Children(member) => Some(member.hierarchy()),
            MemberSource::Members(members) => members.first().map(Member::hierarchy),
        }
    }

    /// Resolves the source against `schema`, in natural member order.
    pub fn resolve(&self, schema: &dyn SchemaReader) -> OlapResult<Vec<Member>> {
        match self {
            MemberSource::Level(level) => Ok(schema.level_members(level)?.to_vec()),
            MemberSource::Children(member) => schema.children(member),
            MemberSource::Members(members) => Ok(members.clone()),
        }
    }
}

impl fmt::Display for MemberSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberSource::Level(level) => write!(f, "{level}.Members"),
            MemberSource::Children(member) => write!(f, "{member}.Children"),
            MemberSource::Members(members) => {
                f.write_str("{")?;
                for (idx, m) in members.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeOp {
    /// Cartesian product of the operands; in non-empty mode only tuples with fact data.
    CrossJoin,
    /// The `count` tuples with the largest `measure`, ties in natural order.
    TopCount { count: usize, measure: Member },
    /// Tuples whose `measure` satisfies `op operand`.
    Filter {
        measure: Member,
        op: CompareOp,
        operand: f64,
    },
}

/// The evaluation context a native plan must respect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextConstraint {
    /// Stored, non-all context members of hierarchies not varied by the operands.
    pub members: Vec<Member>,
    /// Disjunctions from the slicer: every fact must match one member of each list.
    pub slicer: Vec<Vec<Member>>,
    /// Stored measures whose presence makes a tuple non-empty.
    pub measures: Vec<Member>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NativeRequest {
    pub op: NativeOp,
    pub args: Vec<MemberSource>,
    pub constraint: ContextConstraint,
    pub non_empty: bool,
}

/// An opaque, executable native plan obtained from [`SchemaReader::native_handle`].
#[derive(Clone, Debug)]
pub struct NativeHandle {
    request: NativeRequest,
    plan: Arc<str>,
}

impl NativeHandle {
    pub fn new(request: NativeRequest, plan: impl Into<Arc<str>>) -> Self {
        Self {
            request,
            plan: plan.into(),
        }
    }

    pub fn request(&self) -> &NativeRequest {
        &self.request
    }

    /// Backend-specific description of the plan (typically the generated SQL).
    pub fn plan(&self) -> &str {
        &self.plan
    }
}
