//! Per-query evaluation context.
//!
//! The [`Evaluator`] owns the current coordinate (one member per hierarchy), the non-empty flag
//! and the slicer tuples. Nested evaluations override them temporarily through savepoints:
//!
//! * [`Evaluator::mark`] / [`Evaluator::restore`] is the raw LIFO bracket.
//! * [`Evaluator::scope`] returns a [`ContextScope`] guard that restores on drop, so the
//!   context is unwound on every exit path including `?`.
//!
//! Mutations are journaled only while a savepoint is outstanding, so top-level context setup is
//! free.

use crate::calc::CalcRef;
use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::error::{OlapError, OlapResult};
use crate::execution::Execution;
use crate::functions::FunctionTable;
use crate::model::{HierarchyId, Member, Tuple};
use crate::schema::{RelationalBackend, SchemaReader};
use crate::value::{Category, Value};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVALUATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, read-only collaborators of one query execution.
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub schema: &'a dyn SchemaReader,
    pub backend: &'a dyn RelationalBackend,
    pub functions: &'a FunctionTable,
    pub config: &'a EngineConfig,
    pub execution: &'a Execution,
}

impl<'a> EvalEnv<'a> {
    pub fn compiler(&self) -> Compiler<'a> {
        Compiler::new(self.functions)
    }
}

#[derive(Debug)]
enum Undo {
    Member(Member),
    NonEmpty(bool),
    Slicer(Arc<[Tuple]>),
}

#[derive(Debug)]
struct Mark {
    serial: u64,
    journal_len: usize,
}

/// Opaque marker returned by [`Evaluator::mark`].
#[must_use = "a savepoint must be passed to Evaluator::restore"]
#[derive(Debug)]
pub struct Savepoint {
    evaluator: u64,
    serial: u64,
}

pub struct Evaluator<'a> {
    env: EvalEnv<'a>,
    id: u64,
    coordinate: Vec<Member>,
    non_empty: bool,
    slicer: Arc<[Tuple]>,
    journal: Vec<Undo>,
    marks: Vec<Mark>,
    next_serial: u64,
    depth: usize,
    native_resolving: Vec<Arc<str>>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator positioned on every hierarchy's default member.
    pub fn new(env: EvalEnv<'a>) -> Self {
        let coordinate = env
            .schema
            .hierarchies()
            .iter()
            .map(|h| h.default_member().clone())
            .collect();
        Self {
            env,
            id: NEXT_EVALUATOR_ID.fetch_add(1, Ordering::Relaxed),
            coordinate,
            non_empty: false,
            slicer: Arc::from(Vec::new()),
            journal: Vec::new(),
            marks: Vec::new(),
            next_serial: 0,
            depth: 0,
            native_resolving: Vec::new(),
        }
    }

    pub fn env(&self) -> EvalEnv<'a> {
        self.env
    }

    pub fn schema(&self) -> &'a dyn SchemaReader {
        self.env.schema
    }

    pub fn backend(&self) -> &'a dyn RelationalBackend {
        self.env.backend
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.env.config
    }

    pub fn execution(&self) -> &'a Execution {
        self.env.execution
    }

    pub fn current_member(&self, hierarchy: HierarchyId) -> &Member {
        &self.coordinate[hierarchy.0]
    }

    pub fn coordinate(&self) -> &[Member] {
        &self.coordinate
    }

    pub fn set_context(&mut self, member: Member) {
        let slot = &mut self.coordinate[member.hierarchy().0];
        if *slot == member {
            return;
        }
        let previous = std::mem::replace(slot, member);
        if !self.marks.is_empty() {
            self.journal.push(Undo::Member(previous));
        }
    }

    pub fn set_context_tuple(&mut self, tuple: &Tuple) {
        for member in tuple.members() {
            self.set_context(member.clone());
        }
    }

    pub fn is_non_empty(&self) -> bool {
        self.non_empty
    }

    pub fn set_non_empty(&mut self, non_empty: bool) {
        if self.non_empty == non_empty {
            return;
        }
        let previous = std::mem::replace(&mut self.non_empty, non_empty);
        if !self.marks.is_empty() {
            self.journal.push(Undo::NonEmpty(previous));
        }
    }

    pub fn slicer(&self) -> &Arc<[Tuple]> {
        &self.slicer
    }

    pub fn set_slicer(&mut self, tuples: Arc<[Tuple]>) {
        let previous = std::mem::replace(&mut self.slicer, tuples);
        if !self.marks.is_empty() {
            self.journal.push(Undo::Slicer(previous));
        }
    }

    /// Drops the slicer's constraints on `hierarchies`, for operators that are about to vary
    /// those hierarchies themselves. Projected duplicates are collapsed.
    pub fn widen_slicer(&mut self, hierarchies: &[HierarchyId]) {
        if self.slicer.is_empty() {
            return;
        }
        let touches = self
            .slicer
            .iter()
            .any(|t| t.members().iter().any(|m| hierarchies.contains(&m.hierarchy())));
        if !touches {
            return;
        }
        let widened = project_out(&self.slicer, hierarchies);
        self.set_slicer(widened.into());
    }

    pub fn mark(&mut self) -> Savepoint {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.marks.push(Mark {
            serial,
            journal_len: self.journal.len(),
        });
        Savepoint {
            evaluator: self.id,
            serial,
        }
    }

    /// Undoes every mutation made since `savepoint` was taken. Inner savepoints that were not
    /// restored are discarded.
    ///
    /// # Panics
    ///
    /// If `savepoint` belongs to another evaluator, or was already discarded by restoring an
    /// outer savepoint.
    pub fn restore(&mut self, savepoint: Savepoint) {
        assert_eq!(
            savepoint.evaluator, self.id,
            "savepoint restored on an evaluator that did not create it"
        );
        let Some(pos) = self
            .marks
            .iter()
            .rposition(|m| m.serial == savepoint.serial)
        else {
            panic!(
                "savepoint {} restored out of order or after an outer savepoint",
                savepoint.serial
            );
        };
        let journal_len = self.marks[pos].journal_len;
        self.marks.truncate(pos);
        while self.journal.len() > journal_len {
            match self.journal.pop() {
                Some(Undo::Member(member)) => {
                    let idx = member.hierarchy().0;
                    self.coordinate[idx] = member;
                }
                Some(Undo::NonEmpty(flag)) => self.non_empty = flag,
                Some(Undo::Slicer(slicer)) => self.slicer = slicer,
                None => break,
            }
        }
        if self.marks.is_empty() {
            self.journal.clear();
        }
    }

    /// Takes a savepoint that is restored when the returned guard is dropped.
    pub fn scope(&mut self) -> ContextScope<'_, 'a> {
        let savepoint = self.mark();
        ContextScope {
            evaluator: self,
            savepoint: Some(savepoint),
        }
    }

    /// Number of savepoints currently outstanding.
    pub fn savepoint_depth(&self) -> usize {
        self.marks.len()
    }

    #[inline]
    pub fn check_cancel(&self) -> OlapResult<()> {
        self.env.execution.check()
    }

    /// Nesting depth of calculated-member evaluation.
    pub fn eval_depth(&self) -> usize {
        self.depth
    }

    /// Value of the cell at the current coordinate.
    ///
    /// When calculated members are in the coordinate, the one with the highest solve order is
    /// evaluated (ties prefer the measures hierarchy); otherwise the cell is loaded from the
    /// backend.
    pub fn cell_value(&mut self) -> OlapResult<Value> {
        self.check_cancel()?;
        let Some(member) = self.leading_calculated_member() else {
            return self.env.backend.load_cell(&self.coordinate);
        };
        if self.depth >= self.env.config.max_eval_depth {
            return Err(OlapError::Eval(format!(
                "infinite recursion detected while evaluating calculated member {member}"
            )));
        }
        let calc = self.formula_calc(&member)?;
        self.depth += 1;
        let result = calc.evaluate(self);
        self.depth -= 1;
        result
    }

    fn leading_calculated_member(&self) -> Option<Member> {
        let mut best: Option<(&Member, i32)> = None;
        for member in &self.coordinate {
            let Some(formula) = member.formula() else {
                continue;
            };
            let order = formula.solve_order();
            let better = match best {
                None => true,
                Some((current, current_order)) => {
                    order > current_order
                        || (order == current_order && member.is_measure() && !current.is_measure())
                }
            };
            if better {
                best = Some((member, order));
            }
        }
        best.map(|(member, _)| member.clone())
    }

    /// The compiled formula of a calculated member, compiling it on first use.
    pub fn formula_calc(&self, member: &Member) -> OlapResult<CalcRef> {
        compile_formula(&self.env.compiler(), member)?.ok_or_else(|| {
            OlapError::internal(format!("{member} is not a calculated member"))
        })
    }

    /// Registers `key` as being resolved natively. Returns `false` if it already is, which means
    /// resolving the slicer re-entered the same native expression.
    pub(crate) fn enter_native(&mut self, key: &Arc<str>) -> bool {
        if self.native_resolving.iter().any(|k| k == key) {
            return false;
        }
        self.native_resolving.push(Arc::clone(key));
        true
    }

    pub(crate) fn leave_native(&mut self, key: &Arc<str>) {
        if let Some(pos) = self.native_resolving.iter().rposition(|k| k == key) {
            self.native_resolving.remove(pos);
        }
    }
}

/// Removes the members of `hierarchies` from every tuple, dropping tuples that become empty and
/// duplicates created by the projection.
pub(crate) fn project_out(tuples: &[Tuple], hierarchies: &[HierarchyId]) -> Vec<Tuple> {
    let mut seen = ahash::AHashSet::new();
    let mut projected = Vec::new();
    for tuple in tuples {
        let tuple = Tuple::new(
            tuple
                .members()
                .iter()
                .filter(|m| !hierarchies.contains(&m.hierarchy()))
                .cloned(),
        );
        if tuple.arity() > 0 && seen.insert(tuple.clone()) {
            projected.push(tuple);
        }
    }
    projected
}

/// Compiles (once) and returns the formula of a calculated member; `None` for other members.
pub(crate) fn compile_formula(compiler: &Compiler<'_>, member: &Member) -> OlapResult<Option<CalcRef>> {
    let Some(formula) = member.formula() else {
        return Ok(None);
    };
    if let Some(calc) = formula.compiled() {
        return Ok(Some(Arc::clone(calc)));
    }
    let calc = compiler.compile(formula.expression(), Category::Value)?;
    Ok(Some(Arc::clone(formula.install(calc))))
}

/// Guard returned by [`Evaluator::scope`]. Dereferences to the evaluator and restores the
/// savepoint on drop.
pub struct ContextScope<'e, 'a> {
    evaluator: &'e mut Evaluator<'a>,
    savepoint: Option<Savepoint>,
}

impl<'e, 'a> Deref for ContextScope<'e, 'a> {
    type Target = Evaluator<'a>;

    fn deref(&self) -> &Evaluator<'a> {
        self.evaluator
    }
}

impl<'e, 'a> DerefMut for ContextScope<'e, 'a> {
    fn deref_mut(&mut self) -> &mut Evaluator<'a> {
        self.evaluator
    }
}

impl Drop for ContextScope<'_, '_> {
    fn drop(&mut self) {
        if let Some(savepoint) = self.savepoint.take() {
            self.evaluator.restore(savepoint);
        }
    }
}

impl std::fmt::Debug for Evaluator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("coordinate", &self.coordinate)
            .field("non_empty", &self.non_empty)
            .field("slicer", &self.slicer)
            .field("savepoints", &self.marks.len())
            .finish()
    }
}
