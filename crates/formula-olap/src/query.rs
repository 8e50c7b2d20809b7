//! A minimal query executor on top of the compiler and evaluator.
//!
//! A [`Query`] is a list of axis set expressions plus an optional slicer. [`OlapEngine::prepare`]
//! compiles it once; [`OlapEngine::execute`] evaluates the axes, then every cell of their cross
//! product, and returns a [`CellSet`].

use crate::calc::{CalcRef, ResultStyle, SetOperand};
use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::error::OlapResult;
use crate::evaluator::{EvalEnv, Evaluator};
use crate::execution::Execution;
use crate::functions::{FunctionTable, SLICER_FUNCTION};
use crate::model::{Member, Tuple};
use crate::schema::{RelationalBackend, SchemaReader};
use crate::syntax::Exp;
use crate::value::{Category, Value};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Axis {
    pub set: Exp,
    /// Drop positions whose cells are all empty.
    pub non_empty: bool,
}

impl Axis {
    pub fn new(set: Exp) -> Self {
        Self {
            set,
            non_empty: false,
        }
    }

    pub fn non_empty(set: Exp) -> Self {
        Self {
            set,
            non_empty: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Query {
    pub axes: Vec<Axis>,
    pub slicer: Option<Exp>,
}

/// A compiled query; execute it any number of times.
#[derive(Debug)]
pub struct PreparedQuery {
    axes: Vec<(SetOperand, bool)>,
    slicer: Option<SetOperand>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Value(Value),
    /// A recoverable evaluation error confined to this cell.
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Value(Value::Null))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Value(value) => value.to_number().ok().flatten(),
            CellValue::Error(_) => None,
        }
    }
}

/// Axis positions plus cells. Axis 0 varies fastest in `cells`.
#[derive(Clone, Debug, PartialEq)]
pub struct CellSet {
    pub axes: Vec<Vec<Tuple>>,
    pub cells: Vec<CellValue>,
}

impl CellSet {
    pub fn cell(&self, coords: &[usize]) -> Option<&CellValue> {
        if coords.len() != self.axes.len() {
            return None;
        }
        let mut offset = 0;
        let mut stride = 1;
        for (axis, &pos) in self.axes.iter().zip(coords) {
            if pos >= axis.len() {
                return None;
            }
            offset += pos * stride;
            stride *= axis.len();
        }
        self.cells.get(offset)
    }
}

/// Compiles and runs queries against a cube. Holds the function table and options; the cube is
/// passed per call so one engine may serve several cubes.
#[derive(Debug)]
pub struct OlapEngine {
    functions: FunctionTable,
    config: EngineConfig,
}

impl Default for OlapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OlapEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            functions: FunctionTable::with_builtins(),
            config,
        }
    }

    pub fn with_functions(functions: FunctionTable, config: EngineConfig) -> Self {
        Self { functions, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.functions)
    }

    pub fn prepare(&self, query: &Query) -> OlapResult<PreparedQuery> {
        let compiler = self.compiler();
        let axes = query
            .axes
            .iter()
            .map(|axis| {
                Ok((
                    compiler.compile_set(&axis.set, ResultStyle::RANDOM_ACCESS)?,
                    axis.non_empty,
                ))
            })
            .collect::<OlapResult<Vec<_>>>()?;
        let slicer = query
            .slicer
            .as_ref()
            .map(|exp| compiler.compile_set(exp, ResultStyle::RANDOM_ACCESS))
            .transpose()?;
        Ok(PreparedQuery { axes, slicer })
    }

    pub fn execute<C>(&self, query: &PreparedQuery, cube: &C) -> OlapResult<CellSet>
    where
        C: SchemaReader + RelationalBackend,
    {
        let execution = Execution::from_config(&self.config);
        self.execute_with(query, cube, &execution)
    }

    /// Like [`OlapEngine::execute`], observing a caller-owned [`Execution`] for cancellation.
    pub fn execute_with<C>(
        &self,
        query: &PreparedQuery,
        cube: &C,
        execution: &Execution,
    ) -> OlapResult<CellSet>
    where
        C: SchemaReader + RelationalBackend,
    {
        let mut ev = Evaluator::new(self.env(cube, execution));
        let has_data = match &query.slicer {
            Some(slicer) => apply_slicer(&mut ev, slicer)?,
            None => true,
        };

        let mut axes = Vec::with_capacity(query.axes.len());
        for (set, non_empty) in &query.axes {
            let mut scope = ev.scope();
            scope.set_non_empty(*non_empty);
            axes.push(set.evaluate_list(&mut scope)?.to_vec());
        }

        let total: usize = axes.iter().map(Vec::len).product();
        let mut cells = Vec::with_capacity(total);
        for offset in 0..total {
            if !has_data {
                cells.push(CellValue::Value(Value::Null));
                continue;
            }
            let mut scope = ev.scope();
            let mut rest = offset;
            for axis in &axes {
                scope.set_context_tuple(&axis[rest % axis.len()]);
                rest /= axis.len();
            }
            cells.push(match scope.cell_value() {
                Ok(value) => CellValue::Value(value),
                Err(err) if err.is_cell_error() => CellValue::Error(err.to_string()),
                Err(err) => return Err(err),
            });
        }
        log::trace!(
            "evaluated {} cells over {} axes in {:?}",
            cells.len(),
            axes.len(),
            execution.elapsed()
        );

        let mut cell_set = CellSet { axes, cells };
        let non_empty: Vec<bool> = query.axes.iter().map(|(_, n)| *n).collect();
        if non_empty.iter().any(|n| *n) {
            cell_set = prune_empty(cell_set, &non_empty);
        }
        Ok(cell_set)
    }

    /// Evaluates a scalar expression with `context` members set on top of the defaults.
    pub fn evaluate<C>(&self, exp: &Exp, cube: &C, context: &[Member]) -> OlapResult<Value>
    where
        C: SchemaReader + RelationalBackend,
    {
        let calc = self.compiler().compile(exp, Category::Value)?;
        self.evaluate_calc(&calc, cube, context)
    }

    pub fn evaluate_calc<C>(&self, calc: &CalcRef, cube: &C, context: &[Member]) -> OlapResult<Value>
    where
        C: SchemaReader + RelationalBackend,
    {
        let execution = Execution::from_config(&self.config);
        let mut ev = Evaluator::new(self.env(cube, &execution));
        for member in context {
            ev.set_context(member.clone());
        }
        calc.evaluate(&mut ev)
    }

    /// Evaluates a set expression with `context` members set on top of the defaults.
    pub fn evaluate_set<C>(&self, exp: &Exp, cube: &C, context: &[Member]) -> OlapResult<Vec<Tuple>>
    where
        C: SchemaReader + RelationalBackend,
    {
        let set = self.compiler().compile_set(exp, ResultStyle::RANDOM_ACCESS)?;
        let execution = Execution::from_config(&self.config);
        let mut ev = Evaluator::new(self.env(cube, &execution));
        for member in context {
            ev.set_context(member.clone());
        }
        Ok(set.evaluate_list(&mut ev)?.to_vec())
    }

    fn env<'a, C>(&'a self, cube: &'a C, execution: &'a Execution) -> EvalEnv<'a>
    where
        C: SchemaReader + RelationalBackend,
    {
        EvalEnv {
            schema: cube,
            backend: cube,
            functions: &self.functions,
            config: &self.config,
            execution,
        }
    }
}

/// Positions the evaluator on the slicer. Returns `false` for an empty slicer, whose cells are
/// all empty.
fn apply_slicer(ev: &mut Evaluator<'_>, slicer: &SetOperand) -> OlapResult<bool> {
    let tuples = slicer.evaluate_list(ev)?;
    match tuples.len() {
        0 => return Ok(false),
        1 => ev.set_context_tuple(&tuples[0]),
        _ => {
            let Some(first) = tuples[0].get(0) else {
                return Ok(false);
            };
            let root = ev
                .schema()
                .hierarchy(first.hierarchy())
                .map(|h| h.default_member().clone())
                .unwrap_or_else(|| first.clone());
            let aggregate = Exp::call("Aggregate", vec![Exp::call(SLICER_FUNCTION, Vec::new())]);
            ev.set_context(Member::calculated(&root, "Slicer", aggregate, 0));
        }
    }
    ev.set_slicer(Arc::clone(&tuples));
    Ok(true)
}

/// Removes positions of non-empty axes whose cells are all empty. Error cells count as
/// non-empty.
fn prune_empty(cell_set: CellSet, non_empty: &[bool]) -> CellSet {
    let CellSet { axes, cells } = cell_set;
    let mut keep: Vec<Vec<bool>> = axes
        .iter()
        .zip(non_empty)
        .map(|(axis, n)| vec![!*n; axis.len()])
        .collect();
    for (offset, cell) in cells.iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        let mut rest = offset;
        for (axis, flags) in axes.iter().zip(keep.iter_mut()) {
            flags[rest % axis.len()] = true;
            rest /= axis.len();
        }
    }

    let kept_positions: Vec<Vec<usize>> = keep
        .iter()
        .map(|flags| (0..flags.len()).filter(|&i| flags[i]).collect())
        .collect();
    let total: usize = kept_positions.iter().map(Vec::len).product();
    let mut pruned_cells = Vec::with_capacity(total);
    for offset in 0..total {
        let mut rest = offset;
        let mut old_offset = 0;
        let mut stride = 1;
        for (positions, axis) in kept_positions.iter().zip(&axes) {
            old_offset += positions[rest % positions.len()] * stride;
            rest /= positions.len();
            stride *= axis.len();
        }
        pruned_cells.push(cells[old_offset].clone());
    }
    let pruned_axes = axes
        .iter()
        .zip(&kept_positions)
        .map(|(axis, positions)| positions.iter().map(|&i| axis[i].clone()).collect())
        .collect();
    CellSet {
        axes: pruned_axes,
        cells: pruned_cells,
    }
}
