//! In-memory reference cube.
//!
//! [`InMemoryCube`] implements both collaborator traits over a flat fact list, so the engine can
//! be exercised end to end without a relational database. Native requests are answered by
//! scanning the facts, which keeps the results directly comparable with interpreted evaluation.
//!
//! ```
//! use formula_olap::{Aggregator, CubeBuilder};
//!
//! let mut builder = CubeBuilder::new();
//! builder.add_measure("Sales", Aggregator::Sum);
//! let store = builder.add_hierarchy("Store", &["State", "City"]);
//! builder
//!     .add_fact(&[(store, &["CA", "San Francisco"])], &[("Sales", 10.0)])
//!     .unwrap();
//! let cube = builder.build().unwrap();
//! assert!(cube.member("[Store].[All].[CA].[San Francisco]").is_some());
//! ```

use crate::calc::set::Cartesian;
use crate::error::{OlapError, OlapResult};
use crate::model::{Aggregator, Hierarchy, HierarchyId, LevelRef, Member, Tuple};
use crate::schema::{
    ContextConstraint, MemberSource, NativeHandle, NativeOp, NativeRequest, RelationalBackend,
    SchemaReader,
};
use crate::stats::KahanSum;
use crate::value::Value;
use ahash::AHashMap;
use dashmap::DashMap;
use ordered_float::OrderedFloat;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const MEASURES: HierarchyId = HierarchyId(0);

struct HierarchyDef {
    name: String,
    /// Level names, `(All)` first.
    levels: Vec<String>,
    ragged: bool,
    all: Member,
    /// Members per depth, in insertion order.
    by_depth: Vec<Vec<Member>>,
    children: AHashMap<Member, Vec<Member>>,
}

impl HierarchyDef {
    fn ensure_path(&mut self, path: &[&str]) -> OlapResult<Member> {
        if path.len() >= self.levels.len() {
            return Err(OlapError::Config(format!(
                "path {path:?} is deeper than hierarchy [{}]",
                self.name
            )));
        }
        let mut current = self.all.clone();
        for (depth, name) in path.iter().enumerate() {
            let siblings = self.children.entry(current.clone()).or_default();
            let next = match siblings.iter().find(|m| m.name() == *name) {
                Some(existing) => existing.clone(),
                None => {
                    let child = Member::child(&current, *name, siblings.len() as u32);
                    siblings.push(child.clone());
                    self.by_depth[depth + 1].push(child.clone());
                    child
                }
            };
            current = next;
        }
        Ok(current)
    }
}

struct Fact {
    /// One member per dimension hierarchy, in id order starting at 1.
    members: Vec<Member>,
    /// One value per measure.
    values: Vec<Option<f64>>,
}

impl Fact {
    fn member(&self, hierarchy: HierarchyId) -> Option<&Member> {
        hierarchy
            .0
            .checked_sub(1)
            .and_then(|idx| self.members.get(idx))
    }

    fn matches(&self, member: &Member) -> bool {
        if member.is_all() {
            return true;
        }
        self.member(member.hierarchy())
            .is_some_and(|stored| member.is_ancestor_or_self(stored))
    }
}

/// Collects measures, hierarchies and facts for an [`InMemoryCube`].
///
/// The measures hierarchy always has id 0; dimension hierarchies are numbered from 1 in the order
/// they are added.
#[derive(Default)]
pub struct CubeBuilder {
    measures: Vec<(String, Aggregator)>,
    hierarchies: Vec<HierarchyDef>,
    facts: Vec<Fact>,
}

impl CubeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_measure(&mut self, name: &str, aggregator: Aggregator) -> &mut Self {
        self.measures.push((name.to_string(), aggregator));
        self
    }

    /// Adds a dimension hierarchy with an `(All)` level on top of `levels`.
    pub fn add_hierarchy(&mut self, name: &str, levels: &[&str]) -> HierarchyId {
        let id = HierarchyId(self.hierarchies.len() + 1);
        let all = Member::all(id, name);
        let mut level_names = vec!["(All)".to_string()];
        level_names.extend(levels.iter().map(|l| l.to_string()));
        let mut by_depth = vec![Vec::new(); level_names.len()];
        by_depth[0].push(all.clone());
        self.hierarchies.push(HierarchyDef {
            name: name.to_string(),
            levels: level_names,
            ragged: false,
            all,
            by_depth,
            children: AHashMap::new(),
        });
        id
    }

    /// Marks a hierarchy ragged: some members skip levels, so native plans must not treat its
    /// levels as single predicates.
    pub fn set_ragged(&mut self, hierarchy: HierarchyId, ragged: bool) -> OlapResult<&mut Self> {
        self.def_mut(hierarchy)?.ragged = ragged;
        Ok(self)
    }

    /// Declares members without attaching any fact to them.
    pub fn add_members(&mut self, hierarchy: HierarchyId, path: &[&str]) -> OlapResult<Member> {
        self.def_mut(hierarchy)?.ensure_path(path)
    }

    /// Adds one fact row. Hierarchies not named in `coordinate` attach the fact to their `All`
    /// member; measures not named in `values` are null for this row.
    pub fn add_fact(
        &mut self,
        coordinate: &[(HierarchyId, &[&str])],
        values: &[(&str, f64)],
    ) -> OlapResult<()> {
        let mut members: Vec<Member> = self.hierarchies.iter().map(|h| h.all.clone()).collect();
        for (hierarchy, path) in coordinate {
            let member = self.def_mut(*hierarchy)?.ensure_path(path)?;
            members[hierarchy.0 - 1] = member;
        }
        let mut row = vec![None; self.measures.len()];
        for (name, value) in values {
            let idx = self
                .measures
                .iter()
                .position(|(m, _)| m.eq_ignore_ascii_case(name))
                .ok_or_else(|| OlapError::Config(format!("unknown measure {name}")))?;
            row[idx] = Some(*value);
        }
        self.facts.push(Fact {
            members,
            values: row,
        });
        Ok(())
    }

    fn def_mut(&mut self, hierarchy: HierarchyId) -> OlapResult<&mut HierarchyDef> {
        hierarchy
            .0
            .checked_sub(1)
            .and_then(|idx| self.hierarchies.get_mut(idx))
            .ok_or_else(|| OlapError::Config(format!("unknown hierarchy {hierarchy:?}")))
    }

    pub fn build(self) -> OlapResult<InMemoryCube> {
        let measures: Vec<Member> = self
            .measures
            .iter()
            .enumerate()
            .map(|(idx, (name, aggregator))| {
                Member::measure(MEASURES, name.as_str(), *aggregator, idx as u32)
            })
            .collect();
        let Some(default_measure) = measures.first().cloned() else {
            return Err(OlapError::Config("a cube needs at least one measure".into()));
        };

        let mut hierarchies = vec![Hierarchy::new(
            MEASURES,
            "Measures",
            vec!["MeasuresLevel".to_string()],
            default_measure,
            true,
            false,
        )];
        let mut levels: Vec<Vec<Arc<[Member]>>> = vec![vec![measures.clone().into()]];
        let mut children = AHashMap::new();
        for (idx, def) in self.hierarchies.into_iter().enumerate() {
            hierarchies.push(Hierarchy::new(
                HierarchyId(idx + 1),
                def.name,
                def.levels,
                def.all,
                false,
                def.ragged,
            ));
            levels.push(def.by_depth.into_iter().map(Arc::from).collect());
            children.extend(def.children);
        }

        log::debug!(
            "built in-memory cube with {} hierarchies, {} measures and {} facts",
            hierarchies.len(),
            measures.len(),
            self.facts.len()
        );
        Ok(InMemoryCube {
            hierarchies,
            measures,
            levels,
            children,
            facts: self.facts,
            member_cache: DashMap::new(),
            native_enabled: AtomicBool::new(true),
            native_executions: AtomicUsize::new(0),
            cell_loads: AtomicUsize::new(0),
        })
    }
}

/// Reference [`SchemaReader`] and [`RelationalBackend`] over an in-memory fact list.
///
/// Member lookups by unique name walk the hierarchy tree and are cached in a concurrent map that
/// may be invalidated while other threads read it.
pub struct InMemoryCube {
    hierarchies: Vec<Hierarchy>,
    measures: Vec<Member>,
    /// Members per hierarchy and depth.
    levels: Vec<Vec<Arc<[Member]>>>,
    children: AHashMap<Member, Vec<Member>>,
    facts: Vec<Fact>,
    member_cache: DashMap<Arc<str>, Member>,
    native_enabled: AtomicBool,
    native_executions: AtomicUsize,
    cell_loads: AtomicUsize,
}

impl InMemoryCube {
    pub fn measures(&self) -> &[Member] {
        &self.measures
    }

    /// Looks a member up by unique name, panicking-free shorthand for tests and embedders.
    pub fn member(&self, unique_name: &str) -> Option<Member> {
        self.lookup_member(unique_name)
    }

    pub fn measure(&self, name: &str) -> Option<Member> {
        self.measures
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Level `depth` of `hierarchy`; depth 0 is `(All)`.
    pub fn level(&self, hierarchy: HierarchyId, depth: usize) -> Option<LevelRef> {
        self.hierarchy(hierarchy)?.level(depth)
    }

    /// Switches native plans on or off, simulating a backend that cannot compute them.
    pub fn set_native_enabled(&self, enabled: bool) {
        self.native_enabled.store(enabled, Ordering::Release);
    }

    pub fn native_executions(&self) -> usize {
        self.native_executions.load(Ordering::Relaxed)
    }

    pub fn cell_loads(&self) -> usize {
        self.cell_loads.load(Ordering::Relaxed)
    }

    pub fn cached_members(&self) -> usize {
        self.member_cache.len()
    }

    pub fn invalidate_member(&self, unique_name: &str) {
        self.member_cache.remove(unique_name);
    }

    pub fn invalidate_all(&self) {
        self.member_cache.clear();
    }

    fn resolve_unique_name(&self, unique_name: &str) -> Option<Member> {
        if let Some(measure) = self.measures.iter().find(|m| m.unique_name() == unique_name) {
            return Some(measure.clone());
        }
        let root = self
            .hierarchies
            .iter()
            .filter(|h| !h.is_measures())
            .map(Hierarchy::default_member)
            .find(|all| has_segment_prefix(unique_name, all.unique_name()))?;
        let mut current = root.clone();
        while current.unique_name() != unique_name {
            let next = self
                .children
                .get(&current)?
                .iter()
                .find(|child| has_segment_prefix(unique_name, child.unique_name()))?;
            current = next.clone();
        }
        Some(current)
    }

    fn measure_index(&self, measure: &Member) -> OlapResult<usize> {
        self.measures
            .iter()
            .position(|m| m == measure)
            .ok_or_else(|| OlapError::Backend(format!("{measure} is not a stored measure")))
    }

    /// Facts passing the context constraint's members and slicer disjunctions.
    fn constrained_facts(&self, constraint: &ContextConstraint) -> Vec<&Fact> {
        self.facts
            .iter()
            .filter(|fact| constraint.members.iter().all(|m| fact.matches(m)))
            .filter(|fact| {
                constraint
                    .slicer
                    .iter()
                    .all(|any_of| any_of.iter().any(|m| fact.matches(m)))
            })
            .collect()
    }

    fn rollup<'f>(
        facts: impl Iterator<Item = &'f Fact>,
        measure: usize,
        aggregator: Aggregator,
    ) -> Option<f64> {
        let mut values = facts.filter_map(|fact| fact.values.get(measure).copied().flatten());
        let first = values.next()?;
        Some(match aggregator {
            Aggregator::Sum => {
                let mut sum = KahanSum::default();
                sum.add(first);
                values.for_each(|v| sum.add(v));
                sum.value()
            }
            Aggregator::Count => (1 + values.count()) as f64,
            Aggregator::Min => values.fold(first, f64::min),
            Aggregator::Max => values.fold(first, f64::max),
        })
    }

    fn tuple_value(&self, facts: &[&Fact], tuple: &Tuple, measure: &Member) -> OlapResult<Option<f64>> {
        let idx = self.measure_index(measure)?;
        let aggregator = measure.aggregator().unwrap_or(Aggregator::Sum);
        let matching = facts
            .iter()
            .copied()
            .filter(|fact| tuple.members().iter().all(|m| fact.matches(m)));
        Ok(Self::rollup(matching, idx, aggregator))
    }

    /// Whether some fact under `tuple` has a value for one of `measures` (any fact when no
    /// measure is given).
    fn has_data(&self, facts: &[&Fact], tuple: &Tuple, measures: &[usize]) -> bool {
        facts
            .iter()
            .filter(|fact| tuple.members().iter().all(|m| fact.matches(m)))
            .any(|fact| {
                measures.is_empty()
                    || measures
                        .iter()
                        .any(|&idx| fact.values.get(idx).copied().flatten().is_some())
            })
    }
}

/// `name` equals `prefix` or continues it with another `.[segment]`.
fn has_segment_prefix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(".["))
}

impl SchemaReader for InMemoryCube {
    fn hierarchies(&self) -> &[Hierarchy] {
        &self.hierarchies
    }

    fn level_members(&self, level: &LevelRef) -> OlapResult<Arc<[Member]>> {
        self.levels
            .get(level.hierarchy.0)
            .and_then(|depths| depths.get(level.depth))
            .cloned()
            .ok_or_else(|| OlapError::UnknownMember(level.to_string()))
    }

    fn children(&self, member: &Member) -> OlapResult<Vec<Member>> {
        Ok(self.children.get(member).cloned().unwrap_or_default())
    }

    fn lookup_member(&self, unique_name: &str) -> Option<Member> {
        if let Some(member) = self.member_cache.get(unique_name) {
            return Some(member.clone());
        }
        let member = self.resolve_unique_name(unique_name)?;
        self.member_cache
            .insert(Arc::from(unique_name), member.clone());
        Some(member)
    }

    fn level_cardinality(&self, level: &LevelRef) -> Option<usize> {
        self.levels
            .get(level.hierarchy.0)
            .and_then(|depths| depths.get(level.depth))
            .map(|members| members.len())
    }

    fn native_handle(&self, request: &NativeRequest) -> Option<NativeHandle> {
        if !self.native_enabled.load(Ordering::Acquire) {
            return None;
        }
        Some(NativeHandle::new(request.clone(), render_plan(request)))
    }
}

impl RelationalBackend for InMemoryCube {
    fn load_cell(&self, coordinate: &[Member]) -> OlapResult<Value> {
        self.cell_loads.fetch_add(1, Ordering::Relaxed);
        let measure = coordinate
            .iter()
            .find(|m| m.is_measure())
            .ok_or_else(|| OlapError::Backend("coordinate has no measure".into()))?;
        if let Some(calculated) = coordinate.iter().find(|m| m.is_calculated()) {
            return Err(OlapError::Backend(format!(
                "cannot load a cell for calculated member {calculated}"
            )));
        }
        let idx = self.measure_index(measure)?;
        let aggregator = measure.aggregator().unwrap_or(Aggregator::Sum);
        let matching = self.facts.iter().filter(|fact| {
            coordinate
                .iter()
                .filter(|m| !m.is_measure())
                .all(|m| fact.matches(m))
        });
        Ok(Self::rollup(matching, idx, aggregator).into())
    }

    fn execute(
        &self,
        handle: &NativeHandle,
        sink: &mut dyn FnMut(Tuple) -> OlapResult<()>,
    ) -> OlapResult<()> {
        self.native_executions.fetch_add(1, Ordering::Relaxed);
        let request = handle.request();
        let mut lists = Vec::with_capacity(request.args.len());
        for source in &request.args {
            let members = source.resolve(self)?;
            lists.push(members.into_iter().map(Tuple::single).collect::<Arc<[Tuple]>>());
        }
        let facts = self.constrained_facts(&request.constraint);
        let measures = request
            .constraint
            .measures
            .iter()
            .map(|m| self.measure_index(m))
            .collect::<OlapResult<Vec<_>>>()?;
        let keep = |tuple: &Tuple| !request.non_empty || self.has_data(&facts, tuple, &measures);

        match &request.op {
            NativeOp::CrossJoin => {
                for tuple in Cartesian::new(lists) {
                    if keep(&tuple) {
                        sink(tuple)?;
                    }
                }
            }
            NativeOp::TopCount { count, measure } => {
                let mut ranked = Vec::new();
                for tuple in Cartesian::new(lists) {
                    if keep(&tuple) {
                        let key = self.tuple_value(&facts, &tuple, measure)?;
                        ranked.push((key.map(OrderedFloat), tuple));
                    }
                }
                // Stable: ties stay in natural order.
                ranked.sort_by(|a, b| b.0.cmp(&a.0));
                for (_, tuple) in ranked.into_iter().take(*count) {
                    sink(tuple)?;
                }
            }
            NativeOp::Filter {
                measure,
                op,
                operand,
            } => {
                for tuple in Cartesian::new(lists) {
                    if !keep(&tuple) {
                        continue;
                    }
                    if let Some(value) = self.tuple_value(&facts, &tuple, measure)? {
                        if op.test(&value, operand) {
                            sink(tuple)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pseudo-SQL describing a request, for logs.
fn render_plan(request: &NativeRequest) -> String {
    let mut plan = String::from("select ");
    for (idx, source) in request.args.iter().enumerate() {
        if idx > 0 {
            plan.push_str(" x ");
        }
        let _ = write!(plan, "{source}");
    }
    plan.push_str(" from facts");
    let constraint = &request.constraint;
    let mut predicates: Vec<String> = constraint.members.iter().map(|m| m.to_string()).collect();
    for any_of in &constraint.slicer {
        let names: Vec<String> = any_of.iter().map(|m| m.to_string()).collect();
        predicates.push(format!("({})", names.join(" or ")));
    }
    if !predicates.is_empty() {
        let _ = write!(plan, " where {}", predicates.join(" and "));
    }
    match &request.op {
        NativeOp::CrossJoin => {}
        NativeOp::TopCount { count, measure } => {
            let _ = write!(plan, " order by {measure} desc limit {count}");
        }
        NativeOp::Filter {
            measure,
            op,
            operand,
        } => {
            let _ = write!(plan, " having {measure} {} {operand}", op.symbol());
        }
    }
    if request.non_empty {
        let names: Vec<String> = constraint.measures.iter().map(|m| m.to_string()).collect();
        let _ = write!(plan, " non empty on ({})", names.join(", "));
    }
    plan
}
