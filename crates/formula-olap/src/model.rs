//! Metadata handles consumed by the engine: hierarchies, levels, members and tuples.
//!
//! These are deliberately thin. Loading a schema, caching members and answering structural
//! questions (children, level members) is the job of a [`crate::SchemaReader`]; the engine only
//! needs cheap, clonable handles it can put in a coordinate.

use crate::calc::CalcRef;
use crate::syntax::Exp;
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Ordinal of a hierarchy within its cube. Coordinates are indexed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HierarchyId(pub usize);

#[derive(Clone)]
pub struct Hierarchy(Arc<HierarchyData>);

struct HierarchyData {
    id: HierarchyId,
    name: String,
    levels: Vec<String>,
    default_member: Member,
    is_measures: bool,
    ragged: bool,
}

impl Hierarchy {
    pub fn new(
        id: HierarchyId,
        name: impl Into<String>,
        levels: Vec<String>,
        default_member: Member,
        is_measures: bool,
        ragged: bool,
    ) -> Self {
        Self(Arc::new(HierarchyData {
            id,
            name: name.into(),
            levels,
            default_member,
            is_measures,
            ragged,
        }))
    }

    pub fn id(&self) -> HierarchyId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn default_member(&self) -> &Member {
        &self.0.default_member
    }

    pub fn is_measures(&self) -> bool {
        self.0.is_measures
    }

    /// Ragged hierarchies skip levels for some members, so a level cannot be expressed as a
    /// single relational predicate.
    pub fn is_ragged(&self) -> bool {
        self.0.ragged
    }

    pub fn level_count(&self) -> usize {
        self.0.levels.len()
    }

    pub fn level(&self, depth: usize) -> Option<LevelRef> {
        let name = self.0.levels.get(depth)?;
        Some(LevelRef {
            hierarchy: self.0.id,
            depth,
            unique_name: format!("[{}].[{}]", self.0.name, name).into(),
        })
    }

    pub fn level_by_name(&self, name: &str) -> Option<LevelRef> {
        let depth = self
            .0
            .levels
            .iter()
            .position(|l| l.eq_ignore_ascii_case(name))?;
        self.level(depth)
    }
}

impl PartialEq for Hierarchy {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Hierarchy {}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.name)
    }
}

#[derive(Clone, Debug)]
pub struct LevelRef {
    pub hierarchy: HierarchyId,
    pub depth: usize,
    pub unique_name: Arc<str>,
}

impl PartialEq for LevelRef {
    fn eq(&self, other: &Self) -> bool {
        self.hierarchy == other.hierarchy && self.depth == other.depth
    }
}

impl Eq for LevelRef {}

impl Hash for LevelRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hierarchy.hash(state);
        self.depth.hash(state);
    }
}

impl fmt::Display for LevelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_name)
    }
}

/// How a stored measure rolls up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
}

/// Expression attached to a calculated member.
pub struct Formula {
    expression: Exp,
    solve_order: i32,
    compiled: OnceLock<CalcRef>,
}

impl Formula {
    pub fn new(expression: Exp, solve_order: i32) -> Self {
        Self {
            expression,
            solve_order,
            compiled: OnceLock::new(),
        }
    }

    pub fn expression(&self) -> &Exp {
        &self.expression
    }

    pub fn solve_order(&self) -> i32 {
        self.solve_order
    }

    pub(crate) fn compiled(&self) -> Option<&CalcRef> {
        self.compiled.get()
    }

    /// Stores `calc` unless another thread got there first; returns the winner.
    pub(crate) fn install(&self, calc: CalcRef) -> &CalcRef {
        let _ = self.compiled.set(calc);
        self.compiled.get().unwrap_or_else(|| unreachable!("OnceLock set above"))
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("expression", &self.expression.to_string())
            .field("solve_order", &self.solve_order)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum MemberKind {
    All,
    Regular,
    Measure(Aggregator),
    Calculated(Arc<Formula>),
}

/// A position within a hierarchy. Equality and hashing use the unique name.
#[derive(Clone)]
pub struct Member(Arc<MemberData>);

struct MemberData {
    hierarchy: HierarchyId,
    unique_name: String,
    name: String,
    depth: usize,
    ordinal: u32,
    parent: Option<Member>,
    is_measure: bool,
    kind: MemberKind,
}

impl Member {
    pub fn all(hierarchy: HierarchyId, hierarchy_name: &str) -> Self {
        Self(Arc::new(MemberData {
            hierarchy,
            unique_name: format!("[{hierarchy_name}].[All]"),
            name: "All".to_string(),
            depth: 0,
            ordinal: 0,
            parent: None,
            is_measure: false,
            kind: MemberKind::All,
        }))
    }

    pub fn child(parent: &Member, name: impl Into<String>, ordinal: u32) -> Self {
        let name = name.into();
        Self(Arc::new(MemberData {
            hierarchy: parent.hierarchy(),
            unique_name: format!("{}.[{}]", parent.unique_name(), name),
            name,
            depth: parent.depth() + 1,
            ordinal,
            parent: Some(parent.clone()),
            is_measure: parent.is_measure(),
            kind: MemberKind::Regular,
        }))
    }

    pub fn measure(
        hierarchy: HierarchyId,
        name: impl Into<String>,
        aggregator: Aggregator,
        ordinal: u32,
    ) -> Self {
        let name = name.into();
        Self(Arc::new(MemberData {
            hierarchy,
            unique_name: format!("[Measures].[{name}]"),
            name,
            depth: 0,
            ordinal,
            parent: None,
            is_measure: true,
            kind: MemberKind::Measure(aggregator),
        }))
    }

    pub fn calculated_measure(
        hierarchy: HierarchyId,
        name: impl Into<String>,
        expression: Exp,
        solve_order: i32,
    ) -> Self {
        let name = name.into();
        Self(Arc::new(MemberData {
            hierarchy,
            unique_name: format!("[Measures].[{name}]"),
            name,
            depth: 0,
            ordinal: u32::MAX,
            parent: None,
            is_measure: true,
            kind: MemberKind::Calculated(Arc::new(Formula::new(expression, solve_order))),
        }))
    }

    /// A calculated member placed under `parent` in a non-measure hierarchy.
    pub fn calculated(
        parent: &Member,
        name: impl Into<String>,
        expression: Exp,
        solve_order: i32,
    ) -> Self {
        let name = name.into();
        Self(Arc::new(MemberData {
            hierarchy: parent.hierarchy(),
            unique_name: format!("{}.[{}]", parent.unique_name(), name),
            name,
            depth: parent.depth() + 1,
            ordinal: u32::MAX,
            parent: Some(parent.clone()),
            is_measure: parent.is_measure(),
            kind: MemberKind::Calculated(Arc::new(Formula::new(expression, solve_order))),
        }))
    }

    pub fn hierarchy(&self) -> HierarchyId {
        self.0.hierarchy
    }

    pub fn unique_name(&self) -> &str {
        &self.0.unique_name
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn ordinal(&self) -> u32 {
        self.0.ordinal
    }

    pub fn parent(&self) -> Option<&Member> {
        self.0.parent.as_ref()
    }

    pub fn kind(&self) -> &MemberKind {
        &self.0.kind
    }

    pub fn is_all(&self) -> bool {
        matches!(self.0.kind, MemberKind::All)
    }

    pub fn is_measure(&self) -> bool {
        self.0.is_measure
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.0.kind, MemberKind::Calculated(_))
    }

    pub fn is_stored_measure(&self) -> bool {
        matches!(self.0.kind, MemberKind::Measure(_))
    }

    pub fn formula(&self) -> Option<&Arc<Formula>> {
        match &self.0.kind {
            MemberKind::Calculated(formula) => Some(formula),
            _ => None,
        }
    }

    pub fn aggregator(&self) -> Option<Aggregator> {
        match self.0.kind {
            MemberKind::Measure(aggregator) => Some(aggregator),
            _ => None,
        }
    }

    /// `true` when `self` is `other` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, other: &Member) -> bool {
        if self.0.hierarchy != other.0.hierarchy || self.0.depth > other.0.depth {
            return false;
        }
        let mut cursor = Some(other);
        while let Some(member) = cursor {
            if member.0.depth == self.0.depth {
                return member == self;
            }
            cursor = member.parent();
        }
        false
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.unique_name == other.0.unique_name
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.unique_name.hash(state);
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.unique_name)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.unique_name)
    }
}

/// An ordered combination of members from distinct hierarchies.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Tuple(SmallVec<[Member; 4]>);

impl Tuple {
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        Self(members.into_iter().collect())
    }

    pub fn single(member: Member) -> Self {
        let mut members = SmallVec::new();
        members.push(member);
        Self(members)
    }

    pub fn members(&self) -> &[Member] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Member> {
        self.0.get(idx)
    }

    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut members = self.0.clone();
        members.extend(other.0.iter().cloned());
        Tuple(members)
    }

    pub fn member_for(&self, hierarchy: HierarchyId) -> Option<&Member> {
        self.0.iter().find(|m| m.hierarchy() == hierarchy)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, member) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(member.unique_name())?;
        }
        f.write_str(")")
    }
}

impl From<Member> for Tuple {
    fn from(member: Member) -> Self {
        Tuple::single(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestry_follows_parent_links() {
        let all = Member::all(HierarchyId(1), "Time");
        let year = Member::child(&all, "2024", 0);
        let quarter = Member::child(&year, "Q1", 0);
        let other_year = Member::child(&all, "2023", 1);

        assert!(all.is_ancestor_or_self(&quarter));
        assert!(year.is_ancestor_or_self(&quarter));
        assert!(quarter.is_ancestor_or_self(&quarter));
        assert!(!other_year.is_ancestor_or_self(&quarter));
        assert!(!quarter.is_ancestor_or_self(&year));
        assert_eq!(quarter.unique_name(), "[Time].[All].[2024].[Q1]");
    }

    #[test]
    fn members_compare_by_unique_name() {
        let all = Member::all(HierarchyId(1), "Time");
        let a = Member::child(&all, "2024", 0);
        let b = Member::child(&all, "2024", 0);
        assert_eq!(a, b);
        assert_eq!(Tuple::single(a.clone()), Tuple::single(b));
    }
}
